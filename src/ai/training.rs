//! Fine-tuning on replies that were actually sent.
//!
//! Every `sent_reply` record is paired with the prompt recorded by the
//! `ai_reply` that preceded it for the same user and message. The pair
//! becomes one chat-format training example: the drafting system prompt, the
//! thread prompt, and the sent text as the assistant turn.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::client::{CompletionClient, FineTuneJob, UploadedFile};
use super::prompts::SALES_REPLY_SYSTEM;
use crate::constants::{MIN_TRAINING_EXAMPLES, TRAINING_FILE_NAME};
use crate::error::{Error, Result};
use crate::interactions::{InteractionKind, InteractionLog, InteractionRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingMessage {
    pub role: &'static str,
    pub content: String,
}

/// One line of the uploaded training file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingExample {
    pub messages: Vec<TrainingMessage>,
}

impl TrainingExample {
    fn new(prompt: &str, reply: &str) -> Self {
        Self {
            messages: vec![
                TrainingMessage {
                    role: "system",
                    content: SALES_REPLY_SYSTEM.to_string(),
                },
                TrainingMessage {
                    role: "user",
                    content: prompt.to_string(),
                },
                TrainingMessage {
                    role: "assistant",
                    content: reply.to_string(),
                },
            ],
        }
    }
}

/// Build examples from the log, one per (user, message).
///
/// A later sent reply for the same message replaces the earlier one. Sent
/// replies with no preceding prompt, or with nothing in them, are skipped.
pub fn training_examples(records: &[InteractionRecord]) -> Vec<TrainingExample> {
    let mut prompts: HashMap<(&str, &str), &str> = HashMap::new();
    let mut slots: HashMap<(&str, &str), usize> = HashMap::new();
    let mut examples = Vec::new();

    for record in records {
        let key = (record.user_id.as_str(), record.message_id.as_str());
        match record.kind {
            InteractionKind::AiReply => {
                if let Some(prompt) = record.prompt.as_deref() {
                    prompts.insert(key, prompt);
                }
            }
            InteractionKind::SentReply => {
                let Some(sent) = record
                    .sent_content
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                else {
                    continue;
                };
                let Some(prompt) = prompts.get(&key) else {
                    continue;
                };

                let example = TrainingExample::new(prompt, sent);
                match slots.get(&key).copied() {
                    Some(i) => examples[i] = example,
                    None => {
                        slots.insert(key, examples.len());
                        examples.push(example);
                    }
                }
            }
        }
    }

    examples
}

pub fn to_jsonl(examples: &[TrainingExample]) -> Result<String> {
    examples.iter().try_fold(String::new(), |mut out, example| {
        let line = serde_json::to_string(example).map_err(Error::log)?;
        out.push_str(&line);
        out.push('\n');
        Ok(out)
    })
}

/// Outcome of starting a fine-tune
#[derive(Debug, Clone)]
pub struct FineTuneRun {
    pub examples: usize,
    pub file: UploadedFile,
    pub job: FineTuneJob,
}

pub struct FineTuner {
    completions: CompletionClient,
    log: Arc<dyn InteractionLog>,
    base_model: String,
    suffix: String,
}

impl FineTuner {
    pub fn new(
        completions: CompletionClient,
        log: Arc<dyn InteractionLog>,
        base_model: &str,
        suffix: &str,
    ) -> Self {
        Self {
            completions,
            log,
            base_model: base_model.to_string(),
            suffix: suffix.to_string(),
        }
    }

    /// Upload the training set built from the log and start a job on it.
    ///
    /// Nothing is uploaded when the log holds fewer examples than the
    /// provider accepts.
    pub async fn start(&self) -> Result<FineTuneRun> {
        let records = self.log.records().await?;
        let examples = training_examples(&records);
        if examples.len() < MIN_TRAINING_EXAMPLES {
            return Err(Error::InsufficientTrainingData {
                found: examples.len(),
                required: MIN_TRAINING_EXAMPLES,
            });
        }

        let contents = to_jsonl(&examples)?;
        let file = self
            .completions
            .upload_training_file(TRAINING_FILE_NAME, contents.into_bytes())
            .await?;
        info!(
            "Uploaded {} training examples as {} ({} bytes)",
            examples.len(),
            file.id,
            file.bytes
        );

        let job = self
            .completions
            .create_fine_tune(&file.id, &self.base_model, &self.suffix)
            .await?;
        info!("Started fine-tune {} on {}", job.id, self.base_model);

        Ok(FineTuneRun {
            examples: examples.len(),
            file,
            job,
        })
    }

    pub async fn status(&self, job_id: &str) -> Result<FineTuneJob> {
        self.completions.get_fine_tune(job_id).await
    }
}
