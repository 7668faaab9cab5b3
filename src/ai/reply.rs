//! Reply drafting: mailbox context in, suggested reply body out.

use chrono::SecondsFormat;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::client::CompletionClient;
use super::prompts;
use crate::error::Result;
use crate::interactions::{InteractionKind, InteractionLog, InteractionRecord};
use crate::mail::{MailboxService, Message};
use crate::retry::{RetryConfig, with_retry};

/// Default retry configuration for completion requests
fn default_retry_config() -> RetryConfig {
    RetryConfig::new(3, Duration::from_millis(500), Duration::from_secs(10))
}

pub struct ReplyDrafter {
    mailbox: Arc<MailboxService>,
    completions: CompletionClient,
    log: Arc<dyn InteractionLog>,
    retry: RetryConfig,
}

impl ReplyDrafter {
    pub fn new(
        mailbox: Arc<MailboxService>,
        completions: CompletionClient,
        log: Arc<dyn InteractionLog>,
    ) -> Self {
        Self {
            mailbox,
            completions,
            log,
            retry: default_retry_config(),
        }
    }

    #[cfg(test)]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Draft a reply to `message_id` using its conversation as context.
    pub async fn generate_reply(&self, user_id: &str, message_id: &str) -> Result<String> {
        let message = self.mailbox.fetch_message(user_id, message_id).await?;
        let thread = match message.conversation_id.as_deref() {
            Some(conversation_id) => self.mailbox.fetch_thread(user_id, conversation_id).await?,
            None => vec![message.clone()],
        };

        let user_prompt =
            prompts::reply_request(&format_thread_context(&thread), message.subject());
        let completion = with_retry(&self.retry, || {
            self.completions
                .complete(prompts::SALES_REPLY_SYSTEM, &user_prompt)
        })
        .await?;

        let reply = completion.content.trim().to_string();

        let mut record = InteractionRecord::new(user_id, &message.id, InteractionKind::AiReply);
        record.model = Some(completion.model);
        record.input_tokens = Some(completion.usage.prompt_tokens);
        record.output_tokens = Some(completion.usage.completion_tokens);
        record.subject = message.subject.clone();
        record.prompt = Some(user_prompt);
        self.log.record(&record).await?;

        info!(
            user_id,
            "Generated reply for {} ({} prompt / {} completion tokens)",
            message.id,
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens
        );
        Ok(reply)
    }

    /// Record what the user actually sent after starting from a draft.
    pub async fn log_sent_reply(
        &self,
        user_id: &str,
        message_id: &str,
        original_reply: &str,
        sent_content: &str,
    ) -> Result<()> {
        let message = self.mailbox.fetch_message(user_id, message_id).await?;

        let mut record = InteractionRecord::new(user_id, message_id, InteractionKind::SentReply);
        record.original_reply = Some(original_reply.to_string());
        record.sent_content = Some(sent_content.to_string());
        record.subject = message.subject.clone();
        record.recipients = message.recipient_addresses();

        self.log.record(&record).await
    }
}

/// Render a thread as plain text for the prompt.
pub fn format_thread_context(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let date = m
                .received_date_time
                .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
                .unwrap_or_else(|| "unknown".to_string());
            format!(
                "From: {}\nTo: {}\nSubject: {}\nDate: {}\n\n{}\n\n{}\n",
                m.display_from(),
                m.display_to(),
                m.subject(),
                date,
                m.body_text(),
                prompts::THREAD_SEPARATOR
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
