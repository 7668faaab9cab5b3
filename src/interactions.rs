//! Audit trail of AI drafting activity, one record per event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// A reply was generated by the completion provider
    AiReply,
    /// The user sent a reply that started from a generated one
    SentReply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub user_id: String,
    pub message_id: String,
    pub kind: InteractionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// User prompt the reply was generated from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_content: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl InteractionRecord {
    pub fn new(user_id: &str, message_id: &str, kind: InteractionKind) -> Self {
        Self {
            user_id: user_id.to_string(),
            message_id: message_id.to_string(),
            kind,
            model: None,
            input_tokens: None,
            output_tokens: None,
            subject: None,
            prompt: None,
            recipients: Vec::new(),
            original_reply: None,
            sent_content: None,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait InteractionLog: Send + Sync {
    async fn record(&self, record: &InteractionRecord) -> Result<()>;

    /// Every record, oldest first.
    async fn records(&self) -> Result<Vec<InteractionRecord>>;
}

/// Appends records as JSON lines to a file under the data directory.
pub struct JsonlInteractionLog {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlInteractionLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl InteractionLog for JsonlInteractionLog {
    async fn record(&self, record: &InteractionRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).map_err(Error::log)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::log(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes()).await.map_err(Error::log)?;
        file.flush().await.map_err(Error::log)?;

        tracing::debug!(
            user_id = %record.user_id,
            "Logged {:?} interaction for {}",
            record.kind,
            record.message_id
        );
        Ok(())
    }

    /// A missing file is an empty log. Lines that no longer parse are skipped.
    async fn records(&self) -> Result<Vec<InteractionRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::log(format!("{}: {}", self.path.display(), e))),
        };

        let records = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(i, line)| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping interaction log line {}: {}", i + 1, e);
                    None
                }
            })
            .collect();
        Ok(records)
    }
}

/// Keeps records in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryInteractionLog {
    records: std::sync::Mutex<Vec<InteractionRecord>>,
}

#[cfg(test)]
impl MemoryInteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<InteractionRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
#[async_trait]
impl InteractionLog for MemoryInteractionLog {
    async fn record(&self, record: &InteractionRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }

    async fn records(&self) -> Result<Vec<InteractionRecord>> {
        Ok(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_jsonl_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlInteractionLog::new(&dir.path().join("interactions.jsonl"));

        let mut generated = InteractionRecord::new("u1", "m1", InteractionKind::AiReply);
        generated.model = Some("gpt-3.5-turbo".into());
        generated.input_tokens = Some(120);
        generated.output_tokens = Some(80);
        log.record(&generated).await.unwrap();

        let mut sent = InteractionRecord::new("u1", "m1", InteractionKind::SentReply);
        sent.recipients = vec!["ann@fabrikam.com".into()];
        sent.sent_content = Some("Final text".into());
        log.record(&sent).await.unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(log.records().await.unwrap(), vec![generated.clone(), sent.clone()]);
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: InteractionRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, generated);
        assert!(lines[0].contains(r#""kind":"ai_reply""#));
        assert!(!lines[0].contains("recipients"));

        let second: InteractionRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.kind, InteractionKind::SentReply);
        assert_eq!(second.recipients, vec!["ann@fabrikam.com"]);
    }

    #[tokio::test]
    async fn test_jsonl_unwritable_path_is_log_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlInteractionLog::new(&dir.path().join("missing").join("log.jsonl"));

        let err = log
            .record(&InteractionRecord::new("u1", "m1", InteractionKind::AiReply))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Log { .. }));
        assert!(err.to_string().starts_with("interaction log failed"));
    }

    #[tokio::test]
    async fn test_jsonl_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlInteractionLog::new(&dir.path().join("interactions.jsonl"));
        assert!(log.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_skips_unreadable_lines() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let log = JsonlInteractionLog::new(&dir.path().join("interactions.jsonl"));
        log.record(&InteractionRecord::new("u1", "m1", InteractionKind::AiReply))
            .await
            .unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .unwrap()
            .write_all(b"{truncated\n\n")
            .unwrap();
        log.record(&InteractionRecord::new("u1", "m2", InteractionKind::SentReply))
            .await
            .unwrap();

        let records = log.records().await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_memory_log() {
        let log = MemoryInteractionLog::new();
        log.record(&InteractionRecord::new("u1", "m1", InteractionKind::AiReply))
            .await
            .unwrap();
        assert_eq!(log.records().await.unwrap().len(), 1);
    }
}
