//! Per-user preferences, stored next to the token files.
//!
//! An update merges into what is already stored: nested objects are merged
//! key by key, any other value replaces the stored one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::credentials::user_file;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(default)]
    pub preferences: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

pub struct PreferenceStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl PreferenceStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn file(&self, user_id: &str) -> PathBuf {
        user_file(&self.dir, "preferences", user_id)
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<UserPreferences>> {
        let raw = match tokio::fs::read_to_string(self.file(user_id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::store(user_id, e)),
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| Error::store(user_id, e))
    }

    /// Merge `patch` into the stored preferences and return the result.
    pub async fn update(&self, user_id: &str, patch: Map<String, Value>) -> Result<UserPreferences> {
        let _guard = self.write_lock.lock().await;

        let mut preferences = self
            .get(user_id)
            .await?
            .map(|stored| stored.preferences)
            .unwrap_or_default();
        merge(&mut preferences, patch);

        let record = UserPreferences {
            preferences,
            updated_at: Utc::now(),
        };
        let raw = serde_json::to_string_pretty(&record).map_err(|e| Error::store(user_id, e))?;

        // Replace in one step so readers never see a partial file
        let path = self.file(user_id);
        let staged = path.with_extension("json.tmp");
        tokio::fs::write(&staged, raw)
            .await
            .map_err(|e| Error::store(user_id, e))?;
        tokio::fs::rename(&staged, &path)
            .await
            .map_err(|e| Error::store(user_id, e))?;

        debug!(user_id, "Updated {} preference keys", record.preferences.len());
        Ok(record)
    }
}

fn merge(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match value {
            Value::Object(nested) => match target.get_mut(&key) {
                Some(Value::Object(existing)) => merge(existing, nested),
                _ => {
                    target.insert(key, Value::Object(nested));
                }
            },
            value => {
                target.insert(key, value);
            }
        }
    }
}

/// Parse a preferences update given on the command line; it must be a JSON object.
pub fn parse_update(raw: &str) -> anyhow::Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(raw)?;
    match value {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("Preferences must be a JSON object, got: {}", other),
    }
}
