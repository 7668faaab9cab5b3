//! Per-user mailbox API client
//!
//! A `MailboxClient` is bound to one user through a `TokenSupplier`. Every
//! call asks the supplier for a token first, so the client itself never
//! holds credentials and can be cached independently of token lifetimes.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use super::types::{DraftUpdate, Message, MessageList, NewDraft};
use crate::constants::THREAD_MESSAGE_LIMIT;
use crate::error::{Error, Result};
use crate::retry::{with_reauth, with_timeout};
use crate::token::TokenManager;

/// Source of bearer tokens for one user.
#[async_trait]
pub trait TokenSupplier: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Supplies tokens for `user_id` through the token manager.
/// Renewal uses the manager's default scopes.
pub struct UserTokenSupplier {
    tokens: Arc<TokenManager>,
    user_id: String,
}

impl UserTokenSupplier {
    pub fn new(tokens: Arc<TokenManager>, user_id: &str) -> Self {
        Self {
            tokens,
            user_id: user_id.to_string(),
        }
    }
}

#[async_trait]
impl TokenSupplier for UserTokenSupplier {
    async fn access_token(&self) -> Result<String> {
        self.tokens
            .acquire_access_token(&self.user_id, None)
            .await
    }
}

pub struct MailboxClient {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
    tokens: Arc<dyn TokenSupplier>,
    timeout: Duration,
}

impl std::fmt::Debug for MailboxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxClient")
            .field("base_url", &self.base_url)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl MailboxClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        user_id: &str,
        tokens: Arc<dyn TokenSupplier>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: user_id.to_string(),
            tokens,
            timeout,
        }
    }

    #[cfg(test)]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Message> {
        let url = self.message_url(message_id);
        self.call("get_message", Method::GET, &url, &[], None).await
    }

    pub async fn create_draft(&self, draft: &NewDraft) -> Result<Message> {
        let url = format!("{}/me/messages", self.base_url);
        let body = to_body("create_draft", draft)?;
        self.call("create_draft", Method::POST, &url, &[], Some(&body))
            .await
    }

    pub async fn update_draft(&self, message_id: &str, update: &DraftUpdate) -> Result<Message> {
        let url = self.message_url(message_id);
        let body = to_body("update_draft", update)?;
        self.call("update_draft", Method::PATCH, &url, &[], Some(&body))
            .await
    }

    /// Latest messages of a conversation, newest first.
    pub async fn get_thread_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>> {
        let url = format!("{}/me/messages", self.base_url);
        let query = [
            (
                "$filter",
                format!(
                    "conversationId eq '{}'",
                    conversation_id.replace('\'', "''")
                ),
            ),
            ("$orderby", "receivedDateTime desc".to_string()),
            ("$top", THREAD_MESSAGE_LIMIT.to_string()),
        ];

        let list: MessageList = self
            .call("get_thread", Method::GET, &url, &query, None)
            .await?;

        // The server ordering is not relied on
        let mut messages = list.value;
        messages.sort_by(|a, b| b.received_date_time.cmp(&a.received_date_time));
        messages.truncate(THREAD_MESSAGE_LIMIT);
        Ok(messages)
    }

    fn message_url(&self, message_id: &str) -> String {
        format!("{}/me/messages/{}", self.base_url, message_id)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        with_reauth(operation, || {
            self.attempt(operation, method.clone(), url, query, body)
        })
        .await
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        let token = self.tokens.access_token().await?;

        let mut request = self.http.request(method, url).bearer_auth(token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let exchange = async {
            let response = request
                .send()
                .await
                .map_err(|e| Error::transport(operation, self.timeout, e))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::debug!(user_id = %self.user_id, "{} returned {}", operation, status);
                return Err(Error::MailboxApi {
                    status: status.as_u16(),
                    body,
                });
            }

            response.json::<T>().await.map_err(|e| Error::InvalidResponse {
                operation,
                message: e.to_string(),
            })
        };

        with_timeout(operation, self.timeout, exchange).await
    }
}

fn to_body<B: serde::Serialize>(operation: &'static str, body: &B) -> Result<serde_json::Value> {
    serde_json::to_value(body).map_err(|e| Error::InvalidResponse {
        operation,
        message: e.to_string(),
    })
}
