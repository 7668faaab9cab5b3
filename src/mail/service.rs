use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use super::cache::ClientCache;
use super::client::MailboxClient;
use super::types::{DraftUpdate, Message, NewDraft};
use crate::error::{Error, Result};

/// Mailbox operations keyed by user, as exposed to the route layer.
pub struct MailboxService {
    clients: ClientCache,
}

impl MailboxService {
    pub fn new(clients: ClientCache) -> Self {
        Self { clients }
    }

    pub async fn acquire_mailbox_client(&self, user_id: &str) -> Result<Arc<MailboxClient>> {
        self.clients.get_client(user_id).await
    }

    pub async fn fetch_message(&self, user_id: &str, message_id: &str) -> Result<Message> {
        let client = self.acquire_mailbox_client(user_id).await?;
        self.observe(user_id, client.get_message(message_id)).await
    }

    /// Up to ten messages of a conversation, newest first.
    pub async fn fetch_thread(&self, user_id: &str, thread_id: &str) -> Result<Vec<Message>> {
        let client = self.acquire_mailbox_client(user_id).await?;
        self.observe(user_id, client.get_thread_by_conversation_id(thread_id))
            .await
    }

    pub async fn create_draft(&self, user_id: &str, draft: &NewDraft) -> Result<Message> {
        let client = self.acquire_mailbox_client(user_id).await?;
        let created = self.observe(user_id, client.create_draft(draft)).await?;
        info!(user_id, "Draft {} created", created.id);
        Ok(created)
    }

    pub async fn patch_draft(
        &self,
        user_id: &str,
        message_id: &str,
        updates: &DraftUpdate,
    ) -> Result<Message> {
        let client = self.acquire_mailbox_client(user_id).await?;
        let patched = self
            .observe(user_id, client.update_draft(message_id, updates))
            .await?;
        info!(user_id, "Draft {} updated", message_id);
        Ok(patched)
    }

    /// A cached client whose grant has since disappeared is useless, so
    /// it is evicted as soon as a call reports `Unauthenticated`.
    async fn observe<T>(&self, user_id: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let result = call.await;
        if let Err(Error::Unauthenticated { .. }) = &result {
            warn!(user_id, "Grant no longer usable, evicting cached mailbox client");
            self.clients.invalidate(user_id).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialStore, MemoryStore};
    use crate::mail::types::ItemBody;
    use crate::testing::{CountingStore, FakeIdentity, token_manager, tokens};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(
        server: &MockServer,
        store: &Arc<CountingStore>,
        identity: &Arc<FakeIdentity>,
    ) -> MailboxService {
        let cache = ClientCache::new(
            token_manager(store, identity),
            &server.uri(),
            Duration::from_secs(3600),
            Duration::from_secs(5),
        )
        .unwrap();
        MailboxService::new(cache)
    }

    #[tokio::test]
    async fn test_fetch_message_renews_and_persists() {
        let past = Utc::now() - ChronoDuration::hours(3);
        let future = Utc::now() + ChronoDuration::hours(1);
        let store = Arc::new(CountingStore::new().with_tokens("u1", tokens("old", "r1", past)));
        let identity = Arc::new(FakeIdentity::renewing("new", future));

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/messages/m1"))
            .and(header("Authorization", "Bearer new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "m1",
                "subject": "Pricing"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let message = service(&server, &store, &identity)
            .fetch_message("u1", "m1")
            .await
            .unwrap();

        assert_eq!(message.subject(), "Pricing");
        assert_eq!(
            store.snapshot("u1").await.unwrap(),
            tokens("new", "r1", future)
        );
    }

    #[tokio::test]
    async fn test_unknown_user_is_rejected_without_traffic() {
        let store = Arc::new(CountingStore::new());
        let identity = Arc::new(FakeIdentity::renewing("new", Utc::now()));

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = service(&server, &store, &identity)
            .fetch_thread("u2", "conv-1")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Unauthenticated { .. }));
        assert_eq!(err.status_code(), 401);
        assert_eq!(identity.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_thread_caps_at_ten() {
        let store = Arc::new(CountingStore::new().with_tokens("u1", tokens("old", "r1", Utc::now())));
        let identity = Arc::new(FakeIdentity::renewing("new", Utc::now()));

        let value: Vec<_> = (0..15)
            .map(|i| {
                // Minutes scrambled so the input is not already ordered
                let minute = (i * 7) % 15;
                serde_json::json!({
                    "id": format!("m{}", minute),
                    "receivedDateTime": format!("2024-03-01T10:{:02}:00Z", minute)
                })
            })
            .collect();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "value": value })),
            )
            .mount(&server)
            .await;

        let thread = service(&server, &store, &identity)
            .fetch_thread("u1", "conv-1")
            .await
            .unwrap();

        let ids: Vec<_> = thread.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["m14", "m13", "m12", "m11", "m10", "m9", "m8", "m7", "m6", "m5"]
        );
    }

    #[tokio::test]
    async fn test_drafts_reuse_cached_client() {
        let store = Arc::new(CountingStore::new().with_tokens("u1", tokens("old", "r1", Utc::now())));
        let identity = Arc::new(FakeIdentity::renewing("new", Utc::now()));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "draft-1",
                "isDraft": true
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/me/messages/draft-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "draft-1",
                "isDraft": true
            })))
            .mount(&server)
            .await;

        let service = service(&server, &store, &identity);
        let draft = service
            .create_draft("u1", &NewDraft::plain("Hello", "ann@fabrikam.com", "Body"))
            .await
            .unwrap();
        let update = DraftUpdate {
            body: Some(ItemBody::html("<p>Better</p>")),
            ..Default::default()
        };
        service.patch_draft("u1", &draft.id, &update).await.unwrap();

        // One store read for construction, one per renewal
        assert_eq!(identity.refresh_calls(), 2);
        assert_eq!(store.reads(), 3);
    }

    #[tokio::test]
    async fn test_lost_grant_evicts_cached_client() {
        let memory = Arc::new(
            MemoryStore::new().with_tokens("u1", tokens("old", "r1", Utc::now())),
        );
        let identity = Arc::new(FakeIdentity::renewing("new", Utc::now()));
        let manager = Arc::new(crate::token::TokenManager::new(
            memory.clone(),
            identity.clone(),
            vec!["https://graph.microsoft.com/.default".to_string()],
            Vec::new(),
            Duration::from_secs(5),
        ));

        let server = MockServer::start().await;
        let cache = ClientCache::new(
            manager,
            &server.uri(),
            Duration::from_secs(3600),
            Duration::from_secs(5),
        )
        .unwrap();
        let service = MailboxService::new(cache);

        let first = service.acquire_mailbox_client("u1").await.unwrap();

        // The refresh token is wiped out from under the cached client
        memory
            .store_tokens("u1", &tokens("old", "", Utc::now()))
            .await
            .unwrap();
        let err = service.fetch_message("u1", "m1").await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));

        // Eviction means the next acquisition re-checks the store
        memory
            .store_tokens("u1", &tokens("old", "r2", Utc::now()))
            .await
            .unwrap();
        let second = service.acquire_mailbox_client("u1").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
