//! In-memory fakes for the store, identity provider and token supplier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::credentials::{CredentialStore, MemoryStore};
use crate::error::{Error, Result};
use crate::mail::client::TokenSupplier;
use crate::oauth2::{Account, AuthorizationRequest, CodeGrant, IdentityProvider, RefreshGrant};
use crate::token::{TokenManager, TokenSet};

/// Memory store that counts reads and writes and can be told to fail writes.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    read_delay: Option<Duration>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(self, user_id: &str, tokens: TokenSet) -> Self {
        Self {
            inner: self.inner.with_tokens(user_id, tokens),
            ..self
        }
    }

    /// Make every read take `delay`, so concurrent callers overlap.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Current stored value, without counting as a read.
    pub async fn snapshot(&self, user_id: &str) -> Option<TokenSet> {
        self.inner.get_tokens(user_id).await.unwrap()
    }
}

#[async_trait]
impl CredentialStore for CountingStore {
    async fn get_tokens(&self, user_id: &str) -> Result<Option<TokenSet>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.get_tokens(user_id).await
    }

    async fn store_tokens(&self, user_id: &str, tokens: &TokenSet) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::store(user_id, "disk full"));
        }
        self.inner.store_tokens(user_id, tokens).await
    }
}

/// Identity provider answering every grant from canned results.
pub struct FakeIdentity {
    refresh_result: Result<RefreshGrant>,
    code_result: Result<CodeGrant>,
    delay: Option<Duration>,
    refresh_calls: AtomicUsize,
    code_calls: AtomicUsize,
    last_refresh_token: Mutex<Option<String>>,
    last_scopes: Mutex<Vec<String>>,
}

impl FakeIdentity {
    pub fn renewing(access_token: &str, expires_on: DateTime<Utc>) -> Self {
        Self {
            refresh_result: Ok(RefreshGrant {
                access_token: access_token.to_string(),
                expires_on,
                refresh_token: None,
            }),
            code_result: Err(Error::AuthProvider {
                operation: "authorization_code grant",
                message: "no code grant configured".into(),
            }),
            delay: None,
            refresh_calls: AtomicUsize::new(0),
            code_calls: AtomicUsize::new(0),
            last_refresh_token: Mutex::new(None),
            last_scopes: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            refresh_result: Err(Error::AuthProvider {
                operation: "refresh_token grant",
                message: message.to_string(),
            }),
            ..Self::renewing("unused", Utc::now())
        }
    }

    pub fn with_rotated_refresh_token(mut self, refresh_token: &str) -> Self {
        if let Ok(grant) = &mut self.refresh_result {
            grant.refresh_token = Some(refresh_token.to_string());
        }
        self
    }

    pub fn with_code_grant(mut self, grant: CodeGrant) -> Self {
        self.code_result = Ok(grant);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn code_calls(&self) -> usize {
        self.code_calls.load(Ordering::SeqCst)
    }

    pub fn last_refresh_token(&self) -> Option<String> {
        self.last_refresh_token.lock().unwrap().clone()
    }

    pub fn last_scopes(&self) -> Vec<String> {
        self.last_scopes.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    fn authorization_url(
        &self,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<AuthorizationRequest> {
        Ok(AuthorizationRequest {
            url: format!("https://login.test/authorize?scope={}&redirect_uri={}", scopes.join("+"), redirect_uri),
            state: "state-1".to_string(),
        })
    }

    async fn exchange_code(
        &self,
        _code: &str,
        scopes: &[String],
        _redirect_uri: &str,
    ) -> Result<CodeGrant> {
        self.code_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_scopes.lock().unwrap() = scopes.to_vec();
        self.code_result.clone()
    }

    async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<RefreshGrant> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_refresh_token.lock().unwrap() = Some(refresh_token.to_string());
        *self.last_scopes.lock().unwrap() = scopes.to_vec();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.refresh_result.clone()
    }
}

/// Hands out a scripted sequence of access tokens; the last one repeats.
pub struct ScriptedTokens {
    tokens: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedTokens {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: Mutex::new(tokens.iter().map(|t| t.to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSupplier for ScriptedTokens {
    async fn access_token(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut tokens = self.tokens.lock().unwrap();
        if tokens.len() > 1 {
            Ok(tokens.pop_front().unwrap())
        } else {
            Ok(tokens.front().cloned().unwrap_or_default())
        }
    }
}

pub fn token_manager(store: &Arc<CountingStore>, identity: &Arc<FakeIdentity>) -> Arc<TokenManager> {
    Arc::new(TokenManager::new(
        store.clone(),
        identity.clone(),
        vec!["https://graph.microsoft.com/.default".to_string()],
        vec!["Mail.Read".to_string(), "offline_access".to_string()],
        Duration::from_secs(10),
    ))
}

pub fn tokens(access: &str, refresh: &str, expires_on: DateTime<Utc>) -> TokenSet {
    TokenSet {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        expires_on,
    }
}

pub fn account(user_id: &str) -> Account {
    Account {
        user_id: user_id.to_string(),
        display_name: "Sam Sales".to_string(),
        username: "sam@contoso.com".to_string(),
    }
}
