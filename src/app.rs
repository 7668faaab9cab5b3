//! Application wiring: configuration in, ready-to-use services out.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::ai::{CompletionClient, FineTuner, ReplyDrafter};
use crate::config::Config;
use crate::constants::GRAPH_DEFAULT_SCOPE;
use crate::credentials::{KeyringStore, StoreStatus};
use crate::interactions::JsonlInteractionLog;
use crate::mail::{ClientCache, MailboxService};
use crate::oauth2::MicrosoftIdentity;
use crate::preferences::PreferenceStore;
use crate::token::TokenManager;

pub struct App {
    pub(crate) config: Config,
    pub(crate) store_status: StoreStatus,
    pub(crate) tokens: Arc<TokenManager>,
    pub(crate) mailbox: Arc<MailboxService>,
    pub(crate) preferences: PreferenceStore,
}

impl App {
    /// Open the credential backend and build the service graph.
    ///
    /// Storage is initialized and checked here, once; a process that cannot
    /// persist renewed tokens refuses to start.
    pub fn init(config: Config) -> Result<Self> {
        let token_dir = config.token_dir()?;
        let store = KeyringStore::open(&token_dir, config.store.backend).with_context(|| {
            format!(
                "Failed to open credential store at {}",
                token_dir.display()
            )
        })?;

        let store_status = store.readiness();
        if !store_status.is_ready() {
            anyhow::bail!("No usable credential storage\n{}", store_status);
        }
        if store_status.keyring_enabled && !store_status.keyring_available {
            tracing::warn!(
                "Keyring unavailable, storing tokens in {}",
                store_status.dir.display()
            );
        }

        let timeout = config.http.timeout();
        let identity = MicrosoftIdentity::new(
            &config.identity.authority(),
            &config.identity.client_id,
            config.identity.client_secret.as_deref(),
            timeout,
        )?;

        let tokens = Arc::new(TokenManager::new(
            Arc::new(store),
            Arc::new(identity),
            vec![GRAPH_DEFAULT_SCOPE.to_string()],
            config.identity.scopes.clone(),
            timeout,
        ));

        let clients = ClientCache::new(
            tokens.clone(),
            &config.mailbox.base_url,
            config.cache.client_ttl(),
            timeout,
        )?;

        tracing::info!(
            "Initialized for {} (mailbox API {})",
            config.identity.authority(),
            config.mailbox.base_url
        );

        Ok(Self {
            config,
            store_status,
            tokens,
            mailbox: Arc::new(MailboxService::new(clients)),
            preferences: PreferenceStore::new(&token_dir),
        })
    }

    /// Reply drafting needs an API key; everything else works without one.
    pub fn drafter(&self) -> Result<ReplyDrafter> {
        Ok(ReplyDrafter::new(
            self.mailbox.clone(),
            self.completions()?,
            Arc::new(JsonlInteractionLog::new(&Config::interactions_path()?)),
        ))
    }

    pub fn fine_tuner(&self) -> Result<FineTuner> {
        Ok(FineTuner::new(
            self.completions()?,
            Arc::new(JsonlInteractionLog::new(&Config::interactions_path()?)),
            &self.config.ai.fine_tune_base_model,
            &self.config.ai.fine_tune_suffix,
        ))
    }

    fn completions(&self) -> Result<CompletionClient> {
        let ai = &self.config.ai;
        let api_key = ai.api_key.as_deref().filter(|k| !k.is_empty()).with_context(|| {
            format!(
                "AI is not configured: set [ai].api_key or {}",
                crate::config::AI_API_KEY_ENV
            )
        })?;

        Ok(CompletionClient::new(
            &ai.base_url,
            api_key,
            &ai.model,
            ai.temperature,
            ai.max_tokens,
            self.config.http.timeout(),
        )?)
    }
}
