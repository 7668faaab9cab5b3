//! Delegated token lifecycle
//!
//! The token manager is the only component that talks to the identity
//! provider on behalf of a stored user. Silent renewal is unconditional:
//! every `acquire_access_token` call performs a refresh-token grant and
//! persists the result before handing the access token out. `expires_on` is
//! recorded but never consulted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::oauth2::{Account, AuthorizationRequest, IdentityProvider};
use crate::retry::with_timeout;

/// One user's current delegated grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    pub expires_on: DateTime<Utc>,
}

impl TokenSet {
    /// Silent renewal needs a refresh token.
    pub fn can_renew(&self) -> bool {
        !self.refresh_token.trim().is_empty()
    }
}

/// Access token handed back by an explicit refresh request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewedToken {
    pub access_token: String,
    pub expires_on: DateTime<Utc>,
}

pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    identity: Arc<dyn IdentityProvider>,
    /// Scopes for silent renewal when the caller passes none
    default_scopes: Vec<String>,
    /// Delegated scopes for interactive authorization and explicit refresh
    delegated_scopes: Vec<String>,
    timeout: Duration,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        identity: Arc<dyn IdentityProvider>,
        default_scopes: Vec<String>,
        delegated_scopes: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            identity,
            default_scopes,
            delegated_scopes,
            timeout,
        }
    }

    /// Return a freshly renewed access token for `user_id`.
    ///
    /// Fails with `Unauthenticated` without touching the identity provider
    /// when there is no stored grant or it lacks a refresh token. Provider
    /// failures come back as `AuthProvider` and leave the store untouched.
    pub async fn acquire_access_token(
        &self,
        user_id: &str,
        scopes: Option<&[String]>,
    ) -> Result<String> {
        let current = self.load_grant(user_id).await?;
        let scopes = scopes.unwrap_or(&self.default_scopes);

        debug!(user_id, "Renewing access token");
        let grant = with_timeout(
            "refresh_token grant",
            self.timeout,
            self.identity
                .exchange_refresh_token(&current.refresh_token, scopes),
        )
        .await
        .inspect_err(|e| warn!(user_id, "Silent renewal failed: {}", e))?;

        let renewed = TokenSet {
            access_token: grant.access_token,
            refresh_token: grant
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or(current.refresh_token),
            expires_on: grant.expires_on,
        };
        self.persist(user_id, &renewed).await?;

        Ok(renewed.access_token)
    }

    /// Check that `user_id` has a usable stored grant. Store access only.
    pub async fn ensure_grant(&self, user_id: &str) -> Result<()> {
        self.load_grant(user_id).await.map(|_| ())
    }

    /// Build the interactive authorization URL for the delegated scopes.
    pub fn authorization_url(&self, redirect_uri: &str) -> Result<AuthorizationRequest> {
        self.identity
            .authorization_url(&self.delegated_scopes, redirect_uri)
    }

    /// Complete the interactive grant and persist the first token set,
    /// keyed by the provider-issued home-account identifier.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<Account> {
        let grant = with_timeout(
            "authorization_code grant",
            self.timeout,
            self.identity.exchange_code(code, scopes, redirect_uri),
        )
        .await?;

        let user_id = grant.account.user_id.clone();
        let refresh_token = grant.refresh_token.unwrap_or_default();
        if refresh_token.is_empty() {
            warn!(
                user_id = %user_id,
                "No refresh token issued; silent renewal will fail (is offline_access requested?)"
            );
        }

        let tokens = TokenSet {
            access_token: grant.access_token,
            refresh_token,
            expires_on: grant.expires_on,
        };
        self.persist(&user_id, &tokens).await?;

        info!(user_id = %user_id, "Authorization code exchanged for {}", grant.account.username);
        Ok(grant.account)
    }

    /// Caller-initiated renewal with a refresh token the caller supplies.
    pub async fn refresh_access_token(
        &self,
        user_id: &str,
        refresh_token: &str,
    ) -> Result<RenewedToken> {
        if refresh_token.trim().is_empty() {
            return Err(Error::unauthenticated(user_id));
        }

        let grant = with_timeout(
            "refresh_token grant",
            self.timeout,
            self.identity
                .exchange_refresh_token(refresh_token, &self.delegated_scopes),
        )
        .await?;

        let tokens = TokenSet {
            access_token: grant.access_token,
            refresh_token: grant
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| refresh_token.to_string()),
            expires_on: grant.expires_on,
        };
        self.persist(user_id, &tokens).await?;

        info!(user_id, "Access token refreshed on request");
        Ok(RenewedToken {
            access_token: tokens.access_token,
            expires_on: tokens.expires_on,
        })
    }

    async fn load_grant(&self, user_id: &str) -> Result<TokenSet> {
        match self.store.get_tokens(user_id).await? {
            Some(tokens) if tokens.can_renew() => Ok(tokens),
            Some(_) => {
                debug!(user_id, "Stored grant has no refresh token");
                Err(Error::unauthenticated(user_id))
            }
            None => {
                debug!(user_id, "No stored grant");
                Err(Error::unauthenticated(user_id))
            }
        }
    }

    /// Store failures are logged and surfaced, never dropped.
    async fn persist(&self, user_id: &str, tokens: &TokenSet) -> Result<()> {
        self.store
            .store_tokens(user_id, tokens)
            .await
            .inspect_err(|e| error!(user_id, "Failed to persist renewed tokens: {}", e))
    }
}
