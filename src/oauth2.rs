//! OAuth2 support for the Microsoft identity platform
//!
//! Wraps the v2.0 token endpoint for the two grants the service needs:
//! the one-time authorization-code exchange and refresh-token renewal.
//! The account behind a code exchange is read from the returned ID token.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{DEFAULT_TOKEN_LIFETIME_SECS, OIDC_SCOPES};
use crate::error::{Error, Result};
use crate::retry::with_timeout;

/// Mailbox principal returned by the interactive grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Home-account identifier (`{oid}.{tid}`), the key for everything else.
    pub user_id: String,
    pub display_name: String,
    pub username: String,
}

/// Result of an authorization-code exchange.
#[derive(Debug, Clone)]
pub struct CodeGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_on: DateTime<Utc>,
    pub account: Account,
}

/// Result of a refresh-token grant. The provider may rotate the refresh token.
#[derive(Debug, Clone)]
pub struct RefreshGrant {
    pub access_token: String,
    pub expires_on: DateTime<Utc>,
    pub refresh_token: Option<String>,
}

/// URL the user is sent to, plus the CSRF state to check on the callback.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// The OAuth2 authority the token manager talks to.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn authorization_url(&self, scopes: &[String], redirect_uri: &str)
    -> Result<AuthorizationRequest>;

    async fn exchange_code(
        &self,
        code: &str,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<CodeGrant>;

    async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<RefreshGrant>;
}

/// Token response from the identity platform
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    id_token: Option<String>,
}

impl TokenResponse {
    fn expires_on(&self) -> DateTime<Utc> {
        let lifetime = self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        Utc::now() + ChronoDuration::seconds(lifetime)
    }
}

/// Error response from the identity platform
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Claims read from the ID token payload
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    oid: String,
    tid: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
}

/// Confidential client for `login.microsoftonline.com/{tenant}`
pub struct MicrosoftIdentity {
    authority: String,
    client_id: String,
    client_secret: Option<String>,
    http_client: reqwest::Client,
    timeout: Duration,
}

impl MicrosoftIdentity {
    /// Create a client for `authority` (host plus tenant, no trailing slash).
    pub fn new(
        authority: &str,
        client_id: &str,
        client_secret: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport {
                operation: "identity client setup",
                message: e.to_string(),
            })?;

        Ok(Self {
            authority: authority.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.map(|s| s.to_string()),
            http_client,
            timeout,
        })
    }

    fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority)
    }

    async fn request_token(
        &self,
        operation: &'static str,
        mut params: Vec<(&str, String)>,
    ) -> Result<TokenResponse> {
        params.push(("client_id", self.client_id.clone()));
        if let Some(ref secret) = self.client_secret {
            params.push(("client_secret", secret.clone()));
        }

        let request = async {
            let response = self
                .http_client
                .post(self.token_url())
                .form(&params)
                .send()
                .await
                .map_err(|e| match Error::transport(operation, self.timeout, e) {
                    Error::Transport { operation, message } => {
                        Error::AuthProvider { operation, message }
                    }
                    other => other,
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let error: ErrorResponse = response.json().await.unwrap_or(ErrorResponse {
                    error: format!("http_{}", status.as_u16()),
                    error_description: None,
                });
                return Err(Error::AuthProvider {
                    operation,
                    message: match error.error_description {
                        Some(desc) => format!("{}: {}", error.error, desc),
                        None => error.error,
                    },
                });
            }

            response
                .json::<TokenResponse>()
                .await
                .map_err(|e| Error::InvalidResponse {
                    operation,
                    message: e.to_string(),
                })
        };

        with_timeout(operation, self.timeout, request).await
    }
}

#[async_trait]
impl IdentityProvider for MicrosoftIdentity {
    fn authorization_url(
        &self,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<AuthorizationRequest> {
        // Random state parameter for CSRF protection
        let mut state_bytes = [0u8; 16];
        getrandom::fill(&mut state_bytes).map_err(|e| Error::AuthProvider {
            operation: "authorization url",
            message: format!("failed to generate random state: {}", e),
        })?;
        let state = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(state_bytes);

        let url = format!(
            "{}/oauth2/v2.0/authorize?client_id={}&response_type=code&redirect_uri={}&response_mode=query&scope={}&state={}",
            self.authority,
            urlencod(&self.client_id),
            urlencod(redirect_uri),
            urlencod(&with_oidc_scopes(scopes).join(" ")),
            urlencod(&state),
        );

        tracing::debug!("Authorization redirect URI: {}", redirect_uri);

        Ok(AuthorizationRequest { url, state })
    }

    async fn exchange_code(
        &self,
        code: &str,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<CodeGrant> {
        let operation = "authorization_code grant";
        let params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
            ("scope", with_oidc_scopes(scopes).join(" ")),
        ];

        let token = self.request_token(operation, params).await?;
        let id_token = token
            .id_token
            .as_deref()
            .ok_or_else(|| Error::InvalidResponse {
                operation,
                message: "no id_token in response".to_string(),
            })?;
        let account = account_from_id_token(id_token)?;

        Ok(CodeGrant {
            expires_on: token.expires_on(),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            account,
        })
    }

    async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<RefreshGrant> {
        let params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("scope", scopes.join(" ")),
        ];

        let token = self.request_token("refresh_token grant", params).await?;

        Ok(RefreshGrant {
            expires_on: token.expires_on(),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
        })
    }
}

/// Add the OpenID scopes needed for an ID token, without duplicates.
fn with_oidc_scopes(scopes: &[String]) -> Vec<String> {
    let mut all = scopes.to_vec();
    for scope in OIDC_SCOPES {
        if !all.iter().any(|s| s == scope) {
            all.push(scope.to_string());
        }
    }
    all
}

/// Read the account out of an ID token.
///
/// The token arrives straight from the token endpoint over TLS, so the
/// payload is decoded without verifying the signature.
fn account_from_id_token(id_token: &str) -> Result<Account> {
    let invalid = |message: String| Error::InvalidResponse {
        operation: "id_token",
        message,
    };

    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| invalid("not a JWT".to_string()))?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| invalid(e.to_string()))?;
    let claims: IdTokenClaims =
        serde_json::from_slice(&bytes).map_err(|e| invalid(e.to_string()))?;

    let username = claims.preferred_username.unwrap_or_default();
    Ok(Account {
        user_id: format!("{}.{}", claims.oid, claims.tid),
        display_name: claims.name.unwrap_or_else(|| username.clone()),
        username,
    })
}

/// URL-encode a string
fn urlencod(s: &str) -> String {
    let mut result = String::new();
    for c in s.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => result.push(c),
            _ => {
                for b in c.to_string().as_bytes() {
                    result.push_str(&format!("%{:02X}", b));
                }
            }
        }
    }
    result
}
