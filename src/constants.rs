//! Application-wide constants for tuning and configuration
//!
//! Centralizes magic numbers to make them discoverable and configurable.

/// Lifetime of a cached mailbox client in seconds.
/// After this the client is rebuilt and the stored grant re-validated.
pub const CLIENT_CACHE_TTL_SECS: u64 = 3600;

/// Upper bound on cached mailbox clients (one per user).
pub const CLIENT_CACHE_MAX_CAPACITY: u64 = 10_000;

/// Timeout in seconds for every outbound HTTP call.
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// Maximum number of messages returned for a conversation thread.
/// Prompt construction relies on "most recent N, newest first".
pub const THREAD_MESSAGE_LIMIT: usize = 10;

/// Lifetime assumed for an access token when the provider omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Microsoft identity platform host.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Microsoft Graph REST endpoint.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Scope used for silent renewal when the caller doesn't ask for one.
pub const GRAPH_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Delegated permissions requested during interactive authorization.
pub const DELEGATED_SCOPES: [&str; 4] = ["Mail.Read", "Mail.ReadWrite", "Mail.Send", "offline_access"];

/// OpenID scopes needed for the ID token that identifies the account.
pub const OIDC_SCOPES: [&str; 2] = ["openid", "profile"];

/// Service name for OS keyring entries.
pub const KEYRING_SERVICE: &str = "graphdraft";

// === AI Constants ===

/// OpenAI-compatible completion endpoint base.
pub const DEFAULT_AI_BASE_URL: &str = "https://api.openai.com/v1";

/// Model used for reply drafting unless a fine-tuned model is configured.
pub const DEFAULT_AI_MODEL: &str = "gpt-3.5-turbo";

/// Sampling temperature for reply drafting.
pub const DEFAULT_AI_TEMPERATURE: f32 = 0.7;

/// Maximum tokens for a generated reply.
pub const DEFAULT_AI_MAX_TOKENS: u32 = 500;

/// Fewest examples the provider accepts for a fine-tuning job.
pub const MIN_TRAINING_EXAMPLES: usize = 10;

/// Name the training set is uploaded under.
pub const TRAINING_FILE_NAME: &str = "training.jsonl";

/// Suffix given to fine-tuned reply models.
pub const DEFAULT_FINE_TUNE_SUFFIX: &str = "b2b-sales-email-replies";
