//! Server configuration, loaded from environment variables at startup.

/// Runtime configuration for parley-server.
///
/// Secrets (the encryption key, provider credentials, the identity-provider
/// endpoint) have no defaults; everything else falls back to a sensible
/// development value.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// SQLite (or other) database URL (default: `"sqlite://parley.db?mode=rwc"`,
    /// which creates the file on first start).  Supports any sqlx-compatible
    /// connection string.
    pub database_url: String,

    /// Base64-encoded 256-bit key for message-body encryption.  Decoded once
    /// at startup; the process fails fast on a malformed key.
    pub encryption_key: String,

    /// Base URL of the OpenAI-compatible completion provider.
    pub provider_url: String,

    /// API key for the completion provider.
    pub provider_api_key: String,

    /// Model identifier passed to the completion provider.
    pub model: String,

    /// Maximum tokens per completion.
    pub max_tokens: u32,

    /// Sampling temperature.
    pub temperature: f32,

    /// Base URL of the identity provider used by the session gate.
    pub identity_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Comma-separated CORS origin allowlist; `None` means wildcard.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI at `/swagger-ui` (default: on; disable in production
    /// to avoid exposing the API structure).
    pub enable_swagger: bool,
}

impl Config {
    /// Build [`Config`] from environment variables.
    ///
    /// Fails when a required secret is absent so a misconfigured deployment
    /// dies at startup instead of at the first request.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            bind_address: env_or("PARLEY_BIND", "0.0.0.0:3000"),
            database_url: env_or("PARLEY_DATABASE_URL", "sqlite://parley.db?mode=rwc"),
            encryption_key: require("PARLEY_ENCRYPTION_KEY")?,
            provider_url: env_or("PARLEY_PROVIDER_URL", "https://api.groq.com/openai/v1"),
            provider_api_key: require("PARLEY_PROVIDER_API_KEY")?,
            model: env_or("PARLEY_MODEL", "llama-3.1-8b-instant"),
            max_tokens: parse_env("PARLEY_MAX_TOKENS", 1024),
            temperature: parse_env("PARLEY_TEMPERATURE", 0.7),
            identity_url: require("PARLEY_IDENTITY_URL")?,
            log_level: env_or("PARLEY_LOG", "info"),
            log_json: env_flag("PARLEY_LOG_JSON", false),
            cors_allowed_origins: std::env::var("PARLEY_CORS_ORIGINS").ok(),
            enable_swagger: env_flag("PARLEY_ENABLE_SWAGGER", true),
        })
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn require(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{key} must be set"))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
