use std::{env, fmt, net::SocketAddr, time::Duration};

use chrono_tz::Tz;
use url::Url;

use super::server_bind_address;

const DEFAULT_EVENT_LOG_KEY: &str = "webhook:events";
const DEFAULT_REFRESH_SECS: u64 = 5;
const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 5_000;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Identity provider settings as found in the environment.
///
/// Every field is optional at load time. Handlers call [`OidcSettings::require`]
/// on first use so a deployment without OIDC still serves webhooks, while any
/// login attempt fails with a message naming the missing variable.
#[derive(Debug, Clone, Default)]
pub struct OidcSettings {
    pub issuer: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Validated identity provider credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcCredentials {
    pub issuer: Url,
    pub client_id: String,
    pub client_secret: String,
}

impl OidcSettings {
    pub fn require(&self) -> Result<OidcCredentials, ConfigError> {
        let issuer = self
            .issuer
            .as_deref()
            .ok_or(ConfigError::MissingSetting("OIDC_ISSUER"))?;
        let client_id = self
            .client_id
            .clone()
            .ok_or(ConfigError::MissingSetting("OIDC_CLIENT_ID"))?;
        let client_secret = self
            .client_secret
            .clone()
            .ok_or(ConfigError::MissingSetting("OIDC_CLIENT_SECRET"))?;
        let issuer = parse_url("OIDC_ISSUER", issuer)?;

        Ok(OidcCredentials {
            issuer,
            client_id,
            client_secret,
        })
    }
}

/// Connection details for the key-value REST endpoint backing the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvSettings {
    pub url: Url,
    pub token: String,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub public_base_url: Url,
    pub oidc: OidcSettings,
    pub kv: Option<KvSettings>,
    pub event_log_key: String,
    pub webhook_secret: Option<String>,
    pub display_timezone: Tz,
    pub refresh_interval: Duration,
    pub upstream_timeout: Duration,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let public_base_url = match (var("PUBLIC_BASE_URL"), var("VERCEL_URL")) {
            (Some(value), _) => parse_url("PUBLIC_BASE_URL", &value)?,
            (None, Some(host)) => parse_url("VERCEL_URL", &format!("https://{host}"))?,
            (None, None) => parse_url("APP_BIND_ADDR", &format!("http://{bind_addr}"))?,
        };

        let oidc = OidcSettings {
            issuer: var_or_alias("OIDC_ISSUER", "ONELOGIN_ISSUER"),
            client_id: var_or_alias("OIDC_CLIENT_ID", "ONELOGIN_CLIENT_ID"),
            client_secret: var_or_alias("OIDC_CLIENT_SECRET", "ONELOGIN_CLIENT_SECRET"),
        };

        let kv = match (var("KV_REST_API_URL"), var("KV_REST_API_TOKEN")) {
            (Some(url), Some(token)) => Some(KvSettings {
                url: parse_url("KV_REST_API_URL", &url)?,
                token,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::MissingSetting("KV_REST_API_TOKEN")),
            (None, Some(_)) => return Err(ConfigError::MissingSetting("KV_REST_API_URL")),
        };
        if kv.is_none() && environment == Environment::Production {
            return Err(ConfigError::MissingSetting("KV_REST_API_URL"));
        }

        let display_timezone = match var("DASHBOARD_TIMEZONE") {
            Some(value) => value
                .parse::<Tz>()
                .map_err(|_| ConfigError::InvalidTimezone(value))?,
            None => Tz::UTC,
        };

        let refresh_secs = parse_number("DASHBOARD_REFRESH_SECS", DEFAULT_REFRESH_SECS)?;
        let timeout_ms = parse_number("UPSTREAM_TIMEOUT_MS", DEFAULT_UPSTREAM_TIMEOUT_MS)?;

        Ok(Self {
            bind_addr,
            environment,
            public_base_url,
            oidc,
            kv,
            event_log_key: var("EVENT_LOG_KEY").unwrap_or_else(|| DEFAULT_EVENT_LOG_KEY.to_string()),
            webhook_secret: var("WEBHOOK_SECRET"),
            display_timezone,
            refresh_interval: Duration::from_secs(refresh_secs),
            upstream_timeout: Duration::from_millis(timeout_ms),
        })
    }

    /// URL the identity provider redirects back to after authorization.
    pub fn callback_url(&self) -> Url {
        self.public_base_url
            .join("callback")
            .unwrap_or_else(|_| self.public_base_url.clone())
    }

    /// Path prefix the application is served under, always ending in `/`.
    pub fn base_path(&self) -> &str {
        self.public_base_url.path()
    }

    /// URL the identity provider returns to after ending its session.
    pub fn post_logout_url(&self) -> Url {
        self.public_base_url.clone()
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidUrl { name: &'static str, value: String },
    InvalidTimezone(String),
    InvalidNumber { name: &'static str, value: String },
    MissingSetting(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidUrl { name, value } => write!(f, "{name} is not a valid URL (got {value})"),
            Self::InvalidTimezone(value) => {
                write!(f, "DASHBOARD_TIMEZONE is not a known IANA time zone (got {value})")
            }
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive integer (got {value})")
            }
            Self::MissingSetting(name) => {
                write!(f, "required setting {name} is not configured")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn var_or_alias(name: &str, alias: &str) -> Option<String> {
    var(name).or_else(|| var(alias))
}

/// Parses a URL and guarantees a trailing slash so relative joins stay
/// under the configured path.
fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    let normalized = if value.ends_with('/') {
        value.to_string()
    } else {
        format!("{value}/")
    };
    Url::parse(&normalized).map_err(|_| ConfigError::InvalidUrl {
        name,
        value: value.to_string(),
    })
}

fn parse_number(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let Some(value) = var(name) else {
        return Ok(default);
    };
    match value.parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::InvalidNumber { name, value }),
    }
}
