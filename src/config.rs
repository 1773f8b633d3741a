use std::{collections::HashMap, fmt, net::SocketAddr, str::FromStr, time::Duration};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use thiserror::Error;

pub const MIN_SECRET_LEN: usize = 32;
pub const MIN_TTL_MINUTES: i64 = 1;
pub const MAX_TTL_MINUTES: i64 = 24 * 60;

const DEFAULT_DATABASE_URL: &str = "sqlite://./dev.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("JWT_SECRET must be at least {min} characters (got {0})", min = MIN_SECRET_LEN)]
    SecretTooShort(usize),
    #[error("JWT_ALG {0:?} cannot sign with the shared JWT_SECRET; use HS256, HS384 or HS512")]
    Algorithm(String),
    #[error("{key} must be an integer (got {value:?})")]
    NotAnInteger { key: &'static str, value: String },
    #[error("ACCESS_TOKEN_EXPIRE_MINUTES must be within {lo}..={hi} (got {0})", lo = MIN_TTL_MINUTES, hi = MAX_TTL_MINUTES)]
    TtlOutOfRange(i64),
    #[error("DATABASE_URL {0:?} is neither a sqlite nor a postgres connection string")]
    UnsupportedDatabase(String),
    #[error("DATABASE_MAX_CONNECTIONS must be at least 1")]
    PoolSize,
    #[error("APP_HOST/APP_PORT do not form a socket address: {0}")]
    BindAddress(String),
}

/// Storage engine behind `DATABASE_URL`, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

impl DatabaseBackend {
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else {
            Err(ConfigError::UnsupportedDatabase(url.to_string()))
        }
    }

    /// Whether the backend has a binary JSON document column type.
    pub fn supports_native_json(self) -> bool {
        matches!(self, Self::Postgres)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub backend: DatabaseBackend,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Result<Self, ConfigError> {
        let url = url.into();
        let backend = DatabaseBackend::from_url(&url)?;
        Ok(Self {
            url,
            backend,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        })
    }
}

#[derive(Clone)]
pub struct JwtConfig {
    secret: String,
    pub algorithm: Algorithm,
    pub ttl_minutes: i64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("ttl_minutes", &self.ttl_minutes)
            .finish()
    }
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>, algorithm: &str, ttl_minutes: i64) -> Result<Self, ConfigError> {
        let secret = secret.into();
        let len = secret.chars().count();
        if len < MIN_SECRET_LEN {
            return Err(ConfigError::SecretTooShort(len));
        }
        let algorithm = match Algorithm::from_str(algorithm) {
            Ok(alg @ (Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)) => alg,
            _ => return Err(ConfigError::Algorithm(algorithm.to_string())),
        };
        if !(MIN_TTL_MINUTES..=MAX_TTL_MINUTES).contains(&ttl_minutes) {
            return Err(ConfigError::TtlOutOfRange(ttl_minutes));
        }
        Ok(Self {
            secret,
            algorithm,
            ttl_minutes,
        })
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes as u64 * 60)
    }

    pub fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(self.secret.as_bytes())
    }

    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(self.secret.as_bytes())
    }

    pub fn validation(&self) -> Validation {
        Validation::new(self.algorithm)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt: JwtConfig,
    pub database: DatabaseConfig,
    pub bind_addr: SocketAddr,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Builds the configuration from arbitrary key/value pairs. Keys this
    /// service does not know about are ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| vars.get(key).map(String::as_str);

        let secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let ttl_minutes = match get("ACCESS_TOKEN_EXPIRE_MINUTES") {
            Some(raw) => parse_int::<i64>("ACCESS_TOKEN_EXPIRE_MINUTES", raw)?,
            None => 60,
        };
        let jwt = JwtConfig::new(secret, get("JWT_ALG").unwrap_or("HS256"), ttl_minutes)?;

        let mut database = DatabaseConfig::new(get("DATABASE_URL").unwrap_or(DEFAULT_DATABASE_URL))?;
        if let Some(raw) = get("DATABASE_MAX_CONNECTIONS") {
            database.max_connections = parse_int::<u32>("DATABASE_MAX_CONNECTIONS", raw)?;
            if database.max_connections == 0 {
                return Err(ConfigError::PoolSize);
            }
        }

        let addr = format!(
            "{}:{}",
            get("APP_HOST").unwrap_or("0.0.0.0"),
            get("APP_PORT").unwrap_or("8080")
        );
        let bind_addr = addr
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::BindAddress(addr))?;

        Ok(Self {
            jwt,
            database,
            bind_addr,
        })
    }
}

fn parse_int<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::NotAnInteger {
        key,
        value: raw.to_string(),
    })
}
