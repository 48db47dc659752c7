use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

const KEY_HOSTNAME: &str = "hostname";
const KEY_PORT: &str = "port";
const KEY_DATABASE: &str = "database";
const KEY_USERNAME: &str = "username";
const KEY_PASSWORD: &str = "password";
const KEY_CONNECTION_TIMEOUT: &str = "connectionTimeout";
const KEY_MIN_POOL_SIZE: &str = "minPoolSize";
const KEY_MAX_POOL_SIZE: &str = "maxPoolSize";
const KEY_POOLING: &str = "pooling";
const KEY_IDLE_TIMEOUT: &str = "idleTimeout";
const KEY_ENCRYPT: &str = "encrypt";
const KEY_TRUST_SERVER_CERTIFICATE: &str = "trustServerCertificate";
const KEY_INTEGRATED_SECURITY: &str = "integratedSecurity";

const REDACTED_PASSWORD: &str = "********";

/// Connection configuration shared by every dialect binding.
///
/// Dialect-specific keys pass through `extra` unchanged, so a connection
/// string survives a parse/emit round trip without semantic loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub port: Option<u16>,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connection_timeout: Option<Duration>,
    pub min_pool_size: Option<u32>,
    pub max_pool_size: Option<u32>,
    pub pooling: bool,
    pub idle_timeout: Option<Duration>,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    pub integrated_security: bool,
    pub extra: BTreeMap<String, String>,
}

impl ConnectionConfig {
    #[must_use]
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Parses a `key=value;...` connection string. Keys are matched
    /// case-insensitively; unrecognised keys are preserved in `extra`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut builder = ConnectionConfigBuilder::default();

        for fragment in raw.split(';') {
            let fragment = fragment.trim();
            if fragment.is_empty() {
                continue;
            }
            let Some((key, value)) = fragment.split_once('=') else {
                return Err(ConfigError::MalformedPair {
                    fragment: fragment.to_string(),
                });
            };
            builder.apply(key.trim(), value.trim())?;
        }

        builder.build()
    }

    /// Emits the canonical connection string: known keys in declaration
    /// order with defaults omitted, then extras in sorted order.
    #[must_use]
    pub fn to_connection_string(&self) -> String {
        let mut pairs = Vec::new();
        pairs.push(format!("{KEY_HOSTNAME}={}", self.hostname));
        if let Some(port) = self.port {
            pairs.push(format!("{KEY_PORT}={port}"));
        }
        pairs.push(format!("{KEY_DATABASE}={}", self.database));
        if let Some(username) = &self.username {
            pairs.push(format!("{KEY_USERNAME}={username}"));
        }
        if let Some(password) = &self.password {
            pairs.push(format!("{KEY_PASSWORD}={password}"));
        }
        if let Some(timeout) = self.connection_timeout {
            pairs.push(format!("{KEY_CONNECTION_TIMEOUT}={}", timeout.as_secs()));
        }
        if let Some(min) = self.min_pool_size {
            pairs.push(format!("{KEY_MIN_POOL_SIZE}={min}"));
        }
        if let Some(max) = self.max_pool_size {
            pairs.push(format!("{KEY_MAX_POOL_SIZE}={max}"));
        }
        if !self.pooling {
            pairs.push(format!("{KEY_POOLING}=false"));
        }
        if let Some(timeout) = self.idle_timeout {
            pairs.push(format!("{KEY_IDLE_TIMEOUT}={}", timeout.as_secs()));
        }
        if self.encrypt {
            pairs.push(format!("{KEY_ENCRYPT}=true"));
        }
        if self.trust_server_certificate {
            pairs.push(format!("{KEY_TRUST_SERVER_CERTIFICATE}=true"));
        }
        if self.integrated_security {
            pairs.push(format!("{KEY_INTEGRATED_SECURITY}=true"));
        }
        for (key, value) in &self.extra {
            pairs.push(format!("{key}={value}"));
        }

        pairs.join(";")
    }
}

impl fmt::Display for ConnectionConfig {
    /// Like [`ConnectionConfig::to_connection_string`] with the password
    /// redacted; safe for logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut redacted = self.clone();
        if redacted.password.is_some() {
            redacted.password = Some(REDACTED_PASSWORD.to_string());
        }
        f.write_str(&redacted.to_connection_string())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConnectionConfigBuilder {
    hostname: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    connection_timeout: Option<Duration>,
    min_pool_size: Option<u32>,
    max_pool_size: Option<u32>,
    pooling: Option<bool>,
    idle_timeout: Option<Duration>,
    encrypt: bool,
    trust_server_certificate: bool,
    integrated_security: bool,
    extra: BTreeMap<String, String>,
}

impl ConnectionConfigBuilder {
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn pool_bounds(mut self, min: u32, max: u32) -> Self {
        self.min_pool_size = Some(min);
        self.max_pool_size = Some(max);
        self
    }

    #[must_use]
    pub fn pooling(mut self, enabled: bool) -> Self {
        self.pooling = Some(enabled);
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn encrypt(mut self, enabled: bool) -> Self {
        self.encrypt = enabled;
        self
    }

    #[must_use]
    pub fn trust_server_certificate(mut self, enabled: bool) -> Self {
        self.trust_server_certificate = enabled;
        self
    }

    #[must_use]
    pub fn integrated_security(mut self, enabled: bool) -> Self {
        self.integrated_security = enabled;
        self
    }

    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<ConnectionConfig, ConfigError> {
        let hostname = self
            .hostname
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingKey { key: KEY_HOSTNAME })?;
        let database = self
            .database
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingKey { key: KEY_DATABASE })?;

        Ok(ConnectionConfig {
            hostname,
            port: self.port,
            database,
            username: self.username,
            password: self.password,
            connection_timeout: self.connection_timeout,
            min_pool_size: self.min_pool_size,
            max_pool_size: self.max_pool_size,
            pooling: self.pooling.unwrap_or(true),
            idle_timeout: self.idle_timeout,
            encrypt: self.encrypt,
            trust_server_certificate: self.trust_server_certificate,
            integrated_security: self.integrated_security,
            extra: self.extra,
        })
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if key.eq_ignore_ascii_case(KEY_HOSTNAME) {
            self.hostname = Some(value.to_string());
        } else if key.eq_ignore_ascii_case(KEY_PORT) {
            self.port = Some(parse_number::<u16>(key, value)?);
        } else if key.eq_ignore_ascii_case(KEY_DATABASE) {
            self.database = Some(value.to_string());
        } else if key.eq_ignore_ascii_case(KEY_USERNAME) {
            self.username = Some(value.to_string());
        } else if key.eq_ignore_ascii_case(KEY_PASSWORD) {
            self.password = Some(value.to_string());
        } else if key.eq_ignore_ascii_case(KEY_CONNECTION_TIMEOUT) {
            self.connection_timeout = Some(Duration::from_secs(parse_number(key, value)?));
        } else if key.eq_ignore_ascii_case(KEY_MIN_POOL_SIZE) {
            self.min_pool_size = Some(parse_number(key, value)?);
        } else if key.eq_ignore_ascii_case(KEY_MAX_POOL_SIZE) {
            self.max_pool_size = Some(parse_number(key, value)?);
        } else if key.eq_ignore_ascii_case(KEY_POOLING) {
            self.pooling = Some(parse_bool(key, value)?);
        } else if key.eq_ignore_ascii_case(KEY_IDLE_TIMEOUT) {
            self.idle_timeout = Some(Duration::from_secs(parse_number(key, value)?));
        } else if key.eq_ignore_ascii_case(KEY_ENCRYPT) {
            self.encrypt = parse_bool(key, value)?;
        } else if key.eq_ignore_ascii_case(KEY_TRUST_SERVER_CERTIFICATE) {
            self.trust_server_certificate = parse_bool(key, value)?;
        } else if key.eq_ignore_ascii_case(KEY_INTEGRATED_SECURITY) {
            self.integrated_security = parse_bool(key, value)?;
        } else {
            self.extra.insert(key.to_string(), value.to_string());
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: "expected a non-negative integer".to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    if value.eq_ignore_ascii_case("true") || value == "1" {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") || value == "0" {
        Ok(false)
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        })
    }
}
