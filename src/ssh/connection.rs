use crate::config::default_port;
use crate::error::{AppError, AppResult};
use serde::Deserialize;
use std::fmt;

/// Remote connection profile
///
/// Replaced as a whole, never persisted. Secrets are kept out of `Debug`.
#[derive(Clone, Deserialize)]
pub struct ConnectionProfile {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Private key material (PEM or OpenSSH format), not a path
    #[serde(default, alias = "privateKey")]
    pub private_key: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
}

/// Secret supplied when configuring a profile
#[derive(Clone)]
pub enum SecretMaterial {
    Password(String),
    PrivateKey {
        key: String,
        passphrase: Option<String>,
    },
}

/// The credential a connect attempt will actually use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential<'a> {
    Password(&'a str),
    PrivateKey {
        key: &'a str,
        passphrase: Option<&'a str>,
    },
}

impl ConnectionProfile {
    pub fn new(
        host: impl Into<String>,
        port: Option<u16>,
        username: impl Into<String>,
        secret: SecretMaterial,
    ) -> Self {
        let (password, private_key, passphrase) = match secret {
            SecretMaterial::Password(password) => (Some(password), None, None),
            SecretMaterial::PrivateKey { key, passphrase } => (None, Some(key), passphrase),
        };
        Self {
            host: host.into(),
            port: port.unwrap_or_else(default_port),
            username: username.into(),
            password,
            private_key,
            passphrase,
        }
    }

    /// Resolve which credential to authenticate with.
    ///
    /// Password wins when both are set; empty strings count as absent.
    pub fn credential(&self) -> AppResult<Credential<'_>> {
        if let Some(password) = present(&self.password) {
            return Ok(Credential::Password(password));
        }
        if let Some(key) = present(&self.private_key) {
            return Ok(Credential::PrivateKey {
                key,
                passphrase: present(&self.passphrase),
            });
        }
        Err(AppError::Connection(format!(
            "No password or private key configured for {}",
            self.target()
        )))
    }

    /// `user@host:port`, safe for logs
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("ConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("private_key", &redact(&self.private_key))
            .field("passphrase", &redact(&self.passphrase))
            .finish()
    }
}
