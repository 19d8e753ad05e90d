//! Push credential providers.
//!
//! The publish stage asks a [`CredentialProvider`] for a username/password
//! pair right before pushing, so where secrets live (config file, environment,
//! anything else implementing the trait) never leaks into pipeline logic.

use std::fmt;

use anyhow::{Context, Result};

/// Username/password pair for HTTP basic auth against the mirror remote.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Source of push credentials. `Ok(None)` means push without authentication.
pub trait CredentialProvider {
    fn credentials(&self) -> Result<Option<Credentials>>;
}

/// Fixed credentials (or none), typically from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    inner: Option<Credentials>,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            inner: Some(Credentials {
                username: username.into(),
                password: password.into(),
            }),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials(&self) -> Result<Option<Credentials>> {
        Ok(self.inner.clone())
    }
}

/// Credentials read from two environment variables on every request.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    username_var: String,
    password_var: String,
}

impl EnvCredentials {
    pub fn new(username_var: impl Into<String>, password_var: impl Into<String>) -> Self {
        Self {
            username_var: username_var.into(),
            password_var: password_var.into(),
        }
    }
}

impl CredentialProvider for EnvCredentials {
    fn credentials(&self) -> Result<Option<Credentials>> {
        let username = std::env::var(&self.username_var)
            .with_context(|| format!("read credential env var {}", self.username_var))?;
        let password = std::env::var(&self.password_var)
            .with_context(|| format!("read credential env var {}", self.password_var))?;
        Ok(Some(Credentials { username, password }))
    }
}
