//! Decides whether the credentials of a `CustomIssuer` are accepted by the authority it represents

use std::fmt::Debug;

use async_trait::async_trait;

use crate::utils::Unloggable;

/// Credentials presented by a `CustomIssuer`.
#[derive(Clone, Copy)]
pub struct Credentials<'a> {
    pub user: &'a str,
    pub password: &'a str,
}

impl Debug for Credentials<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &Unloggable(self.password))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid { reason: String },
}

impl Verdict {
    fn invalid(reason: impl Into<String>) -> Self {
        Verdict::Invalid {
            reason: reason.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }
}

/// This trait needs to be implemented by all authorities that an issuer can authenticate against.
///
/// Implementations must not have side effects beyond performing the check itself, since the
/// same credentials are validated again on every reconciliation.
#[async_trait]
pub trait CredentialValidator: Debug + Send + Sync {
    async fn validate(&self, credentials: Credentials<'_>) -> Verdict;
}

/// Accepts exactly one fixed user/password pair.
#[derive(Debug)]
pub struct StaticCredentialValidator {
    user: String,
    password: Unloggable<String>,
}

impl StaticCredentialValidator {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Unloggable(password.into()),
        }
    }
}

impl Default for StaticCredentialValidator {
    fn default() -> Self {
        Self::new("user", "password")
    }
}

#[async_trait]
impl CredentialValidator for StaticCredentialValidator {
    async fn validate(&self, credentials: Credentials<'_>) -> Verdict {
        if credentials.user.is_empty() {
            Verdict::invalid("no user specified")
        } else if credentials.password.is_empty() {
            Verdict::invalid("no password specified")
        } else if credentials.user != self.user {
            Verdict::invalid(format!("invalid user: {}", credentials.user))
        } else if credentials.password != self.password.as_str() {
            Verdict::invalid("failed to login")
        } else {
            Verdict::Valid
        }
    }
}
