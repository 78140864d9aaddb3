use std::fmt;

/// Username/password for one provider account.
///
/// The username doubles as the account's identity key for caching and
/// store naming.
#[derive(Clone)]
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

/// Source of credentials and of one-time codes when the provider challenges a login.
///
/// Unattended implementations must return immediately; a `None` code fails the
/// login instead of waiting for input.
pub trait CredentialSupplier: Send + Sync {
    fn credentials(&self) -> Credentials;

    /// `prompt` is the provider's description of where the code was sent.
    fn one_time_code(&self, prompt: &str) -> Option<String>;
}

/// Supplier backed by pre-configured values.
#[derive(Clone)]
pub struct ConfiguredCredentials {
    credentials: Credentials,
    one_time_code: Option<String>,
}

impl ConfiguredCredentials {
    pub fn new(username: String, password: String, one_time_code: Option<String>) -> Self {
        Self {
            credentials: Credentials { username, password },
            one_time_code: one_time_code.filter(|c| !c.trim().is_empty()),
        }
    }
}

impl CredentialSupplier for ConfiguredCredentials {
    fn credentials(&self) -> Credentials {
        self.credentials.clone()
    }

    fn one_time_code(&self, prompt: &str) -> Option<String> {
        tracing::debug!(prompt, configured = self.one_time_code.is_some(), "one-time code requested");
        self.one_time_code.clone()
    }
}
