/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Credentials presented to the gateway in Identify and Resume.
///
/// The token is only exposed while an outbound frame is being serialized; the
/// [`std::fmt::Debug`] output redacts it.
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials {
    pub(crate) token: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new<T: Into<String>>(token: T) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }

    /// Read the token from the [`crate::TOKEN_VAR`] environment variable.
    pub fn from_env() -> crate::Result<Self> {
        let token = std::env::var(crate::TOKEN_VAR).map_err(|e| {
            crate::error::Error::validation(format!("{} is not usable: {e}", crate::TOKEN_VAR))
        })?;

        if token.trim().is_empty() {
            return Err(crate::error::Error::validation(format!(
                "{} is empty",
                crate::TOKEN_VAR
            )));
        }

        Ok(Self::new(token))
    }

    /// Returns the token.
    #[must_use]
    pub fn token(&self) -> &SecretString {
        &self.token
    }
}
