//! Deferred operator secret prompt.
//!
//! Binding a prompt never asks anything. The operator is only prompted when
//! [`SecretPrompt::secret`] is called, which happens when the certificate
//! provider is exercised by the transport.

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::tsh::types::Identity;

/// Source of the secret exchanged with the proxy for a certificate.
#[async_trait]
pub trait SecretPrompt: Send + Sync {
    /// Obtain the secret. May block on operator input.
    async fn secret(&self) -> Result<Zeroizing<String>, String>;
}

/// Reads a password from the controlling terminal without echo.
pub struct ConsolePrompt {
    identity: Identity,
}

impl ConsolePrompt {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    fn message(&self) -> String {
        format!("Enter password for {}: ", self.identity)
    }
}

/// Bind a console password prompt for `identity`.
pub fn password_from_console(identity: &Identity) -> ConsolePrompt {
    ConsolePrompt::new(identity.clone())
}

#[async_trait]
impl SecretPrompt for ConsolePrompt {
    async fn secret(&self) -> Result<Zeroizing<String>, String> {
        let message = self.message();
        tokio::task::spawn_blocking(move || rpassword::prompt_password(message))
            .await
            .map_err(|e| format!("password prompt task failed: {}", e))?
            .map(Zeroizing::new)
            .map_err(|e| format!("failed to read password: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_message_names_identity() {
        let prompt = password_from_console(&Identity::new("alice"));
        assert_eq!(prompt.message(), "Enter password for alice: ");
    }

    #[test]
    fn test_console_prompt_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ConsolePrompt>();
    }
}
