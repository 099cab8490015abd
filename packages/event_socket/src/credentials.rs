use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Bearer token material issued by the auth backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub access_token: String,
    pub refresh_token: String,
}

/// Yields the current bearer token on demand.
///
/// Called once per authorization need and never cached by the socket, so a
/// rotated token takes effect on the next handshake.
pub trait CredentialSource: Send + Sync {
    fn current_token(&self) -> Option<String>;
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn current_token(&self) -> Option<String> {
        self()
    }
}

/// Anonymous access: never yields a token.
#[derive(Clone, Copy, Debug, Default)]
pub struct Anonymous;

impl CredentialSource for Anonymous {
    fn current_token(&self) -> Option<String> {
        None
    }
}

/// In-memory session holding the most recent [`AuthToken`].
///
/// Cheap to clone; clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct AuthSession {
    token: Arc<RwLock<Option<AuthToken>>>,
}

impl AuthSession {
    pub fn new(token: Option<AuthToken>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token)),
        }
    }

    pub fn token(&self) -> Option<AuthToken> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, token: AuthToken) {
        match self.token.write() {
            Ok(mut guard) => *guard = Some(token),
            Err(poisoned) => *poisoned.into_inner() = Some(token),
        }
    }

    pub fn clear(&self) {
        match self.token.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

impl CredentialSource for AuthSession {
    fn current_token(&self) -> Option<String> {
        self.token().map(|t| t.access_token)
    }
}
