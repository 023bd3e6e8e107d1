use crate::auth::AuthToken;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use log::trace;
use uuid::Uuid;

/// Tokens from successful authentications, one per user, valid for
/// `lifetime` after issue.
pub struct AuthCache {
    lifetime: Duration,
    tokens: Mutex<HashMap<String, AuthToken>>,
}

impl AuthCache {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    fn is_live(&self, token: &AuthToken) -> bool {
        match token.issued_at.elapsed() {
            Ok(age) => age < self.lifetime,
            // Issued "in the future" after a clock step back.
            Err(_) => true,
        }
    }

    /// Keep `token` unless a live one already exists for the user; returns
    /// the token now cached. Expired tokens of every user are dropped first.
    pub fn store(&self, token: AuthToken) -> AuthToken {
        let Ok(mut tokens) = self.tokens.lock() else {
            return token;
        };

        let before = tokens.len();
        tokens.retain(|_, t| self.is_live(t));
        if tokens.len() < before {
            trace!("Purged {} expired tokens", before - tokens.len());
        }

        if let Some(existing) = tokens.get(&token.user) {
            trace!("Reusing cached token for '{}'", token.user);
            return existing.clone();
        }

        tokens.insert(token.user.clone(), token.clone());
        token
    }

    /// Resolve a bearer token id to its live token.
    pub fn find(&self, id: &Uuid) -> Option<AuthToken> {
        let tokens = self.tokens.lock().ok()?;
        tokens
            .values()
            .find(|t| &t.id == id)
            .filter(|t| self.is_live(t))
            .cloned()
    }

    #[cfg(test)]
    pub(crate) fn cached_len(&self) -> usize {
        self.tokens.lock().map(|t| t.len()).unwrap_or(0)
    }
}
