use crate::auth::{AuthToken, Authenticator, Credentials};
use crate::config::{AccountConfig, AuthConfig};
use crate::error::auth::AuthFailure;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info};

/// Authenticates against the accounts listed in the broker config.
///
/// Order of checks: unknown user or wrong secret, then expiry, then the
/// allowed-users policy.
pub struct AccountAuthenticator {
    accounts: HashMap<String, AccountConfig>,
    allowed_users: HashSet<String>,
}

impl AccountAuthenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let accounts = config
            .accounts
            .iter()
            .map(|account| (account.user.clone(), account.clone()))
            .collect();

        Self {
            accounts,
            allowed_users: config.allowed_users.iter().cloned().collect(),
        }
    }

    fn is_expired(account: &AccountConfig) -> bool {
        match account.expires_at {
            Some(secs) => UNIX_EPOCH + Duration::from_secs(secs) <= SystemTime::now(),
            None => false,
        }
    }
}

impl Authenticator for AccountAuthenticator {
    fn authenticate(&self, credentials: &Credentials) -> Result<AuthToken, AuthFailure> {
        let user = credentials.user.as_str();

        let Some(account) = self.accounts.get(user) else {
            debug!("Authentication failed: unknown user '{user}'");
            return Err(AuthFailure::invalid_credentials(user));
        };

        if !account.secret.matches(credentials.secret.expose()) {
            debug!("Authentication failed: wrong secret for '{user}'");
            return Err(AuthFailure::invalid_credentials(user));
        }

        if Self::is_expired(account) {
            debug!("Authentication failed: account '{user}' expired");
            return Err(AuthFailure::expired(user));
        }

        if !self.allowed_users.is_empty() && !self.allowed_users.contains(user) {
            return Err(AuthFailure::policy_denied(
                user,
                "user is not in the allowed users list",
            ));
        }

        info!("Authenticated '{user}'");
        Ok(AuthToken::issue(user))
    }
}
