use crate::auth::{AccountAuthenticator, AuthCache, AuthToken, Authenticator, Credentials};
use crate::config::{AccountConfig, AuthConfig};
use crate::error::auth::AuthFailure;

use common::RedactedSecret;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn account(user: &str, secret: &str, expires_at: Option<u64>) -> AccountConfig {
    AccountConfig {
        user: user.to_string(),
        secret: RedactedSecret::new(secret),
        expires_at,
    }
}

fn authenticator(allowed: &[&str]) -> AccountAuthenticator {
    let past = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
        - 60;

    AccountAuthenticator::new(&AuthConfig {
        accounts: vec![
            account("alice", "s3cret", None),
            account("bob", "hunter2", None),
            account("carol", "gone", Some(past)),
        ],
        allowed_users: allowed.iter().map(|u| u.to_string()).collect(),
        token_lifetime_secs: 3600,
    })
}

#[test]
fn given_valid_credentials_when_authenticating_then_token_for_user() {
    let auth = authenticator(&[]);

    let token = auth
        .authenticate(&Credentials::new("alice", "s3cret"))
        .unwrap();

    assert_eq!(token.user, "alice");
}

#[test]
fn given_wrong_secret_when_authenticating_then_invalid_credentials() {
    let auth = authenticator(&[]);

    let failure = auth
        .authenticate(&Credentials::new("alice", "nope"))
        .unwrap_err();

    assert_eq!(failure.reason(), "invalid_credentials");
    assert_eq!(failure.status_code().0, 401);
}

#[test]
fn given_unknown_user_when_authenticating_then_invalid_credentials() {
    let auth = authenticator(&[]);

    let failure = auth
        .authenticate(&Credentials::new("mallory", "s3cret"))
        .unwrap_err();

    assert!(matches!(failure, AuthFailure::InvalidCredentials { .. }));
}

#[test]
fn given_expired_account_when_authenticating_then_expired() {
    let auth = authenticator(&[]);

    let failure = auth
        .authenticate(&Credentials::new("carol", "gone"))
        .unwrap_err();

    assert!(matches!(failure, AuthFailure::Expired { .. }));
}

/// **VALUE**: The allowed-users list denies valid accounts it does not name.
///
/// **WHY THIS MATTERS**: Policy denial must be distinguishable (403) from bad
/// credentials (401) so the front end can tell the user what happened.
#[test]
fn given_allowed_users_list_when_other_account_authenticates_then_policy_denied() {
    // GIVEN: Only alice is allowed
    let auth = authenticator(&["alice"]);

    // WHEN: bob authenticates with a correct secret
    let failure = auth
        .authenticate(&Credentials::new("bob", "hunter2"))
        .unwrap_err();

    // THEN: Policy denied, 403
    assert_eq!(failure.reason(), "policy_denied");
    assert_eq!(failure.status_code().0, 403);
    assert!(auth.authenticate(&Credentials::new("alice", "s3cret")).is_ok());
}

#[test]
fn given_credentials_when_debug_printed_then_secret_not_shown() {
    let credentials = Credentials::new("alice", "s3cret");

    let printed = format!("{credentials:?}");

    assert!(printed.contains("alice"));
    assert!(!printed.contains("s3cret"));
}

#[test]
fn given_credentials_when_basic_header_round_tripped_then_user_and_secret_preserved() {
    let credentials = Credentials::new("alice", "pa:ss");

    let header = credentials.to_basic_header();
    let parsed = Credentials::from_basic_header(&header).unwrap();

    assert!(header.starts_with("Basic "));
    assert_eq!(parsed.user, "alice");
    assert_eq!(parsed.secret.expose(), "pa:ss");
}

#[test]
fn given_malformed_basic_header_when_parsed_then_none() {
    assert!(Credentials::from_basic_header("Basic !!!").is_none());
    assert!(Credentials::from_basic_header("Bearer abc").is_none());
    // ":secret" has no user.
    assert!(Credentials::from_basic_header("Basic OnNlY3JldA==").is_none());
}

#[test]
fn given_token_when_bearer_header_parsed_then_same_id() {
    let token = AuthToken::issue("alice");

    let id = AuthToken::parse_bearer_header(&token.to_bearer_header());

    assert_eq!(id, Some(token.id));
    assert_eq!(AuthToken::parse_bearer_header("Bearer not-a-uuid"), None);
}

// ============================================
// CACHE
// ============================================

#[test]
fn given_live_token_when_storing_another_for_same_user_then_existing_reused() {
    let cache = AuthCache::new(Duration::from_secs(60));
    let first = cache.store(AuthToken::issue("alice"));

    let second = cache.store(AuthToken::issue("alice"));

    assert_eq!(first.id, second.id);
    assert_eq!(cache.find(&first.id), Some(first));
}

#[test]
fn given_expired_token_when_looked_up_then_none_and_replaced_on_store() {
    // GIVEN: A zero lifetime, so every token is already stale
    let cache = AuthCache::new(Duration::ZERO);
    let first = cache.store(AuthToken::issue("alice"));

    // THEN: Lookups miss
    assert_eq!(cache.find(&first.id), None);

    // AND: A new store replaces it
    let second = cache.store(AuthToken::issue("alice"));
    assert_ne!(first.id, second.id);
}

/// **VALUE**: Tokens of users who never log in again do not pile up.
///
/// **BUG THIS CATCHES**: Expired entries were only replaced when the same
/// user authenticated again, so one-off users stayed cached forever.
#[test]
fn given_expired_tokens_of_other_users_when_storing_then_they_are_dropped() {
    // GIVEN: Stale tokens for alice and bob
    let cache = AuthCache::new(Duration::ZERO);
    cache.store(AuthToken::issue("alice"));
    cache.store(AuthToken::issue("bob"));

    // WHEN: carol authenticates
    let carol = cache.store(AuthToken::issue("carol"));

    // THEN: Only carol's entry remains
    assert_eq!(cache.cached_len(), 1);
    assert_eq!(carol.user, "carol");
}

#[test]
fn given_live_tokens_when_another_user_stores_then_all_kept() {
    let cache = AuthCache::new(Duration::from_secs(60));
    let alice = cache.store(AuthToken::issue("alice"));

    cache.store(AuthToken::issue("bob"));

    assert_eq!(cache.cached_len(), 2);
    assert_eq!(cache.find(&alice.id), Some(alice));
}
