use rhost_broker::shutdown::stop_all_sessions;

use broker_core::auth::{AccountAuthenticator, Credentials};
use broker_core::broker::{Broker, SessionOptions};
use broker_core::config::{AccountConfig, BrokerConfig};
use broker_core::locator::{ExecutableLocator, Platform};
use broker_core::session::InlineDispatchSink;

use common::RedactedSecret;

use std::sync::Arc;

use tempfile::TempDir;

fn broker(search_root: &std::path::Path) -> Arc<Broker> {
    let mut config = BrokerConfig::default();
    config.auth.accounts.push(AccountConfig {
        user: "alice".to_string(),
        secret: RedactedSecret::new("s3cret"),
        expires_at: None,
    });
    let authenticator = Arc::new(AccountAuthenticator::new(&config.auth));

    Broker::new(
        config,
        authenticator,
        ExecutableLocator::new(search_root, Platform::current()),
        Arc::new(InlineDispatchSink),
    )
}

#[tokio::test]
async fn given_no_sessions_when_stopping_all_then_nothing_stopped() {
    let dir = TempDir::new().unwrap();
    let broker = broker(dir.path());

    assert_eq!(stop_all_sessions(&broker).await, 0);
}

/// **VALUE**: Ctrl-C leaves no session behind.
#[tokio::test]
async fn given_created_sessions_when_stopping_all_then_each_stopped_and_removed() {
    // GIVEN: Two sessions that never started a host
    let dir = TempDir::new().unwrap();
    let broker = broker(dir.path());
    let credentials = Credentials::new("alice", "s3cret");
    broker
        .create_session(&credentials, Some("a"), SessionOptions::default())
        .unwrap();
    broker
        .create_session(&credentials, Some("b"), SessionOptions::default())
        .unwrap();

    // WHEN: Stopping everything
    let stopped = stop_all_sessions(&broker).await;

    // THEN: Both stopped and the table is empty
    assert_eq!(stopped, 2);
    assert!(broker.sessions().is_empty());
}
