use broker_core::broker::Broker;
use broker_core::session::SessionState;

use log::{info, warn};

/// Stop every session still in the broker's table. Returns how many
/// reached `Stopped`.
pub async fn stop_all_sessions(broker: &Broker) -> usize {
    let sessions = broker.sessions();
    if sessions.is_empty() {
        return 0;
    }

    info!("Stopping {} session(s)", sessions.len());

    let mut stopped = 0;
    for summary in sessions {
        match broker.stop_host(&summary.id).await {
            Ok(SessionState::Stopped) => stopped += 1,
            Ok(state) => warn!("Session {} ended {state}", summary.id),
            Err(e) => warn!("Failed to stop session {}: {e}", summary.id),
        }
    }
    stopped
}
