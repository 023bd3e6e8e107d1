use super::helpers::{self, Connected, channel_pair, connect, connect_with, next_event};
use crate::blob::BlobSettings;
use crate::error::session::SessionError;
use crate::host::HostEvent;
use crate::protocol::names::{EVALUATE, READ_USER_INPUT, SHOW_MESSAGE};
use crate::protocol::{Envelope, MessageKind};
use crate::session::dispatch::{InlineDispatchSink, ThreadDispatchSink};
use crate::session::{
    FaultReason, HostCallbacks, MessageAnswer, MessageButtons, Multiplexer, MultiplexerContext,
    NoopCallbacks, SessionState,
};

use std::collections::HashSet;
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};

async fn expect_request(connected: &mut Connected) -> Envelope {
    match next_event(&mut connected.events).await {
        HostEvent::Request(envelope) => envelope,
        other => panic!("expected a request, got {other:?}"),
    }
}

/// **VALUE**: Concurrent requests each get their own id and their own answer.
///
/// **BUG THIS CATCHES**: A shared counter read and incremented in two steps,
/// or a pending table keyed on something other than the request id, which
/// swaps results between concurrent callers.
#[tokio::test]
async fn given_concurrent_requests_when_host_answers_out_of_order_then_each_caller_gets_its_own_result()
 {
    // GIVEN: 32 requests sent from separate tasks
    let mut connected = connect();
    let mut callers = Vec::new();
    for n in 0..32u64 {
        let mux = connected.mux.clone();
        callers.push(tokio::spawn(async move {
            let pending = mux.send(EVALUATE, json!({ "n": n }), Vec::new()).unwrap();
            let id = pending.id();
            (n, id, pending.wait().await)
        }));
    }

    // WHEN: The host answers in reverse arrival order, echoing n
    let mut requests = Vec::new();
    for _ in 0..32 {
        requests.push(expect_request(&mut connected).await);
    }
    for request in requests.iter().rev() {
        connected
            .host
            .respond(request, json!({ "echo": request.payload["n"] }))
            .unwrap();
    }

    // THEN: Ids are unique and every caller sees its own n
    let mut ids = HashSet::new();
    for caller in callers {
        let (n, id, result) = caller.await.unwrap();
        assert!(ids.insert(id), "id {id} reused");
        let response = result.unwrap();
        assert_eq!(response.correlation_id, Some(id));
        assert_eq!(response.payload["echo"], n);
    }
    assert_eq!(connected.mux.pending_count(), 0);
}

/// **VALUE**: Cancelling sends exactly one Interrupt and the caller sees
/// `Cancelled`, even though the host answered normally.
#[tokio::test]
async fn given_pending_request_when_cancelled_twice_then_single_interrupt_and_cancelled_result() {
    // GIVEN: A pending request
    let mut connected = connect();
    let pending = connected.mux.send(EVALUATE, json!({}), Vec::new()).unwrap();
    let id = pending.id();
    let request = expect_request(&mut connected).await;

    // WHEN: Cancelling twice
    assert!(connected.mux.cancel(id));
    assert!(connected.mux.cancel(id));

    // THEN: The host sees one Interrupt naming the request
    match next_event(&mut connected.events).await {
        HostEvent::Interrupt { request_id } => assert_eq!(request_id, id),
        other => panic!("expected an interrupt, got {other:?}"),
    }

    // AND: The host's late answer resolves as Cancelled
    connected.host.respond(&request, json!({ "value": 1 })).unwrap();
    let result = pending.wait().await;
    assert!(matches!(result, Err(SessionError::Cancelled { request_id, .. }) if request_id == id));

    // AND: No second Interrupt was written
    assert!(connected.events.try_recv().is_err());
}

#[tokio::test]
async fn given_host_never_answers_when_cancelled_then_resolves_after_interrupt_timeout() {
    // GIVEN: A short interrupt timeout
    let mut connected = connect_with(
        Arc::new(NoopCallbacks),
        Arc::new(InlineDispatchSink),
        Duration::from_millis(50),
        BlobSettings::default(),
    );
    let pending = connected.mux.send(EVALUATE, json!({}), Vec::new()).unwrap();
    let id = pending.id();
    expect_request(&mut connected).await;

    // WHEN: Cancelling and never answering
    connected.mux.cancel(id);
    let result = tokio::time::timeout(helpers::RECV_TIMEOUT, pending.wait())
        .await
        .expect("cancel never resolved");

    // THEN: Cancelled, and the entry is gone
    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(connected.mux.pending_count(), 0);
}

#[tokio::test]
async fn given_completed_request_when_cancelled_then_returns_false() {
    let mut connected = connect();
    let pending = connected.mux.send(EVALUATE, json!({}), Vec::new()).unwrap();
    let id = pending.id();
    let request = expect_request(&mut connected).await;
    connected.host.respond(&request, json!(null)).unwrap();
    pending.wait().await.unwrap();

    assert!(!connected.mux.cancel(id));
}

#[tokio::test]
async fn given_response_for_unknown_id_when_received_then_discarded_and_session_unaffected() {
    // GIVEN: A connected session
    let mut connected = connect();

    // WHEN: The host answers a request that was never sent
    let phantom = Envelope::request(999, EVALUATE, Value::Null);
    connected.host.respond(&phantom, json!({ "stray": true })).unwrap();

    // THEN: A real request still completes normally
    let pending = connected.mux.send(EVALUATE, json!({}), Vec::new()).unwrap();
    let request = expect_request(&mut connected).await;
    connected.host.respond(&request, json!({ "ok": true })).unwrap();

    let response = pending.wait().await.unwrap();
    assert_eq!(response.payload["ok"], true);
    assert_eq!(connected.state.current(), SessionState::Running);
}

#[tokio::test]
async fn given_error_answer_when_waiting_then_remote_error_with_message() {
    let mut connected = connect();
    let pending = connected.mux.send(EVALUATE, json!({}), Vec::new()).unwrap();
    let request = expect_request(&mut connected).await;

    connected
        .host
        .respond_error(&request, "object 'x' not found")
        .unwrap();

    match pending.wait().await {
        Err(SessionError::Remote { message, name, .. }) => {
            assert_eq!(message, "object 'x' not found");
            assert_eq!(name, EVALUATE);
        }
        other => panic!("expected a remote error, got {other:?}"),
    }
    assert_eq!(connected.state.current(), SessionState::Running);
}

/// **VALUE**: Losing the channel fails in-flight work and poisons the session.
///
/// **WHY THIS MATTERS**: Callers awaiting a response must not hang when the
/// engine-host dies, and nothing may be written to a dead channel.
#[tokio::test]
async fn given_pending_request_when_host_closes_channel_then_terminated_and_faulted() {
    // GIVEN: A pending request
    let mut connected = connect();
    let pending = connected.mux.send(EVALUATE, json!({}), Vec::new()).unwrap();
    expect_request(&mut connected).await;

    // WHEN: The host closes its end
    connected.host.close();

    // THEN: The request fails with SessionTerminated
    let result = tokio::time::timeout(helpers::RECV_TIMEOUT, pending.wait())
        .await
        .expect("pending request never resolved");
    assert!(result.unwrap_err().is_terminated());

    // AND: The session is Faulted with a transport reason
    assert_eq!(connected.state.current(), SessionState::Faulted);
    assert!(matches!(
        connected.fault.get(),
        Some(FaultReason::Transport(_))
    ));

    // AND: Later sends fail synchronously
    let later = connected.mux.send(EVALUATE, json!({}), Vec::new());
    assert!(later.err().is_some_and(|e| e.is_terminated()));
}

#[tokio::test]
async fn given_garbage_frame_when_received_then_faulted_with_protocol_reason() {
    // GIVEN: A multiplexer whose peer is a raw channel
    let (front, mut raw) = channel_pair();
    let state = helpers::running_state();
    let fault = Arc::new(OnceLock::new());
    let mux = Multiplexer::start(
        front,
        MultiplexerContext {
            state: state.clone(),
            fault: fault.clone(),
            callbacks: Arc::new(NoopCallbacks),
            dispatch: Arc::new(InlineDispatchSink),
            interrupt_timeout: Duration::from_secs(1),
            blobs: BlobSettings::default(),
        },
    );
    let mut observed = state.subscribe();

    // WHEN: The peer sends a frame with an unknown tag
    raw.send(Bytes::from_static(&[0x7f])).await.unwrap();

    // THEN: The session faults with a protocol reason
    tokio::time::timeout(
        helpers::RECV_TIMEOUT,
        observed.wait_for(|s| *s == SessionState::Faulted),
    )
    .await
    .expect("session never faulted")
    .unwrap();
    assert!(matches!(fault.get(), Some(FaultReason::Protocol(_))));
    assert!(mux.is_closed());
}

#[tokio::test]
async fn given_closed_multiplexer_when_sending_then_terminated_without_writing() {
    let mut connected = connect();

    connected.mux.close();
    let result = connected.mux.send(EVALUATE, json!({}), Vec::new());

    assert!(result.err().is_some_and(|e| e.is_terminated()));
    let next = tokio::time::timeout(Duration::from_millis(100), connected.events.recv()).await;
    assert!(!matches!(next, Ok(Some(HostEvent::Request(_)))));
}

#[tokio::test]
async fn given_stopping_state_when_sending_then_terminated() {
    let connected = connect();
    connected
        .state
        .apply(crate::session::SessionEvent::StopHost)
        .unwrap();

    let result = connected.mux.send(EVALUATE, json!({}), Vec::new());

    assert!(result.err().is_some_and(|e| e.is_terminated()));
}

// ============================================
// CALLBACKS
// ============================================

struct ScriptedCallbacks {
    input: String,
    seen: Sender<String>,
}

impl HostCallbacks for ScriptedCallbacks {
    fn read_user_input(&self, prompt: &str, max_length: usize) -> String {
        let _ = self.seen.send(format!("{prompt}:{max_length}"));
        self.input.clone()
    }

    fn show_message(&self, _message: &str, _buttons: MessageButtons) -> MessageAnswer {
        MessageAnswer::No
    }

    fn plot(&self, _payload: &Value, blob_ids: &[u64]) {
        let _ = self.seen.send(format!("plot:{blob_ids:?}"));
    }

    fn notification(&self, name: &str, _payload: &Value) {
        let _ = self.seen.send(name.to_string());
    }
}

/// **VALUE**: Reverse requests are answered with a Response correlated to the
/// host's notification id.
#[tokio::test]
async fn given_read_user_input_when_host_calls_then_reply_carries_callback_answer() {
    // GIVEN: Callbacks that answer "yes"
    let (seen, seen_rx) = channel();
    let connected = connect_with(
        Arc::new(ScriptedCallbacks {
            input: "yes".to_string(),
            seen,
        }),
        Arc::new(InlineDispatchSink),
        Duration::from_secs(5),
        BlobSettings::default(),
    );

    // WHEN: The host asks for input
    let reply = tokio::time::timeout(
        helpers::RECV_TIMEOUT,
        connected
            .host
            .call(READ_USER_INPUT, json!({ "prompt": "Continue?", "maxLength": 8 })),
    )
    .await
    .expect("no reply")
    .unwrap();

    // THEN: The reply is a correlated Response with the input
    assert_eq!(reply.kind, MessageKind::Response);
    assert!(reply.correlation_id.is_some());
    assert_eq!(reply.payload["input"], "yes");
    assert_eq!(seen_rx.recv().unwrap(), "Continue?:8");
}

#[tokio::test]
async fn given_show_message_when_host_calls_then_reply_carries_answer() {
    let (seen, _seen_rx) = channel();
    let connected = connect_with(
        Arc::new(ScriptedCallbacks {
            input: String::new(),
            seen,
        }),
        Arc::new(InlineDispatchSink),
        Duration::from_secs(5),
        BlobSettings::default(),
    );

    let reply = tokio::time::timeout(
        helpers::RECV_TIMEOUT,
        connected.host.call(
            SHOW_MESSAGE,
            json!({ "message": "Save workspace?", "buttons": "YesNo" }),
        ),
    )
    .await
    .expect("no reply")
    .unwrap();

    assert_eq!(reply.payload["answer"], "No");
}

/// **VALUE**: Notifications reach the callbacks in wire order when run on a
/// dispatch thread.
///
/// **BUG THIS CATCHES**: Spawning one task per notification, which lets the
/// runtime reorder callbacks.
#[tokio::test]
async fn given_many_notifications_when_dispatched_on_thread_then_delivered_in_order() {
    // GIVEN: A dispatch thread and recording callbacks
    let (seen, seen_rx) = channel();
    let connected = connect_with(
        Arc::new(ScriptedCallbacks {
            input: String::new(),
            seen,
        }),
        Arc::new(ThreadDispatchSink::spawn("test-dispatch").unwrap()),
        Duration::from_secs(5),
        BlobSettings::default(),
    );

    // WHEN: The host raises 50 notifications
    for n in 0..50 {
        connected
            .host
            .notify(&format!("event-{n}"), Value::Null)
            .unwrap();
    }

    // THEN: They arrive in the same order
    let received: Vec<String> = tokio::task::spawn_blocking(move || {
        (0..50)
            .map(|_| seen_rx.recv_timeout(helpers::RECV_TIMEOUT).unwrap())
            .collect()
    })
    .await
    .unwrap();
    let expected: Vec<String> = (0..50).map(|n| format!("event-{n}")).collect();
    assert_eq!(received, expected);
}

/// **VALUE**: A blob sent before the notification that references it is
/// readable by the time the callback runs.
#[tokio::test]
async fn given_plot_with_blob_when_received_then_callback_sees_id_and_blob_is_readable() {
    // GIVEN: Recording callbacks
    let (seen, seen_rx) = channel();
    let connected = connect_with(
        Arc::new(ScriptedCallbacks {
            input: String::new(),
            seen,
        }),
        Arc::new(InlineDispatchSink),
        Duration::from_secs(5),
        BlobSettings {
            chunk_size: 1024,
            max_out_of_order: 4,
            ..BlobSettings::default()
        },
    );
    let image = vec![7u8; 5000];

    // WHEN: The host streams a blob and then references it
    let blob_id = connected.host.send_blob(image.as_slice()).await.unwrap();
    connected
        .host
        .notify_with_blobs("Plot", json!({ "format": "png" }), vec![blob_id])
        .unwrap();

    // THEN: The callback saw the blob id
    let note = tokio::task::spawn_blocking(move || seen_rx.recv_timeout(helpers::RECV_TIMEOUT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(note, format!("plot:[{blob_id}]"));

    // AND: The blob is complete
    let data = connected
        .mux
        .blobs()
        .receive(blob_id)
        .unwrap()
        .read_to_end()
        .await
        .unwrap();
    assert_eq!(data.as_ref(), image.as_slice());
}

#[tokio::test]
async fn given_interrupt_notification_when_host_receives_then_surfaces_request_id() {
    let mut connected = connect();

    connected
        .mux
        .notify("Interrupt", json!({ "requestId": 42 }))
        .unwrap();

    match next_event(&mut connected.events).await {
        HostEvent::Interrupt { request_id } => assert_eq!(request_id, 42),
        other => panic!("expected an interrupt, got {other:?}"),
    }
}

#[tokio::test]
async fn given_shutdown_notification_when_host_receives_then_shutdown_event() {
    let mut connected = connect();

    connected.mux.notify("Shutdown", Value::Null).unwrap();

    assert!(matches!(
        next_event(&mut connected.events).await,
        HostEvent::Shutdown
    ));
}

#[tokio::test]
async fn given_pending_request_when_multiplexer_faulted_explicitly_then_first_reason_kept() {
    let connected = connect();
    let pending = connected.mux.send(EVALUATE, json!({}), Vec::new()).unwrap();

    connected.mux.fault(FaultReason::HostExited(3));
    connected.mux.fault(FaultReason::Transport("later".into()));

    assert!(pending.wait().await.unwrap_err().is_terminated());
    assert_eq!(connected.fault.get(), Some(&FaultReason::HostExited(3)));
    assert_eq!(connected.state.current(), SessionState::Faulted);
}

#[tokio::test]
async fn given_cancellation_token_when_cancelled_then_wait_resolves_cancelled() {
    let mut connected = connect_with(
        Arc::new(NoopCallbacks),
        Arc::new(InlineDispatchSink),
        Duration::from_millis(50),
        BlobSettings::default(),
    );
    let pending = connected.mux.send(EVALUATE, json!({}), Vec::new()).unwrap();
    expect_request(&mut connected).await;
    let token = tokio_util::sync::CancellationToken::new();

    token.cancel();
    let result = pending.wait_with_cancellation(&token).await;

    assert!(result.unwrap_err().is_cancelled());
    assert!(matches!(
        next_event(&mut connected.events).await,
        HostEvent::Interrupt { .. }
    ));
}
