//! Sessions: lifecycle, request multiplexing and host callbacks.

pub mod callbacks;
pub mod dispatch;
pub mod engine_session;
pub mod multiplexer;
pub mod state;

pub use callbacks::{HostCallbacks, LocatorResult, MessageAnswer, MessageButtons, NoopCallbacks};
pub use dispatch::{ChannelDispatchSink, DispatchJob, DispatchSink, InlineDispatchSink, ThreadDispatchSink};
pub use engine_session::{Session, SessionHandle, SessionSettings};
pub use multiplexer::{Multiplexer, MultiplexerContext, PendingResponse};
pub use state::{SessionEvent, SessionState, SessionStateMachine};

use std::fmt::{Display, Formatter, Result as FormatResult};

/// What ended a session abnormally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultReason {
    /// Read/write failure, or the peer closed the channel.
    Transport(String),
    /// A frame failed to decode.
    Protocol(String),
    /// The supervised engine-host exited.
    HostExited(i32),
}

impl Display for FaultReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            FaultReason::Transport(message) => write!(f, "transport fault: {message}"),
            FaultReason::Protocol(message) => write!(f, "protocol error: {message}"),
            FaultReason::HostExited(code) => write!(f, "engine-host exited with code {code}"),
        }
    }
}
