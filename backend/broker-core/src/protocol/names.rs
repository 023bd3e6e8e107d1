//! Message names with protocol-level meaning.

/// Request evaluating an expression in the engine.
pub const EVALUATE: &str = "evaluate";

/// Notification asking the host to interrupt an in-flight request.
/// Payload: `{ "requestId": <id> }`.
pub const INTERRUPT: &str = "Interrupt";

/// Notification asking the host to exit cleanly.
pub const SHUTDOWN: &str = "Shutdown";

pub const PLOT: &str = "Plot";
pub const LOCATOR: &str = "Locator";
pub const READ_USER_INPUT: &str = "ReadUserInput";
pub const VIEW_OBJECT: &str = "ViewObject";
pub const SHOW_MESSAGE: &str = "ShowMessage";
pub const SHOW_HELP: &str = "ShowHelp";

/// Payload key carrying the interrupted request id.
pub const INTERRUPT_REQUEST_ID: &str = "requestId";
