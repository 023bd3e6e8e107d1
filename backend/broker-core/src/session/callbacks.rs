//! Front-end callbacks raised by the engine-host.
//!
//! The multiplexer decodes the host's notifications and calls these methods
//! on the session's [`DispatchSink`](crate::session::dispatch::DispatchSink).
//! Methods that return a value answer a reverse request: the value is sent
//! back as a `Response` correlated to the notification id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MessageButtons {
    #[default]
    Ok,
    OkCancel,
    YesNo,
    YesNoCancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageAnswer {
    Ok,
    Cancel,
    Yes,
    No,
}

impl MessageButtons {
    /// Answer used when no front end is attached to ask.
    pub fn default_answer(self) -> MessageAnswer {
        match self {
            MessageButtons::Ok | MessageButtons::OkCancel => MessageAnswer::Ok,
            MessageButtons::YesNo | MessageButtons::YesNoCancel => MessageAnswer::Yes,
        }
    }
}

/// A click on the plot surface. `clicked == false` means the user ended
/// locator mode.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LocatorResult {
    pub clicked: bool,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReadUserInputArgs {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub max_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ShowMessageArgs {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub buttons: MessageButtons,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ShowHelpArgs {
    pub url: String,
}

pub trait HostCallbacks: Send + Sync {
    fn plot(&self, _payload: &Value, _blob_ids: &[u64]) {}

    fn view_object(&self, _payload: &Value) {}

    fn show_help(&self, _url: &str) {}

    fn read_user_input(&self, _prompt: &str, _max_length: usize) -> String {
        String::new()
    }

    fn locator(&self) -> LocatorResult {
        LocatorResult::default()
    }

    fn show_message(&self, _message: &str, buttons: MessageButtons) -> MessageAnswer {
        buttons.default_answer()
    }

    /// Any notification without a dedicated method.
    fn notification(&self, _name: &str, _payload: &Value) {}
}

/// Callbacks that take every default.
#[derive(Debug, Default)]
pub struct NoopCallbacks;

impl HostCallbacks for NoopCallbacks {}
