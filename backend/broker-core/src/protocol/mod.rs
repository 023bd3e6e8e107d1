//! Wire model shared by both ends of a session channel.
//!
//! A channel carries opaque frames (see [`crate::transport`]). Each frame is
//! either a JSON [`Envelope`] or a binary [`BlobChunk`], distinguished by a
//! one-byte tag so that blob data never has to be JSON-escaped.

pub mod envelope;
pub mod frame;
pub mod names;

pub use envelope::{Envelope, MessageKind};
pub use frame::{BlobChunk, Frame};
