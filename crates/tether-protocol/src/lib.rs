//! Wire protocol shared by the Tether host and worker.
//!
//! Messages travel as newline-delimited UTF-8 JSON. This crate defines the
//! three message shapes and their classification, the closed method sets,
//! request id generation, and the incremental [`LineFramer`] that turns a
//! chunked byte stream back into messages.

mod error;
mod framer;
mod ids;
mod message;
mod method;

pub use error::ProtocolError;
pub use framer::{Frame, FramedReader, Frames, LineFramer, encode};
pub use ids::RequestIdGenerator;
pub use message::{Message, Notification, Request, Response, encode_line, timestamp_millis};
pub use method::{NotificationMethod, RequestMethod};

#[cfg(test)]
mod tests;
