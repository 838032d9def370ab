//! Wire surface between the core and a script host.
//!
//! - **protocol**: call shapes, inbound messages, pipe frames
//! - **codec**: JSON framing codec for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
