//! evalq-hammer: drives evalq batches against a simulated script host.

pub mod args;
pub mod error;
pub mod logging;
pub mod run;

pub use args::{Options, Transport, USAGE, parse_args};
pub use error::HammerError;
