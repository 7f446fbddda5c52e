//! Observer-facing message definitions

pub mod event;

pub use event::{DisconnectReason, OpKind, SessionEvent};
