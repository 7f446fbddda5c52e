//! Core session logic

pub mod codec;
pub mod error;
pub mod events;
pub mod gate;
pub mod queue;
pub mod session;
pub mod types;
