//! Beacon Configuration Client
//!
//! Connects to a password-protected iBeacon over Bluetooth Low Energy,
//! reads its advertising parameters and writes new ones through a
//! serialized GATT session.

pub mod backend;
pub mod config;
pub mod core;
pub mod protocol;

pub use crate::core::{
    error::{LinkError, SessionError},
    session::{BeaconSession, SessionSettings},
    types::{BeaconAttributes, BeaconChanges, BeaconField, FieldValue, SessionState},
};
pub use protocol::SessionEvent;
