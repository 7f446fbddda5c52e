//! GATT link trait definition

use tokio::sync::mpsc;
use trait_variant::make;
use uuid::Uuid;

use crate::config::GattLayout;
use crate::core::error::LinkResult;
use crate::core::types::DeviceAddress;

/// Abstraction over the central-side radio link to one peripheral
///
/// Implementations never multiplex requests themselves; the session
/// guarantees at most one call is in flight per link.
#[make(Send)]
pub trait GattLink: Send + Sync + 'static {
    /// Establish the link-layer connection to a peripheral
    async fn connect(&self, address: &DeviceAddress) -> LinkResult<()>;

    /// Enumerate services and resolve every characteristic of the layout
    ///
    /// Fails with `CharacteristicNotFound` if the device lacks one.
    async fn discover(&self, layout: &GattLayout) -> LinkResult<()>;

    /// Read a characteristic value
    async fn read(&self, characteristic: Uuid) -> LinkResult<Vec<u8>>;

    /// Write a characteristic value with response
    async fn write(&self, characteristic: Uuid, value: &[u8]) -> LinkResult<()>;

    /// Subscribe to value notifications of a characteristic
    async fn subscribe(&self, characteristic: Uuid) -> LinkResult<mpsc::UnboundedReceiver<Vec<u8>>>;

    /// Tear down the link; succeeds if already disconnected
    async fn disconnect(&self) -> LinkResult<()>;
}
