//! GATT link abstraction layer

pub mod bluer_backend;
pub mod gatt_link;
pub mod mock_backend;

pub use bluer_backend::BluerLink;
pub use gatt_link::GattLink;

#[cfg(test)]
pub use mock_backend::MockGattLink;
