//! Mock GATT link for testing

use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::backend::GattLink;
use crate::config::GattLayout;
use crate::core::error::{LinkError, LinkResult};
use crate::core::types::DeviceAddress;

/// Internal state for the mock link
#[derive(Debug)]
struct MockState {
    layout: GattLayout,
    values: HashMap<Uuid, Vec<u8>>,
    password: Vec<u8>,
    answer_password: bool,
    connected: bool,
    connect_failure: Option<LinkError>,
    missing_characteristic: Option<Uuid>,
    next_op_failure: Option<LinkError>,
    connect_delay: Duration,
    op_delay: Duration,
    writes: Vec<(Uuid, Vec<u8>)>,
    reads: Vec<Uuid>,
    subscribers: HashMap<Uuid, mpsc::UnboundedSender<Vec<u8>>>,
    disconnects: usize,
}

/// Mock GATT link emulating a password-protected beacon
///
/// Answers password writes with a notification on the result
/// characteristic, the way the real device does.
#[derive(Debug, Clone)]
pub struct MockGattLink {
    inner: Arc<Mutex<MockState>>,
}

impl MockGattLink {
    /// Create a mock beacon with the default layout and password "123456"
    pub fn new() -> Self {
        let layout = GattLayout::default();
        let mut values = HashMap::new();
        values.insert(
            layout.uuid,
            vec![
                0xb9, 0x40, 0x7f, 0x30, 0xf5, 0xf8, 0x46, 0x6e, 0xaf, 0xf9, 0x25, 0x55, 0x6b, 0x57,
                0xfe, 0x6d,
            ],
        );
        values.insert(layout.major, 1234u16.to_be_bytes().to_vec());
        values.insert(layout.minor, 5678u16.to_be_bytes().to_vec());
        values.insert(layout.period, 500u16.to_be_bytes().to_vec());
        values.insert(layout.tx_power, vec![2]);
        values.insert(layout.name, b"Beacon\0\0".to_vec());

        Self {
            inner: Arc::new(Mutex::new(MockState {
                layout,
                values,
                password: b"123456".to_vec(),
                answer_password: true,
                connected: false,
                connect_failure: None,
                missing_characteristic: None,
                next_op_failure: None,
                connect_delay: Duration::ZERO,
                op_delay: Duration::ZERO,
                writes: vec![],
                reads: vec![],
                subscribers: HashMap::new(),
                disconnects: 0,
            })),
        }
    }

    /// Configure the raw value served for a characteristic
    pub async fn set_value(&self, characteristic: Uuid, value: Vec<u8>) {
        self.inner.lock().await.values.insert(characteristic, value);
    }

    /// Configure the password the device accepts
    pub async fn set_password(&self, password: &str) {
        self.inner.lock().await.password = password.as_bytes().to_vec();
    }

    /// Stop answering password submissions
    pub async fn set_password_silent(&self, silent: bool) {
        self.inner.lock().await.answer_password = !silent;
    }

    /// Configure mock to fail connect attempts
    pub async fn set_connect_failure(&self, error: Option<LinkError>) {
        self.inner.lock().await.connect_failure = error;
    }

    /// Configure a characteristic that discovery will not find
    pub async fn set_missing_characteristic(&self, characteristic: Option<Uuid>) {
        self.inner.lock().await.missing_characteristic = characteristic;
    }

    /// Fail the next read or write with the given error
    pub async fn fail_next_operation(&self, error: LinkError) {
        self.inner.lock().await.next_op_failure = Some(error);
    }

    pub async fn set_connect_delay(&self, delay: Duration) {
        self.inner.lock().await.connect_delay = delay;
    }

    /// Delay applied to every read and write
    pub async fn set_operation_delay(&self, delay: Duration) {
        self.inner.lock().await.op_delay = delay;
    }

    /// Characteristic writes in the order they reached the device
    pub async fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.inner.lock().await.writes.clone()
    }

    /// Characteristic reads in the order they reached the device
    pub async fn reads(&self) -> Vec<Uuid> {
        self.inner.lock().await.reads.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    pub async fn disconnect_count(&self) -> usize {
        self.inner.lock().await.disconnects
    }

    /// Simulate the peripheral dropping the link
    pub async fn drop_link(&self) {
        let mut state = self.inner.lock().await;
        state.connected = false;
        state.subscribers.clear();
    }

    async fn begin_operation(&self) -> LinkResult<()> {
        let delay = {
            let mut state = self.inner.lock().await;
            if !state.connected {
                return Err(LinkError::NotConnected);
            }
            if let Some(error) = state.next_op_failure.take() {
                return Err(error);
            }
            state.op_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

impl Default for MockGattLink {
    fn default() -> Self {
        Self::new()
    }
}

impl GattLink for MockGattLink {
    async fn connect(&self, _address: &DeviceAddress) -> LinkResult<()> {
        let delay = self.inner.lock().await.connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.lock().await;
        if let Some(error) = state.connect_failure.clone() {
            return Err(error);
        }
        state.connected = true;
        Ok(())
    }

    async fn discover(&self, layout: &GattLayout) -> LinkResult<()> {
        let mut state = self.inner.lock().await;
        if !state.connected {
            return Err(LinkError::NotConnected);
        }
        if let Some(missing) = state.missing_characteristic {
            if layout.characteristics().contains(&missing) {
                return Err(LinkError::CharacteristicNotFound(missing));
            }
        }
        state.layout = layout.clone();
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> LinkResult<Vec<u8>> {
        self.begin_operation().await?;

        let mut state = self.inner.lock().await;
        if !state.connected {
            return Err(LinkError::NotConnected);
        }
        state.reads.push(characteristic);
        state
            .values
            .get(&characteristic)
            .cloned()
            .ok_or(LinkError::CharacteristicNotFound(characteristic))
    }

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> LinkResult<()> {
        self.begin_operation().await?;

        let mut state = self.inner.lock().await;
        if !state.connected {
            return Err(LinkError::NotConnected);
        }
        state.writes.push((characteristic, value.to_vec()));

        if characteristic == state.layout.password {
            if state.answer_password {
                let answer = if value == state.password.as_slice() {
                    vec![0x01]
                } else {
                    vec![0x00]
                };
                let result_char = state.layout.password_result;
                if let Some(tx) = state.subscribers.get(&result_char) {
                    let _ = tx.send(answer);
                }
            }
        } else {
            state.values.insert(characteristic, value.to_vec());
        }
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> LinkResult<mpsc::UnboundedReceiver<Vec<u8>>> {
        let mut state = self.inner.lock().await;
        if !state.connected {
            return Err(LinkError::NotConnected);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.insert(characteristic, tx);
        Ok(rx)
    }

    async fn disconnect(&self) -> LinkResult<()> {
        let mut state = self.inner.lock().await;
        state.connected = false;
        state.subscribers.clear();
        state.disconnects += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> DeviceAddress {
        DeviceAddress::new([0xc8, 0xfd, 0x19, 0x3a, 0x00, 0x7f])
    }

    #[tokio::test]
    async fn test_mock_link_read_write() {
        let link = MockGattLink::new();
        let layout = GattLayout::default();

        // Not connected yet
        assert!(link.read(layout.major).await.is_err());

        link.connect(&address()).await.unwrap();
        link.discover(&layout).await.unwrap();

        assert_eq!(link.read(layout.major).await.unwrap(), vec![0x04, 0xd2]);
        link.write(layout.major, &[0x00, 0x07]).await.unwrap();
        assert_eq!(link.read(layout.major).await.unwrap(), vec![0x00, 0x07]);
        assert_eq!(link.writes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_link_password_notification() {
        let link = MockGattLink::new();
        let layout = GattLayout::default();
        link.connect(&address()).await.unwrap();
        link.discover(&layout).await.unwrap();

        let mut results = link.subscribe(layout.password_result).await.unwrap();

        link.write(layout.password, b"000000").await.unwrap();
        assert_eq!(results.recv().await, Some(vec![0x00]));

        link.write(layout.password, b"123456").await.unwrap();
        assert_eq!(results.recv().await, Some(vec![0x01]));
    }

    #[tokio::test]
    async fn test_mock_link_discovery_failure() {
        let link = MockGattLink::new();
        let layout = GattLayout::default();
        link.set_missing_characteristic(Some(layout.name)).await;
        link.connect(&address()).await.unwrap();

        assert_eq!(
            link.discover(&layout).await,
            Err(LinkError::CharacteristicNotFound(layout.name))
        );
    }

    #[tokio::test]
    async fn test_mock_link_disconnect() {
        let link = MockGattLink::new();
        link.connect(&address()).await.unwrap();
        assert!(link.is_connected().await);

        link.disconnect().await.unwrap();
        assert!(!link.is_connected().await);
        assert_eq!(link.disconnect_count().await, 1);
    }
}
