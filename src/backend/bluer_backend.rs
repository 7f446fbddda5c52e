//! BlueZ GATT client link using bluer

use bluer::{
    Adapter, AdapterEvent, Address, Device, Session,
    gatt::remote::Characteristic,
};
use futures::StreamExt;
use std::{collections::HashMap, time::Duration};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::GattLink;
use crate::config::GattLayout;
use crate::core::error::{ATT_UNLIKELY_ERROR, LinkError, LinkResult};
use crate::core::types::DeviceAddress;

const SERVICES_RESOLVED_POLL: Duration = Duration::from_millis(200);

impl From<bluer::Error> for LinkError {
    fn from(e: bluer::Error) -> Self {
        // ATT error codes
        let code = match e.kind {
            bluer::ErrorKind::NotPermitted => 0x03,
            bluer::ErrorKind::NotSupported => 0x06,
            bluer::ErrorKind::NotAuthorized => 0x08,
            bluer::ErrorKind::InvalidLength => 0x0d,
            _ => ATT_UNLIKELY_ERROR,
        };
        LinkError::Gatt {
            code,
            message: e.message,
        }
    }
}

/// GATT link to a peripheral through the local BlueZ daemon
pub struct BluerLink {
    _session: Session,
    adapter: Adapter,
    device: RwLock<Option<Device>>,
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
}

impl BluerLink {
    /// Open the named adapter, or the default one, and power it on
    pub async fn new(adapter_name: Option<&str>) -> LinkResult<Self> {
        let session = Session::new()
            .await
            .map_err(|e| LinkError::AdapterUnavailable(e.to_string()))?;
        let adapter = match adapter_name {
            Some(name) => session.adapter(name),
            None => session.default_adapter().await,
        }
        .map_err(|e| LinkError::AdapterUnavailable(e.to_string()))?;

        adapter
            .set_powered(true)
            .await
            .map_err(|e| LinkError::AdapterUnavailable(e.to_string()))?;
        info!("Using BLE adapter: {}", adapter.name());

        Ok(Self {
            _session: session,
            adapter,
            device: RwLock::new(None),
            characteristics: RwLock::new(HashMap::new()),
        })
    }

    /// Look up a device, scanning until it shows up if BlueZ has not seen it yet
    async fn find_device(&self, address: Address) -> LinkResult<Device> {
        if !self.adapter.device_addresses().await?.contains(&address) {
            info!(%address, "Device not known yet, scanning");
            let events = self.adapter.discover_devices().await?;
            let mut events = Box::pin(events);
            while let Some(event) = events.next().await {
                if let AdapterEvent::DeviceAdded(added) = event {
                    debug!(address = %added, "Device found");
                    if added == address {
                        break;
                    }
                }
            }
        }
        Ok(self.adapter.device(address)?)
    }

    async fn connected_device(&self) -> LinkResult<Device> {
        self.device.read().await.clone().ok_or(LinkError::NotConnected)
    }

    async fn characteristic(&self, uuid: Uuid) -> LinkResult<Characteristic> {
        self.characteristics
            .read()
            .await
            .get(&uuid)
            .cloned()
            .ok_or(LinkError::CharacteristicNotFound(uuid))
    }
}

impl GattLink for BluerLink {
    async fn connect(&self, address: &DeviceAddress) -> LinkResult<()> {
        let address = Address::new(address.octets());
        let device = self.find_device(address).await?;

        if !device.is_connected().await? {
            device
                .connect()
                .await
                .map_err(|e| LinkError::ConnectionFailed(e.to_string()))?;
        }
        info!(%address, "Connected");

        *self.device.write().await = Some(device);
        Ok(())
    }

    async fn discover(&self, layout: &GattLayout) -> LinkResult<()> {
        let device = self.connected_device().await?;

        while !device.is_services_resolved().await? {
            tokio::time::sleep(SERVICES_RESOLVED_POLL).await;
        }

        let mut found = HashMap::new();
        for service in device.services().await? {
            if service.uuid().await? != layout.service {
                continue;
            }
            for characteristic in service.characteristics().await? {
                found.insert(characteristic.uuid().await?, characteristic);
            }
        }
        debug!(count = found.len(), "Characteristics discovered");

        if let Some(missing) = layout
            .characteristics()
            .into_iter()
            .find(|uuid| !found.contains_key(uuid))
        {
            return Err(LinkError::CharacteristicNotFound(missing));
        }

        *self.characteristics.write().await = found;
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> LinkResult<Vec<u8>> {
        let value = self.characteristic(characteristic).await?.read().await?;
        debug!(%characteristic, payload = %hex::encode(&value), "Read");
        Ok(value)
    }

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> LinkResult<()> {
        debug!(%characteristic, payload = %hex::encode(value), "Write");
        self.characteristic(characteristic)
            .await?
            .write(value)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> LinkResult<mpsc::UnboundedReceiver<Vec<u8>>> {
        let stream = self.characteristic(characteristic).await?.notify().await?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(value) = stream.next().await {
                debug!(%characteristic, payload = %hex::encode(&value), "Notification");
                if tx.send(value).is_err() {
                    break;
                }
            }
            debug!(%characteristic, "Notification stream ended");
        });

        Ok(rx)
    }

    async fn disconnect(&self) -> LinkResult<()> {
        self.characteristics.write().await.clear();
        let Some(device) = self.device.write().await.take() else {
            return Ok(());
        };

        match device.is_connected().await {
            Ok(true) => {
                device.disconnect().await?;
                info!(address = %device.address(), "Disconnected");
            }
            Ok(false) => debug!(address = %device.address(), "Already disconnected"),
            Err(e) => warn!(error = %e, "Could not query connection state"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bluer_error_maps_to_att_code() {
        let error = bluer::Error {
            kind: bluer::ErrorKind::NotPermitted,
            message: "Write not permitted".to_string(),
        };
        assert_eq!(
            LinkError::from(error),
            LinkError::Gatt {
                code: 0x03,
                message: "Write not permitted".to_string()
            }
        );

        let error = bluer::Error {
            kind: bluer::ErrorKind::Failed,
            message: "Operation failed".to_string(),
        };
        assert_eq!(LinkError::from(error).code(), ATT_UNLIKELY_ERROR);
    }
}
