//! Vendor GATT layout: which characteristic carries which beacon field

use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::core::{error::ConfigError, types::BeaconField};

/// Builds a UUID from a 16-bit id on the Bluetooth base UUID
const fn short_uuid(id: u16) -> Uuid {
    let [hi, lo] = id.to_be_bytes();
    Uuid::from_bytes([
        0x00, 0x00, hi, lo, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x5f, 0x9b, 0x34, 0xfb,
    ])
}

/// Beacon configuration service
pub const BEACON_SERVICE_UUID: Uuid = short_uuid(0xfff0);
/// Proximity UUID (16 bytes, read/write)
pub const UUID_CHAR_UUID: Uuid = short_uuid(0xfff1);
/// Major identifier (u16, read/write)
pub const MAJOR_CHAR_UUID: Uuid = short_uuid(0xfff2);
/// Minor identifier (u16, read/write)
pub const MINOR_CHAR_UUID: Uuid = short_uuid(0xfff3);
/// Broadcast period in milliseconds (u16, read/write)
pub const PERIOD_CHAR_UUID: Uuid = short_uuid(0xfff4);
/// Transmit power code (1 byte, read/write)
pub const TX_POWER_CHAR_UUID: Uuid = short_uuid(0xfff5);
/// Device name (UTF-8, read/write)
pub const NAME_CHAR_UUID: Uuid = short_uuid(0xfff6);
/// Password submission (write)
pub const PASSWORD_CHAR_UUID: Uuid = short_uuid(0xfff7);
/// Password verification result (notify)
pub const PASSWORD_RESULT_CHAR_UUID: Uuid = short_uuid(0xfff8);

/// Characteristic layout of the beacon's configuration service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GattLayout {
    pub service: Uuid,
    pub uuid: Uuid,
    pub major: Uuid,
    pub minor: Uuid,
    pub period: Uuid,
    pub tx_power: Uuid,
    pub name: Uuid,
    pub password: Uuid,
    pub password_result: Uuid,
    /// Fields that may only be written after password verification
    pub protected: Vec<BeaconField>,
}

impl Default for GattLayout {
    fn default() -> Self {
        Self {
            service: BEACON_SERVICE_UUID,
            uuid: UUID_CHAR_UUID,
            major: MAJOR_CHAR_UUID,
            minor: MINOR_CHAR_UUID,
            period: PERIOD_CHAR_UUID,
            tx_power: TX_POWER_CHAR_UUID,
            name: NAME_CHAR_UUID,
            password: PASSWORD_CHAR_UUID,
            password_result: PASSWORD_RESULT_CHAR_UUID,
            protected: BeaconField::ALL.to_vec(),
        }
    }
}

impl GattLayout {
    /// Load a layout from a JSON file; missing keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let layout: GattLayout = serde_json::from_str(&content)?;
        layout.validate()?;
        Ok(layout)
    }

    /// Characteristic carrying a field
    pub fn characteristic(&self, field: BeaconField) -> Uuid {
        match field {
            BeaconField::Uuid => self.uuid,
            BeaconField::Major => self.major,
            BeaconField::Minor => self.minor,
            BeaconField::Period => self.period,
            BeaconField::TxPower => self.tx_power,
            BeaconField::Name => self.name,
        }
    }

    pub fn is_protected(&self, field: BeaconField) -> bool {
        self.protected.contains(&field)
    }

    /// Every characteristic that must be present after discovery
    pub fn characteristics(&self) -> Vec<Uuid> {
        let mut uuids: Vec<Uuid> = BeaconField::ALL
            .iter()
            .map(|field| self.characteristic(*field))
            .collect();
        uuids.push(self.password);
        uuids.push(self.password_result);
        uuids
    }

    /// Reject layouts mapping two roles onto one characteristic
    pub fn validate(&self) -> Result<(), ConfigError> {
        let uuids = self.characteristics();
        for (i, a) in uuids.iter().enumerate() {
            if uuids[i + 1..].contains(a) {
                return Err(ConfigError::Invalid(format!(
                    "characteristic {} is mapped more than once",
                    a
                )));
            }
        }
        Ok(())
    }
}
