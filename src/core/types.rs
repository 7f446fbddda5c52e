//! Domain types for beacon configuration sessions

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::core::error::CodecError;

/// GATT session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    DiscoveringServices = 3,
    Ready = 4,
    Disconnecting = 5,
}

impl TryFrom<u8> for SessionState {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0 => Ok(SessionState::Disconnected),
            1 => Ok(SessionState::Connecting),
            2 => Ok(SessionState::Connected),
            3 => Ok(SessionState::DiscoveringServices),
            4 => Ok(SessionState::Ready),
            5 => Ok(SessionState::Disconnecting),
            _ => Err(()),
        }
    }
}

impl From<SessionState> for u8 {
    fn from(state: SessionState) -> Self {
        state as u8
    }
}

/// Triggers driving the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTrigger {
    Connect,
    LinkEstablished,
    DiscoveryStarted,
    DiscoveryComplete,
    Disconnect,
    LinkClosed,
}

/// Password gate states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Unverified,
    Pending,
    Accepted,
    Rejected,
}

/// Device answer to a password submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordOutcome {
    Accepted,
    Rejected,
}

/// Configurable beacon fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeaconField {
    Uuid,
    Major,
    Minor,
    Period,
    TxPower,
    Name,
}

impl BeaconField {
    /// All fields, in the order they are written by a batch update
    pub const ALL: [BeaconField; 6] = [
        BeaconField::Uuid,
        BeaconField::Major,
        BeaconField::Minor,
        BeaconField::Period,
        BeaconField::TxPower,
        BeaconField::Name,
    ];
}

impl fmt::Display for BeaconField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BeaconField::Uuid => "uuid",
            BeaconField::Major => "major",
            BeaconField::Minor => "minor",
            BeaconField::Period => "period",
            BeaconField::TxPower => "tx_power",
            BeaconField::Name => "name",
        };
        f.pad(name)
    }
}

/// Radio transmit power levels supported by the beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TxPower {
    Minus23Dbm = 0,
    Minus6Dbm = 1,
    ZeroDbm = 2,
    Plus4Dbm = 3,
}

impl TxPower {
    /// Transmit power in dBm
    pub fn dbm(self) -> i8 {
        match self {
            TxPower::Minus23Dbm => -23,
            TxPower::Minus6Dbm => -6,
            TxPower::ZeroDbm => 0,
            TxPower::Plus4Dbm => 4,
        }
    }

    /// Look up the level for a dBm value
    pub fn from_dbm(dbm: i64) -> Option<Self> {
        match dbm {
            -23 => Some(TxPower::Minus23Dbm),
            -6 => Some(TxPower::Minus6Dbm),
            0 => Some(TxPower::ZeroDbm),
            4 => Some(TxPower::Plus4Dbm),
            _ => None,
        }
    }
}

impl TryFrom<u8> for TxPower {
    type Error = CodecError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TxPower::Minus23Dbm),
            1 => Ok(TxPower::Minus6Dbm),
            2 => Ok(TxPower::ZeroDbm),
            3 => Ok(TxPower::Plus4Dbm),
            other => Err(CodecError::UnknownTxPowerCode(other)),
        }
    }
}

impl From<TxPower> for u8 {
    fn from(power: TxPower) -> Self {
        power as u8
    }
}

/// A decoded beacon attribute value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Uuid(uuid::Uuid),
    Major(u16),
    Minor(u16),
    Period(u16),
    TxPower(TxPower),
    Name(String),
}

impl FieldValue {
    pub fn field(&self) -> BeaconField {
        match self {
            FieldValue::Uuid(_) => BeaconField::Uuid,
            FieldValue::Major(_) => BeaconField::Major,
            FieldValue::Minor(_) => BeaconField::Minor,
            FieldValue::Period(_) => BeaconField::Period,
            FieldValue::TxPower(_) => BeaconField::TxPower,
            FieldValue::Name(_) => BeaconField::Name,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Uuid(uuid) => write!(f, "{:X}", uuid.hyphenated()),
            FieldValue::Major(v) | FieldValue::Minor(v) | FieldValue::Period(v) => {
                write!(f, "{}", v)
            }
            FieldValue::TxPower(power) => write!(f, "{}", power.dbm()),
            FieldValue::Name(name) => f.write_str(name),
        }
    }
}

/// Beacon attributes known for the current session
///
/// Fields stay `None` until the matching characteristic has been read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconAttributes {
    pub uuid: Option<uuid::Uuid>,
    pub major: Option<u16>,
    pub minor: Option<u16>,
    pub period: Option<u16>,
    pub tx_power: Option<TxPower>,
    pub name: Option<String>,
}

impl BeaconAttributes {
    /// Store a decoded value
    pub fn apply(&mut self, value: FieldValue) {
        match value {
            FieldValue::Uuid(v) => self.uuid = Some(v),
            FieldValue::Major(v) => self.major = Some(v),
            FieldValue::Minor(v) => self.minor = Some(v),
            FieldValue::Period(v) => self.period = Some(v),
            FieldValue::TxPower(v) => self.tx_power = Some(v),
            FieldValue::Name(v) => self.name = Some(v),
        }
    }

    /// Current value of a field, if it has been read
    pub fn get(&self, field: BeaconField) -> Option<FieldValue> {
        match field {
            BeaconField::Uuid => self.uuid.map(FieldValue::Uuid),
            BeaconField::Major => self.major.map(FieldValue::Major),
            BeaconField::Minor => self.minor.map(FieldValue::Minor),
            BeaconField::Period => self.period.map(FieldValue::Period),
            BeaconField::TxPower => self.tx_power.map(FieldValue::TxPower),
            BeaconField::Name => self.name.clone().map(FieldValue::Name),
        }
    }

    pub fn is_complete(&self) -> bool {
        BeaconField::ALL.iter().all(|field| self.get(*field).is_some())
    }
}

/// Batch of textual edits applied after password verification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconChanges {
    pub uuid: Option<String>,
    pub major: Option<String>,
    pub minor: Option<String>,
    pub period: Option<String>,
    pub tx_power: Option<String>,
    pub name: Option<String>,
}

impl BeaconChanges {
    /// Requested edits in write order
    pub fn entries(&self) -> Vec<(BeaconField, &str)> {
        [
            (BeaconField::Uuid, &self.uuid),
            (BeaconField::Major, &self.major),
            (BeaconField::Minor, &self.minor),
            (BeaconField::Period, &self.period),
            (BeaconField::TxPower, &self.tx_power),
            (BeaconField::Name, &self.name),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.as_deref().map(|v| (field, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// 48-bit Bluetooth device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for DeviceAddress {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CodecError::InvalidFormat(format!("invalid device address: {}", s));

        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Session identifier for one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the peripheral of one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle {
    pub id: SessionId,
    pub address: DeviceAddress,
}

impl DeviceHandle {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            id: SessionId::new(),
            address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_session_state_byte_conversion() {
        for byte in 0u8..=5 {
            let state = SessionState::try_from(byte).unwrap();
            assert_eq!(u8::from(state), byte);
        }
        assert!(SessionState::try_from(6).is_err());
    }

    #[test]
    fn test_tx_power_codes() {
        assert_eq!(TxPower::try_from(0).unwrap().dbm(), -23);
        assert_eq!(TxPower::try_from(1).unwrap().dbm(), -6);
        assert_eq!(TxPower::try_from(2).unwrap().dbm(), 0);
        assert_eq!(TxPower::try_from(3).unwrap().dbm(), 4);
        assert!(matches!(
            TxPower::try_from(5),
            Err(CodecError::UnknownTxPowerCode(5))
        ));
    }

    #[test]
    fn test_device_address_parse() {
        let address: DeviceAddress = "c8:fd:19:3a:00:7f".parse().unwrap();
        assert_eq!(address.octets(), [0xc8, 0xfd, 0x19, 0x3a, 0x00, 0x7f]);
        assert_eq!(address.to_string(), "C8:FD:19:3A:00:7F");
    }

    #[test]
    fn test_device_address_invalid() {
        assert!("C8:FD:19:3A:00".parse::<DeviceAddress>().is_err());
        assert!("C8:FD:19:3A:00:7F:01".parse::<DeviceAddress>().is_err());
        assert!("C8-FD-19-3A-00-7F".parse::<DeviceAddress>().is_err());
        assert!("ZZ:FD:19:3A:00:7F".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn test_attributes_partial_record() {
        let mut attributes = BeaconAttributes::default();
        assert!(attributes.get(BeaconField::Major).is_none());

        attributes.apply(FieldValue::Major(1234));
        assert_eq!(
            attributes.get(BeaconField::Major),
            Some(FieldValue::Major(1234))
        );
        assert!(attributes.get(BeaconField::Name).is_none());
        assert!(!attributes.is_complete());
    }

    #[test]
    fn test_uuid_value_display_is_upper_case() {
        let uuid = uuid::Uuid::parse_str("b9407f30-f5f8-466e-aff9-25556b57fe6d").unwrap();
        assert_eq!(
            FieldValue::Uuid(uuid).to_string(),
            "B9407F30-F5F8-466E-AFF9-25556B57FE6D"
        );
    }

    #[test]
    fn test_changes_entries_in_write_order() {
        let changes = BeaconChanges {
            name: Some("Lobby".into()),
            major: Some("7".into()),
            ..Default::default()
        };

        assert_eq!(
            changes.entries(),
            vec![(BeaconField::Major, "7"), (BeaconField::Name, "Lobby")]
        );
    }
}
