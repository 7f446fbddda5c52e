//! Attribute codec: characteristic payloads to beacon values and back

use serde::{Deserialize, Serialize};

use crate::core::{
    error::{CodecError, CodecResult},
    types::{BeaconField, FieldValue, PasswordOutcome, TxPower},
};

const UUID_LEN: usize = 16;
const PASSWORD_ACCEPTED: u8 = 0x01;
const PASSWORD_REJECTED: u8 = 0x00;

/// Byte order of integer characteristics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

/// Value bounds applied by the codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecSettings {
    pub byte_order: ByteOrder,
    /// Lowest accepted broadcast period in milliseconds
    pub min_period_ms: u16,
    /// Highest accepted broadcast period in milliseconds
    pub max_period_ms: u16,
    pub max_name_len: usize,
    pub max_password_len: usize,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::Big,
            min_period_ms: 100,
            max_period_ms: 10_000,
            max_name_len: 20,
            max_password_len: 16,
        }
    }
}

/// Translates raw characteristic bytes to beacon attribute values
#[derive(Debug, Clone, Default)]
pub struct AttributeCodec {
    settings: CodecSettings,
}

impl AttributeCodec {
    pub fn new(settings: CodecSettings) -> Self {
        Self { settings }
    }

    /// Decode a characteristic payload read from the device
    pub fn decode(&self, field: BeaconField, raw: &[u8]) -> CodecResult<FieldValue> {
        match field {
            BeaconField::Uuid => {
                let bytes: [u8; UUID_LEN] = raw.try_into().map_err(|_| {
                    CodecError::InvalidFormat(format!(
                        "uuid payload must be {} bytes, got {}",
                        UUID_LEN,
                        raw.len()
                    ))
                })?;
                Ok(FieldValue::Uuid(uuid::Uuid::from_bytes(bytes)))
            }
            BeaconField::Major => Ok(FieldValue::Major(self.decode_u16(field, raw)?)),
            BeaconField::Minor => Ok(FieldValue::Minor(self.decode_u16(field, raw)?)),
            BeaconField::Period => Ok(FieldValue::Period(self.decode_u16(field, raw)?)),
            BeaconField::TxPower => match raw {
                [code] => Ok(FieldValue::TxPower(TxPower::try_from(*code)?)),
                _ => Err(CodecError::InvalidFormat(format!(
                    "tx_power payload must be 1 byte, got {}",
                    raw.len()
                ))),
            },
            BeaconField::Name => {
                let trimmed = match raw.iter().position(|b| *b == 0) {
                    Some(end) => &raw[..end],
                    None => raw,
                };
                let name = std::str::from_utf8(trimmed)
                    .map_err(|e| CodecError::InvalidFormat(format!("name is not UTF-8: {}", e)))?;
                Ok(FieldValue::Name(name.to_string()))
            }
        }
    }

    /// Encode a typed value into its characteristic payload
    pub fn encode(&self, value: &FieldValue) -> CodecResult<Vec<u8>> {
        match value {
            FieldValue::Uuid(uuid) => Ok(uuid.as_bytes().to_vec()),
            FieldValue::Major(v) | FieldValue::Minor(v) => Ok(self.encode_u16(*v)),
            FieldValue::Period(v) => {
                self.check_period(i64::from(*v))?;
                Ok(self.encode_u16(*v))
            }
            FieldValue::TxPower(power) => Ok(vec![u8::from(*power)]),
            FieldValue::Name(name) => {
                self.check_text(name, self.settings.max_name_len)?;
                Ok(name.as_bytes().to_vec())
            }
        }
    }

    /// Parse user-entered text into a typed value
    ///
    /// Surrounding whitespace is ignored except for names, which are kept as entered.
    pub fn parse(&self, field: BeaconField, text: &str) -> CodecResult<FieldValue> {
        let trimmed = text.trim();
        match field {
            BeaconField::Uuid => uuid::Uuid::parse_str(trimmed)
                .map(FieldValue::Uuid)
                .map_err(|e| CodecError::InvalidFormat(format!("invalid uuid {:?}: {}", trimmed, e))),
            BeaconField::Major => Ok(FieldValue::Major(parse_bounded(
                trimmed,
                0,
                i64::from(u16::MAX),
            )?)),
            BeaconField::Minor => Ok(FieldValue::Minor(parse_bounded(
                trimmed,
                0,
                i64::from(u16::MAX),
            )?)),
            BeaconField::Period => Ok(FieldValue::Period(parse_bounded(
                trimmed,
                i64::from(self.settings.min_period_ms),
                i64::from(self.settings.max_period_ms),
            )?)),
            BeaconField::TxPower => {
                let dbm = parse_integer(trimmed)?;
                TxPower::from_dbm(dbm)
                    .map(FieldValue::TxPower)
                    .ok_or(CodecError::UnsupportedTxPower(dbm))
            }
            BeaconField::Name => {
                self.check_text(text, self.settings.max_name_len)?;
                Ok(FieldValue::Name(text.to_string()))
            }
        }
    }

    /// Parse and encode user-entered text in one step
    pub fn encode_text(&self, field: BeaconField, text: &str) -> CodecResult<(FieldValue, Vec<u8>)> {
        let value = self.parse(field, text)?;
        let raw = self.encode(&value)?;
        Ok((value, raw))
    }

    /// Encode the access password
    pub fn encode_password(&self, secret: &str) -> CodecResult<Vec<u8>> {
        self.check_text(secret, self.settings.max_password_len)?;
        Ok(secret.as_bytes().to_vec())
    }

    /// Decode the device's answer to a password submission
    pub fn decode_password_result(&self, raw: &[u8]) -> CodecResult<PasswordOutcome> {
        match raw {
            [PASSWORD_ACCEPTED] => Ok(PasswordOutcome::Accepted),
            [PASSWORD_REJECTED] => Ok(PasswordOutcome::Rejected),
            _ => Err(CodecError::InvalidFormat(format!(
                "unexpected password result {}",
                hex::encode(raw)
            ))),
        }
    }

    fn decode_u16(&self, field: BeaconField, raw: &[u8]) -> CodecResult<u16> {
        let bytes: [u8; 2] = raw.try_into().map_err(|_| {
            CodecError::InvalidFormat(format!(
                "{} payload must be 2 bytes, got {}",
                field,
                raw.len()
            ))
        })?;
        Ok(match self.settings.byte_order {
            ByteOrder::Big => u16::from_be_bytes(bytes),
            ByteOrder::Little => u16::from_le_bytes(bytes),
        })
    }

    fn encode_u16(&self, value: u16) -> Vec<u8> {
        match self.settings.byte_order {
            ByteOrder::Big => value.to_be_bytes().to_vec(),
            ByteOrder::Little => value.to_le_bytes().to_vec(),
        }
    }

    fn check_period(&self, value: i64) -> CodecResult<()> {
        check_range(
            value,
            i64::from(self.settings.min_period_ms),
            i64::from(self.settings.max_period_ms),
        )
    }

    fn check_text(&self, text: &str, max: usize) -> CodecResult<()> {
        if text.is_empty() {
            return Err(CodecError::InvalidFormat("text must not be empty".into()));
        }
        if text.len() > max {
            return Err(CodecError::TooLong {
                len: text.len(),
                max,
            });
        }
        Ok(())
    }
}

fn parse_integer(text: &str) -> CodecResult<i64> {
    text.parse::<i64>()
        .map_err(|_| CodecError::InvalidFormat(format!("{:?} is not a number", text)))
}

fn parse_bounded(text: &str, min: i64, max: i64) -> CodecResult<u16> {
    let value = parse_integer(text)?;
    check_range(value, min, max)?;
    u16::try_from(value).map_err(|_| CodecError::ValueOutOfRange { value, min, max })
}

fn check_range(value: i64, min: i64, max: i64) -> CodecResult<()> {
    if value < min || value > max {
        return Err(CodecError::ValueOutOfRange { value, min, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const IBEACON_UUID: &str = "B9407F30-F5F8-466E-AFF9-25556B57FE6D";

    fn round_trip_text(codec: &AttributeCodec, field: BeaconField, text: &str) -> String {
        let (_, raw) = codec.encode_text(field, text).unwrap();
        codec.decode(field, &raw).unwrap().to_string()
    }

    #[test]
    fn test_uuid_round_trip_unchanged() {
        let codec = AttributeCodec::default();
        assert_eq!(
            round_trip_text(&codec, BeaconField::Uuid, IBEACON_UUID),
            IBEACON_UUID
        );
    }

    #[test]
    fn test_uuid_canonical_bytes() {
        let codec = AttributeCodec::default();
        let (_, raw) = codec.encode_text(BeaconField::Uuid, IBEACON_UUID).unwrap();
        assert_eq!(raw.len(), 16);
        assert_eq!(&raw[..4], &[0xb9, 0x40, 0x7f, 0x30]);
    }

    #[test]
    fn test_uuid_invalid_text() {
        let codec = AttributeCodec::default();
        assert!(matches!(
            codec.parse(BeaconField::Uuid, "not-a-uuid"),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(
            codec.decode(BeaconField::Uuid, &[0u8; 15]),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_major_round_trip() {
        let codec = AttributeCodec::default();
        let (value, raw) = codec.encode_text(BeaconField::Major, "1234").unwrap();
        assert_eq!(value, FieldValue::Major(1234));
        assert_eq!(raw, vec![0x04, 0xd2]);
        assert_eq!(
            codec.decode(BeaconField::Major, &raw).unwrap(),
            FieldValue::Major(1234)
        );
    }

    #[test]
    fn test_little_endian_byte_order() {
        let codec = AttributeCodec::new(CodecSettings {
            byte_order: ByteOrder::Little,
            ..Default::default()
        });
        let (_, raw) = codec.encode_text(BeaconField::Minor, "1234").unwrap();
        assert_eq!(raw, vec![0xd2, 0x04]);
        assert_eq!(
            codec.decode(BeaconField::Minor, &raw).unwrap(),
            FieldValue::Minor(1234)
        );
    }

    #[test]
    fn test_major_out_of_range_is_not_truncated() {
        let codec = AttributeCodec::default();
        assert_eq!(
            codec.parse(BeaconField::Major, "65536"),
            Err(CodecError::ValueOutOfRange {
                value: 65536,
                min: 0,
                max: 65535
            })
        );
        assert!(matches!(
            codec.parse(BeaconField::Minor, "-1"),
            Err(CodecError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            codec.parse(BeaconField::Major, "12a"),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_period_bounds() {
        let codec = AttributeCodec::default();
        assert_eq!(
            codec.parse(BeaconField::Period, "500").unwrap(),
            FieldValue::Period(500)
        );
        assert!(matches!(
            codec.parse(BeaconField::Period, "50"),
            Err(CodecError::ValueOutOfRange { .. })
        ));
        // device-reported periods are surfaced as-is, bounds only apply to edits
        assert_eq!(
            codec.decode(BeaconField::Period, &[0x00, 0x32]).unwrap(),
            FieldValue::Period(50)
        );
        assert!(matches!(
            codec.encode(&FieldValue::Period(50)),
            Err(CodecError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn test_tx_power_decode() {
        let codec = AttributeCodec::default();
        assert_eq!(
            codec.decode(BeaconField::TxPower, &[1]).unwrap(),
            FieldValue::TxPower(TxPower::Minus6Dbm)
        );
        assert_eq!(
            codec.decode(BeaconField::TxPower, &[5]),
            Err(CodecError::UnknownTxPowerCode(5))
        );
    }

    #[test]
    fn test_tx_power_text() {
        let codec = AttributeCodec::default();
        let (value, raw) = codec.encode_text(BeaconField::TxPower, "4").unwrap();
        assert_eq!(value, FieldValue::TxPower(TxPower::Plus4Dbm));
        assert_eq!(raw, vec![3]);
        assert_eq!(
            codec.parse(BeaconField::TxPower, "10"),
            Err(CodecError::UnsupportedTxPower(10))
        );
    }

    #[test]
    fn test_name_decode_strips_padding() {
        let codec = AttributeCodec::default();
        assert_eq!(
            codec.decode(BeaconField::Name, b"Lobby\0\0\0").unwrap(),
            FieldValue::Name("Lobby".into())
        );
        assert!(matches!(
            codec.decode(BeaconField::Name, &[0xff, 0xfe]),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_name_length_limits() {
        let codec = AttributeCodec::default();
        assert_eq!(
            codec.parse(BeaconField::Name, &"A".repeat(21)),
            Err(CodecError::TooLong { len: 21, max: 20 })
        );
        assert!(codec.parse(BeaconField::Name, &"A".repeat(20)).is_ok());
        assert!(codec.parse(BeaconField::Name, "").is_err());
    }

    #[test]
    fn test_parse_keeps_name_whitespace() {
        let codec = AttributeCodec::default();
        assert_eq!(
            codec.parse(BeaconField::Name, " Lobby ").unwrap(),
            FieldValue::Name(" Lobby ".into())
        );
        assert_eq!(
            codec.parse(BeaconField::Major, " 7 ").unwrap(),
            FieldValue::Major(7)
        );
        assert_eq!(
            codec.parse(BeaconField::Uuid, &format!(" {} ", IBEACON_UUID)).unwrap(),
            FieldValue::Uuid(uuid::Uuid::parse_str(IBEACON_UUID).unwrap())
        );
    }

    #[test]
    fn test_password_encoding() {
        let codec = AttributeCodec::default();
        assert_eq!(codec.encode_password("123456").unwrap(), b"123456".to_vec());
        assert!(codec.encode_password("").is_err());
        assert!(codec.encode_password(&"9".repeat(17)).is_err());
    }

    #[test]
    fn test_password_result() {
        let codec = AttributeCodec::default();
        assert_eq!(
            codec.decode_password_result(&[1]).unwrap(),
            PasswordOutcome::Accepted
        );
        assert_eq!(
            codec.decode_password_result(&[0]).unwrap(),
            PasswordOutcome::Rejected
        );
        assert!(codec.decode_password_result(&[2]).is_err());
        assert!(codec.decode_password_result(&[]).is_err());
    }
}
