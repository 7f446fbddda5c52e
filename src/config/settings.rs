//! Runtime settings

use std::time::Duration;

use crate::{
    config::{CliArgs, GattLayout},
    core::{
        codec::CodecSettings,
        error::ConfigError,
        session::SessionSettings,
        types::{BeaconChanges, DeviceAddress},
    },
};

/// Runtime configuration settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub address: DeviceAddress,
    pub adapter: Option<String>,
    pub session: SessionSettings,
    pub password: Option<String>,
    pub changes: BeaconChanges,
    pub json_events: bool,
}

fn timeout(name: &str, millis: u64) -> Result<Duration, ConfigError> {
    if millis == 0 {
        return Err(ConfigError::Invalid(format!("{} must be positive", name)));
    }
    Ok(Duration::from_millis(millis))
}

impl TryFrom<CliArgs> for Settings {
    type Error = ConfigError;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let address = args
            .address
            .parse()
            .map_err(|e: crate::core::error::CodecError| ConfigError::Invalid(e.to_string()))?;

        let layout = match &args.layout {
            Some(path) => GattLayout::from_file(path)?,
            None => GattLayout::default(),
        };

        let changes = BeaconChanges {
            uuid: args.uuid,
            major: args.major,
            minor: args.minor,
            period: args.period,
            tx_power: args.tx_power,
            name: args.name,
        };
        if !changes.is_empty() && args.password.is_none() {
            return Err(ConfigError::Invalid(
                "changing fields requires --password".to_string(),
            ));
        }

        let session = SessionSettings {
            layout,
            codec: CodecSettings {
                byte_order: args.byte_order,
                ..Default::default()
            },
            connect_timeout: timeout("connect timeout", args.connect_timeout_ms)?,
            discovery_timeout: timeout("discovery timeout", args.discovery_timeout_ms)?,
            operation_timeout: timeout("operation timeout", args.operation_timeout_ms)?,
            password_timeout: timeout("password timeout", args.password_timeout_ms)?,
            // The binary reads every field itself
            read_on_connect: false,
        };

        Ok(Settings {
            address,
            adapter: args.adapter,
            session,
            password: args.password,
            changes,
            json_events: args.json,
        })
    }
}
