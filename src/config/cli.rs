//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

use crate::core::codec::ByteOrder;

#[derive(Parser, Debug, Clone)]
#[clap(name = "beacon-config", version, author)]
#[clap(about = "Read and edit the configuration of a BLE iBeacon")]
pub struct CliArgs {
    /// Bluetooth address of the beacon, e.g. C8:FD:19:3A:00:7F
    pub address: String,

    /// Local Bluetooth adapter (default adapter if omitted)
    #[clap(short, long)]
    pub adapter: Option<String>,

    /// JSON file overriding the GATT characteristic layout
    #[clap(short, long)]
    pub layout: Option<PathBuf>,

    /// Byte order of integer characteristics
    #[clap(long, value_enum, default_value = "big")]
    pub byte_order: ByteOrder,

    /// Link-layer connect timeout in milliseconds
    #[clap(long, default_value = "10000")]
    pub connect_timeout_ms: u64,

    /// Service discovery timeout in milliseconds
    #[clap(long, default_value = "10000")]
    pub discovery_timeout_ms: u64,

    /// Timeout of a single read or write in milliseconds
    #[clap(long, default_value = "5000")]
    pub operation_timeout_ms: u64,

    /// Time to wait for the password verdict in milliseconds
    #[clap(long, default_value = "5000")]
    pub password_timeout_ms: u64,

    /// Access password, required to change any field
    #[clap(short, long)]
    pub password: Option<String>,

    /// New proximity UUID
    #[clap(long)]
    pub uuid: Option<String>,

    /// New major value (0-65535)
    #[clap(long)]
    pub major: Option<String>,

    /// New minor value (0-65535)
    #[clap(long)]
    pub minor: Option<String>,

    /// New broadcast period in milliseconds
    #[clap(long)]
    pub period: Option<String>,

    /// New transmit power in dBm (-23, -6, 0 or 4)
    #[clap(long, allow_hyphen_values = true)]
    pub tx_power: Option<String>,

    /// New device name
    #[clap(long)]
    pub name: Option<String>,

    /// Print session events as JSON lines on stdout
    #[clap(long)]
    pub json: bool,
}
