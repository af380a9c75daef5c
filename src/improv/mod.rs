//! Improv-style WiFi provisioning over a serial byte stream.
//!
//! A host tool (for example a browser flasher) sends framed RPC commands;
//! the device answers with state, error and result frames.
//!
//! # Components
//!
//! - [`packet`] - frame and string-list codec
//! - [`engine`] - protocol state machine and RPC dispatch

pub mod engine;
pub mod packet;

pub use engine::{ImprovEngine, ImprovPoll, ProvisioningContext};
pub use packet::{ImprovPacket, PacketError};

/// Frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Device state report.
    CurrentState = 0x01,
    /// Device error report.
    ErrorState = 0x02,
    /// Command from the host.
    RpcCommand = 0x03,
    /// Command result from the device.
    RpcResult = 0x04,
}

impl TryFrom<u8> for PacketType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::CurrentState),
            0x02 => Ok(Self::ErrorState),
            0x03 => Ok(Self::RpcCommand),
            0x04 => Ok(Self::RpcResult),
            other => Err(other),
        }
    }
}

/// RPC command id, the first payload byte of an `RpcCommand` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RpcCommand {
    SendWifiSettings = 0x01,
    RequestCurrentState = 0x02,
    RequestDeviceInfo = 0x03,
    RequestScanNetworks = 0x04,
}

impl TryFrom<u8> for RpcCommand {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::SendWifiSettings),
            0x02 => Ok(Self::RequestCurrentState),
            0x03 => Ok(Self::RequestDeviceInfo),
            0x04 => Ok(Self::RequestScanNetworks),
            other => Err(other),
        }
    }
}

/// Provisioning state reported in `CurrentState` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    AuthorizationRequired = 0x01,
    Authorized = 0x02,
    Provisioning = 0x03,
    Provisioned = 0x04,
}

/// Error code reported in `ErrorState` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    None = 0x00,
    InvalidRpc = 0x01,
    UnknownCommand = 0x02,
    UnableToConnect = 0x03,
}
