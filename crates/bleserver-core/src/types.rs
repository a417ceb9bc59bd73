//! Shared protocol types

use std::fmt;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Identity of a connected central, as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Transport-assigned identifier of a single pending ATT request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// GATT Status and Connection State
// ----------------------------------------------------------------------------

/// Status carried by a GATT response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GattStatus {
    Success,
    InvalidOffset,
    RequestNotSupported,
    Failure,
}

impl GattStatus {
    /// ATT wire value of this status
    pub fn code(self) -> u8 {
        match self {
            GattStatus::Success => 0x00,
            GattStatus::InvalidOffset => 0x07,
            GattStatus::RequestNotSupported => 0x06,
            GattStatus::Failure => 0x0e,
        }
    }
}

/// Link state reported by connection-state-change callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Connected,
    Disconnected,
}

// ----------------------------------------------------------------------------
// Advertising Failure Codes
// ----------------------------------------------------------------------------

/// Reason advertising stopped or never started
///
/// Numeric codes match the platform advertise-callback codes so they can be
/// passed through to the UI unchanged. `TimedOut` is the locally generated
/// code for the advertising liveness bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertiseFailure {
    DataTooLarge,
    TooManyAdvertisers,
    AlreadyStarted,
    InternalError,
    FeatureUnsupported,
    TimedOut,
    Platform(i32),
}

impl AdvertiseFailure {
    pub fn code(self) -> i32 {
        match self {
            AdvertiseFailure::DataTooLarge => 1,
            AdvertiseFailure::TooManyAdvertisers => 2,
            AdvertiseFailure::AlreadyStarted => 3,
            AdvertiseFailure::InternalError => 4,
            AdvertiseFailure::FeatureUnsupported => 5,
            AdvertiseFailure::TimedOut => 6,
            AdvertiseFailure::Platform(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => AdvertiseFailure::DataTooLarge,
            2 => AdvertiseFailure::TooManyAdvertisers,
            3 => AdvertiseFailure::AlreadyStarted,
            4 => AdvertiseFailure::InternalError,
            5 => AdvertiseFailure::FeatureUnsupported,
            6 => AdvertiseFailure::TimedOut,
            other => AdvertiseFailure::Platform(other),
        }
    }
}

impl fmt::Display for AdvertiseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvertiseFailure::DataTooLarge => write!(f, "advertise data too large"),
            AdvertiseFailure::TooManyAdvertisers => write!(f, "too many advertisers"),
            AdvertiseFailure::AlreadyStarted => write!(f, "advertising already started"),
            AdvertiseFailure::InternalError => write!(f, "internal advertising error"),
            AdvertiseFailure::FeatureUnsupported => write!(f, "advertising not supported"),
            AdvertiseFailure::TimedOut => write!(f, "advertising timed out"),
            AdvertiseFailure::Platform(code) => write!(f, "platform failure code {}", code),
        }
    }
}
