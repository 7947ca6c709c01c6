use crate::transport::TransportError;

/// Errors returned by the protocol codec and the session manager.
///
/// `Display` carries the technical detail; [`Error::public_message`] is the
/// short summary meant for end users and never contains frame contents.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid command type '{0}'")]
    InvalidCommandType(String),
    #[error("response too short: {len} bytes, at least {required} required")]
    ResponseTooShort { len: usize, required: usize },
    #[error("checksum mismatch - calculated={calculated:02X} received={received:02X}")]
    ChecksumMismatch { calculated: u8, received: u8 },
    #[error("out of bounds read of {width} bytes at offset {offset} in {len} byte frame")]
    OutOfBoundsRead {
        offset: usize,
        width: usize,
        len: usize,
    },
    #[error("invalid date value {year}-{month:02}-{day:02}")]
    InvalidDateValue { year: u16, month: u8, day: u8 },
    #[error("invalid time value {hour:02}:{minute:02} with half-seconds {half_seconds}")]
    InvalidTimeValue {
        hour: u8,
        minute: u8,
        half_seconds: u8,
    },
    #[error("{field} contains non-ASCII characters")]
    NonAsciiData { field: &'static str },
    #[error("Bluetooth radio is not powered on")]
    BluetoothNotPoweredOn,
    #[error("no matching device found within {0:?}")]
    ScanTimeout(std::time::Duration),
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] TransportError),
    #[error("service discovery failed: {0}")]
    DiscoveryFailed(#[source] TransportError),
    #[error("no connected device")]
    NotConnected,
    #[error("session lock not acquired within {0:?}")]
    DeviceLocked(std::time::Duration),
    #[error("response not complete within {0:?}")]
    ResponseTimeout(std::time::Duration),
    #[error("device still connected after {0:?}")]
    DisconnectTimeout(std::time::Duration),
    #[error("mosfet target state {target} not reached, device reports {actual}")]
    TargetStateNotReached { target: bool, actual: bool },
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl Error {
    /// Human readable summary suitable for showing to an end user.
    pub fn public_message(&self) -> &'static str {
        match self {
            Error::InvalidCommandType(_) => "Unable to generate command payload",
            Error::ResponseTooShort { .. }
            | Error::ChecksumMismatch { .. }
            | Error::OutOfBoundsRead { .. } => "Unable to parse response",
            Error::InvalidDateValue { .. } => "Unable to parse date",
            Error::InvalidTimeValue { .. } => "Unable to parse time",
            Error::NonAsciiData { .. } => "Unable to extract production data",
            Error::BluetoothNotPoweredOn => "Bluetooth is not enabled",
            Error::ScanTimeout(_) => {
                "Device scan timed out. Please make sure the device is nearby and powered on"
            }
            Error::ConnectionFailed(_) => "Device connection failed",
            Error::DiscoveryFailed(_) => "Device service discovery failed",
            Error::NotConnected => "Unable to complete request, no connected device",
            Error::DeviceLocked(_) => "Device is busy, please retry",
            Error::ResponseTimeout(_) => "Device did not answer in time",
            Error::DisconnectTimeout(_) => "Device disconnection timed out",
            Error::TargetStateNotReached { .. } => {
                "Failed to toggle mosfet, target status not reached"
            }
            Error::Transport(_) => "Bluetooth communication failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_message_hides_details() {
        let err = Error::ChecksumMismatch {
            calculated: 0xed,
            received: 0x28,
        };
        assert_eq!(err.public_message(), "Unable to parse response");
        assert_eq!(
            err.to_string(),
            "checksum mismatch - calculated=ED received=28"
        );
    }

    #[test]
    fn transport_errors_convert() {
        let err: Error = TransportError::NotConnected.into();
        assert!(matches!(err, Error::Transport(TransportError::NotConnected)));
        assert_eq!(err.public_message(), "Bluetooth communication failed");
    }
}
