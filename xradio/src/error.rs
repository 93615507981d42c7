//! Error type shared by every operation.

use core::fmt;

use crate::buffer::Owner;
use crate::queue::{RingId, TrafficClass};

/// Errors returned by ring, lifecycle and control operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Target transmit ring has no free slot.
    RingFull(TrafficClass),
    /// Slot at the fill cursor is not free although the ring is not full.
    SlotBusy {
        /// Queue that was written to.
        class: TrafficClass,
        /// Slot at the fill cursor.
        index: usize,
        /// Owner found there.
        owner: Owner,
    },
    /// Queue cannot be used for this operation.
    InvalidQueue(TrafficClass),
    /// Frame does not fit a slot.
    FrameTooLarge {
        /// Frame length.
        len: usize,
        /// Largest frame the ring takes.
        max: usize,
    },
    /// A beacon cycle is still in flight.
    BeaconPending,
    /// Radio is off.
    RadioDisabled,
    /// Rings have not been allocated.
    NotInitialized,
    /// Transport rejected a transfer.
    Submit {
        /// Ring of the slot.
        ring: RingId,
        /// Slot index.
        index: usize,
        /// Negative errno.
        status: i32,
    },
    /// Control request still failing after all attempts.
    VendorRequest {
        /// Request code.
        request: u8,
        /// Register offset.
        offset: u16,
        /// Last negative errno.
        status: i32,
    },
    /// Transfer handle or buffer allocation failed.
    Allocation {
        /// Ring being allocated.
        ring: RingId,
        /// First slot left without resources.
        index: usize,
    },
    /// Configuration rejected by [`DeviceConfig::validate`](crate::DeviceConfig::validate).
    InvalidConfig(&'static str),
}

impl Error {
    /// Returns true if the upper layer should pause and wait for a resume.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Error::RingFull(_) | Error::SlotBusy { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RingFull(class) => write!(f, "Ring {} is full", class),
            Error::SlotBusy { class, index, owner } => write!(
                f,
                "Arrived at non-free entry {} ({:?}) in the non-full queue {}",
                index, owner, class
            ),
            Error::InvalidQueue(class) => write!(f, "Queue {} cannot carry frames", class),
            Error::FrameTooLarge { len, max } => {
                write!(f, "Frame of {} bytes exceeds {} bytes", len, max)
            }
            Error::BeaconPending => write!(f, "Beacon update already in progress"),
            Error::RadioDisabled => write!(f, "Radio is disabled"),
            Error::NotInitialized => write!(f, "Device rings are not initialized"),
            Error::Submit { ring, index, status } => write!(
                f,
                "Transfer submission for {} entry {} failed with error {}",
                ring, index, status
            ),
            Error::VendorRequest {
                request,
                offset,
                status,
            } => write!(
                f,
                "Vendor request 0x{:02x} failed for offset 0x{:04x} with error {}",
                request, offset, status
            ),
            Error::Allocation { ring, index } => {
                write!(f, "Allocation failed for {} entry {}", ring, index)
            }
            Error::InvalidConfig(reason) => write!(f, "Invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for Error {}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> std::io::Error {
        let kind = match err {
            Error::RingFull(_) | Error::SlotBusy { .. } | Error::BeaconPending => {
                std::io::ErrorKind::WouldBlock
            }
            Error::FrameTooLarge { .. } | Error::InvalidQueue(_) | Error::InvalidConfig(_) => {
                std::io::ErrorKind::InvalidInput
            }
            Error::Allocation { .. } => std::io::ErrorKind::OutOfMemory,
            Error::RadioDisabled | Error::NotInitialized => std::io::ErrorKind::NotConnected,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backpressure_classification() {
        assert!(Error::RingFull(TrafficClass::Data(0)).is_backpressure());
        assert!(
            Error::SlotBusy {
                class: TrafficClass::Data(1),
                index: 3,
                owner: Owner::Device,
            }
            .is_backpressure()
        );
        assert!(!Error::BeaconPending.is_backpressure());
    }

    #[test]
    fn test_vendor_request_message() {
        let err = Error::VendorRequest {
            request: 0x0c,
            offset: 0x0400,
            status: -110,
        };
        assert_eq!(
            err.to_string(),
            "Vendor request 0x0c failed for offset 0x0400 with error -110"
        );
    }

    #[test]
    fn test_io_error_kind() {
        let io: std::io::Error = Error::RingFull(TrafficClass::Data(0)).into();
        assert_eq!(io.kind(), std::io::ErrorKind::WouldBlock);
    }
}
