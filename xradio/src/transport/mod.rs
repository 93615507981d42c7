//! USB transport abstraction.
//!
//! This module provides the `UsbTransport` trait the device drives. A
//! transport owns the low-level transfer objects: it allocates them once
//! per slot, accepts submissions, cancels them, and performs blocking
//! control requests. Completions are delivered out of band, as
//! [`Completion`] messages on the channel returned by
//! [`completion_channel`](crate::completion_channel), in submission order
//! per endpoint.
//!
//! # Implementations
//!
//! - `LoopbackUsb`: In-memory transport for tests and simulation
//!
//! # Example
//!
//! ```rust,ignore
//! use xradio::{completion_channel, LoopbackUsb, RingId, TransferStatus};
//!
//! let (tx, rx) = completion_channel();
//! let usb = LoopbackUsb::new(tx);
//! // ... submit through a Device ...
//! usb.complete_next(RingId::Rx, TransferStatus::Success);
//! ```

mod loopback;

pub use loopback::{ControlRecord, LoopbackUsb, SentTransfer};

use crate::queue::RingId;

/// Opaque handle of a pre-allocated transfer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferHandle(u32);

impl TransferHandle {
    /// Wraps a transport-specific handle value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Transport-specific handle value.
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

/// Direction of a transfer or control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host.
    In,

    /// Host to device.
    Out,
}

/// Identifies the slot a transfer belongs to.
///
/// Handed back untouched in the completion; this is the continuation
/// binding a completion to its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId {
    /// Ring of the slot.
    pub ring: RingId,
    /// Slot index within the ring.
    pub index: usize,
    /// Radio epoch the transfer was submitted in.
    pub epoch: u32,
}

/// A transfer handed to the transport.
#[derive(Debug)]
pub struct Transfer {
    /// Slot the transfer belongs to.
    pub id: TransferId,
    /// Transfer direction.
    pub direction: Direction,
    /// Bulk endpoint number.
    pub endpoint: u8,
    /// Transfer memory; its length is the transfer length.
    pub buffer: Vec<u8>,
}

/// Outcome of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Transfer finished normally.
    Success,
    /// Negative errno reported by the host controller.
    Error(i32),
}

impl TransferStatus {
    /// Maps a raw status code, zero meaning success.
    pub const fn from_code(code: i32) -> Self {
        if code == 0 {
            TransferStatus::Success
        } else {
            TransferStatus::Error(code)
        }
    }

    /// Returns true for [`TransferStatus::Success`].
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, TransferStatus::Success)
    }
}

/// Completion message delivered once per submitted transfer.
#[derive(Debug)]
pub struct Completion {
    /// Slot the transfer belongs to.
    pub id: TransferId,
    /// Transfer outcome.
    pub status: TransferStatus,
    /// The buffer given at submission.
    pub buffer: Vec<u8>,
    /// Bytes actually transferred.
    pub actual_length: usize,
}

/// A submission refused by the transport; the buffer is handed back.
#[derive(Debug)]
pub struct SubmitError {
    /// Negative errno.
    pub status: i32,
    /// Buffer handed back.
    pub buffer: Vec<u8>,
}

/// Transport primitives consumed by the device.
pub trait UsbTransport: Send + Sync {
    /// Allocates a transfer object, `None` when out of memory.
    fn alloc_transfer(&self) -> Option<TransferHandle>;

    /// Releases a transfer object. The transfer must not be in flight.
    fn free_transfer(&self, handle: TransferHandle);

    /// Submits a transfer without blocking.
    ///
    /// On success exactly one [`Completion`] carrying `transfer.id` is
    /// delivered later, unless the transfer is cancelled first.
    fn submit(&self, handle: TransferHandle, transfer: Transfer) -> Result<(), SubmitError>;

    /// Synchronously stops a transfer.
    ///
    /// Returns the buffer if the transfer was still pending; no completion
    /// is delivered for it then. Returns `None` if nothing was pending.
    fn cancel(&self, handle: TransferHandle) -> Option<Vec<u8>>;

    /// Blocking control request on endpoint 0.
    ///
    /// Returns the number of bytes transferred, or a negative errno.
    fn control_request(
        &self,
        request: u8,
        direction: Direction,
        offset: u16,
        value: u32,
        buffer: &mut [u8],
        timeout_ms: u16,
    ) -> i32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_code() {
        assert_eq!(TransferStatus::from_code(0), TransferStatus::Success);
        assert_eq!(TransferStatus::from_code(-71), TransferStatus::Error(-71));
        assert!(!TransferStatus::Error(-32).is_success());
    }
}
