//! A single reusable transfer slot.
//!
//! Ownership moves `Free → Producer → Device → Free`. Every transition is
//! checked; a mismatch returns the owner actually found.

use crate::frame::TxControl;
use crate::transport::TransferHandle;

/// Who currently owns a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Available for the producer.
    Free,

    /// Claimed and being filled, not yet submitted.
    Producer,

    /// Submitted to the transport, waiting for completion.
    Device,
}

/// What a slot carries in the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRole {
    /// Regular frame or receive buffer.
    Payload,

    /// One-byte sentinel sent ahead of a beacon.
    Guardian,

    /// Beacon frame, submitted once the guardian completed.
    Beacon,
}

/// One buffer and its transfer handle.
#[derive(Debug)]
pub struct Slot {
    /// Transfer memory; `None` while the transport holds it.
    buffer: Option<Vec<u8>>,

    /// Pre-allocated transfer handle.
    handle: Option<TransferHandle>,

    owner: Owner,

    role: SlotRole,

    /// Metadata of the frame currently in the slot.
    control: Option<TxControl>,

    /// Valid bytes (descriptor + frame) in the buffer.
    length: usize,
}

impl Slot {
    /// Creates an unallocated slot.
    pub const fn new() -> Self {
        Self {
            buffer: None,
            handle: None,
            owner: Owner::Free,
            role: SlotRole::Payload,
            control: None,
            length: 0,
        }
    }

    /// Current owner.
    #[inline]
    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Returns true if nobody owns the slot.
    #[inline]
    pub fn is_free(&self) -> bool {
        self.owner == Owner::Free
    }

    /// Role in the current cycle.
    #[inline]
    pub fn role(&self) -> SlotRole {
        self.role
    }

    /// Tags the slot for the current cycle.
    pub fn set_role(&mut self, role: SlotRole) {
        self.role = role;
    }

    /// Transfer handle, `None` before allocation.
    #[inline]
    pub fn handle(&self) -> Option<TransferHandle> {
        self.handle
    }

    /// Returns true once a handle and buffer are attached.
    pub fn is_allocated(&self) -> bool {
        self.handle.is_some()
    }

    /// Attaches the resources allocated for this slot.
    pub fn attach(&mut self, handle: TransferHandle, buffer: Vec<u8>) {
        self.handle = Some(handle);
        self.buffer = Some(buffer);
    }

    /// Detaches the handle and buffer, leaving an unallocated free slot.
    pub fn detach(&mut self) -> (Option<TransferHandle>, Option<Vec<u8>>) {
        self.reset();
        (self.handle.take(), self.buffer.take())
    }

    /// Returns false while the transport holds the buffer.
    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// Slot memory, `None` while submitted.
    pub fn buffer(&self) -> Option<&[u8]> {
        self.buffer.as_deref()
    }

    /// Slot memory for filling.
    pub fn buffer_mut(&mut self) -> Option<&mut Vec<u8>> {
        self.buffer.as_mut()
    }

    /// Moves the buffer out for submission.
    pub fn take_buffer(&mut self) -> Option<Vec<u8>> {
        self.buffer.take()
    }

    /// Puts a buffer returned by the transport back.
    ///
    /// Returns false (and drops `buffer`) if the slot already holds one.
    pub fn restore_buffer(&mut self, buffer: Vec<u8>) -> bool {
        if self.buffer.is_some() {
            return false;
        }
        self.buffer = Some(buffer);
        true
    }

    /// Frame metadata stored at claim time.
    pub fn control(&self) -> Option<&TxControl> {
        self.control.as_ref()
    }

    /// Stores frame metadata for the completion report.
    pub fn set_control(&mut self, control: TxControl) {
        self.control = Some(control);
    }

    /// Moves the frame metadata out for reporting.
    pub fn take_control(&mut self) -> Option<TxControl> {
        self.control.take()
    }

    /// Valid bytes (descriptor and frame).
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Records the valid length before submission.
    pub fn set_length(&mut self, length: usize) {
        self.length = length;
    }

    fn transition(&mut self, from: Owner, to: Owner) -> Result<(), Owner> {
        if self.owner != from {
            return Err(self.owner);
        }
        self.owner = to;
        Ok(())
    }

    /// `Free → Producer`.
    pub fn claim(&mut self) -> Result<(), Owner> {
        self.transition(Owner::Free, Owner::Producer)
    }

    /// `Producer → Device`.
    pub fn hand_to_device(&mut self) -> Result<(), Owner> {
        self.transition(Owner::Producer, Owner::Device)
    }

    /// `Device → Producer`, after the transport refused the transfer.
    pub fn reject(&mut self) -> Result<(), Owner> {
        self.transition(Owner::Device, Owner::Producer)
    }

    /// `Device → Free`, dropping the role.
    pub fn complete(&mut self) -> Result<(), Owner> {
        self.transition(Owner::Device, Owner::Free)?;
        self.role = SlotRole::Payload;
        self.length = 0;
        Ok(())
    }

    /// Forces the slot back to `Free`, returning any frame metadata it held.
    pub fn reset(&mut self) -> Option<TxControl> {
        self.owner = Owner::Free;
        self.role = SlotRole::Payload;
        self.length = 0;
        self.control.take()
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TrafficClass;

    #[test]
    fn test_ownership_cycle() {
        let mut slot = Slot::new();
        assert!(slot.is_free());

        slot.claim().unwrap();
        assert_eq!(slot.owner(), Owner::Producer);
        slot.hand_to_device().unwrap();
        assert_eq!(slot.owner(), Owner::Device);
        slot.complete().unwrap();
        assert!(slot.is_free());
    }

    #[test]
    fn test_invalid_transitions_report_owner() {
        let mut slot = Slot::new();
        assert_eq!(slot.hand_to_device(), Err(Owner::Free));
        assert_eq!(slot.complete(), Err(Owner::Free));

        slot.claim().unwrap();
        assert_eq!(slot.claim(), Err(Owner::Producer));
        slot.hand_to_device().unwrap();
        assert_eq!(slot.claim(), Err(Owner::Device));

        slot.reject().unwrap();
        assert_eq!(slot.owner(), Owner::Producer);
    }

    #[test]
    fn test_complete_clears_role() {
        let mut slot = Slot::new();
        slot.claim().unwrap();
        slot.set_role(SlotRole::Guardian);
        slot.set_length(1);
        slot.hand_to_device().unwrap();
        slot.complete().unwrap();
        assert_eq!(slot.role(), SlotRole::Payload);
        assert_eq!(slot.length(), 0);
    }

    #[test]
    fn test_buffer_round_trip() {
        let mut slot = Slot::new();
        slot.attach(TransferHandle::new(7), vec![0u8; 16]);
        assert!(slot.is_allocated());

        let buf = slot.take_buffer().unwrap();
        assert!(!slot.has_buffer());
        assert!(slot.restore_buffer(buf));
        assert!(!slot.restore_buffer(vec![0u8; 4]));
        assert_eq!(slot.buffer().map(|b| b.len()), Some(16));
    }

    #[test]
    fn test_reset_returns_control() {
        let mut slot = Slot::new();
        slot.claim().unwrap();
        slot.set_control(crate::frame::TxControl::new(TrafficClass::Data(0), 3));
        let control = slot.reset().unwrap();
        assert_eq!(control.cookie, 3);
        assert!(slot.is_free());
        assert!(slot.control().is_none());
    }

    #[test]
    fn test_detach() {
        let mut slot = Slot::new();
        slot.attach(TransferHandle::new(1), vec![0u8; 8]);
        let (handle, buffer) = slot.detach();
        assert_eq!(handle, Some(TransferHandle::new(1)));
        assert_eq!(buffer.map(|b| b.len()), Some(8));
        assert!(!slot.is_allocated());
    }
}
