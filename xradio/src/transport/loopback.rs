//! In-memory USB transport.
//!
//! Submitted transfers stay pending until the owner completes them with
//! [`LoopbackUsb::complete_next`], [`LoopbackUsb::receive`] or
//! [`LoopbackUsb::complete_all`]. Control requests hit a small register
//! file. Allocation, submission and control failures can be injected.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::trace;
use tokio::sync::mpsc::UnboundedSender;

use super::{
    Completion, Direction, SubmitError, Transfer, TransferHandle, TransferId, TransferStatus,
    UsbTransport,
};
use crate::queue::RingId;

/// `-ENODEV`, returned for unknown handles.
const ENODEV: i32 = -19;

/// `-EPIPE`, returned for injected failures.
const EPIPE: i32 = -32;

/// Copy of an outgoing transfer as it was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTransfer {
    /// Transfer identity.
    pub id: TransferId,
    /// Bytes as submitted, padding included.
    pub data: Vec<u8>,
}

/// One control request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRecord {
    /// Request code.
    pub request: u8,
    /// Transfer direction.
    pub direction: Direction,
    /// Register offset.
    pub offset: u16,
    /// Value field.
    pub value: u32,
    /// Data stage length.
    pub length: usize,
}

#[derive(Debug)]
struct Pending {
    handle: TransferHandle,
    transfer: Transfer,
}

#[derive(Debug, Default)]
struct LoopbackState {
    next_handle: u32,
    live: BTreeSet<TransferHandle>,
    /// Remaining successful allocations, unlimited when `None`.
    alloc_budget: Option<usize>,
    pending: VecDeque<Pending>,
    sent: Vec<SentTransfer>,
    requests: Vec<ControlRecord>,
    failing_requests: usize,
    request_status: i32,
    rejected_submits: usize,
    /// Submissions still accepted before rejections start.
    accepted_submits: usize,
    registers: HashMap<u16, u32>,
}

/// A loopback transport for testing.
#[derive(Debug)]
pub struct LoopbackUsb {
    completions: UnboundedSender<Completion>,
    state: Mutex<LoopbackState>,
}

impl LoopbackUsb {
    /// Creates a transport delivering completions on `completions`.
    pub fn new(completions: UnboundedSender<Completion>) -> Self {
        Self {
            completions,
            state: Mutex::new(LoopbackState::default()),
        }
    }

    /// Fails every transfer allocation after the first `count`.
    pub fn with_alloc_limit(self, count: usize) -> Self {
        self.lock().alloc_budget = Some(count);
        self
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `count` control request attempts return `status`.
    pub fn fail_requests(&self, count: usize, status: i32) {
        let mut state = self.lock();
        state.failing_requests = count;
        state.request_status = status;
    }

    /// Rejects the next `count` submissions.
    pub fn reject_submissions(&self, count: usize) {
        self.reject_submissions_after(0, count);
    }

    /// Accepts `accepted` more submissions, then rejects `count`.
    pub fn reject_submissions_after(&self, accepted: usize, count: usize) {
        let mut state = self.lock();
        state.accepted_submits = accepted;
        state.rejected_submits = count;
    }

    /// Number of allocated transfer objects.
    pub fn live_transfers(&self) -> usize {
        self.lock().live.len()
    }

    /// Number of submitted transfers not yet completed or cancelled.
    pub fn outstanding(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of pending transfers of one ring.
    pub fn outstanding_for(&self, ring: RingId) -> usize {
        self.lock()
            .pending
            .iter()
            .filter(|p| p.transfer.id.ring == ring)
            .count()
    }

    /// Outgoing transfers in submission order.
    pub fn sent(&self) -> Vec<SentTransfer> {
        self.lock().sent.clone()
    }

    /// Control request attempts in order.
    pub fn requests(&self) -> Vec<ControlRecord> {
        self.lock().requests.clone()
    }

    /// Current value of a register.
    pub fn register(&self, offset: u16) -> Option<u32> {
        self.lock().registers.get(&offset).copied()
    }

    /// Completes the oldest pending transfer of `ring`.
    pub fn complete_next(&self, ring: RingId, status: TransferStatus) -> bool {
        let mut state = self.lock();
        let Some(pos) = state.pending.iter().position(|p| p.transfer.id.ring == ring) else {
            return false;
        };
        let pending = state.pending.remove(pos);
        drop(state);

        if let Some(pending) = pending {
            let transfer = pending.transfer;
            let actual_length = match transfer.direction {
                Direction::Out if status.is_success() => transfer.buffer.len(),
                _ => 0,
            };
            self.deliver(transfer, status, actual_length);
        }
        true
    }

    /// Completes the oldest pending receive transfer with `data`.
    pub fn receive(&self, data: &[u8]) -> bool {
        let mut state = self.lock();
        let Some(pos) = state.pending.iter().position(|p| p.transfer.id.ring == RingId::Rx) else {
            return false;
        };
        let pending = state.pending.remove(pos);
        drop(state);

        if let Some(pending) = pending {
            let mut transfer = pending.transfer;
            let n = core::cmp::min(data.len(), transfer.buffer.len());
            transfer.buffer[..n].copy_from_slice(&data[..n]);
            self.deliver(transfer, TransferStatus::Success, n);
        }
        true
    }

    /// Completes every pending transfer in submission order.
    pub fn complete_all(&self, status: TransferStatus) -> usize {
        let drained: Vec<Pending> = self.lock().pending.drain(..).collect();
        let count = drained.len();
        for pending in drained {
            let transfer = pending.transfer;
            let actual_length = if status.is_success() {
                transfer.buffer.len()
            } else {
                0
            };
            self.deliver(transfer, status, actual_length);
        }
        count
    }

    fn deliver(&self, transfer: Transfer, status: TransferStatus, actual_length: usize) {
        trace!(
            "Completing {} entry {} status={:?} len={}",
            transfer.id.ring, transfer.id.index, status, actual_length
        );
        let completion = Completion {
            id: transfer.id,
            status,
            buffer: transfer.buffer,
            actual_length,
        };
        // Dispatcher gone means the device is being torn down.
        let _ = self.completions.send(completion);
    }
}

impl UsbTransport for LoopbackUsb {
    fn alloc_transfer(&self) -> Option<TransferHandle> {
        let mut state = self.lock();
        if let Some(budget) = state.alloc_budget.as_mut() {
            if *budget == 0 {
                return None;
            }
            *budget -= 1;
        }
        let handle = TransferHandle::new(state.next_handle);
        state.next_handle = state.next_handle.wrapping_add(1);
        state.live.insert(handle);
        Some(handle)
    }

    fn free_transfer(&self, handle: TransferHandle) {
        self.lock().live.remove(&handle);
    }

    fn submit(&self, handle: TransferHandle, transfer: Transfer) -> Result<(), SubmitError> {
        let mut state = self.lock();
        if !state.live.contains(&handle) {
            return Err(SubmitError {
                status: ENODEV,
                buffer: transfer.buffer,
            });
        }
        if state.accepted_submits > 0 {
            state.accepted_submits -= 1;
        } else if state.rejected_submits > 0 {
            state.rejected_submits -= 1;
            return Err(SubmitError {
                status: EPIPE,
                buffer: transfer.buffer,
            });
        }

        if transfer.direction == Direction::Out {
            state.sent.push(SentTransfer {
                id: transfer.id,
                data: transfer.buffer.clone(),
            });
        }
        trace!(
            "Submitted {} entry {} len={}",
            transfer.id.ring,
            transfer.id.index,
            transfer.buffer.len()
        );
        state.pending.push_back(Pending { handle, transfer });
        Ok(())
    }

    fn cancel(&self, handle: TransferHandle) -> Option<Vec<u8>> {
        let mut state = self.lock();
        let pos = state.pending.iter().position(|p| p.handle == handle)?;
        state.pending.remove(pos).map(|p| p.transfer.buffer)
    }

    fn control_request(
        &self,
        request: u8,
        direction: Direction,
        offset: u16,
        value: u32,
        buffer: &mut [u8],
        _timeout_ms: u16,
    ) -> i32 {
        let mut state = self.lock();
        state.requests.push(ControlRecord {
            request,
            direction,
            offset,
            value,
            length: buffer.len(),
        });

        if state.failing_requests > 0 {
            if state.failing_requests != usize::MAX {
                state.failing_requests -= 1;
            }
            return state.request_status;
        }

        match direction {
            Direction::Out if buffer.len() >= 4 => {
                let word = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
                state.registers.insert(offset, word);
            }
            Direction::Out => {
                state.registers.insert(offset, value);
            }
            Direction::In => {
                let word = state.registers.get(&offset).copied().unwrap_or(0).to_le_bytes();
                let n = core::cmp::min(buffer.len(), word.len());
                buffer[..n].copy_from_slice(&word[..n]);
            }
        }
        buffer.len() as i32
    }
}
