//! Device handle: ring ownership, radio lifecycle and frame submission.
//!
//! A [`Device`] owns one ring per traffic class plus the receive ring.
//! Each ring sits behind its own mutex; the producer (submission) and the
//! consumer ([`Dispatcher`]) only ever contend on the ring they touch.
//! The radio flag and epoch are atomics read by every completion.

mod beacon;
mod dispatch;

pub use beacon::BeaconPhase;
pub use dispatch::{Dispatcher, completion_channel};

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, trace, warn};

use crate::buffer::{Owner, Ring, RingSnapshot, RingStats};
use crate::config::DeviceConfig;
use crate::control::ControlChannel;
use crate::error::{Error, Result};
use crate::frame::{DescriptorCodec, Frame, PlainDescriptor, TxControl};
use crate::queue::{RingId, TrafficClass};
use crate::transport::{Direction, Transfer, TransferId, UsbTransport};
use crate::upstream::{TxOutcome, Upstream};
use crate::{BULK_IN_ENDPOINT, BULK_OUT_ENDPOINT, USB_RX_CONTROL};

/// `-EBUSY`, slot found in an unexpected ownership state.
const EBUSY: i32 = -16;

/// `-ENOBUFS`, slot buffer still held by the transport.
const ENOBUFS: i32 = -105;

/// One attached radio.
pub struct Device<T: UsbTransport, U: Upstream, C: DescriptorCodec = PlainDescriptor> {
    config: DeviceConfig,

    transport: Arc<T>,

    upstream: Arc<U>,

    codec: C,

    control: ControlChannel<T>,

    /// Rx first, then data queues by priority, then beacon.
    rings: Vec<Mutex<Ring>>,

    /// Gates every completion side effect.
    radio_enabled: AtomicBool,

    /// Bumped on every enable; stamped into each transfer.
    epoch: AtomicU32,

    initialized: AtomicBool,
}

impl<T: UsbTransport, U: Upstream, C: DescriptorCodec> Device<T, U, C> {
    /// Builds the rings described by `config`. No memory is allocated
    /// for slots until [`Device::initialize`].
    pub fn new(config: DeviceConfig, transport: Arc<T>, upstream: Arc<U>, codec: C) -> Result<Self> {
        config.validate()?;

        let mut rings = Vec::with_capacity(config.tx_queues + 2);
        rings.push(Mutex::new(Ring::new(RingId::Rx, config.rx)));
        for prio in 0..config.tx_queues {
            let id = RingId::Tx(TrafficClass::Data(prio as u8));
            rings.push(Mutex::new(Ring::new(id, config.tx)));
        }
        rings.push(Mutex::new(Ring::new(
            RingId::Tx(TrafficClass::Beacon),
            config.beacon,
        )));

        let control = ControlChannel::new(transport.clone(), &config);

        Ok(Self {
            config,
            transport,
            upstream,
            codec,
            control,
            rings,
            radio_enabled: AtomicBool::new(false),
            epoch: AtomicU32::new(0),
            initialized: AtomicBool::new(false),
        })
    }

    /// Configuration the rings were built from.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Underlying transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Upper stack callbacks.
    pub fn upstream(&self) -> &Arc<U> {
        &self.upstream
    }

    /// Control channel for register access.
    pub fn control(&self) -> &ControlChannel<T> {
        &self.control
    }

    /// Returns true while completions are acted upon.
    pub fn is_radio_enabled(&self) -> bool {
        self.radio_enabled.load(Ordering::Acquire)
    }

    /// Returns true between a successful `initialize` and `teardown`.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Every ring of this device, receive ring first.
    pub fn ring_ids(&self) -> Vec<RingId> {
        self.rings
            .iter()
            .map(|ring| lock(ring).id())
            .collect()
    }

    fn ring_index(&self, ring: RingId) -> Option<usize> {
        match ring {
            RingId::Rx => Some(0),
            RingId::Tx(TrafficClass::Data(prio)) if (prio as usize) < self.config.tx_queues => {
                Some(1 + prio as usize)
            }
            RingId::Tx(TrafficClass::Data(_)) => None,
            RingId::Tx(TrafficClass::Beacon) => Some(1 + self.config.tx_queues),
        }
    }

    fn lock_ring(&self, ring: RingId) -> Option<MutexGuard<'_, Ring>> {
        self.ring_index(ring).map(|index| lock(&self.rings[index]))
    }

    /// Consistent copy of a ring's cursors and ownership.
    pub fn snapshot(&self, ring: RingId) -> Option<RingSnapshot> {
        self.lock_ring(ring).map(|ring| ring.snapshot())
    }

    /// Counters of one ring.
    pub fn stats(&self, ring: RingId) -> Option<RingStats> {
        self.lock_ring(ring).map(|ring| *ring.stats())
    }

    /// Allocates a transfer handle and buffer for every slot.
    ///
    /// On failure everything allocated so far is released before the
    /// error is returned.
    pub fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        if let Err(err) = self.allocate() {
            error!("Ring allocation failed: {}", err);
            self.teardown();
            return Err(err);
        }
        self.initialized.store(true, Ordering::Release);
        debug!("Initialized {} rings", self.rings.len());
        Ok(())
    }

    fn allocate(&self) -> Result<()> {
        for ring in &self.rings {
            let mut ring = lock(ring);
            let id = ring.id();
            let (capacity, len) = buffer_geometry(id, ring.config().entry_size());

            for index in 0..ring.limit() {
                let handle = self
                    .transport
                    .alloc_transfer()
                    .ok_or(Error::Allocation { ring: id, index })?;
                let Some(buffer) = alloc_buffer(capacity, len) else {
                    self.transport.free_transfer(handle);
                    return Err(Error::Allocation { ring: id, index });
                };
                if let Some(slot) = ring.slot_mut(index) {
                    slot.attach(handle, buffer);
                }
            }
            trace!("Allocated {} entries for {}", ring.limit(), id);
        }
        Ok(())
    }

    /// Cancels and frees every slot's transfer and buffer.
    ///
    /// Frames still held by slots are handed back upstream. Safe after a
    /// partial or failed [`Device::initialize`].
    pub fn teardown(&self) {
        self.radio_enabled.store(false, Ordering::Release);
        for ring in &self.rings {
            let mut ring = lock(ring);
            let id = ring.id();
            self.cancel_all(&mut ring);
            let discarded = ring.reset();
            for slot in ring.slots_mut() {
                let (handle, _buffer) = slot.detach();
                if let Some(handle) = handle {
                    self.transport.free_transfer(handle);
                }
            }
            drop(ring);
            self.release_discarded(id, discarded);
        }
        self.initialized.store(false, Ordering::Release);
        debug!("Rings released");
    }

    /// Resets all rings and primes every receive slot.
    ///
    /// Anything still in flight is cancelled first. Frames dropped by the
    /// reset are handed back upstream, and slots whose buffer has not come
    /// back yet get a fresh one. The radio only counts as enabled once the
    /// receive ring is fully armed.
    pub fn enable_radio(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        self.radio_enabled.store(false, Ordering::Release);
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        for ring in &self.rings {
            let mut ring = lock(ring);
            let id = ring.id();
            self.cancel_all(&mut ring);
            let discarded = ring.reset();
            let replenished = self.replenish(&mut ring);
            drop(ring);

            self.release_discarded(id, discarded);
            let replaced = replenished?;
            if replaced > 0 {
                debug!("Replaced {} buffers still out on {}", replaced, id);
            }
        }

        let Some(mut rx) = self.lock_ring(RingId::Rx) else {
            return Err(Error::NotInitialized);
        };
        if let Err(err) = self.prime_rx(&mut rx, epoch) {
            let cancelled = self.cancel_all(&mut rx);
            rx.reset();
            error!("Failed to arm rx ring ({} entries cancelled): {}", cancelled, err);
            return Err(err);
        }
        // Stored under the rx lock, so no rx completion of this epoch can
        // observe the radio as off.
        self.radio_enabled.store(true, Ordering::Release);

        debug!("Radio enabled (epoch {}), {} rx entries armed", epoch, rx.queued());
        Ok(())
    }

    fn prime_rx(&self, rx: &mut Ring, epoch: u32) -> Result<()> {
        let entry_size = rx.config().entry_size();
        for _ in 0..rx.limit() {
            let index = rx.fill_cursor();
            let slot = rx.claim_next();
            if let Err(owner) = slot.claim() {
                error!("Rx entry {} is {:?} right after reset", index, owner);
                return Err(Error::Submit {
                    ring: RingId::Rx,
                    index,
                    status: EBUSY,
                });
            }
            if let Some(buffer) = slot.buffer_mut() {
                buffer.resize(entry_size, 0);
            }
            if let Err(err) = self.submit_claimed(rx, epoch) {
                rx.claim_next().reset();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Stops hardware reception and cancels every outstanding transfer.
    ///
    /// Cancellation runs even when the stop command fails; its error is
    /// returned afterwards. Calling this again is a no-op per slot.
    pub fn disable_radio(&self) -> Result<()> {
        self.radio_enabled.store(false, Ordering::Release);

        let stopped = self.control.vendor_request_sw(USB_RX_CONTROL, 0x0000, 0x0000);

        let cancelled: usize = self
            .rings
            .iter()
            .map(|ring| self.cancel_all(&mut lock(ring)))
            .sum();

        debug!("Radio disabled, {} transfers cancelled", cancelled);
        if let Err(err) = &stopped {
            warn!("Failed to stop hardware reception: {}", err);
        }
        stopped
    }

    /// Cancels every pending transfer of `ring` and takes its buffer back.
    fn cancel_all(&self, ring: &mut Ring) -> usize {
        let mut cancelled = 0;
        for slot in ring.slots_mut() {
            let Some(handle) = slot.handle() else {
                continue;
            };
            if let Some(buffer) = self.transport.cancel(handle) {
                slot.restore_buffer(buffer);
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Gives every allocated slot whose buffer is still out a new one.
    ///
    /// The old buffer is dropped when its completion is dispatched.
    fn replenish(&self, ring: &mut Ring) -> Result<usize> {
        let id = ring.id();
        let (capacity, len) = buffer_geometry(id, ring.config().entry_size());
        let mut replaced = 0;
        for (index, slot) in ring.slots_mut().enumerate() {
            if !slot.is_allocated() || slot.has_buffer() {
                continue;
            }
            let buffer = alloc_buffer(capacity, len).ok_or(Error::Allocation { ring: id, index })?;
            slot.restore_buffer(buffer);
            replaced += 1;
        }
        Ok(replaced)
    }

    /// Hands frames dropped by a ring reset back upstream.
    ///
    /// Beacons are released; data frames are reported as failed.
    fn release_discarded(&self, ring: RingId, controls: Vec<TxControl>) {
        if controls.is_empty() {
            return;
        }
        debug!("Discarded {} queued frames on {}", controls.len(), ring);
        for control in controls {
            match ring {
                RingId::Tx(TrafficClass::Beacon) => self.upstream.release_beacon(control),
                _ => self
                    .upstream
                    .report_tx_outcome(&control, &[], TxOutcome::RetryableFailure),
            }
        }
    }

    /// Queues one frame on a data ring.
    ///
    /// A full ring, or a slot found still owned at the fill cursor, pauses
    /// the class upstream and fails without touching ring state.
    pub fn submit_frame(&self, class: TrafficClass, frame: &Frame) -> Result<()> {
        if class == TrafficClass::Beacon {
            return Err(Error::InvalidQueue(class));
        }
        let mut ring = self
            .lock_ring(RingId::Tx(class))
            .ok_or(Error::InvalidQueue(class))?;
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        if !self.is_radio_enabled() {
            return Err(Error::RadioDisabled);
        }
        let max = ring.config().data_size;
        if frame.len() > max {
            return Err(Error::FrameTooLarge {
                len: frame.len(),
                max,
            });
        }

        if ring.is_full() {
            ring.stats_mut().backpressure += 1;
            drop(ring);
            self.upstream.pause(class);
            return Err(Error::RingFull(class));
        }

        let index = ring.fill_cursor();
        let desc_size = ring.config().desc_size;
        let slot = ring.claim_next();
        let claimed = match slot.claim() {
            Ok(()) if slot.has_buffer() => Ok(()),
            Ok(()) => {
                // Free but its buffer never came back from the transport.
                slot.reset();
                Err(Owner::Device)
            }
            Err(owner) => Err(owner),
        };
        if let Err(owner) = claimed {
            error!(
                "Arrived at non-free entry {} in the non-full queue {}: expected Free, found {:?}.",
                index, class, owner
            );
            ring.stats_mut().backpressure += 1;
            drop(ring);
            self.upstream.pause(class);
            return Err(Error::SlotBusy {
                class,
                index,
                owner,
            });
        }

        if let Some(buffer) = slot.buffer_mut() {
            let length = self.write_frame(buffer, desc_size, frame);
            slot.set_length(length);
        }
        slot.set_control(frame.control.clone());

        if let Err(err) = self.submit_claimed(&mut ring, self.epoch()) {
            ring.claim_next().reset();
            return Err(err);
        }
        trace!("Queued {} bytes on {} entry {}", frame.len(), class, index);

        let full = ring.is_full();
        drop(ring);
        if full {
            self.upstream.pause(class);
        }
        Ok(())
    }

    /// Writes descriptor and frame into a slot buffer.
    ///
    /// Returns the valid length; the buffer itself is padded to an even
    /// length for the bulk endpoint.
    fn write_frame(&self, buffer: &mut Vec<u8>, desc_size: usize, frame: &Frame) -> usize {
        buffer.clear();
        buffer.resize(desc_size, 0);
        buffer.extend_from_slice(&frame.data);
        self.codec.write_tx_desc(&mut buffer[..desc_size], frame);

        let length = buffer.len();
        if length % 2 != 0 {
            buffer.push(0);
        }
        length
    }

    /// Submits the claimed slot at the fill cursor and advances the cursor.
    ///
    /// On failure the slot keeps its buffer and stays claimed.
    fn submit_claimed(&self, ring: &mut Ring, epoch: u32) -> Result<()> {
        let id = ring.id();
        let index = ring.fill_cursor();
        let (direction, endpoint) = match id {
            RingId::Rx => (Direction::In, BULK_IN_ENDPOINT),
            RingId::Tx(_) => (Direction::Out, BULK_OUT_ENDPOINT),
        };

        let slot = ring.claim_next();
        let Some(handle) = slot.handle() else {
            return Err(Error::NotInitialized);
        };
        if let Err(owner) = slot.hand_to_device() {
            error!("{} entry {} submitted while {:?}", id, index, owner);
            return Err(Error::Submit {
                ring: id,
                index,
                status: EBUSY,
            });
        }
        let Some(buffer) = slot.take_buffer() else {
            let _ = slot.reject();
            return Err(Error::Submit {
                ring: id,
                index,
                status: ENOBUFS,
            });
        };

        let transfer = Transfer {
            id: TransferId { ring: id, index, epoch },
            direction,
            endpoint,
            buffer,
        };
        if let Err(err) = self.transport.submit(handle, transfer) {
            slot.restore_buffer(err.buffer);
            let _ = slot.reject();
            warn!("{} entry {} rejected with error {}", id, index, err.status);
            return Err(Error::Submit {
                ring: id,
                index,
                status: err.status,
            });
        }

        ring.advance_fill();
        Ok(())
    }
}

impl<T: UsbTransport, U: Upstream, C: DescriptorCodec> Drop for Device<T, U, C> {
    fn drop(&mut self) {
        if self.is_initialized() {
            self.teardown();
        }
    }
}

fn lock(ring: &Mutex<Ring>) -> MutexGuard<'_, Ring> {
    ring.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Receive buffers are handed out at full size; transmit buffers keep one
/// spare byte for length padding.
fn buffer_geometry(ring: RingId, entry_size: usize) -> (usize, usize) {
    match ring {
        RingId::Rx => (entry_size, entry_size),
        RingId::Tx(_) => (entry_size + 1, 0),
    }
}

fn alloc_buffer(capacity: usize, len: usize) -> Option<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(capacity).ok()?;
    buffer.resize(len, 0);
    Some(buffer)
}
