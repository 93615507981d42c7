//! Guardian-then-beacon submission.
//!
//! A beacon update claims two consecutive slots of the beacon ring. The
//! first carries a one-byte guardian and is submitted at once; the second
//! holds the encoded beacon and stays parked with the producer until the
//! guardian completes. Each slot is tagged with its [`SlotRole`], so the
//! completion path never has to infer roles from cursor positions.

use log::{debug, warn};

use super::Device;
use crate::buffer::{Owner, Ring, SlotRole};
use crate::error::{Error, Result};
use crate::frame::{DescriptorCodec, Frame};
use crate::queue::{RingId, TrafficClass};
use crate::transport::UsbTransport;
use crate::upstream::Upstream;

/// Where the beacon ring is in its two-stage cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconPhase {
    /// No beacon transfer in flight.
    Idle,

    /// Guardian submitted, beacon parked behind it.
    GuardianSubmitted,

    /// Guardian done, beacon submitted.
    BeaconSubmitted,
}

pub(super) fn phase_of(ring: &Ring) -> BeaconPhase {
    let mut phase = BeaconPhase::Idle;
    for slot in ring.slots() {
        if slot.owner() != Owner::Device {
            continue;
        }
        match slot.role() {
            SlotRole::Guardian => return BeaconPhase::GuardianSubmitted,
            SlotRole::Beacon => phase = BeaconPhase::BeaconSubmitted,
            SlotRole::Payload => {}
        }
    }
    phase
}

impl<T: UsbTransport, U: Upstream, C: DescriptorCodec> Device<T, U, C> {
    /// Current phase of the beacon cycle.
    pub fn beacon_phase(&self) -> BeaconPhase {
        self.lock_ring(RingId::Tx(TrafficClass::Beacon))
            .map(|ring| phase_of(&ring))
            .unwrap_or(BeaconPhase::Idle)
    }

    /// Starts a beacon cycle with `frame`.
    ///
    /// Only the guardian is submitted here; the beacon follows from the
    /// guardian's completion. Afterwards the configured kick command
    /// enables periodic beacon generation. A failing kick is returned
    /// while the guardian stays in flight.
    pub fn update_beacon(&self, frame: &Frame) -> Result<()> {
        let class = TrafficClass::Beacon;
        let Some(mut ring) = self.lock_ring(RingId::Tx(class)) else {
            return Err(Error::InvalidQueue(class));
        };
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
        if phase_of(&ring) != BeaconPhase::Idle {
            return Err(Error::BeaconPending);
        }

        let limit = ring.limit();
        let guardian = ring.fill_cursor();
        let beacon = (guardian + 1) % limit;
        for index in [guardian, beacon] {
            let Some(slot) = ring.slot(index) else {
                return Err(Error::InvalidQueue(class));
            };
            if !slot.is_free() || !slot.has_buffer() {
                let owner = match slot.owner() {
                    Owner::Free => Owner::Device,
                    owner => owner,
                };
                warn!("Beacon entry {} unavailable ({:?})", index, owner);
                return Err(Error::SlotBusy {
                    class,
                    index,
                    owner,
                });
            }
        }

        let desc_size = ring.config().desc_size;
        if let Some(slot) = ring.slot_mut(beacon) {
            let _ = slot.claim();
            slot.set_role(SlotRole::Beacon);
            if let Some(buffer) = slot.buffer_mut() {
                let length = self.write_frame(buffer, desc_size, frame);
                slot.set_length(length);
            }
            slot.set_control(frame.control.clone());
        }

        let slot = ring.claim_next();
        let _ = slot.claim();
        slot.set_role(SlotRole::Guardian);
        if let Some(buffer) = slot.buffer_mut() {
            buffer.clear();
            buffer.push(0);
        }
        slot.set_length(1);

        if let Err(err) = self.submit_claimed(&mut ring, self.epoch()) {
            ring.claim_next().reset();
            if let Some(slot) = ring.slot_mut(beacon) {
                slot.reset();
            }
            return Err(err);
        }
        debug!("Guardian queued at entry {}, beacon parked at {}", guardian, beacon);
        drop(ring);

        self.control.send(&self.config.beacon_kick)
    }
}
