//! Completion handling.
//!
//! The transport posts a [`Completion`] per finished transfer. The
//! [`Dispatcher`] drains them and hands each to
//! [`Device::complete_transfer`], which validates it against the slot,
//! frees the slot, advances the drain cursor and notifies upstream.
//!
//! Transmit reports and receive delivery run under the ring lock. Resume
//! and beacon release run after it is dropped, so upstream may submit
//! again from inside those callbacks.

use std::sync::{Arc, Weak};

use log::{debug, error, trace, warn};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use super::Device;
use crate::buffer::{Owner, Ring, SlotRole};
use crate::frame::{DescriptorCodec, PlainDescriptor, TxControl};
use crate::queue::{RingId, TrafficClass};
use crate::transport::{Completion, TransferStatus, UsbTransport};
use crate::upstream::{TxOutcome, Upstream};

/// Creates the channel a transport delivers completions on.
pub fn completion_channel() -> (UnboundedSender<Completion>, UnboundedReceiver<Completion>) {
    unbounded_channel()
}

/// Work left for after the ring lock is released.
enum Followup {
    Done,
    Resume(TrafficClass),
    ReleaseBeacon(TxControl),
}

/// Feeds completions into a [`Device`].
///
/// Holds the device weakly: the transport owning the sender usually lives
/// inside the device, so the channel only closes once the device is gone.
pub struct Dispatcher<T: UsbTransport, U: Upstream, C: DescriptorCodec = PlainDescriptor> {
    device: Weak<Device<T, U, C>>,
    completions: UnboundedReceiver<Completion>,
}

impl<T: UsbTransport, U: Upstream, C: DescriptorCodec> Dispatcher<T, U, C> {
    /// Creates a dispatcher feeding `device` from `completions`.
    pub fn new(device: &Arc<Device<T, U, C>>, completions: UnboundedReceiver<Completion>) -> Self {
        Self {
            device: Arc::downgrade(device),
            completions,
        }
    }

    /// Handles completions until the channel closes or the device is
    /// dropped. Returns the number handled.
    pub async fn run(mut self) -> u64 {
        let mut handled = 0;
        while let Some(completion) = self.completions.recv().await {
            let Some(device) = self.device.upgrade() else {
                break;
            };
            device.complete_transfer(completion);
            handled += 1;
        }
        debug!("Dispatcher stopped after {} completions", handled);
        handled
    }

    /// Handles every completion already queued, without waiting.
    pub fn dispatch_pending(&mut self) -> usize {
        let Some(device) = self.device.upgrade() else {
            return 0;
        };
        let mut handled = 0;
        while let Ok(completion) = self.completions.try_recv() {
            device.complete_transfer(completion);
            handled += 1;
        }
        handled
    }
}

impl<T: UsbTransport, U: Upstream, C: DescriptorCodec> Device<T, U, C> {
    /// Processes one finished transfer.
    ///
    /// The buffer goes back to its slot unless the slot already holds a
    /// replacement or was re-armed since. Everything else is skipped when
    /// the radio is off, the transfer belongs to an earlier epoch, the slot
    /// is not device-owned, or the slot is not at the drain cursor.
    pub fn complete_transfer(&self, completion: Completion) {
        let Completion {
            id,
            status,
            buffer,
            actual_length,
        } = completion;

        let Some(mut ring) = self.lock_ring(id.ring) else {
            warn!("Completion for unknown ring {}", id.ring);
            return;
        };
        let Some(slot) = ring.slot_mut(id.index) else {
            warn!("Completion for unknown {} entry {}", id.ring, id.index);
            return;
        };
        if !slot.is_allocated() {
            trace!("{} entry {} released, dropping buffer", id.ring, id.index);
            return;
        }

        let enabled = self.is_radio_enabled();
        let current = enabled && id.epoch == self.epoch();
        // Re-armed after a re-enable: a newer transfer owns the slot.
        let superseded = enabled && !current && slot.owner() == Owner::Device;
        if superseded {
            trace!("{} entry {} re-armed, dropping stale buffer", id.ring, id.index);
        } else if !slot.restore_buffer(buffer) {
            if current {
                warn!("{} entry {} completed while holding a buffer", id.ring, id.index);
            } else {
                trace!("{} entry {} already replenished", id.ring, id.index);
            }
        }

        if !current {
            trace!(
                "Ignoring {} entry {} from epoch {} (radio {})",
                id.ring,
                id.index,
                id.epoch,
                if enabled { "on" } else { "off" }
            );
            ring.stats_mut().ignored += 1;
            return;
        }
        let owner = slot.owner();
        if owner != Owner::Device {
            debug!("{} entry {} completed while {:?}", id.ring, id.index, owner);
            ring.stats_mut().ignored += 1;
            return;
        }
        if id.index != ring.drain_cursor() {
            warn!(
                "{} entry {} completed out of order, expected entry {}",
                id.ring,
                id.index,
                ring.drain_cursor()
            );
            ring.stats_mut().ignored += 1;
            return;
        }
        if !status.is_success() {
            ring.stats_mut().failed += 1;
        }

        let followup = match id.ring {
            RingId::Rx => self.rx_done(&mut ring, status, actual_length),
            RingId::Tx(TrafficClass::Beacon) => self.beacon_done(&mut ring),
            RingId::Tx(class) => self.tx_done(&mut ring, class, status),
        };
        drop(ring);

        match followup {
            Followup::Done => {}
            Followup::Resume(class) => self.upstream.resume(class),
            Followup::ReleaseBeacon(control) => self.upstream.release_beacon(control),
        }
    }

    fn tx_done(&self, ring: &mut Ring, class: TrafficClass, status: TransferStatus) -> Followup {
        let was_full = ring.is_full();
        let desc_size = ring.config().desc_size;

        let slot = ring.next_done();
        if let Some(control) = slot.take_control() {
            let length = slot.length();
            let payload = slot
                .buffer()
                .and_then(|buffer| buffer.get(desc_size..length))
                .unwrap_or(&[]);
            self.upstream
                .report_tx_outcome(&control, payload, TxOutcome::from(status));
        }
        let _ = slot.complete();
        ring.advance_drain();

        if was_full {
            Followup::Resume(class)
        } else {
            Followup::Done
        }
    }

    fn rx_done(&self, ring: &mut Ring, status: TransferStatus, actual_length: usize) -> Followup {
        let entry_size = ring.config().entry_size();

        let slot = ring.next_done();
        if let Some(buffer) = slot.buffer() {
            let length = actual_length.min(buffer.len());
            self.upstream.receive(&buffer[..length], status);
        }
        let _ = slot.complete();
        ring.advance_drain();

        let index = ring.fill_cursor();
        let slot = ring.claim_next();
        if let Err(owner) = slot.claim() {
            warn!("Rx entry {} not free for rearm ({:?})", index, owner);
            return Followup::Done;
        }
        if let Some(buffer) = slot.buffer_mut() {
            buffer.resize(entry_size, 0);
        }
        if let Err(err) = self.submit_claimed(ring, self.epoch()) {
            ring.claim_next().reset();
            error!("Failed to rearm rx entry {}: {}", index, err);
        }
        Followup::Done
    }

    fn beacon_done(&self, ring: &mut Ring) -> Followup {
        let index = ring.drain_cursor();
        let slot = ring.next_done();
        match slot.role() {
            SlotRole::Guardian => {
                let _ = slot.complete();
                ring.advance_drain();

                let parked = ring.claim_next();
                if parked.role() != SlotRole::Beacon || parked.owner() != Owner::Producer {
                    warn!("Guardian entry {} completed without a parked beacon", index);
                    return Followup::Done;
                }
                if let Err(err) = self.submit_claimed(ring, self.epoch()) {
                    warn!("Beacon submission failed: {}", err);
                    return match ring.claim_next().reset() {
                        Some(control) => Followup::ReleaseBeacon(control),
                        None => Followup::Done,
                    };
                }
                trace!("Guardian entry {} done, beacon submitted", index);
                Followup::Done
            }
            SlotRole::Beacon => {
                let control = slot.take_control();
                let _ = slot.complete();
                ring.advance_drain();
                trace!("Beacon entry {} done", index);
                control.map_or(Followup::Done, Followup::ReleaseBeacon)
            }
            SlotRole::Payload => {
                warn!("Untagged entry {} on the beacon ring", index);
                let _ = slot.complete();
                ring.advance_drain();
                Followup::Done
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::{data_frame, setup};
    use crate::upstream::UpstreamEvent;

    #[test]
    fn test_dispatch_pending_drains_queue() {
        let (device, usb, up, mut dispatcher) = setup(1, 4);
        let class = TrafficClass::Data(0);
        device.submit_frame(class, &data_frame(class, 1, b"ab")).unwrap();
        device.submit_frame(class, &data_frame(class, 2, b"cd")).unwrap();

        assert_eq!(usb.complete_all(TransferStatus::Success), 3);
        assert_eq!(dispatcher.dispatch_pending(), 3);
        assert_eq!(dispatcher.dispatch_pending(), 0);
        assert_eq!(
            up.outcomes(),
            vec![(1, TxOutcome::Success), (2, TxOutcome::Success)]
        );
    }

    #[tokio::test]
    async fn test_run_stops_when_device_dropped() {
        let (device, usb, up, dispatcher) = setup(1, 4);
        let class = TrafficClass::Data(0);
        device.submit_frame(class, &data_frame(class, 9, b"xyz")).unwrap();

        let task = tokio::spawn(dispatcher.run());
        assert!(usb.complete_next(RingId::Tx(class), TransferStatus::Success));
        tokio::task::yield_now().await;
        while up.outcomes().is_empty() {
            tokio::task::yield_now().await;
        }

        drop(device);
        drop(usb);
        let handled = task.await.unwrap();
        assert!(handled >= 1);
        assert!(matches!(
            up.events().last(),
            Some(UpstreamEvent::TxOutcome { cookie: 9, .. })
        ));
    }
}
