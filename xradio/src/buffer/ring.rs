//! Fixed-capacity ring of transfer slots.
//!
//! The producer claims the slot at the fill cursor, the completion path
//! releases the slot at the drain cursor. Both cursors only move forward
//! (mod `limit`), so completions are consumed in submission order.
//!
//! A transmit ring keeps one slot unused: it is full once
//! `(fill + 1) % limit == drain`, so the cursor distance always equals the
//! number of device-owned slots.

use super::slot::{Owner, Slot};
use crate::config::RingConfig;
use crate::frame::TxControl;
use crate::queue::RingId;

/// Counters kept per ring.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    /// Transfers handed to the transport.
    pub submitted: u64,

    /// Completions consumed.
    pub completed: u64,

    /// Completions reported with a transport error.
    pub failed: u64,

    /// Submissions refused because the ring was full or inconsistent.
    pub backpressure: u64,

    /// Completions ignored (radio off, stale or out of order).
    pub ignored: u64,
}

impl RingStats {
    /// Creates new empty statistics.
    pub const fn new() -> Self {
        Self {
            submitted: 0,
            completed: 0,
            failed: 0,
            backpressure: 0,
            ignored: 0,
        }
    }

    /// Resets all statistics.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Point-in-time copy of a ring's cursors and ownership flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingSnapshot {
    /// Fill cursor.
    pub fill: usize,
    /// Drain cursor.
    pub drain: usize,
    /// Slots in flight.
    pub queued: usize,
    /// Ring capacity.
    pub limit: usize,
    /// Owner of every slot, in index order.
    pub owners: Vec<Owner>,
}

impl RingSnapshot {
    /// Number of slots currently owned by the device.
    pub fn device_owned(&self) -> usize {
        self.owners.iter().filter(|&&o| o == Owner::Device).count()
    }

    /// Cursor distance, `(fill - drain) mod limit`.
    pub fn cursor_distance(&self) -> usize {
        (self.fill + self.limit - self.drain) % self.limit
    }
}

/// A circular FIFO of slots for one traffic class.
#[derive(Debug)]
pub struct Ring {
    id: RingId,

    config: RingConfig,

    /// The slots, allocated once.
    slots: Vec<Slot>,

    /// Next slot to be claimed by the producer.
    fill: usize,

    /// Next slot expected to complete.
    drain: usize,

    /// Slots submitted and not yet completed.
    queued: usize,

    stats: RingStats,
}

impl Ring {
    /// Creates a ring of `config.limit` unallocated slots.
    pub fn new(id: RingId, config: RingConfig) -> Self {
        Self {
            id,
            config,
            slots: (0..config.limit).map(|_| Slot::new()).collect(),
            fill: 0,
            drain: 0,
            queued: 0,
            stats: RingStats::new(),
        }
    }

    /// Returns which ring this is.
    #[inline]
    pub const fn id(&self) -> RingId {
        self.id
    }

    /// Returns the ring geometry.
    #[inline]
    pub const fn config(&self) -> &RingConfig {
        &self.config
    }

    /// Returns the ring capacity.
    #[inline]
    pub const fn limit(&self) -> usize {
        self.config.limit
    }

    /// Returns the number of slots in flight.
    #[inline]
    pub const fn queued(&self) -> usize {
        self.queued
    }

    /// Returns true once the fill cursor sits right behind the drain
    /// cursor, i.e. `limit - 1` slots are in flight.
    #[inline]
    pub const fn is_full(&self) -> bool {
        self.queued + 1 >= self.config.limit
    }

    /// Returns true if nothing is in flight.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// Returns the number of slots that can still be submitted.
    #[inline]
    pub const fn available(&self) -> usize {
        (self.config.limit - 1).saturating_sub(self.queued)
    }

    /// Index of the next slot to claim.
    #[inline]
    pub const fn fill_cursor(&self) -> usize {
        self.fill
    }

    /// Index of the next slot expected to complete.
    #[inline]
    pub const fn drain_cursor(&self) -> usize {
        self.drain
    }

    /// Returns the slot at the fill cursor.
    ///
    /// Does not touch ownership; check [`Ring::is_full`] first.
    pub fn claim_next(&mut self) -> &mut Slot {
        &mut self.slots[self.fill]
    }

    /// Returns the slot at the drain cursor.
    pub fn next_done(&mut self) -> &mut Slot {
        &mut self.slots[self.drain]
    }

    /// Returns the slot at `index`.
    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Returns the slot at `index` mutably.
    pub fn slot_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index)
    }

    /// Iterates slots in index order.
    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Iterates slots mutably in index order.
    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.iter_mut()
    }

    /// Advances the fill cursor after a successful submission.
    pub fn advance_fill(&mut self) {
        debug_assert!(self.queued < self.config.limit);
        self.fill = (self.fill + 1) % self.config.limit;
        self.queued += 1;
        self.stats.submitted += 1;
    }

    /// Advances the drain cursor after a completion freed its slot.
    pub fn advance_drain(&mut self) {
        debug_assert!(self.queued > 0);
        self.drain = (self.drain + 1) % self.config.limit;
        self.queued -= 1;
        self.stats.completed += 1;
    }

    /// Rewinds both cursors and frees every slot.
    ///
    /// Returns the frame metadata still held by slots, in slot order; those
    /// frames will never complete.
    pub fn reset(&mut self) -> Vec<TxControl> {
        self.fill = 0;
        self.drain = 0;
        self.queued = 0;
        self.slots.iter_mut().filter_map(|slot| slot.reset()).collect()
    }

    /// Returns the ring counters.
    pub fn stats(&self) -> &RingStats {
        &self.stats
    }

    /// Returns the ring counters mutably.
    pub fn stats_mut(&mut self) -> &mut RingStats {
        &mut self.stats
    }

    /// Copies cursors and ownership flags.
    pub fn snapshot(&self) -> RingSnapshot {
        RingSnapshot {
            fill: self.fill,
            drain: self.drain,
            queued: self.queued,
            limit: self.config.limit,
            owners: self.slots.iter().map(|s| s.owner()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TrafficClass;

    fn ring(limit: usize) -> Ring {
        Ring::new(RingId::Tx(TrafficClass::Data(0)), RingConfig::new(limit, 32, 4))
    }

    fn submit(ring: &mut Ring) {
        let slot = ring.claim_next();
        slot.claim().unwrap();
        slot.hand_to_device().unwrap();
        ring.advance_fill();
    }

    fn complete(ring: &mut Ring) {
        ring.next_done().complete().unwrap();
        ring.advance_drain();
    }

    #[test]
    fn test_fill_until_full() {
        let mut ring = ring(3);
        assert!(ring.is_empty());

        submit(&mut ring);
        assert!(!ring.is_full());
        assert_eq!(ring.available(), 1);
        submit(&mut ring);
        assert!(ring.is_full());
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.fill_cursor(), 2);
        assert_eq!((ring.fill_cursor() + 1) % ring.limit(), ring.drain_cursor());

        let snap = ring.snapshot();
        assert_eq!(snap.device_owned(), 2);
        assert_eq!(snap.cursor_distance(), 2);
    }

    #[test]
    fn test_wrap_around() {
        let mut ring = ring(4);

        for _ in 0..3 {
            submit(&mut ring);
        }
        complete(&mut ring);
        complete(&mut ring);
        submit(&mut ring);
        submit(&mut ring);

        // fill wrapped to 1, drain sits at 2
        assert_eq!(ring.fill_cursor(), 1);
        assert_eq!(ring.drain_cursor(), 2);
        assert_eq!(ring.queued(), 3);

        let snap = ring.snapshot();
        assert_eq!(snap.cursor_distance(), 3);
        assert_eq!(snap.device_owned(), 3);
        assert_eq!(snap.owners[1], Owner::Free);
    }

    #[test]
    fn test_cursor_invariant_over_many_cycles() {
        let mut ring = ring(5);
        for round in 0..23 {
            if ring.is_full() {
                complete(&mut ring);
            }
            submit(&mut ring);
            if round % 3 == 0 {
                complete(&mut ring);
            }
            let snap = ring.snapshot();
            assert_eq!(snap.device_owned(), snap.queued);
            assert_eq!(snap.cursor_distance(), snap.device_owned());
            assert!(snap.queued < snap.limit);
        }
    }

    #[test]
    fn test_reset() {
        let mut ring = ring(2);
        submit(&mut ring);
        ring.claim_next().claim().unwrap();
        ring.claim_next()
            .set_control(crate::frame::TxControl::new(TrafficClass::Data(0), 1));

        let dropped = ring.reset();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].cookie, 1);
        assert!(ring.is_empty());
        assert_eq!(ring.fill_cursor(), 0);
        assert!(ring.slots().all(|s| s.is_free()));
    }

    #[test]
    fn test_stats() {
        let mut ring = ring(2);
        submit(&mut ring);
        complete(&mut ring);
        assert_eq!(ring.stats().submitted, 1);
        assert_eq!(ring.stats().completed, 1);
        ring.stats_mut().reset();
        assert_eq!(*ring.stats(), RingStats::default());
    }
}
