//! Slot and ring management for the transfer pipeline.
//!
//! This module provides the buffer abstractions:
//! - Slot: one transfer buffer with its ownership state
//! - Ring: fixed-capacity FIFO of slots with fill/drain cursors

mod ring;
mod slot;

pub use ring::{Ring, RingSnapshot, RingStats};
pub use slot::{Owner, Slot, SlotRole};
