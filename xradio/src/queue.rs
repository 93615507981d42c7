//! Traffic classes and ring identifiers.

use core::fmt;

/// Transmit traffic class, one ring per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficClass {
    /// Data queue with the given priority index (0 is highest).
    Data(u8),

    /// Beacon queue, driven through the guardian/beacon protocol.
    Beacon,
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficClass::Data(prio) => write!(f, "data{}", prio),
            TrafficClass::Beacon => write!(f, "beacon"),
        }
    }
}

/// Identifies one ring of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RingId {
    /// The receive ring.
    Rx,

    /// A transmit ring.
    Tx(TrafficClass),
}

impl RingId {
    /// Returns the traffic class of a transmit ring.
    pub const fn class(&self) -> Option<TrafficClass> {
        match self {
            RingId::Rx => None,
            RingId::Tx(class) => Some(*class),
        }
    }
}

impl fmt::Display for RingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingId::Rx => write!(f, "rx"),
            RingId::Tx(class) => write!(f, "tx/{}", class),
        }
    }
}

impl From<TrafficClass> for RingId {
    fn from(class: TrafficClass) -> Self {
        RingId::Tx(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_id_display() {
        assert_eq!(RingId::Rx.to_string(), "rx");
        assert_eq!(RingId::Tx(TrafficClass::Data(1)).to_string(), "tx/data1");
        assert_eq!(RingId::from(TrafficClass::Beacon).to_string(), "tx/beacon");
    }

    #[test]
    fn test_ring_id_class() {
        assert_eq!(RingId::Rx.class(), None);
        assert_eq!(RingId::Tx(TrafficClass::Beacon).class(), Some(TrafficClass::Beacon));
    }
}
