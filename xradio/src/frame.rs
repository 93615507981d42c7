//! Outgoing frames and transmit descriptor encoding.
//!
//! The descriptor layout is chipset specific, so the device only calls
//! through [`DescriptorCodec`]. [`PlainDescriptor`] is a minimal layout
//! used by the loopback transport and the simulator.

use crate::queue::TrafficClass;

/// Per-frame metadata kept in the slot until the transfer completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxControl {
    /// Queue the frame was submitted to.
    pub queue: TrafficClass,

    /// Opaque value handed back with the completion report.
    pub cookie: u64,

    /// Retry limit programmed into the descriptor.
    pub retry_limit: u8,

    /// Whether the frame expects an acknowledgment.
    pub no_ack: bool,
}

impl TxControl {
    /// Creates metadata for the given queue.
    pub const fn new(queue: TrafficClass, cookie: u64) -> Self {
        Self {
            queue,
            cookie,
            retry_limit: 7,
            no_ack: false,
        }
    }

    /// Sets the retry limit.
    pub fn with_retry_limit(mut self, limit: u8) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Marks the frame as not acknowledged.
    pub fn with_no_ack(mut self) -> Self {
        self.no_ack = true;
        self
    }
}

/// A frame handed down by the upper stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 802.11 header and body, without descriptor.
    pub data: Vec<u8>,

    /// Metadata reported back on completion.
    pub control: TxControl,
}

impl Frame {
    /// Creates a frame from its bytes and metadata.
    pub fn new(data: impl Into<Vec<u8>>, control: TxControl) -> Self {
        Self {
            data: data.into(),
            control,
        }
    }

    /// Returns the frame length without descriptor.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for an empty frame.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Writes the transmit descriptor in front of a frame.
pub trait DescriptorCodec: Send + Sync {
    /// Fills `desc` (exactly the ring's descriptor size) for `frame`.
    fn write_tx_desc(&self, desc: &mut [u8], frame: &Frame);
}

/// Minimal descriptor: length, queue, flags, retry limit and cookie.
///
/// ```text
/// 0      2       3       4       5       8              12
/// ┌──────┬───────┬───────┬───────┬───────┬──────────────┐
/// │ len  │ queue │ flags │ retry │  rsvd │ cookie (low) │
/// └──────┴───────┴───────┴───────┴───────┴──────────────┘
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainDescriptor;

/// Flag bit: frame does not expect an acknowledgment.
pub const DESC_FLAG_NO_ACK: u8 = 0x01;

/// Flag bit: frame is a beacon.
pub const DESC_FLAG_BEACON: u8 = 0x02;

impl DescriptorCodec for PlainDescriptor {
    fn write_tx_desc(&self, desc: &mut [u8], frame: &Frame) {
        let mut header = [0u8; 12];
        let len = u16::try_from(frame.len()).unwrap_or(u16::MAX);
        header[0..2].copy_from_slice(&len.to_le_bytes());
        let (queue, mut flags) = match frame.control.queue {
            TrafficClass::Data(prio) => (prio, 0),
            TrafficClass::Beacon => (0xff, DESC_FLAG_BEACON),
        };
        if frame.control.no_ack {
            flags |= DESC_FLAG_NO_ACK;
        }
        header[2] = queue;
        header[3] = flags;
        header[4] = frame.control.retry_limit;
        header[8..12].copy_from_slice(&(frame.control.cookie as u32).to_le_bytes());

        desc.fill(0);
        let n = core::cmp::min(desc.len(), header.len());
        desc[..n].copy_from_slice(&header[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_descriptor_layout() {
        let frame = Frame::new(
            vec![0xAA; 300],
            TxControl::new(TrafficClass::Data(1), 0x1234_5678).with_no_ack(),
        );
        let mut desc = [0xFFu8; 24];
        PlainDescriptor.write_tx_desc(&mut desc, &frame);

        assert_eq!(u16::from_le_bytes([desc[0], desc[1]]), 300);
        assert_eq!(desc[2], 1);
        assert_eq!(desc[3], DESC_FLAG_NO_ACK);
        assert_eq!(desc[4], 7);
        assert_eq!(&desc[8..12], &0x1234_5678u32.to_le_bytes());
        assert!(desc[12..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_plain_descriptor_short_reserve() {
        let frame = Frame::new(vec![1, 2, 3], TxControl::new(TrafficClass::Beacon, 9));
        let mut desc = [0u8; 4];
        PlainDescriptor.write_tx_desc(&mut desc, &frame);
        assert_eq!(desc, [3, 0, 0xff, DESC_FLAG_BEACON]);
    }

    #[test]
    fn test_plain_descriptor_saturates_length() {
        let frame = Frame::new(vec![0u8; 70_000], TxControl::new(TrafficClass::Data(0), 1));
        let mut desc = [0u8; 12];
        PlainDescriptor.write_tx_desc(&mut desc, &frame);
        assert_eq!(u16::from_le_bytes([desc[0], desc[1]]), u16::MAX);
    }
}
