//! Device and ring configuration.

use crate::error::{Error, Result};
use crate::{DATA_FRAME_SIZE, MGMT_FRAME_SIZE, REGISTER_BUSY_COUNT, REGISTER_TIMEOUT_MS, USB_SINGLE_WRITE};

/// Receive descriptor size in bytes.
pub const RXD_DESC_SIZE: usize = 4 * 4;

/// Transmit descriptor size in bytes.
pub const TXD_DESC_SIZE: usize = 6 * 4;

/// Register controlling beacon generation.
pub const BEACON_CSR: u16 = 0x0452;

/// Geometry of one ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    /// Number of slots.
    pub limit: usize,

    /// Maximum frame payload per slot.
    pub data_size: usize,

    /// Descriptor (header reserve) bytes in front of the payload.
    pub desc_size: usize,
}

impl RingConfig {
    /// Creates a ring geometry.
    pub const fn new(limit: usize, data_size: usize, desc_size: usize) -> Self {
        Self {
            limit,
            data_size,
            desc_size,
        }
    }

    /// Bytes of one slot buffer: descriptor plus payload.
    pub const fn entry_size(&self) -> usize {
        self.desc_size + self.data_size
    }
}

/// A register write sent over the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorCommand {
    /// Vendor request code.
    pub request: u8,
    /// Register offset.
    pub offset: u16,
    /// Value written.
    pub value: u32,
}

/// Ring geometry and control-channel tuning of a device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Receive ring.
    pub rx: RingConfig,
    /// Geometry shared by every data queue.
    pub tx: RingConfig,
    /// Number of data queues, highest priority first.
    pub tx_queues: usize,
    /// Beacon ring; needs at least two slots.
    pub beacon: RingConfig,
    /// Attempts per vendor request.
    pub register_busy_count: u32,
    /// Timeout of a single attempt.
    pub register_timeout_ms: u16,
    /// Command issued after the guardian byte to start periodic beacons.
    pub beacon_kick: VendorCommand,
}

impl DeviceConfig {
    /// Defaults matching an rt2570-class device.
    pub fn new() -> Self {
        Self {
            rx: RingConfig::new(32, DATA_FRAME_SIZE, RXD_DESC_SIZE),
            tx: RingConfig::new(32, DATA_FRAME_SIZE, TXD_DESC_SIZE),
            tx_queues: 2,
            beacon: RingConfig::new(4, MGMT_FRAME_SIZE, TXD_DESC_SIZE),
            register_busy_count: REGISTER_BUSY_COUNT,
            register_timeout_ms: REGISTER_TIMEOUT_MS,
            beacon_kick: VendorCommand {
                request: USB_SINGLE_WRITE,
                offset: BEACON_CSR,
                value: 0x0007,
            },
        }
    }

    /// Sets the receive ring geometry.
    pub fn with_rx_ring(mut self, ring: RingConfig) -> Self {
        self.rx = ring;
        self
    }

    /// Sets the geometry shared by the data rings.
    pub fn with_tx_ring(mut self, ring: RingConfig) -> Self {
        self.tx = ring;
        self
    }

    /// Sets the number of data queues.
    pub fn with_tx_queues(mut self, count: usize) -> Self {
        self.tx_queues = count;
        self
    }

    /// Sets the beacon ring geometry.
    pub fn with_beacon_ring(mut self, ring: RingConfig) -> Self {
        self.beacon = ring;
        self
    }

    /// Sets the attempts per vendor request.
    pub fn with_register_busy_count(mut self, count: u32) -> Self {
        self.register_busy_count = count;
        self
    }

    /// Sets the per-attempt timeout in milliseconds.
    pub fn with_register_timeout(mut self, timeout_ms: u16) -> Self {
        self.register_timeout_ms = timeout_ms;
        self
    }

    /// Sets the command that starts beacon generation.
    pub fn with_beacon_kick(mut self, kick: VendorCommand) -> Self {
        self.beacon_kick = kick;
        self
    }

    /// Checks the geometry before any ring is built.
    pub fn validate(&self) -> Result<()> {
        if self.rx.limit == 0 {
            return Err(Error::InvalidConfig("ring limit must be non-zero"));
        }
        // A transmit ring keeps one slot free to tell full from empty.
        if self.tx.limit < 2 {
            return Err(Error::InvalidConfig("data ring needs at least two slots"));
        }
        // Transmit descriptors carry the frame length in 16 bits.
        if self.tx.data_size > u16::MAX as usize || self.beacon.data_size > u16::MAX as usize {
            return Err(Error::InvalidConfig("transmit frame size exceeds 16 bits"));
        }
        if self.tx_queues == 0 || self.tx_queues > u8::MAX as usize {
            return Err(Error::InvalidConfig("data queue count out of range"));
        }
        // Guardian and beacon occupy two consecutive slots.
        if self.beacon.limit < 2 {
            return Err(Error::InvalidConfig("beacon ring needs at least two slots"));
        }
        if self.register_busy_count == 0 {
            return Err(Error::InvalidConfig("register busy count must be non-zero"));
        }
        Ok(())
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DeviceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tx.entry_size(), DATA_FRAME_SIZE + TXD_DESC_SIZE);
    }

    #[test]
    fn test_builder_chain() {
        let config = DeviceConfig::new()
            .with_tx_queues(4)
            .with_tx_ring(RingConfig::new(2, 64, 8))
            .with_register_busy_count(3);
        assert_eq!(config.tx_queues, 4);
        assert_eq!(config.tx.limit, 2);
        assert_eq!(config.register_busy_count, 3);
    }

    #[test]
    fn test_reject_single_slot_beacon_ring() {
        let config = DeviceConfig::new().with_beacon_ring(RingConfig::new(1, 64, 8));
        assert_eq!(
            config.validate(),
            Err(Error::InvalidConfig("beacon ring needs at least two slots"))
        );
    }

    #[test]
    fn test_reject_single_slot_data_ring() {
        let config = DeviceConfig::new().with_tx_ring(RingConfig::new(1, 64, 8));
        assert_eq!(
            config.validate(),
            Err(Error::InvalidConfig("data ring needs at least two slots"))
        );
    }

    #[test]
    fn test_reject_frame_size_beyond_descriptor_length() {
        let config = DeviceConfig::new().with_tx_ring(RingConfig::new(4, 70_000, 8));
        assert_eq!(
            config.validate(),
            Err(Error::InvalidConfig("transmit frame size exceeds 16 bits"))
        );
        let config = DeviceConfig::new().with_tx_ring(RingConfig::new(4, u16::MAX as usize, 8));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reject_zero_queues() {
        let config = DeviceConfig::new().with_tx_queues(0);
        assert!(config.validate().is_err());
    }
}
