//! Synchronous control channel to the device.
//!
//! Register and command access goes through vendor requests on endpoint
//! 0. The device answers busy while it is processing a previous command,
//! so every request is retried up to `register_busy_count` times.

use std::sync::Arc;

use log::{error, trace};

use crate::config::{DeviceConfig, VendorCommand};
use crate::error::{Error, Result};
use crate::transport::{Direction, UsbTransport};
use crate::{USB_MULTI_READ, USB_MULTI_WRITE};

/// Vendor request access with bounded retry.
pub struct ControlChannel<T> {
    transport: Arc<T>,
    busy_count: u32,
    timeout_ms: u16,
}

impl<T: UsbTransport> ControlChannel<T> {
    /// Creates a channel with the retry settings of `config`.
    pub fn new(transport: Arc<T>, config: &DeviceConfig) -> Self {
        Self {
            transport,
            busy_count: config.register_busy_count,
            timeout_ms: config.register_timeout_ms,
        }
    }

    /// Returns the number of attempts per request.
    pub fn busy_count(&self) -> u32 {
        self.busy_count
    }

    /// Issues a vendor request, retrying while the device reports an error.
    ///
    /// Succeeds on the first non-negative status. After `busy_count`
    /// failed attempts the last status is returned in the error.
    pub fn vendor_request(
        &self,
        request: u8,
        direction: Direction,
        offset: u16,
        value: u32,
        buffer: &mut [u8],
    ) -> Result<()> {
        let mut status = 0;
        for attempt in 0..self.busy_count {
            status = self.transport.control_request(
                request,
                direction,
                offset,
                value,
                buffer,
                self.timeout_ms,
            );
            if status >= 0 {
                return Ok(());
            }
            trace!(
                "Vendor request 0x{:02x} busy (attempt {}, status {})",
                request,
                attempt + 1,
                status
            );
        }

        error!(
            "Vendor request error. Request 0x{:02x} failed for offset 0x{:04x} with error {}.",
            request, offset, status
        );
        Err(Error::VendorRequest {
            request,
            offset,
            status,
        })
    }

    /// Vendor request without a data stage.
    pub fn vendor_request_sw(&self, request: u8, offset: u16, value: u32) -> Result<()> {
        self.vendor_request(request, Direction::Out, offset, value, &mut [])
    }

    /// Sends a prepared register command.
    pub fn send(&self, command: &VendorCommand) -> Result<()> {
        self.vendor_request_sw(command.request, command.offset, command.value)
    }

    /// Reads a 32-bit little-endian register.
    pub fn register_read(&self, offset: u16) -> Result<u32> {
        let mut word = [0u8; 4];
        self.vendor_request(USB_MULTI_READ, Direction::In, offset, 0, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Writes a 32-bit little-endian register.
    pub fn register_write(&self, offset: u16, value: u32) -> Result<()> {
        let mut word = value.to_le_bytes();
        self.vendor_request(USB_MULTI_WRITE, Direction::Out, offset, 0, &mut word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackUsb;
    use crate::{USB_RX_CONTROL, USB_SINGLE_WRITE};
    use tokio::sync::mpsc::unbounded_channel;

    fn channel(busy_count: u32) -> (Arc<LoopbackUsb>, ControlChannel<LoopbackUsb>) {
        let (tx, _rx) = unbounded_channel();
        let usb = Arc::new(LoopbackUsb::new(tx));
        let config = DeviceConfig::new().with_register_busy_count(busy_count);
        let control = ControlChannel::new(usb.clone(), &config);
        (usb, control)
    }

    #[test]
    fn test_always_failing_request_attempts_exact_bound() {
        let (usb, control) = channel(5);
        usb.fail_requests(usize::MAX, -110);

        let err = control.vendor_request_sw(USB_RX_CONTROL, 0x0000, 0).unwrap_err();
        assert_eq!(
            err,
            Error::VendorRequest {
                request: USB_RX_CONTROL,
                offset: 0,
                status: -110,
            }
        );
        assert_eq!(usb.requests().len(), 5);
    }

    #[test]
    fn test_transient_busy_is_retried() {
        let (usb, control) = channel(5);
        usb.fail_requests(3, -16);

        assert!(control.vendor_request_sw(USB_SINGLE_WRITE, 0x0400, 1).is_ok());
        assert_eq!(usb.requests().len(), 4);
    }

    #[test]
    fn test_first_success_stops_retrying() {
        let (usb, control) = channel(5);
        control.vendor_request_sw(USB_SINGLE_WRITE, 0x0400, 1).unwrap();
        assert_eq!(usb.requests().len(), 1);
    }

    #[test]
    fn test_register_round_trip() {
        let (usb, control) = channel(2);
        control.register_write(0x0460, 0x00c0_ffee).unwrap();
        assert_eq!(usb.register(0x0460), Some(0x00c0_ffee));
        assert_eq!(control.register_read(0x0460).unwrap(), 0x00c0_ffee);
    }
}
