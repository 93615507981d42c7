//! # XRadio - USB Packet Radio Ring Pipeline
//!
//! XRadio drives the transmit/receive data path of a packet radio
//! attached over USB. A fixed set of pre-allocated buffer slots is shared
//! between three actors:
//!
//! - **Producer**: frame submission from the upper networking stack
//! - **Device**: the USB transport completing transfers asynchronously
//! - **Consumer**: completion bookkeeping in the dispatcher
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Upper Networking Stack                   │
//! │        pause / resume / report_tx_outcome / receive      │
//! ├─────────────────────────────────────────────────────────┤
//! │                        Device                            │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────┐   │
//! │  │  Lifecycle  │ │  Tx Submit  │ │ Beacon Protocol │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────┘   │
//! │  ┌─────────────────────────┐ ┌─────────────────────┐   │
//! │  │  Completion Dispatcher  │ │   Control Channel   │   │
//! │  └─────────────────────────┘ └─────────────────────┘   │
//! ├─────────────────────────────────────────────────────────┤
//! │                    Rings of Slots                        │
//! │       rx │ data0 │ data1 │ ... │ beacon                 │
//! ├─────────────────────────────────────────────────────────┤
//! │                    USB Transport                         │
//! │   alloc / submit / cancel / control request  ──► channel │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use xradio::{completion_channel, Device, DeviceConfig, Dispatcher, Frame, TrafficClass};
//!
//! let (tx, rx) = completion_channel();
//! let transport = Arc::new(MyUsb::new(tx));
//! let device = Arc::new(Device::new(DeviceConfig::default(), transport, upstream, codec)?);
//!
//! device.initialize()?;
//! device.enable_radio()?;
//! tokio::spawn(Dispatcher::new(&device, rx).run());
//!
//! device.submit_frame(TrafficClass::Data(0), &frame)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod frame;
pub mod queue;
pub mod transport;
pub mod upstream;

// Re-export commonly used types
pub use buffer::{Owner, Ring, RingSnapshot, RingStats, Slot, SlotRole};
pub use config::{DeviceConfig, RingConfig, VendorCommand};
pub use control::ControlChannel;
pub use device::{BeaconPhase, Device, Dispatcher, completion_channel};
pub use error::{Error, Result};
pub use frame::{DescriptorCodec, Frame, PlainDescriptor, TxControl};
pub use queue::{RingId, TrafficClass};
pub use transport::{
    Completion, Direction, LoopbackUsb, SubmitError, Transfer, TransferHandle, TransferId,
    TransferStatus, UsbTransport,
};
pub use upstream::{RecordingUpstream, TxOutcome, Upstream, UpstreamEvent};

/// Vendor request: switch device mode.
pub const USB_DEVICE_MODE: u8 = 0x01;

/// Vendor request: write a single register word (no data stage).
pub const USB_SINGLE_WRITE: u8 = 0x02;

/// Vendor request: read a single register word.
pub const USB_SINGLE_READ: u8 = 0x03;

/// Vendor request: write a register block.
pub const USB_MULTI_WRITE: u8 = 0x06;

/// Vendor request: read a register block.
pub const USB_MULTI_READ: u8 = 0x07;

/// Vendor request: start/stop hardware reception.
pub const USB_RX_CONTROL: u8 = 0x0c;

/// Number of attempts for a control request before giving up.
pub const REGISTER_BUSY_COUNT: u32 = 5;

/// Per-attempt control request timeout in milliseconds.
pub const REGISTER_TIMEOUT_MS: u16 = 500;

/// Bulk endpoint used for receive transfers.
pub const BULK_IN_ENDPOINT: u8 = 1;

/// Bulk endpoint used for transmit and beacon transfers.
pub const BULK_OUT_ENDPOINT: u8 = 1;

/// Maximum data frame payload.
pub const DATA_FRAME_SIZE: usize = 2432;

/// Maximum management (beacon) frame payload.
pub const MGMT_FRAME_SIZE: usize = 256;
