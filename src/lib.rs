//! SLCANX Protocol Implementation for Rust
//!
//! This crate is a host-side driver for four-channel CAN / CAN FD adapters
//! that speak the SLCANX ASCII line protocol over a single serial port.
//! Every command carries a leading channel digit (`0`-`3`), so four
//! independent CAN buses share one link.
//!
//! # Features
//!
//! - Classic CAN and CAN FD (with bit-rate switch), standard and extended IDs
//! - Remote frames
//! - Predefined and custom bit-rates, sample points and raw bit timing
//! - Outbound commands from all channels coalesced into batched writes
//!   (at most 2048 characters, 125 µs window)
//! - Inbound frames delivered to per-channel observers or queues
//!
//! # Example
//!
//! ```no_run
//! use slcanx::{BitTiming, CanFrame, Slcanx};
//!
//! fn main() -> slcanx::Result<()> {
//!     let dev = Slcanx::new("/dev/ttyACM0");
//!     dev.open()?;
//!
//!     // CAN FD on channel 1: 500 kbit/s nominal, 2 Mbit/s data phase
//!     let ch = dev.channel(1)?;
//!     ch.close();
//!     ch.set_nominal_timing(&BitTiming::new(80, 4, 31, 8, 8));
//!     ch.set_data_bitrate(2_000_000)?;
//!     ch.open();
//!
//!     ch.on_frame(|frame| println!("RX  {}", frame));
//!
//!     let data: Vec<u8> = (0..16).collect();
//!     ch.send(&CanFrame::new_fd(0x123, &data, true));
//!
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//!     dev.close();
//!     Ok(())
//! }
//! ```
//!
//! # Threading
//!
//! While open, the engine runs one read thread and one write thread.
//! Sending never blocks on I/O. Observers registered with
//! [`Channel::on_frame`] run on the read thread.

pub mod channel;
pub mod constants;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod queue;
pub mod structures;
pub mod transport;

// Re-export main types at crate root
pub use constants::{
    BATCH_LIMIT, BATCH_WINDOW, CANFD_MAX_DLEN, CAN_MAX_DLEN, DEFAULT_BAUD_RATE,
    SLCANX_CHANNEL_COUNT,
};

pub use channel::Channel;
pub use device::{Slcanx, SlcanxConfig};
pub use error::{DecodeError, Result, SlcanxError};
pub use frame::{dlc_to_len, len_to_dlc, CanFrame};
pub use structures::{BitTiming, SamplePoint, StatsSnapshot};
pub use transport::{Connection, LineReader, LineWriter, SerialConnection};
