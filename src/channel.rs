//! Logical CAN channel
//!
//! A `Channel` is one of the four lanes multiplexed onto the serial link.
//! Every call formats a command, stamps it with the channel index and
//! hands it to the shared command queue; nothing here blocks on I/O.
//!
//! Inbound frames reach registered observers synchronously on the read
//! loop thread. A slow observer stalls every channel, so heavy consumers
//! should use [`Channel::subscribe`] and process frames elsewhere.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use crossbeam_channel::{unbounded, Receiver};
use log::{debug, trace, warn};

use crate::constants::{
    CMD_CLOSE, CMD_LISTEN_ONLY, CMD_OPEN, CMD_SET_BITRATE, CMD_SET_FD_RATE, CMD_SET_RATE,
};
use crate::error::{DecodeError, Result};
use crate::frame::CanFrame;
use crate::queue::CommandSender;
use crate::structures::{data_rate_index, nominal_rate_index, BitTiming, SamplePoint, Stats};

type Observer = Arc<dyn Fn(&CanFrame) + Send + Sync>;

/// Receiving half of a channel, shared with the dispatcher
pub(crate) struct Inbound {
    index: usize,
    observers: RwLock<Vec<Observer>>,
    stats: Arc<Stats>,
}

impl Inbound {
    pub(crate) fn new(index: usize, stats: Arc<Stats>) -> Self {
        Self {
            index,
            observers: RwLock::new(Vec::new()),
            stats,
        }
    }

    fn register(&self, observer: Observer) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Decode a channel-stripped line and notify observers
    pub(crate) fn deliver(&self, payload: &str) {
        match CanFrame::parse(payload) {
            Ok(frame) => {
                Stats::bump(&self.stats.frames_delivered);
                // Snapshot so observers may register further observers.
                let observers = self
                    .observers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for observer in &observers {
                    // A panicking observer must not take the read loop down.
                    if panic::catch_unwind(AssertUnwindSafe(|| observer(&frame))).is_err() {
                        warn!("ch{}: frame observer panicked on {}", self.index, frame);
                    }
                }
            }
            Err(DecodeError::Empty | DecodeError::NotAFrame(_)) => {
                Stats::bump(&self.stats.non_frame_lines);
                debug!("ch{}: {:?}", self.index, payload);
            }
            Err(e) => {
                Stats::bump(&self.stats.lines_dropped);
                trace!("ch{}: dropped {:?}: {}", self.index, payload, e);
            }
        }
    }
}

/// One logical CAN channel of an SLCANX adapter
pub struct Channel {
    index: usize,
    commands: CommandSender,
    inbound: Arc<Inbound>,
}

impl Channel {
    pub(crate) fn new(index: usize, commands: CommandSender, stats: Arc<Stats>) -> Self {
        Self {
            index,
            commands,
            inbound: Arc::new(Inbound::new(index, stats)),
        }
    }

    pub(crate) fn inbound(&self) -> Arc<Inbound> {
        Arc::clone(&self.inbound)
    }

    /// Channel index (0-3)
    pub fn index(&self) -> usize {
        self.index
    }

    fn command(&self, command: &str) {
        self.commands.submit(self.index, command);
    }

    /// Open the channel on the bus
    pub fn open(&self) {
        self.command(&CMD_OPEN.to_string());
    }

    /// Close the channel on the bus
    pub fn close(&self) {
        self.command(&CMD_CLOSE.to_string());
    }

    /// Select a predefined nominal bit-rate (`S{index}`)
    pub fn set_rate(&self, table_index: u32) {
        self.command(&format!("{}{}", CMD_SET_RATE, table_index));
    }

    /// Set a custom numeric nominal bit-rate (`y{bitrate}`)
    pub fn set_bitrate(&self, bitrate: u32) {
        self.command(&format!("{}{}", CMD_SET_BITRATE, bitrate));
    }

    /// Select a predefined CAN FD data-phase rate (`Y{index}`)
    pub fn set_fd_rate(&self, table_index: u32) {
        self.command(&format!("{}{}", CMD_SET_FD_RATE, table_index));
    }

    /// Send a custom timing literal unchanged
    ///
    /// By convention the literal starts with `a` (nominal) or `A` (data
    /// phase); this is not checked.
    pub fn set_custom_timing(&self, literal: &str) {
        self.command(literal);
    }

    /// Set the nominal bit-rate in bits per second
    ///
    /// Rates in the adapter's table use `S{index}`, anything else `y{bitrate}`.
    ///
    /// # Supported table rates
    /// 10k, 20k, 50k, 100k, 125k, 250k, 500k, 800k, 1M
    pub fn set_nominal_bitrate(&self, bitrate: u32) {
        match nominal_rate_index(bitrate) {
            Some(index) => self.set_rate(index as u32),
            None => self.set_bitrate(bitrate),
        }
    }

    /// Set the CAN FD data-phase bit-rate in bits per second
    ///
    /// Only whole megabit rates from 1 to 15 Mbit/s are available.
    pub fn set_data_bitrate(&self, bitrate: u32) -> Result<()> {
        let index = data_rate_index(bitrate)?;
        self.set_fd_rate(index);
        Ok(())
    }

    /// Set nominal and/or data-phase sample points
    pub fn set_sample_point(&self, sample_point: SamplePoint) -> Result<()> {
        for command in sample_point.commands()? {
            self.command(&command);
        }
        Ok(())
    }

    /// Set the nominal phase bit timing registers
    pub fn set_nominal_timing(&self, timing: &BitTiming) {
        self.set_custom_timing(&timing.nominal_literal());
    }

    /// Set the CAN FD data phase bit timing registers
    pub fn set_data_timing(&self, timing: &BitTiming) {
        self.set_custom_timing(&timing.data_literal());
    }

    /// Enable or disable listen-only mode
    pub fn set_listen_only(&self, enable: bool) {
        self.command(&format!("{}{}", CMD_LISTEN_ONLY, u8::from(enable)));
    }

    /// Send a CAN frame
    pub fn send(&self, frame: &CanFrame) {
        self.commands.push(frame.encode(self.index));
    }

    /// Send an arbitrary protocol command on this channel
    pub fn send_raw(&self, command: &str) {
        self.command(command);
    }

    /// Register an observer for frames received on this channel
    ///
    /// Runs on the read loop thread; keep it short. A panic inside the
    /// observer is caught and logged, and later frames are still delivered.
    pub fn on_frame<F>(&self, observer: F)
    where
        F: Fn(&CanFrame) + Send + Sync + 'static,
    {
        self.inbound.register(Arc::new(observer));
    }

    /// Receive this channel's frames through a queue
    pub fn subscribe(&self) -> Receiver<CanFrame> {
        let (tx, rx) = unbounded();
        self.on_frame(move |frame| {
            let _ = tx.send(frame.clone());
        });
        rx
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let observers = self
            .inbound
            .observers
            .read()
            .map(|list| list.len())
            .unwrap_or(0);
        f.debug_struct("Channel")
            .field("index", &self.index)
            .field("observers", &observers)
            .finish()
    }
}
