//! SLCANX device implementation
//!
//! This module provides the `Slcanx` engine, which owns the serial
//! transport, the shared command queue and the four logical channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::channel::Channel;
use crate::constants::{
    BATCH_LIMIT, BATCH_WINDOW, CLOSE_GRACE, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT,
    SLCANX_CHANNEL_COUNT,
};
use crate::dispatch::Dispatcher;
use crate::error::{Result, SlcanxError};
use crate::queue::CommandQueue;
use crate::structures::{Stats, StatsSnapshot};
use crate::transport::{Connection, SerialConnection, Transport};

/// Engine configuration
///
/// Serial framing is always 8N1 without flow control, `\r` delimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlcanxConfig {
    /// Serial port name (e.g. `/dev/ttyACM0`, `COM3`)
    pub port_name: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Read timeout; bounds how long the read loop takes to notice `close`
    pub read_timeout: Duration,
    /// Coalescing window of the write loop
    pub batch_window: Duration,
    /// Maximum characters per write
    pub batch_limit: usize,
    /// Delay between stopping the loops and closing the port
    pub close_grace: Duration,
    /// Assert DTR after opening the port
    pub dtr: bool,
}

impl Default for SlcanxConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            batch_window: BATCH_WINDOW,
            batch_limit: BATCH_LIMIT,
            close_grace: CLOSE_GRACE,
            dtr: true,
        }
    }
}

impl SlcanxConfig {
    /// Default configuration for `port_name`
    pub fn new(port_name: &str) -> Self {
        Self {
            port_name: port_name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    pub fn with_dtr(mut self, dtr: bool) -> Self {
        self.dtr = dtr;
        self
    }
}

/// SLCANX adapter handle
///
/// Owns the transport, the command queue and four [`Channel`]s. All
/// methods take `&self`, so the engine can be shared across threads in an
/// `Arc`.
///
/// # Example
///
/// ```no_run
/// use slcanx::{CanFrame, Slcanx};
///
/// let dev = Slcanx::new("/dev/ttyACM0");
/// dev.open()?;
///
/// let ch = dev.channel(0)?;
/// ch.close();
/// ch.set_nominal_bitrate(500_000);
/// ch.open();
///
/// let rx = ch.subscribe();
/// ch.send(&CanFrame::new(0x123, &[0x11, 0x22, 0x33]));
///
/// for frame in rx.iter() {
///     println!("RX  {}", frame);
/// }
/// # Ok::<(), slcanx::SlcanxError>(())
/// ```
pub struct Slcanx {
    transport: Mutex<Transport>,
    running: Arc<AtomicBool>,
    queue: CommandQueue,
    channels: [Channel; SLCANX_CHANNEL_COUNT],
    stats: Arc<Stats>,
    config: SlcanxConfig,
}

impl Slcanx {
    /// Create an engine for the serial port `port_name` with default settings
    ///
    /// The port is not touched until [`Slcanx::open`].
    pub fn new(port_name: &str) -> Self {
        Self::with_config(SlcanxConfig::new(port_name))
    }

    /// Create an engine for a serial port with explicit settings
    pub fn with_config(config: SlcanxConfig) -> Self {
        let connection = SerialConnection::from_config(&config);
        Self::with_connection(connection, config)
    }

    /// Create an engine over any line-oriented connection
    pub fn with_connection<C>(connection: C, config: SlcanxConfig) -> Self
    where
        C: Connection + 'static,
    {
        let stats = Arc::new(Stats::default());
        let queue = CommandQueue::new(Arc::clone(&stats));
        let channels =
            std::array::from_fn(|index| Channel::new(index, queue.sender(), Arc::clone(&stats)));
        let transport = Transport::new(Box::new(connection), &config, Arc::clone(&stats));
        Self {
            running: transport.running(),
            transport: Mutex::new(transport),
            queue,
            channels,
            stats,
            config,
        }
    }

    fn transport(&self) -> MutexGuard<'_, Transport> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the link and start the read and write loops
    ///
    /// Does nothing if already open.
    pub fn open(&self) -> Result<()> {
        let mut transport = self.transport();
        if transport.is_open() {
            return Ok(());
        }
        let dispatcher = Dispatcher::new(
            std::array::from_fn(|index| self.channels[index].inbound()),
            Arc::clone(&self.stats),
        );
        transport.open(self.queue.receiver(), dispatcher)
    }

    /// Stop both loops and release the link
    ///
    /// Safe to call repeatedly and from any thread, including from an
    /// observer. Commands not yet written are discarded.
    pub fn close(&self) {
        // The lock is not held while waiting: observers on the read loop
        // may call back into the engine until it exits.
        let stopping = self.transport().begin_close();
        if let Some(stopping) = stopping {
            thread::sleep(stopping.grace());
            self.transport().release();
            stopping.join();
        }
    }

    /// Check if the link is open
    pub fn is_open(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a logical channel
    ///
    /// # Arguments
    /// * `index` - Channel number, 0 to 3
    pub fn channel(&self, index: usize) -> Result<&Channel> {
        self.channels
            .get(index)
            .ok_or(SlcanxError::InvalidChannel {
                channel: index,
                max_channels: SLCANX_CHANNEL_COUNT,
            })
    }

    /// All four channels in index order
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Commands waiting for the write loop
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Current link counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Configuration the engine was built with
    pub fn config(&self) -> &SlcanxConfig {
        &self.config
    }
}

impl std::fmt::Display for Slcanx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SLCANX {} @ {} baud ({} channels)",
            self.config.port_name, self.config.baud_rate, SLCANX_CHANNEL_COUNT
        )
    }
}

impl std::fmt::Debug for Slcanx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slcanx")
            .field("port_name", &self.config.port_name)
            .field("open", &self.is_open())
            .field("pending_commands", &self.pending_commands())
            .field("channels", &self.channels)
            .finish()
    }
}

impl Drop for Slcanx {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SlcanxConfig::new("COM3");
        assert_eq!(config.port_name, "COM3");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.batch_window, Duration::from_micros(125));
        assert_eq!(config.batch_limit, 2048);
        assert!(config.dtr);

        let config = config.with_baud_rate(2_000_000).with_dtr(false);
        assert_eq!(config.baud_rate, 2_000_000);
        assert!(!config.dtr);
    }

    #[test]
    fn test_channel_lookup() {
        let dev = Slcanx::new("/dev/slcanx-does-not-exist");
        for index in 0..4 {
            assert_eq!(dev.channel(index).unwrap().index(), index);
        }
        assert!(matches!(
            dev.channel(4),
            Err(SlcanxError::InvalidChannel {
                channel: 4,
                max_channels: 4
            })
        ));
        assert_eq!(dev.channels().len(), 4);
    }

    #[test]
    fn test_commands_queue_while_closed() {
        let dev = Slcanx::new("/dev/slcanx-does-not-exist");
        assert!(!dev.is_open());
        dev.channel(1).unwrap().open();
        dev.channel(3).unwrap().set_rate(8);
        assert_eq!(dev.pending_commands(), 2);
        assert_eq!(dev.stats().commands_queued, 2);
    }

    #[test]
    fn test_open_missing_port_reports_error() {
        let dev = Slcanx::new("/dev/slcanx-does-not-exist");
        let err = dev.open().unwrap_err();
        assert!(err.is_io_error());
        assert!(!dev.is_open());
        dev.close();
    }
}
