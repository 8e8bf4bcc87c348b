//! Serial transport and I/O loops
//!
//! The transport owns the byte-stream connection and, while open, two
//! threads:
//!
//! - the read loop, which blocks on one line at a time and hands it to the
//!   dispatcher. Read errors never end the loop; only `close` does.
//! - the write loop, which waits for queued commands and coalesces them.
//!   Starting from the first dequeued command it keeps draining the queue
//!   for up to the batch window (125 µs) or until the batch limit (2048
//!   characters) is buffered, then issues a single write. A failed write
//!   loses the batch.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use log::{debug, info, trace, warn};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::constants::{DEFAULT_READ_TIMEOUT, SLCANX_DELIMITER};
use crate::device::SlcanxConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Result, SlcanxError};
use crate::structures::Stats;

/// Longest inbound line kept while waiting for a delimiter
const MAX_LINE_LEN: usize = 512;
/// Spin iterations between queue polls inside the batching window
const SPIN_ITERATIONS: usize = 16;
/// Pause after a non-timeout read failure before retrying
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(1);

/// Blocking source of delimiter-terminated lines
pub trait LineReader: Send {
    /// Block until a complete line is available and return it without
    /// the delimiter
    fn read_line(&mut self) -> io::Result<String>;
}

/// Blocking sink for outbound batches
pub trait LineWriter: Send {
    /// Write the whole batch
    fn write_batch(&mut self, batch: &str) -> io::Result<()>;
}

/// Byte-stream connection the transport drives
///
/// `open` returns independent read and write halves so the two loops
/// never contend. `close` must cause a blocked `read_line` to return,
/// either with an error or after its timeout.
pub trait Connection: Send {
    /// Open the link and split it into halves
    fn open(&mut self) -> Result<(Box<dyn LineReader>, Box<dyn LineWriter>)>;

    /// Release the link
    fn close(&mut self);
}

/// Serial port connection with a fixed 8N1 line setup
pub struct SerialConnection {
    port_name: String,
    baud_rate: u32,
    read_timeout: Duration,
    dtr: bool,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialConnection {
    /// Create a connection to `port_name` (e.g. `/dev/ttyACM0`, `COM3`)
    pub fn new(port_name: &str, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            read_timeout: DEFAULT_READ_TIMEOUT,
            dtr: true,
            port: None,
        }
    }

    /// Build a connection from engine configuration
    pub fn from_config(config: &SlcanxConfig) -> Self {
        Self {
            port_name: config.port_name.clone(),
            baud_rate: config.baud_rate,
            read_timeout: config.read_timeout,
            dtr: config.dtr,
            port: None,
        }
    }

    /// Serial port name
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Connection for SerialConnection {
    fn open(&mut self) -> Result<(Box<dyn LineReader>, Box<dyn LineWriter>)> {
        let mut port = serialport::new(&self.port_name, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.read_timeout)
            .open()?;

        // CDC-ACM adapters only start talking once DTR is asserted.
        if self.dtr {
            if let Err(e) = port.write_data_terminal_ready(true) {
                warn!("{}: failed to set DTR: {}", self.port_name, e);
            }
        }
        if let Err(e) = port.write_request_to_send(false) {
            warn!("{}: failed to clear RTS: {}", self.port_name, e);
        }
        if let Err(e) = port.clear(serialport::ClearBuffer::All) {
            warn!("{}: failed to flush buffers: {}", self.port_name, e);
        }

        let reader = port.try_clone()?;
        let writer = port.try_clone()?;
        self.port = Some(port);

        Ok((
            Box::new(SerialLineReader::new(reader)),
            Box::new(SerialLineWriter { port: writer }),
        ))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("{}: port released", self.port_name);
        }
    }
}

impl std::fmt::Debug for SerialConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialConnection")
            .field("port_name", &self.port_name)
            .field("baud_rate", &self.baud_rate)
            .field("read_timeout", &self.read_timeout)
            .field("open", &self.port.is_some())
            .finish()
    }
}

/// Splits a byte stream into `\r`-terminated lines
///
/// A partial line survives read timeouts. Once it grows past the line
/// limit without a delimiter it is discarded with `InvalidData`.
struct SerialLineReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: Read> SerialLineReader<R> {
    fn new(port: R) -> Self {
        Self {
            reader: BufReader::new(port),
            pending: Vec::with_capacity(MAX_LINE_LEN),
        }
    }
}

impl<R: Read + Send> LineReader for SerialLineReader<R> {
    fn read_line(&mut self) -> io::Result<String> {
        loop {
            // A timeout leaves the partial line in `pending` for the next call.
            let available = self.reader.fill_buf()?;
            if available.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "serial port closed",
                ));
            }
            let (taken, complete) = match available.iter().position(|&b| b == SLCANX_DELIMITER) {
                Some(at) => (at + 1, true),
                None => (available.len(), false),
            };
            self.pending.extend_from_slice(&available[..taken]);
            self.reader.consume(taken);

            if complete {
                self.pending.pop();
                let line = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                return Ok(line);
            }
            if self.pending.len() > MAX_LINE_LEN {
                self.pending.clear();
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "line exceeds maximum length",
                ));
            }
        }
    }
}

struct SerialLineWriter {
    port: Box<dyn SerialPort>,
}

impl LineWriter for SerialLineWriter {
    fn write_batch(&mut self, batch: &str) -> io::Result<()> {
        self.port.write_all(batch.as_bytes())?;
        self.port.flush()
    }
}

/// Accumulates queued commands into one write
pub(crate) struct Batcher {
    window: Duration,
    limit: usize,
    buf: String,
    carry: Option<String>,
}

impl Batcher {
    pub(crate) fn new(window: Duration, limit: usize) -> Self {
        Self {
            window,
            limit,
            buf: String::with_capacity(limit),
            carry: None,
        }
    }

    /// Command held back from the previous batch because it did not fit
    pub(crate) fn take_carry(&mut self) -> Option<String> {
        self.carry.take()
    }

    fn append(&mut self, command: &str) {
        self.buf.push_str(command);
        self.buf.push(SLCANX_DELIMITER as char);
    }

    /// Build a batch starting with `first`
    ///
    /// Never exceeds the limit unless `first` alone does; a command that
    /// would overflow is carried into the next batch.
    pub(crate) fn collect(&mut self, first: String, commands: &Receiver<String>) -> &str {
        let start = Instant::now();
        self.buf.clear();
        self.append(&first);

        while self.buf.len() < self.limit && start.elapsed() < self.window {
            match commands.try_recv() {
                Ok(command) => {
                    if self.buf.len() + command.len() + 1 > self.limit {
                        self.carry = Some(command);
                        break;
                    }
                    self.append(&command);
                }
                Err(TryRecvError::Empty) => {
                    for _ in 0..SPIN_ITERATIONS {
                        std::hint::spin_loop();
                    }
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
        &self.buf
    }
}

enum Wake {
    Command(String),
    Stop,
    Disconnected,
}

fn read_loop(
    mut reader: Box<dyn LineReader>,
    dispatcher: Dispatcher,
    running: Arc<AtomicBool>,
    stats: Arc<Stats>,
) {
    info!("read loop started");
    while running.load(Ordering::Acquire) {
        match reader.read_line() {
            Ok(line) => dispatcher.dispatch(&line),
            Err(e) => {
                if !running.load(Ordering::Acquire) {
                    break;
                }
                if !matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                ) {
                    Stats::bump(&stats.read_errors);
                    trace!("read error suppressed: {}", e);
                    thread::sleep(READ_ERROR_BACKOFF);
                }
            }
        }
    }
    info!("read loop stopped");
}

fn write_loop(
    mut writer: Box<dyn LineWriter>,
    commands: Receiver<String>,
    stop: Receiver<()>,
    running: Arc<AtomicBool>,
    mut batcher: Batcher,
    stats: Arc<Stats>,
) {
    info!("write loop started");
    while running.load(Ordering::Acquire) {
        let first = match batcher.take_carry() {
            Some(command) => command,
            None => {
                let wake = select! {
                    recv(commands) -> command => match command {
                        Ok(command) => Wake::Command(command),
                        Err(_) => Wake::Disconnected,
                    },
                    recv(stop) -> _ => Wake::Stop,
                };
                match wake {
                    Wake::Command(command) => command,
                    Wake::Stop => continue,
                    Wake::Disconnected => break,
                }
            }
        };
        if !running.load(Ordering::Acquire) {
            break;
        }

        let batch = batcher.collect(first, &commands);
        if batch.is_empty() {
            continue;
        }
        match writer.write_batch(batch) {
            Ok(()) => {
                Stats::bump(&stats.batches_written);
                Stats::add(&stats.bytes_written, batch.len() as u64);
                debug!("wrote batch of {} bytes", batch.len());
            }
            Err(e) => {
                Stats::bump(&stats.write_failures);
                warn!("write failed, {} bytes lost: {}", batch.len(), e);
            }
        }
    }
    info!("write loop stopped");
}

/// Connection state machine plus the two I/O loops
pub struct Transport {
    connection: Box<dyn Connection>,
    batch_window: Duration,
    batch_limit: usize,
    close_grace: Duration,
    running: Arc<AtomicBool>,
    stop: Option<Sender<()>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    stats: Arc<Stats>,
}

impl Transport {
    pub(crate) fn new(
        connection: Box<dyn Connection>,
        config: &SlcanxConfig,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            connection,
            batch_window: config.batch_window,
            batch_limit: config.batch_limit,
            close_grace: config.close_grace,
            running: Arc::new(AtomicBool::new(false)),
            stop: None,
            reader: None,
            writer: None,
            stats,
        }
    }

    /// Check if the loops are running
    pub fn is_open(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Shared running flag, readable without locking the transport
    pub(crate) fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Open the connection and start both loops; no-op when already open
    pub(crate) fn open(&mut self, commands: Receiver<String>, dispatcher: Dispatcher) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let (reader, writer) = self.connection.open()?;
        let (stop_tx, stop_rx) = bounded::<()>(0);
        self.running.store(true, Ordering::Release);

        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);
        let read_handle = thread::Builder::new()
            .name("slcanx-rx".into())
            .spawn(move || read_loop(reader, dispatcher, running, stats));
        let read_handle = match read_handle {
            Ok(handle) => handle,
            Err(source) => {
                self.running.store(false, Ordering::Release);
                self.connection.close();
                return Err(SlcanxError::ThreadSpawn {
                    name: "read loop",
                    source,
                });
            }
        };

        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);
        let batcher = Batcher::new(self.batch_window, self.batch_limit);
        let write_handle = thread::Builder::new()
            .name("slcanx-tx".into())
            .spawn(move || write_loop(writer, commands, stop_rx, running, batcher, stats));
        let write_handle = match write_handle {
            Ok(handle) => handle,
            Err(source) => {
                self.running.store(false, Ordering::Release);
                self.connection.close();
                join(read_handle);
                return Err(SlcanxError::ThreadSpawn {
                    name: "write loop",
                    source,
                });
            }
        };

        self.stop = Some(stop_tx);
        self.reader = Some(read_handle);
        self.writer = Some(write_handle);
        info!("transport open");
        Ok(())
    }

    /// Stop both loops and release the connection
    ///
    /// Idempotent. Commands still queued are not written.
    pub fn close(&mut self) {
        if let Some(stopping) = self.begin_close() {
            thread::sleep(stopping.grace());
            self.release();
            stopping.join();
        }
    }

    /// Clear the running flag and detach the loop handles
    ///
    /// Returns `None` if the transport was not open. The caller finishes
    /// the shutdown with [`Transport::release`] and [`Stopping::join`],
    /// and may drop any lock around the transport in between.
    pub(crate) fn begin_close(&mut self) -> Option<Stopping> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return None;
        }
        // Dropping the sender wakes a write loop blocked in `select!`.
        drop(self.stop.take());
        Some(Stopping {
            grace: self.close_grace,
            reader: self.reader.take(),
            writer: self.writer.take(),
        })
    }

    /// Close the connection unless a new `open` has already started
    pub(crate) fn release(&mut self) {
        if !self.is_open() {
            self.connection.close();
        }
    }
}

/// I/O loops detached from a closing transport
pub(crate) struct Stopping {
    grace: Duration,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Stopping {
    /// Delay to observe before releasing the connection
    pub(crate) fn grace(&self) -> Duration {
        self.grace
    }

    /// Wait for both loops to exit
    pub(crate) fn join(self) {
        if let Some(handle) = self.writer {
            join(handle);
        }
        if let Some(handle) = self.reader {
            join(handle);
        }
        info!("transport closed");
    }
}

fn join(handle: JoinHandle<()>) {
    // An observer may close the engine from the read loop itself.
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        warn!("I/O loop terminated by panic");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("open", &self.is_open())
            .field("batch_window", &self.batch_window)
            .field("batch_limit", &self.batch_limit)
            .finish()
    }
}
