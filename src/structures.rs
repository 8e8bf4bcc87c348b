//! SLCANX configuration structures
//!
//! This module contains the typed forms of the channel configuration
//! arguments (custom bit timing, sample points, bit-rate table lookups)
//! and the link statistics counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::{
    CMD_DATA_SAMPLE_POINT, CMD_DATA_TIMING, CMD_NOMINAL_TIMING, CMD_SAMPLE_POINT,
    FD_RATE_MAX_MBPS, FD_RATE_MIN_MBPS, NOMINAL_BITRATES, SAMPLE_POINT_MAX, SAMPLE_POINT_MIN,
};
use crate::error::{Result, SlcanxError};

/// Look up the `S` table index for a nominal bit-rate
pub fn nominal_rate_index(bitrate: u32) -> Option<usize> {
    NOMINAL_BITRATES.iter().position(|&rate| rate == bitrate)
}

/// Look up the `Y` table index for a CAN FD data-phase bit-rate
///
/// The adapter's table covers whole megabit rates from 1 to 15 Mbit/s.
pub fn data_rate_index(bitrate: u32) -> Result<u32> {
    let mbps = bitrate / 1_000_000;
    if bitrate % 1_000_000 == 0 && (FD_RATE_MIN_MBPS..=FD_RATE_MAX_MBPS).contains(&mbps) {
        Ok(mbps)
    } else {
        Err(SlcanxError::UnsupportedDataBitrate { bitrate })
    }
}

/// Custom CAN bit timing register set
///
/// Rendered as `{clock}_{prescaler}_{seg1}_{seg2}_{sjw}_{tdc}` after the
/// `a` (nominal) or `A` (data phase) command letter, e.g.
/// `a80_4_31_8_8_0` for 500 kbit/s at 80 MHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    /// CAN peripheral clock in MHz
    pub clock_mhz: u32,
    /// Baud rate prescaler
    pub prescaler: u32,
    /// Time segment 1 (propagation + phase segment 1)
    pub seg1: u32,
    /// Phase segment 2
    pub seg2: u32,
    /// Synchronization jump width
    pub sjw: u32,
    /// Transmitter delay compensation (data phase only)
    pub tdc: bool,
}

impl BitTiming {
    /// Create a new bit timing configuration
    pub fn new(clock_mhz: u32, prescaler: u32, seg1: u32, seg2: u32, sjw: u32) -> Self {
        Self {
            clock_mhz,
            prescaler,
            seg1,
            seg2,
            sjw,
            tdc: false,
        }
    }

    /// Enable or disable transmitter delay compensation
    pub fn with_tdc(mut self, tdc: bool) -> Self {
        self.tdc = tdc;
        self
    }

    /// Resulting bit-rate in bits per second
    ///
    /// Saturates at `u32::MAX` for out-of-range register values.
    pub fn bitrate(&self) -> u32 {
        let divisor = u64::from(self.prescaler.max(1)).saturating_mul(self.quanta());
        let rate = u64::from(self.clock_mhz) * 1_000_000 / divisor;
        u32::try_from(rate).unwrap_or(u32::MAX)
    }

    /// Sample point in per mille
    pub fn sample_point(&self) -> u32 {
        let sampled = 1 + u64::from(self.seg1);
        // sampled <= quanta, so this is at most 1000
        (sampled * 1000 / self.quanta()) as u32
    }

    /// Time quanta per bit
    fn quanta(&self) -> u64 {
        1 + u64::from(self.seg1) + u64::from(self.seg2)
    }

    fn fields(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}_{}",
            self.clock_mhz,
            self.prescaler,
            self.seg1,
            self.seg2,
            self.sjw,
            u8::from(self.tdc)
        )
    }

    /// Nominal timing literal (`a...`)
    pub fn nominal_literal(&self) -> String {
        format!("{}{}", CMD_NOMINAL_TIMING, self.fields())
    }

    /// Data-phase timing literal (`A...`)
    pub fn data_literal(&self) -> String {
        format!("{}{}", CMD_DATA_TIMING, self.fields())
    }
}

impl std::fmt::Display for BitTiming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Clock: {} MHz\nPrescaler: {}\nSeg 1: {}\nSeg 2: {}\nSJW: {}\nTDC: {}",
            self.clock_mhz, self.prescaler, self.seg1, self.seg2, self.sjw, self.tdc
        )
    }
}

/// Sample point selection for one or both bit-timing phases
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplePoint {
    /// Nominal phase sample point in per mille
    pub nominal: Option<u16>,
    /// Data phase sample point in per mille
    pub data: Option<u16>,
}

impl SamplePoint {
    /// Sample point for the nominal phase only
    pub fn nominal(permille: u16) -> Self {
        Self {
            nominal: Some(permille),
            data: None,
        }
    }

    /// Sample point for the data phase only
    pub fn data(permille: u16) -> Self {
        Self {
            nominal: None,
            data: Some(permille),
        }
    }

    /// Add a data phase sample point
    pub fn with_data(mut self, permille: u16) -> Self {
        self.data = Some(permille);
        self
    }

    /// Validate and render as `p{n}` / `P{n}` commands
    pub fn commands(&self) -> Result<Vec<String>> {
        let mut commands = Vec::with_capacity(2);
        if let Some(permille) = self.nominal {
            check_sample_point(permille)?;
            commands.push(format!("{}{}", CMD_SAMPLE_POINT, permille));
        }
        if let Some(permille) = self.data {
            check_sample_point(permille)?;
            commands.push(format!("{}{}", CMD_DATA_SAMPLE_POINT, permille));
        }
        Ok(commands)
    }
}

fn check_sample_point(permille: u16) -> Result<()> {
    if (SAMPLE_POINT_MIN..=SAMPLE_POINT_MAX).contains(&permille) {
        Ok(())
    } else {
        Err(SlcanxError::InvalidSamplePoint { permille })
    }
}

/// Link counters shared by the engine and both I/O loops
#[derive(Debug, Default)]
pub struct Stats {
    pub(crate) lines_received: AtomicU64,
    pub(crate) frames_delivered: AtomicU64,
    pub(crate) lines_dropped: AtomicU64,
    pub(crate) non_frame_lines: AtomicU64,
    pub(crate) read_errors: AtomicU64,
    pub(crate) commands_queued: AtomicU64,
    pub(crate) batches_written: AtomicU64,
    pub(crate) bytes_written: AtomicU64,
    pub(crate) write_failures: AtomicU64,
}

impl Stats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_received: self.lines_received.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            lines_dropped: self.lines_dropped.load(Ordering::Relaxed),
            non_frame_lines: self.non_frame_lines.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            commands_queued: self.commands_queued.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Lines read from the transport
    pub lines_received: u64,
    /// Decoded frames handed to a channel's observers
    pub frames_delivered: u64,
    /// Frame lines dropped as malformed
    pub lines_dropped: u64,
    /// Acks, echoes and status lines that are not frames
    pub non_frame_lines: u64,
    /// Read failures suppressed while running
    pub read_errors: u64,
    /// Commands submitted to the queue
    pub commands_queued: u64,
    /// Transport writes issued
    pub batches_written: u64,
    /// Characters written
    pub bytes_written: u64,
    /// Batches lost to write failures
    pub write_failures: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RX lines: {} (frames {}, dropped {}, other {}, read errors {})\n\
             TX commands: {} in {} writes ({} bytes, {} failed)",
            self.lines_received,
            self.frames_delivered,
            self.lines_dropped,
            self.non_frame_lines,
            self.read_errors,
            self.commands_queued,
            self.batches_written,
            self.bytes_written,
            self.write_failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_rate_index() {
        assert_eq!(nominal_rate_index(10_000), Some(0));
        assert_eq!(nominal_rate_index(500_000), Some(6));
        assert_eq!(nominal_rate_index(1_000_000), Some(8));
        assert_eq!(nominal_rate_index(83_333), None);
    }

    #[test]
    fn test_data_rate_index() {
        assert_eq!(data_rate_index(2_000_000).unwrap(), 2);
        assert_eq!(data_rate_index(15_000_000).unwrap(), 15);
        assert!(data_rate_index(0).is_err());
        assert!(data_rate_index(2_500_000).is_err());
        assert!(matches!(
            data_rate_index(16_000_000),
            Err(SlcanxError::UnsupportedDataBitrate { bitrate: 16_000_000 })
        ));
    }

    #[test]
    fn test_bit_timing_literals() {
        let nominal = BitTiming::new(80, 4, 31, 8, 8);
        assert_eq!(nominal.nominal_literal(), "a80_4_31_8_8_0");
        assert_eq!(nominal.bitrate(), 500_000);
        assert_eq!(nominal.sample_point(), 800);

        let data = BitTiming::new(80, 2, 15, 4, 4).with_tdc(true);
        assert_eq!(data.data_literal(), "A80_2_15_4_4_1");
        assert_eq!(data.bitrate(), 2_000_000);
    }

    #[test]
    fn test_bit_timing_extreme_values() {
        let max = BitTiming::new(u32::MAX, u32::MAX, u32::MAX, u32::MAX, 1);
        assert_eq!(max.bitrate(), 0);
        assert_eq!(max.sample_point(), 500);

        let fast = BitTiming::new(u32::MAX, 1, 0, 0, 1);
        assert_eq!(fast.bitrate(), u32::MAX);
        assert_eq!(fast.sample_point(), 1000);

        assert_eq!(BitTiming::new(80, 0, 31, 8, 8).bitrate(), 2_000_000);
    }

    #[test]
    fn test_sample_point_commands() {
        let sp = SamplePoint::nominal(875).with_data(750);
        assert_eq!(sp.commands().unwrap(), vec!["p875", "P750"]);
        assert!(SamplePoint::default().commands().unwrap().is_empty());
        assert!(matches!(
            SamplePoint::data(900).commands(),
            Err(SlcanxError::InvalidSamplePoint { permille: 900 })
        ));
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = Stats::default();
        Stats::bump(&stats.lines_received);
        Stats::add(&stats.bytes_written, 12);
        let snap = stats.snapshot();
        assert_eq!(snap.lines_received, 1);
        assert_eq!(snap.bytes_written, 12);
        assert_eq!(snap.write_failures, 0);
    }
}
