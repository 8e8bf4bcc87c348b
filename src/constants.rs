//! SLCANX protocol constants
//!
//! This module contains the constants used on the SLCANX wire, including
//! command letters, the CAN FD length-code table, bit-rate tables and the
//! write-path batching budget.

use std::time::Duration;

// ============================================================================
// Channels
// ============================================================================

/// Number of logical CAN channels multiplexed onto one serial link
pub const SLCANX_CHANNEL_COUNT: usize = 4;

/// Line delimiter used in both directions
pub const SLCANX_DELIMITER: u8 = b'\r';

// ============================================================================
// Frame Command Letters (uppercase = extended 29-bit ID)
// ============================================================================

/// Classic data frame, standard ID
pub const CMD_FRAME_STD: u8 = b't';
/// Classic data frame, extended ID
pub const CMD_FRAME_EXT: u8 = b'T';
/// Remote frame, standard ID
pub const CMD_REMOTE_STD: u8 = b'r';
/// Remote frame, extended ID
pub const CMD_REMOTE_EXT: u8 = b'R';
/// CAN FD frame without bit-rate switch, standard ID
pub const CMD_FD_STD: u8 = b'd';
/// CAN FD frame without bit-rate switch, extended ID
pub const CMD_FD_EXT: u8 = b'D';
/// CAN FD frame with bit-rate switch, standard ID
pub const CMD_FD_BRS_STD: u8 = b'b';
/// CAN FD frame with bit-rate switch, extended ID
pub const CMD_FD_BRS_EXT: u8 = b'B';

// ============================================================================
// Configuration Command Letters
// ============================================================================

/// Open channel
pub const CMD_OPEN: char = 'O';
/// Close channel
pub const CMD_CLOSE: char = 'C';
/// Select predefined nominal bit-rate
pub const CMD_SET_RATE: char = 'S';
/// Custom numeric nominal bit-rate
pub const CMD_SET_BITRATE: char = 'y';
/// Select predefined CAN FD data-phase rate
pub const CMD_SET_FD_RATE: char = 'Y';
/// Nominal sample point (per mille)
pub const CMD_SAMPLE_POINT: char = 'p';
/// Data-phase sample point (per mille)
pub const CMD_DATA_SAMPLE_POINT: char = 'P';
/// Custom nominal timing register set
pub const CMD_NOMINAL_TIMING: char = 'a';
/// Custom data-phase timing register set
pub const CMD_DATA_TIMING: char = 'A';
/// Listen-only mode
pub const CMD_LISTEN_ONLY: char = 'L';

// ============================================================================
// Identifier Widths
// ============================================================================

/// Hex digits of a standard (11-bit) identifier
pub const STD_ID_DIGITS: usize = 3;
/// Hex digits of an extended (29-bit) identifier
pub const EXT_ID_DIGITS: usize = 8;

// ============================================================================
// CAN Payload Definitions
// ============================================================================

/// Maximum data length for classic CAN
pub const CAN_MAX_DLEN: usize = 8;
/// Maximum data length for CAN FD
pub const CANFD_MAX_DLEN: usize = 64;

/// Length code to data length conversion table for CAN FD
pub const CANFD_DLC_TO_LEN: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

// ============================================================================
// Write Path Batching
// ============================================================================

/// Maximum characters accumulated into a single transport write
pub const BATCH_LIMIT: usize = 2048;
/// Coalescing window measured from the first dequeued command
pub const BATCH_WINDOW: Duration = Duration::from_micros(125);

// ============================================================================
// Serial Link Defaults
// ============================================================================

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// Default serial read timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);
/// Grace delay between stopping the loops and closing the port
pub const CLOSE_GRACE: Duration = Duration::from_millis(10);

// ============================================================================
// Bit-rate Tables
// ============================================================================

/// Nominal bit-rates selectable with `S{index}`, in table order
pub const NOMINAL_BITRATES: [u32; 9] = [
    10_000, 20_000, 50_000, 100_000, 125_000, 250_000, 500_000, 800_000, 1_000_000,
];

/// Lowest CAN FD data-phase rate selectable with `Y{n}` (n Mbit/s)
pub const FD_RATE_MIN_MBPS: u32 = 1;
/// Highest CAN FD data-phase rate selectable with `Y{n}` (n Mbit/s)
pub const FD_RATE_MAX_MBPS: u32 = 15;

/// Lowest accepted sample point (per mille)
pub const SAMPLE_POINT_MIN: u16 = 750;
/// Highest accepted sample point (per mille)
pub const SAMPLE_POINT_MAX: u16 = 875;
