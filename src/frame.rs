//! SLCANX CAN frame implementation
//!
//! This module provides the `CanFrame` value type and the codec that turns
//! it into the ASCII line representation used on the wire, and back.
//!
//! Line layout (without the `\r` delimiter):
//!
//! ```text
//! {channel}{letter}{id: 3 or 8 hex}{length code: 1 hex}{payload: 2 hex per byte}
//! ```
//!
//! The length code is the CAN FD DLC. Lengths 9..=64 are bucketed, so a
//! 13-byte payload travels as code `A` and decodes as 16 bytes.

use crate::constants::{
    CANFD_DLC_TO_LEN, CANFD_MAX_DLEN, CMD_FD_BRS_EXT, CMD_FD_BRS_STD, CMD_FD_EXT, CMD_FD_STD,
    CMD_FRAME_EXT, CMD_FRAME_STD, CMD_REMOTE_EXT, CMD_REMOTE_STD, EXT_ID_DIGITS, STD_ID_DIGITS,
};
use crate::error::DecodeError;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Convert a length code to data length
pub fn dlc_to_len(dlc: u8) -> usize {
    if (dlc as usize) < CANFD_DLC_TO_LEN.len() {
        CANFD_DLC_TO_LEN[dlc as usize]
    } else {
        CANFD_MAX_DLEN
    }
}

/// Convert data length to a length code
///
/// Returns the smallest code whose length holds `length` bytes.
pub fn len_to_dlc(length: usize) -> u8 {
    for (dlc, &dlen) in CANFD_DLC_TO_LEN.iter().enumerate() {
        if dlen >= length {
            return dlc as u8;
        }
    }
    15 // Max DLC for CAN FD
}

/// CAN / CAN FD frame
///
/// `dlc` holds a byte count, not a length code. For data frames it
/// normally equals `data.len()`; for remote frames it is the requested
/// length and `data` is empty.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct CanFrame {
    /// CAN identifier (11 or 29 bits, not range checked)
    pub id: u32,
    /// Payload bytes
    pub data: Vec<u8>,
    /// Data length in bytes
    pub dlc: u8,
    /// 29-bit identifier
    pub is_extended: bool,
    /// Remote transmission request
    pub is_remote: bool,
    /// CAN FD frame
    pub is_fd: bool,
    /// Bit-rate switch (CAN FD only)
    pub is_brs: bool,
}

impl CanFrame {
    /// Create a classic data frame with a standard ID
    pub fn new(id: u32, data: &[u8]) -> Self {
        Self {
            id,
            data: data.to_vec(),
            dlc: data.len().min(CANFD_MAX_DLEN) as u8,
            ..Self::default()
        }
    }

    /// Create a classic data frame with an extended ID
    pub fn new_extended(id: u32, data: &[u8]) -> Self {
        Self::new(id, data).with_extended(true)
    }

    /// Create a CAN FD frame with a standard ID
    ///
    /// # Arguments
    /// * `id` - CAN identifier
    /// * `data` - Frame data (up to 64 bytes)
    /// * `brs` - Transmit the data phase at the data bit-rate
    pub fn new_fd(id: u32, data: &[u8], brs: bool) -> Self {
        Self {
            is_fd: true,
            is_brs: brs,
            ..Self::new(id, data)
        }
    }

    /// Create a remote frame requesting `dlc` bytes
    pub fn new_remote(id: u32, dlc: u8, extended: bool) -> Self {
        Self {
            id,
            dlc,
            is_extended: extended,
            is_remote: true,
            ..Self::default()
        }
    }

    /// Switch between standard and extended identifiers
    pub fn with_extended(mut self, extended: bool) -> Self {
        self.is_extended = extended;
        self
    }

    /// Bytes the length code of this frame announces on the wire
    pub fn data_length(&self) -> usize {
        dlc_to_len(self.length_code())
    }

    fn length_code(&self) -> u8 {
        if self.is_remote {
            len_to_dlc(self.dlc as usize)
        } else {
            len_to_dlc(self.data.len())
        }
    }

    fn command_letter(&self) -> u8 {
        match (self.is_fd, self.is_brs, self.is_remote, self.is_extended) {
            (true, true, _, false) => CMD_FD_BRS_STD,
            (true, true, _, true) => CMD_FD_BRS_EXT,
            (true, false, _, false) => CMD_FD_STD,
            (true, false, _, true) => CMD_FD_EXT,
            (false, _, true, false) => CMD_REMOTE_STD,
            (false, _, true, true) => CMD_REMOTE_EXT,
            (false, _, false, false) => CMD_FRAME_STD,
            (false, _, false, true) => CMD_FRAME_EXT,
        }
    }

    /// Encode into a command line for `channel`, without the delimiter
    ///
    /// Payload bytes are emitted as given even when their count is not a
    /// length-code boundary. Remote frames carry no payload.
    pub fn encode(&self, channel: usize) -> String {
        let mut line = String::with_capacity(2 + EXT_ID_DIGITS + 1 + self.data.len() * 2);
        line.push_str(&channel.to_string());
        line.push(self.command_letter() as char);
        if self.is_extended {
            line.push_str(&format!("{:08X}", self.id));
        } else {
            line.push_str(&format!("{:03X}", self.id));
        }
        line.push(HEX_DIGITS[self.length_code() as usize] as char);
        if !self.is_remote {
            for byte in &self.data {
                line.push(HEX_DIGITS[(byte >> 4) as usize] as char);
                line.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
            }
        }
        line
    }

    /// Parse a channel-stripped line into a frame
    ///
    /// Examples:
    ///   `t1233112233` -> standard frame, ID=0x123, data=11 22 33
    ///   `R000002000`  -> extended remote frame, ID=0x200
    ///   `bABCA0102..` -> standard FD+BRS frame, 16 bytes
    pub fn parse(line: &str) -> std::result::Result<Self, DecodeError> {
        let bytes = line.as_bytes();
        let letter = *bytes.first().ok_or(DecodeError::Empty)?;

        let (is_extended, is_remote, is_fd, is_brs) = match letter {
            CMD_FRAME_STD => (false, false, false, false),
            CMD_FRAME_EXT => (true, false, false, false),
            CMD_REMOTE_STD => (false, true, false, false),
            CMD_REMOTE_EXT => (true, true, false, false),
            CMD_FD_STD => (false, false, true, false),
            CMD_FD_EXT => (true, false, true, false),
            CMD_FD_BRS_STD => (false, false, true, true),
            CMD_FD_BRS_EXT => (true, false, true, true),
            _ => {
                let c = line.chars().next().unwrap_or(char::REPLACEMENT_CHARACTER);
                return Err(DecodeError::NotAFrame(c));
            }
        };

        let id_digits = if is_extended {
            EXT_ID_DIGITS
        } else {
            STD_ID_DIGITS
        };
        let code_at = 1 + id_digits;
        check_length(bytes, code_at + 1)?;

        let id = parse_hex(&bytes[1..code_at])?;

        let code_byte = bytes[code_at];
        let code = hex_value(code_byte)
            .ok_or(DecodeError::InvalidLengthCode(code_byte as char))?;
        let length = dlc_to_len(code);

        let mut data = Vec::new();
        if !is_remote && length > 0 {
            let start = code_at + 1;
            check_length(bytes, start + length * 2)?;
            data.reserve_exact(length);
            for pair in bytes[start..start + length * 2].chunks_exact(2) {
                data.push(parse_hex(pair)? as u8);
            }
        }

        Ok(Self {
            id,
            data,
            dlc: length as u8,
            is_extended,
            is_remote,
            is_fd,
            is_brs,
        })
    }

    /// Decode a channel-stripped line, or `None` when it is not a valid frame
    pub fn decode(line: &str) -> Option<Self> {
        Self::parse(line).ok()
    }
}

fn check_length(bytes: &[u8], needed: usize) -> std::result::Result<(), DecodeError> {
    if bytes.len() < needed {
        return Err(DecodeError::TooShort {
            needed,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Parse up to eight hex digits. Signs and whitespace are rejected.
fn parse_hex(digits: &[u8]) -> std::result::Result<u32, DecodeError> {
    digits.iter().try_fold(0u32, |acc, &b| {
        hex_value(b)
            .map(|v| (acc << 4) | v as u32)
            .ok_or_else(|| DecodeError::InvalidHex(String::from_utf8_lossy(digits).into_owned()))
    })
}

impl std::fmt::Display for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ext_indicator = if self.is_extended { " EXT" } else { "" };
        let fd_indicator = if self.is_fd { " FD" } else { "" };
        let brs_indicator = if self.is_brs { " BRS" } else { "" };

        let data_str = if self.is_remote {
            "remote request".to_string()
        } else {
            self.data
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(" ")
        };

        write!(
            f,
            "{:>8X}{}{}{}   [{}]  {}",
            self.id, ext_indicator, fd_indicator, brs_indicator, self.dlc, data_str
        )
    }
}

impl std::fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanFrame")
            .field("id", &format_args!("0x{:X}", self.id))
            .field("dlc", &self.dlc)
            .field("data", &format_args!("{:02X?}", self.data))
            .field("is_extended", &self.is_extended)
            .field("is_remote", &self.is_remote)
            .field("is_fd", &self.is_fd)
            .field("is_brs", &self.is_brs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dlc_to_len() {
        assert_eq!(dlc_to_len(0), 0);
        assert_eq!(dlc_to_len(8), 8);
        assert_eq!(dlc_to_len(9), 12);
        assert_eq!(dlc_to_len(0xA), 16);
        assert_eq!(dlc_to_len(0xD), 32);
        assert_eq!(dlc_to_len(15), 64);
        assert_eq!(dlc_to_len(200), 64);
    }

    #[test]
    fn test_len_to_dlc_buckets() {
        assert_eq!(len_to_dlc(0), 0);
        assert_eq!(len_to_dlc(8), 8);
        assert_eq!(len_to_dlc(9), 9);
        assert_eq!(len_to_dlc(12), 9);
        assert_eq!(len_to_dlc(13), 0xA);
        assert_eq!(len_to_dlc(16), 0xA);
        assert_eq!(len_to_dlc(17), 0xB);
        assert_eq!(len_to_dlc(24), 0xC);
        assert_eq!(len_to_dlc(25), 0xD);
        assert_eq!(len_to_dlc(33), 0xE);
        assert_eq!(len_to_dlc(49), 0xF);
        assert_eq!(len_to_dlc(64), 0xF);
    }

    #[test]
    fn test_encode_standard_frame() {
        let frame = CanFrame::new(0x123, &[0x11, 0x22, 0x33]);
        assert_eq!(frame.encode(0), "0t1233112233");
    }

    #[test]
    fn test_encode_extended_remote_frame() {
        let frame = CanFrame::new_remote(0x200, 0, true);
        assert_eq!(frame.encode(2), "2R000002000");
    }

    #[test]
    fn test_encode_remote_requests_dlc_without_payload() {
        let mut frame = CanFrame::new_remote(0x7FF, 4, false);
        frame.data = vec![0xAA; 4];
        assert_eq!(frame.encode(1), "1r7FF4");
    }

    #[test]
    fn test_encode_fd_letters() {
        let data = [0u8; 2];
        assert_eq!(CanFrame::new_fd(0x10, &data, false).encode(3), "3d01020000");
        assert_eq!(CanFrame::new_fd(0x10, &data, true).encode(3), "3b01020000");
        assert_eq!(
            CanFrame::new_fd(0x10, &data, true).with_extended(true).encode(3),
            "3B0000001020000"
        );
        assert_eq!(
            CanFrame::new_fd(0x10, &data, false).with_extended(true).encode(3),
            "3D0000001020000"
        );
        assert_eq!(CanFrame::new_extended(0x1ABCDEF0, &[]).encode(0), "0T1ABCDEF00");
    }

    #[test]
    fn test_encode_fd_keeps_literal_payload() {
        let data: Vec<u8> = (0..13).collect();
        let line = CanFrame::new_fd(0x1, &data, false).encode(0);
        assert_eq!(&line[..6], "0d001A");
        assert_eq!(line.len(), 6 + 13 * 2);
    }

    #[test]
    fn test_decode_standard_frame() {
        let frame = CanFrame::decode("t1233112233").unwrap();
        assert_eq!(frame, CanFrame::new(0x123, &[0x11, 0x22, 0x33]));
    }

    #[test]
    fn test_decode_flags() {
        let frame = CanFrame::decode("B1234567800").unwrap();
        assert!(frame.is_extended && frame.is_fd && frame.is_brs && !frame.is_remote);
        assert_eq!(frame.id, 0x1234_5678);

        let frame = CanFrame::decode("r1238").unwrap();
        assert!(frame.is_remote && !frame.is_fd);
        assert_eq!(frame.dlc, 8);
        assert!(frame.data.is_empty());

        let frame = CanFrame::decode("d7FF1AB").unwrap();
        assert!(frame.is_fd && !frame.is_brs && !frame.is_extended);
        assert_eq!(frame.data, vec![0xAB]);
    }

    #[test]
    fn test_decode_accepts_lowercase_hex() {
        let frame = CanFrame::decode("t7ff2abcd").unwrap();
        assert_eq!(frame.id, 0x7FF);
        assert_eq!(frame.data, vec![0xAB, 0xCD]);
    }

    #[test]
    fn test_decode_ignores_trailing_characters() {
        let frame = CanFrame::decode("t12310099").unwrap();
        assert_eq!(frame.data, vec![0x00]);
    }

    #[test]
    fn test_classic_round_trip() {
        for len in 0..=8usize {
            let data: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(37)).collect();
            for frame in [
                CanFrame::new(0x7FF, &data),
                CanFrame::new_extended(0x1FFF_FFFF, &data),
            ] {
                let line = frame.encode(1);
                assert_eq!(CanFrame::decode(&line[1..]), Some(frame));
            }
        }
        let remote = CanFrame::new_remote(0x321, 6, false);
        assert_eq!(CanFrame::decode(&remote.encode(0)[1..]), Some(remote));
    }

    #[test]
    fn test_fd_length_bucketing() {
        for len in 1..=CANFD_MAX_DLEN {
            let data = vec![0x5Au8; len];
            let line = CanFrame::new_fd(0x42, &data, true).encode(0);
            let bucket = dlc_to_len(len_to_dlc(len));
            // Non-boundary lengths leave the line short of the bucket and drop.
            match CanFrame::decode(&line[1..]) {
                Some(decoded) => {
                    assert_eq!(bucket, len);
                    assert_eq!(decoded.data.len(), bucket);
                }
                None => assert!(bucket > len),
            }
            let mut padded = data.clone();
            padded.resize(bucket, 0);
            let line = CanFrame::new_fd(0x42, &padded, true).encode(0);
            let decoded = CanFrame::decode(&line[1..]).unwrap();
            assert_eq!(decoded.data.len(), bucket);
            assert_eq!(decoded.data_length(), bucket);
        }
    }

    #[test]
    fn test_decode_malformed_lines() {
        assert_eq!(CanFrame::parse(""), Err(DecodeError::Empty));
        assert_eq!(CanFrame::parse("z"), Err(DecodeError::NotAFrame('z')));
        assert_eq!(
            CanFrame::parse("t12"),
            Err(DecodeError::TooShort {
                needed: 5,
                actual: 3
            })
        );
        assert!(matches!(
            CanFrame::parse("t1G30"),
            Err(DecodeError::InvalidHex(_))
        ));
        assert!(matches!(
            CanFrame::parse("t+120"),
            Err(DecodeError::InvalidHex(_))
        ));
        assert_eq!(
            CanFrame::parse("t123X"),
            Err(DecodeError::InvalidLengthCode('X'))
        );
        assert!(matches!(
            CanFrame::parse("t1234AABB"),
            Err(DecodeError::TooShort { .. })
        ));
        assert!(matches!(
            CanFrame::parse("t1231ZZ"),
            Err(DecodeError::InvalidHex(_))
        ));
        assert_eq!(CanFrame::decode("t123\u{e9}"), None);
        assert_eq!(CanFrame::decode("\u{e9}t1230"), None);
    }

    #[test]
    fn test_display() {
        let frame = CanFrame::new(0x123, &[0x01, 0xAB]);
        assert_eq!(frame.to_string(), "     123   [2]  01 AB");
        let remote = CanFrame::new_remote(0x10, 0, true);
        assert_eq!(remote.to_string(), "      10 EXT   [0]  remote request");
    }
}
