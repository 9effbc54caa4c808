//! Intel HEX loader.
//!
//! Parsing is all-or-nothing: [`load`] builds a fresh [`HexImage`] and the
//! caller commits it to board memory only on success, so a rejected file
//! never leaves a partially written flash behind.

use thiserror::Error;

/// Errors raised while parsing HEX text. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexError {
    #[error("HEX text is empty.")]
    Empty,
    #[error("HEX line {0} missing ':' prefix.")]
    MissingPrefix(usize),
    #[error("HEX line {0} too short.")]
    TooShort(usize),
    #[error("HEX line {0} invalid length.")]
    InvalidLength(usize),
    #[error("HEX line {0} invalid address.")]
    InvalidAddress(usize),
    #[error("HEX line {0} invalid record type.")]
    InvalidRecordType(usize),
    #[error("HEX line {0} missing data/checksum.")]
    MissingData(usize),
    #[error("HEX line {0} invalid data byte.")]
    InvalidDataByte(usize),
    #[error("HEX line {0} invalid extended address.")]
    InvalidExtendedAddress(usize),
    #[error("HEX line {0} invalid checksum.")]
    InvalidChecksum(usize),
    #[error("HEX line {0} checksum mismatch.")]
    ChecksumMismatch(usize),
    #[error("HEX contains no data records.")]
    NoData,
}

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXTENDED_LINEAR: u8 = 0x04;

/// Flat memory image produced by the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexImage {
    data: Vec<u8>,
    min_address: Option<usize>,
    max_address: Option<usize>,
}

impl HexImage {
    pub fn new(size_bytes: usize) -> Self {
        Self {
            data: vec![0; size_bytes],
            min_address: None,
            max_address: None,
        }
    }

    /// Write one byte. Addresses outside the image are dropped.
    pub fn write_byte(&mut self, address: usize, value: u8) {
        let Some(slot) = self.data.get_mut(address) else {
            return;
        };
        *slot = value;
        self.min_address = Some(self.min_address.map_or(address, |m| m.min(address)));
        self.max_address = Some(self.max_address.map_or(address, |m| m.max(address)));
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn has_data(&self) -> bool {
        self.max_address.is_some()
    }

    /// Lowest and highest written addresses.
    pub fn address_range(&self) -> Option<(usize, usize)> {
        Some((self.min_address?, self.max_address?))
    }
}

/// Parse `text` into an image of `size_bytes` bytes.
pub fn load(text: &str, size_bytes: usize) -> Result<HexImage, HexError> {
    if text.trim().is_empty() {
        return Err(HexError::Empty);
    }

    let mut image = HexImage::new(size_bytes);
    let mut upper: usize = 0;

    for (index, raw_line) in text.lines().enumerate() {
        let n = index + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with(':') {
            return Err(HexError::MissingPrefix(n));
        }
        if line.len() < 11 {
            return Err(HexError::TooShort(n));
        }

        let length = hex_byte(line, 1).ok_or(HexError::InvalidLength(n))?;
        let address = hex_word(line, 3).ok_or(HexError::InvalidAddress(n))?;
        let record_type = hex_byte(line, 7).ok_or(HexError::InvalidRecordType(n))?;

        let data_start = 9;
        let checksum_index = data_start + length as usize * 2;
        if line.len() < checksum_index + 2 {
            return Err(HexError::MissingData(n));
        }

        let mut sum: u32 = length as u32
            + (address >> 8) as u32
            + (address & 0xFF) as u32
            + record_type as u32;

        match record_type {
            RECORD_DATA => {
                // Stage the record so a bad byte later in the line leaves no trace.
                let mut bytes = Vec::with_capacity(length as usize);
                for i in 0..length as usize {
                    let byte = hex_byte(line, data_start + i * 2)
                        .ok_or(HexError::InvalidDataByte(n))?;
                    sum += byte as u32;
                    bytes.push(byte);
                }
                let base = (upper << 16) + address as usize;
                for (i, byte) in bytes.into_iter().enumerate() {
                    image.write_byte(base + i, byte);
                }
            }
            RECORD_EXTENDED_LINEAR => {
                let value = hex_word(line, data_start).ok_or(HexError::InvalidExtendedAddress(n))?;
                sum += (value >> 8) as u32 + (value & 0xFF) as u32;
                upper = value as usize;
            }
            RECORD_EOF => {}
            _ => {
                for i in 0..length as usize {
                    let byte = hex_byte(line, data_start + i * 2)
                        .ok_or(HexError::InvalidDataByte(n))?;
                    sum += byte as u32;
                }
            }
        }

        let checksum = hex_byte(line, checksum_index).ok_or(HexError::InvalidChecksum(n))?;
        sum += checksum as u32;
        if sum & 0xFF != 0 {
            return Err(HexError::ChecksumMismatch(n));
        }

        if record_type == RECORD_EOF {
            break;
        }
    }

    if !image.has_data() {
        return Err(HexError::NoData);
    }
    Ok(image)
}

fn hex_byte(line: &str, index: usize) -> Option<u8> {
    let digits = line.get(index..index + 2)?;
    u8::from_str_radix(digits, 16).ok()
}

fn hex_word(line: &str, index: usize) -> Option<u16> {
    let digits = line.get(index..index + 4)?;
    u16::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLINK_HEX: &str = ":0C0000000C9434000C943E000C943E0064\n:00000001FF\n";

    #[test]
    fn test_load_single_record() {
        let image = load(BLINK_HEX, 64).unwrap();
        assert_eq!(
            &image.data()[..12],
            &[0x0C, 0x94, 0x34, 0x00, 0x0C, 0x94, 0x3E, 0x00, 0x0C, 0x94, 0x3E, 0x00]
        );
        assert_eq!(image.address_range(), Some((0, 11)));
    }

    #[test]
    fn test_checksum_mismatch_is_line_numbered() {
        let bad = ":0C0000000C9434000C943E000C943E0065\n:00000001FF\n";
        let err = load(bad, 64).unwrap_err();
        assert_eq!(err, HexError::ChecksumMismatch(1));
        assert_eq!(err.to_string(), "HEX line 1 checksum mismatch.");
    }

    #[test]
    fn test_extended_address() {
        let text = ":020000040001F9\n:0100000055AA\n:00000001FF\n";
        let image = load(text, 0x20000).unwrap();
        assert_eq!(image.data()[0x10000], 0x55);
        assert_eq!(image.address_range(), Some((0x10000, 0x10000)));
    }

    #[test]
    fn test_eof_stops_parsing() {
        let text = ":0100000055AA\n:00000001FF\ngarbage after eof\n";
        assert!(load(text, 16).is_ok());
    }

    #[test]
    fn test_field_errors() {
        assert_eq!(load("", 16).unwrap_err(), HexError::Empty);
        assert_eq!(load("0100000055AA", 16).unwrap_err(), HexError::MissingPrefix(1));
        assert_eq!(load(":0100", 16).unwrap_err(), HexError::TooShort(1));
        assert_eq!(load(":ZZ00000055AA", 16).unwrap_err(), HexError::InvalidLength(1));
        assert_eq!(load(":01ZZ000055AA", 16).unwrap_err(), HexError::InvalidAddress(1));
        assert_eq!(load(":010000ZZ55AA", 16).unwrap_err(), HexError::InvalidRecordType(1));
        assert_eq!(load(":0400000055AA", 16).unwrap_err(), HexError::MissingData(1));
        assert_eq!(load(":01000000ZZAA", 16).unwrap_err(), HexError::InvalidDataByte(1));
        assert_eq!(load(":0100000055ZZ", 16).unwrap_err(), HexError::InvalidChecksum(1));
        assert_eq!(
            load(":00000001FF\n", 16).unwrap_err(),
            HexError::NoData
        );
    }

    #[test]
    fn test_other_record_types_are_checked() {
        // Type 03 (start segment address) with a valid checksum is skipped.
        let text = ":0400000300003800C1\n:0100000055AA\n:00000001FF\n";
        let image = load(text, 16).unwrap();
        assert_eq!(image.data()[0], 0x55);
        let bad = ":0400000300003800C2\n";
        assert_eq!(load(bad, 16).unwrap_err(), HexError::ChecksumMismatch(1));
    }

    #[test]
    fn test_out_of_range_writes_are_dropped() {
        let err = load(":01001000559A", 4).unwrap_err();
        assert_eq!(err, HexError::NoData);
    }
}
