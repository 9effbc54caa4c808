//! Binary firmware wire protocol.
//!
//! Every frame is a 20-byte little-endian header followed by a payload:
//!
//! ```text
//! u32 magic | u16 major | u16 minor | u16 type | u16 flags | u32 payload_len | u32 sequence
//! ```
//!
//! Payload codecs are plain functions over byte slices; nothing here touches
//! a socket except [`read_frame`] and [`write_frame`].

use std::io::{self, Read, Write};

use thiserror::Error;

pub const MAGIC: u32 = 0x5746_5452;
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 1;
pub const HEADER_SIZE: usize = 20;
pub const MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

pub const PIN_COUNT: usize = 70;
pub const ANALOG_COUNT: usize = 16;
pub const BOARD_ID_SIZE: usize = 64;
pub const BOARD_PROFILE_SIZE: usize = 64;
/// OutputState pin value for a pin the firmware does not drive.
pub const PIN_NOT_DRIVEN: u8 = 0xFF;
/// Full-scale analog input voltage.
pub const ANALOG_REFERENCE_VOLTS: f32 = 5.0;

/// Capability flags exchanged in Hello/HelloAck.
pub mod flags {
    pub const TIMESTAMP: u32 = 1 << 0;
    pub const PERF: u32 = 1 << 1;
    pub const LOCKSTEP: u32 = 1 << 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    Hello = 1,
    HelloAck = 2,
    LoadProgram = 3,
    Step = 4,
    OutputState = 5,
    Serial = 6,
    Status = 7,
    Log = 8,
    Error = 9,
    MemoryPatch = 10,
}

impl MessageType {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => Self::Hello,
            2 => Self::HelloAck,
            3 => Self::LoadProgram,
            4 => Self::Step,
            5 => Self::OutputState,
            6 => Self::Serial,
            7 => Self::Status,
            8 => Self::Log,
            9 => Self::Error,
            10 => Self::MemoryPatch,
            _ => return None,
        })
    }
}

/// Header and payload decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame header too small")]
    HeaderTooSmall,
    #[error("invalid magic 0x{0:08X}")]
    InvalidMagic(u32),
    #[error("unsupported protocol major version {0}")]
    UnsupportedMajor(u16),
    #[error("payload of {0} bytes exceeds limit")]
    PayloadTooLarge(u32),
    #[error("{message} payload too short: expected {expected} bytes, got {actual}")]
    PayloadTooShort {
        message: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl ProtocolError {
    /// Short machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::HeaderTooSmall => "header_too_small",
            Self::InvalidMagic(_) => "invalid_magic",
            Self::UnsupportedMajor(_) => "unsupported_major",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::PayloadTooShort { .. } => "payload_too_short",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub version_major: u16,
    pub version_minor: u16,
    pub msg_type: u16,
    pub flags: u16,
    pub payload_len: u32,
    pub sequence: u32,
}

impl FrameHeader {
    pub fn new(msg_type: MessageType, payload_len: usize, sequence: u32) -> Self {
        Self {
            magic: MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            msg_type: msg_type as u16,
            flags: 0,
            payload_len: payload_len as u32,
            sequence,
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u16(self.msg_type)
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.version_major.to_le_bytes());
        out[6..8].copy_from_slice(&self.version_minor.to_le_bytes());
        out[8..10].copy_from_slice(&self.msg_type.to_le_bytes());
        out[10..12].copy_from_slice(&self.flags.to_le_bytes());
        out[12..16].copy_from_slice(&self.payload_len.to_le_bytes());
        out[16..20].copy_from_slice(&self.sequence.to_le_bytes());
        out
    }
}

/// Validate and decode a header. Checks run in the order size, magic,
/// major version, payload size. A newer minor version is accepted.
pub fn parse_header(bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::HeaderTooSmall);
    }
    let header = FrameHeader {
        magic: read_u32(bytes, 0),
        version_major: read_u16(bytes, 4),
        version_minor: read_u16(bytes, 6),
        msg_type: read_u16(bytes, 8),
        flags: read_u16(bytes, 10),
        payload_len: read_u32(bytes, 12),
        sequence: read_u32(bytes, 16),
    };
    if header.magic != MAGIC {
        return Err(ProtocolError::InvalidMagic(header.magic));
    }
    if header.version_major != VERSION_MAJOR {
        return Err(ProtocolError::UnsupportedMajor(header.version_major));
    }
    if header.payload_len as usize > MAX_PAYLOAD_BYTES {
        return Err(ProtocolError::PayloadTooLarge(header.payload_len));
    }
    Ok(header)
}

/// A decoded header plus its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

/// Header followed by payload, ready to write.
pub fn encode_frame(msg_type: MessageType, sequence: u32, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader::new(msg_type, payload.len(), sequence);
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

/// Read one complete frame. Header errors surface as `InvalidData`.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Frame> {
    let mut raw = [0u8; HEADER_SIZE];
    reader.read_exact(&mut raw)?;
    let header = parse_header(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut payload = vec![0u8; header.payload_len as usize];
    reader.read_exact(&mut payload)?;
    Ok(Frame { header, payload })
}

pub fn write_frame<W: Write>(
    writer: &mut W,
    msg_type: MessageType,
    sequence: u32,
    payload: &[u8],
) -> io::Result<()> {
    writer.write_all(&encode_frame(msg_type, sequence, payload))?;
    writer.flush()
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Hello and HelloAck payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub flags: u32,
    pub pin_count: u32,
    pub board_id_size: u32,
    pub analog_count: u32,
}

impl Capabilities {
    pub const SIZE: usize = 16;

    /// What this client advertises.
    pub fn client() -> Self {
        Self {
            flags: flags::LOCKSTEP | flags::TIMESTAMP | flags::PERF,
            pin_count: PIN_COUNT as u32,
            board_id_size: BOARD_ID_SIZE as u32,
            analog_count: ANALOG_COUNT as u32,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.pin_count.to_le_bytes());
        out.extend_from_slice(&self.board_id_size.to_le_bytes());
        out.extend_from_slice(&self.analog_count.to_le_bytes());
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len("Hello", payload, Self::SIZE)?;
        Ok(Self {
            flags: read_u32(payload, 0),
            pin_count: read_u32(payload, 4),
            board_id_size: read_u32(payload, 8),
            analog_count: read_u32(payload, 12),
        })
    }

    pub fn has(&self, flag: u32) -> bool {
        self.flags & flag == flag
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProgram {
    pub board_id: String,
    pub board_profile: String,
    pub image: Vec<u8>,
}

impl LoadProgram {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BOARD_ID_SIZE + BOARD_PROFILE_SIZE + self.image.len());
        write_fixed_string(&mut out, &self.board_id, BOARD_ID_SIZE);
        write_fixed_string(&mut out, &self.board_profile, BOARD_PROFILE_SIZE);
        out.extend_from_slice(&self.image);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let header = BOARD_ID_SIZE + BOARD_PROFILE_SIZE;
        ensure_len("LoadProgram", payload, header)?;
        Ok(Self {
            board_id: read_fixed_string(&payload[..BOARD_ID_SIZE]),
            board_profile: read_fixed_string(&payload[BOARD_ID_SIZE..header]),
            image: payload[header..].to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPayload {
    pub board_id: String,
    pub delta_micros: u32,
    pub pins: [u8; PIN_COUNT],
    pub analog: [u16; ANALOG_COUNT],
}

impl StepPayload {
    pub const SIZE: usize = BOARD_ID_SIZE + 4 + PIN_COUNT + ANALOG_COUNT * 2;

    /// Build from logical inputs. A pin is 1 when its input is > 0, and
    /// analog voltages are scaled to 10-bit codes.
    pub fn from_inputs(board_id: &str, delta_micros: u32, pins: &[i32], analog_volts: &[f32]) -> Self {
        let mut encoded_pins = [0u8; PIN_COUNT];
        for (slot, value) in encoded_pins.iter_mut().zip(pins) {
            *slot = u8::from(*value > 0);
        }
        let mut analog = [0u16; ANALOG_COUNT];
        for (slot, volts) in analog.iter_mut().zip(analog_volts) {
            *slot = encode_analog(*volts);
        }
        Self {
            board_id: board_id.to_string(),
            delta_micros,
            pins: encoded_pins,
            analog,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        write_fixed_string(&mut out, &self.board_id, BOARD_ID_SIZE);
        out.extend_from_slice(&self.delta_micros.to_le_bytes());
        out.extend_from_slice(&self.pins);
        for value in self.analog {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len("Step", payload, Self::SIZE)?;
        let mut pins = [0u8; PIN_COUNT];
        let pin_start = BOARD_ID_SIZE + 4;
        pins.copy_from_slice(&payload[pin_start..pin_start + PIN_COUNT]);
        let analog_start = pin_start + PIN_COUNT;
        let mut analog = [0u16; ANALOG_COUNT];
        for (i, slot) in analog.iter_mut().enumerate() {
            *slot = read_u16(payload, analog_start + i * 2);
        }
        Ok(Self {
            board_id: read_fixed_string(&payload[..BOARD_ID_SIZE]),
            delta_micros: read_u32(payload, BOARD_ID_SIZE),
            pins,
            analog,
        })
    }
}

/// Pin outputs reported by the firmware after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputState {
    pub board_id: String,
    /// Echo of the Step header sequence this output answers.
    pub sequence: u64,
    pub pins: [u8; PIN_COUNT],
}

impl OutputState {
    pub const SIZE: usize = BOARD_ID_SIZE + 8 + PIN_COUNT;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        write_fixed_string(&mut out, &self.board_id, BOARD_ID_SIZE);
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.pins);
        out
    }

    /// Trailing extension bytes are ignored.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len("OutputState", payload, Self::SIZE)?;
        let mut pins = [0u8; PIN_COUNT];
        pins.copy_from_slice(&payload[BOARD_ID_SIZE + 8..Self::SIZE]);
        Ok(Self {
            board_id: read_fixed_string(&payload[..BOARD_ID_SIZE]),
            sequence: read_u64(payload, BOARD_ID_SIZE),
            pins,
        })
    }

    /// Pin levels with undriven pins as `-1`.
    pub fn pin_levels(&self) -> Vec<i32> {
        self.pins
            .iter()
            .map(|p| if *p == PIN_NOT_DRIVEN { -1 } else { *p as i32 })
            .collect()
    }
}

/// Serial bytes written by the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPayload {
    pub board_id: String,
    pub data: Vec<u8>,
}

impl SerialPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BOARD_ID_SIZE + self.data.len());
        write_fixed_string(&mut out, &self.board_id, BOARD_ID_SIZE);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len("Serial", payload, BOARD_ID_SIZE)?;
        Ok(Self {
            board_id: read_fixed_string(&payload[..BOARD_ID_SIZE]),
            data: payload[BOARD_ID_SIZE..].to_vec(),
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Unknown,
    Info,
    Warning,
    Error,
}

impl From<u8> for LogLevel {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Info,
            2 => Self::Warning,
            3 => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl From<LogLevel> for u8 {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Unknown => 0,
            LogLevel::Info => 1,
            LogLevel::Warning => 2,
            LogLevel::Error => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPayload {
    pub board_id: String,
    pub level: LogLevel,
    pub text: String,
}

impl LogPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BOARD_ID_SIZE + 1 + self.text.len());
        write_fixed_string(&mut out, &self.board_id, BOARD_ID_SIZE);
        out.push(self.level.into());
        out.extend_from_slice(self.text.as_bytes());
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len("Log", payload, BOARD_ID_SIZE + 1)?;
        Ok(Self {
            board_id: read_fixed_string(&payload[..BOARD_ID_SIZE]),
            level: LogLevel::from(payload[BOARD_ID_SIZE]),
            text: String::from_utf8_lossy(&payload[BOARD_ID_SIZE + 1..]).into_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    pub board_id: String,
    pub code: u32,
    pub message: String,
}

impl ErrorPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BOARD_ID_SIZE + 4 + self.message.len());
        write_fixed_string(&mut out, &self.board_id, BOARD_ID_SIZE);
        out.extend_from_slice(&self.code.to_le_bytes());
        out.extend_from_slice(self.message.as_bytes());
        out
    }

    /// An empty message becomes `Firmware error code {code}`.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len("Error", payload, BOARD_ID_SIZE + 4)?;
        let code = read_u32(payload, BOARD_ID_SIZE);
        let text = &payload[BOARD_ID_SIZE + 4..];
        let message = if text.is_empty() {
            format!("Firmware error code {}", code)
        } else {
            String::from_utf8_lossy(text).into_owned()
        };
        Ok(Self {
            board_id: read_fixed_string(&payload[..BOARD_ID_SIZE]),
            code,
            message,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    Flash,
    Sram,
    Io,
    Eeprom,
    Other(u8),
}

impl From<u8> for MemoryType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Flash,
            2 => Self::Sram,
            3 => Self::Io,
            4 => Self::Eeprom,
            other => Self::Other(other),
        }
    }
}

impl From<MemoryType> for u8 {
    fn from(kind: MemoryType) -> Self {
        match kind {
            MemoryType::Flash => 1,
            MemoryType::Sram => 2,
            MemoryType::Io => 3,
            MemoryType::Eeprom => 4,
            MemoryType::Other(v) => v,
        }
    }
}

/// Write into a firmware memory region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPatch {
    pub board_id: String,
    pub memory_type: MemoryType,
    pub address: u32,
    pub data: Vec<u8>,
}

impl MemoryPatch {
    const HEADER: usize = BOARD_ID_SIZE + 4 + 4 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER + self.data.len());
        write_fixed_string(&mut out, &self.board_id, BOARD_ID_SIZE);
        out.push(self.memory_type.into());
        out.extend_from_slice(&[0u8; 3]);
        out.extend_from_slice(&self.address.to_le_bytes());
        out.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len("MemoryPatch", payload, Self::HEADER)?;
        let length = read_u32(payload, BOARD_ID_SIZE + 8) as usize;
        ensure_len("MemoryPatch", payload, Self::HEADER + length)?;
        Ok(Self {
            board_id: read_fixed_string(&payload[..BOARD_ID_SIZE]),
            memory_type: MemoryType::from(payload[BOARD_ID_SIZE]),
            address: read_u32(payload, BOARD_ID_SIZE + 4),
            data: payload[Self::HEADER..Self::HEADER + length].to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Clamp to `[0, 5]` V and scale to a 10-bit code.
pub fn encode_analog(volts: f32) -> u16 {
    let v = if volts.is_nan() {
        0.0
    } else {
        volts.clamp(0.0, ANALOG_REFERENCE_VOLTS)
    };
    (v / ANALOG_REFERENCE_VOLTS * 1023.0).round() as u16
}

/// NUL-padded field of `width` bytes holding at most `width - 1` bytes of text.
pub fn write_fixed_string(out: &mut Vec<u8>, value: &str, width: usize) {
    let limit = width.saturating_sub(1);
    let len = value
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|end| *end <= limit)
        .last()
        .unwrap_or(0);
    out.extend_from_slice(&value.as_bytes()[..len]);
    out.resize(out.len() + (width - len), 0);
}

/// Text up to the first NUL.
pub fn read_fixed_string(field: &[u8]) -> String {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn ensure_len(message: &'static str, payload: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if payload.len() < expected {
        return Err(ProtocolError::PayloadTooShort {
            message,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}
