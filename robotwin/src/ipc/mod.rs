//! External firmware engine integration.
//!
//! The [`FirmwareEngine`] trait is the seam the tick orchestrator and the
//! golden-trace replay step through. [`FirmwareClient`] implements it over
//! the binary wire protocol in [`protocol`].

pub mod client;
pub mod protocol;

pub use client::{ClientError, Endpoint, FirmwareClient, FirmwareClientOptions, LaunchOptions};
pub use protocol::{FrameHeader, MessageType, ProtocolError};

/// Inputs for one lockstep firmware step.
#[derive(Debug, Clone, PartialEq)]
pub struct FirmwareStepRequest {
    pub board_id: String,
    /// Caller-assigned step number, echoed back in the result.
    pub step_sequence: u64,
    pub delta_micros: u32,
    /// Digital input levels by pin index; any value > 0 reads high.
    pub pins: Vec<i32>,
    /// Analog input voltages by channel.
    pub analog: Vec<f32>,
}

impl FirmwareStepRequest {
    pub fn new(board_id: impl Into<String>, step_sequence: u64, delta_micros: u32) -> Self {
        Self {
            board_id: board_id.into(),
            step_sequence,
            delta_micros,
            pins: Vec::new(),
            analog: Vec::new(),
        }
    }
}

/// Outputs of one lockstep firmware step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareStepResult {
    pub step_sequence: u64,
    /// `0`/`1` for driven pins, `-1` for pins the firmware leaves floating.
    pub pins: Vec<i32>,
    /// Serial output accumulated since the previous step.
    pub serial: String,
}

/// Anything that can run firmware one step at a time.
pub trait FirmwareEngine: Send {
    /// Load a program image for a board. Loaded programs persist across
    /// reconnects.
    fn load_program(&mut self, board_id: &str, board_profile: &str, image: &[u8]) -> Result<(), ClientError>;

    fn step(&mut self, request: &FirmwareStepRequest) -> Result<FirmwareStepResult, ClientError>;
}
