//! Simulation host: tick orchestration, golden traces and recording.

pub mod golden;
pub mod orchestrator;
pub mod recorder;

pub use golden::{GoldenStep, GoldenTrace, LockstepHost, LoopbackFirmware, RecordOptions};
pub use orchestrator::{NativePinBridge, PinSource, TelemetrySink, TickOrchestrator};
pub use recorder::SimulationRecorder;
