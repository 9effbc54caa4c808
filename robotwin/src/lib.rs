//! RoboTwin - deterministic simulation kernel for microcontroller circuits
//!
//! This library couples a nodal (MNA) circuit solver with virtual AVR boards
//! and external firmware engines, advancing everything in fixed ticks and
//! publishing one telemetry frame per tick.
//!
//! # Quick Start
//!
//! ```no_run
//! use robotwin::{SimOptions, SimulationCore};
//! use std::path::Path;
//!
//! let options = SimOptions {
//!     ticks: 50,
//!     ..SimOptions::default()
//! };
//! let summary = SimulationCore::run_file(Path::new("circuit.json"), &options).unwrap();
//!
//! for message in &summary.diagnostics {
//!     println!("{}", message);
//! }
//! ```
//!
//! # Features
//!
//! - **Circuit solving**: resistors, LEDs, switches and sources, solved per island
//! - **Virtual boards**: Uno/Nano/ProMini/Mega profiles, Intel HEX loading, a small AVR core
//! - **Firmware lockstep**: binary wire protocol and a reconnecting client
//! - **Replay**: golden traces and JSON-lines telemetry recording

pub mod circuit;
pub mod core;
pub mod host;
pub mod ipc;
pub mod runtime;
pub mod telemetry;

// Re-export main types
pub use crate::core::{load_circuit, RunSummary, SimError, SimOptions, SimulationCore};
pub use circuit::{CircuitSolver, CircuitSpec, ComponentSpec, NetSpec, SolverOptions};
pub use host::{GoldenTrace, PinSource, SimulationRecorder, TelemetrySink, TickOrchestrator};
pub use ipc::{FirmwareClient, FirmwareClientOptions, FirmwareEngine};
pub use runtime::{BoardProfile, VirtualBoard};
pub use telemetry::TelemetryFrame;

/// Parse a circuit from JSON text (convenience wrapper).
pub fn parse_circuit(text: &str) -> Result<CircuitSpec, SimError> {
    CircuitSpec::from_json(text).map_err(|e| SimError::Parse(e.to_string()))
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        CircuitSpec, ComponentSpec, FirmwareEngine, RunSummary, SimError, SimOptions,
        SimulationCore, TelemetryFrame, TickOrchestrator, VirtualBoard,
    };
}
