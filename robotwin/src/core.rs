//! Simulation run facade shared by the CLI and library callers.
//! No process-level state: everything a run needs is in [`SimOptions`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::circuit::{CircuitSpec, SolverOptions};
use crate::host::orchestrator::{PinSource, TickOrchestrator};
use crate::host::recorder::SimulationRecorder;
use crate::ipc::ClientError;
use crate::runtime::HexError;
use crate::telemetry::TelemetryFrame;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HEX error: {0}")]
    Hex(#[from] HexError),
    #[error("Firmware client error: {0}")]
    Client(#[from] ClientError),
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for SimError {
    fn from(e: serde_json::Error) -> Self {
        SimError::Parse(e.to_string())
    }
}

/// Options for a simulation run (CLI or library).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimOptions {
    pub dt_seconds: f64,
    pub ticks: u64,
    /// Directory for `frames.jsonl` / `events.jsonl`.
    pub record_path: Option<PathBuf>,
    /// Firmware per board id, applied after the circuit's own properties.
    /// Accepts a firmware string, HEX text or a path to a `.hex` file.
    pub board_firmware: BTreeMap<String, String>,
    pub solver: SolverOptions,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            dt_seconds: 0.01,
            ticks: 100,
            record_path: None,
            board_firmware: BTreeMap::new(),
            solver: SolverOptions::default(),
        }
    }
}

/// Outcome of [`SimulationCore::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub circuit_id: String,
    pub ticks: u64,
    pub time_seconds: f64,
    /// Every distinct diagnostic seen during the run, sorted.
    pub diagnostics: Vec<String>,
    pub final_frame: Option<TelemetryFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl RunSummary {
    pub fn has_diagnostics(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// Read a circuit description from a JSON file.
pub fn load_circuit(path: &Path) -> Result<CircuitSpec, SimError> {
    let text = std::fs::read_to_string(path)?;
    Ok(CircuitSpec::from_json(&text)?)
}

pub struct SimulationCore;

impl SimulationCore {
    /// Run a circuit file for `options.ticks` ticks with emulated boards.
    pub fn run_file(path: &Path, options: &SimOptions) -> Result<RunSummary, SimError> {
        let spec = load_circuit(path)?;
        Self::run(spec, options)
    }

    pub fn run(spec: CircuitSpec, options: &SimOptions) -> Result<RunSummary, SimError> {
        if !(options.dt_seconds > 0.0) {
            return Err(SimError::Other(format!(
                "dt must be positive, got {}",
                options.dt_seconds
            )));
        }
        let circuit_id = spec.id.clone();
        let mut orchestrator = TickOrchestrator::from_spec(spec, options.dt_seconds)
            .with_solver_options(options.solver.clone());

        for (board_id, firmware) in &options.board_firmware {
            match orchestrator.board_mut(board_id) {
                Some(PinSource::Emulator(board)) => board.apply_property("firmware", firmware),
                _ => return Err(SimError::Other(format!("Unknown board '{}'", board_id))),
            }
        }

        let mut recorder = match &options.record_path {
            Some(dir) => Some(
                SimulationRecorder::create(dir).map_err(|e| SimError::Other(format!("{:#}", e)))?,
            ),
            None => None,
        };

        let mut diagnostics = BTreeSet::new();
        let mut final_frame = None;
        for _ in 0..options.ticks {
            let frame = orchestrator.tick();
            diagnostics.extend(frame.validation_messages.iter().cloned());
            if let Some(rec) = recorder.as_mut() {
                if let Err(e) = rec.record_frame(&frame) {
                    warn!(error = %e, "dropping recorder after write failure");
                    recorder = None;
                }
            }
            final_frame = Some(frame);
        }

        let session_id = match recorder {
            Some(rec) => {
                let id = rec.session_id().to_string();
                rec.finish().map_err(|e| SimError::Other(format!("{:#}", e)))?;
                Some(id)
            }
            None => None,
        };

        info!(
            circuit = %circuit_id,
            ticks = orchestrator.tick_index(),
            diagnostics = diagnostics.len(),
            "simulation finished"
        );
        Ok(RunSummary {
            circuit_id,
            ticks: orchestrator.tick_index(),
            time_seconds: orchestrator.time_seconds(),
            diagnostics: diagnostics.into_iter().collect(),
            final_frame,
            session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::ComponentSpec;

    fn divider() -> CircuitSpec {
        CircuitSpec::new("divider")
            .with_component(ComponentSpec::new("B1", "Battery").with_property("voltage", "5"))
            .with_component(ComponentSpec::new("R1", "Resistor").with_property("resistance", "1k"))
            .with_component(ComponentSpec::new("R2", "Resistor").with_property("resistance", "1k"))
            .with_component(ComponentSpec::new("G", "Ground"))
            .with_net("VCC", &["B1.+", "R1.A"])
            .with_net("MID", &["R1.B", "R2.A"])
            .with_net("GND", &["R2.B", "B1.-", "G.GND"])
    }

    #[test]
    fn test_options_json_defaults() {
        let options: SimOptions = serde_json::from_str(r#"{"ticks": 5}"#).unwrap();
        assert_eq!(options.ticks, 5);
        assert_eq!(options.dt_seconds, 0.01);
        assert!(options.record_path.is_none());
    }

    #[test]
    fn test_run_divider() {
        let options = SimOptions {
            ticks: 3,
            ..SimOptions::default()
        };
        let summary = SimulationCore::run(divider(), &options).unwrap();
        assert_eq!(summary.ticks, 3);
        assert!(!summary.has_diagnostics());
        let frame = summary.final_frame.unwrap();
        assert!((frame.net_voltage("MID").unwrap() - 2.5).abs() < 1e-4);
    }

    #[test]
    fn test_run_rejects_bad_dt_and_unknown_board() {
        let options = SimOptions {
            dt_seconds: 0.0,
            ..SimOptions::default()
        };
        assert!(matches!(SimulationCore::run(divider(), &options), Err(SimError::Other(_))));

        let mut options = SimOptions::default();
        options.board_firmware.insert("U9".into(), "blink".into());
        let err = SimulationCore::run(divider(), &options).unwrap_err();
        assert_eq!(err.to_string(), "Unknown board 'U9'");
    }

    #[test]
    fn test_error_conversions() {
        let err: SimError = serde_json::from_str::<CircuitSpec>("{").unwrap_err().into();
        assert!(matches!(err, SimError::Parse(_)));
        let err: SimError = ClientError::Timeout.into();
        assert!(err.to_string().starts_with("Firmware client error"));
    }
}
