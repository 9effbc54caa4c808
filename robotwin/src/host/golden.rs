//! Golden traces of lockstep firmware runs.
//!
//! A trace stores, per step, the digital inputs that were sent and the pin
//! levels the firmware answered with. Replaying the inputs against another
//! engine and diffing the answers catches behavioural drift.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::SimError;
use crate::ipc::protocol::PIN_COUNT;
use crate::ipc::{ClientError, FirmwareEngine, FirmwareStepRequest, FirmwareStepResult};

pub const TRACE_VERSION: u32 = 1;

/// Step length used by the standard input patterns.
pub const STANDARD_DT_SECONDS: f64 = 0.02;

/// Whole microseconds in `dt_seconds`, never less than one.
pub fn delta_micros(dt_seconds: f64) -> u32 {
    let micros = (dt_seconds * 1_000_000.0).round();
    if micros.is_nan() || micros < 1.0 {
        1
    } else if micros >= u32::MAX as f64 {
        u32::MAX
    } else {
        micros as u32
    }
}

/// The four input patterns golden traces are recorded with.
pub fn standard_inputs() -> Vec<Vec<i32>> {
    vec![
        vec![0, 1, 0, 1, 1, 0, 0, 1],
        vec![1, 1, 1, 0, 0, 0, 1, 0],
        vec![0, 0, 0, 0, 1, 1, 0, 0],
        vec![1, 0, 1, 0, 1, 0, 1, 0],
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenStep {
    pub step_sequence: u64,
    #[serde(default)]
    pub inputs: Vec<i32>,
    #[serde(default)]
    pub expected_pins: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenTrace {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_dt")]
    pub dt_seconds: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: Vec<GoldenStep>,
}

fn default_version() -> u32 {
    TRACE_VERSION
}

fn default_dt() -> f64 {
    STANDARD_DT_SECONDS
}

impl GoldenTrace {
    pub fn new(dt_seconds: f64) -> Self {
        Self {
            version: TRACE_VERSION,
            dt_seconds,
            metadata: BTreeMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, SimError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        debug!(path = %path.display(), steps = self.steps.len(), "saved golden trace");
        Ok(())
    }
}

/// Settings for [`record`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOptions {
    pub board_id: String,
    pub board_profile: String,
    /// Value of the `source` metadata key.
    pub source: String,
    /// Keep only this many leading pins of each answer.
    pub pin_prefix: Option<usize>,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            board_id: "board".to_string(),
            board_profile: "ArduinoUno".to_string(),
            source: "firmware_lockstep".to_string(),
            pin_prefix: None,
        }
    }
}

/// Steps one board of a firmware engine with explicit inputs.
pub struct LockstepHost<'a> {
    engine: &'a mut dyn FirmwareEngine,
    board_id: String,
    delta_micros: u32,
}

impl<'a> LockstepHost<'a> {
    pub fn new(engine: &'a mut dyn FirmwareEngine, board_id: impl Into<String>, dt_seconds: f64) -> Self {
        Self {
            engine,
            board_id: board_id.into(),
            delta_micros: delta_micros(dt_seconds),
        }
    }

    pub fn step_once(&mut self, step_sequence: u64, inputs: &[i32]) -> Result<FirmwareStepResult, ClientError> {
        let mut request = FirmwareStepRequest::new(self.board_id.clone(), step_sequence, self.delta_micros);
        request.pins = inputs.to_vec();
        self.engine.step(&request)
    }
}

/// Run `inputs` through `engine` as steps `1..=n` and capture the answers.
pub fn record(
    engine: &mut dyn FirmwareEngine,
    inputs: &[Vec<i32>],
    dt_seconds: f64,
    options: &RecordOptions,
) -> Result<GoldenTrace, ClientError> {
    let mut trace = GoldenTrace::new(dt_seconds);
    trace.metadata.insert("source".into(), options.source.clone());
    trace
        .metadata
        .insert("recorded_utc".into(), chrono::Utc::now().to_rfc3339());
    trace.metadata.insert("board_id".into(), options.board_id.clone());
    trace
        .metadata
        .insert("board_profile".into(), options.board_profile.clone());
    if let Some(prefix) = options.pin_prefix {
        trace.metadata.insert("pin_prefix".into(), prefix.to_string());
    }

    let mut host = LockstepHost::new(engine, options.board_id.clone(), dt_seconds);
    for (i, step_inputs) in inputs.iter().enumerate() {
        let step_sequence = i as u64 + 1;
        let result = host.step_once(step_sequence, step_inputs)?;
        let mut pins = result.pins;
        if let Some(prefix) = options.pin_prefix {
            pins.truncate(prefix.max(1));
        }
        trace.steps.push(GoldenStep {
            step_sequence,
            inputs: step_inputs.clone(),
            expected_pins: pins,
        });
    }
    info!(steps = trace.steps.len(), "recorded golden trace");
    Ok(trace)
}

/// Re-send the inputs of `baseline` to `engine`, producing a trace of the
/// new answers with the baseline's metadata.
pub fn replay(
    baseline: &GoldenTrace,
    engine: &mut dyn FirmwareEngine,
    board_id: &str,
) -> Result<GoldenTrace, ClientError> {
    let mut trace = GoldenTrace {
        version: baseline.version,
        dt_seconds: baseline.dt_seconds,
        metadata: baseline.metadata.clone(),
        steps: Vec::with_capacity(baseline.steps.len()),
    };
    let mut host = LockstepHost::new(engine, board_id, baseline.dt_seconds);
    for step in &baseline.steps {
        let result = host.step_once(step.step_sequence, &step.inputs)?;
        trace.steps.push(GoldenStep {
            step_sequence: step.step_sequence,
            inputs: step.inputs.clone(),
            expected_pins: result.pins,
        });
    }
    Ok(trace)
}

/// Pin-by-pin differences between two traces.
///
/// Steps are paired by position and pins compared over the shorter of the
/// two pin lists. A step count mismatch adds one final line.
pub fn diff(baseline: &GoldenTrace, candidate: &GoldenTrace) -> Vec<String> {
    let mut diffs = Vec::new();
    for (expected, actual) in baseline.steps.iter().zip(&candidate.steps) {
        for (pin, (e, a)) in expected
            .expected_pins
            .iter()
            .zip(&actual.expected_pins)
            .enumerate()
        {
            if e != a {
                diffs.push(format!(
                    "step={} pin={} expected={} actual={}",
                    expected.step_sequence, pin, e, a
                ));
            }
        }
    }
    if baseline.steps.len() != candidate.steps.len() {
        diffs.push(format!(
            "step_count expected={} actual={}",
            baseline.steps.len(),
            candidate.steps.len()
        ));
    }
    diffs
}

/// Deterministic in-process engine for replay checks.
///
/// Pins 0-7 echo the inputs, pin 8 is high on even steps and every other pin
/// is undriven. A skewed engine additionally inverts pin 0 on one step.
#[derive(Debug, Clone, Default)]
pub struct LoopbackFirmware {
    skew_step: Option<u64>,
    programs: BTreeMap<String, Vec<u8>>,
}

impl LoopbackFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skewed(step_sequence: u64) -> Self {
        Self {
            skew_step: Some(step_sequence),
            ..Self::default()
        }
    }

    pub fn program(&self, board_id: &str) -> Option<&[u8]> {
        self.programs.get(board_id).map(Vec::as_slice)
    }
}

impl FirmwareEngine for LoopbackFirmware {
    fn load_program(&mut self, board_id: &str, _board_profile: &str, image: &[u8]) -> Result<(), ClientError> {
        self.programs.insert(board_id.to_string(), image.to_vec());
        Ok(())
    }

    fn step(&mut self, request: &FirmwareStepRequest) -> Result<FirmwareStepResult, ClientError> {
        let mut pins = vec![-1; PIN_COUNT];
        for (pin, input) in pins.iter_mut().zip(request.pins.iter().take(8)) {
            *pin = i32::from(*input > 0);
        }
        pins[8] = i32::from(request.step_sequence % 2 == 0);
        if self.skew_step == Some(request.step_sequence) && pins[0] >= 0 {
            pins[0] = 1 - pins[0];
        }
        Ok(FirmwareStepResult {
            step_sequence: request.step_sequence,
            pins,
            serial: String::new(),
        })
    }
}
