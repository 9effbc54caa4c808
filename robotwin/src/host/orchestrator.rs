//! Tick orchestration.
//!
//! Every tick runs the same three phases in order:
//!
//! 1. collect driven pin voltages and pin states from each board's single
//!    [`PinSource`]
//! 2. solve the circuit
//! 3. feed solved net voltages back to the boards as inputs and publish the
//!    frame to every [`TelemetrySink`]

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::circuit::{CircuitSolver, CircuitSpec, NetIndex, SolverOptions};
use crate::host::golden::delta_micros;
use crate::ipc::protocol::{ANALOG_COUNT, PIN_COUNT};
use crate::ipc::{FirmwareEngine, FirmwareStepRequest};
use crate::runtime::hal::{PinState, DEFAULT_HIGH_VOLTAGE};
use crate::runtime::{BoardProfile, VirtualBoard};
use crate::telemetry::TelemetryFrame;

/// Input threshold for digital levels sent to external firmware.
const LOGIC_HIGH_THRESHOLD: f64 = DEFAULT_HIGH_VOLTAGE as f64 * 0.5;

/// Pin access for a board simulated in-process by native code.
pub trait NativePinBridge: Send + Sync {
    /// Voltage the board drives on a pin. A negative or non-finite value
    /// means the pin is not driven.
    fn pin_voltage_for_avr(&self, board_index: usize, pin_index: usize) -> f32;

    fn load_firmware(&self, board_index: usize, image: &[u8]) -> bool;
}

/// Receives every published frame.
pub trait TelemetrySink {
    fn publish(&mut self, frame: &TelemetryFrame) -> anyhow::Result<()>;
}

impl TelemetrySink for Vec<TelemetryFrame> {
    fn publish(&mut self, frame: &TelemetryFrame) -> anyhow::Result<()> {
        self.push(frame.clone());
        Ok(())
    }
}

/// The one place a board's pin states come from.
pub enum PinSource {
    /// In-process CPU emulator.
    Emulator(Box<VirtualBoard>),
    /// External firmware engine stepped in lockstep.
    Firmware {
        engine: Box<dyn FirmwareEngine>,
        profile: BoardProfile,
    },
    /// Native simulator reached through a bridge.
    Native {
        bridge: Arc<dyn NativePinBridge>,
        board_index: usize,
        profile: BoardProfile,
    },
}

impl PinSource {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Emulator(_) => "emulator",
            Self::Firmware { .. } => "firmware",
            Self::Native { .. } => "native",
        }
    }

    pub fn profile(&self) -> &BoardProfile {
        match self {
            Self::Emulator(board) => board.profile(),
            Self::Firmware { profile, .. } | Self::Native { profile, .. } => profile,
        }
    }
}

impl std::fmt::Debug for PinSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinSource")
            .field("kind", &self.kind())
            .field("profile", &self.profile().id)
            .finish()
    }
}

/// Pins sampled from one board at the start of a tick.
#[derive(Debug, Default)]
struct BoardSample {
    driven: Vec<(String, f32)>,
    states: Vec<PinState>,
    pullup: Option<f64>,
    error: Option<String>,
}

/// Drives boards and the circuit solver in fixed time steps.
pub struct TickOrchestrator {
    spec: CircuitSpec,
    nets: NetIndex,
    solver: CircuitSolver,
    dt_seconds: f64,
    boards: BTreeMap<String, PinSource>,
    sinks: Vec<Box<dyn TelemetrySink>>,
    tick: u64,
    time_seconds: f64,
    last_frame: Option<TelemetryFrame>,
}

impl TickOrchestrator {
    pub fn new(spec: CircuitSpec, dt_seconds: f64) -> Self {
        let mut ignored = Vec::new();
        let nets = NetIndex::build(&spec, &mut ignored);
        Self {
            spec,
            nets,
            solver: CircuitSolver::new(),
            dt_seconds,
            boards: BTreeMap::new(),
            sinks: Vec::new(),
            tick: 0,
            time_seconds: 0.0,
            last_frame: None,
        }
    }

    /// An orchestrator with an emulated board for every board component in
    /// `spec`, each configured from the component's properties.
    pub fn from_spec(spec: CircuitSpec, dt_seconds: f64) -> Self {
        let boards: Vec<VirtualBoard> = spec
            .boards()
            .map(|component| {
                let mut board = VirtualBoard::new(&component.id, BoardProfile::lookup(&component.kind));
                board.configure(&component.properties);
                board
            })
            .collect();
        let mut orchestrator = Self::new(spec, dt_seconds);
        for board in boards {
            let id = board.id().to_string();
            orchestrator.attach(id, PinSource::Emulator(Box::new(board)));
        }
        orchestrator
    }

    pub fn with_solver_options(mut self, options: SolverOptions) -> Self {
        self.solver = CircuitSolver::with_options(options);
        self
    }

    /// Set the pin source of a board, returning the one it replaces.
    pub fn attach(&mut self, board_id: impl Into<String>, source: PinSource) -> Option<PinSource> {
        let board_id = board_id.into();
        debug!(board = %board_id, kind = source.kind(), "attaching pin source");
        self.boards.insert(board_id, source)
    }

    pub fn detach(&mut self, board_id: &str) -> Option<PinSource> {
        self.boards.remove(board_id)
    }

    pub fn add_sink(&mut self, sink: Box<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }

    pub fn spec(&self) -> &CircuitSpec {
        &self.spec
    }

    pub fn board(&self, board_id: &str) -> Option<&PinSource> {
        self.boards.get(board_id)
    }

    pub fn board_mut(&mut self, board_id: &str) -> Option<&mut PinSource> {
        self.boards.get_mut(board_id)
    }

    /// The emulated board with this id, if that is its source.
    pub fn emulator(&self, board_id: &str) -> Option<&VirtualBoard> {
        match self.boards.get(board_id) {
            Some(PinSource::Emulator(board)) => Some(&**board),
            _ => None,
        }
    }

    pub fn board_ids(&self) -> impl Iterator<Item = &str> {
        self.boards.keys().map(String::as_str)
    }

    pub fn dt_seconds(&self) -> f64 {
        self.dt_seconds
    }

    /// Ticks completed so far.
    pub fn tick_index(&self) -> u64 {
        self.tick
    }

    pub fn time_seconds(&self) -> f64 {
        self.time_seconds
    }

    pub fn last_frame(&self) -> Option<&TelemetryFrame> {
        self.last_frame.as_ref()
    }

    /// Hand a firmware image to a board's source. Emulated boards take
    /// Intel HEX text.
    pub fn load_firmware(&mut self, board_id: &str, image: &[u8]) -> bool {
        match self.boards.get_mut(board_id) {
            Some(PinSource::Emulator(board)) => match std::str::from_utf8(image) {
                Ok(text) => board.load_hex(text).is_ok(),
                Err(_) => false,
            },
            Some(PinSource::Firmware { engine, profile }) => {
                match engine.load_program(board_id, &profile.id, image) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(board = board_id, error = %e, "firmware load failed");
                        false
                    }
                }
            }
            Some(PinSource::Native {
                bridge,
                board_index,
                ..
            }) => bridge.load_firmware(*board_index, image),
            None => false,
        }
    }

    /// Run one tick and publish its frame.
    pub fn tick(&mut self) -> TelemetryFrame {
        let dt = self.dt_seconds;
        let step_sequence = self.tick + 1;

        let mut samples: BTreeMap<String, BoardSample> = BTreeMap::new();
        for (id, source) in self.boards.iter_mut() {
            let sample = match source {
                PinSource::Emulator(board) => sample_emulator(board, dt),
                PinSource::Firmware { engine, profile } => {
                    let request = firmware_request(
                        id,
                        profile,
                        step_sequence,
                        dt,
                        &self.nets,
                        self.last_frame.as_ref(),
                    );
                    sample_firmware(engine.as_mut(), profile, &request)
                }
                PinSource::Native {
                    bridge,
                    board_index,
                    profile,
                } => sample_native(bridge.as_ref(), *board_index, profile),
            };
            samples.insert(id.clone(), sample);
        }

        let mut pin_voltages = BTreeMap::new();
        let mut pin_states = BTreeMap::new();
        let mut pullups = BTreeMap::new();
        for (id, sample) in &samples {
            for (pin, volts) in &sample.driven {
                pin_voltages.insert(format!("{}.{}", id, pin), *volts);
            }
            pin_states.insert(id.clone(), sample.states.clone());
            if let Some(ohms) = sample.pullup {
                pullups.insert(id.clone(), ohms);
            }
        }

        let mut frame = self
            .solver
            .step(&self.spec, &pin_voltages, &pin_states, &pullups, dt);

        for (key, volts) in &pin_voltages {
            frame.set(format!("PIN:{}", key), *volts as f64);
        }
        for (id, sample) in &samples {
            if let Some(err) = &sample.error {
                frame.push_message(format!("Firmware step failed for '{}': {}", id, err));
            }
        }

        // Feed solved voltages back to emulated inputs.
        for (id, source) in self.boards.iter_mut() {
            let PinSource::Emulator(board) = source else {
                continue;
            };
            let Some(sample) = samples.get(id) else {
                continue;
            };
            for state in sample.states.iter().filter(|s| !s.is_output) {
                if let Some(v) = self
                    .nets
                    .net_of_pin(id, &state.pin)
                    .and_then(|net| frame.net_voltage(net))
                {
                    board.set_input_voltage(&state.pin, v as f32);
                }
            }
        }

        self.time_seconds += dt;
        frame.tick_index = self.tick;
        frame.time_seconds = self.time_seconds;
        self.tick += 1;

        for sink in &mut self.sinks {
            if let Err(e) = sink.publish(&frame) {
                warn!(tick = frame.tick_index, error = %e, "telemetry sink failed");
            }
        }
        self.last_frame = Some(frame.clone());
        frame
    }

    /// Run `ticks` ticks, returning every frame.
    pub fn run(&mut self, ticks: u64) -> Vec<TelemetryFrame> {
        (0..ticks).map(|_| self.tick()).collect()
    }
}

fn sample_emulator(board: &mut VirtualBoard, dt: f64) -> BoardSample {
    board.step(dt);
    let states = board.pin_states();
    let voltages: BTreeMap<String, f32> = board.output_voltages().into_iter().collect();
    let driven = states
        .iter()
        .filter(|s| s.is_output)
        .filter_map(|s| voltages.get(&s.pin).map(|v| (s.pin.clone(), *v)))
        .collect();
    BoardSample {
        driven,
        states,
        pullup: Some(board.hal().pullup_resistance()),
        error: None,
    }
}

fn firmware_request(
    board_id: &str,
    profile: &BoardProfile,
    step_sequence: u64,
    dt: f64,
    nets: &NetIndex,
    last: Option<&TelemetryFrame>,
) -> FirmwareStepRequest {
    let voltage = |pin: &str| -> f64 {
        nets.net_of_pin(board_id, pin)
            .and_then(|net| last.and_then(|f| f.net_voltage(net)))
            .unwrap_or(0.0)
    };
    let mut request = FirmwareStepRequest::new(board_id, step_sequence, delta_micros(dt));
    request.pins = profile
        .pins
        .iter()
        .take(PIN_COUNT)
        .map(|pin| i32::from(voltage(pin) >= LOGIC_HIGH_THRESHOLD))
        .collect();
    request.analog = (0..ANALOG_COUNT)
        .map(|ch| voltage(&format!("A{}", ch)) as f32)
        .collect();
    request
}

fn sample_firmware(
    engine: &mut dyn FirmwareEngine,
    profile: &BoardProfile,
    request: &FirmwareStepRequest,
) -> BoardSample {
    let levels = match engine.step(request) {
        Ok(result) => result.pins,
        Err(e) => {
            warn!(board = %request.board_id, error = %e, "firmware step failed");
            let states = profile
                .pins
                .iter()
                .map(|pin| PinState::new(pin.as_str(), false, false))
                .collect();
            return BoardSample {
                states,
                error: Some(e.to_string()),
                ..BoardSample::default()
            };
        }
    };
    let mut sample = BoardSample::default();
    for (i, pin) in profile.pins.iter().enumerate() {
        let level = levels.get(i).copied().unwrap_or(-1);
        let driven = level >= 0;
        if driven {
            let volts = if level > 0 { DEFAULT_HIGH_VOLTAGE } else { 0.0 };
            sample.driven.push((pin.clone(), volts));
        }
        sample.states.push(PinState::new(pin.as_str(), driven, false));
    }
    sample
}

fn sample_native(bridge: &dyn NativePinBridge, board_index: usize, profile: &BoardProfile) -> BoardSample {
    let mut sample = BoardSample::default();
    for (i, pin) in profile.pins.iter().enumerate() {
        let volts = bridge.pin_voltage_for_avr(board_index, i);
        let driven = volts.is_finite() && volts >= 0.0;
        if driven {
            sample.driven.push((pin.clone(), volts));
        }
        sample.states.push(PinState::new(pin.as_str(), driven, false));
    }
    sample
}
