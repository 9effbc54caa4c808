//! Modified nodal analysis DC solver.
//!
//! Each tick the spec is rebuilt into elements, split into islands and every
//! island with elements is solved independently. Diodes are handled by a
//! fixed three-pass re-linearisation: all diodes start off, each pass turns a
//! diode on when its forward drop reaches `Vf`, and the third solution is
//! taken as final. This is an approximation; it does not iterate to
//! convergence.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use super::elements::SolverInputs;
use super::elements::{ElementSet, HIGH_RESISTANCE};
use super::topology::{Island, NetGraph};
use super::{CircuitSpec, NetIndex};
use crate::runtime::hal::{PinState, DEFAULT_PULLUP_RESISTANCE};
use crate::telemetry::TelemetryFrame;

/// Linear solves per island per tick.
pub const DIODE_ROUNDS: usize = 3;
/// Resistance floor used for conductance stamps.
pub const MIN_RESISTANCE: f64 = 1e-6;
/// Pivot magnitude below which the matrix is treated as singular.
pub const PIVOT_EPSILON: f64 = 1e-9;
const ELIMINATION_EPSILON: f64 = 1e-12;
/// Leakage conductance from every node to the reference, in siemens.
pub const GMIN_CONDUCTANCE: f64 = 1e-8;

/// Solver tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Pull-up resistance for boards without an override, in ohms.
    pub default_pullup_resistance: f64,
    /// Source current above which a high-current diagnostic is raised, in amps.
    pub high_current_threshold: f64,
    /// Conductance added to every node diagonal so nets held only by open
    /// or reverse-biased elements stay solvable.
    pub gmin: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            default_pullup_resistance: DEFAULT_PULLUP_RESISTANCE,
            high_current_threshold: 2.0,
            gmin: GMIN_CONDUCTANCE,
        }
    }
}

/// Stateless DC solver.
#[derive(Debug, Clone, Default)]
pub struct CircuitSolver {
    options: SolverOptions,
}

/// Result of solving one island.
#[derive(Debug, Default)]
struct IslandSolution {
    voltages: Vec<(String, f64)>,
    source_currents: Vec<(usize, f64)>,
}

impl CircuitSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: SolverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Solve a circuit with no boards attached.
    pub fn solve(&self, spec: &CircuitSpec, dt_seconds: f64) -> TelemetryFrame {
        self.step(
            spec,
            &BTreeMap::new(),
            &BTreeMap::new(),
            &BTreeMap::new(),
            dt_seconds,
        )
    }

    /// Solve one tick.
    ///
    /// `pin_voltages` is keyed `board.pin`; `pin_states` and
    /// `pullup_resistances` are keyed by board id. Structural and numeric
    /// problems are reported in the frame's diagnostics, never as errors.
    pub fn step(
        &self,
        spec: &CircuitSpec,
        pin_voltages: &BTreeMap<String, f32>,
        pin_states: &BTreeMap<String, Vec<PinState>>,
        pullup_resistances: &BTreeMap<String, f64>,
        dt_seconds: f64,
    ) -> TelemetryFrame {
        let mut frame = TelemetryFrame::new(dt_seconds);
        if spec.nets.is_empty() {
            frame.push_message("No circuit nets available.");
            return frame;
        }

        let mut diagnostics = Vec::new();
        let index = NetIndex::build(spec, &mut diagnostics);
        let inputs = SolverInputs {
            pin_voltages,
            pin_states,
            pullup_resistances,
        };
        let elements = ElementSet::build(
            spec,
            &index,
            &inputs,
            self.options.default_pullup_resistance,
            &mut diagnostics,
        );
        let graph = NetGraph::build(&index.nets, &elements);
        let islands = graph.islands();

        let mut voltages: HashMap<String, f64> = HashMap::new();
        let mut source_currents: HashMap<usize, f64> = HashMap::new();
        let mut failed_nets: HashSet<String> = HashSet::new();
        let mut unknowns = 0usize;

        for island in &islands {
            if !island.has_elements() {
                for net in &island.nets {
                    voltages.insert(net.clone(), 0.0);
                }
                continue;
            }

            let has_ground = island.nets.iter().any(|n| index.is_ground(n));
            let reference = if has_ground {
                None
            } else {
                let first = island.nets[0].as_str();
                if index.ground.is_empty() {
                    diagnostics.push("Missing GND reference (no net contains GND pins).".into());
                }
                diagnostics.push(format!("Disconnected GND. Using net '{}' as reference.", first));
                Some(first)
            };

            let nodes: Vec<&str> = island
                .nets
                .iter()
                .map(String::as_str)
                .filter(|n| !index.is_ground(n) && Some(*n) != reference)
                .collect();
            unknowns += nodes.len() + island.sources.len();

            match solve_island(island, &elements, &nodes, reference, self.options.gmin) {
                Some(solution) => {
                    for net in &island.nets {
                        voltages.insert(net.clone(), 0.0);
                    }
                    voltages.extend(solution.voltages);
                    source_currents.extend(solution.source_currents);
                }
                None => {
                    debug!(nets = island.nets.len(), "singular island matrix");
                    failed_nets.extend(island.nets.iter().cloned());
                    diagnostics.push("Circuit solver failed (singular matrix).".into());
                    if !has_ground {
                        diagnostics.push(
                            "Solver error: missing GND reference (connect a GND pin to a net)."
                                .into(),
                        );
                    }
                    let powered = island
                        .sources
                        .iter()
                        .any(|&i| elements.sources[i].kind.is_supply());
                    if !powered {
                        diagnostics.push(
                            "Solver error: missing VCC supply (connect a 5V/3V3/IOREF rail or a battery)."
                                .into(),
                        );
                    }
                }
            }
        }

        if unknowns == 0 && !elements.is_empty() {
            diagnostics.push("No solvable nodes in circuit.".into());
        }

        for net in &index.nets {
            if let Some(v) = voltages.get(net) {
                frame.set(format!("NET:{}", net), *v);
            }
        }
        self.emit_elements(&elements, &voltages, &failed_nets, &source_currents, &mut frame, &mut diagnostics);

        // Structural checks.
        let roots = index
            .ground
            .iter()
            .map(String::as_str)
            .chain(elements.sources.iter().flat_map(|s| {
                std::iter::once(s.net_plus.as_str()).chain(s.net_minus.as_deref())
            }));
        let energized = graph.reachable_from(roots);
        for net in &index.nets {
            if !energized.contains(net) {
                diagnostics.push(format!("Floating net '{}'.", net));
            }
        }
        for net in &spec.nets {
            if net.nodes.len() < 2 {
                diagnostics.push(format!("Net '{}' has insufficient nodes.", net.id));
            }
        }
        for (board, states) in pin_states {
            for state in states.iter().filter(|s| !s.is_output) {
                match index.net_of_pin(board, &state.pin) {
                    None => diagnostics.push(format!(
                        "Floating input '{}.{}' (unconnected).",
                        board, state.pin
                    )),
                    Some(net) if !state.pullup_enabled && !energized.contains(net) => {
                        diagnostics.push(format!(
                            "Floating input '{}.{}' on net '{}'.",
                            board, state.pin, net
                        ))
                    }
                    Some(_) => {}
                }
            }
        }

        for message in diagnostics {
            frame.push_message(message);
        }
        frame
    }

    fn emit_elements(
        &self,
        elements: &ElementSet,
        voltages: &HashMap<String, f64>,
        failed: &HashSet<String>,
        source_currents: &HashMap<usize, f64>,
        frame: &mut TelemetryFrame,
        diagnostics: &mut Vec<String>,
    ) {
        let v = |net: &str| voltages.get(net).copied().unwrap_or(0.0);

        for r in &elements.resistors {
            if failed.contains(&r.net_a) || failed.contains(&r.net_b) {
                continue;
            }
            let drop = v(&r.net_a) - v(&r.net_b);
            let current = drop / r.ohms.max(MIN_RESISTANCE);
            frame.set(format!("COMP:{}:I", r.id), current);
            frame.set(format!("COMP:{}:V", r.id), drop);
            frame.set(format!("COMP:{}:P", r.id), current * current * r.ohms);
            frame.set(format!("COMP:{}:R", r.id), r.ohms);
        }

        for d in &elements.diodes {
            if failed.contains(&d.anode) || failed.contains(&d.cathode) {
                continue;
            }
            let drop = v(&d.anode) - v(&d.cathode);
            let current = if drop > d.forward_voltage {
                (drop - d.forward_voltage) / d.on_resistance.max(MIN_RESISTANCE)
            } else {
                0.0
            };
            let brightness = if d.max_current > 0.0 {
                (current.abs() / d.max_current).clamp(0.0, 1.0)
            } else {
                0.0
            };
            frame.set(format!("COMP:{}:I", d.id), current);
            frame.set(format!("COMP:{}:V", d.id), drop);
            frame.set(format!("COMP:{}:P", d.id), (current * drop).abs());
            frame.set(format!("COMP:{}:L", d.id), brightness);
            if d.max_current > 0.0 && current.abs() > d.max_current {
                diagnostics.push(format!(
                    "Component Blown: {} overcurrent {:.1}mA",
                    d.id,
                    current.abs() * 1000.0
                ));
            }
        }

        for (i, s) in elements.sources.iter().enumerate() {
            let Some(&current) = source_currents.get(&i) else {
                continue;
            };
            frame.set(format!("SRC:{}:I", s.id), current);
            frame.set(format!("SRC:{}:V", s.id), s.volts);
            frame.set(format!("SRC:{}:P", s.id), current * s.volts);
            if current.abs() > self.options.high_current_threshold {
                diagnostics.push(format!("High current on {}: {:.2}A", s.id, current));
            }
        }
    }
}

/// Dense MNA system: `a · x = b`, row-major.
struct MnaSystem {
    size: usize,
    a: Vec<f64>,
    b: Vec<f64>,
}

impl MnaSystem {
    fn new(size: usize) -> Self {
        Self {
            size,
            a: vec![0.0; size * size],
            b: vec![0.0; size],
        }
    }

    fn add(&mut self, row: usize, col: usize, value: f64) {
        self.a[row * self.size + col] += value;
    }

    fn stamp_conductance(&mut self, p: Option<usize>, q: Option<usize>, g: f64) {
        if let Some(p) = p {
            self.add(p, p, g);
        }
        if let Some(q) = q {
            self.add(q, q, g);
        }
        if let (Some(p), Some(q)) = (p, q) {
            self.add(p, q, -g);
            self.add(q, p, -g);
        }
    }

    /// Current `amps` flowing from `p` to `q` through the element.
    fn stamp_current(&mut self, p: Option<usize>, q: Option<usize>, amps: f64) {
        if let Some(p) = p {
            self.b[p] -= amps;
        }
        if let Some(q) = q {
            self.b[q] += amps;
        }
    }

    fn stamp_source(&mut self, row: usize, plus: Option<usize>, minus: Option<usize>, volts: f64) {
        if let Some(p) = plus {
            self.add(p, row, 1.0);
            self.add(row, p, 1.0);
        }
        if let Some(m) = minus {
            self.add(m, row, -1.0);
            self.add(row, m, -1.0);
        }
        self.b[row] = volts;
    }
}

fn solve_island(
    island: &Island,
    elements: &ElementSet,
    nodes: &[&str],
    reference: Option<&str>,
    gmin: f64,
) -> Option<IslandSolution> {
    let node_of: HashMap<&str, usize> = nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();
    let lookup = |net: &str| -> Option<usize> {
        if Some(net) == reference {
            None
        } else {
            node_of.get(net).copied()
        }
    };
    let n = nodes.len();
    let size = n + island.sources.len();
    if size == 0 {
        return Some(IslandSolution::default());
    }

    let mut diode_on = vec![false; island.diodes.len()];
    let mut solution = Vec::new();

    for _ in 0..DIODE_ROUNDS {
        let mut system = MnaSystem::new(size);
        for node in 0..n {
            system.add(node, node, gmin);
        }
        for &i in &island.resistors {
            let r = &elements.resistors[i];
            let g = 1.0 / r.ohms.max(MIN_RESISTANCE);
            system.stamp_conductance(lookup(&r.net_a), lookup(&r.net_b), g);
        }
        for (slot, &i) in island.diodes.iter().enumerate() {
            let d = &elements.diodes[i];
            let (a, c) = (lookup(&d.anode), lookup(&d.cathode));
            if diode_on[slot] {
                let ron = d.on_resistance.max(MIN_RESISTANCE);
                system.stamp_conductance(a, c, 1.0 / ron);
                system.stamp_current(a, c, -d.forward_voltage / ron);
            } else {
                system.stamp_conductance(a, c, 1.0 / HIGH_RESISTANCE);
            }
        }
        for (k, &i) in island.sources.iter().enumerate() {
            let s = &elements.sources[i];
            let minus = s.net_minus.as_deref().and_then(lookup);
            system.stamp_source(n + k, lookup(&s.net_plus), minus, s.volts);
        }

        solution = gauss_jordan(&mut system.a, &mut system.b, size)?;

        let voltage = |net: &str| lookup(net).map_or(0.0, |i| solution[i]);
        for (slot, &i) in island.diodes.iter().enumerate() {
            let d = &elements.diodes[i];
            diode_on[slot] = voltage(&d.anode) - voltage(&d.cathode) >= d.forward_voltage;
        }
    }

    Some(IslandSolution {
        voltages: nodes
            .iter()
            .enumerate()
            .map(|(i, net)| (net.to_string(), solution[i]))
            .collect(),
        // The MNA branch current flows into the positive terminal; report the
        // current the source delivers instead.
        source_currents: island
            .sources
            .iter()
            .enumerate()
            .map(|(k, &i)| (i, -solution[n + k]))
            .collect(),
    })
}

/// Solve `a · x = b` in place by Gauss-Jordan elimination with partial
/// pivoting. Returns `None` when a pivot falls below [`PIVOT_EPSILON`].
pub fn gauss_jordan(a: &mut [f64], b: &mut [f64], n: usize) -> Option<Vec<f64>> {
    for col in 0..n {
        let mut pivot = col;
        for row in col + 1..n {
            if a[row * n + col].abs() > a[pivot * n + col].abs() {
                pivot = row;
            }
        }
        if a[pivot * n + col].abs() < PIVOT_EPSILON {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap(pivot * n + k, col * n + k);
            }
            b.swap(pivot, col);
        }

        let p = a[col * n + col];
        for k in col..n {
            a[col * n + k] /= p;
        }
        b[col] /= p;

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row * n + col];
            if factor.abs() < ELIMINATION_EPSILON {
                continue;
            }
            for k in col..n {
                a[row * n + k] -= factor * a[col * n + k];
            }
            b[row] -= factor * b[col];
        }
    }
    Some(b.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::ComponentSpec;

    fn approx(actual: Option<f64>, expected: f64, tol: f64) {
        let actual = actual.expect("signal missing");
        assert!(
            (actual - expected).abs() <= tol,
            "expected {} got {}",
            expected,
            actual
        );
    }

    fn battery_resistor(volts: &str, ohms: &str) -> CircuitSpec {
        CircuitSpec::new("ohm")
            .with_component(ComponentSpec::new("B1", "Battery").with_property("voltage", volts))
            .with_component(ComponentSpec::new("R1", "Resistor").with_property("resistance", ohms))
            .with_component(ComponentSpec::new("G", "Ground"))
            .with_net("VCC", &["B1.+", "R1.A"])
            .with_net("GND", &["B1.-", "R1.B", "G.GND"])
    }

    #[test]
    fn test_gauss_jordan_2x2() {
        let mut a = vec![2.0, 1.0, 1.0, 3.0];
        let mut b = vec![3.0, 5.0];
        let x = gauss_jordan(&mut a, &mut b, 2).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_gauss_jordan_needs_pivoting() {
        let mut a = vec![0.0, 1.0, 1.0, 0.0];
        let mut b = vec![2.0, 3.0];
        let x = gauss_jordan(&mut a, &mut b, 2).unwrap();
        assert_eq!(x, vec![3.0, 2.0]);
    }

    #[test]
    fn test_gauss_jordan_singular() {
        let mut a = vec![1.0, 2.0, 2.0, 4.0];
        let mut b = vec![1.0, 2.0];
        assert!(gauss_jordan(&mut a, &mut b, 2).is_none());
    }

    #[test]
    fn test_ohm_baseline() {
        let frame = CircuitSolver::new().solve(&battery_resistor("5", "1k"), 0.01);
        approx(frame.net_voltage("VCC"), 5.0, 1e-9);
        approx(frame.net_voltage("GND"), 0.0, 0.0);
        approx(frame.component("R1", "I"), 0.005, 1e-9);
        approx(frame.component("R1", "P"), 0.025, 1e-9);
        approx(frame.source("B1", "I"), 0.005, 1e-6);
        assert!(frame.validation_messages.is_empty(), "{:?}", frame.validation_messages);
    }

    #[test]
    fn test_high_current() {
        let frame = CircuitSolver::new().solve(&battery_resistor("9", "1"), 0.01);
        assert!(frame.has_message("High current on B1: 9.00A"));
    }

    #[test]
    fn test_led_turns_on() {
        let spec = CircuitSpec::new("led")
            .with_component(ComponentSpec::new("B1", "Battery").with_property("voltage", "5"))
            .with_component(ComponentSpec::new("R1", "Resistor").with_property("resistance", "150"))
            .with_component(ComponentSpec::new("D1", "LED"))
            .with_net("VCC", &["B1.+", "R1.A"])
            .with_net("MID", &["R1.B", "D1.Anode"])
            .with_net("GND", &["D1.Cathode", "B1.-", "B1.GND"]);
        let frame = CircuitSolver::new().solve(&spec, 0.01);
        // (5 - 2) / (150 + 15)
        approx(frame.component("D1", "I"), 3.0 / 165.0, 1e-6);
        let brightness = frame.component("D1", "L").unwrap();
        assert!(brightness > 0.85 && brightness <= 1.0);
        assert!(!frame.has_message("Blown"));
    }

    #[test]
    fn test_led_overcurrent() {
        let spec = CircuitSpec::new("led")
            .with_component(ComponentSpec::new("B1", "Battery").with_property("voltage", "9"))
            .with_component(ComponentSpec::new("D1", "LED"))
            .with_net("VCC", &["B1.+", "D1.Anode"])
            .with_net("GND", &["D1.Cathode", "B1.-", "B1.GND"]);
        let frame = CircuitSolver::new().solve(&spec, 0.01);
        approx(frame.component("D1", "L"), 1.0, 0.0);
        assert!(frame.has_message("Component Blown: D1 overcurrent 466.7mA"));
    }

    #[test]
    fn test_reverse_diode_blocks() {
        let spec = CircuitSpec::new("rev")
            .with_component(ComponentSpec::new("B1", "Battery").with_property("voltage", "5"))
            .with_component(ComponentSpec::new("R1", "Resistor"))
            .with_component(ComponentSpec::new("D1", "Diode"))
            .with_net("VCC", &["B1.+", "R1.A"])
            .with_net("MID", &["R1.B", "D1.Cathode"])
            .with_net("GND", &["D1.Anode", "B1.-", "B1.GND"]);
        let frame = CircuitSolver::new().solve(&spec, 0.01);
        approx(frame.component("D1", "I"), 0.0, 0.0);
        approx(frame.net_voltage("MID"), 5.0, 1e-4);
    }

    #[test]
    fn test_empty_spec() {
        let frame = CircuitSolver::new().solve(&CircuitSpec::default(), 0.01);
        assert_eq!(frame.validation_messages, vec!["No circuit nets available."]);
        assert!(frame.signals.is_empty());
    }

    #[test]
    fn test_missing_ground_uses_reference() {
        let spec = CircuitSpec::new("float")
            .with_component(ComponentSpec::new("B1", "Battery").with_property("voltage", "3"))
            .with_component(ComponentSpec::new("R1", "Resistor"))
            .with_net("P", &["B1.+", "R1.A"])
            .with_net("M", &["B1.-", "R1.B"]);
        let frame = CircuitSolver::new().solve(&spec, 0.01);
        assert!(frame.has_message("Missing GND reference (no net contains GND pins)."));
        assert!(frame.has_message("Disconnected GND. Using net 'P' as reference."));
        approx(frame.net_voltage("P"), 0.0, 0.0);
        approx(frame.net_voltage("M"), -3.0, 1e-9);
        assert!(!frame.has_message("singular"));
    }

    #[test]
    fn test_shorted_source_is_singular() {
        let spec = CircuitSpec::new("short")
            .with_component(ComponentSpec::new("B1", "Battery"))
            .with_component(ComponentSpec::new("B2", "Battery").with_property("voltage", "5"))
            .with_net("P", &["B1.+", "B2.+"])
            .with_net("GND", &["B1.-", "B2.-", "B1.GND"]);
        let frame = CircuitSolver::new().solve(&spec, 0.01);
        assert!(frame.has_message("Circuit solver failed (singular matrix)."));
        assert!(!frame.has_message("missing GND reference (connect"));
        assert!(frame.net_voltage("P").is_none());
        assert!(frame.source("B1", "I").is_none());
    }

    #[test]
    fn test_pin_drive_sets_net_voltage() {
        let spec = CircuitSpec::new("pins")
            .with_component(ComponentSpec::new("U1", "ArduinoUno"))
            .with_component(ComponentSpec::new("R1", "Resistor"))
            .with_net("A", &["U1.D2", "R1.A", "R1.B"])
            .with_net("B", &["U1.D3", "U1.GND"]);
        let mut voltages = BTreeMap::new();
        voltages.insert("U1.D2".to_string(), 5.0f32);
        let frame = CircuitSolver::new().step(
            &spec,
            &voltages,
            &BTreeMap::new(),
            &BTreeMap::new(),
            0.01,
        );
        approx(frame.net_voltage("A"), 5.0, 1e-9);
        approx(frame.source("U1.D2", "I"), 0.0, 1e-6);
    }

    #[test]
    fn test_pullup_holds_input_high() {
        let spec = CircuitSpec::new("pullup")
            .with_component(ComponentSpec::new("U1", "ArduinoUno"))
            .with_component(ComponentSpec::new("S1", "Button"))
            .with_net("V5", &["U1.5V"])
            .with_net("IN", &["U1.D2", "S1.A"])
            .with_net("GND", &["S1.B", "U1.GND"]);
        let mut states = BTreeMap::new();
        states.insert("U1".to_string(), vec![PinState::new("D2", false, true)]);
        let mut overrides = BTreeMap::new();
        overrides.insert("U1".to_string(), 10_000.0);
        let solver = CircuitSolver::new();

        let open = solver.step(&spec, &BTreeMap::new(), &states, &overrides, 0.01);
        approx(open.net_voltage("IN"), 5.0, 1e-3);
        approx(open.component("U1.D2:PULLUP", "R"), 10_000.0, 0.0);
        assert!(!open.has_message("Floating input"));

        let mut pressed = spec.clone();
        pressed.components[1] = ComponentSpec::new("S1", "Button").with_property("pressed", "true");
        let closed = solver.step(&pressed, &BTreeMap::new(), &states, &overrides, 0.01);
        approx(closed.net_voltage("IN"), 5.0 * 0.05 / 10_000.05, 1e-6);
    }

    #[test]
    fn test_floating_inputs() {
        let spec = CircuitSpec::new("inputs")
            .with_component(ComponentSpec::new("U1", "ArduinoUno"))
            .with_component(ComponentSpec::new("S1", "Switch"))
            .with_net("IN", &["U1.D4", "S1.A"])
            .with_net("GND", &["S1.B", "U1.GND"]);
        let mut states = BTreeMap::new();
        states.insert(
            "U1".to_string(),
            vec![PinState::new("D4", false, false), PinState::new("D5", false, false)],
        );
        let frame = CircuitSolver::new().step(&spec, &BTreeMap::new(), &states, &BTreeMap::new(), 0.01);
        assert!(frame.has_message("Floating input 'U1.D4' on net 'IN'."));
        assert!(frame.has_message("Floating input 'U1.D5' (unconnected)."));
        assert_eq!(frame.count_messages("Floating net 'IN'."), 1);
    }

    fn off_diode_chain() -> CircuitSpec {
        CircuitSpec::new("chain")
            .with_component(ComponentSpec::new("B1", "Battery").with_property("voltage", "5"))
            .with_component(ComponentSpec::new("D1", "LED"))
            .with_component(ComponentSpec::new("D2", "LED"))
            .with_component(ComponentSpec::new("S1", "Switch"))
            .with_component(ComponentSpec::new("G", "Ground"))
            .with_net("VCC", &["B1.+", "D1.Anode"])
            .with_net("M1", &["D1.Cathode", "D2.Anode"])
            .with_net("M2", &["D2.Cathode", "S1.A"])
            .with_net("GND", &["S1.B", "B1.-", "G.GND"])
    }

    #[test]
    fn test_gmin_keeps_blocked_chain_solvable() {
        let frame = CircuitSolver::new().solve(&off_diode_chain(), 0.01);
        assert!(!frame.has_message("singular"), "{:?}", frame.validation_messages);
        let m1 = frame.net_voltage("M1").unwrap();
        let m2 = frame.net_voltage("M2").unwrap();
        assert!(m1 >= m2 && m2 >= 0.0 && m1 <= 5.0);
        assert!(frame.component("D2", "I").unwrap().abs() < 1e-6);
        approx(frame.source("B1", "I"), 0.0, 1e-6);
    }

    #[test]
    fn test_zero_gmin_blocked_chain_is_singular() {
        let solver = CircuitSolver::with_options(SolverOptions {
            gmin: 0.0,
            ..SolverOptions::default()
        });
        let frame = solver.solve(&off_diode_chain(), 0.01);
        assert!(frame.has_message("Circuit solver failed (singular matrix)."));
    }

    #[test]
    fn test_options_json_defaults() {
        let options: SolverOptions = serde_json::from_str(r#"{"high_current_threshold": 1.0}"#).unwrap();
        assert_eq!(options.gmin, GMIN_CONDUCTANCE);
        assert_eq!(options.high_current_threshold, 1.0);
    }

    #[test]
    fn test_stateless_between_ticks() {
        let solver = CircuitSolver::new();
        let spec = battery_resistor("5", "1k");
        let a = solver.solve(&spec, 0.01);
        let b = solver.solve(&spec, 0.01);
        assert_eq!(a, b);
    }
}
