//! Linear circuit elements built from a [`CircuitSpec`] each tick.

use std::collections::{BTreeMap, HashSet};

use super::values::{parse_bool, parse_current, parse_value};
use super::{CircuitSpec, ComponentSpec, NetIndex};
use crate::runtime::hal::PinState;
use crate::runtime::profiles::is_board_type;

/// Resistance used for open circuits (capacitors at DC, open switches, off diodes).
pub const HIGH_RESISTANCE: f64 = 1e9;
/// Resistance of a closed switch.
pub const SWITCH_CLOSED_RESISTANCE: f64 = 0.05;

const DEFAULT_RESISTOR_OHMS: f64 = 1_000.0;
const DEFAULT_MOTOR_OHMS: f64 = 10.0;
const DEFAULT_SOURCE_VOLTS: f64 = 9.0;
const DEFAULT_FORWARD_VOLTAGE: f64 = 2.0;
const DEFAULT_MAX_CURRENT: f64 = 0.02;
const DEFAULT_DIODE_ON_RESISTANCE: f64 = 15.0;

/// Board supply pins and their fixed voltages.
const BOARD_RAILS: [(&str, f64); 4] = [("5V", 5.0), ("3V3", 3.3), ("IOREF", 5.0), ("VCC", 5.0)];

/// Where a voltage source comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Battery or bench supply.
    Supply,
    /// Board power rail.
    Rail,
    /// Digital output pin.
    PinDrive,
}

impl SourceKind {
    /// Supplies and rails power a circuit; pin drives alone do not.
    pub fn is_supply(self) -> bool {
        matches!(self, SourceKind::Supply | SourceKind::Rail)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResistorElement {
    pub id: String,
    pub net_a: String,
    pub net_b: String,
    pub ohms: f64,
}

impl ResistorElement {
    /// Open circuits are left out of the solved system.
    pub fn conducts(&self) -> bool {
        self.ohms < HIGH_RESISTANCE
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiodeElement {
    pub id: String,
    pub anode: String,
    pub cathode: String,
    pub forward_voltage: f64,
    pub max_current: f64,
    pub on_resistance: f64,
}

/// Ideal voltage source. `net_minus == None` references the island's
/// reference node.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageSourceElement {
    pub id: String,
    pub net_plus: String,
    pub net_minus: Option<String>,
    pub volts: f64,
    pub kind: SourceKind,
}

/// Per-tick inputs coming from the boards.
#[derive(Debug, Clone, Copy)]
pub struct SolverInputs<'a> {
    /// Driven pin voltages keyed `board.pin`.
    pub pin_voltages: &'a BTreeMap<String, f32>,
    /// Pin directions and pull-ups keyed by board id.
    pub pin_states: &'a BTreeMap<String, Vec<PinState>>,
    /// Per-board pull-up resistance override.
    pub pullup_resistances: &'a BTreeMap<String, f64>,
}

/// All elements of one tick.
#[derive(Debug, Clone, Default)]
pub struct ElementSet {
    pub resistors: Vec<ResistorElement>,
    pub diodes: Vec<DiodeElement>,
    pub sources: Vec<VoltageSourceElement>,
}

impl ElementSet {
    /// Translate every component. Problems are pushed onto `diagnostics`
    /// and the offending element is skipped.
    pub fn build(
        spec: &CircuitSpec,
        index: &NetIndex,
        inputs: &SolverInputs<'_>,
        default_pullup: f64,
        diagnostics: &mut Vec<String>,
    ) -> Self {
        let mut set = Self::default();
        let mut seen = HashSet::new();
        for component in &spec.components {
            if !seen.insert(component.id.as_str()) {
                diagnostics.push(format!("Duplicate component id '{}'.", component.id));
                continue;
            }
            if is_board_type(&component.kind) {
                set.add_board(component, index, inputs, default_pullup, diagnostics);
                continue;
            }
            match component.kind.to_ascii_lowercase().as_str() {
                "resistor" => {
                    let ohms = component
                        .first_property(&["resistance", "resistanceOhms"])
                        .and_then(parse_value)
                        .unwrap_or(DEFAULT_RESISTOR_OHMS);
                    set.add_two_terminal(component, index, ohms, diagnostics);
                }
                "capacitor" => {
                    set.add_two_terminal(component, index, HIGH_RESISTANCE, diagnostics);
                }
                "dcmotor" => {
                    let ohms = component
                        .property("resistance")
                        .and_then(parse_value)
                        .unwrap_or(DEFAULT_MOTOR_OHMS);
                    set.add_two_terminal(component, index, ohms, diagnostics);
                }
                "button" | "switch" => {
                    let ohms = if is_switch_closed(component) {
                        SWITCH_CLOSED_RESISTANCE
                    } else {
                        HIGH_RESISTANCE
                    };
                    set.add_two_terminal(component, index, ohms, diagnostics);
                }
                "led" | "diode" => set.add_diode(component, index, diagnostics),
                "battery" | "voltagesource" => set.add_supply(component, index, diagnostics),
                _ => {}
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.resistors.is_empty() && self.diodes.is_empty() && self.sources.is_empty()
    }

    fn add_two_terminal(
        &mut self,
        component: &ComponentSpec,
        index: &NetIndex,
        ohms: f64,
        diagnostics: &mut Vec<String>,
    ) {
        let (Some(a), Some(b)) = (
            index.net_of_pin(&component.id, "A"),
            index.net_of_pin(&component.id, "B"),
        ) else {
            diagnostics.push(format!("Component '{}' missing pin connection.", component.id));
            return;
        };
        self.resistors.push(ResistorElement {
            id: component.id.clone(),
            net_a: a.to_string(),
            net_b: b.to_string(),
            ohms,
        });
    }

    fn add_diode(&mut self, component: &ComponentSpec, index: &NetIndex, diagnostics: &mut Vec<String>) {
        let (Some(anode), Some(cathode)) = (
            index.net_of_pin(&component.id, "Anode"),
            index.net_of_pin(&component.id, "Cathode"),
        ) else {
            diagnostics.push(format!("LED '{}' missing pin connection.", component.id));
            return;
        };
        let forward_voltage = component
            .property("forwardV")
            .and_then(parse_value)
            .unwrap_or(DEFAULT_FORWARD_VOLTAGE);
        let max_current = component
            .first_property(&["If_max", "current"])
            .and_then(parse_current)
            .unwrap_or(DEFAULT_MAX_CURRENT);
        let on_resistance = component
            .property("seriesResistance")
            .and_then(parse_value)
            .filter(|r| *r > 0.0)
            .unwrap_or(DEFAULT_DIODE_ON_RESISTANCE);
        self.diodes.push(DiodeElement {
            id: component.id.clone(),
            anode: anode.to_string(),
            cathode: cathode.to_string(),
            forward_voltage,
            max_current,
            on_resistance,
        });
    }

    fn add_supply(&mut self, component: &ComponentSpec, index: &NetIndex, diagnostics: &mut Vec<String>) {
        let (Some(plus), Some(minus)) = (
            index.net_of_pin(&component.id, "+"),
            index.net_of_pin(&component.id, "-"),
        ) else {
            diagnostics.push(format!("Source '{}' missing pin connection.", component.id));
            return;
        };
        let volts = component
            .property("voltage")
            .and_then(parse_value)
            .unwrap_or(DEFAULT_SOURCE_VOLTS);
        self.sources.push(VoltageSourceElement {
            id: component.id.clone(),
            net_plus: plus.to_string(),
            net_minus: Some(minus.to_string()),
            volts,
            kind: SourceKind::Supply,
        });
    }

    fn add_board(
        &mut self,
        board: &ComponentSpec,
        index: &NetIndex,
        inputs: &SolverInputs<'_>,
        default_pullup: f64,
        diagnostics: &mut Vec<String>,
    ) {
        let ground = index.first_ground().map(str::to_string);

        for (pin, volts) in BOARD_RAILS {
            let Some(net) = index.net_of_pin(&board.id, pin) else {
                continue;
            };
            if index.is_ground(net) {
                continue;
            }
            self.sources.push(VoltageSourceElement {
                id: format!("{}.{}", board.id, pin),
                net_plus: net.to_string(),
                net_minus: ground.clone(),
                volts,
                kind: SourceKind::Rail,
            });
        }

        let prefix = format!("{}.", board.id);
        for (key, volts) in inputs.pin_voltages.range(prefix.clone()..) {
            let Some(pin) = key.strip_prefix(&prefix) else {
                break;
            };
            if !(pin.starts_with('D') || pin.starts_with('A')) {
                continue;
            }
            let Some(net) = index.net_of(key) else {
                continue;
            };
            if index.is_ground(net) {
                continue;
            }
            self.sources.push(VoltageSourceElement {
                id: key.clone(),
                net_plus: net.to_string(),
                net_minus: ground.clone(),
                volts: *volts as f64,
                kind: SourceKind::PinDrive,
            });
        }

        let Some(states) = inputs.pin_states.get(&board.id) else {
            return;
        };
        let mut pulled = states
            .iter()
            .filter(|s| !s.is_output && s.pullup_enabled)
            .peekable();
        if pulled.peek().is_none() {
            return;
        }
        let Some(vcc) = index.net_of_pin(&board.id, "5V") else {
            diagnostics.push(format!(
                "Pull-up supply missing for '{}' (5V not connected).",
                board.id
            ));
            return;
        };
        let ohms = inputs
            .pullup_resistances
            .get(&board.id)
            .copied()
            .filter(|r| *r > 0.0)
            .unwrap_or(default_pullup);
        for state in pulled {
            let Some(net) = index.net_of_pin(&board.id, &state.pin) else {
                diagnostics.push(format!(
                    "Pull-up pin '{}.{}' missing net.",
                    board.id, state.pin
                ));
                continue;
            };
            self.resistors.push(ResistorElement {
                id: format!("{}.{}:PULLUP", board.id, state.pin),
                net_a: net.to_string(),
                net_b: vcc.to_string(),
                ohms,
            });
        }
    }
}

fn is_switch_closed(component: &ComponentSpec) -> bool {
    let flagged = component
        .first_property(&["closed", "pressed"])
        .and_then(parse_bool)
        .unwrap_or(false);
    if flagged {
        return true;
    }
    component.property("state").is_some_and(|s| {
        matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "closed" | "on" | "pressed" | "true"
        )
    })
}
