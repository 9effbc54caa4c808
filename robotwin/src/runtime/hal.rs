//! Hardware abstraction layer for a virtual board.
//!
//! Each board builds its own [`PinMap`] from its profile. The HAL never owns
//! the register file; the board passes it in, so a register file is only
//! ever mutated through the board that owns it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::registers::{self, RegisterFile};

/// Logic-high output level in volts.
pub const DEFAULT_HIGH_VOLTAGE: f32 = 5.0;
/// Internal pull-up resistance in ohms.
pub const DEFAULT_PULLUP_RESISTANCE: f64 = 20_000.0;

/// Direction and pull-up state of one pin, as seen by the circuit solver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinState {
    pub pin: String,
    pub is_output: bool,
    pub pullup_enabled: bool,
}

impl PinState {
    pub fn new(pin: impl Into<String>, is_output: bool, pullup_enabled: bool) -> Self {
        Self {
            pin: pin.into(),
            is_output,
            pullup_enabled,
        }
    }
}

/// Register coordinates of one pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinMapping {
    pub ddr: u16,
    pub port: u16,
    pub input: u16,
    pub bit: u8,
}

impl PinMapping {
    fn new(ddr: u16, port: u16, input: u16, bit: u8) -> Self {
        Self {
            ddr,
            port,
            input,
            bit,
        }
    }
}

/// Ordered pin name to register mapping, built once per board.
#[derive(Debug, Clone, Default)]
pub struct PinMap {
    entries: Vec<(String, PinMapping)>,
}

impl PinMap {
    /// Build a map from pin names. Names that have no register mapping on
    /// this port layout are skipped.
    pub fn from_pins<S: AsRef<str>>(pins: &[S]) -> Self {
        let mut entries: Vec<(String, PinMapping)> = Vec::new();
        for pin in pins {
            let name = pin.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
                continue;
            }
            if let Some(mapping) = map_pin(&name.to_ascii_uppercase()) {
                entries.push((name.to_string(), mapping));
            }
        }
        Self { entries }
    }

    /// The D0-D13 / A0-A5 layout used when no pin list is available.
    pub fn default_layout() -> Self {
        let mut pins: Vec<String> = (0..=13).map(|i| format!("D{}", i)).collect();
        pins.extend((0..=5).map(|i| format!("A{}", i)));
        Self::from_pins(&pins)
    }

    pub fn get(&self, pin: &str) -> Option<PinMapping> {
        self.resolve(pin).map(|(_, m)| m)
    }

    /// Canonical name and mapping for a case-insensitive pin lookup.
    pub fn resolve(&self, pin: &str) -> Option<(&str, PinMapping)> {
        let pin = pin.trim();
        self.entries
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(pin))
            .map(|(name, mapping)| (name.as_str(), *mapping))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, PinMapping)> {
        self.entries.iter().map(|(n, m)| (n.as_str(), *m))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn map_pin(pin: &str) -> Option<PinMapping> {
    if let Some(rest) = pin.strip_prefix('D') {
        let d: u8 = rest.parse().ok()?;
        return match d {
            0..=7 => Some(PinMapping::new(
                registers::DDRD,
                registers::PORTD,
                registers::PIND,
                d,
            )),
            8..=13 => Some(PinMapping::new(
                registers::DDRB,
                registers::PORTB,
                registers::PINB,
                d - 8,
            )),
            _ => None,
        };
    }
    if let Some(rest) = pin.strip_prefix('A') {
        let a: u8 = rest.parse().ok()?;
        if a <= 5 {
            return Some(PinMapping::new(
                registers::DDRC,
                registers::PORTC,
                registers::PINC,
                a,
            ));
        }
    }
    None
}

/// Pin-level view of a board's registers plus externally imposed values.
#[derive(Debug, Clone)]
pub struct Hal {
    pin_map: PinMap,
    overrides: HashMap<String, f32>,
    inputs: HashMap<String, f32>,
    pullup_resistance: f64,
}

impl Hal {
    pub fn new(pin_map: PinMap) -> Self {
        Self {
            pin_map,
            overrides: HashMap::new(),
            inputs: HashMap::new(),
            pullup_resistance: DEFAULT_PULLUP_RESISTANCE,
        }
    }

    pub fn with_pullup_resistance(mut self, ohms: f64) -> Self {
        if ohms > 0.0 {
            self.pullup_resistance = ohms;
        }
        self
    }

    pub fn pin_map(&self) -> &PinMap {
        &self.pin_map
    }

    /// Drive a pin as an output at the given level.
    pub fn set_pin_output(&self, regs: &mut RegisterFile, pin: &str, high: bool) {
        if let Some(mapping) = self.pin_map.get(pin) {
            regs.set_bit(mapping.ddr, mapping.bit, true);
            regs.set_bit(mapping.port, mapping.bit, high);
        }
    }

    /// Force a pin to a level. Accepts `high`, `low` or a voltage such as
    /// `3.3V`. Returns false when the value is not understood or the pin is
    /// unknown.
    pub fn set_pin_override(&mut self, regs: &mut RegisterFile, pin: &str, value: &str) -> bool {
        let Some((name, _)) = self.pin_map.resolve(pin) else {
            return false;
        };
        let name = name.to_string();
        let voltage = if let Some(v) = parse_voltage(value) {
            v
        } else if value.trim().eq_ignore_ascii_case("high") {
            DEFAULT_HIGH_VOLTAGE
        } else if value.trim().eq_ignore_ascii_case("low") {
            0.0
        } else {
            return false;
        };
        self.overrides.insert(name.clone(), voltage);
        self.set_pin_output(regs, &name, voltage >= DEFAULT_HIGH_VOLTAGE * 0.5);
        true
    }

    pub fn clear_override(&mut self, pin: &str) {
        if let Some((name, _)) = self.pin_map.resolve(pin) {
            let name = name.to_string();
            self.overrides.remove(&name);
        }
    }

    /// Record the voltage the circuit applies to a pin and mirror its logic
    /// level into the pin's input register.
    pub fn set_input_voltage(&mut self, regs: &mut RegisterFile, pin: &str, voltage: f32) {
        let Some((name, mapping)) = self.pin_map.resolve(pin) else {
            return;
        };
        let name = name.to_string();
        self.inputs.insert(name, voltage);
        regs.set_bit(
            mapping.input,
            mapping.bit,
            voltage >= DEFAULT_HIGH_VOLTAGE * 0.5,
        );
    }

    /// Voltage each pin presents to the circuit, in pin-map order.
    ///
    /// Overrides win, then output drivers, then recorded input voltages.
    /// Undriven pins without an input voltage are omitted.
    pub fn output_voltages(&self, regs: &RegisterFile) -> Vec<(String, f32)> {
        let mut voltages = Vec::new();
        for (name, mapping) in self.pin_map.iter() {
            if let Some(v) = self.overrides.get(name) {
                voltages.push((name.to_string(), *v));
                continue;
            }
            if regs.get_bit(mapping.ddr, mapping.bit) {
                let high = regs.get_bit(mapping.port, mapping.bit);
                voltages.push((
                    name.to_string(),
                    if high { DEFAULT_HIGH_VOLTAGE } else { 0.0 },
                ));
                continue;
            }
            if let Some(v) = self.inputs.get(name) {
                voltages.push((name.to_string(), *v));
            }
        }
        voltages
    }

    /// Direction and pull-up state of every mapped pin.
    pub fn pin_states(&self, regs: &RegisterFile) -> Vec<PinState> {
        self.pin_map
            .iter()
            .map(|(name, mapping)| {
                let is_output = regs.get_bit(mapping.ddr, mapping.bit);
                let pullup = !is_output && regs.get_bit(mapping.port, mapping.bit);
                PinState::new(name, is_output, pullup)
            })
            .collect()
    }

    /// Driven logic level of a pin, or `None` when it is not an output.
    pub fn output_level(&self, regs: &RegisterFile, pin: &str) -> Option<bool> {
        let mapping = self.pin_map.get(pin)?;
        regs.get_bit(mapping.ddr, mapping.bit)
            .then(|| regs.get_bit(mapping.port, mapping.bit))
    }

    pub fn pullup_resistance(&self) -> f64 {
        self.pullup_resistance
    }
}

fn parse_voltage(raw: &str) -> Option<f32> {
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| *c != 'v' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f32>().ok()
}
