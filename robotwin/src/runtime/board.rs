//! A single virtual microcontroller board.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

use super::clock::VirtualClock;
use super::cpu::Cpu;
use super::hal::{Hal, PinMap, PinState};
use super::hex::{self, HexError};
use super::memory::VirtualMemory;
use super::profiles::BoardProfile;
use super::program::Program;
use super::registers::RegisterFile;

/// One board instance: clock, register file, HAL, CPU and memory.
///
/// The register file is owned here and lent to the CPU and HAL per call, so
/// no two boards can ever observe each other's registers.
#[derive(Debug, Clone)]
pub struct VirtualBoard {
    id: String,
    profile: BoardProfile,
    clock: VirtualClock,
    registers: RegisterFile,
    hal: Hal,
    cpu: Cpu,
    memory: VirtualMemory,
    firmware_source: String,
    firmware_loaded: bool,
}

impl VirtualBoard {
    pub fn new(id: impl Into<String>, profile: BoardProfile) -> Self {
        let clock_hz = if profile.clock_hz > 0.0 {
            profile.clock_hz
        } else {
            super::profiles::DEFAULT_CLOCK_HZ
        };
        let pin_map = PinMap::from_pins(profile.hal_pins());
        Self {
            id: id.into(),
            clock: VirtualClock::new(clock_hz),
            registers: RegisterFile::new(),
            hal: Hal::new(pin_map),
            cpu: Cpu::new(),
            memory: VirtualMemory::for_profile(&profile),
            profile,
            firmware_source: String::new(),
            firmware_loaded: false,
        }
    }

    /// A board using the Uno profile.
    pub fn uno(id: impl Into<String>) -> Self {
        Self::new(id, BoardProfile::arduino_uno())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile(&self) -> &BoardProfile {
        &self.profile
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn hal(&self) -> &Hal {
        &self.hal
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn memory(&self) -> &VirtualMemory {
        &self.memory
    }

    pub fn firmware_source(&self) -> &str {
        &self.firmware_source
    }

    pub fn firmware_loaded(&self) -> bool {
        self.firmware_loaded
    }

    pub fn load_program(&mut self, program: Program) {
        self.cpu.load_program(program);
        self.firmware_loaded = true;
    }

    /// Advance simulated time and run the cycles it covers.
    pub fn step(&mut self, dt_seconds: f64) {
        if !(dt_seconds > 0.0) {
            return;
        }
        let cycles = self.clock.advance(dt_seconds);
        self.cpu.execute_cycles(&mut self.registers, cycles);
    }

    /// Parse HEX text and load it as the running program.
    ///
    /// Flash and the CPU are only touched once the whole text validates.
    pub fn load_hex(&mut self, text: &str) -> Result<(), HexError> {
        let image = match hex::load(text, self.memory.flash.len()) {
            Ok(image) => image,
            Err(e) => {
                warn!(board = %self.id, error = %e, "rejected HEX image");
                self.firmware_source = format!("hex:invalid ({})", e);
                return Err(e);
            }
        };
        self.memory.commit_flash(image.data());
        let program = Program::from_image(&image);
        self.firmware_source = format!(
            "hex:{} decoded, {} unknown",
            program.decoded(),
            program.unknown
        );
        debug!(board = %self.id, source = %self.firmware_source, "loaded HEX image");
        self.load_program(program);
        Ok(())
    }

    fn load_hex_path(&mut self, path: &str) -> bool {
        let trimmed = path.trim();
        if trimmed.is_empty() || !Path::new(trimmed).is_file() {
            warn!(board = %self.id, path = trimmed, "HEX file not found");
            return false;
        }
        match std::fs::read_to_string(trimmed) {
            Ok(text) => {
                if self.load_hex(&text).is_ok() {
                    self.firmware_source = trimmed.to_string();
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                warn!(board = %self.id, path = trimmed, error = %e, "failed to read HEX file");
                false
            }
        }
    }

    fn load_firmware_string(&mut self, value: &str) {
        let program = Program::from_firmware_string(value, self.hal.pin_map());
        self.load_program(program);
        self.firmware_source = value.to_string();
    }

    fn clear_firmware(&mut self) {
        self.firmware_source.clear();
        self.firmware_loaded = false;
    }

    /// Apply one configuration property. Keys are case-insensitive.
    pub fn apply_property(&mut self, key: &str, value: &str) {
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        let lower = key.to_ascii_lowercase();

        if let Some(pin) = lower.strip_prefix("pin:") {
            let pin = key[key.len() - pin.len()..].to_string();
            if !self.hal.set_pin_override(&mut self.registers, &pin, value) {
                debug!(board = %self.id, pin = %pin, value, "ignored pin override");
            }
            return;
        }

        match lower.as_str() {
            "virtualfirmware" => {
                if value.trim().is_empty() {
                    self.clear_firmware();
                } else {
                    self.load_firmware_string(value);
                }
            }
            "firmware" => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    self.clear_firmware();
                } else if trimmed.starts_with(':') {
                    if self.load_hex(trimmed).is_err() {
                        self.load_firmware_string(value);
                    }
                } else if is_hex_path(trimmed) {
                    if !self.load_hex_path(trimmed) {
                        self.load_firmware_string(value);
                    }
                } else {
                    self.load_firmware_string(value);
                }
            }
            "firmwarehex" | "hex" => {
                if let Err(e) = self.load_hex(value) {
                    debug!(board = %self.id, error = %e, "keeping previous program");
                }
            }
            "firmwarepath" | "hexpath" => {
                if !self.load_hex_path(value) {
                    debug!(board = %self.id, path = value.trim(), "keeping previous program");
                }
            }
            _ => {}
        }
    }

    /// Apply a property bag. `virtualFirmware`, when present, is applied last
    /// so it takes precedence over other firmware keys.
    pub fn configure(&mut self, properties: &BTreeMap<String, String>) {
        let mut deferred = None;
        for (key, value) in properties {
            if key.eq_ignore_ascii_case("virtualFirmware") {
                deferred = Some((key, value));
                continue;
            }
            self.apply_property(key, value);
        }
        if let Some((key, value)) = deferred {
            self.apply_property(key, value);
        }
    }

    /// Voltage each pin presents to the circuit, keyed `pin`.
    pub fn output_voltages(&self) -> Vec<(String, f32)> {
        self.hal.output_voltages(&self.registers)
    }

    /// Insert this board's pin voltages into `target` keyed `{id}.{pin}`.
    pub fn copy_voltages<E: Extend<(String, f32)>>(&self, target: &mut E) {
        target.extend(
            self.output_voltages()
                .into_iter()
                .map(|(pin, v)| (format!("{}.{}", self.id, pin), v)),
        );
    }

    pub fn pin_states(&self) -> Vec<PinState> {
        self.hal.pin_states(&self.registers)
    }

    pub fn set_input_voltage(&mut self, pin: &str, voltage: f32) {
        self.hal
            .set_input_voltage(&mut self.registers, pin, voltage);
    }

    /// Driven level of a pin, `None` when it is not an output.
    pub fn output_level(&self, pin: &str) -> Option<bool> {
        self.hal.output_level(&self.registers, pin)
    }

    /// Force a pin to a fixed voltage.
    pub fn set_voltage(&mut self, pin: &str, voltage: f32) {
        self.hal
            .set_pin_override(&mut self.registers, pin, &voltage.to_string());
    }
}

fn is_hex_path(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.ends_with(".hex") || lower.ends_with(".ihx")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    // ldi r24,0x20 / out DDRB,r24 / out PORTB,r24 / rjmp .-2
    const LED_ON_HEX: &str = ":0800000080E284B985B9FFCF4D\n:00000001FF\n";

    #[test]
    fn test_blink_property_toggles_d13() {
        let mut board = VirtualBoard::uno("U1");
        board.apply_property("virtualFirmware", "blink:D13:1");
        assert!(board.firmware_loaded());
        board.step(0.0005);
        assert_eq!(board.output_level("D13"), Some(true));
        board.step(0.001);
        assert_eq!(board.output_level("D13"), Some(false));
    }

    #[test]
    fn test_hex_program_drives_pin() {
        let mut board = VirtualBoard::uno("U1");
        board.load_hex(LED_ON_HEX).unwrap();
        assert_eq!(board.firmware_source(), "hex:4 decoded, 0 unknown");
        assert_eq!(board.memory().flash[0], 0x80);
        board.step(0.001);
        assert_eq!(board.output_level("D13"), Some(true));
        let mut voltages: HashMap<String, f32> = HashMap::new();
        board.copy_voltages(&mut voltages);
        assert_eq!(voltages.get("U1.D13"), Some(&5.0));
    }

    #[test]
    fn test_bad_hex_leaves_board_untouched() {
        let mut board = VirtualBoard::uno("U1");
        board.load_hex(LED_ON_HEX).unwrap();
        let flash_before = board.memory().flash.clone();
        let bad = LED_ON_HEX.replace("CF4D", "CF4E");
        let err = board.load_hex(&bad).unwrap_err();
        assert_eq!(err, HexError::ChecksumMismatch(1));
        assert_eq!(board.memory().flash, flash_before);
        assert_eq!(board.cpu().program().len(), 4);
        assert!(board.firmware_source().starts_with("hex:invalid ("));
    }

    #[test]
    fn test_bad_hex_property_keeps_program() {
        let mut board = VirtualBoard::uno("U1");
        board.apply_property("firmwareHex", LED_ON_HEX);
        assert_eq!(board.firmware_source(), "hex:4 decoded, 0 unknown");

        board.apply_property("hex", ":0800");
        assert!(board.firmware_source().starts_with("hex:invalid ("));
        assert!(board.firmware_loaded());
        board.step(0.001);
        assert_eq!(board.output_level("D13"), Some(true));
    }

    #[test]
    fn test_pin_override_property() {
        let mut board = VirtualBoard::uno("U1");
        board.apply_property("PIN:d4", "high");
        assert_eq!(board.output_level("D4"), Some(true));
        let voltages = board.output_voltages();
        assert!(voltages.contains(&("D4".to_string(), 5.0)));
    }

    #[test]
    fn test_virtual_firmware_applied_last() {
        let mut board = VirtualBoard::uno("U1");
        let mut props = BTreeMap::new();
        props.insert("virtualFirmware".to_string(), "blink:D2:5".to_string());
        props.insert("firmware".to_string(), "blink:D3:5".to_string());
        board.configure(&props);
        assert_eq!(board.firmware_source(), "blink:D2:5");
    }

    #[test]
    fn test_firmware_path_property() {
        let mut file = tempfile::Builder::new().suffix(".hex").tempfile().unwrap();
        file.write_all(LED_ON_HEX.as_bytes()).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let mut board = VirtualBoard::uno("U1");
        board.apply_property("firmware", &path);
        assert_eq!(board.firmware_source(), path);
        board.step(0.001);
        assert_eq!(board.output_level("D13"), Some(true));
    }

    #[test]
    fn test_empty_firmware_clears() {
        let mut board = VirtualBoard::uno("U1");
        board.apply_property("virtualFirmware", "blink");
        board.apply_property("virtualFirmware", " ");
        assert!(!board.firmware_loaded());
        assert_eq!(board.firmware_source(), "");
    }
}
