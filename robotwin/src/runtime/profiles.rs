//! Board profile catalogue.
//!
//! A profile describes the physical board a virtual CPU is attached to: the
//! ordered pin list (the index of a pin in this list is its wire-protocol pin
//! index), the MCU, its clock and its memory sizes.

use serde::Serialize;

pub const DEFAULT_CLOCK_HZ: f64 = 16_000_000.0;

/// Core-limited profiles expose only this many pins to the HAL.
const CORE_PIN_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardProfile {
    pub id: String,
    pub mcu: String,
    pub pins: Vec<String>,
    pub clock_hz: f64,
    pub bootloader_bytes: u32,
    pub core_limited: bool,
    pub flash_bytes: usize,
    pub sram_bytes: usize,
    pub eeprom_bytes: usize,
}

impl BoardProfile {
    pub fn arduino_uno() -> Self {
        Self::atmega328p("ArduinoUno")
    }

    pub fn arduino_nano() -> Self {
        Self::atmega328p("ArduinoNano")
    }

    pub fn arduino_pro_mini() -> Self {
        Self::atmega328p("ArduinoProMini")
    }

    pub fn arduino_mega() -> Self {
        let mut pins: Vec<String> = (0..=53).map(|i| format!("D{}", i)).collect();
        pins.extend((0..=15).map(|i| format!("A{}", i)));
        Self {
            id: "ArduinoMega".to_string(),
            mcu: "ATmega2560".to_string(),
            pins,
            clock_hz: DEFAULT_CLOCK_HZ,
            bootloader_bytes: 0x2000,
            core_limited: true,
            flash_bytes: 256 * 1024,
            sram_bytes: 8 * 1024,
            eeprom_bytes: 4 * 1024,
        }
    }

    fn atmega328p(id: &str) -> Self {
        let mut pins: Vec<String> = (0..=13).map(|i| format!("D{}", i)).collect();
        pins.extend((0..=5).map(|i| format!("A{}", i)));
        Self {
            id: id.to_string(),
            mcu: "ATmega328P".to_string(),
            pins,
            clock_hz: DEFAULT_CLOCK_HZ,
            bootloader_bytes: 0x0200,
            core_limited: false,
            flash_bytes: 32 * 1024,
            sram_bytes: 2 * 1024,
            eeprom_bytes: 1024,
        }
    }

    /// All known profiles, in catalogue order.
    pub fn all() -> Vec<BoardProfile> {
        vec![
            Self::arduino_uno(),
            Self::arduino_nano(),
            Self::arduino_pro_mini(),
            Self::arduino_mega(),
        ]
    }

    /// Resolve a profile by name, falling back to the Uno.
    ///
    /// Names are compared after lower-casing and dropping every
    /// non-alphanumeric character, so `"Arduino Mega 2560"` and `"mega"`
    /// both resolve.
    pub fn lookup(name: &str) -> BoardProfile {
        Self::find(name).unwrap_or_else(Self::arduino_uno)
    }

    /// Resolve a profile by name without the Uno fallback.
    pub fn find(name: &str) -> Option<BoardProfile> {
        match normalize(name).as_str() {
            "arduinouno" | "uno" => Some(Self::arduino_uno()),
            "arduinonano" | "nano" => Some(Self::arduino_nano()),
            "arduinopromini" | "promini" => Some(Self::arduino_pro_mini()),
            "arduinomega" | "mega" | "arduinomega2560" => Some(Self::arduino_mega()),
            _ => None,
        }
    }

    /// Pins handed to the HAL pin map.
    pub fn hal_pins(&self) -> &[String] {
        if self.core_limited && self.pins.len() > CORE_PIN_LIMIT {
            &self.pins[..CORE_PIN_LIMIT]
        } else {
            &self.pins
        }
    }

    /// Wire-protocol index of a pin name (case-insensitive).
    pub fn pin_index(&self, pin: &str) -> Option<usize> {
        self.pins.iter().position(|p| p.eq_ignore_ascii_case(pin))
    }
}

impl Default for BoardProfile {
    fn default() -> Self {
        Self::arduino_uno()
    }
}

/// True when a circuit component type names a board.
pub fn is_board_type(component_type: &str) -> bool {
    BoardProfile::find(component_type).is_some()
}

fn normalize(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}
