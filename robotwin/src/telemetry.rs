//! Per-tick simulation output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One tick of solved signals and diagnostics.
///
/// Signal keys follow `NET:{net}`, `COMP:{id}:{I|V|P|R|L}`, `SRC:{id}:{I|V|P}`
/// and `PIN:{board}.{pin}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    #[serde(default)]
    pub tick_index: u64,
    #[serde(default)]
    pub time_seconds: f64,
    #[serde(default)]
    pub dt_seconds: f64,
    #[serde(default)]
    pub signals: BTreeMap<String, f64>,
    #[serde(default)]
    pub validation_messages: Vec<String>,
}

impl TelemetryFrame {
    pub fn new(dt_seconds: f64) -> Self {
        Self {
            dt_seconds,
            ..Self::default()
        }
    }

    pub fn signal(&self, key: &str) -> Option<f64> {
        self.signals.get(key).copied()
    }

    pub fn net_voltage(&self, net: &str) -> Option<f64> {
        self.signal(&format!("NET:{}", net))
    }

    /// Component signal such as `COMP:R1:I`.
    pub fn component(&self, id: &str, quantity: &str) -> Option<f64> {
        self.signal(&format!("COMP:{}:{}", id, quantity))
    }

    pub fn source(&self, id: &str, quantity: &str) -> Option<f64> {
        self.signal(&format!("SRC:{}:{}", id, quantity))
    }

    pub fn set(&mut self, key: impl Into<String>, value: f64) {
        self.signals.insert(key.into(), value);
    }

    /// Append a diagnostic unless an identical one is already present.
    pub fn push_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.validation_messages.contains(&message) {
            self.validation_messages.push(message);
        }
    }

    /// Number of diagnostics containing `needle`.
    pub fn count_messages(&self, needle: &str) -> usize {
        self.validation_messages
            .iter()
            .filter(|m| m.contains(needle))
            .count()
    }

    pub fn has_message(&self, needle: &str) -> bool {
        self.count_messages(needle) > 0
    }
}
