//! Circuit description and DC solver.
//!
//! A [`CircuitSpec`] is the static netlist loaded once per session. Every tick
//! the [`CircuitSolver`] turns it, together with the pin voltages the boards
//! drive, into a set of linear [`elements`] and solves them island by island.

pub mod elements;
pub mod solver;
pub mod topology;
pub mod values;

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize};

pub use elements::{DiodeElement, ElementSet, ResistorElement, SourceKind, VoltageSourceElement};
pub use solver::{CircuitSolver, SolverInputs, SolverOptions};
pub use topology::{Island, NetGraph};

/// A component instance in the netlist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "deserialize_properties")]
    pub properties: BTreeMap<String, String>,
}

impl ComponentSpec {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// First property present among `keys`.
    pub fn first_property(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.property(k))
    }
}

/// A named electrical node joining component pins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetSpec {
    pub id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

impl NetSpec {
    pub fn new<S: AsRef<str>>(id: impl Into<String>, nodes: &[S]) -> Self {
        Self {
            id: id.into(),
            nodes: nodes.iter().map(|n| n.as_ref().to_string()).collect(),
        }
    }
}

/// The static netlist for a simulation session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    #[serde(default)]
    pub nets: Vec<NetSpec>,
}

impl CircuitSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_component(mut self, component: ComponentSpec) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_net<S: AsRef<str>>(mut self, id: impl Into<String>, nodes: &[S]) -> Self {
        self.nets.push(NetSpec::new(id, nodes));
        self
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn component(&self, id: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.id == id)
    }

    /// Components whose type names a known board.
    pub fn boards(&self) -> impl Iterator<Item = &ComponentSpec> {
        self.components
            .iter()
            .filter(|c| crate::runtime::profiles::is_board_type(&c.kind))
    }
}

/// Pin name part of a `component.pin` endpoint.
pub fn pin_name(endpoint: &str) -> &str {
    endpoint.split_once('.').map_or("", |(_, pin)| pin)
}

/// `true` when an endpoint names a ground pin (`GND`, `GND1`, `gnd`...).
pub fn is_ground_pin(endpoint: &str) -> bool {
    let pin = pin_name(endpoint);
    pin.len() >= 3 && pin[..3].eq_ignore_ascii_case("GND")
}

/// Nets of a spec after de-duplication and classification.
#[derive(Debug, Clone, Default)]
pub struct NetIndex {
    /// Net ids in declaration order, duplicates removed.
    pub nets: Vec<String>,
    pub ground: HashSet<String>,
    pin_to_net: HashMap<String, String>,
    node_counts: HashMap<String, usize>,
}

impl NetIndex {
    /// Build the lookup. Duplicate net ids are reported through `diagnostics`
    /// and the later declaration is ignored.
    pub fn build(spec: &CircuitSpec, diagnostics: &mut Vec<String>) -> Self {
        let mut index = Self::default();
        let mut seen = HashSet::new();
        for net in &spec.nets {
            if !seen.insert(net.id.as_str()) {
                diagnostics.push(format!("Duplicate net id '{}'.", net.id));
                continue;
            }
            index.nets.push(net.id.clone());
            index.node_counts.insert(net.id.clone(), net.nodes.len());
            for node in &net.nodes {
                if is_ground_pin(node) {
                    index.ground.insert(net.id.clone());
                }
                index
                    .pin_to_net
                    .entry(node.clone())
                    .or_insert_with(|| net.id.clone());
            }
        }
        index
    }

    /// Net an endpoint belongs to.
    pub fn net_of(&self, endpoint: &str) -> Option<&str> {
        self.pin_to_net.get(endpoint).map(String::as_str)
    }

    /// Net of `component.pin`.
    pub fn net_of_pin(&self, component: &str, pin: &str) -> Option<&str> {
        self.net_of(&format!("{}.{}", component, pin))
    }

    pub fn is_ground(&self, net: &str) -> bool {
        self.ground.contains(net)
    }

    /// First ground net in declaration order.
    pub fn first_ground(&self) -> Option<&str> {
        self.nets
            .iter()
            .find(|n| self.ground.contains(n.as_str()))
            .map(String::as_str)
    }

    pub fn node_count(&self, net: &str) -> usize {
        self.node_counts.get(net).copied().unwrap_or(0)
    }
}

/// Accept strings, numbers and booleans as property values.
fn deserialize_properties<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, serde_json::Value> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| {
            let text = match v {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (k, text)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spec_json() {
        let json = r#"{
            "id": "blink",
            "components": [
                { "id": "R1", "type": "Resistor", "properties": { "resistance": 220 } },
                { "id": "S1", "type": "Switch", "properties": { "closed": true } }
            ],
            "nets": [ { "id": "N1", "nodes": ["U1.D13", "R1.A"] } ]
        }"#;
        let spec = CircuitSpec::from_json(json).unwrap();
        assert_eq!(spec.components.len(), 2);
        assert_eq!(spec.components[0].property("resistance"), Some("220"));
        assert_eq!(spec.components[1].property("closed"), Some("true"));
        assert_eq!(spec.nets[0].nodes.len(), 2);
    }

    #[test]
    fn test_missing_sections_default() {
        let spec = CircuitSpec::from_json("{}").unwrap();
        assert!(spec.components.is_empty());
        assert!(spec.nets.is_empty());
    }

    #[test]
    fn test_ground_pins() {
        assert!(is_ground_pin("U1.GND"));
        assert!(is_ground_pin("U1.gnd2"));
        assert!(is_ground_pin("B1.GND.1"));
        assert!(!is_ground_pin("U1.D13"));
        assert!(!is_ground_pin("GND"));
    }

    #[test]
    fn test_net_index_first_occurrence_wins() {
        let spec = CircuitSpec::new("c")
            .with_net("N1", &["R1.A", "U1.GND"])
            .with_net("N2", &["R1.A", "R2.B"])
            .with_net("N1", &["R3.A"]);
        let mut diags = Vec::new();
        let index = NetIndex::build(&spec, &mut diags);
        assert_eq!(index.nets, vec!["N1", "N2"]);
        assert_eq!(index.net_of("R1.A"), Some("N1"));
        assert_eq!(index.net_of("R3.A"), None);
        assert!(index.is_ground("N1"));
        assert_eq!(index.first_ground(), Some("N1"));
        assert_eq!(diags, vec!["Duplicate net id 'N1'.".to_string()]);
    }
}
