//! Integration tests for the circuit solver

use robotwin::prelude::*;
use robotwin::CircuitSolver;
use std::collections::BTreeMap;
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn load(name: &str) -> CircuitSpec {
    robotwin::load_circuit(&fixture_path(name)).expect("fixture should parse")
}

#[test]
fn test_ohm_baseline_fixture() {
    let frame = CircuitSolver::new().solve(&load("ohm.json"), 0.01);
    assert!((frame.net_voltage("VCC").unwrap() - 9.0).abs() < 1e-9);
    assert_eq!(frame.net_voltage("GND"), Some(0.0));
    let current = frame.component("R1", "I").unwrap();
    assert!((current - 9.0 / 4700.0).abs() < 1e-9);
    assert!(
        frame.validation_messages.is_empty(),
        "unexpected diagnostics: {:?}",
        frame.validation_messages
    );
}

#[test]
fn test_divider_midpoint() {
    let frame = CircuitSolver::new().solve(&load("divider.json"), 0.01);
    // Node leakage pulls the midpoint a few microvolts low.
    assert!((frame.net_voltage("MID").unwrap() - 2.5).abs() < 1e-4);
    assert!((frame.component("R2", "V").unwrap() - 2.5).abs() < 1e-4);
    assert!((frame.source("B1", "I").unwrap() - 0.0025).abs() < 1e-6);
}

#[test]
fn test_floating_net_reported_once_per_tick() {
    let mut orchestrator = TickOrchestrator::new(load("floating.json"), 0.01);
    for frame in orchestrator.run(5) {
        assert_eq!(frame.count_messages("Floating net 'LONE'."), 1);
        assert!(frame.has_message("Net 'LONE' has insufficient nodes."));
        assert!(!frame.has_message("singular"));
        assert!((frame.net_voltage("VCC").unwrap() - 5.0).abs() < 1e-9);
    }
}

#[test]
fn test_singular_tick_does_not_poison_next() {
    let shorted = CircuitSpec::new("short")
        .with_component(ComponentSpec::new("B1", "Battery").with_property("voltage", "5"))
        .with_component(ComponentSpec::new("B2", "Battery").with_property("voltage", "3"))
        .with_component(ComponentSpec::new("G1", "Ground"))
        .with_net("P", &["B1.+", "B2.+"])
        .with_net("GND", &["B1.-", "B2.-", "G1.GND"]);
    let solver = CircuitSolver::new();
    let bad = solver.solve(&shorted, 0.01);
    assert!(bad.has_message("Circuit solver failed (singular matrix)."));
    assert!(bad.net_voltage("P").is_none());

    let good = solver.solve(&load("divider.json"), 0.01);
    assert!(good.validation_messages.is_empty());
}

#[test]
fn test_unknown_fields_and_numeric_properties() {
    let spec = robotwin::parse_circuit(
        r#"{
            "id": "mixed",
            "mode": "fast",
            "components": [
                {"id": "B1", "type": "Battery", "properties": {"voltage": 3.3}},
                {"id": "R1", "type": "Resistor", "properties": {"resistance": "330ohm"}},
                {"id": "G1", "type": "Ground"}
            ],
            "nets": [
                {"id": "V", "nodes": ["B1.+", "R1.A"]},
                {"id": "GND", "nodes": ["B1.-", "R1.B", "G1.GND"]}
            ]
        }"#,
    )
    .unwrap();
    let frame = CircuitSolver::new().solve(&spec, 0.01);
    assert!((frame.component("R1", "I").unwrap() - 0.01).abs() < 1e-9);
}

#[test]
fn test_blocked_diode_chain_keeps_voltages() {
    let spec = CircuitSpec::new("chain")
        .with_component(ComponentSpec::new("B1", "Battery").with_property("voltage", "5"))
        .with_component(ComponentSpec::new("D1", "LED"))
        .with_component(ComponentSpec::new("D2", "LED"))
        .with_component(ComponentSpec::new("S1", "Switch"))
        .with_component(ComponentSpec::new("G1", "Ground"))
        .with_net("VCC", &["B1.+", "D1.Anode"])
        .with_net("M1", &["D1.Cathode", "D2.Anode"])
        .with_net("M2", &["D2.Cathode", "S1.A"])
        .with_net("GND", &["S1.B", "B1.-", "G1.GND"]);
    let frame = CircuitSolver::new().solve(&spec, 0.01);
    assert!(!frame.has_message("singular"), "{:?}", frame.validation_messages);
    assert!(frame.net_voltage("M1").is_some());
    assert!(frame.net_voltage("M2").is_some());
    assert!((frame.net_voltage("VCC").unwrap() - 5.0).abs() < 1e-9);
}

#[test]
fn test_reverse_diode_only_net_is_solvable() {
    let spec = CircuitSpec::new("reverse")
        .with_component(ComponentSpec::new("B1", "Battery").with_property("voltage", "5"))
        .with_component(ComponentSpec::new("D1", "Diode"))
        .with_component(ComponentSpec::new("G1", "Ground"))
        .with_net("VCC", &["B1.+", "D1.Cathode"])
        .with_net("ISO", &["D1.Anode"])
        .with_net("GND", &["B1.-", "G1.GND"]);
    let frame = CircuitSolver::new().solve(&spec, 0.01);
    assert!(!frame.has_message("singular"));
    assert!(frame.net_voltage("ISO").unwrap().abs() < 1.0);
    assert_eq!(frame.component("D1", "I"), Some(0.0));
}

#[test]
fn test_singular_island_without_ground() {
    let spec = CircuitSpec::new("parallel")
        .with_component(ComponentSpec::new("B1", "Battery").with_property("voltage", "5"))
        .with_component(ComponentSpec::new("B2", "Battery").with_property("voltage", "3"))
        .with_net("P", &["B1.+", "B2.+"])
        .with_net("M", &["B1.-", "B2.-"]);
    let frame = CircuitSolver::new().solve(&spec, 0.01);
    assert!(frame.has_message("Circuit solver failed (singular matrix)."));
    assert!(frame.has_message("Solver error: missing GND reference (connect a GND pin to a net)."));
    assert!(!frame.has_message("missing VCC supply"));
}

#[test]
fn test_singular_island_without_supply() {
    let spec = CircuitSpec::new("contention")
        .with_component(ComponentSpec::new("U1", "ArduinoUno"))
        .with_net("BUS", &["U1.D2", "U1.D3"])
        .with_net("GND", &["U1.GND"]);
    let mut voltages = BTreeMap::new();
    voltages.insert("U1.D2".to_string(), 5.0f32);
    voltages.insert("U1.D3".to_string(), 0.0f32);
    let frame = CircuitSolver::new().step(&spec, &voltages, &BTreeMap::new(), &BTreeMap::new(), 0.01);
    assert!(frame.has_message("Circuit solver failed (singular matrix)."));
    assert!(frame.has_message(
        "Solver error: missing VCC supply (connect a 5V/3V3/IOREF rail or a battery)."
    ));
    assert!(!frame.has_message("missing GND reference (connect"));
    assert!(frame.net_voltage("BUS").is_none());
}

#[test]
fn test_duplicate_component_reported() {
    let spec = CircuitSpec::new("dup")
        .with_component(ComponentSpec::new("B1", "Battery").with_property("voltage", "5"))
        .with_component(ComponentSpec::new("R1", "Resistor").with_property("resistance", "1k"))
        .with_component(ComponentSpec::new("R1", "Resistor").with_property("resistance", "2k"))
        .with_component(ComponentSpec::new("G1", "Ground"))
        .with_net("VCC", &["B1.+", "R1.A"])
        .with_net("GND", &["B1.-", "R1.B", "G1.GND"]);
    let frame = CircuitSolver::new().solve(&spec, 0.01);
    assert!(frame.has_message("Duplicate component id 'R1'."));
    let resistor = frame.component("R1", "I").unwrap();
    let source = frame.source("B1", "I").unwrap();
    assert!((resistor - 0.005).abs() < 1e-9);
    assert!((source - resistor).abs() < 1e-6);
}
