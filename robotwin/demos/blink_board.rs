//! Blink example: drive an LED from an emulated Uno and print its state per tick.

use robotwin::prelude::*;

fn main() -> Result<(), SimError> {
    let spec = robotwin::parse_circuit(
        r#"{
            "id": "blink",
            "components": [
                {"id": "U1", "type": "ArduinoUno", "properties": {"virtualFirmware": "blink:D13:250"}},
                {"id": "R1", "type": "Resistor", "properties": {"resistance": "220"}},
                {"id": "D1", "type": "LED"}
            ],
            "nets": [
                {"id": "N13", "nodes": ["U1.D13", "R1.A"]},
                {"id": "NLED", "nodes": ["R1.B", "D1.Anode"]},
                {"id": "GND", "nodes": ["D1.Cathode", "U1.GND"]}
            ]
        }"#,
    )?;

    let mut orchestrator = TickOrchestrator::from_spec(spec, 0.05);
    for frame in orchestrator.run(20) {
        let current_ma = frame.component("D1", "I").unwrap_or(0.0) * 1000.0;
        let state = if current_ma > 1.0 { "ON " } else { "off" };
        println!("t={:>5.2}s  LED {}  {:>6.2} mA", frame.time_seconds, state, current_ma);
    }
    Ok(())
}
