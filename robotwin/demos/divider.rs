//! Divider example: solve a circuit file once and print its signals.

use robotwin::prelude::*;
use robotwin::CircuitSolver;
use std::path::Path;

fn main() -> Result<(), SimError> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tests/fixtures/divider.json".to_string());
    let path = Path::new(&path);

    if !path.exists() {
        eprintln!("File not found: {}", path.display());
        eprintln!("Usage: cargo run --example divider [path/to/circuit.json]");
        std::process::exit(1);
    }

    let spec = robotwin::load_circuit(path)?;
    let frame = CircuitSolver::new().solve(&spec, 0.01);

    println!("Circuit: {}", spec.id);
    for (key, value) in &frame.signals {
        println!("  {:<20} {:>12.6}", key, value);
    }

    if !frame.validation_messages.is_empty() {
        println!("\nDiagnostics:");
        for message in &frame.validation_messages {
            println!("  - {}", message);
        }
    }
    Ok(())
}
