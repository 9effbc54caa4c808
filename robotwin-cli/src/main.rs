//! RoboTwin CLI - run circuits, inspect firmware images and compare traces.

use clap::{Parser, Subcommand, ValueEnum};
use robotwin::host::golden::{self, GoldenTrace};
use robotwin::runtime::{hex, BoardProfile, Program};
use robotwin::{RunSummary, SimOptions, SimulationCore};
use std::path::{Path, PathBuf};
use std::process;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "robotwin")]
#[command(about = "Circuit and microcontroller simulation tool", long_about = None)]
#[command(version)]
struct Cli {
    /// Log to stderr (filter with RUST_LOG, defaults to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a circuit file for a number of ticks
    Run {
        /// Path to the circuit JSON
        #[arg(value_name = "CIRCUIT")]
        circuit: PathBuf,

        /// Number of ticks to run
        #[arg(long, default_value_t = 100)]
        ticks: u64,

        /// Tick length in seconds
        #[arg(long, default_value_t = 0.01)]
        dt: f64,

        /// Firmware for a board, as ID=FIRMWARE (firmware string or .hex path)
        #[arg(long = "board-firmware", value_name = "ID=FIRMWARE", value_parser = parse_board_firmware)]
        board_firmware: Vec<(String, String)>,

        /// Record frames and events into this directory
        #[arg(long, value_name = "DIR")]
        record: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,

        /// Exit with error code if any diagnostic was raised
        #[arg(long)]
        fail_on_diagnostics: bool,
    },

    /// Validate an Intel HEX image and summarise its program
    Hex {
        /// Path to the .hex file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Board profile whose flash size bounds the image
        #[arg(long, default_value = "ArduinoUno")]
        board: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// Compare two golden traces pin by pin
    TraceDiff {
        #[arg(value_name = "BASELINE")]
        baseline: PathBuf,

        #[arg(value_name = "CANDIDATE")]
        candidate: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// List supported board profiles
    Boards {
        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output for scripts
    Json,
}

fn parse_board_firmware(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((id, firmware)) if !id.trim().is_empty() => {
            Ok((id.trim().to_string(), firmware.to_string()))
        }
        _ => Err(format!("expected ID=FIRMWARE, got '{}'", value)),
    }
}

fn main() {
    let cli = Cli::parse();
    if cli.verbose {
        init_tracing();
    }

    let exit_code = match cli.command {
        Commands::Run {
            circuit,
            ticks,
            dt,
            board_firmware,
            record,
            format,
            fail_on_diagnostics,
        } => {
            let options = SimOptions {
                dt_seconds: dt,
                ticks,
                record_path: record,
                board_firmware: board_firmware.into_iter().collect(),
                ..SimOptions::default()
            };
            handle_run(&circuit, &options, format, fail_on_diagnostics)
        }
        Commands::Hex {
            file,
            board,
            format,
        } => handle_hex(&file, &board, format),
        Commands::TraceDiff {
            baseline,
            candidate,
            format,
        } => handle_trace_diff(&baseline, &candidate, format),
        Commands::Boards { format } => {
            handle_boards(format);
            0
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn handle_run(circuit: &Path, options: &SimOptions, format: OutputFormat, fail_on_diagnostics: bool) -> i32 {
    debug!(circuit = %circuit.display(), ticks = options.ticks, "starting run");
    match SimulationCore::run_file(circuit, options) {
        Ok(summary) => {
            match format {
                OutputFormat::Human => output_run_human(&summary),
                OutputFormat::Json => match serde_json::to_string_pretty(&summary) {
                    Ok(text) => println!("{}", text),
                    Err(e) => eprintln!("Error: {}", e),
                },
            }
            if fail_on_diagnostics && summary.has_diagnostics() {
                return 1;
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn output_run_human(summary: &RunSummary) {
    println!("\nCircuit: {}", summary.circuit_id);
    println!("{}", "─".repeat(60));
    println!("  Ticks: {}  Simulated time: {:.4}s", summary.ticks, summary.time_seconds);
    if let Some(session) = &summary.session_id {
        println!("  Recording session: {}", session);
    }

    if let Some(frame) = &summary.final_frame {
        println!("\n  Final signals:");
        for (key, value) in &frame.signals {
            println!("    {:<28} {:>12.6}", key, value);
        }
    }

    if summary.diagnostics.is_empty() {
        println!("\n  No diagnostics");
    } else {
        println!("\n  Diagnostics:");
        for message in &summary.diagnostics {
            println!("    - {}", message);
        }
    }
}

fn handle_hex(file: &Path, board: &str, format: OutputFormat) -> i32 {
    let Some(profile) = BoardProfile::find(board) else {
        eprintln!("Error: unknown board profile '{}'", board);
        return 1;
    };
    let text = match std::fs::read_to_string(file) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: {}: {}", file.display(), e);
            return 1;
        }
    };
    let image = match hex::load(&text, profile.flash_bytes) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let program = Program::from_image(&image);
    let range = image.address_range();

    match format {
        OutputFormat::Human => {
            println!("\nFile: {}", file.display());
            println!("{}", "─".repeat(60));
            println!("  Board:        {} ({})", profile.id, profile.mcu);
            if let Some((lo, hi)) = range {
                println!("  Address range: 0x{:04X}-0x{:04X}", lo, hi);
            }
            println!("  Instructions: {}", program.len());
            println!("  Decoded:      {}", program.decoded());
            println!("  Unknown:      {}", program.unknown);
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "file": file.display().to_string(),
            "board": profile.id,
            "address_range": range.map(|(lo, hi)| [lo, hi]),
            "instructions": program.len(),
            "decoded": program.decoded(),
            "unknown": program.unknown,
        })),
    }
    0
}

fn handle_trace_diff(baseline: &Path, candidate: &Path, format: OutputFormat) -> i32 {
    let load = |path: &Path| {
        GoldenTrace::load(path).map_err(|e| {
            eprintln!("Error: {}: {}", path.display(), e);
        })
    };
    let (Ok(baseline), Ok(candidate)) = (load(baseline), load(candidate)) else {
        return 1;
    };

    let diffs = golden::diff(&baseline, &candidate);
    match format {
        OutputFormat::Human => {
            if diffs.is_empty() {
                println!("Traces match ({} steps)", baseline.steps.len());
            } else {
                for line in &diffs {
                    println!("{}", line);
                }
                println!("\n{} difference(s)", diffs.len());
            }
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "identical": diffs.is_empty(),
            "diffs": diffs,
        })),
    }
    i32::from(!diffs.is_empty())
}

fn handle_boards(format: OutputFormat) {
    let profiles = BoardProfile::all();
    match format {
        OutputFormat::Human => {
            println!("Supported boards:\n");
            for profile in &profiles {
                println!("  {}", profile.id);
                println!(
                    "    {} @ {} MHz, {} pins, {} KiB flash",
                    profile.mcu,
                    profile.clock_hz / 1_000_000.0,
                    profile.pins.len(),
                    profile.flash_bytes / 1024
                );
                println!();
            }
        }
        OutputFormat::Json => {
            let boards: Vec<_> = profiles
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "id": p.id,
                        "mcu": p.mcu,
                        "pins": p.pins.len(),
                        "flash_bytes": p.flash_bytes,
                        "sram_bytes": p.sram_bytes,
                        "eeprom_bytes": p.eeprom_bytes,
                    })
                })
                .collect();
            print_json(&serde_json::json!({ "boards": boards }));
        }
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error: {}", e),
    }
}
