// TickLoom - Virtual Timer Peripheral Simulation Engine
// Copyright (C) 2026 TickLoom Authors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tickloom_config::{PlatformDescriptor, ScenarioDescriptor};
use tickloom_core::{Machine, SimulationError};
use tracing::{error, info};

const EXIT_PASS: u8 = 0;
const EXIT_ASSERT_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const RESULT_SCHEMA_VERSION: &str = "1.0";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "TickLoom timer peripheral simulator",
    long_about = None,
    subcommand_negates_reqs = true
)]
struct Cli {
    /// Path to the platform descriptor (YAML)
    #[arg(short, long)]
    platform: Option<PathBuf>,

    /// Virtual ticks to advance in a free run
    #[arg(long, default_value = "1000000")]
    ticks: u64,

    /// Write a machine state snapshot (JSON) after the run
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Dump the register map of every timer instance and exit
    #[arg(long)]
    dump_registers: bool,

    /// Enable event-level tracing
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deterministic, CI-friendly runner driven by a scenario script (YAML).
    Test(TestArgs),
}

#[derive(Parser, Debug)]
struct TestArgs {
    /// Path to the platform descriptor (YAML)
    #[arg(short, long)]
    platform: PathBuf,

    /// Path to the scenario script (YAML)
    #[arg(short, long)]
    scenario: PathBuf,

    /// Directory to write test artifacts (result.json)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExpectationResult {
    address: u64,
    expected: u32,
    observed: Option<u32>,
    passed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct TestResult {
    result_schema_version: String,
    status: String,
    scenario: String,
    ticks_executed: u64,
    events_scheduled: u64,
    events_fired: u64,
    events_cancelled: u64,
    events_stale: u64,
    irq_transitions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    expectations: Vec<ExpectationResult>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Some(Commands::Test(args)) => run_test(args),
        None => run_free(cli),
    }
}

fn load_platform(path: &Path) -> Result<PlatformDescriptor, ExitCode> {
    PlatformDescriptor::from_file(path).map_err(|e| {
        error!("{:#}", e);
        ExitCode::from(EXIT_CONFIG_ERROR)
    })
}

fn build_machine(platform: &PlatformDescriptor) -> Result<Machine, ExitCode> {
    Machine::from_platform(platform).map_err(|e| {
        error!("Failed to build machine: {}", e);
        ExitCode::from(EXIT_CONFIG_ERROR)
    })
}

fn run_free(cli: Cli) -> ExitCode {
    info!("Starting TickLoom");

    let Some(platform_path) = &cli.platform else {
        error!("Missing required --platform argument");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    };
    let platform = match load_platform(platform_path) {
        Ok(p) => p,
        Err(code) => return code,
    };

    if cli.dump_registers {
        dump_registers(&platform);
        return ExitCode::from(EXIT_PASS);
    }

    let mut machine = match build_machine(&platform) {
        Ok(m) => m,
        Err(code) => return code,
    };

    info!(
        "Platform '{}': {} timer(s), sysclk {} Hz",
        platform.name,
        platform.timers.len(),
        platform.sysclk_hz
    );
    machine.advance(cli.ticks);
    report_metrics(&machine);

    if let Some(path) = &cli.snapshot {
        if let Err(e) = write_snapshot(path, &machine) {
            error!("Failed to write snapshot {:?}: {}", path, e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
        info!("Snapshot written to {:?}", path);
    }

    ExitCode::from(EXIT_PASS)
}

fn dump_registers(platform: &PlatformDescriptor) {
    for timer in &platform.timers {
        println!(
            "{} @ {:#010x} ({}-bit, {} channel(s))",
            timer.id, timer.base_address, timer.width_bits, timer.channels
        );
        for (name, offset) in
            tickloom_core::peripherals::timer_block::register_map(timer.channels as usize)
        {
            println!("  {:#06x}  {}", offset, name);
        }
    }
}

fn run_test(args: TestArgs) -> ExitCode {
    let platform = match load_platform(&args.platform) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let scenario = match ScenarioDescriptor::from_file(&args.scenario) {
        Ok(s) => s,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let mut machine = match build_machine(&platform) {
        Ok(m) => m,
        Err(code) => return code,
    };

    info!(
        "Running scenario '{}' for {} ticks",
        scenario.name, scenario.run_ticks
    );

    // Steps are pre-validated as ordered; interleave advances with writes.
    for step in &scenario.steps {
        machine.advance(step.at_tick - machine.now());
        if let Err(e) = machine.write_u32(step.address, step.value) {
            let message = format!(
                "Scenario write at tick {} to {:#010x} failed: {}",
                step.at_tick, step.address, e
            );
            error!("{}", message);
            let result = error_result(&scenario, &machine, message);
            write_result(args.output_dir.as_deref(), &result);
            return ExitCode::from(match e {
                SimulationError::MemoryViolation(_) | SimulationError::UnknownRegister(_) => {
                    EXIT_CONFIG_ERROR
                }
                _ => EXIT_RUNTIME_ERROR,
            });
        }
    }
    machine.advance(scenario.run_ticks - machine.now());

    let mut expectations = Vec::new();
    let mut all_passed = true;
    for expect in &scenario.expect {
        let observed = machine.read_u32(expect.address).ok();
        let passed = observed == Some(expect.value);
        if !passed {
            all_passed = false;
            error!(
                "Expectation failed at {:#010x}: expected {:#x}, observed {:?}",
                expect.address, expect.value, observed
            );
        }
        expectations.push(ExpectationResult {
            address: expect.address,
            expected: expect.value,
            observed,
            passed,
        });
    }

    report_metrics(&machine);

    let metrics = *machine.clock().metrics();
    let result = TestResult {
        result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
        status: if all_passed { "pass" } else { "fail" }.to_string(),
        scenario: scenario.name.clone(),
        ticks_executed: machine.now(),
        events_scheduled: metrics.events_scheduled,
        events_fired: metrics.events_fired,
        events_cancelled: metrics.events_cancelled,
        events_stale: metrics.events_stale,
        irq_transitions: machine.irq_transitions().len(),
        message: None,
        expectations,
    };
    write_result(args.output_dir.as_deref(), &result);

    if all_passed {
        ExitCode::from(EXIT_PASS)
    } else {
        ExitCode::from(EXIT_ASSERT_FAIL)
    }
}

fn error_result(scenario: &ScenarioDescriptor, machine: &Machine, message: String) -> TestResult {
    let metrics = *machine.clock().metrics();
    TestResult {
        result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
        status: "error".to_string(),
        scenario: scenario.name.clone(),
        ticks_executed: machine.now(),
        events_scheduled: metrics.events_scheduled,
        events_fired: metrics.events_fired,
        events_cancelled: metrics.events_cancelled,
        events_stale: metrics.events_stale,
        irq_transitions: machine.irq_transitions().len(),
        message: Some(message),
        expectations: vec![],
    }
}

fn write_result(output_dir: Option<&Path>, result: &TestResult) {
    let Some(output_dir) = output_dir else {
        return;
    };
    if let Err(e) = std::fs::create_dir_all(output_dir) {
        error!("Failed to create output directory {:?}: {}", output_dir, e);
        return;
    }
    let result_path = output_dir.join("result.json");
    match std::fs::File::create(&result_path) {
        Ok(f) => {
            if let Err(e) = serde_json::to_writer_pretty(f, result) {
                error!("Failed to write result.json: {}", e);
            }
        }
        Err(e) => error!("Failed to create result.json: {}", e),
    }
}

fn write_snapshot(path: &Path, machine: &Machine) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let f = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(f, &machine.snapshot())?;
    Ok(())
}

fn report_metrics(machine: &Machine) {
    let metrics = machine.clock().metrics();
    info!("Run finished at virtual tick {}", machine.now());
    info!(
        "Events: {} scheduled, {} fired, {} cancelled, {} stale",
        metrics.events_scheduled,
        metrics.events_fired,
        metrics.events_cancelled,
        metrics.events_stale
    );
    info!("Interrupt line transitions: {}", machine.irq_transitions().len());
}
