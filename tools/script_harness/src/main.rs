use std::{
    fs,
    io::{self, BufRead, Write},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use core_sim::{ArchetypeTable, EntityId, Observation, Scenario, SimulationConfig, World};
use serde_json::json;
use sim_runtime::{command_schema_json, parse_command_line, CommandEnvelope};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay a command script against a tile-world scenario", long_about = None)]
struct Args {
    /// Scenario JSON file
    #[arg(long, required_unless_present = "print_schema")]
    scenario: Option<PathBuf>,

    /// Archetype table (defaults to the builtin table)
    #[arg(long)]
    archetypes: Option<PathBuf>,

    /// Simulation config (defaults to SIM_CONFIG_PATH, then the builtin config)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Command script, one command per line; reads stdin when omitted
    #[arg(long)]
    script: Option<PathBuf>,

    /// Agent id for commands that do not name one (defaults to the scenario's agent)
    #[arg(long)]
    agent: Option<u64>,

    /// Ticks to advance after each command
    #[arg(long, default_value_t = 1)]
    ticks_per_command: u32,

    /// Print the acting agent's observation after each command
    #[arg(long)]
    observe: bool,

    /// Write the recorded history here as compressed parts
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// File name prefix for exported parts (defaults to the run name)
    #[arg(long)]
    export_prefix: Option<String>,

    /// Print the JSON Schema of the command wire format and exit
    #[arg(long)]
    print_schema: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    if args.print_schema {
        println!("{}", serde_json::to_string_pretty(&command_schema_json())?);
        return Ok(());
    }

    let mut world = load_world(&args)?;
    if let Some(agent) = args.agent {
        let is_agent = world
            .entity(EntityId(agent))
            .is_some_and(|entity| entity.is_agent());
        if !is_agent {
            return Err(anyhow!("entity {agent} is not an agent in this scenario"));
        }
        world.set_default_agent(EntityId(agent));
    }
    world
        .record_initial_snapshot()
        .context("Failed to record the initial snapshot")?;

    let script: Box<dyn BufRead> = match &args.script {
        Some(path) => Box::new(io::BufReader::new(
            fs::File::open(path)
                .with_context(|| format!("Failed to open script at {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (index, line) in script.lines().enumerate() {
        let line = line.context("Failed to read script line")?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let envelope = match decode_line(trimmed) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(target: "tileworld::harness", line = index + 1, error = %err, "script.bad_line");
                writeln!(out, "{}", json!({ "line": index + 1, "input": trimmed, "error": err.to_string() }))?;
                continue;
            }
        };

        let result = world
            .submit(&envelope)
            .with_context(|| format!("Recording history failed at line {}", index + 1))?;
        let mut record = json!({
            "line": index + 1,
            "tick": world.current_tick(),
            "input": trimmed,
            "result": result,
        });
        if args.observe {
            let agent = envelope.agent.map(EntityId).or(world.default_agent());
            if let Some(observation) = agent.and_then(|agent| Observation::build(&world, agent)) {
                record["observation"] = serde_json::to_value(observation)?;
            }
        }
        writeln!(out, "{record}")?;

        for _ in 0..args.ticks_per_command {
            world.tick().context("Tick failed")?;
        }
    }

    let metrics = world.metrics();
    writeln!(
        out,
        "{}",
        json!({
            "summary": {
                "tick": world.current_tick(),
                "liveEntities": world.entity_count(),
                "actionsApplied": metrics.actions_applied,
                "actionsRejected": metrics.actions_rejected,
                "autopilotSteps": metrics.autopilot_steps,
                "snapshotBytes": metrics.snapshot_bytes,
            }
        })
    )?;

    if let Some(dir) = &args.export_dir {
        let prefix = args
            .export_prefix
            .clone()
            .unwrap_or_else(|| world.config().run_name.clone());
        let parts = world
            .export_history(dir, &prefix)
            .with_context(|| format!("Failed to export history to {}", dir.display()))?;
        info!(target: "tileworld::harness", parts = parts.len(), dir = %dir.display(), "export.complete");
    }
    Ok(())
}

fn load_world(args: &Args) -> Result<World> {
    let config = match &args.config {
        Some(path) => Arc::new(
            SimulationConfig::from_file(path)
                .with_context(|| format!("Failed to load config at {}", path.display()))?,
        ),
        None => SimulationConfig::load().context("Failed to load simulation config")?,
    };
    let table = match &args.archetypes {
        Some(path) => Arc::new(
            ArchetypeTable::from_file(path)
                .with_context(|| format!("Failed to load archetypes at {}", path.display()))?,
        ),
        None => ArchetypeTable::builtin(),
    };
    let scenario_path = args
        .scenario
        .as_ref()
        .ok_or_else(|| anyhow!("--scenario is required"))?;
    let scenario = Scenario::from_file(scenario_path)
        .with_context(|| format!("Failed to load scenario at {}", scenario_path.display()))?;
    let world = scenario
        .build(config, table)
        .with_context(|| format!("Scenario '{}' is invalid", scenario.name))?;
    info!(
        target: "tileworld::harness",
        scenario = %scenario.name,
        entities = world.entity_count(),
        "world.ready"
    );
    Ok(world)
}

/// JSON objects go through the wire decoder; anything else is a text command.
fn decode_line(line: &str) -> Result<CommandEnvelope> {
    if line.starts_with('{') {
        return Ok(CommandEnvelope::from_json(line)?);
    }
    Ok(CommandEnvelope::new(None, parse_command_line(line)?))
}
