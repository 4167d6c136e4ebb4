use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use methodhub::{Config, MethodId, MethodService, MethodStatus, PopulateOutcome, PortConfigMapping};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "methodhub")]
#[command(about = "Register, inspect and validate pluggable analytics methods")]
#[command(version)]
pub(crate) struct Cli {
    /// Config file (defaults plus METHODHUB_* environment overrides if omitted)
    #[arg(short, long, global = true)]
    pub(crate) config: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Load a method module and register it
    Upload { artifact: PathBuf },
    /// Replace a registered method with a new module of the same identity
    Update { id: String, artifact: PathBuf },
    /// Remove a method and its stored module
    Delete { id: String },
    /// List registered methods
    List,
    /// Show a method's full descriptor
    Show { id: String },
    /// Show one side of a method's ports
    Ports {
        id: String,
        #[arg(value_enum, default_value_t = Side::Input)]
        side: Side,
    },
    /// Show a method's dynamic parameters
    Params { id: String },
    /// Validate a JSON port configuration file against a method
    Validate { id: String, mapping: PathBuf },
    /// Activate or deactivate a method
    Status {
        id: String,
        #[arg(value_enum)]
        status: StatusArg,
    },
    /// Register every .wasm module found in a directory
    Populate { dir: PathBuf },
    /// Delete stored modules no method references
    Gc,
}

#[derive(Clone, Copy, ValueEnum)]
pub(crate) enum Side {
    Input,
    Output,
}

#[derive(Clone, Copy, ValueEnum)]
pub(crate) enum StatusArg {
    Active,
    Inactive,
}

#[derive(Serialize)]
struct MethodSummary<'a> {
    id: &'a str,
    name: &'a str,
    status: MethodStatus,
    inputs: usize,
    outputs: usize,
    params: usize,
}

#[derive(Serialize)]
struct PopulateLine {
    path: String,
    outcome: &'static str,
    method: Option<String>,
    error: Option<String>,
}

pub(crate) fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display())),
        None => Config::from_env().context("reading environment"),
    }
}

/// Run a parsed command, returning the process exit code
pub(crate) fn run(cli: Cli) -> Result<u8> {
    let config = load_config(cli.config.as_ref())?;
    let service = MethodService::open(&config)
        .with_context(|| format!("opening data dir {}", config.data_dir.display()))?;

    match cli.command {
        Command::Upload { artifact } => {
            let bytes = read_file(&artifact)?;
            let descriptor = service.upload(&bytes)?;
            print_json(&*descriptor)?;
        }
        Command::Update { id, artifact } => {
            let bytes = read_file(&artifact)?;
            let descriptor = service.update(&MethodId::from(id), &bytes)?;
            print_json(&*descriptor)?;
        }
        Command::Delete { id } => {
            service.delete(&MethodId::from(id))?;
        }
        Command::List => {
            let methods = service.list();
            let summaries: Vec<MethodSummary> = methods
                .iter()
                .map(|d| MethodSummary {
                    id: d.id.as_str(),
                    name: &d.name,
                    status: d.status,
                    inputs: d.inputs.len(),
                    outputs: d.outputs.len(),
                    params: d.params.len(),
                })
                .collect();
            print_json(&summaries)?;
        }
        Command::Show { id } => {
            print_json(&*service.get(&MethodId::from(id))?)?;
        }
        Command::Ports { id, side } => {
            let id = MethodId::from(id);
            let ports = match side {
                Side::Input => service.input_ports(&id)?,
                Side::Output => service.output_ports(&id)?,
            };
            print_json(&ports)?;
        }
        Command::Params { id } => {
            print_json(&service.dynamic_params(&MethodId::from(id))?)?;
        }
        Command::Validate { id, mapping } => {
            let raw = read_file(&mapping)?;
            let mapping: PortConfigMapping = serde_json::from_slice(&raw)
                .with_context(|| format!("parsing {}", mapping.display()))?;
            let result = service.validate(&MethodId::from(id), &mapping)?;
            print_json(&result)?;
            if !result.valid {
                return Ok(1);
            }
        }
        Command::Status { id, status } => {
            let status = match status {
                StatusArg::Active => MethodStatus::Active,
                StatusArg::Inactive => MethodStatus::Inactive,
            };
            service.set_status(&MethodId::from(id), status)?;
        }
        Command::Populate { dir } => {
            let outcomes = service.populate(&dir)?;
            let failed = outcomes
                .iter()
                .any(|(_, o)| matches!(o, PopulateOutcome::Failed(_)));
            let lines: Vec<PopulateLine> = outcomes
                .into_iter()
                .map(|(path, outcome)| {
                    let path = path.display().to_string();
                    match outcome {
                        PopulateOutcome::Registered(id) => PopulateLine {
                            path,
                            outcome: "registered",
                            method: Some(id.to_string()),
                            error: None,
                        },
                        PopulateOutcome::AlreadyRegistered(id) => PopulateLine {
                            path,
                            outcome: "already-registered",
                            method: Some(id.to_string()),
                            error: None,
                        },
                        PopulateOutcome::Failed(e) => PopulateLine {
                            path,
                            outcome: "failed",
                            method: None,
                            error: Some(e.to_string()),
                        },
                    }
                })
                .collect();
            print_json(&lines)?;
            if failed {
                return Ok(1);
            }
        }
        Command::Gc => {
            let removed = service.collect_garbage()?;
            print_json(&removed)?;
        }
    }
    Ok(0)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
