// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

mod models;
mod scheduler;
mod trace_port;

use anyhow::Context;
use clap::{Parser, Subcommand};
use labwired_config::HostManifest;
use labwired_core::{ContextHandle, Dispatcher, ModelHandle, SimContext};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::scheduler::{LocalKernel, RunReport};
use crate::trace_port::{PortSummary, TracePort};

const EXIT_PASS: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "LabWired peripheral model host",
    long_about = None
)]
struct Cli {
    /// Enable debug logging of registration, binding and stimulus
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load the models of a host manifest and run them on the local kernel.
    Run(RunArgs),

    /// List the models built into this host.
    Models,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the host manifest (YAML)
    #[arg(short, long)]
    manifest: PathBuf,

    /// Override the simulated run length from the manifest
    #[arg(long)]
    duration_ns: Option<u64>,

    /// Print the run summary as a single JSON line
    #[arg(long)]
    json: bool,

    /// Wall-clock milliseconds an idle run waits for external events
    #[arg(long, default_value_t = 500)]
    external_timeout_ms: u64,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    status: &'static str,
    manifest: String,
    models: usize,
    #[serde(flatten)]
    report: RunReport,
    ports: Vec<PortSummary>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing with appropriate level based on --trace flag
    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Models => {
            for name in models::builtin_registry().names() {
                println!("{}", name);
            }
            ExitCode::from(EXIT_PASS)
        }
    }
}

struct LoadedModel {
    name: String,
    model: ModelHandle,
}

fn load_models(
    manifest: &HostManifest,
    kernel: &Arc<LocalKernel>,
    dispatcher: &Arc<Dispatcher>,
) -> anyhow::Result<(Vec<LoadedModel>, Vec<Arc<TracePort>>)> {
    let registry = models::builtin_registry();
    let mut loaded = Vec::new();
    let mut ports = Vec::new();

    for (index, entry) in manifest.models.iter().enumerate() {
        let handle = ContextHandle::from_raw(index as u64 + 1);
        let ctx = SimContext::with_dispatcher(kernel.clone(), handle, dispatcher.clone());
        let model = registry
            .load(&entry.config_node(), Some(ctx))
            .with_context(|| format!("Failed to load model '{}'", entry.name))?;
        info!("Loaded model '{}' as {}", entry.name, handle);

        for itf in &entry.bindings {
            let port = Arc::new(TracePort::new(
                format!("{}.{}", entry.name, itf),
                kernel.clone(),
            ));
            model
                .bind_itf(itf, port.clone())
                .with_context(|| format!("Model '{}' has no interface '{}'", entry.name, itf))?;
            ports.push(port);
        }

        loaded.push(LoadedModel {
            name: entry.name.clone(),
            model,
        });
    }

    Ok((loaded, ports))
}

fn run(args: RunArgs) -> ExitCode {
    let manifest = match HostManifest::from_file(&args.manifest) {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    info!("Host manifest '{}' ({} models)", manifest.name, manifest.models.len());

    // Models, including those from libraries, register into the tables the
    // `dispatch_task`/`dispatch_periodic` entry points of this process use.
    let dispatcher = Dispatcher::global();
    let kernel = Arc::new(
        LocalKernel::new(dispatcher.clone())
            .with_external_timeout(Duration::from_millis(args.external_timeout_ms)),
    );
    let (mut loaded, ports) = match load_models(&manifest, &kernel, &dispatcher) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    for entry in &mut loaded {
        info!("Starting model '{}'", entry.name);
        entry.model.start();
    }

    let duration_ns = args.duration_ns.unwrap_or(manifest.duration_ns);
    let report = kernel.run_until(duration_ns);
    let failed = !report.fatals.is_empty();

    let summary = RunSummary {
        status: if failed { "failed" } else { "finished" },
        manifest: manifest.name.clone(),
        models: loaded.len(),
        report,
        ports: ports.iter().map(|p| p.summary()).collect(),
    };

    if args.json {
        match serde_json::to_string(&summary) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to serialize run summary: {}", e),
        }
    } else {
        info!(
            "Run {}: {} ns simulated, {} tasks started, {} finished, {} periodic runs",
            summary.status,
            summary.report.end_time_ps / labwired_core::signals::PS_PER_NS,
            summary.report.tasks_started,
            summary.report.tasks_finished,
            summary.report.periodic_runs
        );
        for port in &summary.ports {
            info!("  {}: {} stimulus events", port.name, port.stimulus_count);
        }
    }

    if failed {
        ExitCode::from(EXIT_RUNTIME_ERROR)
    } else {
        ExitCode::from(EXIT_PASS)
    }
}
