use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rouse_core::{Actuator, HardwareRegistry, InvertedActuator, SimulatedActuator};
use rouse_daemon::{DaemonConfig, HardwareConfig, Orchestrator};
use rouse_notify::EmailInterface;
use rouse_rouser::Rouser;
use rouse_schedule::{ScheduleStore, StoreStatus};

/// Alarm clock daemon driven by a recurring schedule file.
#[derive(Parser, Debug)]
#[command(name = "rouse", version, about)]
struct Args {
    /// Path to the config file (default: rouse.toml)
    #[arg(long, env = "ROUSE_CONFIG")]
    config: Option<PathBuf>,

    /// Print the next N occurrences as JSON and exit
    #[arg(long, value_name = "N")]
    upcoming: Option<usize>,

    /// Validate the configuration and schedule file, then exit
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let path = DaemonConfig::resolve_path(args.config.as_deref());
    let config = DaemonConfig::load(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    let registry = build_hardware(&config.hardware);
    let rouser = Rouser::new(config.rouser.clone(), &registry, config.hardware.output_pin)
        .with_context(|| format!("failed to acquire output pin {}", config.hardware.output_pin))?
        .with_alarms(config.alarms.clone())
        .with_evaluator(Arc::new(config.evaluator()))
        .with_toggle_pins(config.hardware.toggle_pins.clone());
    let rouser = Arc::new(rouser);

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&rouser),
        ScheduleStore::new(&config.schedule.path),
        &config.schedule,
    ));

    if args.check || args.upcoming.is_some() {
        orchestrator.store().refresh();
        match orchestrator.schedule_status() {
            StoreStatus::Unavailable { error } | StoreStatus::Degraded { error } => {
                bail!("schedule {} is not usable: {error}", config.schedule.path.display())
            }
            status => info!(?status, "schedule ok"),
        }
        if let Some(n) = args.upcoming {
            let upcoming = orchestrator.upcoming(n);
            println!("{}", serde_json::to_string_pretty(&upcoming)?);
        }
        return Ok(());
    }

    for (key, email) in &config.email {
        match EmailInterface::new(key, rouser.name(), email.clone()) {
            Ok(iface) => orchestrator.add_interface(Box::new(iface)),
            Err(e) => error!(interface = %key, error = %e, "invalid email interface; skipping it"),
        }
    }
    let started = orchestrator.startup();
    info!(interfaces = started, "interfaces started");

    let rouser_thread = std::thread::Builder::new()
        .name("rouse-rouser".into())
        .spawn({
            let rouser = Arc::clone(&rouser);
            move || rouser.run()
        })
        .context("failed to spawn rouser thread")?;

    let orchestrator_thread = std::thread::Builder::new()
        .name("rouse-orchestrator".into())
        .spawn({
            let orchestrator = Arc::clone(&orchestrator);
            move || orchestrator.run()
        })
        .context("failed to spawn orchestrator thread")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    runtime
        .block_on(shutdown_signal())
        .context("failed to listen for shutdown signals")?;
    drop(runtime);

    info!("shutdown signal received");
    orchestrator.stop();
    orchestrator_thread
        .join()
        .map_err(|_| anyhow!("orchestrator thread panicked"))?;
    if rouser.is_running() {
        rouser.shutdown();
    }
    rouser_thread
        .join()
        .map_err(|_| anyhow!("rouser thread panicked"))?;

    info!("rouse stopped");
    Ok(())
}

/// Register the output actuator. Only the simulated driver ships with the
/// daemon; it logs every mode change.
fn build_hardware(config: &HardwareConfig) -> HardwareRegistry {
    let registry = HardwareRegistry::new(&config.input_pins);
    let simulated = SimulatedActuator::new(config.output_pin);
    let output: Arc<dyn Actuator> = if config.invert_on_off {
        Arc::new(InvertedActuator::new(simulated))
    } else {
        Arc::new(simulated)
    };
    registry.register_output(config.output_pin, output);
    registry
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
