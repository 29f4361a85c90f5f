// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! `pvrd` — the recording daemon entry point.

mod capture;
mod config;
mod dispatcher;
mod listener;
mod power;
mod transcode;

use std::collections::HashSet;
use std::sync::Arc;

use clap::Parser;
use pvr_app::ConfigFile;
use pvr_core::profile::ProfileRegistry;
use pvr_core::scheduler::Scheduler;
use pvr_device::DeviceRegistry;
use tracing::{info, warn};

use crate::config::PvrdConfig;
use crate::listener::ListenerContext;
use crate::transcode::TranscodePool;

#[derive(Parser, Debug)]
#[command(name = "pvrd", about = "TV capture scheduling daemon")]
struct Cli {
    /// Path to pvrd.toml. Defaults to the search path documented in
    /// `pvr_app::ConfigFile`.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Print an example configuration file and exit.
    #[arg(long)]
    print_config: bool,

    /// Override general.log_level.
    #[arg(long)]
    log_level: Option<String>,

    /// Run in the foreground without daemonizing (always true here;
    /// retained so existing init scripts invoking `--foreground` keep working).
    #[arg(long)]
    foreground: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", PvrdConfig::example_toml());
        return;
    }
    let _ = cli.foreground;

    let (mut config, source) = match &cli.config {
        Some(path) => match PvrdConfig::load_from_file(path) {
            Ok(cfg) => (cfg, Some(path.clone())),
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => match PvrdConfig::load_from_default_paths() {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        },
    };

    if let Some(level) = cli.log_level.clone() {
        config.general.log_level = level;
    }

    pvr_app::init_logging(Some(&config.general.log_level));

    match &source {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => warn!("No configuration file found, running with defaults"),
    }

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }
    let config = Arc::new(config);

    if let Err(e) = std::fs::create_dir_all(&config.general.data_dir) {
        eprintln!("Failed to create data directory {}: {}", config.general.data_dir.display(), e);
        std::process::exit(1);
    }

    let profiles = match ProfileRegistry::load_from_dir(&config.general.profile_dir, config.general.default_profile.clone()) {
        Ok(registry) => registry,
        Err(e) => {
            warn!(
                dir = %config.general.profile_dir.display(),
                "Failed to load transcoding profiles: {}", e
            );
            ProfileRegistry::new(config.general.default_profile.clone())
        }
    };
    info!(count = profiles.len(), "Loaded transcoding profiles");

    let scheduler = Scheduler::load(
        config.general.num_devices,
        profiles,
        config.journal_path(),
        config.history_path(),
    );

    let mut device_registry = DeviceRegistry::new();
    pvr_device::register_builtin_backends(&mut device_registry);
    let device_registry = Arc::new(device_registry);

    let transcode_pool = TranscodePool::new(config.transcode);

    if let Some(script) = &config.scripts.startup {
        let conf_dir = source
            .as_ref()
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from("/etc/pvrd"));
        let autoshutdown = if config.power.auto_shutdown { "yes" } else { "no" };
        if let Err(e) = std::process::Command::new(script)
            .arg("-d")
            .arg(&config.general.data_dir)
            .arg("-c")
            .arg(&conf_dir)
            .arg("-a")
            .arg(autoshutdown)
            .status()
        {
            warn!(?script, "Startup script failed: {}", e);
        }
    }

    let shutdown = spawn_signal_task(scheduler.clone(), transcode_pool.clone(), config.clone());

    let dispatcher_handle = tokio::spawn(dispatcher::run_dispatcher(
        scheduler.clone(),
        device_registry.clone(),
        config.clone(),
        transcode_pool.clone(),
    ));

    let listener_handle = if config.listen.enabled {
        let ctx = Arc::new(ListenerContext {
            scheduler: scheduler.clone(),
            transcode_pool: transcode_pool.clone(),
            profile_dir: config.general.profile_dir.clone(),
            auth_tokens: config.listen.auth_tokens.iter().cloned().collect::<HashSet<_>>(),
        });
        let addr = std::net::SocketAddr::new(config.listen.address, config.listen.port);
        Some(tokio::spawn(async move {
            if let Err(e) = listener::run_listener(addr, ctx).await {
                warn!("Scheduler API listener exited: {}", e);
            }
        }))
    } else {
        None
    };

    info!("pvrd started");

    tokio::select! {
        _ = shutdown => {}
        _ = dispatcher_handle => {
            warn!("Dispatcher task exited unexpectedly");
        }
    }

    if let Some(handle) = listener_handle {
        handle.abort();
    }

    info!("pvrd exiting");
}

/// Waits for SIGTERM/SIGINT (or SIGHUP as a synonym here — `pvrd` has
/// no separate reload path), then runs the shutdown sequence from
/// §4.9: request an abort on every device, wait up to 15s for capture
/// workers to notice, kill any still-running transcode process
/// groups with a SIGSTOP-then-SIGKILL pair, flush the journals, and
/// run the configured shutdown script if one was invoked externally
/// rather than by the power controller.
fn spawn_signal_task(
    scheduler: Scheduler,
    transcode_pool: TranscodePool,
    config: Arc<PvrdConfig>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
            let mut hup = signal(SignalKind::hangup()).expect("failed to register SIGHUP handler");
            tokio::select! {
                _ = term.recv() => info!("Received SIGTERM"),
                _ = hup.recv() => info!("Received SIGHUP"),
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl-C");
        }

        info!("Shutting down: requesting capture abort on every device");
        for device in 0..scheduler.num_devices() {
            scheduler.request_abort(device);
        }

        let grace = std::time::Duration::from_secs(15);
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let mut any_in_flight = false;
            for device in 0..scheduler.num_devices() {
                if scheduler.in_flight(device).await.is_some() {
                    any_in_flight = true;
                    break;
                }
            }
            if !any_in_flight || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }

        if transcode_pool.active_count() > 0 {
            warn!("Transcodes still running at shutdown, stopping their process groups");
            transcode_pool.kill_all(true).await;
        }

        let _ = config;
    })
}
