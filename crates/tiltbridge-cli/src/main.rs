//! `tiltbridge` – driver-input to motion-platform bridge.
//!
//! 1. Initialises logging (and OTLP export when configured).
//! 2. Loads `~/.tiltbridge/config.toml`, writing the defaults on first run.
//! 3. Dials the driver-input and control-panel publishers.  Either failing
//!    or timing out is fatal; Ctrl-C aborts the dial.
//! 4. Runs the dispatch loop on a single-threaded runtime until Ctrl-C, then
//!    levels the platform and exits.

mod config;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use tiltbridge_hal::{CommandMapper, UdpPlatform};
use tiltbridge_middleware::{Multiplexer, SpSubscriber};
use tiltbridge_runtime::Dispatcher;
use tiltbridge_types::{BridgeError, ChannelId};

fn main() -> ExitCode {
    let _telemetry = tiltbridge_runtime::init_tracing("tiltbridge");

    print_banner();

    let path = config::config_path();
    let cfg = match config::load_or_init(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            error!(error = %e, path = %path.display(), "cannot load configuration");
            return ExitCode::FAILURE;
        }
    };
    println!("  Config loaded from {}", path.display().to_string().bold());

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "cannot start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => {
            println!("{}", "  ✓ Bridge stopped cleanly.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Bridge stopped".red(), e);
            error!(error = %e, "bridge stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: config::Config) -> Result<(), BridgeError> {
    let stop = Arc::new(Notify::new());
    let stop_handler = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – levelling platform …".yellow().bold());
        stop_handler.notify_one();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; the platform will not be levelled on Ctrl-C");
    }

    let (mux, platform) = tokio::select! {
        attached = connect_all(&cfg) => attached?,
        _ = stop.notified() => {
            info!("stop requested during startup");
            return Ok(());
        }
    };
    let mut dispatcher = Dispatcher::new(
        mux,
        CommandMapper::new(cfg.dispatch.mapping),
        platform,
        cfg.dispatch_settings(),
    );

    let outcome = tokio::select! {
        result = dispatcher.run() => result,
        _ = stop.notified() => {
            info!("stop requested");
            Ok(())
        }
    };
    dispatcher.shutdown().await;
    outcome
}

/// Dial both channels and open the platform link.
async fn connect_all(cfg: &config::Config) -> Result<(Multiplexer, UdpPlatform), BridgeError> {
    let mut mux = Multiplexer::new().with_separator(cfg.dispatch.separator);
    for channel in ChannelId::ALL {
        let source = cfg.channel(channel);
        let subscriber = SpSubscriber::dial(&source.address, source.topic.clone()).await?;
        info!(channel = %channel, address = %source.address, topic = %source.topic, "channel attached");
        mux.attach(channel, Box::new(subscriber));
    }
    let platform = UdpPlatform::connect(&cfg.platform.host, cfg.platform.port).await?;
    Ok((mux, platform))
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"  _   _ _ _   _          _    _         "#.bold().cyan());
    println!("{}", r#" | |_(_) | |_| |__  _ __(_)__| |__ _ ___ "#.bold().cyan());
    println!("{}", r#" |  _| | |  _| '_ \| '_ | / _` / _` / -_)"#.bold().cyan());
    println!("{}", r#"  \__|_|_|\__|_.__/|_| |_\__,_\__, \___|"#.bold().cyan());
    println!("{}", r#"                              |___/      "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "tiltbridge".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Driver input → motion platform");
    println!();
}
