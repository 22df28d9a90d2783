//! Firmware Update Simulator
//!
//! Runs the module dispatcher inside a cooperative control loop, the way the
//! device firmware does: every tick polls the updater once and then services
//! the loop's other duties.
//!
//! # Usage
//!
//! Panel update with the shipped configuration:
//! ```bash
//! ./example-panel --config crates/example-panel/config/example-panel.toml
//! ```
//!
//! Wireless and panel together, with two corrupted flash bytes:
//! ```bash
//! ./example-panel -m wireless_firmware,panel_firmware --corrupt 5,300
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use example_panel::{ensure_images, DuplexPanelLink, SimConfig};
use fwupdater_core::ModuleBitmap;
use fwupdater_session::testing::{FaultPlan, PanelOp, SimulatedPanel, SimulatedWireless};
use fwupdater_session::{FsStorage, ModuleDispatcher, ModuleId, TracingReporter};

#[derive(Parser, Debug)]
#[command(name = "example-panel")]
#[command(about = "Simulate wireless and panel firmware updates")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory the image directory is resolved against
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Modules to update, by name or bit number
    #[arg(short, long, value_delimiter = ',', default_value = "panel_firmware")]
    modules: Vec<ModuleId>,

    /// Control loop period in milliseconds
    #[arg(long, default_value_t = 10)]
    poll_ms: u64,

    /// Flash offsets whose programmed byte gets flipped
    #[arg(long, value_delimiter = ',')]
    corrupt: Vec<u32>,

    /// Reject this many page writes before accepting them
    #[arg(long, default_value_t = 0)]
    fail_writes: u32,

    /// Panel boot ROM never answers the handshake
    #[arg(long)]
    silent: bool,

    /// Create missing firmware images
    #[arg(long)]
    generate: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        "example_panel=debug,fwupdater_session=debug,fwupdater_serial=debug,fwupdater=debug"
    } else {
        "example_panel=info,fwupdater_session=info,fwupdater=info"
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from: {}", path.display());
            SimConfig::load(path).context("Failed to load config")?
        }
        None => SimConfig::default(),
    };
    config.board.generate_images |= args.generate;

    if config.board.generate_images {
        ensure_images(&args.root, &config).context("Failed to generate firmware images")?;
    }

    let plan = FaultPlan::default()
        .corrupt_at(&args.corrupt)
        .fail(PanelOp::Write, args.fail_writes);
    let panel = SimulatedPanel::new(config.board.page_size, config.board.pages).with_faults(plan);

    let mut link = DuplexPanelLink::new(panel, config.updater.serial.clone());
    if args.silent {
        link = link.silent();
    }
    let wireless =
        Arc::new(SimulatedWireless::new().with_busy_checks(config.board.wireless_busy_checks));

    info!(
        page_size = config.board.page_size,
        pages = config.board.pages,
        device = %config.updater.serial.device,
        "Starting firmware update simulator"
    );

    let mut dispatcher = ModuleDispatcher::new(
        config.updater.clone(),
        Arc::new(FsStorage::new(&args.root)),
        Arc::new(TracingReporter),
        Arc::new(link),
    )
    .with_wireless(wireless);

    let request: ModuleBitmap = args.modules.iter().copied().collect();
    dispatcher
        .dispatch_all(request)
        .await
        .context("Update request rejected")?;
    info!(modules = %request, "Update dispatched");

    let mut ticker = tokio::time::interval(Duration::from_millis(args.poll_ms.max(1)));
    let mut ticks: u64 = 0;
    let mut last_phase = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                match dispatcher.abort() {
                    Ok(()) => info!("Update aborted"),
                    Err(e) => warn!("{}", e),
                }
            }
        }

        let phase = dispatcher.poll().await;
        ticks += 1;

        // The loop's other duty: a heartbeat standing in for motion control
        if ticks % 100 == 0 {
            debug!(ticks, "Control loop heartbeat");
        }

        if phase.is_some() && phase != last_phase {
            if let Some(progress) = dispatcher.panel_progress() {
                info!(
                    phase = %phase.as_ref().map(|p| p.name()).unwrap_or("none"),
                    percent = format_args!("{:.0}", progress.percent()),
                    "Panel update progress"
                );
            }
            last_phase = phase;
        }

        if dispatcher.is_ready() {
            break;
        }
    }

    info!(ticks, "All updates finished");

    if let Some(outcome) = dispatcher.take_outcome() {
        info!(
            session_id = outcome.session_id,
            phase = %outcome.phase,
            pages_written = outcome.progress.pages_written,
            page_errors = outcome.progress.page_errors,
            total_errors = outcome.progress.total_errors,
            "Panel session outcome"
        );
        if !outcome.succeeded() {
            if outcome.requires_retry() {
                bail!("Panel update failed and the panel needs another update: {}", outcome.phase);
            }
            bail!("Panel update failed: {}", outcome.phase);
        }
    }

    Ok(())
}
