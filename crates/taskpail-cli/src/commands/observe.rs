//! Commands that watch a deployed run: `status`, `cpu`, `logs`.

use std::error::Error;
use std::io::Write;

use clap::Args;
use taskpail_core::ComponentKind;
use taskpail_status::{Aggregator, StreamConfig, Streamer};
use taskpail_tui_components::utilization_lines;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::app::StatusApp;
use crate::backend;
use crate::commands::queue::shutdown_token;
use crate::context::{RunArgs, StoreArgs, TargetArgs};

#[derive(Args)]
pub struct WatchArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub target: TargetArgs,
}

impl WatchArgs {
    fn streamer(&self) -> Result<Box<dyn Streamer>, Box<dyn Error>> {
        let backend = backend::new(&self.target.target)?;
        let client = self.store.client()?;
        Ok(backend.streamer(&self.run.context(), &self.target.namespace, client))
    }
}

#[derive(Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub watch: WatchArgs,

    /// Application name shown in the view; the run name when absent
    #[arg(long)]
    pub app: Option<String>,

    /// Start in summary mode (no per-pool queue breakdown)
    #[arg(long)]
    pub summary: bool,
}

#[derive(Args)]
pub struct CpuArgs {
    #[command(flatten)]
    pub watch: WatchArgs,
}

#[derive(Args)]
pub struct LogsArgs {
    #[command(flatten)]
    pub watch: WatchArgs,

    /// Component: dispatcher, workstealer, workers, shell, queue
    #[arg(value_parser = parse_component)]
    pub component: ComponentKind,

    /// Keep streaming new output
    #[arg(short, long)]
    pub follow: bool,
}

fn parse_component(s: &str) -> Result<ComponentKind, String> {
    [
        ComponentKind::Dispatcher,
        ComponentKind::WorkStealer,
        ComponentKind::Workers,
        ComponentKind::Shell,
        ComponentKind::Queue,
    ]
    .into_iter()
    .find(|k| k.as_str() == s.to_ascii_lowercase())
    .ok_or_else(|| format!("unknown component '{}'", s))
}

/// Live status view. The aggregator runs on `runtime` while the UI loop
/// owns the calling thread.
pub fn status(runtime: &Runtime, args: StatusArgs) -> Result<(), Box<dyn Error>> {
    let config = StreamConfig::default();
    let run_name = args.watch.run.run_name.clone();
    let app_name = args.app.clone().unwrap_or_else(|| run_name.clone());
    let streamer = args.watch.streamer()?;
    let cancel = CancellationToken::new();

    let snapshots = runtime.block_on(
        Aggregator::new(app_name, run_name.as_str(), config.clone())
            .start(streamer.as_ref(), cancel.clone()),
    )?;
    let utilization = runtime
        .block_on(streamer.utilization(config.utilization_interval, cancel.child_token()));

    let mut app = StatusApp::new(snapshots, args.summary);
    match utilization {
        Ok(rx) => app = app.with_utilization(rx),
        Err(e) => debug!(error = %e, "utilization not available"),
    }

    let terminal = ratatui::init();
    let result = app.run(terminal);
    ratatui::restore();
    cancel.cancel();

    info!(run = %run_name, "status view closed");
    Ok(result?)
}

/// Print utilization samples until interrupted.
pub async fn cpu(args: CpuArgs, verbose: bool) -> Result<(), Box<dyn Error>> {
    let streamer = args.watch.streamer()?;
    let cancel = shutdown_token();
    let mut samples = streamer
        .utilization(StreamConfig::default().utilization_interval, cancel.clone())
        .await?;

    let mut stdout = std::io::stdout();
    while let Some(sample) = samples.recv().await {
        if !verbose {
            // clear and home
            write!(stdout, "\x1B[2J\x1B[H")?;
        }
        for line in utilization_lines(&sample) {
            writeln!(stdout, "{}", line)?;
        }
        stdout.flush()?;
    }
    Ok(())
}

/// Print the logs of one component.
pub async fn logs(args: LogsArgs) -> Result<(), Box<dyn Error>> {
    let streamer = args.watch.streamer()?;
    let cancel = shutdown_token();
    let mut lines = streamer
        .component_logs(args.component, args.follow, cancel)
        .await?;

    while let Some(line) = lines.recv().await {
        println!("{}", line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_component() {
        assert_eq!(parse_component("workers"), Ok(ComponentKind::Workers));
        assert_eq!(parse_component("WorkStealer"), Ok(ComponentKind::WorkStealer));
        assert!(parse_component("pods").is_err());
    }
}
