use std::error::Error;

use clap::Args;
use taskpail_compiler::lower::ENV_POOLS;
use taskpail_queue::WorkStealer;

use crate::commands::queue::shutdown_token;
use crate::context::{RunArgs, StoreArgs};

#[derive(Args)]
pub struct WorkstealerArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Pools to assign to; the pools present in the queue when empty
    #[arg(long, env = ENV_POOLS, value_delimiter = ',')]
    pub pools: Vec<String>,
}

/// Assign tasks until interrupted.
pub async fn run(args: WorkstealerArgs) -> Result<(), Box<dyn Error>> {
    let pools: Vec<String> = args
        .pools
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    let stealer = WorkStealer::new(args.store.client()?);
    stealer.run(&args.run.context(), &pools, shutdown_token()).await;
    Ok(())
}
