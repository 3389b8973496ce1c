use anyhow::Result;
use clap::Parser;
use hypervisor::app::ApplicationBuilder;
use hypervisor::config::{load_catalog, CheckArgs, Cli, Commands, RunArgs};
use hypervisor::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_args) => run(*run_args).await,
        Commands::Check(check_args) => check(check_args).await,
    }
}

async fn run(run_args: RunArgs) -> Result<()> {
    let _guard = logging::init(
        run_args
            .enable_metrics
            .then_some(run_args.metrics_file.as_path()),
    );

    tracing::info!(
        "Starting hypervisor {} ({})",
        &**version::VERSION,
        version::branch()
    );

    let app = ApplicationBuilder::new(run_args).build().await?;

    app.run().await?;
    app.shutdown().await?;

    Ok(())
}

async fn check(check_args: CheckArgs) -> Result<()> {
    utils::logging::init();

    let catalog = load_catalog(&check_args.chassis_config)
        .await
        .map_err(|report| anyhow::anyhow!("{report:?}"))?;
    let profiles = catalog
        .profiles()
        .map_err(|report| anyhow::anyhow!("{report:?}"))?;

    for profile in profiles {
        println!(
            "{} (overhead {:.2}, dispatch width {})",
            profile.name(),
            profile.overhead_fraction(),
            profile.dispatch_width()
        );
        for (kind, amount) in profile.effective_capacity().iter() {
            println!("  {kind}: {amount}");
        }
    }
    Ok(())
}
