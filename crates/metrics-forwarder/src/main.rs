use anyhow::Result;
use clap::Parser;
use metrics_forwarder::app::ApplicationBuilder;
use metrics_forwarder::config::Cli;
use metrics_forwarder::config::Commands;
use metrics_forwarder::config::DaemonArgs;
use metrics_forwarder::config::DryRunArgs;
use metrics_forwarder::config::PipelineConfig;
use metrics_forwarder::logging;
use metrics_forwarder::metrics;
use metrics_forwarder::metrics::MetricsSource;
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
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
        Commands::DryRun(dry_run_args) => run_dry_run(*dry_run_args).await,
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    let _guard = logging::init(daemon_args.lines_file.as_deref());

    tracing::info!(
        "Starting metrics forwarder daemon {} ({})",
        &**version::VERSION,
        version::branch()
    );

    let app = ApplicationBuilder::new(daemon_args).build().await?;
    app.run().await?;

    Ok(())
}

async fn run_dry_run(dry_run_args: DryRunArgs) -> Result<()> {
    let _guard = logging::init(None);

    let config = PipelineConfig::from_args(&dry_run_args.pipeline)
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e:?}"))?;
    config.log_summary();

    let source = MetricsSource::new(&config.metrics_socket);
    let lines = metrics::collect_once(&source, &config.rules)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to poll metrics source: {e:?}"))?;
    for line in &lines {
        println!("{line}");
    }
    tracing::info!(lines = lines.len(), "Dry run completed");
    Ok(())
}
