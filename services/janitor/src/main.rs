//! janitor - sweep dangling images out of a container registry

use std::net::SocketAddr;
use std::num::NonZeroUsize;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use eyre::WrapErr as _;
use janitor::config::SweepConfig;
use janitor::{JanitorBuilder, JanitorConfig};
use sweeper::{CancellationToken, Registry, Sweeper};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Debug, Parser)]
#[command(name = "janitor", version, about)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP trigger
    Serve {
        /// Address to listen on
        #[arg(long)]
        listen: Option<SocketAddr>,

        #[command(flatten)]
        sweep: SweepArgs,
    },

    /// Sweep the given roots once and print the summary as JSON
    Sweep {
        /// Root repositories, e.g. gcr.io/my-project
        #[arg(required = true)]
        repositories: Vec<String>,

        #[command(flatten)]
        sweep: SweepArgs,
    },
}

#[derive(Debug, Args)]
struct SweepArgs {
    /// References per delete call
    #[arg(long)]
    batch_size: Option<NonZeroUsize>,

    /// Delay between repository expansions, in milliseconds
    #[arg(long)]
    pacing_ms: Option<u64>,

    /// Report untagged images without deleting them
    #[arg(long)]
    dry_run: bool,
}

impl SweepArgs {
    fn apply(&self, config: &mut SweepConfig) {
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(pacing_ms) = self.pacing_ms {
            config.pacing_ms = pacing_ms;
        }
        config.dry_run |= self.dry_run;
    }
}

fn init_tracing(verbose: u8, format: LogFormat) {
    let filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_error::ErrorLayer::default());

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!("Unable to listen for Ctrl-C: {error}");
            return;
        }
        tracing::info!("Interrupted, stopping");
        token.cancel();
    });
}

fn build_sweeper(config: &JanitorConfig) -> eyre::Result<Sweeper> {
    let api = config
        .registry
        .client()
        .wrap_err("configuring registry client")?;
    tracing::debug!(url = %api.base(), "Registry client ready");
    Ok(Sweeper::new(Registry::new(api), config.sweep.options()))
}

async fn serve(config: JanitorConfig) -> eyre::Result<()> {
    let shutdown = CancellationToken::new();
    cancel_on_interrupt(shutdown.clone());

    let app = JanitorBuilder::new(build_sweeper(&config)?)
        .shutdown(shutdown.clone())
        .build();

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .wrap_err_with(|| format!("binding {}", config.listen))?;
    tracing::info!("Janitor listening on http://{}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .wrap_err("serving")?;

    Ok(())
}

async fn sweep(config: JanitorConfig, repositories: Vec<String>) -> eyre::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let summary = build_sweeper(&config)?
        .run_with_cancel(repositories, cancel)
        .await;

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).wrap_err("encoding summary")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let mut config = JanitorConfig::load(cli.config.as_deref()).wrap_err("loading configuration")?;

    match cli.command {
        Command::Serve { listen, sweep: args } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            args.apply(&mut config.sweep);
            serve(config).await
        }
        Command::Sweep {
            repositories,
            sweep: args,
        } => {
            args.apply(&mut config.sweep);
            sweep(config, repositories).await
        }
    }
}
