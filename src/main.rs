use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use streamsender::config::settings::parse_duration;
use streamsender::storage::{self, ResultStore, SqliteStore};
use streamsender::{RunId, Settings};

#[derive(Parser)]
#[command(
    name = "streamsender",
    about = "Recurring stream-ingest load generation against a stream-tester",
    version,
    long_about = None
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (control plane + schedule + stats polling)
    Serve(ServeArgs),

    /// Inspect persisted run statistics
    Stats {
        #[command(subcommand)]
        action: StatsAction,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Control-plane listen address
    #[arg(long)]
    http: Option<String>,

    /// Period between scheduled runs (e.g. 1h, 30m, 90s)
    #[arg(long, value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Stream-tester address
    #[arg(long)]
    server: Option<String>,

    /// Broadcaster host
    #[arg(long)]
    broadcaster: Option<String>,

    /// Broadcaster RTMP port
    #[arg(long)]
    rtmp_port: Option<u16>,

    /// Broadcaster media port
    #[arg(long)]
    media_port: Option<u16>,

    /// Source video on the stream-tester
    #[arg(long)]
    file: Option<String>,

    /// Concurrent streams per run
    #[arg(long)]
    simultaneous: Option<u32>,

    /// Stats database path
    #[arg(long)]
    db_path: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(self, settings: &mut Settings) {
        if let Some(bind) = self.http {
            settings.server.bind = bind;
        }
        if let Some(interval) = self.interval {
            settings.schedule.interval_secs = interval.as_secs();
        }
        if let Some(address) = self.server {
            settings.harness.address = address;
        }
        if let Some(host) = self.broadcaster {
            settings.run.host = host;
        }
        if let Some(rtmp) = self.rtmp_port {
            settings.run.rtmp = rtmp;
        }
        if let Some(media) = self.media_port {
            settings.run.media = media;
        }
        if let Some(file) = self.file {
            settings.run.file_name = file;
        }
        if let Some(n) = self.simultaneous {
            settings.run.simultaneous = n;
        }
        if let Some(path) = self.db_path {
            settings.storage.db_path = path;
        }
    }
}

#[derive(Args)]
struct StoreArgs {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stats database path
    #[arg(long)]
    db_path: Option<PathBuf>,
}

impl StoreArgs {
    fn open(&self) -> Result<SqliteStore> {
        let db_path = match &self.db_path {
            Some(path) => path.clone(),
            None => Settings::resolve(self.config.as_deref())?.storage.db_path,
        };
        let pool = storage::open_pool(&db_path)?;
        Ok(SqliteStore::new(pool))
    }
}

#[derive(Subcommand)]
enum StatsAction {
    /// List all runs, newest first
    List {
        #[command(flatten)]
        store: StoreArgs,
    },

    /// Print the full record of one run as JSON
    Show {
        /// Base manifest ID of the run
        id: String,

        #[command(flatten)]
        store: StoreArgs,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Serve(args) => {
            let mut settings = Settings::resolve(args.config.as_deref())?;
            args.apply(&mut settings);
            tracing::info!(
                bind = %settings.server.bind,
                harness = %settings.harness.address,
                "Starting streamsender daemon"
            );

            let shutdown = CancellationToken::new();
            let on_signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("got Ctrl-C, shutting down");
                }
                on_signal.cancel();
            });

            streamsender::serve(settings, shutdown).await?;
        }
        Commands::Stats { action } => match action {
            StatsAction::List { store } => {
                let all = store.open()?.all().await?;
                if all.is_empty() {
                    println!("No runs recorded.");
                } else {
                    println!(
                        "{:<36} | {:<25} | {:<8} | {:>6} | {:>10} | {:>8}",
                        "Run", "Started", "Finished", "Sent", "Downloaded", "Success"
                    );
                    println!(
                        "{:-<36}-|-{:-<25}-|-{:-<8}-|-{:->6}-|-{:->10}-|-{:->8}",
                        "", "", "", "", "", ""
                    );
                    for (id, record) in all {
                        println!(
                            "{:<36} | {:<25} | {:<8} | {:>6} | {:>10} | {:>7.1}%",
                            id.as_str(),
                            record.start_time.to_rfc3339(),
                            record.finished,
                            record.sent_segments,
                            record.downloaded_segments,
                            record.success_rate * 100.0
                        );
                    }
                }
            }
            StatsAction::Show { id, store } => {
                let record = store.open()?.select(&RunId::new(id)).await?;
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
        },
    }

    Ok(())
}
