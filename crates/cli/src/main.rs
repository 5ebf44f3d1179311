use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "meshdesk", about = "meshdesk — multi-tenant live chat delivery core")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log filter (tracing env-filter syntax).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file path (overrides discovery).
    #[arg(long, global = true, env = "MESHDESK_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chat gateway (default when no subcommand is provided).
    Serve,
    /// Run database migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => meshdesk_config::load_config(path)?,
        None => meshdesk_config::discover_and_load(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let filter_directive = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log.filter.clone());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_directive));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs || config.log.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => meshdesk_gateway::serve(config).await,
        Commands::Migrate => {
            let pool = sqlx::SqlitePool::connect(&config.database.url).await?;
            meshdesk_gateway::run_migrations(&pool)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            info!("migrations applied");
            Ok(())
        },
    }
}
