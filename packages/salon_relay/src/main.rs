use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use salon_relay::config::{
    self, DEFAULT_HOST, DEFAULT_PORT, DeliveryConfig, FileConfig, Profile, RelayPaths,
    ServerConfig,
};
use salon_relay::db::Database;
use salon_relay::delivery::channel_from_config;
use salon_relay::persistence::{self, ConversationSink, NullSink};
use salon_relay::relay::ConversationStore;
use salon_relay::repository::ConversationRepository;
use salon_relay::{AppState, build_router};

#[derive(Parser)]
#[command(name = "salon-relay")]
#[command(about = "Real-time chat relay between salon customers and operators")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.salon-relay)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server in the foreground
    Server(ServerArgs),
}

#[derive(Parser, Default)]
struct ServerArgs {
    /// Port for the web server (0 = auto-select)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Configuration preset
    #[arg(long, value_enum)]
    profile: Option<Profile>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Clean start - reset database (prompt for confirmation)
    #[arg(long)]
    reset_db: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let args = match cli.command {
        Some(Commands::Server(args)) => args,
        None => ServerArgs::default(),
    };
    run_server(args, cli.data_dir).await
}

async fn run_server(args: ServerArgs, data_dir: Option<PathBuf>) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "salon_relay=debug,tower_http=debug,info"
    } else {
        "salon_relay=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting salon relay");

    let paths = RelayPaths::new(data_dir)?;
    let file_config: FileConfig = config::load_config(&paths.data_dir, args.profile.as_ref())
        .extract()
        .with_context(|| {
            format!(
                "Invalid configuration in {}",
                paths.config_toml_path().display()
            )
        })?;

    // Handle database reset if requested
    if args.reset_db && paths.db_path.exists() {
        println!("This will delete all stored conversations!");
        print!("Are you sure? (yes/no): ");
        use std::io::{self, Write};
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if input.trim() == "yes" {
            paths.reset_database()?;
        } else {
            println!("Database reset cancelled.");
        }
    }

    let server_config = ServerConfig::from_file(&file_config.server);
    let delivery_config = DeliveryConfig::from_file(&file_config.delivery);
    let shutdown_grace = server_config.shutdown_grace;

    // Storage: restore persisted conversations before accepting traffic
    let store = Arc::new(ConversationStore::new());
    let (db, sink): (Option<Arc<Database>>, Arc<dyn ConversationSink>) =
        if file_config.persistence.enabled {
            let db = Arc::new(Database::new(&paths).await?);
            let repository = ConversationRepository::new(db.pool.clone());
            persistence::hydrate(&store, &repository).await?;
            let sink: Arc<dyn ConversationSink> = Arc::new(repository);
            (Some(db), sink)
        } else {
            info!("Persistence disabled; conversations live in memory only");
            let sink: Arc<dyn ConversationSink> = Arc::new(NullSink);
            (None, sink)
        };

    let channel = channel_from_config(&delivery_config)
        .context("Failed to set up the customer channel")?;

    let (app_state, outbox_worker) = AppState::new(
        server_config,
        store,
        sink,
        Arc::from(channel),
        db.clone(),
    );
    let outbox = app_state.outbox.clone();
    let app = build_router(app_state);

    let host = args
        .host
        .or(file_config.server.host)
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = args.port.or(file_config.server.port).unwrap_or(DEFAULT_PORT);
    let addr = format!("{}:{}", host, port)
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid bind address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Salon relay listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  GET    /api/ws                          - Relay WebSocket");
    info!("  GET    /api/conversations               - List conversations");
    info!("  GET    /api/conversations/:id           - Conversation with messages");
    info!("  POST   /api/conversations/:id/release   - Clear assignment");
    info!("  POST   /api/inbound                     - Customer message webhook");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    // Give queued writes and customer deliveries a bounded window to finish
    // Both queues drain concurrently; the deadline is shared
    info!("Draining outbox...");
    let deadline = tokio::time::Instant::now() + shutdown_grace;
    match tokio::time::timeout_at(deadline, outbox.flush_storage()).await {
        Ok(true) => info!("Storage writes drained"),
        Ok(false) => warn!("Outbox worker stopped before storage drained"),
        Err(_) => warn!("Storage writes still pending after {:?}", shutdown_grace),
    }
    match tokio::time::timeout_at(deadline, outbox.flush_deliveries()).await {
        Ok(true) => info!("Customer deliveries drained"),
        Ok(false) => warn!("Outbox worker stopped before deliveries drained"),
        Err(_) => warn!(
            "Customer deliveries still pending after {:?}; exiting anyway",
            shutdown_grace
        ),
    }
    drop(outbox);
    outbox_worker.abort();

    if let Some(db) = db {
        db.pool.close().await;
    }

    info!("Shutdown complete");
    server_result
}
