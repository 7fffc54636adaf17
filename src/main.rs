use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use plinth::cache::{HttpCache, cache_mgmt, purge_bus};
use plinth::cli::{StdSession, dispatch};
use plinth::config::ConfigSite;
use plinth::project::ProjectService;
use plinth::resolver::DnsTxtResolver;
use plinth::server::{AppState, create_router};
use plinth::storage::{FsStorage, PassthroughProcessor};
use plinth::store::{SqliteStore, Store};

#[derive(Parser)]
#[command(name = "plinth")]
#[command(about = "Multi-tenant static-site hosting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server and purge coordinator
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to bind to; falls back to PLINTH_WEB_PORT
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Run one admin command against the local store
    Exec {
        /// Acting username
        #[arg(long)]
        user: String,

        /// Command vector, e.g. `link staging --to v2 --write`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
}

fn open_store(cfg: &ConfigSite) -> anyhow::Result<SqliteStore> {
    if let Some(parent) = cfg.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = SqliteStore::new(&cfg.db_path)?;
    store.initialize()?;
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = ConfigSite::from_env();

    match cli.command {
        Commands::Serve { host, port } => {
            let store = Arc::new(open_store(&cfg)?);
            let storage = Arc::new(FsStorage::new(&cfg.storage_dir));
            let txt = Arc::new(DnsTxtResolver::from_system_conf()?);
            let cache = Arc::new(HttpCache::new(cfg.cache_ttl));
            let (purge, purge_rx) = purge_bus();

            tokio::spawn(cache_mgmt(cache.clone(), purge_rx));

            let port = port.unwrap_or(cfg.web_port);
            let state = Arc::new(AppState {
                cfg,
                store,
                storage,
                txt,
                img: Arc::new(PassthroughProcessor),
                cache,
                purge,
            });

            let app = create_router(state);
            let addr = format!("{host}:{port}");
            info!("starting web server on {addr}");

            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, app).await?;
        }
        Commands::Exec { user, args } => {
            let store = Arc::new(open_store(&cfg)?);
            let storage = Arc::new(FsStorage::new(&cfg.storage_dir));
            let (purge, mut purge_rx) = purge_bus();

            let Some(user) = store.find_user_by_name(&user)? else {
                bail!("user not found: {user}");
            };

            let service = ProjectService {
                store,
                storage,
                purge,
            };
            let mut sesh = StdSession;
            let code = dispatch(&service, &user, &args, &mut sesh).await;

            // surface purge tokens for the operator; the coordinator
            // lives in the serve process
            while let Ok(token) = purge_rx.try_recv() {
                info!(surrogate_key = token, "purge token published");
            }

            std::process::exit(code);
        }
    }

    Ok(())
}
