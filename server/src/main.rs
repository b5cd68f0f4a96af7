use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fennec_server::auth::token::JwtAuthenticator;
use fennec_server::config::ServerConfig;
use fennec_server::db::pool::{create_pool, run_migrations};
use fennec_server::engine::chat_engine::ChatEngine;
use fennec_server::web::app_state::AppState;
use fennec_server::web::router::build_router;

#[derive(Parser)]
#[command(name = "fennec", about = "Multi-tenant chat server")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "fennec.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP and WebSocket server (default).
    Serve,
    /// Create a user and print its id.
    CreateUser {
        #[arg(long)]
        display_name: String,
    },
    /// Print a session token for an existing user.
    IssueToken {
        #[arg(long)]
        user_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;

    let pool = create_pool(&config.database.url)
        .await
        .context("failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    let authenticator = Arc::new(JwtAuthenticator::new(config.to_auth_config()));
    let engine = Arc::new(ChatEngine::new(
        pool,
        authenticator.clone(),
        config.to_engine_config(),
    ));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(engine, &config).await,
        Command::CreateUser { display_name } => {
            let user = engine.create_user(&display_name).await?;
            println!("{}", user.id);
            Ok(())
        }
        Command::IssueToken { user_id } => {
            let user = engine.get_user(&user_id).await?;
            let token = authenticator
                .issue(&user.id)
                .context("failed to sign token")?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(engine: Arc<ChatEngine>, config: &ServerConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    // Reap sessions that stopped heartbeating, twice per interval.
    let reaper_engine = engine.clone();
    let reaper_shutdown = shutdown.clone();
    let period = engine.config().heartbeat_interval / 2;
    let reaper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = reaper_shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    reaper_engine.reap_idle_sessions().await;
                }
            }
        }
    });

    let app = build_router(Arc::new(AppState::new(engine.clone(), config)));
    let listener = tokio::net::TcpListener::bind(&config.server.web_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.web_address))?;
    info!("Fennec server listening on {}", config.server.web_address);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutting down");
            signal.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    engine.shutdown();
    let _ = reaper.await;
    Ok(())
}
