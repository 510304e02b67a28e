use anyhow::{Context, Result, bail};
use axum::{
    Router,
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod config;
mod db;
mod handlers;
mod metrics;
mod models;
mod notify;
mod repository;
#[cfg(test)]
mod test_helpers;
mod ws;

use crate::auth::{AuthState, IdentityVerifier, TokenIdentity};
use crate::config::{PushConfig, SessionConfig, load_config};
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::notify::{NotificationDispatcher, PushProvider, WebPushClient};
use crate::repository::{
    NotificationStore, PushEndpointStore, SqliteMessageStore, SqliteNotificationStore,
    SqlitePushEndpointStore,
};
use crate::ws::session::SessionContext;
use crate::ws::{ConnectionRegistry, DirectRouter, RoomRouter, SessionChannel};

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "shoal")]
#[command(about = "Real-time messaging fabric for chat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom config file (defaults to ./shoal.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server in the foreground
    Serve(ServeArgs),

    /// Generate a fresh Ed25519 keypair for token issuance
    GenKey,
}

#[derive(Parser)]
struct ServeArgs {
    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    /// Registry for room and direct-message sessions
    pub chat_registry: Arc<ConnectionRegistry>,
    /// Registry for notification sessions
    pub notify_registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomRouter>,
    pub direct: Arc<DirectRouter>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub notifications: Arc<dyn NotificationStore>,
    pub push_endpoints: Arc<dyn PushEndpointStore>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub metrics: Arc<ServerMetrics>,
    pub session: SessionConfig,
}

impl AppState {
    /// The wiring a new session needs, against the registry its channel
    /// kind lives in.
    pub(crate) fn session_context(&self, channel: &SessionChannel) -> SessionContext {
        let registry = match channel {
            SessionChannel::Notify => Arc::clone(&self.notify_registry),
            SessionChannel::Room { .. } | SessionChannel::Direct => {
                Arc::clone(&self.chat_registry)
            }
        };
        SessionContext {
            registry,
            rooms: Arc::clone(&self.rooms),
            direct: Arc::clone(&self.direct),
            metrics: Arc::clone(&self.metrics),
            heartbeat: self.session.heartbeat,
            send_buffer: self.session.send_buffer,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::GenKey => gen_key(),
        Commands::Serve(args) => run_server(args, cli.config).await,
    }
}

fn gen_key() -> Result<()> {
    let mut rng = rand::rng();
    let key = shoal_auth::SigningKey::generate(&mut rng);
    println!(
        "signing key (keep with the credential issuer): {}",
        shoal_auth::encoding::base64_encode(&key.to_bytes())
    );
    println!("verifying key (auth.verifying_key):          {}", key.public_key());
    Ok(())
}

async fn run_server(args: ServeArgs, config_path: Option<PathBuf>) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "shoal=debug,tower_http=debug,info"
    } else {
        "shoal=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting Shoal - real-time messaging fabric");

    let file_config = load_config(config_path.as_deref())?;
    let session = SessionConfig::from_file(&file_config.session);
    info!(
        "Session config: heartbeat={}s, send_buffer={}",
        session.heartbeat.as_secs(),
        session.send_buffer
    );

    let Some(verifying_key) = file_config.auth.verifying_key.as_deref() else {
        bail!("auth.verifying_key must be configured (generate a keypair with `shoal gen-key`)");
    };
    let verifying_key = shoal_auth::PublicKey::parse(verifying_key)
        .map_err(|e| anyhow::anyhow!("invalid auth.verifying_key: {e}"))?;
    let verifier: Arc<dyn IdentityVerifier> = Arc::new(TokenIdentity::new(verifying_key));

    // Initialize database and stores
    info!("Initializing database...");
    let db = Database::new(&file_config.database.db_url()).await?;
    let message_store = Arc::new(SqliteMessageStore::new(db.pool.clone()));
    let notifications: Arc<dyn NotificationStore> =
        Arc::new(SqliteNotificationStore::new(db.pool.clone()));
    let push_endpoints: Arc<dyn PushEndpointStore> =
        Arc::new(SqlitePushEndpointStore::new(db.pool.clone()));

    // Wire the live-delivery core
    let metrics = Arc::new(ServerMetrics::new());
    let chat_registry = Arc::new(ConnectionRegistry::new());
    let notify_registry = Arc::new(ConnectionRegistry::new());
    let rooms = Arc::new(RoomRouter::new(
        Arc::clone(&chat_registry),
        Arc::clone(&metrics),
    ));
    let direct = Arc::new(DirectRouter::new(
        Arc::clone(&chat_registry),
        message_store,
        Arc::clone(&metrics),
    ));

    let push_provider: Option<Arc<dyn PushProvider>> =
        match PushConfig::from_file(&file_config.push)? {
            Some(push_config) => {
                let client = WebPushClient::new(&push_config)
                    .context("Failed to initialize web-push client")?;
                Some(Arc::new(client))
            }
            None => {
                info!("Web push disabled (set push.enabled = true to enable)");
                None
            }
        };

    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&notify_registry),
        Arc::clone(&notifications),
        Arc::clone(&push_endpoints),
        push_provider,
        Arc::clone(&metrics),
    ));

    let app_state = AppState {
        chat_registry,
        notify_registry,
        rooms,
        direct,
        dispatcher,
        notifications,
        push_endpoints,
        verifier,
        metrics,
        session,
    };
    let auth_state = AuthState {
        verifier: Arc::clone(&app_state.verifier),
    };

    // REST surface behind the bearer-token middleware
    let api = Router::new()
        .route(
            "/api/notifications",
            get(handlers::notifications::list_unread).post(handlers::notifications::dispatch),
        )
        .route(
            "/api/notifications/{id}/read",
            post(handlers::notifications::mark_read),
        )
        .route(
            "/api/notifications/read-all",
            post(handlers::notifications::mark_all_read),
        )
        .route(
            "/api/push/subscriptions",
            post(handlers::push::subscribe).delete(handlers::push::unsubscribe),
        )
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            auth::auth_middleware,
        ));

    let app = Router::new()
        // Connection upgrade endpoints (token in query string)
        .route("/ws/rooms", get(handlers::websocket::room_handler))
        .route("/ws/direct", get(handlers::websocket::direct_handler))
        .route(
            "/ws/notifications",
            get(handlers::websocket::notification_handler),
        )
        .merge(api)
        // Health endpoints
        .route("/health", get(handlers::health::health_handler))
        .route("/metrics", get(handlers::health::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let host = args.host.unwrap_or(file_config.server.host);
    let port = args.port.unwrap_or(file_config.server.port);
    let addr = format!("{host}:{port}").parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Shoal listening on http://{actual_addr}");
    info!("Channels:");
    info!("  GET    /ws/rooms?token=...&room=<id>  - room chat");
    info!("  GET    /ws/direct?token=...           - direct messages");
    info!("  GET    /ws/notifications?token=...    - notifications");

    // Create shutdown signal handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, closing...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
