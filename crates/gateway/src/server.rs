use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::{FromRef, State},
        response::{IntoResponse, Json},
        routing::{get, post},
    },
    sqlx::SqlitePool,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use {
    wabridge_config::WabridgeConfig,
    wabridge_messaging::{ClientFactory, TenantStore},
    wabridge_whatsapp::{SidecarClientFactory, SidecarCommand, SidecarProcess, SidecarSettings},
};

use crate::{
    admin_routes, chat_routes, session_routes,
    state::GatewayState,
    tenant_store::{SqliteTenantStore, run_migrations},
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

impl FromRef<AppState> for Arc<GatewayState> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.gateway)
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let app_state = AppState { gateway: state };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/connect", post(session_routes::connect_handler))
        .route("/disconnect", post(session_routes::disconnect_handler))
        .route("/logout", post(session_routes::logout_handler))
        .route("/status", get(session_routes::status_handler))
        .route("/qr", get(session_routes::qr_handler))
        .route(
            "/webhook",
            get(session_routes::get_webhook_handler).post(session_routes::set_webhook_handler),
        )
        .route("/chat/send/text", post(chat_routes::send_text_handler))
        .route("/chat/react", post(chat_routes::react_handler))
        .route("/chat/markread", post(chat_routes::mark_read_handler))
        .route("/chat/presence", post(chat_routes::chat_presence_handler))
        .route("/user/check", post(chat_routes::check_users_handler))
        .route("/admin/users", post(admin_routes::create_tenant_handler));

    #[cfg(feature = "prometheus")]
    let router = router.route(
        "/metrics",
        get(crate::metrics_routes::prometheus_metrics_handler),
    );

    #[cfg(feature = "metrics")]
    let router = router.layer(axum::middleware::from_fn(
        crate::metrics_middleware::http_metrics_middleware,
    ));

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

// ── Startup ──────────────────────────────────────────────────────────────────

/// Open (creating if needed) the SQLite database and apply migrations.
pub async fn open_database(path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db_url = format!("sqlite:{}?mode=rwc", path.display());
    let pool = SqlitePool::connect(&db_url)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;
    Ok(pool)
}

fn sidecar_settings(config: &WabridgeConfig) -> SidecarSettings {
    SidecarSettings {
        url: config.sidecar.url.clone(),
        request_timeout: Duration::from_secs(config.sidecar.request_timeout_secs),
        auth_dir: config.sidecar_auth_dir(),
    }
}

fn sidecar_command(config: &WabridgeConfig) -> Option<SidecarCommand> {
    config.sidecar.spawn.as_ref().map(|spawn| SidecarCommand {
        program: spawn.command.clone(),
        args: spawn.args.clone(),
        env: spawn.env.clone(),
        working_dir: spawn.working_dir.clone(),
        stop_timeout: Duration::from_secs(spawn.stop_timeout_secs),
    })
}

/// Start the gateway and serve until ctrl-c or SIGTERM.
///
/// `factory` replaces the sidecar-backed client factory; the sidecar is
/// neither spawned nor contacted when one is given.
pub async fn start_gateway(
    config: WabridgeConfig,
    factory: Option<Arc<dyn ClientFactory>>,
) -> anyhow::Result<()> {
    let data_dir = config.resolved_data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let db_path = config.database_path();
    let pool = open_database(&db_path).await?;
    let store: Arc<dyn TenantStore> = Arc::new(SqliteTenantStore::new(pool.clone()));

    let mut sidecar = None;
    let factory = match factory {
        Some(factory) => factory,
        None => {
            if let Some(command) = sidecar_command(&config) {
                sidecar = Some(SidecarProcess::spawn(&command).await?);
            }
            Arc::new(SidecarClientFactory::new(sidecar_settings(&config)))
        },
    };

    let state = GatewayState::from_config(&config, store, factory)?;

    #[cfg(feature = "metrics")]
    let state = {
        let handle = wabridge_metrics::init_metrics(wabridge_metrics::MetricsRecorderConfig {
            enabled: config.metrics.enabled,
            global_labels: vec![("service".into(), "wabridge".into())],
        })?;
        state.with_metrics(handle)
    };

    let state = Arc::new(state);
    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.bind, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let lines = [
        format!("wabridge v{}", state.version),
        format!("listening: http://{addr}"),
        format!("database: {}", db_path.display()),
        format!("sidecar: {}", config.sidecar.url),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    state.registry.shutdown(config.sessions.stop_timeout()).await;
    if let Some(mut process) = sidecar
        && let Err(e) = process.stop().await
    {
        warn!(error = %e, "failed to stop sidecar");
    }
    pool.close().await;
    info!("gateway stopped");

    served.map_err(Into::into)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "sessions": state.gateway.registry.len(),
    }))
}
