//! API Server

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::config::ApiConfig;
use crate::mirror::BalanceMirror;
use crate::service::MinesService;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

pub struct ApiServer {
    config: ApiConfig,
    service: Arc<MinesService>,
    mirror: BalanceMirror,
    mirror_task: tokio::task::JoinHandle<()>,
    reconcile_interval: Option<Duration>,
}

impl ApiServer {
    /// Must be called inside a tokio runtime; starts following store
    /// notifications for the balance mirror.
    pub fn new(config: ApiConfig, service: Arc<MinesService>) -> Self {
        let mirror = BalanceMirror::new();
        let mirror_task = mirror.follow(service.subscribe());
        Self {
            config,
            service,
            mirror,
            mirror_task,
            reconcile_interval: None,
        }
    }

    /// Sweep the pending credit ledger on a fixed interval while serving
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Start the API server
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.create_app();
        let addr = self.get_socket_addr()?;

        info!("Starting Mines API server on http://{}", addr);
        self.log_server_info();

        let sweeper = self
            .reconcile_interval
            .map(|every| tokio::spawn(reconcile_loop(self.service.clone(), every)));

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        if let Some(handle) = sweeper {
            handle.abort();
        }
        self.mirror_task.abort();
        let pending = self.service.pending_credits().len();
        if pending > 0 {
            warn!(pending, "shutting down with unreconciled credits");
        }
        info!("API server stopped gracefully");
        Ok(())
    }

    /// Create the application with its middleware stack
    pub fn create_app(&self) -> axum::Router {
        let state = Arc::new(AppState {
            service: self.service.clone(),
            mirror: self.mirror.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        });

        create_router(state)
            // Request ID middleware (first for tracing)
            .layer(axum::middleware::from_fn(request_id_middleware))
            // CORS layer (before timeout to handle preflight)
            .layer(create_cors_layer(self.config.allowed_origins.clone()))
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    fn get_socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        )))
    }

    fn log_server_info(&self) {
        let game = self.service.game_config();
        info!("   Board: {}x{}, house edge {}", game.board_size, game.board_size, game.house_edge);
        info!("   CORS: {:?}", self.config.allowed_origins);
        info!("   Request timeout: {}s", self.config.request_timeout_secs);
        if let Some(every) = self.reconcile_interval {
            info!("   Credit reconciliation every {:?}", every);
        }
        if self.config.tokens.is_empty() {
            warn!("No API tokens configured; every round request will be rejected");
        }
    }
}

async fn reconcile_loop(service: Arc<MinesService>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if service.pending_credits().is_empty() {
            continue;
        }
        let report = service.reconcile().await;
        info!(
            resolved = report.resolved,
            still_pending = report.still_pending,
            "credit reconciliation sweep"
        );
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
