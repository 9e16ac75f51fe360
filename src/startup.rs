//! Application Startup
//!
//! Wires repositories, the auth verifier and the chat core together, and
//! runs the HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{middleware, Router};
use chrono::Utc;
use sqlx::PgPool;
use tokio::net::TcpListener;

use crate::application::services::{
    AuthVerifier, ChatHistoryService, HistoryService, JwtAuthVerifier,
};
use crate::config::Settings;
use crate::domain::{ChatRepository, UserRepository};
use crate::infrastructure::database;
use crate::infrastructure::repositories::{PgChatRepository, PgUserRepository};
use crate::presentation::http::{create_router, handlers::health};
use crate::presentation::middleware::{
    create_cors_layer, create_trace_layer, track_metrics, RateLimitConfig, RateLimiter,
};
use crate::presentation::websocket::{ChatGateway, StateManager};

/// How often idle rate limit windows are dropped
const RATE_LIMIT_PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub chat_repo: Arc<dyn ChatRepository>,
    pub auth: Arc<dyn AuthVerifier>,
    pub chat: Arc<StateManager>,
    pub gateway: Arc<ChatGateway>,
    pub history: Arc<dyn HistoryService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Build the chat core and services over the given repositories.
    pub fn new(
        db: PgPool,
        chat_repo: Arc<dyn ChatRepository>,
        users: Arc<dyn UserRepository>,
        settings: Settings,
    ) -> Self {
        let auth: Arc<dyn AuthVerifier> = Arc::new(JwtAuthVerifier::new(users, &settings.jwt));
        let chat = Arc::new(StateManager::new(
            chat_repo.clone(),
            settings.websocket.room_queue_capacity,
        ));
        let gateway = Arc::new(ChatGateway::new(
            chat.clone(),
            chat_repo.clone(),
            auth.clone(),
            settings.websocket.clone(),
        ));
        let history = Arc::new(ChatHistoryService::new(chat_repo.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::from(&settings.rate_limit)));

        Self {
            db,
            chat_repo,
            auth,
            chat,
            gateway,
            history,
            rate_limiter,
            settings: Arc::new(settings),
        }
    }
}

/// Router with every HTTP layer applied
pub fn build_router(state: AppState) -> Router {
    let cors = create_cors_layer(&state.settings.cors);
    create_router(state)
        .layer(middleware::from_fn(track_metrics))
        .layer(create_trace_layer())
        .layer(cors)
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    state: AppState,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        health::init_server_start();

        let db = database::create_pool(&settings.database)
            .await
            .context("failed to create database pool")?;
        tracing::info!("Database connection pool created");

        if settings.database.run_migrations {
            database::run_migrations(&db)
                .await
                .context("failed to run migrations")?;
            tracing::info!("Database migrations applied");
        }

        let chat_repo: Arc<dyn ChatRepository> = Arc::new(PgChatRepository::new(db.clone()));
        let users: Arc<dyn UserRepository> = Arc::new(PgUserRepository::new(db.clone()));
        let addr = settings.server_addr();

        let state = AppState::new(db, chat_repo, users, settings);

        let restored = state
            .gateway
            .reconcile()
            .await
            .context("failed to reconcile chat rooms")?;
        tracing::info!(rooms = restored, "Chat gateway ready");

        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            router: build_router(state.clone()),
            state,
        })
    }

    /// Run the server until Ctrl-C
    pub async fn run_until_stopped(self) -> Result<()> {
        let limiter = self.state.rate_limiter.clone();
        let purge = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RATE_LIMIT_PURGE_INTERVAL);
            loop {
                ticker.tick().await;
                limiter.purge_idle(Utc::now().timestamp_millis());
            }
        });

        let gateway = self.state.gateway.clone();
        let shutdown = async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
            gateway.shutdown();
        };

        let result = axum::serve(
            self.listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        purge.abort();
        result?;
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
