#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod api;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod storage;
pub mod telemetry;

use crate::api::ServiceContainer;
use crate::config::Config;
use crate::services::auth_service::AuthService;
use crate::services::gateway::GatewayService;
use crate::services::health_service::HealthService;
use crate::services::message_service::MessageService;
use crate::services::presence::PresenceRegistry;
use crate::services::rate_limit_service::RateLimitService;
use crate::services::receipt_service::ReceiptService;
use crate::storage::memory::MemoryStore;
use crate::storage::message_repo::MessageRepository;
use crate::storage::user_repo::UserRepository;
use crate::storage::{DbPool, MessageStore, UserStore};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug)]
pub struct App {
    pub services: ServiceContainer,
    pub health_service: HealthService,
}

/// Wires stores, presence and services together. Without a database the
/// server runs on the in-memory store.
#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    pool: Option<DbPool>,
}

impl AppBuilder {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config, pool: None }
    }

    #[must_use]
    pub fn with_database(mut self, pool: DbPool) -> Self {
        self.pool = Some(pool);
        self
    }

    #[must_use]
    pub fn build(self) -> App {
        let (messages, users): (Arc<dyn MessageStore>, Arc<dyn UserStore>) = match self.pool {
            Some(pool) => (Arc::new(MessageRepository::new(pool.clone())), Arc::new(UserRepository::new(pool))),
            None => {
                let store = Arc::new(MemoryStore::new());
                (Arc::clone(&store) as Arc<dyn MessageStore>, store as Arc<dyn UserStore>)
            }
        };

        let presence = PresenceRegistry::new();

        let auth_service = AuthService::new(self.config.auth.clone(), Arc::clone(&users));
        let message_service = MessageService::new(
            Arc::clone(&messages),
            Arc::clone(&users),
            presence.clone(),
            self.config.messaging.clone(),
        );
        let receipt_service = ReceiptService::new(Arc::clone(&messages), users, presence.clone());
        let gateway_service = GatewayService::new(presence.clone(), self.config.websocket.clone());
        let rate_limit_service = RateLimitService::new(self.config.server.trusted_proxies.clone());
        let health_service = HealthService::new(messages, self.config.health.clone());

        App {
            services: ServiceContainer {
                presence,
                auth_service,
                message_service,
                receipt_service,
                gateway_service,
                rate_limit_service,
            },
            health_service,
        }
    }
}

/// Applies pending schema migrations.
///
/// # Errors
/// Returns an error if a migration fails to apply.
pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    sqlx::migrate!().run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Flips `shutdown_tx` to `true` on SIGINT or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }

        tracing::info!("Shutdown signal received, starting graceful shutdown");
        let _ = shutdown_tx.send(true);
    });
}

/// Routes panics through tracing so they reach structured logs and OTLP.
pub fn setup_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info.location().map(|l| format!("{}:{}", l.file(), l.line())).unwrap_or_default();
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());

        tracing::error!(panic.location = %location, panic.payload = %payload, "Panic occurred");
    }));
}
