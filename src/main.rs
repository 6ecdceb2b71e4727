// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use academy_identity::{
    accounts::Collaborators,
    api::router,
    clock::SystemClock,
    config::{Config, ConfigError, LogFormat, StoreBackend, DEFAULT_LOG_FILTER},
    error::IdentityError,
    mail::{HttpMailer, LogMailer, MailError, MailSender},
    state::AppState,
    storage::{
        CredentialStore, FileAvatarStore, MemoryCredentialStore, RedbCredentialStore,
        StoragePaths, StoreError,
    },
};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use tracing_subscriber::EnvFilter;

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("credential store: {0}")]
    Store(#[from] StoreError),

    #[error("mail: {0}")]
    Mail(#[from] MailError),

    #[error("application state: {0}")]
    State(#[from] IdentityError),

    #[error("invalid bind address {0}")]
    Address(String),

    #[error("server: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::error!("Failed to install rustls crypto provider");
        return ExitCode::FAILURE;
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Academy identity server failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match LogFormat::from_env() {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn run() -> Result<(), StartupError> {
    let config = Config::from_env()?;
    let paths = StoragePaths::new(&config.data_dir);

    let store: Arc<dyn CredentialStore> = match config.store_backend {
        StoreBackend::Redb => {
            tracing::info!(path = %paths.accounts_db().display(), "Opening account database");
            Arc::new(RedbCredentialStore::open(&paths.accounts_db())?)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory credential store; accounts are lost on restart");
            Arc::new(MemoryCredentialStore::new())
        }
    };

    let mailer: Arc<dyn MailSender> = match config.mail.clone() {
        Some(settings) => Arc::new(HttpMailer::new(
            settings,
            config.frontend_url.clone(),
            config.dependency_timeout,
        )?),
        None => {
            tracing::warn!("MAIL_API_KEY not set; verification and reset mails are only logged");
            Arc::new(LogMailer)
        }
    };

    let collaborators = Collaborators {
        store,
        mailer,
        avatars: Arc::new(FileAvatarStore::new(paths.avatars_dir())),
        clock: Arc::new(SystemClock),
    };
    let state = AppState::new(&config, collaborators)?;
    if state.google.is_none() {
        tracing::info!("GOOGLE_CLIENT_ID not set; Google sign-in disabled");
    }
    let app = router(state);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .map_err(|_| StartupError::Address(config.bind_address()))?;

    let handle = Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        if shutdown_signal().await {
            shutdown.graceful_shutdown(Some(SHUTDOWN_GRACE));
        }
    });

    match &config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;
            tracing::info!(%addr, "Academy identity listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            tracing::info!(%addr, "Academy identity listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves `true` once Ctrl+C arrives.
async fn shutdown_signal() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received, draining connections");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            false
        }
    }
}
