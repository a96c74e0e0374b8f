use crate::api::middleware::RetryPolicy;
use crate::api::{ApiEndpoints, AssetApi, SessionOptions};
use crate::auth::{TokenEndpoint, TokenRefresher};
use crate::cli::{Args, Command};
use crate::config::Config;
use crate::secrets::{FileSecretStore, SecretStore};
use crate::sync::Pipeline;
use crate::sync::normalize::validate_schema;
use crate::trigger::DagTrigger;
use crate::utils::fmt_duration;
use anyhow::Context;
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    pipeline: Pipeline,
}

impl App {
    /// Connect to the database, run migrations, and wire the API client,
    /// token refresher and trigger together.
    pub async fn new(config: Config, args: &Args) -> Result<Self, anyhow::Error> {
        validate_schema().context("Column mapping is invalid")?;

        let connect_options = PgConnectOptions::from_str(&config.database_url)
            .context("Failed to parse database URL")?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        let acquire_timeout = Duration::from_secs(4);
        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(4)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect_with(connect_options)
            .await
            .context("Failed to create database pool")?;

        info!(
            max_connections = 4,
            acquire_timeout = fmt_duration(acquire_timeout),
            "database pool established"
        );

        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed successfully");

        let secrets: Arc<dyn SecretStore> = Arc::new(FileSecretStore::new(&config.secrets_file));
        let options = SessionOptions {
            verify_tls: !args.local,
            timeout: config.request_timeout,
            retry: RetryPolicy::default(),
        };

        let identity_client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!options.verify_tls)
            .timeout(options.timeout)
            .build()
            .context("Failed to build identity client")?;
        let refresher = TokenRefresher::load(
            TokenEndpoint::new(identity_client, Arc::clone(&secrets)),
            Arc::clone(&secrets),
            config.token_stamp_file.clone(),
            config.token_settle_delay,
        )
        .await
        .context("Failed to load API credential")?;

        let endpoints = ApiEndpoints::from_secrets(secrets.as_ref()).await?;
        let api = Arc::new(AssetApi::new(endpoints, options, Arc::new(refresher))?);

        let trigger = if args.test {
            info!("Test mode: downstream DAGs will not be triggered");
            DagTrigger::dry_run()
        } else {
            DagTrigger::from_secrets(secrets.as_ref(), &options).await?
        };

        let pipeline = Pipeline::new(db_pool, api, trigger, config.export_file.clone());
        Ok(App { config, pipeline })
    }

    /// Run `command` to completion, or until a shutdown signal plus the grace
    /// period elapses.
    pub async fn run(self, command: Command) -> ExitCode {
        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                wait_for_shutdown_signal().await;
                warn!("Shutdown signal received, finishing in-flight pages");
                cancel.cancel();
            }
        });

        let work = async {
            match &command {
                Command::Sync => self.pipeline.run(&cancel).await.map(|summary| {
                    if summary.skipped_downstream() {
                        info!("Run finished with no changes");
                    }
                }),
                Command::History { ids } => self
                    .pipeline
                    .update_history(ids, ids, &cancel)
                    .await
                    .map(|counts| {
                        info!(
                            deleted = counts.deleted,
                            inserted = counts.inserted,
                            "History refreshed"
                        );
                    }),
            }
        };

        let grace = self.config.shutdown_timeout;
        let result = tokio::select! {
            result = work => result,
            _ = async {
                cancel.cancelled().await;
                tokio::time::sleep(grace).await;
            } => Err(anyhow::anyhow!(
                "run did not stop within {} of shutdown",
                fmt_duration(grace)
            )),
        };

        match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = ?e, command = ?command, "Run failed");
                ExitCode::FAILURE
            }
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
                return;
            }
            Err(e) => warn!(error = ?e, "Failed to register SIGTERM handler"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = ?e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
