//! Parley binary - composition root.
//!
//! 1. Parse CLI args and load configuration from TOML
//! 2. Open the SQLite database under the data directory
//! 3. Build the window scheduler, batch processor and inbound pipeline
//! 4. Start the midnight date refresh for the assistant instructions
//! 5. Serve the axum API until Ctrl-C, then shut the scheduler down and wait
//!    for in-flight flushes

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use parley_api::auth::resolve_token;
use parley_api::{start_server, AppState};
use parley_chat::date_stamp::fixed_offset;
use parley_chat::{
    AdminHandler, Assistant, BatchProcessor, DateStamper, EchoAssistant, InboundPipeline,
    LogOutbound, Notifier, Outbound, UnavailableTranscriber,
};
use parley_core::config::ParleyConfig;
use parley_queue::{SchedulerConfig, WindowScheduler};
use parley_storage::{Database, MessageRepository, SettingsRepository, UserRepository};

use crate::cli::{expand_home, CliArgs};

/// How long in-flight flushes get to finish after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_POLL: Duration = Duration::from_millis(100);

async fn shutdown_signal(scheduler: WindowScheduler) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }
    tracing::info!("Shutdown requested");
    scheduler.shutdown();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing starts so its log level can apply.
    let config_file = args.resolve_config_path();
    let loaded = ParleyConfig::load(&config_file);
    let mut config = loaded.as_ref().cloned().unwrap_or_default();

    config.general.log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    match &loaded {
        Ok(_) => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Err(e) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config, using defaults"
        ),
    }

    config.api.port = args.resolve_port(config.api.port);
    config.general.data_dir = args.resolve_data_dir(&config.general.data_dir);
    config.queue.window_ms = args.resolve_window_ms(config.queue.window_ms);

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("parley.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    config.api.api_token = resolve_token(&config.api.api_token, &data_dir.join("api_token"));

    let users = Arc::new(UserRepository::new(Arc::clone(&db)));
    let messages = Arc::new(MessageRepository::new(Arc::clone(&db)));
    let settings = Arc::new(SettingsRepository::new(db));

    // Collaborators.
    let outbound: Arc<dyn Outbound> = Arc::new(LogOutbound);
    let notifier = Arc::new(Notifier::new(
        Arc::clone(&outbound),
        &config.alerts.support_recipients,
        &config.alerts.attention_agents,
    ));
    tracing::info!(
        support = config.alerts.support_recipients.len(),
        agents = notifier.agents().len(),
        "Alert recipients configured"
    );

    let assistant: Arc<dyn Assistant> = Arc::new(EchoAssistant::new());
    if !config.assistant.instructions.is_empty() {
        assistant
            .update_instructions(&config.assistant.instructions)
            .await?;
    }

    let stamper = if config.assistant.date_refresh {
        let minutes = config.assistant.utc_offset_minutes;
        let Some(offset) = fixed_offset(minutes) else {
            tracing::error!(utc_offset_minutes = minutes, "Invalid assistant UTC offset");
            return Err(format!("invalid assistant.utc_offset_minutes: {}", minutes).into());
        };
        let stamper = Arc::new(DateStamper::new(Arc::clone(&assistant), offset));
        if let Err(e) = stamper.refresh_once().await {
            tracing::error!(error = %e, "Failed to date the assistant instructions");
        }
        let runner = Arc::clone(&stamper);
        tokio::spawn(async move { runner.run().await });
        Some(stamper)
    } else {
        None
    };

    let processor = Arc::new(BatchProcessor::new(
        Arc::clone(&users),
        messages,
        assistant,
        Arc::clone(&outbound),
        Arc::clone(&notifier),
        config.assistant.requires_action_reply.clone(),
    ));
    let admin = AdminHandler::new(Arc::clone(&settings), Arc::clone(&users), Arc::clone(&outbound));

    let scheduler_config = SchedulerConfig::from(&config.queue);
    tracing::info!(
        window_ms = config.queue.window_ms,
        policy = ?scheduler_config.policy,
        "Window scheduler ready"
    );
    let scheduler = WindowScheduler::new(scheduler_config);

    let pipeline = InboundPipeline::new(
        scheduler.clone(),
        processor,
        admin,
        settings,
        users,
        Arc::new(UnavailableTranscriber),
        notifier,
    );

    let state = AppState::new(config, pipeline, outbound);
    start_server(state, shutdown_signal(scheduler.clone())).await?;

    if let Some(stamper) = stamper {
        stamper.shutdown();
    }
    if scheduler.in_flight() > 0 {
        tracing::info!(in_flight = scheduler.in_flight(), "Waiting for in-flight flushes");
        if !scheduler.wait_idle(DRAIN_TIMEOUT, DRAIN_POLL).await {
            tracing::warn!("Stopping with flushes still in flight");
        }
    }

    tracing::info!("Parley stopped");
    Ok(())
}
