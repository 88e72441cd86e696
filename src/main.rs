use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use campy::ai::llm::{ChatCompletion, LlmClient};
use campy::bot::{self, cron::CronLoop, AppState};
use campy::config::AppConfig;
use campy::db::Database;
use campy::messenger::GraphClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting CAMPY follow-up engine...");

    // Load config
    let config = AppConfig::from_env()?;
    tracing::debug!("Config: {:?}", config);

    // Initialize database
    let db = Database::connect(&config.database_url).await?;
    db.run_migrations().await?;
    tracing::info!("Database connected and migrations applied.");

    // Outbound clients
    let messenger = Arc::new(GraphClient::new(&config)?);
    let llm: Option<Arc<dyn ChatCompletion>> = match LlmClient::from_config(&config)? {
        Some(client) => {
            tracing::info!("LLM composition enabled. Model: {}", config.llm_model);
            Some(Arc::new(client))
        }
        None => {
            tracing::info!("LLM_API_KEY not set; follow-ups use static templates.");
            None
        }
    };

    let state = Arc::new(AppState::new(config.clone(), Arc::new(db), messenger, llm));

    if let Some(secs) = config.cron_interval_secs {
        tracing::info!("Processing follow-ups in-process every {}s", secs);
        tokio::spawn(CronLoop::new(state.processor.clone(), secs).run());
    }

    let app = bot::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
