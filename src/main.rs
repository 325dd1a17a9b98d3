use anyhow::Context;
use liquidity_rewards::engine::{Clock, Role, SystemClock};
use liquidity_rewards::orchestration::{parse_seed_csv, Seeder};
use liquidity_rewards::{api, config::Config, db::init_db, Repository, RewardsService};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;

    let pool = init_db(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    let repo = Repository::new(pool);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let service = Arc::new(
        RewardsService::open(
            repo,
            clock,
            config.reward_token.clone(),
            config.intermediary.clone(),
            config.supervisor.clone(),
        )
        .await
        .context("Failed to open rewards service")?,
    );

    if let Some(path) = &config.seed_file {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read seed file {}", path))?;
        let rows = parse_seed_csv(&bytes)?;
        // Seeding goes through set_rewards, which is distributor-only.
        let seeder = &config.supervisor;
        if service.grant_role(seeder, seeder, Role::Distributor).await? {
            tracing::info!(account = %seeder, "Granted distributor role for seeding");
        }
        let report = Seeder::new(
            service.as_ref(),
            path.as_str(),
            config.supervisor.clone(),
            config.seed_batch_size,
            config.seed_max_elapsed,
        )
        .run(rows)
        .await?;
        tracing::info!(
            file = %path,
            chunks = report.chunks_total,
            submitted = report.chunks_submitted,
            entries = report.entries_submitted,
            "Seed file processed"
        );
    }

    let app = api::create_router(api::AppState::new(service));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
