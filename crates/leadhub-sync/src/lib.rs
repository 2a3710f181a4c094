//! Acquisition runs: configuration, lead processing and orchestration.

mod config;
mod orchestrator;
mod processor;

use std::sync::Arc;

use anyhow::{Context, Result};
use leadhub_adapters::{
    CompanyInfoScraper, JobBoardRegistry, ProfileSearchScraper, SearchApi, SerpApiClient,
};
use leadhub_fetch::{HttpFetcher, JsonTransport};
use leadhub_storage::Database;

pub use config::{
    default_queries, BoardAssignment, ConfigError, Criteria, FileConfig, LeadHubConfig,
    PagingSettings, RetrySettings, ScoringWeights, DEFAULT_CONFIG_PATH, DEFAULT_DATABASE_URL,
};
pub use orchestrator::{
    BoardFailure, JobBoardSummary, Orchestrator, QueryFailure, RunError, RunState, RunSummary,
};
pub use processor::{
    CandidateLead, LeadProcessor, PreparedLeads, ProcessSummary, RecordFailure, Sighting, Stage,
};

/// Wires the live search API and job boards described by `config` around `db`.
pub fn orchestrator_from_config(config: &LeadHubConfig, db: Database) -> Result<Orchestrator> {
    let api_key = config.require_api_key()?;
    let transport: Arc<dyn JsonTransport> = Arc::new(
        HttpFetcher::new(config.http_client_config()).context("building http client")?,
    );
    let search: Arc<dyn SearchApi> = Arc::new(SerpApiClient::new(transport.clone(), api_key));
    let retry = config.retry.policy();

    let profiles = ProfileSearchScraper::new(search.clone(), retry.clone())
        .with_paging(config.paging.paging());
    let processor = LeadProcessor::new(
        config.criteria.clone(),
        config.scoring,
        CompanyInfoScraper::new(search, retry.clone()),
        db.clone(),
    );
    let boards = JobBoardRegistry::standard(transport, retry);

    Ok(Orchestrator::new(profiles, processor, db)
        .with_job_boards(boards, config.job_boards.clone()))
}

/// Opens and migrates the configured database, then runs the configured queries once.
pub async fn run_once(config: &LeadHubConfig) -> Result<RunSummary> {
    let db = Database::connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    db.migrate().await.context("migrating database")?;

    let orchestrator = orchestrator_from_config(config, db)?;
    let summary = orchestrator.run(&config.search_queries()).await?;
    Ok(summary)
}

pub async fn run_once_from_env() -> Result<RunSummary> {
    let config = LeadHubConfig::from_env().context("loading configuration")?;
    run_once(&config).await
}
