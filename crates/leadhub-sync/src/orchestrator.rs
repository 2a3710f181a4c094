use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use leadhub_adapters::{JobBoardRegistry, ProfileSearchScraper};
use leadhub_core::normalize::company_key;
use leadhub_core::{AcquisitionError, ErrorKind, JobBoard, JobPostingRecord, SearchQuery};
use leadhub_storage::{companies, job_postings, CompanyUpsert, Database};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{board_for, BoardAssignment};
use crate::processor::{LeadProcessor, ProcessSummary, RecordFailure, Sighting, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Acquiring,
    Enriching,
    Persisting,
    Done,
    Failed,
}

/// A search query that produced nothing because its call failed, retries included.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryFailure {
    pub query: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardFailure {
    pub company: String,
    pub board: JobBoard,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobBoardSummary {
    pub boards_queried: usize,
    pub postings_found: usize,
    pub postings_inserted: usize,
    pub failures: Vec<BoardFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: RunState,
    pub queries: usize,
    pub query_failures: Vec<QueryFailure>,
    pub leads: ProcessSummary,
    pub job_boards: JobBoardSummary,
}

impl RunSummary {
    fn start(queries: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            state: RunState::Idle,
            queries,
            query_failures: Vec::new(),
            leads: ProcessSummary::default(),
            job_boards: JobBoardSummary::default(),
        }
    }

    fn finish(&mut self, state: RunState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    pub fn persisted_lead_ids(&self) -> &[i64] {
        &self.leads.persisted_lead_ids
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    /// An unclassified error stopped the run. The summary covers the work done before it.
    #[error("run {} failed: {source}", .summary.run_id)]
    Fatal {
        summary: Box<RunSummary>,
        #[source]
        source: AcquisitionError,
    },
}

impl RunError {
    pub fn summary(&self) -> &RunSummary {
        match self {
            RunError::Fatal { summary, .. } => summary,
        }
    }
}

/// Drives one acquisition run: search, prepare, job boards, persist.
pub struct Orchestrator {
    profiles: ProfileSearchScraper,
    processor: LeadProcessor,
    boards: JobBoardRegistry,
    assignments: Vec<BoardAssignment>,
    db: Database,
}

impl Orchestrator {
    pub fn new(profiles: ProfileSearchScraper, processor: LeadProcessor, db: Database) -> Self {
        Self {
            profiles,
            processor,
            boards: JobBoardRegistry::new(),
            assignments: Vec::new(),
            db,
        }
    }

    pub fn with_job_boards(
        mut self,
        boards: JobBoardRegistry,
        assignments: Vec<BoardAssignment>,
    ) -> Self {
        self.boards = boards;
        self.assignments = assignments;
        self
    }

    /// Runs every query to completion. Failed queries and records are collected in the
    /// summary; only an unclassified error ends the run early.
    pub async fn run(&self, queries: &[SearchQuery]) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::start(queries.len());
        let span = info_span!("run", run_id = %summary.run_id, queries = queries.len());

        let outcome = self.drive(queries, &mut summary).instrument(span).await;
        match outcome {
            Ok(()) => {
                summary.finish(RunState::Done);
                info!(
                    run_id = %summary.run_id,
                    persisted = summary.leads.persisted,
                    query_failures = summary.query_failures.len(),
                    record_failures = summary.leads.record_failures.len(),
                    postings_inserted = summary.job_boards.postings_inserted,
                    "run finished"
                );
                Ok(summary)
            }
            Err(source) => {
                let stage = summary.state;
                summary.finish(RunState::Failed);
                error!(run_id = %summary.run_id, ?stage, error = %source, "run aborted");
                Err(RunError::Fatal {
                    summary: Box::new(summary),
                    source,
                })
            }
        }
    }

    async fn drive(
        &self,
        queries: &[SearchQuery],
        summary: &mut RunSummary,
    ) -> Result<(), AcquisitionError> {
        summary.state = RunState::Acquiring;
        let sightings = self.acquire(queries, summary).await?;

        summary.state = RunState::Enriching;
        let prepared = self.processor.prepare(sightings).await?;
        summary.leads = prepared.summary.clone();
        let company_names = prepared
            .leads
            .iter()
            .filter_map(|lead| lead.company.clone())
            .collect::<Vec<_>>();
        let postings = self
            .collect_postings(&company_names, &mut summary.job_boards)
            .await?;

        summary.state = RunState::Persisting;
        summary.leads = self.processor.persist(prepared).await;
        self.store_postings(postings, summary).await;
        Ok(())
    }

    async fn acquire(
        &self,
        queries: &[SearchQuery],
        summary: &mut RunSummary,
    ) -> Result<Vec<Sighting>, AcquisitionError> {
        let mut sightings = Vec::new();
        for query in queries {
            match self.profiles.search(query).await {
                Ok(records) => {
                    let source = query.lead_source();
                    sightings.extend(records.into_iter().map(|record| Sighting {
                        source: source.clone(),
                        record,
                    }));
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(query = %query, error = %err, "query failed");
                    summary.query_failures.push(QueryFailure {
                        query: query.to_string(),
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(sightings)
    }

    /// Open postings for every distinct company that has a configured board.
    async fn collect_postings(
        &self,
        companies: &[String],
        boards: &mut JobBoardSummary,
    ) -> Result<Vec<(String, Vec<JobPostingRecord>)>, AcquisitionError> {
        let mut seen = BTreeSet::new();
        let mut collected = Vec::new();

        for company in companies {
            if !seen.insert(company_key(company)) {
                continue;
            }
            let Some(assignment) = board_for(&self.assignments, company) else {
                continue;
            };
            boards.boards_queried += 1;
            let span = info_span!("job_board", company = %company, board = %assignment.board);
            match self
                .boards
                .list_postings(assignment.board, &assignment.token)
                .instrument(span)
                .await
            {
                Ok(postings) => {
                    boards.postings_found += postings.len();
                    if !postings.is_empty() {
                        collected.push((company.clone(), postings));
                    }
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(
                        company = %company,
                        board = %assignment.board,
                        error = %err,
                        "job board failed"
                    );
                    boards.failures.push(BoardFailure {
                        company: company.clone(),
                        board: assignment.board,
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(collected)
    }

    async fn store_postings(
        &self,
        postings: Vec<(String, Vec<JobPostingRecord>)>,
        summary: &mut RunSummary,
    ) {
        for (company, records) in postings {
            let company_id = match self.company_id(&company).await {
                Ok(id) => id,
                Err(err) => {
                    warn!(company = %company, error = %err, "cannot store postings");
                    summary.leads.record_failures.push(RecordFailure {
                        stage: Stage::Persist,
                        subject: company.clone(),
                        kind: None,
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            for record in &records {
                match job_postings::insert_job_posting(self.db.pool(), company_id, record).await {
                    Ok(true) => summary.job_boards.postings_inserted += 1,
                    Ok(false) => {}
                    Err(err) => {
                        warn!(url = %record.url, error = %err, "posting write failed");
                        summary.leads.record_failures.push(RecordFailure {
                            stage: Stage::Persist,
                            subject: record.url.clone(),
                            kind: None,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }
    }

    async fn company_id(&self, company: &str) -> leadhub_storage::Result<i64> {
        if let Some(existing) = companies::get_company_by_name(self.db.pool(), company).await? {
            return Ok(existing.id);
        }
        let outcome =
            companies::upsert_company(self.db.pool(), &CompanyUpsert::named(company)).await?;
        Ok(outcome.company_id)
    }
}
