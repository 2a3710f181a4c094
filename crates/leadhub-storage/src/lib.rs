//! SQLite persistence for leads, companies, job postings and the links between them.

pub mod companies;
mod error;
pub mod job_postings;
pub mod lead_job_postings;
pub mod leads;

use std::str::FromStr;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

pub use companies::{Company, CompanyFilter, CompanyUpsert, CompanyUpsertOutcome};
pub use error::{Result, StorageError};
pub use job_postings::{JobPosting, JobPostingFilter};
pub use lead_job_postings::{JobPostingLink, LinkedJobPosting};
pub use leads::{Lead, LeadFilter, LeadSort, LeadUpsert, LeadUpsertOutcome};

/// Whether an upsert inserted a new row or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Created,
    Updated,
}

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Handle on the lead database. Cloning shares the underlying pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if missing) the database at `database_url`, e.g. `sqlite://leads.db`.
    ///
    /// # Errors
    /// Returns [`StorageError::Connect`] for an unparseable url and [`StorageError::Sqlx`]
    /// when the file cannot be opened.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|source| StorageError::Connect {
                url: database_url.to_string(),
                source,
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        info!(url = %database_url, "database opened");
        Ok(Self { pool })
    }

    /// A private, already migrated in-memory database. One connection that never
    /// expires, since the data lives only as long as that connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Applies pending embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        info!("running database migrations");
        MIGRATOR.run(&self.pool).await?;
        info!("database migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
