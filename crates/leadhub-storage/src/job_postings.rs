use chrono::{DateTime, Utc};
use leadhub_core::{JobBoard, JobPostingRecord};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::{now, Result, StorageError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPosting {
    pub id: i64,
    pub company_id: i64,
    pub title: String,
    pub location: Option<String>,
    pub url: String,
    pub source: JobBoard,
    pub description_snippet: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct JobPostingFilter {
    pub company_id: Option<i64>,
    pub source: Option<JobBoard>,
    pub title_contains: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub(crate) fn posting_from_row(row: &SqliteRow) -> Result<JobPosting> {
    let source: String = row.try_get("source")?;
    let source = source.parse::<JobBoard>().map_err(|err| StorageError::Decode {
        column: "source",
        message: err.to_string(),
    })?;

    Ok(JobPosting {
        id: row.try_get("id")?,
        company_id: row.try_get("company_id")?,
        title: row.try_get("title")?,
        location: row.try_get("location")?,
        url: row.try_get("url")?,
        source,
        description_snippet: row.try_get("description_snippet")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Stores a posting for `company_id`. Returns `false` when a posting with the same URL is
/// already stored, in which case nothing changes.
pub async fn insert_job_posting(
    pool: &SqlitePool,
    company_id: i64,
    posting: &JobPostingRecord,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO job_postings \
            (company_id, title, location, url, source, description_snippet, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(url) DO NOTHING",
    )
    .bind(company_id)
    .bind(&posting.title)
    .bind(&posting.location)
    .bind(posting.url.trim())
    .bind(posting.board.as_str())
    .bind(&posting.description_snippet)
    .bind(now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_job_postings(
    pool: &SqlitePool,
    filter: &JobPostingFilter,
) -> Result<Vec<JobPosting>> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM job_postings WHERE 1 = 1");
    if let Some(company_id) = filter.company_id {
        qb.push(" AND company_id = ").push_bind(company_id);
    }
    if let Some(source) = filter.source {
        qb.push(" AND source = ").push_bind(source.as_str());
    }
    if let Some(title) = &filter.title_contains {
        qb.push(" AND title LIKE ").push_bind(format!("%{title}%"));
    }
    qb.push(" ORDER BY id ASC");
    qb.push(" LIMIT ").push_bind(filter.limit.unwrap_or(-1));
    qb.push(" OFFSET ").push_bind(filter.offset.unwrap_or(0));

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(posting_from_row).collect()
}

pub async fn get_job_posting(pool: &SqlitePool, id: i64) -> Result<Option<JobPosting>> {
    let row = sqlx::query("SELECT * FROM job_postings WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(posting_from_row).transpose()
}

pub async fn delete_job_posting(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM job_postings WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Open postings at the lead's current company.
pub async fn job_postings_for_lead(pool: &SqlitePool, lead_id: i64) -> Result<Vec<JobPosting>> {
    let rows = sqlx::query(
        "SELECT jp.* FROM job_postings jp \
         JOIN leads l ON l.company_id = jp.company_id \
         WHERE l.id = ? \
         ORDER BY jp.id ASC",
    )
    .bind(lead_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(posting_from_row).collect()
}
