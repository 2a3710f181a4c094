use chrono::{DateTime, Utc};
use leadhub_core::normalize::clean_text;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::job_postings::{posting_from_row, JobPosting};
use crate::leads::{lead_from_row, Lead};
use crate::{now, Result, StorageError, UpsertAction};

/// A lead's interest in a posting, with where that stands (`applied`, `referred`, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPostingLink {
    pub lead_id: i64,
    pub job_posting_id: i64,
    pub application_status: Option<String>,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkedJobPosting {
    #[serde(flatten)]
    pub posting: JobPosting,
    pub application_status: Option<String>,
    pub linked_at: DateTime<Utc>,
}

/// Links a lead to a posting. Linking again keeps the original `linked_at` and only
/// replaces the application status when one is given.
///
/// # Errors
/// Returns [`StorageError::NotFound`] when either the lead or the posting does not exist.
pub async fn link_lead_to_job_posting(
    pool: &SqlitePool,
    lead_id: i64,
    job_posting_id: i64,
    application_status: Option<&str>,
) -> Result<UpsertAction> {
    let status = clean_text(application_status);
    let mut tx = pool.begin().await?;

    let leads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads WHERE id = ?")
        .bind(lead_id)
        .fetch_one(&mut *tx)
        .await?;
    if leads == 0 {
        return Err(StorageError::NotFound {
            entity: "lead",
            id: lead_id,
        });
    }
    let postings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_postings WHERE id = ?")
        .bind(job_posting_id)
        .fetch_one(&mut *tx)
        .await?;
    if postings == 0 {
        return Err(StorageError::NotFound {
            entity: "job posting",
            id: job_posting_id,
        });
    }

    let updated = sqlx::query(
        "UPDATE lead_job_postings SET application_status = COALESCE(?, application_status) \
         WHERE lead_id = ? AND job_posting_id = ?",
    )
    .bind(&status)
    .bind(lead_id)
    .bind(job_posting_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let action = if updated > 0 {
        UpsertAction::Updated
    } else {
        sqlx::query(
            "INSERT INTO lead_job_postings \
                (lead_id, job_posting_id, application_status, linked_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(lead_id)
        .bind(job_posting_id)
        .bind(&status)
        .bind(now())
        .execute(&mut *tx)
        .await?;
        UpsertAction::Created
    };

    tx.commit().await?;
    debug!(lead_id, job_posting_id, ?action, "lead linked to posting");
    Ok(action)
}

/// Returns `false` when the two were not linked.
pub async fn unlink_lead_from_job_posting(
    pool: &SqlitePool,
    lead_id: i64,
    job_posting_id: i64,
) -> Result<bool> {
    let result =
        sqlx::query("DELETE FROM lead_job_postings WHERE lead_id = ? AND job_posting_id = ?")
            .bind(lead_id)
            .bind(job_posting_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_job_posting_link(
    pool: &SqlitePool,
    lead_id: i64,
    job_posting_id: i64,
) -> Result<Option<JobPostingLink>> {
    let row =
        sqlx::query("SELECT * FROM lead_job_postings WHERE lead_id = ? AND job_posting_id = ?")
            .bind(lead_id)
            .bind(job_posting_id)
            .fetch_optional(pool)
            .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(JobPostingLink {
        lead_id: row.try_get("lead_id")?,
        job_posting_id: row.try_get("job_posting_id")?,
        application_status: row.try_get("application_status")?,
        linked_at: row.try_get("linked_at")?,
    }))
}

/// Postings linked to the lead, oldest link first. Unknown leads have none.
pub async fn linked_job_postings(
    pool: &SqlitePool,
    lead_id: i64,
) -> Result<Vec<LinkedJobPosting>> {
    let rows = sqlx::query(
        "SELECT jp.*, ljp.application_status, ljp.linked_at FROM lead_job_postings ljp \
         JOIN job_postings jp ON jp.id = ljp.job_posting_id \
         WHERE ljp.lead_id = ? \
         ORDER BY ljp.linked_at ASC, jp.id ASC",
    )
    .bind(lead_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(LinkedJobPosting {
                posting: posting_from_row(row)?,
                application_status: row.try_get("application_status")?,
                linked_at: row.try_get("linked_at")?,
            })
        })
        .collect()
}

/// Leads linked to the posting, by lead id.
pub async fn leads_linked_to_job_posting(
    pool: &SqlitePool,
    job_posting_id: i64,
) -> Result<Vec<Lead>> {
    let rows = sqlx::query(
        "SELECT l.* FROM lead_job_postings ljp \
         JOIN leads l ON l.id = ljp.lead_id \
         WHERE ljp.job_posting_id = ? \
         ORDER BY l.id ASC",
    )
    .bind(job_posting_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(lead_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companies::{upsert_company, CompanyUpsert};
    use crate::job_postings::{delete_job_posting, insert_job_posting, list_job_postings};
    use crate::leads::{delete_lead, upsert_lead, LeadUpsert};
    use crate::{Database, JobPostingFilter};
    use leadhub_core::{JobBoard, JobPostingRecord};

    struct Fixture {
        db: Database,
        jane: i64,
        john: i64,
        pm: i64,
        po: i64,
    }

    fn lead(name: &str, slug: &str) -> LeadUpsert {
        LeadUpsert {
            name: name.into(),
            profile_url: format!("https://www.linkedin.com/in/{slug}"),
            current_role: Some("Product Manager".into()),
            company: None,
            alma_mater_match: None,
            location: Some("New York".into()),
            source_of_lead: "Alumni Search: Questrom".into(),
            score: 13.0,
        }
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let jane = upsert_lead(db.pool(), &lead("Jane Doe", "jane")).await.unwrap().lead_id;
        let john = upsert_lead(db.pool(), &lead("John Roe", "john")).await.unwrap().lead_id;
        let acme = upsert_company(db.pool(), &CompanyUpsert::named("Acme")).await.unwrap();
        for (url, title) in [
            ("https://boards.greenhouse.io/acme/jobs/1", "Product Manager"),
            ("https://boards.greenhouse.io/acme/jobs/2", "Product Owner"),
        ] {
            let record = JobPostingRecord {
                board: JobBoard::Greenhouse,
                title: title.into(),
                location: None,
                url: url.into(),
                description_snippet: None,
            };
            insert_job_posting(db.pool(), acme.company_id, &record).await.unwrap();
        }
        let postings = list_job_postings(db.pool(), &JobPostingFilter::default()).await.unwrap();
        Fixture {
            db,
            jane,
            john,
            pm: postings[0].id,
            po: postings[1].id,
        }
    }

    #[tokio::test]
    async fn relinking_keeps_one_row_and_the_last_given_status() {
        let f = fixture().await;
        let pool = f.db.pool();

        let first = link_lead_to_job_posting(pool, f.jane, f.pm, Some("referred")).await.unwrap();
        let again = link_lead_to_job_posting(pool, f.jane, f.pm, None).await.unwrap();
        assert_eq!(first, UpsertAction::Created);
        assert_eq!(again, UpsertAction::Updated);
        let link = get_job_posting_link(pool, f.jane, f.pm).await.unwrap().unwrap();
        assert_eq!(link.application_status.as_deref(), Some("referred"));

        link_lead_to_job_posting(pool, f.jane, f.pm, Some(" interviewing ")).await.unwrap();
        let link = get_job_posting_link(pool, f.jane, f.pm).await.unwrap().unwrap();
        assert_eq!(link.application_status.as_deref(), Some("interviewing"));

        let linked = linked_job_postings(pool, f.jane).await.unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].posting.title, "Product Manager");
    }

    #[tokio::test]
    async fn links_read_from_both_sides() {
        let f = fixture().await;
        let pool = f.db.pool();
        link_lead_to_job_posting(pool, f.jane, f.pm, Some("applied")).await.unwrap();
        link_lead_to_job_posting(pool, f.jane, f.po, None).await.unwrap();
        link_lead_to_job_posting(pool, f.john, f.pm, None).await.unwrap();

        let janes = linked_job_postings(pool, f.jane).await.unwrap();
        let ids = janes.iter().map(|l| l.posting.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![f.pm, f.po]);
        assert_eq!(janes[0].application_status.as_deref(), Some("applied"));
        assert_eq!(janes[1].application_status, None);

        let applicants = leads_linked_to_job_posting(pool, f.pm).await.unwrap();
        let names = applicants.iter().map(|l| l.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Jane Doe", "John Roe"]);
        assert!(linked_job_postings(pool, 999).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unlinking_and_deletes_remove_links() {
        let f = fixture().await;
        let pool = f.db.pool();
        link_lead_to_job_posting(pool, f.jane, f.pm, None).await.unwrap();
        link_lead_to_job_posting(pool, f.jane, f.po, None).await.unwrap();
        link_lead_to_job_posting(pool, f.john, f.po, None).await.unwrap();

        assert!(unlink_lead_from_job_posting(pool, f.jane, f.pm).await.unwrap());
        assert!(!unlink_lead_from_job_posting(pool, f.jane, f.pm).await.unwrap());

        delete_job_posting(pool, f.po).await.unwrap();
        assert!(linked_job_postings(pool, f.jane).await.unwrap().is_empty());

        link_lead_to_job_posting(pool, f.john, f.pm, None).await.unwrap();
        delete_lead(pool, f.john).await.unwrap();
        assert!(leads_linked_to_job_posting(pool, f.pm).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn linking_unknown_rows_is_not_found() {
        let f = fixture().await;
        let pool = f.db.pool();

        let err = link_lead_to_job_posting(pool, 999, f.pm, None).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { entity: "lead", id: 999 }));
        let err = link_lead_to_job_posting(pool, f.jane, 999, None).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { entity: "job posting", id: 999 }));
        assert!(get_job_posting_link(pool, f.jane, f.pm).await.unwrap().is_none());
    }
}
