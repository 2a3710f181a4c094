use chrono::{DateTime, Utc};
use leadhub_core::normalize::{
    clean_text, normalize_company_name, normalize_profile_url, normalize_whitespace,
};
use leadhub_core::LeadStatus;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use crate::companies::{upsert_company_on, CompanyUpsert, CompanyUpsertOutcome};
use crate::{now, Result, StorageError, UpsertAction};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lead {
    pub id: i64,
    pub name: String,
    pub profile_url: String,
    pub current_role: Option<String>,
    pub company_id: Option<i64>,
    pub company_name: Option<String>,
    pub alma_mater_match: Option<String>,
    pub location: Option<String>,
    pub source_of_lead: String,
    pub score: f64,
    pub status: LeadStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything the pipeline knows about a lead after processing. Status and notes are
/// deliberately absent: they belong to the person working the leads.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadUpsert {
    pub name: String,
    pub profile_url: String,
    pub current_role: Option<String>,
    pub company: Option<CompanyUpsert>,
    pub alma_mater_match: Option<String>,
    pub location: Option<String>,
    pub source_of_lead: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeadUpsertOutcome {
    pub lead_id: i64,
    pub action: UpsertAction,
    pub company: Option<CompanyUpsertOutcome>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LeadSort {
    #[default]
    ScoreDesc,
    NewestFirst,
    NameAsc,
}

impl LeadSort {
    fn order_by(self) -> &'static str {
        match self {
            LeadSort::ScoreDesc => " ORDER BY score DESC, profile_url ASC",
            LeadSort::NewestFirst => " ORDER BY created_at DESC, id DESC",
            LeadSort::NameAsc => " ORDER BY name COLLATE NOCASE ASC, id ASC",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    pub name_contains: Option<String>,
    pub company_id: Option<i64>,
    pub min_score: Option<f64>,
    pub sort: LeadSort,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub(crate) fn lead_from_row(row: &SqliteRow) -> Result<Lead> {
    let status: String = row.try_get("status")?;
    let status = status.parse::<LeadStatus>().map_err(|err| StorageError::Decode {
        column: "status",
        message: err.to_string(),
    })?;

    Ok(Lead {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        profile_url: row.try_get("profile_url")?,
        current_role: row.try_get("current_role")?,
        company_id: row.try_get("company_id")?,
        company_name: row.try_get("company_name")?,
        alma_mater_match: row.try_get("alma_mater_match")?,
        location: row.try_get("location")?,
        source_of_lead: row.try_get("source_of_lead")?,
        score: row.try_get("score")?,
        status,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Inserts a lead, or refreshes the one with the same normalized profile URL, then upserts
/// and links its company. All of it happens in one transaction: if the company write fails
/// the lead row is rolled back too.
///
/// A refresh rewrites the pipeline-owned columns (role, location, score, company link and
/// so on) and never touches `status`, `notes` or `created_at`.
///
/// # Errors
/// Returns [`StorageError::Invalid`] when the profile URL or name is unusable, or any
/// database error raised inside the transaction.
pub async fn upsert_lead(pool: &SqlitePool, lead: &LeadUpsert) -> Result<LeadUpsertOutcome> {
    let profile_url =
        normalize_profile_url(&lead.profile_url).ok_or_else(|| StorageError::Invalid {
            field: "profile_url",
            message: format!("{:?} is not a profile url", lead.profile_url),
        })?;
    let name = normalize_whitespace(&lead.name);
    if name.is_empty() {
        return Err(StorageError::Invalid {
            field: "name",
            message: "lead name is empty".to_string(),
        });
    }
    let company_name = lead
        .company
        .as_ref()
        .map(|c| normalize_company_name(&c.name))
        .filter(|n| !n.is_empty());
    let stamp = now();

    let mut tx = pool.begin().await?;

    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM leads WHERE profile_url = ?")
        .bind(&profile_url)
        .fetch_optional(&mut *tx)
        .await?;

    let (lead_id, action) = match existing {
        Some(id) => {
            sqlx::query(
                "UPDATE leads SET \
                    name = ?, current_role = ?, company_name = ?, alma_mater_match = ?, \
                    location = ?, source_of_lead = ?, score = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(&name)
            .bind(clean_text(lead.current_role.as_deref()))
            .bind(&company_name)
            .bind(clean_text(lead.alma_mater_match.as_deref()))
            .bind(clean_text(lead.location.as_deref()))
            .bind(&lead.source_of_lead)
            .bind(lead.score)
            .bind(stamp)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            (id, UpsertAction::Updated)
        }
        None => {
            let id = sqlx::query(
                "INSERT INTO leads \
                    (name, profile_url, current_role, company_name, alma_mater_match, location, \
                     source_of_lead, score, status, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&name)
            .bind(&profile_url)
            .bind(clean_text(lead.current_role.as_deref()))
            .bind(&company_name)
            .bind(clean_text(lead.alma_mater_match.as_deref()))
            .bind(clean_text(lead.location.as_deref()))
            .bind(&lead.source_of_lead)
            .bind(lead.score)
            .bind(LeadStatus::New.as_str())
            .bind(stamp)
            .bind(stamp)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
            (id, UpsertAction::Created)
        }
    };

    let company = match &lead.company {
        Some(company) => Some(upsert_company_on(&mut tx, company).await?),
        None => None,
    };

    sqlx::query("UPDATE leads SET company_id = ? WHERE id = ?")
        .bind(company.map(|c| c.company_id))
        .bind(lead_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    debug!(lead_id, profile_url = %profile_url, ?action, "lead upserted");

    Ok(LeadUpsertOutcome {
        lead_id,
        action,
        company,
    })
}

pub async fn list_leads(pool: &SqlitePool, filter: &LeadFilter) -> Result<Vec<Lead>> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM leads WHERE 1 = 1");
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(name) = &filter.name_contains {
        qb.push(" AND name LIKE ").push_bind(format!("%{name}%"));
    }
    if let Some(company_id) = filter.company_id {
        qb.push(" AND company_id = ").push_bind(company_id);
    }
    if let Some(min_score) = filter.min_score {
        qb.push(" AND score >= ").push_bind(min_score);
    }
    qb.push(filter.sort.order_by());
    qb.push(" LIMIT ").push_bind(filter.limit.unwrap_or(-1));
    qb.push(" OFFSET ").push_bind(filter.offset.unwrap_or(0));

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(lead_from_row).collect()
}

pub async fn get_lead(pool: &SqlitePool, id: i64) -> Result<Option<Lead>> {
    let row = sqlx::query("SELECT * FROM leads WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(lead_from_row).transpose()
}

/// Looks a lead up by profile URL in any of its spellings (query string, trailing slash,
/// regional host).
pub async fn get_lead_by_profile_url(pool: &SqlitePool, profile_url: &str) -> Result<Option<Lead>> {
    let Some(profile_url) = normalize_profile_url(profile_url) else {
        return Ok(None);
    };
    let row = sqlx::query("SELECT * FROM leads WHERE profile_url = ?")
        .bind(profile_url)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(lead_from_row).transpose()
}

/// The only write path for status and notes. `None` leaves the field as it is.
///
/// # Errors
/// Returns [`StorageError::NotFound`] if no lead has `id`.
pub async fn update_lead_status_and_notes(
    pool: &SqlitePool,
    id: i64,
    status: Option<LeadStatus>,
    notes: Option<&str>,
) -> Result<Lead> {
    let result = sqlx::query(
        "UPDATE leads SET status = COALESCE(?, status), notes = COALESCE(?, notes), updated_at = ? \
         WHERE id = ?",
    )
    .bind(status.map(LeadStatus::as_str))
    .bind(notes)
    .bind(now())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound { entity: "lead", id });
    }
    get_lead(pool, id)
        .await?
        .ok_or(StorageError::NotFound { entity: "lead", id })
}

pub async fn delete_lead(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM leads WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_leads(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM leads")
        .fetch_one(pool)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companies::{delete_company, get_company_by_name, list_companies, CompanyFilter};
    use crate::Database;

    fn jane(score: f64) -> LeadUpsert {
        LeadUpsert {
            name: "Jane  Doe".into(),
            profile_url: "https://www.linkedin.com/in/jane-doe".into(),
            current_role: Some("Product Manager".into()),
            company: Some(CompanyUpsert::named("Acme Inc.")),
            alma_mater_match: Some("Questrom".into()),
            location: Some("New York City".into()),
            source_of_lead: "Alumni Search: Questrom".into(),
            score,
        }
    }

    #[tokio::test]
    async fn same_profile_twice_is_one_row_with_latest_values() {
        let db = Database::in_memory().await.unwrap();

        let first = upsert_lead(db.pool(), &jane(14.0)).await.unwrap();
        let second = upsert_lead(
            db.pool(),
            &LeadUpsert {
                profile_url: "http://linkedin.com/in/Jane-Doe/?trk=public".into(),
                current_role: Some("Product Owner".into()),
                location: Some("Brooklyn".into()),
                ..jane(12.0)
            },
        )
        .await
        .unwrap();

        assert_eq!(first.action, UpsertAction::Created);
        assert_eq!(second.action, UpsertAction::Updated);
        assert_eq!(first.lead_id, second.lead_id);
        assert_eq!(count_leads(db.pool()).await.unwrap(), 1);

        let lead = get_lead(db.pool(), first.lead_id).await.unwrap().unwrap();
        assert_eq!(lead.name, "Jane Doe");
        assert_eq!(lead.profile_url, "https://www.linkedin.com/in/jane-doe");
        assert_eq!(lead.current_role.as_deref(), Some("Product Owner"));
        assert_eq!(lead.location.as_deref(), Some("Brooklyn"));
        assert_eq!(lead.score, 12.0);
        assert_eq!(lead.company_name.as_deref(), Some("Acme"));
        assert_eq!(lead.company_id, second.company.map(|c| c.company_id));
        assert_eq!(list_companies(db.pool(), &CompanyFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_and_notes_survive_reacquisition() {
        let db = Database::in_memory().await.unwrap();
        let id = upsert_lead(db.pool(), &jane(14.0)).await.unwrap().lead_id;
        let created_at = get_lead(db.pool(), id).await.unwrap().unwrap().created_at;

        let updated = update_lead_status_and_notes(
            db.pool(),
            id,
            Some(LeadStatus::Contacted),
            Some("coffee chat booked"),
        )
        .await
        .unwrap();
        assert_eq!(updated.status, LeadStatus::Contacted);

        upsert_lead(db.pool(), &jane(9.0)).await.unwrap();

        let lead = get_lead(db.pool(), id).await.unwrap().unwrap();
        assert_eq!(lead.status, LeadStatus::Contacted);
        assert_eq!(lead.notes.as_deref(), Some("coffee chat booked"));
        assert_eq!(lead.created_at, created_at);
        assert_eq!(lead.score, 9.0);
    }

    #[tokio::test]
    async fn status_only_update_keeps_notes() {
        let db = Database::in_memory().await.unwrap();
        let id = upsert_lead(db.pool(), &jane(1.0)).await.unwrap().lead_id;
        update_lead_status_and_notes(db.pool(), id, None, Some("warm intro via Sam"))
            .await
            .unwrap();
        let lead = update_lead_status_and_notes(db.pool(), id, Some(LeadStatus::Interested), None)
            .await
            .unwrap();
        assert_eq!(lead.status, LeadStatus::Interested);
        assert_eq!(lead.notes.as_deref(), Some("warm intro via Sam"));

        let err =
            update_lead_status_and_notes(db.pool(), id + 100, Some(LeadStatus::Archived), None)
                .await
                .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { entity: "lead", .. }));
    }

    #[tokio::test]
    async fn failing_company_write_rolls_back_the_lead() {
        let db = Database::in_memory().await.unwrap();
        let broken = LeadUpsert {
            company: Some(CompanyUpsert::named("   ")),
            ..jane(14.0)
        };
        // blank company name fails after the lead row is written
        assert!(upsert_lead(db.pool(), &broken).await.is_err());
        assert_eq!(count_leads(db.pool()).await.unwrap(), 0);

        let id = upsert_lead(db.pool(), &jane(14.0)).await.unwrap().lead_id;
        assert!(upsert_lead(db.pool(), &LeadUpsert { score: 1.0, ..broken }).await.is_err());
        assert_eq!(get_lead(db.pool(), id).await.unwrap().unwrap().score, 14.0);
    }

    #[tokio::test]
    async fn lead_without_company_clears_the_link() {
        let db = Database::in_memory().await.unwrap();
        let outcome = upsert_lead(db.pool(), &jane(14.0)).await.unwrap();
        assert!(outcome.company.is_some());

        let outcome = upsert_lead(db.pool(), &LeadUpsert { company: None, ..jane(10.0) })
            .await
            .unwrap();
        assert!(outcome.company.is_none());
        let lead = get_lead(db.pool(), outcome.lead_id).await.unwrap().unwrap();
        assert_eq!(lead.company_id, None);
        assert_eq!(lead.company_name, None);
    }

    #[tokio::test]
    async fn deleting_a_company_keeps_its_leads() {
        let db = Database::in_memory().await.unwrap();
        let id = upsert_lead(db.pool(), &jane(14.0)).await.unwrap().lead_id;
        let company = get_company_by_name(db.pool(), "Acme").await.unwrap().unwrap();

        assert!(delete_company(db.pool(), company.id).await.unwrap());

        let lead = get_lead(db.pool(), id).await.unwrap().unwrap();
        assert_eq!(lead.company_id, None);
        assert_eq!(lead.company_name.as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn unusable_input_is_rejected_before_touching_the_database() {
        let db = Database::in_memory().await.unwrap();
        let no_url = LeadUpsert { profile_url: "  ".into(), ..jane(1.0) };
        let no_name = LeadUpsert { name: " ".into(), ..jane(1.0) };

        assert!(matches!(
            upsert_lead(db.pool(), &no_url).await,
            Err(StorageError::Invalid { field: "profile_url", .. })
        ));
        assert!(matches!(
            upsert_lead(db.pool(), &no_name).await,
            Err(StorageError::Invalid { field: "name", .. })
        ));
        assert_eq!(count_leads(db.pool()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_filters_and_orders() {
        let db = Database::in_memory().await.unwrap();
        for (slug, name, score) in [
            ("a", "Ann Lee", 11.0),
            ("b", "Bob Stone", 15.0),
            ("c", "Cy Young", 13.0),
        ] {
            upsert_lead(
                db.pool(),
                &LeadUpsert {
                    name: name.into(),
                    profile_url: format!("https://www.linkedin.com/in/{slug}"),
                    ..jane(score)
                },
            )
            .await
            .unwrap();
        }
        let bob = get_lead_by_profile_url(db.pool(), "linkedin.com/in/b/")
            .await
            .unwrap()
            .unwrap();
        update_lead_status_and_notes(db.pool(), bob.id, Some(LeadStatus::ToReview), None)
            .await
            .unwrap();

        let by_score = list_leads(db.pool(), &LeadFilter::default()).await.unwrap();
        let names = by_score.iter().map(|l| l.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Bob Stone", "Cy Young", "Ann Lee"]);

        let to_review = list_leads(
            db.pool(),
            &LeadFilter {
                status: Some(LeadStatus::ToReview),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(to_review.len(), 1);
        assert_eq!(to_review[0].id, bob.id);

        let page = list_leads(
            db.pool(),
            &LeadFilter {
                min_score: Some(12.0),
                sort: LeadSort::NameAsc,
                limit: Some(1),
                offset: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "Cy Young");

        let named = list_leads(
            db.pool(),
            &LeadFilter {
                name_contains: Some("ann".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(named.len(), 1);

        assert!(delete_lead(db.pool(), bob.id).await.unwrap());
        assert_eq!(count_leads(db.pool()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unknown_status_text_is_a_decode_error() {
        let db = Database::in_memory().await.unwrap();
        let id = upsert_lead(db.pool(), &jane(1.0)).await.unwrap().lead_id;
        sqlx::query("UPDATE leads SET status = 'ghosted' WHERE id = ?")
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();

        let err = get_lead(db.pool(), id).await.unwrap_err();
        assert!(matches!(err, StorageError::Decode { column: "status", .. }));
    }
}
