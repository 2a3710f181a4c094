use chrono::{DateTime, Utc};
use leadhub_core::normalize::{company_key, normalize_company_name};
use leadhub_core::CompanyProfile;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

use crate::{now, Result, UpsertAction};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub normalized_name: String,
    pub linkedin_url: Option<String>,
    pub size_bucket: Option<String>,
    pub product_focus: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A company as seen by the pipeline. `None` fields leave stored values untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompanyUpsert {
    pub name: String,
    pub linkedin_url: Option<String>,
    pub size_bucket: Option<String>,
    pub product_focus: Option<String>,
}

impl CompanyUpsert {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_profile(mut self, profile: &CompanyProfile) -> Self {
        self.linkedin_url = Some(profile.linkedin_url.clone());
        self.size_bucket = profile.size_bucket.clone();
        self.product_focus = profile.product_focus.clone();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompanyUpsertOutcome {
    pub company_id: i64,
    pub action: UpsertAction,
}

#[derive(Debug, Clone, Default)]
pub struct CompanyFilter {
    pub name_contains: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn company_from_row(row: &SqliteRow) -> Result<Company> {
    Ok(Company {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        normalized_name: row.try_get("normalized_name")?,
        linkedin_url: row.try_get("linkedin_url")?,
        size_bucket: row.try_get("size_bucket")?,
        product_focus: row.try_get("product_focus")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Inserts or enriches the company keyed by its normalized name, on a connection the
/// caller owns (usually a lead's transaction). The display name is kept from the first
/// sighting.
pub(crate) async fn upsert_company_on(
    conn: &mut SqliteConnection,
    company: &CompanyUpsert,
) -> Result<CompanyUpsertOutcome> {
    let display_name = normalize_company_name(&company.name);
    let key = company_key(&company.name);
    let stamp = now();

    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM companies WHERE normalized_name = ?")
            .bind(&key)
            .fetch_optional(&mut *conn)
            .await?;

    if let Some(company_id) = existing {
        sqlx::query(
            "UPDATE companies SET \
                linkedin_url = COALESCE(?, linkedin_url), \
                size_bucket = COALESCE(?, size_bucket), \
                product_focus = COALESCE(?, product_focus), \
                updated_at = ? \
             WHERE id = ?",
        )
        .bind(&company.linkedin_url)
        .bind(&company.size_bucket)
        .bind(&company.product_focus)
        .bind(stamp)
        .bind(company_id)
        .execute(&mut *conn)
        .await?;
        return Ok(CompanyUpsertOutcome {
            company_id,
            action: UpsertAction::Updated,
        });
    }

    let company_id = sqlx::query(
        "INSERT INTO companies \
            (name, normalized_name, linkedin_url, size_bucket, product_focus, \
             created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&display_name)
    .bind(&key)
    .bind(&company.linkedin_url)
    .bind(&company.size_bucket)
    .bind(&company.product_focus)
    .bind(stamp)
    .bind(stamp)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(CompanyUpsertOutcome {
        company_id,
        action: UpsertAction::Created,
    })
}

/// Inserts or enriches a company. Enrichment fields only ever go from empty to filled or
/// from one value to a newer one; a `None` never blanks a stored value.
///
/// # Errors
/// Returns an error if the normalized name is empty or the database fails.
pub async fn upsert_company(
    pool: &SqlitePool,
    company: &CompanyUpsert,
) -> Result<CompanyUpsertOutcome> {
    let mut tx = pool.begin().await?;
    let outcome = upsert_company_on(&mut tx, company).await?;
    tx.commit().await?;
    Ok(outcome)
}

pub async fn list_companies(pool: &SqlitePool, filter: &CompanyFilter) -> Result<Vec<Company>> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM companies WHERE 1 = 1");
    if let Some(name) = &filter.name_contains {
        qb.push(" AND name LIKE ").push_bind(format!("%{name}%"));
    }
    qb.push(" ORDER BY normalized_name ASC");
    qb.push(" LIMIT ").push_bind(filter.limit.unwrap_or(-1));
    qb.push(" OFFSET ").push_bind(filter.offset.unwrap_or(0));

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(company_from_row).collect()
}

pub async fn get_company(pool: &SqlitePool, id: i64) -> Result<Option<Company>> {
    let row = sqlx::query("SELECT * FROM companies WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(company_from_row).transpose()
}

/// Looks a company up by name, ignoring case, spacing and legal suffixes.
pub async fn get_company_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Company>> {
    let row = sqlx::query("SELECT * FROM companies WHERE normalized_name = ?")
        .bind(company_key(name))
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(company_from_row).transpose()
}

/// Deletes a company and its postings; leads keep their row with the link cleared.
pub async fn delete_company(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM companies WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn same_company_under_different_spellings_is_one_row() {
        let db = Database::in_memory().await.unwrap();

        let first = upsert_company(db.pool(), &CompanyUpsert::named("Acme, Inc."))
            .await
            .unwrap();
        let second = upsert_company(db.pool(), &CompanyUpsert::named("  ACME "))
            .await
            .unwrap();

        assert_eq!(first.action, UpsertAction::Created);
        assert_eq!(second.action, UpsertAction::Updated);
        assert_eq!(first.company_id, second.company_id);

        let all = list_companies(db.pool(), &CompanyFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Acme");
        assert_eq!(all[0].normalized_name, "acme");
    }

    #[tokio::test]
    async fn later_runs_never_blank_enrichment() {
        let db = Database::in_memory().await.unwrap();
        let profile = CompanyProfile {
            linkedin_url: "https://www.linkedin.com/company/acme".into(),
            size_bucket: Some("51-200".into()),
            product_focus: None,
        };
        upsert_company(db.pool(), &CompanyUpsert::named("Acme").with_profile(&profile))
            .await
            .unwrap();
        upsert_company(
            db.pool(),
            &CompanyUpsert {
                product_focus: Some("Anvils".into()),
                ..CompanyUpsert::named("Acme")
            },
        )
        .await
        .unwrap();

        let stored = get_company_by_name(db.pool(), "acme llc").await.unwrap().unwrap();
        assert_eq!(stored.linkedin_url.as_deref(), Some("https://www.linkedin.com/company/acme"));
        assert_eq!(stored.size_bucket.as_deref(), Some("51-200"));
        assert_eq!(stored.product_focus.as_deref(), Some("Anvils"));
        assert!(stored.updated_at >= stored.created_at);
    }

    #[tokio::test]
    async fn blank_name_is_rejected_by_the_schema() {
        let db = Database::in_memory().await.unwrap();
        assert!(upsert_company(db.pool(), &CompanyUpsert::named("   ")).await.is_err());
        assert!(list_companies(db.pool(), &CompanyFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn filter_get_and_delete() {
        let db = Database::in_memory().await.unwrap();
        for name in ["Globex", "Acme", "Initech"] {
            upsert_company(db.pool(), &CompanyUpsert::named(name)).await.unwrap();
        }

        let names = list_companies(db.pool(), &CompanyFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Acme", "Globex", "Initech"]);

        let filtered = list_companies(
            db.pool(),
            &CompanyFilter {
                name_contains: Some("glo".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(filtered.len(), 1);

        let id = filtered[0].id;
        assert_eq!(get_company(db.pool(), id).await.unwrap().unwrap().name, "Globex");
        assert!(delete_company(db.pool(), id).await.unwrap());
        assert!(!delete_company(db.pool(), id).await.unwrap());
        assert!(get_company(db.pool(), id).await.unwrap().is_none());
    }
}
