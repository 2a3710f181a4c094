use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid database url {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("could not decode column {column}: {message}")]
    Decode { column: &'static str, message: String },

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
