use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] tradepost_db::DbError),
    #[error("internal error: {0}")]
    Internal(String),
}
