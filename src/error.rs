use thiserror::Error;

/// 账本访问错误
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("constraint violation: {0}")]
    Constraint(String),
}

/// 行归一化错误 (在任何账本操作之前拒绝)
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("import contains no rows")]
    Empty,
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("csv decode error: {0}")]
    Csv(#[from] csv::Error),
}

/// 外部列分类器错误, 调用方总是回退到启发式映射
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("classifier returned invalid response: {0}")]
    InvalidResponse(String),
}

/// 导入执行错误
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// 合并错误
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("invalid merge request: {0}")]
    InvalidRequest(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("verification failed after {step}: expected {expected}, found {actual}")]
    VerificationFailed {
        step: &'static str,
        expected: i64,
        actual: i64,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
