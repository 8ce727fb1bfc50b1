// sqlx error mapping

use rollup_core::error::AppError;
use rollup_core::port::WriteError;

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

fn is_unique_violation(code: &str) -> bool {
    matches!(code, "2067" | "1555")
}

/// True for SQLITE_BUSY, SQLITE_LOCKED and their extended codes
/// (BUSY_SNAPSHOT = 517, BUSY_TIMEOUT = 773, ...).
fn is_lock_contention(code: &str) -> bool {
    code.parse::<i32>()
        .map(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

/// Convert sqlx::Error to AppError with structured information
///
/// Unique constraint violations become `Conflict` (duplicate ids); everything
/// else is a `Database` error.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            // SQLite error codes: https://www.sqlite.org/rescode.html
            Some(code) if is_unique_violation(code.as_ref()) => {
                AppError::Conflict(format!("Unique constraint violation: {}", db_err.message()))
            }
            Some(code) if is_lock_contention(code.as_ref()) => AppError::Database(format!(
                "Database locked (SQLITE_BUSY): {}",
                db_err.message()
            )),
            Some(code) if code.as_ref() == "13" => {
                AppError::Database(format!("Database full: {}", db_err.message()))
            }
            Some(code) => AppError::Database(format!(
                "Database error [{}]: {}",
                code.as_ref(),
                db_err.message()
            )),
            None => AppError::Database(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        _ => AppError::Database(err.to_string()),
    }
}

/// Errors raised while opening or committing a write transaction.
///
/// Lock contention there means another writer got in first, so callers see a
/// `Conflict` and replay the whole transaction against fresh state.
pub(crate) fn map_tx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err)
            if db_err
                .code()
                .is_some_and(|code| is_lock_contention(code.as_ref())) =>
        {
            AppError::Conflict(format!("Write transaction contended: {}", db_err.message()))
        }
        _ => map_sqlx_error(err),
    }
}

/// Classify a failed target write: lock contention and pool/IO trouble can
/// succeed on replay, anything else is a rejection.
pub(crate) fn map_write_error(err: sqlx::Error) -> WriteError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) if is_lock_contention(code.as_ref()) => {
                WriteError::Unavailable(db_err.message().to_string())
            }
            _ => WriteError::Rejected(db_err.message().to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            WriteError::Unavailable(err.to_string())
        }
        _ => WriteError::Rejected(err.to_string()),
    }
}
