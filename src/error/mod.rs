use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;
use std::io::Error as IoError;

use crate::import::{DiscoveryError, ImportError, LedgerError};

/// Structured error printed by the CLI when a command cannot complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    /// Single-line JSON rendering for stderr.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.to_string())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl StdError for AppError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }
            if let Some(import) = err.downcast_ref::<ImportError>() {
                return AppError::from_import(import);
            }
            if let Some(ledger) = err.downcast_ref::<LedgerError>() {
                return AppError::from_ledger(ledger);
            }
            if let Some(sqlx) = err.downcast_ref::<SqlxError>() {
                return AppError::from_sqlx(sqlx);
            }
            if let Some(io) = err.downcast_ref::<IoError>() {
                return AppError::from_io(io);
            }
            if let Some(json) = err.downcast_ref::<SerdeJsonError>() {
                return AppError::from_json(json);
            }

            let mut root = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

impl AppError {
    fn from_io(error: &IoError) -> Self {
        let code = format!("IO/{:?}", error.kind());
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }

    fn from_json(error: &SerdeJsonError) -> Self {
        let code = if error.is_data() {
            "JSON/DATA"
        } else if error.is_syntax() {
            "JSON/SYNTAX"
        } else if error.is_eof() {
            "JSON/EOF"
        } else {
            "JSON/IO"
        };

        let mut app_error = AppError::new(code, error.to_string());
        if error.line() > 0 {
            app_error = app_error
                .with_context("line", error.line().to_string())
                .with_context("column", error.column().to_string());
        }
        app_error
    }

    fn from_sqlx(error: &SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new("SQLX/ROW_NOT_FOUND", "Record not found"),
            SqlxError::PoolTimedOut => AppError::new(
                "SQLX/POOL_TIMEOUT",
                "Timed out acquiring a database connection",
            ),
            SqlxError::PoolClosed => AppError::new("SQLX/POOL_CLOSED", "Database pool is closed"),
            SqlxError::Io(err) => AppError::from_io(err).with_context("source", "sqlx"),
            SqlxError::Database(db) => {
                let code = db
                    .code()
                    .map(|code| format!("SQLITE/{code}"))
                    .unwrap_or_else(|| "SQLX/DATABASE".to_string());
                let mut app_error = AppError::new(code, db.message().to_string());
                if let Some(constraint) = db.constraint() {
                    app_error = app_error.with_context("constraint", constraint.to_string());
                }
                app_error
            }
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }

    fn from_ledger(error: &LedgerError) -> Self {
        match error {
            LedgerError::Database(err) => AppError::from_sqlx(err),
            LedgerError::Duplicate(name) => {
                AppError::new("LEDGER/DUPLICATE", format!("bundle '{name}' already recorded"))
                    .with_context("bundle", name.as_str())
            }
            LedgerError::Corrupt { name, detail } => {
                AppError::new("LEDGER/CORRUPT", detail.as_str())
                    .with_context("bundle", name.as_str())
            }
        }
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        AppError::from_io(&error)
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        AppError::from_json(&error)
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        AppError::from_sqlx(&error)
    }
}

impl From<LedgerError> for AppError {
    fn from(error: LedgerError) -> Self {
        AppError::from_ledger(&error)
    }
}

impl AppError {
    fn from_import(error: &ImportError) -> Self {
        match error {
            ImportError::Discovery(err) => {
                let app = AppError::new("IMPORT/DISCOVERY", err.to_string());
                match err {
                    DiscoveryError::Unreadable(io) => app.with_cause(AppError::new(
                        format!("IO/{:?}", io.kind()),
                        io.to_string(),
                    )),
                    DiscoveryError::NotADirectory | DiscoveryError::Unsupported => app,
                }
            }
            ImportError::Database(err) => {
                AppError::new("IMPORT/DATABASE", error.to_string()).with_cause(AppError::new(
                    "SQLX/ERROR",
                    err.to_string(),
                ))
            }
        }
    }
}

impl From<ImportError> for AppError {
    fn from(error: ImportError) -> Self {
        AppError::from_import(&error)
    }
}
