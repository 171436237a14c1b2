//! Errores de persistencia.
//! Mapea errores de Diesel / pool a variantes semánticas y luego a
//! `StepError` en el límite con el dominio.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use steps::StepError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("not found")]
    NotFound,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation(info.message().to_string()),
                DatabaseErrorKind::ClosedConnection => Self::TransientIo(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            DieselError::RollbackErrorOnCommit { rollback_error, commit_error } => {
                Self::Unknown(format!("rollback={rollback_error}; commit={commit_error}"))
            }
            other => Self::Unknown(format!("{other}")),
        }
    }
}

impl From<r2d2::Error> for PersistenceError {
    fn from(err: r2d2::Error) -> Self {
        Self::TransientIo(format!("pool: {err}"))
    }
}

impl From<PersistenceError> for StepError {
    fn from(err: PersistenceError) -> Self {
        StepError::Storage(format!("db: {err}"))
    }
}

/// Error interno de una transacción Diesel: o bien el cierre del dominio
/// falló, o bien falló Diesel (BEGIN/COMMIT).
#[derive(Debug)]
pub(crate) enum TxError {
    Step(StepError),
    Db(DieselError),
}

impl From<DieselError> for TxError {
    fn from(err: DieselError) -> Self {
        Self::Db(err)
    }
}

impl From<TxError> for StepError {
    fn from(err: TxError) -> Self {
        match err {
            TxError::Step(e) => e,
            TxError::Db(e) => PersistenceError::from(e).into(),
        }
    }
}

/// Determina si un error es transitorio (recomendado reintentar).
pub(crate) fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("database is locked") || m.contains("busy") || m.contains("timeout")
        }
        _ => false,
    }
}
