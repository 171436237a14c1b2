// Archivo: errors.rs
// Propósito: definir los errores del dominio de pasos públicos y el alias
// Result<T> usado por las APIs del crate.
use thiserror::Error;

/// Errores comunes del dominio de pasos y grupos públicos.
///
/// Cualquier variante devuelta dentro de una transacción provoca el rollback
/// completo de la operación en curso.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
  /// Entidad no encontrada (grupo o paso referenciado).
  #[error("No encontrado: {0}")]
  NotFound(String),
  /// El árbol de pasos viola sus invariantes (padre fuera del conjunto
  /// expandido, ciclo, nodo repetido).
  #[error("Árbol inconsistente: {0}")]
  InconsistentTree(String),
  /// Falla del almacenamiento subyacente (BD, pool, mutex envenenado).
  #[error("Error de almacenamiento: {0}")]
  Storage(String),
  /// Datos de entrada inválidos.
  #[error("Error de validación: {0}")]
  Validation(String),
}

impl StepError {
  pub fn group_not_found(id: i64) -> Self {
    Self::NotFound(format!("grupo público {}", id))
  }

  pub fn step_not_found(id: i64) -> Self {
    Self::NotFound(format!("paso {}", id))
  }
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, StepError>;
