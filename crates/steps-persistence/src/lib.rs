//! Persistencia SQLite (Diesel) para grupos públicos de pasos.
//! Expone el módulo `schema`, la configuración por entorno y el repositorio
//! Diesel que implementa `StepRepository`. La implementación detallada está
//! en `step_persistence.rs`.

pub mod config;
pub mod error;
pub mod schema;
mod step_persistence;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use step_persistence::{DieselStepRepository, MIGRATIONS};
