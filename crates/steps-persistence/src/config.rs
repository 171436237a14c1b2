//! Carga de configuración de conexión desde variables de entorno.
//! Usa `STEPS_DB_URL` (o `DATABASE_URL`) y parámetros opcionales de pool.

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use std::env;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

pub const DEFAULT_DB_URL: &str = "public_steps.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let url = env::var("STEPS_DB_URL").or_else(|_| env::var("DATABASE_URL"))
                                          .unwrap_or_else(|_| DEFAULT_DB_URL.into());
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS").ok()
                                                                  .and_then(|v| v.parse().ok())
                                                                  .filter(|n: &u32| *n > 0)
                                                                  .unwrap_or(4);
        Self { url, max_connections }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into(), max_connections: 4 }
    }
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
