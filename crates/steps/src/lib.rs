//! Crate `steps` — pasos reutilizables, grupos públicos y su duplicación
//!
//! Este crate define los tipos de dominio (`Step`, `PublicStepGroup`, vistas
//! en árbol), el contrato de persistencia (`StepUnitOfWork` dentro de una
//! transacción de `StepRepository`), la expansión de bosques de pasos
//! (`TreeExpander`), el motor de duplicación (`DuplicationEngine`) y el
//! servicio de alto nivel (`PublicStepsService`). Incluye un repositorio en
//! memoria útil para pruebas (`InMemoryStepRepository`).
//!
//! Diseño resumido:
//! - Duplicación atómica: el grupo, los pasos y todos los enlaces se crean en
//!   una única transacción; cualquier error la revierte entera.
//! - Remapeo explícito: cada paso clonado registra `id viejo -> id nuevo` y
//!   los hijos resuelven su padre en ese mapa.
//! - Orden: los clones reciben claves `sort` consecutivas detrás de todos los
//!   pasos existentes, en el orden de la expansión.
//!
//! Ejemplo rápido:
//! ```rust
//! use steps::stubs::InMemoryStepRepository;
//! use steps::{GroupDraft, PublicStepsService};
//! use std::sync::Arc;
//! let repo = Arc::new(InMemoryStepRepository::new());
//! let service = PublicStepsService::new(repo);
//! let group = service.save_group(GroupDraft { id: None,
//!                                             name: "Smoke".into(),
//!                                             project_id: 1,
//!                                             platform: 1,
//!                                             step_ids: vec![] })
//!                    .unwrap();
//! let copy = service.duplicate(group.id).unwrap();
//! assert_eq!(service.find_by_id(copy).unwrap().unwrap().group.name, "Smoke_copy");
//! ```
pub mod domain;
pub mod engine;
pub mod errors;
pub mod expansion;
pub mod repository;
pub mod service;
pub mod stubs;

pub use domain::*;
pub use engine::DuplicationEngine;
pub use errors::*;
pub use expansion::*;
pub use repository::*;
pub use service::PublicStepsService;
