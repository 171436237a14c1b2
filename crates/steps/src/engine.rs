// Archivo: engine.rs
// Propósito: motor de duplicación de grupos públicos y borrado de grupos.
//
// La duplicación clona el registro del grupo, el bosque completo de pasos,
// las aristas padre/hijo y los enlaces a elementos dentro de una única
// transacción del `StepRepository`.
use crate::domain::{DuplicationReport, GroupId, Step, StepId, ROOT_PARENT};
use crate::errors::{Result, StepError};
use crate::expansion::{PreorderExpander, TreeExpander};
use crate::repository::{StepRepository, StepUnitOfWork};
use indexmap::IndexMap;
use log::{debug, error, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// Motor de duplicación y borrado de grupos públicos.
///
/// Cada operación pública abre su propia transacción en el repositorio; si
/// cualquier paso falla no queda ninguna fila nueva (grupo, pasos, enlaces).
/// No hay reintentos internos: repetir una duplicación a ciegas tras un fallo
/// de estado desconocido podría duplicar filas.
pub struct DuplicationEngine<R, E = PreorderExpander>
    where R: StepRepository
{
    repo: Arc<R>,
    expander: E,
}

impl<R> DuplicationEngine<R, PreorderExpander> where R: StepRepository
{
    /// Crea el motor con la expansión en preorden por defecto.
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo, expander: PreorderExpander }
    }
}

impl<R, E> DuplicationEngine<R, E>
    where R: StepRepository,
          E: TreeExpander
{
    /// Crea el motor con un servicio de expansión propio.
    pub fn with_expander(repo: Arc<R>, expander: E) -> Self {
        Self { repo, expander }
    }

    pub fn expander(&self) -> &E {
        &self.expander
    }

    /// Duplica el grupo `source_group_id` y devuelve la identidad del grupo
    /// nuevo.
    pub fn duplicate_group(&self, source_group_id: GroupId) -> Result<GroupId> {
        self.duplicate_group_with_report(source_group_id).map(|r| r.new_group_id)
    }

    /// Igual que `duplicate_group` pero devuelve el detalle de los pasos
    /// clonados.
    pub fn duplicate_group_with_report(&self, source_group_id: GroupId) -> Result<DuplicationReport> {
        debug!("duplicate:start group_id={source_group_id}");
        let res = self.repo
                      .transaction(|uow| duplicate_in(uow, &self.expander, source_group_id));
        match &res {
            Ok(report) => debug!("duplicate:done group_id={} new_group_id={} steps={} roots={}",
                                 source_group_id,
                                 report.new_group_id,
                                 report.cloned_steps.len(),
                                 report.root_step_ids.len()),
            Err(e) => warn!("duplicate:rollback group_id={source_group_id} err={e}"),
        }
        res
    }

    /// Borra un grupo, sus enlaces, los pasos raíz enlazados (con sus
    /// descendientes) y los pasos de caso que lo invocan. Devuelve `false` si
    /// el grupo no existía.
    pub fn delete_group(&self, group_id: GroupId) -> Result<bool> {
        debug!("delete:start group_id={group_id}");
        let res = self.repo.transaction(|uow| delete_in(uow, group_id));
        if let Err(e) = &res {
            warn!("delete:rollback group_id={group_id} err={e}");
        }
        res
    }
}

/// Duplicación dentro de una unidad de trabajo ya abierta.
pub(crate) fn duplicate_in<E>(uow: &mut dyn StepUnitOfWork, expander: &E, source_group_id: GroupId) -> Result<DuplicationReport>
    where E: TreeExpander + ?Sized
{
    // 1. Clonar el registro del grupo.
    let source = uow.get_group(source_group_id)?
                    .ok_or_else(|| StepError::group_not_found(source_group_id))?;
    let new_group_id = uow.insert_group(&source.copy_draft())?;

    // 2. Raíces enlazadas al grupo original.
    let mut seen = HashSet::new();
    let root_ids: Vec<StepId> = uow.list_group_step_ids(source_group_id)?
                                   .into_iter()
                                   .filter(|id| seen.insert(*id))
                                   .collect();
    if root_ids.is_empty() {
        return Ok(DuplicationReport { source_group_id,
                                      new_group_id,
                                      cloned_steps: Vec::new(),
                                      root_step_ids: Vec::new(),
                                      element_links: 0 });
    }

    // 3. Cargar las raíces y expandir el bosque completo.
    let mut roots: Vec<Step> = Vec::with_capacity(root_ids.len());
    for id in root_ids {
        match uow.get_step(id)? {
            Some(step) => roots.push(step),
            None => {
                error!("duplicate: paso raíz {id} enlazado al grupo {source_group_id} no existe");
                return Err(StepError::step_not_found(id));
            }
        }
    }
    let source_list = expander.expand(uow, roots)?;

    // 4. Mapa explícito identidad vieja -> identidad nueva, en orden de
    //    inserción.
    let mut remap: IndexMap<StepId, StepId> = IndexMap::with_capacity(source_list.len());

    // 5. Bloque de claves `sort` por detrás de todos los pasos existentes.
    let mut next_sort = uow.next_sort_block(source_list.len())?;

    // 6. Inserción en el orden de la expansión.
    let mut new_roots = Vec::new();
    let mut element_links = 0;
    for expanded in &source_list {
        let old = &expanded.step;
        if remap.contains_key(&old.id) {
            return Err(StepError::InconsistentTree(format!("paso {} repetido en la expansión", old.id)));
        }
        let parent_id = if old.is_root() {
            ROOT_PARENT
        } else {
            *remap.get(&old.parent_id).ok_or_else(|| {
                                            StepError::InconsistentTree(format!("el padre {} del paso {} no fue \
                                                                                 clonado antes que el hijo",
                                                                                old.parent_id, old.id))
                                        })?
        };
        let new_id = uow.insert_step(&old.to_clone_draft(parent_id, next_sort))?;
        next_sort += 1;
        for element_id in &expanded.elements {
            uow.insert_element_link(new_id, *element_id)?;
            element_links += 1;
        }
        remap.insert(old.id, new_id);
        if old.is_root() {
            new_roots.push(new_id);
        }
    }

    // 7. Enlazar las raíces clonadas al grupo nuevo.
    for step_id in &new_roots {
        uow.insert_group_link(new_group_id, *step_id)?;
    }

    Ok(DuplicationReport { source_group_id,
                           new_group_id,
                           cloned_steps: remap.into_iter().collect(),
                           root_step_ids: new_roots,
                           element_links })
}

/// Borrado de grupo dentro de una unidad de trabajo ya abierta.
pub(crate) fn delete_in(uow: &mut dyn StepUnitOfWork, group_id: GroupId) -> Result<bool> {
    if uow.get_group(group_id)?.is_none() {
        debug!("delete:absent group_id={group_id}");
        return Ok(false);
    }
    let referencing = uow.delete_steps_referencing_group(group_id)?;
    let root_ids = uow.list_group_step_ids(group_id)?;
    let links = uow.delete_group_links(group_id)?;
    let mut steps = 0;
    for id in root_ids {
        match uow.get_step(id)? {
            Some(step) if !step.is_root() => {
                warn!("delete: paso {id} enlazado al grupo {group_id} no es raíz; se conserva")
            }
            // Raíz compartida: otro grupo la sigue usando.
            Some(_) if !uow.list_groups_for_step(id)?.is_empty() => {
                debug!("delete: paso {id} sigue enlazado a otros grupos; se conserva")
            }
            Some(_) => steps += uow.delete_step_cascade(id)?,
            None => {}
        }
    }
    let removed = uow.delete_group_record(group_id)?;
    debug!("delete:done group_id={group_id} links={links} steps={steps} referencing={referencing}");
    Ok(removed)
}
