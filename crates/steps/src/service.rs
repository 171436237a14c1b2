// Archivo: service.rs
// Propósito: implementar `PublicStepsService`, la capa que expone las
// operaciones de alto nivel sobre grupos públicos (guardar, consultar,
// listar, borrar, duplicar). Esta capa debe ser invocada desde handlers
// HTTP o desde la CLI.
use crate::domain::{DuplicationReport, ElementId, GroupDraft, GroupId, GroupSummary, NewPublicStepGroup, NewStep,
                    ProjectId, PublicStepGroup, PublicStepGroupView, Step, StepId, ROOT_PARENT};
use crate::engine::{delete_in, DuplicationEngine};
use crate::errors::{Result, StepError};
use crate::expansion::{assemble_forest, PreorderExpander, TreeExpander};
use crate::repository::{StepRepository, StepUnitOfWork};
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

/// Servicio de alto nivel sobre grupos públicos.
///
/// Orquesta el repositorio y el motor de duplicación; cada método es una
/// transacción independiente.
pub struct PublicStepsService<R, E = PreorderExpander>
    where R: StepRepository
{
    repo: Arc<R>,
    engine: DuplicationEngine<R, E>,
}

impl<R> PublicStepsService<R, PreorderExpander> where R: StepRepository
{
    pub fn new(repo: Arc<R>) -> Self {
        let engine = DuplicationEngine::new(repo.clone());
        Self { repo, engine }
    }
}

impl<R, E> PublicStepsService<R, E>
    where R: StepRepository,
          E: TreeExpander
{
    /// Construye el servicio con un servicio de expansión propio (lo usan
    /// tanto las vistas como la duplicación).
    pub fn with_expander(repo: Arc<R>, expander: E) -> Self {
        let engine = DuplicationEngine::with_expander(repo.clone(), expander);
        Self { repo, engine }
    }

    pub fn engine(&self) -> &DuplicationEngine<R, E> {
        &self.engine
    }

    /// Crea (sin `id`) o actualiza (con `id`) un grupo y reemplaza sus
    /// enlaces a pasos raíz por `draft.step_ids`, en orden.
    pub fn save_group(&self, draft: GroupDraft) -> Result<PublicStepGroup> {
        if draft.name.trim().is_empty() {
            return Err(StepError::Validation("el nombre del grupo no puede estar vacío".into()));
        }
        self.repo.transaction(|uow| {
                     check_group_roots(uow, &draft.step_ids)?;
                     let group = match draft.id {
                         Some(id) => {
                             let group = PublicStepGroup { id,
                                                           name: draft.name.clone(),
                                                           project_id: draft.project_id,
                                                           platform: draft.platform };
                             if !uow.update_group(&group)? {
                                 return Err(StepError::group_not_found(id));
                             }
                             group
                         }
                         None => {
                             let new = NewPublicStepGroup { name: draft.name.clone(),
                                                            project_id: draft.project_id,
                                                            platform: draft.platform };
                             let id = uow.insert_group(&new)?;
                             PublicStepGroup { id,
                                               name: new.name,
                                               project_id: new.project_id,
                                               platform: new.platform }
                         }
                     };
                     uow.delete_group_links(group.id)?;
                     for step_id in &draft.step_ids {
                         uow.insert_group_link(group.id, *step_id)?;
                     }
                     debug!("save_group group_id={} links={}", group.id, draft.step_ids.len());
                     Ok(group)
                 })
    }

    /// Grupo con su bosque de pasos, o `None` si no existe.
    pub fn find_by_id(&self, id: GroupId) -> Result<Option<PublicStepGroupView>> {
        let expander = self.engine.expander();
        self.repo.read(|uow| match uow.get_group(id)? {
                     Some(group) => load_view(uow, expander, group).map(Some),
                     None => Ok(None),
                 })
    }

    /// Grupos del proyecto (identidad descendente) con sus pasos.
    pub fn list_by_project(&self, project_id: ProjectId) -> Result<Vec<PublicStepGroupView>> {
        let expander = self.engine.expander();
        self.repo.read(|uow| {
                     let groups = uow.list_groups_by_project(project_id)?;
                     let mut out = Vec::with_capacity(groups.len());
                     for group in groups {
                         out.push(load_view(uow, expander, group)?);
                     }
                     Ok(out)
                 })
    }

    /// Id y nombre de los grupos del proyecto para una plataforma.
    pub fn list_by_project_and_platform(&self, project_id: ProjectId, platform: i32) -> Result<Vec<GroupSummary>> {
        self.repo.read(|uow| {
                     Ok(uow.list_groups_by_project(project_id)?
                           .into_iter()
                           .filter(|g| g.platform == platform)
                           .map(|g| GroupSummary { id: g.id, name: g.name })
                           .collect())
                 })
    }

    /// Borra un grupo. `false` si no existía.
    pub fn delete(&self, id: GroupId) -> Result<bool> {
        self.engine.delete_group(id)
    }

    /// Borra todos los grupos del proyecto en una sola transacción y devuelve
    /// cuántos se borraron.
    pub fn delete_by_project(&self, project_id: ProjectId) -> Result<usize> {
        self.repo.transaction(|uow| {
                     let mut deleted = 0;
                     for group in uow.list_groups_by_project(project_id)? {
                         if delete_in(uow, group.id)? {
                             deleted += 1;
                         }
                     }
                     debug!("delete_by_project project_id={project_id} groups={deleted}");
                     Ok(deleted)
                 })
    }

    /// Duplica un grupo; devuelve la identidad del grupo nuevo.
    pub fn duplicate(&self, id: GroupId) -> Result<GroupId> {
        self.engine.duplicate_group(id)
    }

    pub fn duplicate_with_report(&self, id: GroupId) -> Result<DuplicationReport> {
        self.engine.duplicate_group_with_report(id)
    }

    /// Inserta un paso y lo enlaza a `element_ids`. Si `parent_id` no es
    /// raíz, el padre debe existir.
    pub fn create_step(&self, step: NewStep, element_ids: &[ElementId]) -> Result<Step> {
        self.repo.transaction(|uow| {
                     if step.parent_id != ROOT_PARENT && uow.get_step(step.parent_id)?.is_none() {
                         return Err(StepError::step_not_found(step.parent_id));
                     }
                     let id = uow.insert_step(&step)?;
                     for element_id in element_ids {
                         uow.insert_element_link(id, *element_id)?;
                     }
                     Ok(step.clone().with_id(id))
                 })
    }

    /// Actualiza un paso existente. Rechaza padres inexistentes y ciclos.
    pub fn update_step(&self, step: Step) -> Result<()> {
        self.repo.transaction(|uow| {
                     check_parent_chain(uow, step.id, step.parent_id)?;
                     if !uow.update_step(&step)? {
                         return Err(StepError::step_not_found(step.id));
                     }
                     Ok(())
                 })
    }
}

fn load_view<E>(uow: &mut dyn StepUnitOfWork, expander: &E, group: PublicStepGroup) -> Result<PublicStepGroupView>
    where E: TreeExpander + ?Sized
{
    let mut roots = Vec::new();
    for id in uow.list_group_step_ids(group.id)? {
        // Enlaces colgantes se omiten en las vistas.
        if let Some(step) = uow.get_step(id)? {
            roots.push(step);
        }
    }
    let expanded = expander.expand(uow, roots)?;
    Ok(PublicStepGroupView { group, steps: assemble_forest(expanded) })
}

/// Los pasos enlazados a un grupo deben existir, ser raíz y no repetirse.
fn check_group_roots(uow: &mut dyn StepUnitOfWork, step_ids: &[StepId]) -> Result<()> {
    let mut seen = HashSet::new();
    for &id in step_ids {
        if !seen.insert(id) {
            return Err(StepError::Validation(format!("paso {id} enlazado más de una vez")));
        }
        match uow.get_step(id)? {
            None => return Err(StepError::step_not_found(id)),
            Some(step) if !step.is_root() => {
                return Err(StepError::InconsistentTree(format!("paso {id} no es raíz (padre {})", step.parent_id)))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Recorre la cadena de ancestros desde `parent_id`; falla si algún ancestro
/// no existe o si la cadena vuelve a `step_id`.
fn check_parent_chain(uow: &mut dyn StepUnitOfWork, step_id: StepId, parent_id: StepId) -> Result<()> {
    let mut current = parent_id;
    let mut visited = HashSet::new();
    while current != ROOT_PARENT {
        if current == step_id || !visited.insert(current) {
            return Err(StepError::InconsistentTree(format!("mover el paso {} bajo {} crearía un ciclo",
                                                           step_id, parent_id)));
        }
        current = uow.get_step(current)?
                     .ok_or_else(|| StepError::step_not_found(current))?
                     .parent_id;
    }
    Ok(())
}
