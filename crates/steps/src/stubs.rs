// Archivo: stubs.rs
// Propósito: repositorio en memoria para pruebas y wiring rápido.
//
// Las transacciones trabajan sobre una copia del estado y sólo la publican si
// el cierre devuelve `Ok`. El mutex del estado se mantiene durante toda la
// transacción, por lo que las escrituras quedan serializadas. Incluye
// inyección de fallos por operación para probar la atomicidad.
use crate::domain::{ElementId, GroupId, NewPublicStepGroup, NewStep, ProjectId, PublicStepGroup, Step, StepId,
                    PUBLIC_STEP_TYPE};
use crate::errors::{Result, StepError};
use crate::repository::{StepRepository, StepUnitOfWork};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Operaciones de escritura en las que se puede inyectar un fallo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InsertGroup,
    InsertStep,
    UpdateStep,
    InsertElementLink,
    InsertGroupLink,
}

/// Conteo de filas por tabla.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCounts {
    pub groups: usize,
    pub steps: usize,
    pub group_links: usize,
    pub element_links: usize,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    groups: BTreeMap<GroupId, PublicStepGroup>,
    steps: BTreeMap<StepId, Step>,
    /// Enlaces grupo -> paso raíz, en orden de inserción.
    group_links: Vec<(GroupId, StepId)>,
    element_links: Vec<(StepId, ElementId)>,
    last_group_id: GroupId,
    last_step_id: StepId,
}

/// Fallos pendientes: (operación) -> llamadas restantes antes de fallar.
#[derive(Debug, Default)]
struct FaultPlan {
    pending: HashMap<StoreOp, usize>,
}

impl FaultPlan {
    fn check(&mut self, op: StoreOp) -> Result<()> {
        if let Some(left) = self.pending.get_mut(&op) {
            if *left <= 1 {
                self.pending.remove(&op);
                return Err(StepError::Storage(format!("fallo inyectado en {:?}", op)));
            }
            *left -= 1;
        }
        Ok(())
    }
}

/// Repositorio en memoria (no durable).
pub struct InMemoryStepRepository {
    state: Mutex<MemoryState>,
    faults: Mutex<FaultPlan>,
}

impl InMemoryStepRepository {
    /// Crea un repositorio vacío.
    pub fn new() -> Self {
        Self { state: Mutex::new(MemoryState::default()),
               faults: Mutex::new(FaultPlan::default()) }
    }

    /// Programa un fallo en la llamada número `nth` (desde 1) a `op`.
    pub fn fail_on(&self, op: StoreOp, nth: usize) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .insert(op, nth.max(1));
    }

    /// Número de filas en cada tabla.
    pub fn counts(&self) -> Result<StoreCounts> {
        let state = lock(&self.state)?;
        Ok(StoreCounts { groups: state.groups.len(),
                         steps: state.steps.len(),
                         group_links: state.group_links.len(),
                         element_links: state.element_links.len() })
    }

    /// Todos los pasos, por identidad.
    pub fn all_steps(&self) -> Result<Vec<Step>> {
        Ok(lock(&self.state)?.steps.values().cloned().collect())
    }
}

impl Default for InMemoryStepRepository {
    fn default() -> Self {
        Self::new()
    }
}

/// Mapea un `Mutex::lock()` envenenado a `StepError::Storage`.
fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|e| StepError::Storage(format!("mutex poisoned: {:?}", e)))
}

impl StepRepository for InMemoryStepRepository {
    fn transaction<T, F>(&self, f: F) -> Result<T>
        where F: FnOnce(&mut dyn StepUnitOfWork) -> Result<T>
    {
        let mut state = lock(&self.state)?;
        let mut faults = lock(&self.faults)?;
        let mut uow = InMemoryUnitOfWork { state: state.clone(), faults: &mut *faults };
        let out = f(&mut uow)?;
        *state = uow.state;
        Ok(out)
    }
}

/// Unidad de trabajo sobre una copia privada del estado.
struct InMemoryUnitOfWork<'a> {
    state: MemoryState,
    faults: &'a mut FaultPlan,
}

impl StepUnitOfWork for InMemoryUnitOfWork<'_> {
    fn get_group(&mut self, id: GroupId) -> Result<Option<PublicStepGroup>> {
        Ok(self.state.groups.get(&id).cloned())
    }

    fn insert_group(&mut self, group: &NewPublicStepGroup) -> Result<GroupId> {
        self.faults.check(StoreOp::InsertGroup)?;
        self.state.last_group_id += 1;
        let id = self.state.last_group_id;
        self.state.groups.insert(id,
                                 PublicStepGroup { id,
                                                   name: group.name.clone(),
                                                   project_id: group.project_id,
                                                   platform: group.platform });
        Ok(id)
    }

    fn update_group(&mut self, group: &PublicStepGroup) -> Result<bool> {
        match self.state.groups.get_mut(&group.id) {
            Some(slot) => {
                *slot = group.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_group_record(&mut self, id: GroupId) -> Result<bool> {
        Ok(self.state.groups.remove(&id).is_some())
    }

    fn list_groups_by_project(&mut self, project_id: ProjectId) -> Result<Vec<PublicStepGroup>> {
        Ok(self.state
               .groups
               .values()
               .rev()
               .filter(|g| g.project_id == project_id)
               .cloned()
               .collect())
    }

    fn get_step(&mut self, id: StepId) -> Result<Option<Step>> {
        Ok(self.state.steps.get(&id).cloned())
    }

    fn insert_step(&mut self, step: &NewStep) -> Result<StepId> {
        self.faults.check(StoreOp::InsertStep)?;
        self.state.last_step_id += 1;
        let id = self.state.last_step_id;
        self.state.steps.insert(id, step.clone().with_id(id));
        Ok(id)
    }

    fn update_step(&mut self, step: &Step) -> Result<bool> {
        self.faults.check(StoreOp::UpdateStep)?;
        match self.state.steps.get_mut(&step.id) {
            Some(slot) => {
                *slot = step.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_step(&mut self, id: StepId) -> Result<bool> {
        Ok(self.state.steps.remove(&id).is_some())
    }

    fn list_steps_by_sort_desc(&mut self) -> Result<Vec<Step>> {
        let mut all: Vec<Step> = self.state.steps.values().cloned().collect();
        all.sort_by(|a, b| b.sort.cmp(&a.sort).then(b.id.cmp(&a.id)));
        Ok(all)
    }

    fn list_children(&mut self, parent_id: StepId) -> Result<Vec<Step>> {
        let mut kids: Vec<Step> = self.state
                                      .steps
                                      .values()
                                      .filter(|s| s.parent_id == parent_id)
                                      .cloned()
                                      .collect();
        kids.sort_by(|a, b| a.sort.cmp(&b.sort).then(a.id.cmp(&b.id)));
        Ok(kids)
    }

    fn list_steps_referencing_group(&mut self, group_id: GroupId) -> Result<Vec<StepId>> {
        let text = group_id.to_string();
        Ok(self.state
               .steps
               .values()
               .filter(|s| s.step_type == PUBLIC_STEP_TYPE && s.text == text)
               .map(|s| s.id)
               .collect())
    }

    fn list_group_step_ids(&mut self, group_id: GroupId) -> Result<Vec<StepId>> {
        Ok(self.state
               .group_links
               .iter()
               .filter(|(g, _)| *g == group_id)
               .map(|(_, s)| *s)
               .collect())
    }

    fn insert_group_link(&mut self, group_id: GroupId, step_id: StepId) -> Result<()> {
        self.faults.check(StoreOp::InsertGroupLink)?;
        self.state.group_links.push((group_id, step_id));
        Ok(())
    }

    fn list_groups_for_step(&mut self, step_id: StepId) -> Result<Vec<GroupId>> {
        let mut groups: Vec<GroupId> = self.state
                                           .group_links
                                           .iter()
                                           .filter(|(_, s)| *s == step_id)
                                           .map(|(g, _)| *g)
                                           .collect();
        groups.sort_unstable();
        groups.dedup();
        Ok(groups)
    }

    fn delete_group_links(&mut self, group_id: GroupId) -> Result<usize> {
        let before = self.state.group_links.len();
        self.state.group_links.retain(|(g, _)| *g != group_id);
        Ok(before - self.state.group_links.len())
    }

    fn list_step_elements(&mut self, step_id: StepId) -> Result<Vec<ElementId>> {
        Ok(self.state
               .element_links
               .iter()
               .filter(|(s, _)| *s == step_id)
               .map(|(_, e)| *e)
               .collect())
    }

    fn insert_element_link(&mut self, step_id: StepId, element_id: ElementId) -> Result<()> {
        self.faults.check(StoreOp::InsertElementLink)?;
        self.state.element_links.push((step_id, element_id));
        Ok(())
    }

    fn delete_step_elements(&mut self, step_id: StepId) -> Result<usize> {
        let before = self.state.element_links.len();
        self.state.element_links.retain(|(s, _)| *s != step_id);
        Ok(before - self.state.element_links.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_transaction_leaves_no_rows() {
        let repo = InMemoryStepRepository::new();
        let res: Result<()> = repo.transaction(|uow| {
                                      uow.insert_group(&NewPublicStepGroup { name: "g".into(), project_id: 1, platform: 1 })?;
                                      uow.insert_step(&NewStep::default())?;
                                      Err(StepError::Storage("boom".into()))
                                  });
        assert!(res.is_err());
        assert_eq!(repo.counts().unwrap(), StoreCounts::default());
    }

    #[test]
    fn fault_fires_on_nth_call_only_once() {
        let repo = InMemoryStepRepository::new();
        repo.fail_on(StoreOp::InsertStep, 2);
        let res = repo.transaction(|uow| {
                          uow.insert_step(&NewStep::default())?;
                          uow.insert_step(&NewStep::default())
                      });
        assert!(matches!(res, Err(StepError::Storage(_))));
        let id = repo.transaction(|uow| uow.insert_step(&NewStep::default())).unwrap();
        assert_eq!(id, 1);
        assert_eq!(repo.counts().unwrap().steps, 1);
    }

    #[test]
    fn mutex_poisoning_returns_error() {
        use std::sync::Arc;
        use std::thread;

        let repo = Arc::new(InMemoryStepRepository::new());
        let r2 = repo.clone();
        let handle = thread::spawn(move || {
            let _g = r2.state.lock().unwrap();
            panic!("force poison");
        });
        let _ = handle.join();

        match repo.counts() {
            Err(StepError::Storage(_)) => (),
            other => panic!("expected Storage error, got {:?}", other),
        }
    }

    #[test]
    fn cascade_removes_descendants_and_their_elements() {
        let repo = InMemoryStepRepository::new();
        repo.transaction(|uow| {
                let root = uow.insert_step(&NewStep::default())?;
                let child = uow.insert_step(&NewStep { parent_id: root, ..Default::default() })?;
                uow.insert_step(&NewStep { parent_id: child, ..Default::default() })?;
                uow.insert_element_link(child, 900)?;
                assert_eq!(uow.delete_step_cascade(root)?, 3);
                Ok(())
            })
            .unwrap();
        let counts = repo.counts().unwrap();
        assert_eq!(counts.steps, 0);
        assert_eq!(counts.element_links, 0);
    }
}
