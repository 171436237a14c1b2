// Archivo: repository.rs
// Propósito: definir el contrato de persistencia de pasos, grupos públicos y
// sus enlaces (`StepUnitOfWork`) y el límite transaccional que lo envuelve
// (`StepRepository`). Lo implementan el repositorio en memoria (`stubs`) y el
// repositorio Diesel de `steps-persistence`.
use crate::domain::{ElementId, GroupId, NewPublicStepGroup, NewStep, ProjectId, PublicStepGroup, Step, StepId};
use crate::errors::Result;
use log::debug;

/// Operaciones de los stores (pasos, grupos, enlaces grupo→raíz y
/// paso→elemento) disponibles dentro de una transacción.
///
/// Todas las operaciones de una misma unidad de trabajo se confirman o se
/// revierten juntas. Los métodos con implementación por defecto se expresan
/// sobre las primitivas; los backends pueden sobreescribirlos con consultas
/// más directas.
pub trait StepUnitOfWork {
    // --- grupos
    fn get_group(&mut self, id: GroupId) -> Result<Option<PublicStepGroup>>;
    /// Inserta un grupo y devuelve la identidad asignada por el store.
    fn insert_group(&mut self, group: &NewPublicStepGroup) -> Result<GroupId>;
    /// Devuelve `false` si el grupo no existe.
    fn update_group(&mut self, group: &PublicStepGroup) -> Result<bool>;
    /// Devuelve `false` si no había fila que borrar.
    fn delete_group_record(&mut self, id: GroupId) -> Result<bool>;
    /// Grupos del proyecto ordenados por identidad descendente.
    fn list_groups_by_project(&mut self, project_id: ProjectId) -> Result<Vec<PublicStepGroup>>;

    // --- pasos
    fn get_step(&mut self, id: StepId) -> Result<Option<Step>>;
    /// Inserta un paso y devuelve la identidad asignada por el store.
    fn insert_step(&mut self, step: &NewStep) -> Result<StepId>;
    /// Devuelve `false` si el paso no existe.
    fn update_step(&mut self, step: &Step) -> Result<bool>;
    /// Borra sólo la fila del paso.
    fn delete_step(&mut self, id: StepId) -> Result<bool>;
    /// Todos los pasos ordenados por `sort` descendente.
    fn list_steps_by_sort_desc(&mut self) -> Result<Vec<Step>>;
    /// Hijos directos de `parent_id` ordenados por `sort` ascendente (y por
    /// identidad para empates).
    fn list_children(&mut self, parent_id: StepId) -> Result<Vec<Step>>;
    /// Pasos de caso que invocan el grupo (`step_type = publicStep`,
    /// `text = group_id`).
    fn list_steps_referencing_group(&mut self, group_id: GroupId) -> Result<Vec<StepId>>;

    // --- enlaces grupo → paso raíz
    /// Pasos enlazados al grupo, en orden de enlace.
    fn list_group_step_ids(&mut self, group_id: GroupId) -> Result<Vec<StepId>>;
    fn insert_group_link(&mut self, group_id: GroupId, step_id: StepId) -> Result<()>;
    /// Grupos que enlazan el paso, sin repetidos.
    fn list_groups_for_step(&mut self, step_id: StepId) -> Result<Vec<GroupId>>;
    /// Devuelve el número de enlaces borrados.
    fn delete_group_links(&mut self, group_id: GroupId) -> Result<usize>;

    // --- enlaces paso → elemento
    fn list_step_elements(&mut self, step_id: StepId) -> Result<Vec<ElementId>>;
    fn insert_element_link(&mut self, step_id: StepId, element_id: ElementId) -> Result<()>;
    fn delete_step_elements(&mut self, step_id: StepId) -> Result<usize>;

    /// Primera clave de un bloque de `count` claves `sort` contiguas, todas
    /// mayores que cualquier `sort` existente. Debe llamarse dentro de la
    /// transacción de escritura que inserta los pasos del bloque.
    fn next_sort_block(&mut self, count: usize) -> Result<i64> {
        let first = self.list_steps_by_sort_desc()?.first().map(|s| s.sort).unwrap_or(0) + 1;
        debug!("next_sort_block count={count} range={first}..{}", first + count as i64);
        Ok(first)
    }

    /// Borra un paso, todos sus descendientes y los enlaces a elementos de
    /// cada uno. Devuelve el número de pasos borrados.
    fn delete_step_cascade(&mut self, id: StepId) -> Result<usize> {
        let mut pending = vec![id];
        let mut deleted = 0;
        while let Some(current) = pending.pop() {
            pending.extend(self.list_children(current)?.into_iter().map(|c| c.id));
            self.delete_step_elements(current)?;
            if self.delete_step(current)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Borra los pasos de caso que invocan el grupo (con sus descendientes).
    fn delete_steps_referencing_group(&mut self, group_id: GroupId) -> Result<usize> {
        let mut deleted = 0;
        for id in self.list_steps_referencing_group(group_id)? {
            deleted += self.delete_step_cascade(id)?;
        }
        Ok(deleted)
    }
}

/// Límite transaccional explícito sobre los stores.
///
/// `transaction` ejecuta `f` y confirma si devuelve `Ok`; si devuelve `Err`
/// (o el backend falla) no queda ninguna fila escrita por `f`. Las
/// implementaciones serializan las transacciones de escritura entre sí.
pub trait StepRepository: Send + Sync {
    fn transaction<T, F>(&self, f: F) -> Result<T>
        where F: FnOnce(&mut dyn StepUnitOfWork) -> Result<T>;

    /// Unidad de trabajo de sólo lectura. Por defecto reutiliza `transaction`.
    fn read<T, F>(&self, f: F) -> Result<T>
        where F: FnOnce(&mut dyn StepUnitOfWork) -> Result<T>
    {
        self.transaction(f)
    }
}
