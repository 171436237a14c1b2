// Archivo: domain.rs
// Propósito: tipos de dominio de pasos, grupos públicos y vistas derivadas.
use serde::{Deserialize, Serialize};

pub type StepId = i64;
pub type GroupId = i64;
pub type ElementId = i64;
pub type ProjectId = i64;

/// `parent_id` de un paso raíz.
pub const ROOT_PARENT: StepId = 0;
/// `case_id` de un paso que no pertenece a ningún caso (paso público).
pub const NO_CASE: i64 = 0;
/// `step_type` de un paso de caso que invoca un grupo público; su `text`
/// guarda el id del grupo.
pub const PUBLIC_STEP_TYPE: &str = "publicStep";
/// Sufijo que recibe el nombre de un grupo duplicado.
pub const COPY_SUFFIX: &str = "_copy";

/// Grupo público: conjunto con nombre de árboles de pasos reutilizables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicStepGroup {
    pub id: GroupId,
    pub name: String,
    pub project_id: ProjectId,
    pub platform: i32,
}

/// Datos para insertar un grupo; la identidad la asigna el store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPublicStepGroup {
    pub name: String,
    pub project_id: ProjectId,
    pub platform: i32,
}

impl PublicStepGroup {
    /// Registro para el grupo copia: mismo proyecto y plataforma, nombre con
    /// sufijo `_copy`.
    pub fn copy_draft(&self) -> NewPublicStepGroup {
        NewPublicStepGroup { name: format!("{}{}", self.name, COPY_SUFFIX),
                             project_id: self.project_id,
                             platform: self.platform }
    }
}

/// Paso (acción de automatización). Los campos de contenido son opacos para
/// el motor de duplicación.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub parent_id: StepId,
    pub case_id: i64,
    pub sort: i64,
    pub platform: i32,
    pub step_type: String,
    pub text: String,
    pub content: String,
    pub error: i32,
    pub condition_type: i32,
    pub disabled: i32,
}

impl Step {
    pub fn is_root(&self) -> bool {
        self.parent_id == ROOT_PARENT
    }

    /// Copia sin identidad, para reinsertar con otro padre y otro `sort`.
    /// Siempre queda como paso público (`case_id = 0`).
    pub fn to_clone_draft(&self, parent_id: StepId, sort: i64) -> NewStep {
        NewStep { parent_id,
                  case_id: NO_CASE,
                  sort,
                  platform: self.platform,
                  step_type: self.step_type.clone(),
                  text: self.text.clone(),
                  content: self.content.clone(),
                  error: self.error,
                  condition_type: self.condition_type,
                  disabled: self.disabled }
    }
}

/// Paso pendiente de inserción.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewStep {
    pub parent_id: StepId,
    pub case_id: i64,
    pub sort: i64,
    pub platform: i32,
    pub step_type: String,
    pub text: String,
    pub content: String,
    pub error: i32,
    pub condition_type: i32,
    pub disabled: i32,
}

impl NewStep {
    pub fn with_id(self, id: StepId) -> Step {
        Step { id,
               parent_id: self.parent_id,
               case_id: self.case_id,
               sort: self.sort,
               platform: self.platform,
               step_type: self.step_type,
               text: self.text,
               content: self.content,
               error: self.error,
               condition_type: self.condition_type,
               disabled: self.disabled }
    }
}

/// Paso producido por la expansión de árboles junto a sus elementos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandedStep {
    pub step: Step,
    pub elements: Vec<ElementId>,
}

/// Nodo de la vista en árbol de un grupo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepNode {
    pub step: Step,
    pub elements: Vec<ElementId>,
    pub children: Vec<StepNode>,
}

impl StepNode {
    /// Número de nodos del subárbol (incluido este).
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(StepNode::subtree_size).sum::<usize>()
    }
}

/// Grupo con su bosque de pasos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicStepGroupView {
    pub group: PublicStepGroup,
    pub steps: Vec<StepNode>,
}

impl PublicStepGroupView {
    pub fn step_count(&self) -> usize {
        self.steps.iter().map(StepNode::subtree_size).sum()
    }
}

/// Proyección ligera usada por los selectores (id + nombre).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: GroupId,
    pub name: String,
}

/// Entrada de `save_group`: sin `id` crea, con `id` actualiza. `step_ids`
/// son los pasos raíz que quedarán enlazados, en orden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDraft {
    pub id: Option<GroupId>,
    pub name: String,
    pub project_id: ProjectId,
    pub platform: i32,
    pub step_ids: Vec<StepId>,
}

/// Resultado detallado de una duplicación.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicationReport {
    pub source_group_id: GroupId,
    pub new_group_id: GroupId,
    /// Pares (paso original, paso clonado) en orden de inserción.
    pub cloned_steps: Vec<(StepId, StepId)>,
    /// Pasos raíz clonados enlazados al grupo nuevo.
    pub root_step_ids: Vec<StepId>,
    pub element_links: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_draft_appends_suffix_and_keeps_scope() {
        let g = PublicStepGroup { id: 5, name: "Smoke".into(), project_id: 9, platform: 1 };
        let draft = g.copy_draft();
        assert_eq!(draft.name, "Smoke_copy");
        assert_eq!(draft.project_id, 9);
        assert_eq!(draft.platform, 1);
    }

    #[test]
    fn clone_draft_drops_case_ownership() {
        let step = NewStep { case_id: 42, text: "click".into(), ..Default::default() }.with_id(7);
        let draft = step.to_clone_draft(3, 100);
        assert_eq!(draft.case_id, NO_CASE);
        assert_eq!(draft.parent_id, 3);
        assert_eq!(draft.sort, 100);
        assert_eq!(draft.text, "click");
    }
}
