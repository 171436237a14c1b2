// Archivo: expansion.rs
// Propósito: expansión de bosques de pasos (raíces -> lista ordenada con
// todos los descendientes) y reconstrucción de la vista en árbol.
use crate::domain::{ExpandedStep, Step, StepId, StepNode};
use crate::errors::{Result, StepError};
use crate::repository::StepUnitOfWork;
use std::collections::{HashMap, HashSet};

/// Servicio de expansión de árboles.
///
/// Contrato:
/// - devuelve cada paso alcanzable desde `roots` exactamente una vez;
/// - un padre aparece siempre antes que sus descendientes;
/// - los hermanos conservan su orden original;
/// - el resultado es determinista para una misma foto del store.
pub trait TreeExpander: Send + Sync {
    fn expand(&self, uow: &mut dyn StepUnitOfWork, roots: Vec<Step>) -> Result<Vec<ExpandedStep>>;
}

/// Expansión en preorden: raíz, luego cada hijo (por `sort` ascendente) con
/// su subárbol completo.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreorderExpander;

impl TreeExpander for PreorderExpander {
    fn expand(&self, uow: &mut dyn StepUnitOfWork, roots: Vec<Step>) -> Result<Vec<ExpandedStep>> {
        let mut out = Vec::new();
        let mut seen: HashSet<StepId> = HashSet::new();
        // Pila con los hermanos invertidos para visitar en orden.
        let mut stack: Vec<Step> = roots.into_iter().rev().collect();
        while let Some(step) = stack.pop() {
            if !seen.insert(step.id) {
                return Err(StepError::InconsistentTree(format!("paso {} alcanzado más de una vez", step.id)));
            }
            let children = uow.list_children(step.id)?;
            let elements = uow.list_step_elements(step.id)?;
            stack.extend(children.into_iter().rev());
            out.push(ExpandedStep { step, elements });
        }
        Ok(out)
    }
}

/// Reconstruye el bosque a partir de una expansión. Son raíces del bosque
/// los pasos cuyo padre no está en la lista; los hijos conservan el orden de
/// la lista.
pub fn assemble_forest(expanded: Vec<ExpandedStep>) -> Vec<StepNode> {
    let ids: HashSet<StepId> = expanded.iter().map(|e| e.step.id).collect();
    let mut children: HashMap<StepId, Vec<usize>> = HashMap::new();
    let mut tops = Vec::new();
    for (idx, e) in expanded.iter().enumerate() {
        if !e.step.is_root() && ids.contains(&e.step.parent_id) {
            children.entry(e.step.parent_id).or_default().push(idx);
        } else {
            tops.push(idx);
        }
    }
    let mut slots: Vec<Option<ExpandedStep>> = expanded.into_iter().map(Some).collect();
    tops.into_iter()
        .filter_map(|idx| build_node(idx, &mut slots, &children))
        .collect()
}

fn build_node(idx: usize, slots: &mut [Option<ExpandedStep>], children: &HashMap<StepId, Vec<usize>>) -> Option<StepNode> {
    let ExpandedStep { step, elements } = slots.get_mut(idx)?.take()?;
    let kids = children.get(&step.id)
                       .map(|list| list.iter().filter_map(|&c| build_node(c, slots, children)).collect())
                       .unwrap_or_default();
    Some(StepNode { step, elements, children: kids })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewStep;

    fn expanded(id: StepId, parent: StepId) -> ExpandedStep {
        ExpandedStep { step: NewStep { parent_id: parent, ..Default::default() }.with_id(id), elements: vec![] }
    }

    #[test]
    fn assemble_nests_children_under_parents() {
        let forest = assemble_forest(vec![expanded(1, 0), expanded(2, 1), expanded(3, 2), expanded(4, 1), expanded(5, 0)]);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].step.id, 1);
        assert_eq!(forest[0].children.iter().map(|c| c.step.id).collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(forest[0].children[0].children[0].step.id, 3);
        assert_eq!(forest[0].subtree_size(), 4);
        assert_eq!(forest[1].step.id, 5);
    }

    #[test]
    fn assemble_treats_unknown_parent_as_top_level() {
        let forest = assemble_forest(vec![expanded(8, 77), expanded(9, 8)]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].step.id, 8);
        assert_eq!(forest[0].children[0].step.id, 9);
    }
}
