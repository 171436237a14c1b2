use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use steps::{GroupDraft, NewStep, PublicStepsService, StepError, StepId, StepNode, StepRepository, StepUnitOfWork,
            PUBLIC_STEP_TYPE};
use steps_persistence::DieselStepRepository;
use uuid::Uuid;

/// Base temporal que se borra al terminar el test.
struct TempDb {
  path: PathBuf,
  repo: Arc<DieselStepRepository>,
}

impl TempDb {
  fn new() -> Self {
    let path = std::env::temp_dir().join(format!("steps_it_{}.db", Uuid::new_v4()));
    let repo = DieselStepRepository::new(path.to_str().expect("utf8 path")).expect("open sqlite");
    Self { path, repo: Arc::new(repo) }
  }

  fn service(&self) -> PublicStepsService<DieselStepRepository> {
    PublicStepsService::new(self.repo.clone())
  }
}

impl Drop for TempDb {
  fn drop(&mut self) {
    for suffix in ["", "-wal", "-shm"] {
      let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
    }
  }
}

fn step(svc: &PublicStepsService<DieselStepRepository>, parent: StepId, sort: i64, text: &str, elements: &[i64])
        -> StepId {
  svc.create_step(NewStep { parent_id: parent,
                            sort,
                            step_type: "click".into(),
                            text: text.into(),
                            content: format!("{{\"target\":\"{text}\"}}"),
                            ..Default::default() },
                  elements)
     .expect("create step")
     .id
}

fn group(svc: &PublicStepsService<DieselStepRepository>, name: &str, roots: Vec<StepId>) -> i64 {
  svc.save_group(GroupDraft { id: None, name: name.into(), project_id: 3, platform: 1, step_ids: roots })
     .expect("save group")
     .id
}

fn texts(nodes: &[StepNode], out: &mut Vec<(String, Vec<i64>, usize)>) {
  for n in nodes {
    out.push((n.step.text.clone(), n.elements.clone(), n.children.len()));
    texts(&n.children, out);
  }
}

#[test]
fn duplicate_persists_an_isomorphic_copy() {
  let db = TempDb::new();
  let svc = db.service();
  let a = step(&svc, 0, 10, "A", &[11, 12]);
  let b = step(&svc, a, 20, "B", &[13]);
  step(&svc, b, 30, "C", &[]);
  step(&svc, a, 40, "D", &[14]);
  let r2 = step(&svc, 0, 50, "R2", &[]);
  let g = group(&svc, "Login", vec![a, r2]);

  let report = svc.duplicate_with_report(g).unwrap();
  assert_eq!(report.cloned_steps.len(), 5);
  assert_eq!(report.element_links, 4);

  let src = svc.find_by_id(g).unwrap().unwrap();
  let dst = svc.find_by_id(report.new_group_id).unwrap().unwrap();
  assert_eq!(dst.group.name, "Login_copy");
  assert_eq!(dst.group.project_id, 3);
  let (mut s, mut d) = (Vec::new(), Vec::new());
  texts(&src.steps, &mut s);
  texts(&dst.steps, &mut d);
  assert_eq!(s, d);

  let old: HashSet<StepId> = report.cloned_steps.iter().map(|(o, _)| *o).collect();
  assert!(report.cloned_steps.iter().all(|(_, n)| !old.contains(n)));
  let linked = db.repo.read(|uow| uow.list_group_step_ids(report.new_group_id)).unwrap();
  assert_eq!(linked, report.root_step_ids);
  assert!(dst.steps.iter().all(|n| n.step.sort > 50));
}

#[test]
fn failed_transaction_leaves_database_untouched() {
  let db = TempDb::new();
  let svc = db.service();
  let a = step(&svc, 0, 10, "A", &[1]);
  let b = step(&svc, a, 20, "B", &[]);
  let bad = group(&svc, "bad", vec![]);
  db.repo.transaction(|uow| uow.insert_group_link(bad, b)).unwrap();
  let before = db.repo.table_counts().unwrap();

  assert!(matches!(svc.duplicate(bad), Err(StepError::InconsistentTree(_))));
  assert_eq!(db.repo.table_counts().unwrap(), before);

  let res: steps::Result<()> = db.repo.transaction(|uow| {
                                 let id = uow.insert_step(&NewStep { sort: 99, ..Default::default() })?;
                                 uow.insert_element_link(id, 5)?;
                                 Err(StepError::Storage("forced".into()))
                               });
  assert!(res.is_err());
  assert_eq!(db.repo.table_counts().unwrap(), before);
}

#[test]
fn delete_removes_tree_links_and_case_references() {
  let db = TempDb::new();
  let svc = db.service();
  let a = step(&svc, 0, 10, "A", &[1]);
  step(&svc, a, 20, "B", &[2]);
  let keep = step(&svc, 0, 30, "keep", &[3]);
  let g = group(&svc, "doomed", vec![a]);
  svc.create_step(NewStep { case_id: 8, step_type: PUBLIC_STEP_TYPE.into(), text: g.to_string(), ..Default::default() },
                  &[])
     .unwrap();

  assert!(svc.delete(g).unwrap());
  let counts = db.repo.table_counts().unwrap();
  assert_eq!((counts.groups, counts.steps, counts.group_links, counts.element_links), (0, 1, 0, 1));
  assert!(db.repo.read(|uow| uow.get_step(keep)).unwrap().is_some());
  assert!(!svc.delete(g).unwrap());
}

#[test]
fn concurrent_duplicates_get_disjoint_sort_blocks() {
  let db = TempDb::new();
  let svc = Arc::new(db.service());
  let a = step(&svc, 0, 10, "A", &[]);
  step(&svc, a, 20, "B", &[]);
  let g = group(&svc, "race", vec![a]);

  let handles: Vec<_> = (0..4).map(|_| {
                                let svc = svc.clone();
                                std::thread::spawn(move || svc.duplicate_with_report(g))
                              })
                              .collect();
  let mut copies = Vec::new();
  for h in handles {
    copies.push(h.join().expect("thread").expect("duplicate"));
  }

  let mut sorts = HashSet::new();
  for report in &copies {
    let view = svc.find_by_id(report.new_group_id).unwrap().unwrap();
    let root = &view.steps[0];
    assert!(sorts.insert(root.step.sort));
    assert!(sorts.insert(root.children[0].step.sort));
  }
  assert_eq!(db.repo.table_counts().unwrap().steps, 2 + 2 * copies.len());
}

#[test]
fn shared_root_survives_deleting_one_of_its_groups() {
  let db = TempDb::new();
  let svc = db.service();
  let r = step(&svc, 0, 10, "R", &[1]);
  step(&svc, r, 20, "child", &[2]);
  let first = group(&svc, "first", vec![r]);
  let second = group(&svc, "second", vec![r]);

  assert!(svc.delete(first).unwrap());
  let counts = db.repo.table_counts().unwrap();
  assert_eq!((counts.groups, counts.steps, counts.group_links, counts.element_links), (1, 2, 1, 2));
  assert_eq!(db.repo.read(|uow| uow.list_group_step_ids(second)).unwrap(), vec![r]);
  assert_eq!(svc.duplicate_with_report(second).unwrap().cloned_steps.len(), 2);

  assert!(svc.delete(second).unwrap());
  assert!(db.repo.read(|uow| uow.get_step(r)).unwrap().is_none());
}

#[test]
fn save_group_refuses_child_steps_as_roots() {
  let db = TempDb::new();
  let svc = db.service();
  let r = step(&svc, 0, 10, "R", &[]);
  let c = step(&svc, r, 20, "C", &[]);
  let res = svc.save_group(GroupDraft { id: None, name: "mixed".into(), project_id: 3, platform: 1, step_ids: vec![r, c] });
  assert!(matches!(res, Err(StepError::InconsistentTree(_))));
  assert_eq!(db.repo.table_counts().unwrap().groups, 0);
  assert!(svc.list_by_project(3).unwrap().is_empty());
}
