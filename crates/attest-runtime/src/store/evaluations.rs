use std::collections::HashMap;

use attest_core::{
    CriteriaSetRef, DocumentId, Evaluation, EvaluationId, TransitionError, WorkspaceId,
};
use parking_lot::RwLock;

use super::StoreError;

/// What makes two submissions "the same job": workspace, document set
/// (order-insensitive) and the exact criteria-set version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConflictKey {
    pub workspace_id: WorkspaceId,
    pub documents: Vec<DocumentId>,
    pub criteria_set: CriteriaSetRef,
}

impl ConflictKey {
    pub fn of(evaluation: &Evaluation) -> Self {
        let mut documents = evaluation.document_ids();
        documents.sort();
        documents.dedup();
        Self {
            workspace_id: evaluation.workspace_id,
            documents,
            criteria_set: evaluation.criteria_set,
        }
    }
}

/// Evaluation records keyed by id.
#[derive(Debug, Default)]
pub struct EvaluationStore {
    evaluations: RwLock<HashMap<EvaluationId, Evaluation>>,
}

impl EvaluationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new evaluation unless a pending or running one already
    /// covers the same [`ConflictKey`].
    pub fn insert_unless_active(&self, evaluation: Evaluation) -> Result<(), StoreError> {
        let key = ConflictKey::of(&evaluation);
        let mut evaluations = self.evaluations.write();

        if let Some(existing) = evaluations
            .values()
            .find(|e| e.status.is_active() && ConflictKey::of(e) == key)
        {
            return Err(StoreError::Conflict {
                existing: existing.id,
                status: existing.status,
            });
        }

        evaluations.insert(evaluation.id, evaluation);
        Ok(())
    }

    pub fn get(&self, id: EvaluationId) -> Result<Evaluation, StoreError> {
        self.evaluations
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::EvaluationNotFound(id))
    }

    /// Apply `change` to a copy of the record and commit it only if the
    /// change succeeds. A rejected transition leaves the stored record
    /// untouched.
    pub fn update<T, F>(&self, id: EvaluationId, change: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Evaluation) -> Result<T, TransitionError>,
    {
        let mut evaluations = self.evaluations.write();
        let stored = evaluations
            .get_mut(&id)
            .ok_or(StoreError::EvaluationNotFound(id))?;

        let mut draft = stored.clone();
        let value = change(&mut draft)?;
        *stored = draft;
        Ok(value)
    }

    /// Drop a record that never made it onto the queue.
    pub fn remove(&self, id: EvaluationId) -> Option<Evaluation> {
        self.evaluations.write().remove(&id)
    }

    /// Evaluations of a workspace, oldest first.
    pub fn list(&self, workspace_id: WorkspaceId) -> Vec<Evaluation> {
        let mut evaluations: Vec<Evaluation> = self
            .evaluations
            .read()
            .values()
            .filter(|e| e.workspace_id == workspace_id)
            .cloned()
            .collect();
        evaluations.sort_by_key(|e| e.created_at);
        evaluations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{
        CriteriaSetId, DocTypeId, EvaluationStatus, NewEvaluation, OrgId, OverallOutcome,
    };
    use chrono::Utc;

    fn evaluation(workspace_id: WorkspaceId, documents: Vec<DocumentId>, set: CriteriaSetRef) -> Evaluation {
        Evaluation::new(
            NewEvaluation {
                org_id: OrgId::new(),
                workspace_id,
                doc_type_id: DocTypeId::new(),
                criteria_set: set,
                documents,
            },
            2,
            Utc::now(),
        )
        .unwrap()
    }

    fn set() -> CriteriaSetRef {
        CriteriaSetRef {
            id: CriteriaSetId::new(),
            version: 1,
        }
    }

    #[test]
    fn test_active_duplicate_conflicts_until_completed() {
        let store = EvaluationStore::new();
        let workspace = WorkspaceId::new();
        let (a, b) = (DocumentId::new(), DocumentId::new());
        let set = set();

        let first = evaluation(workspace, vec![a, b], set);
        let first_id = first.id;
        store.insert_unless_active(first).unwrap();

        // Same documents in another order still conflict.
        let err = store
            .insert_unless_active(evaluation(workspace, vec![b, a], set))
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                existing: first_id,
                status: EvaluationStatus::Pending
            }
        );

        store
            .update(first_id, |e| {
                e.start(Utc::now())?;
                e.complete(OverallOutcome::default(), Utc::now())
            })
            .unwrap();
        store
            .insert_unless_active(evaluation(workspace, vec![a, b], set))
            .unwrap();
        assert_eq!(store.list(workspace).len(), 2);
    }

    #[test]
    fn test_different_key_does_not_conflict() {
        let store = EvaluationStore::new();
        let workspace = WorkspaceId::new();
        let doc = DocumentId::new();
        store.insert_unless_active(evaluation(workspace, vec![doc], set())).unwrap();
        store.insert_unless_active(evaluation(workspace, vec![doc], set())).unwrap();
        store
            .insert_unless_active(evaluation(WorkspaceId::new(), vec![doc], set()))
            .unwrap();
    }

    #[test]
    fn test_rejected_update_leaves_record_unchanged() {
        let store = EvaluationStore::new();
        let record = evaluation(WorkspaceId::new(), vec![DocumentId::new()], set());
        let id = record.id;
        store.insert_unless_active(record).unwrap();

        let err = store
            .update(id, |e| {
                e.start(Utc::now())?;
                e.record_criterion_processed()?;
                e.record_criterion_processed()?;
                e.record_criterion_processed()
            })
            .unwrap_err();
        assert_eq!(err, StoreError::Transition(TransitionError::ProgressOverflow { total: 2 }));

        let stored = store.get(id).unwrap();
        assert_eq!(stored.status, EvaluationStatus::Pending);
        assert_eq!(stored.processed, 0);
    }

    #[test]
    fn test_failed_evaluation_stays_failed() {
        let store = EvaluationStore::new();
        let workspace = WorkspaceId::new();
        let doc = DocumentId::new();
        let set = set();

        let failed = evaluation(workspace, vec![doc], set);
        let failed_id = failed.id;
        store.insert_unless_active(failed).unwrap();
        store
            .update(failed_id, |e| {
                e.start(Utc::now())?;
                e.fail("retriever unavailable", Utc::now())
            })
            .unwrap();

        let err = store.update(failed_id, |e| e.reset()).unwrap_err();
        assert_eq!(
            err,
            StoreError::Transition(TransitionError::InvalidTransition {
                from: EvaluationStatus::Failed,
                to: EvaluationStatus::Pending
            })
        );
        assert_eq!(store.get(failed_id).unwrap().status, EvaluationStatus::Failed);

        // Retrying means a fresh evaluation with the same inputs.
        store.insert_unless_active(evaluation(workspace, vec![doc], set)).unwrap();
    }

    #[test]
    fn test_missing_evaluation() {
        let store = EvaluationStore::new();
        let id = EvaluationId::new();
        assert_eq!(store.get(id).unwrap_err(), StoreError::EvaluationNotFound(id));
        assert!(store.update(id, |_| Ok(())).is_err());
    }
}
