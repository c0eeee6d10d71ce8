//! Document types and versioned criteria sets.
//!
//! A criteria set is identified by a lineage id plus a version number.
//! Once a version is referenced by an evaluation it is locked: in-place
//! edits are rejected and revisions produce the next version instead.

mod import;

pub use import::{parse_criteria_csv, ImportError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use thiserror::Error;

use crate::types::{CriteriaSetId, CriterionItemId, DocTypeId, OrgId};

const MAX_NAME_LEN: usize = 255;

/// Errors from catalog operations.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("A document type named '{0}' already exists in this organization")]
    DuplicateName(String),

    #[error("Document type not found: {0}")]
    DocTypeNotFound(DocTypeId),

    #[error("Document type is inactive: {0}")]
    DocTypeInactive(DocTypeId),

    #[error("Document type {0} has referenced criteria and cannot be deleted")]
    DocTypeInUse(DocTypeId),

    #[error("Criteria set not found: {id} v{version}")]
    CriteriaSetNotFound { id: CriteriaSetId, version: u32 },

    #[error("Criteria set must contain at least one item")]
    EmptyCriteriaSet,

    #[error("Criterion item is missing {field} (item {index})")]
    MissingField { index: usize, field: &'static str },

    #[error("Duplicate criterion external id: {0}")]
    DuplicateExternalId(String),

    #[error("Criterion '{external_id}' has invalid weight {weight}")]
    InvalidWeight { external_id: String, weight: f64 },

    #[error("Criteria set {id} v{version} is referenced by an evaluation and cannot be modified in place")]
    VersionLocked { id: CriteriaSetId, version: u32 },

    #[error("Import rejected: {0}")]
    Import(#[from] ImportError),
}

/// Organization-scoped category of documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocType {
    pub id: DocTypeId,
    pub org_id: OrgId,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One evaluable requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionItem {
    pub id: CriterionItemId,

    /// Stable identifier from the source framework (e.g., "AC-2")
    pub external_id: String,

    pub requirement: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub weight: Option<f64>,
}

/// Item input for creating or revising a criteria set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCriterionItem {
    pub external_id: String,
    pub requirement: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
}

impl NewCriterionItem {
    pub fn new(external_id: impl Into<String>, requirement: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            requirement: requirement.into(),
            ..Default::default()
        }
    }

    pub fn weighted(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Where an imported set came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProvenance {
    pub file_name: String,
    pub row_count: usize,
    pub imported_at: DateTime<Utc>,
}

/// One version of a criteria set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriteriaSet {
    pub id: CriteriaSetId,
    pub version: u32,
    pub doc_type_id: DocTypeId,
    pub name: String,
    pub weighted: bool,
    pub items: Vec<CriterionItem>,
    pub provenance: Option<ImportProvenance>,

    /// Set once an evaluation references this version
    pub locked: bool,

    pub created_at: DateTime<Utc>,
}

impl CriteriaSet {
    pub fn reference(&self) -> CriteriaSetRef {
        CriteriaSetRef {
            id: self.id,
            version: self.version,
        }
    }
}

/// Points at one exact criteria set version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CriteriaSetRef {
    pub id: CriteriaSetId,
    pub version: u32,
}

/// Input for creating a criteria set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCriteriaSet {
    pub doc_type_id: DocTypeId,
    pub name: String,
    pub weighted: bool,
    pub items: Vec<NewCriterionItem>,
}

/// Non-fatal notes attached to a catalog write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum CatalogWarning {
    /// Weighted scoring was requested but some items carry no weight
    WeightingDisabled { unweighted_items: Vec<String> },

    /// The edited version was locked, so a new version was created
    NewVersionCreated { previous_version: u32 },
}

/// Result of creating or revising a criteria set.
#[derive(Debug, Clone, PartialEq)]
pub struct CriteriaSetWrite {
    pub set: CriteriaSet,
    pub warnings: Vec<CatalogWarning>,
}

/// In-memory catalog of doc types and criteria set versions.
#[derive(Debug, Clone, Default)]
pub struct CriteriaCatalog {
    doc_types: BTreeMap<DocTypeId, DocType>,
    /// Versions per lineage, ascending
    sets: BTreeMap<CriteriaSetId, Vec<CriteriaSet>>,
}

impl CriteriaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- document types ----

    pub fn create_doc_type(
        &mut self,
        org_id: OrgId,
        name: &str,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DocType, CatalogError> {
        let name = validate_name(name)?;
        self.ensure_unique_name(org_id, &name, None)?;

        let doc_type = DocType {
            id: DocTypeId::new(),
            org_id,
            name,
            description,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.doc_types.insert(doc_type.id, doc_type.clone());
        tracing::info!(doc_type = %doc_type.id, org = %org_id, "Document type created");
        Ok(doc_type)
    }

    pub fn update_doc_type(
        &mut self,
        id: DocTypeId,
        name: &str,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DocType, CatalogError> {
        let name = validate_name(name)?;
        let org_id = self.doc_type(id)?.org_id;
        self.ensure_unique_name(org_id, &name, Some(id))?;

        let doc_type = self
            .doc_types
            .get_mut(&id)
            .ok_or(CatalogError::DocTypeNotFound(id))?;
        doc_type.name = name;
        doc_type.description = description;
        doc_type.updated_at = now;
        Ok(doc_type.clone())
    }

    /// Soft (de)activation. Inactive types accept no new evaluations.
    pub fn set_doc_type_active(
        &mut self,
        id: DocTypeId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<DocType, CatalogError> {
        let doc_type = self
            .doc_types
            .get_mut(&id)
            .ok_or(CatalogError::DocTypeNotFound(id))?;
        doc_type.active = active;
        doc_type.updated_at = now;
        Ok(doc_type.clone())
    }

    /// Hard delete; only allowed while no criteria version of the type is
    /// referenced by an evaluation.
    pub fn delete_doc_type(&mut self, id: DocTypeId) -> Result<DocType, CatalogError> {
        self.doc_type(id)?;
        let referenced = self
            .sets
            .values()
            .flatten()
            .any(|s| s.doc_type_id == id && s.locked);
        if referenced {
            return Err(CatalogError::DocTypeInUse(id));
        }

        self.sets
            .retain(|_, versions| versions.first().map(|s| s.doc_type_id) != Some(id));
        self.doc_types
            .remove(&id)
            .ok_or(CatalogError::DocTypeNotFound(id))
    }

    pub fn doc_type(&self, id: DocTypeId) -> Result<&DocType, CatalogError> {
        self.doc_types.get(&id).ok_or(CatalogError::DocTypeNotFound(id))
    }

    pub fn doc_types(&self, org_id: OrgId) -> Vec<&DocType> {
        self.doc_types.values().filter(|d| d.org_id == org_id).collect()
    }

    fn ensure_unique_name(
        &self,
        org_id: OrgId,
        name: &str,
        except: Option<DocTypeId>,
    ) -> Result<(), CatalogError> {
        let taken = self.doc_types.values().any(|d| {
            d.org_id == org_id && Some(d.id) != except && d.name.eq_ignore_ascii_case(name)
        });
        if taken {
            return Err(CatalogError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    // ---- criteria sets ----

    /// Create version 1 of a new criteria set.
    pub fn create_criteria_set(
        &mut self,
        request: NewCriteriaSet,
        now: DateTime<Utc>,
    ) -> Result<CriteriaSetWrite, CatalogError> {
        self.create_with_provenance(request, None, now)
    }

    /// Create a criteria set from CSV. Any invalid row rejects the whole
    /// import.
    pub fn import_criteria_set<R: Read>(
        &mut self,
        doc_type_id: DocTypeId,
        name: &str,
        weighted: bool,
        file_name: &str,
        reader: R,
        now: DateTime<Utc>,
    ) -> Result<CriteriaSetWrite, CatalogError> {
        let items = parse_criteria_csv(reader)?;
        let provenance = ImportProvenance {
            file_name: file_name.to_string(),
            row_count: items.len(),
            imported_at: now,
        };
        let request = NewCriteriaSet {
            doc_type_id,
            name: name.to_string(),
            weighted,
            items,
        };
        self.create_with_provenance(request, Some(provenance), now)
    }

    fn create_with_provenance(
        &mut self,
        request: NewCriteriaSet,
        provenance: Option<ImportProvenance>,
        now: DateTime<Utc>,
    ) -> Result<CriteriaSetWrite, CatalogError> {
        let doc_type = self.doc_type(request.doc_type_id)?;
        if !doc_type.active {
            return Err(CatalogError::DocTypeInactive(doc_type.id));
        }
        let name = validate_name(&request.name)?;
        let (items, weighted, warnings) = build_items(request.items, request.weighted)?;

        let set = CriteriaSet {
            id: CriteriaSetId::new(),
            version: 1,
            doc_type_id: request.doc_type_id,
            name,
            weighted,
            items,
            provenance,
            locked: false,
            created_at: now,
        };
        self.sets.insert(set.id, vec![set.clone()]);
        tracing::info!(criteria_set = %set.id, items = set.items.len(), weighted, "Criteria set created");
        Ok(CriteriaSetWrite { set, warnings })
    }

    /// Replace the items of an exact version. Rejected once the version is
    /// referenced by an evaluation.
    pub fn update_in_place(
        &mut self,
        reference: CriteriaSetRef,
        items: Vec<NewCriterionItem>,
        weighted: bool,
    ) -> Result<CriteriaSetWrite, CatalogError> {
        let set = self.version_mut(reference)?;
        if set.locked {
            return Err(CatalogError::VersionLocked {
                id: reference.id,
                version: reference.version,
            });
        }
        let (items, weighted, warnings) = build_items(items, weighted)?;
        set.items = items;
        set.weighted = weighted;
        Ok(CriteriaSetWrite {
            set: set.clone(),
            warnings,
        })
    }

    /// Edit the latest version of a set: in place while it is unreferenced,
    /// otherwise as a new version.
    pub fn revise_criteria_set(
        &mut self,
        id: CriteriaSetId,
        items: Vec<NewCriterionItem>,
        weighted: bool,
        now: DateTime<Utc>,
    ) -> Result<CriteriaSetWrite, CatalogError> {
        let latest = self.latest(id)?.clone();
        if !latest.locked {
            return self.update_in_place(latest.reference(), items, weighted);
        }

        let (items, weighted, mut warnings) = build_items(items, weighted)?;
        let next = CriteriaSet {
            id,
            version: latest.version + 1,
            doc_type_id: latest.doc_type_id,
            name: latest.name.clone(),
            weighted,
            items,
            provenance: None,
            locked: false,
            created_at: now,
        };
        warnings.push(CatalogWarning::NewVersionCreated {
            previous_version: latest.version,
        });
        if let Some(versions) = self.sets.get_mut(&id) {
            versions.push(next.clone());
        }
        tracing::info!(criteria_set = %id, version = next.version, "Locked criteria set revised as new version");
        Ok(CriteriaSetWrite {
            set: next,
            warnings,
        })
    }

    /// Mark a version as referenced by an evaluation.
    pub fn lock_version(&mut self, reference: CriteriaSetRef) -> Result<(), CatalogError> {
        self.version_mut(reference)?.locked = true;
        Ok(())
    }

    pub fn criteria_set(&self, reference: CriteriaSetRef) -> Result<&CriteriaSet, CatalogError> {
        self.sets
            .get(&reference.id)
            .and_then(|versions| versions.iter().find(|s| s.version == reference.version))
            .ok_or(CatalogError::CriteriaSetNotFound {
                id: reference.id,
                version: reference.version,
            })
    }

    pub fn latest(&self, id: CriteriaSetId) -> Result<&CriteriaSet, CatalogError> {
        self.sets
            .get(&id)
            .and_then(|versions| versions.last())
            .ok_or(CatalogError::CriteriaSetNotFound { id, version: 0 })
    }

    pub fn versions(&self, id: CriteriaSetId) -> &[CriteriaSet] {
        self.sets.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Latest version of every set for a doc type.
    pub fn criteria_sets_for(&self, doc_type_id: DocTypeId) -> Vec<&CriteriaSet> {
        self.sets
            .values()
            .filter_map(|versions| versions.last())
            .filter(|s| s.doc_type_id == doc_type_id)
            .collect()
    }

    fn version_mut(&mut self, reference: CriteriaSetRef) -> Result<&mut CriteriaSet, CatalogError> {
        self.sets
            .get_mut(&reference.id)
            .and_then(|versions| versions.iter_mut().find(|s| s.version == reference.version))
            .ok_or(CatalogError::CriteriaSetNotFound {
                id: reference.id,
                version: reference.version,
            })
    }
}

fn validate_name(name: &str) -> Result<String, CatalogError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::InvalidName("name must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(CatalogError::InvalidName(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Validate items and settle the weighting mode.
fn build_items(
    items: Vec<NewCriterionItem>,
    weighted: bool,
) -> Result<(Vec<CriterionItem>, bool, Vec<CatalogWarning>), CatalogError> {
    if items.is_empty() {
        return Err(CatalogError::EmptyCriteriaSet);
    }

    let mut seen = HashSet::new();
    let mut built = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let external_id = item.external_id.trim().to_string();
        let requirement = item.requirement.trim().to_string();
        if external_id.is_empty() {
            return Err(CatalogError::MissingField { index, field: "external_id" });
        }
        if requirement.is_empty() {
            return Err(CatalogError::MissingField { index, field: "requirement" });
        }
        if !seen.insert(external_id.clone()) {
            return Err(CatalogError::DuplicateExternalId(external_id));
        }
        if let Some(weight) = item.weight {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(CatalogError::InvalidWeight { external_id, weight });
            }
        }
        built.push(CriterionItem {
            id: CriterionItemId::new(),
            external_id,
            requirement,
            description: item.description,
            category: item.category,
            weight: item.weight,
        });
    }

    let mut warnings = Vec::new();
    let mut effective_weighted = weighted;
    if weighted {
        let unweighted_items: Vec<String> = built
            .iter()
            .filter(|i| i.weight.is_none())
            .map(|i| i.external_id.clone())
            .collect();
        if !unweighted_items.is_empty() {
            tracing::warn!(count = unweighted_items.len(), "Weighted scoring disabled: items without weight");
            effective_weighted = false;
            warnings.push(CatalogWarning::WeightingDisabled { unweighted_items });
        }
    }

    Ok((built, effective_weighted, warnings))
}
