//! Admin configuration surface.
//!
//! [`ConfigStore`] holds the platform record and one record per
//! organization, validates every write and keeps the resolved-config cache
//! honest. [`AdminService`] adds document types and criteria sets on top.
//! Configuration writes only affect evaluations that start afterwards;
//! running evaluations keep their snapshot.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use attest_core::{
    validate_status_options, ConfigError, ConfigResolver, ConfigSnapshot, CriteriaCatalog, CriteriaSet,
    CriteriaSetId, CriteriaSetRef, CriteriaSetWrite, DocType, DocTypeId, NewCriteriaSet, NewCriterionItem,
    OrgConfig, OrgId, PlatformConfig, ScoringMode, StatusOption,
};
use chrono::Utc;
use parking_lot::RwLock;

use crate::cache::ConfigCache;
use crate::RuntimeError;

/// The catalog shared by the admin surface and the orchestrator.
pub type SharedCatalog = Arc<RwLock<CriteriaCatalog>>;

/// Platform and organization configuration records.
pub struct ConfigStore {
    platform: RwLock<PlatformConfig>,
    orgs: RwLock<HashMap<OrgId, OrgConfig>>,
    cache: ConfigCache,
}

impl ConfigStore {
    /// Fails if the platform record lacks a default for a required field.
    pub fn new(platform: PlatformConfig, cache: ConfigCache) -> Result<Self, ConfigError> {
        platform.validate()?;
        Ok(Self {
            platform: RwLock::new(platform),
            orgs: RwLock::new(HashMap::new()),
            cache,
        })
    }

    pub fn platform(&self) -> PlatformConfig {
        self.platform.read().clone()
    }

    pub fn org_config(&self, org_id: OrgId) -> Option<OrgConfig> {
        self.orgs.read().get(&org_id).cloned()
    }

    /// Replace the platform record.
    pub async fn set_platform(&self, platform: PlatformConfig) -> Result<(), ConfigError> {
        platform.validate()?;
        *self.platform.write() = platform;
        self.cache.invalidate_all();
        tracing::info!("Platform configuration replaced");
        Ok(())
    }

    /// Grant or revoke an organization's right to override judgment
    /// settings. Only the platform layer carries this flag.
    pub async fn set_delegation(&self, org_id: OrgId, delegated: bool) {
        {
            let mut platform = self.platform.write();
            if delegated {
                platform.delegated_orgs.insert(org_id);
            } else {
                platform.delegated_orgs.remove(&org_id);
            }
        }
        self.cache.invalidate(&org_id).await;
        tracing::info!(org_id = %org_id, delegated, "Judgment delegation changed");
    }

    /// Replace an organization record.
    pub async fn set_org_config(&self, config: OrgConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let org_id = config.org_id;
        self.orgs.write().insert(org_id, config);
        self.cache.invalidate(&org_id).await;
        tracing::info!(org_id = %org_id, "Organization configuration replaced");
        Ok(())
    }

    /// Replace an organization's status options for one mode. An empty list
    /// falls back to the platform defaults.
    pub async fn set_org_status_options(
        &self,
        org_id: OrgId,
        mode: ScoringMode,
        options: Vec<StatusOption>,
    ) -> Result<(), ConfigError> {
        check_options(&options, mode)?;
        {
            let mut orgs = self.orgs.write();
            let config = orgs.entry(org_id).or_insert_with(|| OrgConfig::new(org_id));
            replace_mode(&mut config.status_options, mode, options);
        }
        self.cache.invalidate(&org_id).await;
        tracing::info!(org_id = %org_id, mode = %mode, "Organization status options replaced");
        Ok(())
    }

    /// Replace the platform defaults for one mode.
    pub async fn set_platform_status_options(
        &self,
        mode: ScoringMode,
        options: Vec<StatusOption>,
    ) -> Result<(), ConfigError> {
        check_options(&options, mode)?;
        {
            let mut platform = self.platform.write();
            let mut draft = platform.clone();
            replace_mode(&mut draft.status_options, mode, options);
            draft.validate()?;
            *platform = draft;
        }
        self.cache.invalidate_all();
        tracing::info!(mode = %mode, "Platform status options replaced");
        Ok(())
    }

    /// Resolve fresh, bypassing the cache. Used for evaluation snapshots.
    pub fn snapshot(&self, org_id: OrgId) -> Result<ConfigSnapshot, ConfigError> {
        let platform = self.platform.read();
        let orgs = self.orgs.read();
        ConfigResolver::new(&platform, orgs.get(&org_id)).snapshot(org_id, Utc::now())
    }

    /// Resolved configuration for request handling, served from the cache.
    pub async fn effective_config(&self, org_id: OrgId) -> Result<ConfigSnapshot, ConfigError> {
        if let Some(snapshot) = self.cache.get(&org_id).await {
            return Ok(snapshot);
        }
        let snapshot = self.snapshot(org_id)?;
        self.cache.insert(org_id, snapshot.clone()).await;
        Ok(snapshot)
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("orgs", &self.orgs.read().len())
            .field("cache", &self.cache)
            .finish()
    }
}

fn check_options(options: &[StatusOption], mode: ScoringMode) -> Result<(), ConfigError> {
    if options.is_empty() {
        return Ok(());
    }
    validate_status_options(options, mode).map_err(|source| ConfigError::InvalidStatusOptions { mode, source })
}

fn replace_mode(target: &mut Vec<StatusOption>, mode: ScoringMode, options: Vec<StatusOption>) {
    target.retain(|o| o.mode != mode);
    target.extend(options);
}

/// Document types and criteria sets.
#[derive(Debug, Clone)]
pub struct AdminService {
    catalog: SharedCatalog,
    configs: Arc<ConfigStore>,
}

impl AdminService {
    pub fn new(catalog: SharedCatalog, configs: Arc<ConfigStore>) -> Self {
        Self { catalog, configs }
    }

    pub fn configs(&self) -> &ConfigStore {
        &self.configs
    }

    pub fn create_doc_type(
        &self,
        org_id: OrgId,
        name: &str,
        description: Option<String>,
    ) -> Result<DocType, RuntimeError> {
        Ok(self
            .catalog
            .write()
            .create_doc_type(org_id, name, description, Utc::now())?)
    }

    pub fn update_doc_type(
        &self,
        id: DocTypeId,
        name: &str,
        description: Option<String>,
    ) -> Result<DocType, RuntimeError> {
        Ok(self
            .catalog
            .write()
            .update_doc_type(id, name, description, Utc::now())?)
    }

    pub fn deactivate_doc_type(&self, id: DocTypeId) -> Result<DocType, RuntimeError> {
        Ok(self.catalog.write().set_doc_type_active(id, false, Utc::now())?)
    }

    pub fn reactivate_doc_type(&self, id: DocTypeId) -> Result<DocType, RuntimeError> {
        Ok(self.catalog.write().set_doc_type_active(id, true, Utc::now())?)
    }

    pub fn delete_doc_type(&self, id: DocTypeId) -> Result<DocType, RuntimeError> {
        let deleted = self.catalog.write().delete_doc_type(id)?;
        tracing::info!(doc_type = %id, "Document type deleted");
        Ok(deleted)
    }

    pub fn doc_types(&self, org_id: OrgId) -> Vec<DocType> {
        self.catalog
            .read()
            .doc_types(org_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn create_criteria_set(&self, request: NewCriteriaSet) -> Result<CriteriaSetWrite, RuntimeError> {
        Ok(self.catalog.write().create_criteria_set(request, Utc::now())?)
    }

    /// Create a criteria set from a CSV upload. All or nothing.
    pub fn import_criteria_set<R: Read>(
        &self,
        doc_type_id: DocTypeId,
        name: &str,
        weighted: bool,
        file_name: &str,
        reader: R,
    ) -> Result<CriteriaSetWrite, RuntimeError> {
        Ok(self.catalog.write().import_criteria_set(
            doc_type_id,
            name,
            weighted,
            file_name,
            reader,
            Utc::now(),
        )?)
    }

    /// Edit the latest version; becomes a new version once referenced.
    pub fn revise_criteria_set(
        &self,
        id: CriteriaSetId,
        items: Vec<NewCriterionItem>,
        weighted: bool,
    ) -> Result<CriteriaSetWrite, RuntimeError> {
        Ok(self
            .catalog
            .write()
            .revise_criteria_set(id, items, weighted, Utc::now())?)
    }

    /// Edit one exact version; rejected once it is referenced.
    pub fn update_criteria_set_in_place(
        &self,
        reference: CriteriaSetRef,
        items: Vec<NewCriterionItem>,
        weighted: bool,
    ) -> Result<CriteriaSetWrite, RuntimeError> {
        Ok(self.catalog.write().update_in_place(reference, items, weighted)?)
    }

    pub fn criteria_set(&self, reference: CriteriaSetRef) -> Result<CriteriaSet, RuntimeError> {
        Ok(self.catalog.read().criteria_set(reference)?.clone())
    }

    pub fn criteria_set_versions(&self, id: CriteriaSetId) -> Vec<CriteriaSet> {
        self.catalog.read().versions(id).to_vec()
    }

    pub fn criteria_sets_for(&self, doc_type_id: DocTypeId) -> Vec<CriteriaSet> {
        self.catalog
            .read()
            .criteria_sets_for(doc_type_id)
            .into_iter()
            .cloned()
            .collect()
    }
}
