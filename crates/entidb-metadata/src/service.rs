//! Schema orchestration.
//!
//! [`MetaDataService`] is the only component that changes entity types. It
//! keeps three things in step: the catalog rows, the physical storage in each
//! backend and the in-process [`EntityTypeIndex`]. Mutations are serialized by
//! one async lock, checked in full before the first write, and then applied
//! best-effort; [`MetaDataService::reconcile`] repairs what a failed apply
//! left behind.
//!
//! Callers need `WriteMeta` on the entity type they change. Once that check
//! passes, catalog rows are written as the system principal so that row-level
//! catalog permissions do not apply twice.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use entidb_core::metrics::{status_label, SCHEMA_MUTATIONS, SCHEMA_MUTATION_DURATION};
use entidb_core::{
    run_as, Attribute, AttributeId, CollectionCapability, CoreError, CoreResult, Entity,
    EntityType, Fetch, Package, PackageTree, Permission, Principal, Query, Repository,
    RepositoryCollection, Tag, TransactionManager, Value, ATTRIBUTE_ENTITY_TYPE,
    CATALOG_ENTITY_TYPES, ENTITY_TYPE_ENTITY_TYPE, PACKAGE_ENTITY_TYPE, TAG_ENTITY_TYPE,
};
use entidb_pipeline::{EntityTypeIndex, RepositoryCollectionRegistry, ANY_TARGET};

use crate::catalog;
use crate::dependency::{dependency_order, sort_entity_types, DependencyNode};
use crate::diff;
use crate::system::SystemEntityTypeRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateMode {
    /// A caller-supplied definition.
    User,
    /// Bringing a system type in line with its compiled-in definition.
    Reconcile,
    /// An explicit attribute deletion.
    DeleteAttribute,
}

impl UpdateMode {
    fn allows_removal(self) -> bool {
        !matches!(self, Self::User)
    }
}

/// Outcome of [`MetaDataService::reconcile`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Repairs that were applied.
    pub repaired: Vec<String>,
    /// Registered concrete types without storage.
    pub missing_storage: Vec<String>,
    /// Storage (`backend/name`) that no registered type owns. Never dropped.
    pub orphaned_storage: Vec<String>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.repaired.is_empty() && self.missing_storage.is_empty() && self.orphaned_storage.is_empty()
    }
}

/// Own-attribute and entity-level tags of `entity_type`.
fn tags_of(entity_type: &EntityType) -> Vec<&Tag> {
    entity_type
        .tags
        .iter()
        .chain(entity_type.attributes.iter().flat_map(|a| a.tags.iter()))
        .collect()
}

/// Gives every attribute without an identifier a fresh one, parts before
/// their compound.
fn assign_identifiers(entity_type: &mut EntityType) {
    let order: Vec<String> = entity_type
        .attributes_post_order()
        .iter()
        .map(|a| a.name.clone())
        .collect();
    for name in order {
        if let Some(attribute) = entity_type.attributes.iter_mut().find(|a| a.name == name) {
            if attribute.id.is_none() {
                attribute.id = Some(AttributeId::new());
            }
        }
    }
}

fn attribute_key(attribute: &Attribute) -> Option<Value> {
    attribute.id.map(|id| Value::String(id.to_string()))
}

async fn save_row(repository: &dyn Repository, mut row: Entity) -> CoreResult<()> {
    let id = row
        .id()
        .cloned()
        .ok_or_else(|| CoreError::invalid_state(format!("{} row without id", repository.name())))?;
    if repository.find_one_by_id(&id, Fetch::Shallow).await?.is_some() {
        repository.update(&mut row).await
    } else {
        repository.add(&mut row).await
    }
}

/// Deletes the rows among `ids` that exist.
async fn delete_rows(repository: &dyn Repository, ids: Vec<Value>) -> CoreResult<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let existing: Vec<Value> = repository
        .find_all(&Query::new().in_values(catalog::ID, ids).fetch(Fetch::Shallow))
        .await?
        .iter()
        .filter_map(|row| row.id().cloned())
        .collect();
    if !existing.is_empty() {
        repository.delete_all_by_id(&existing).await?;
    }
    Ok(existing.len())
}

/// Creates, updates and deletes entity types, attributes and packages.
pub struct MetaDataService {
    registry: Arc<RepositoryCollectionRegistry>,
    system_types: Arc<SystemEntityTypeRegistry>,
    transactions: Arc<TransactionManager>,
    packages: RwLock<PackageTree>,
    schema_lock: Mutex<()>,
}

impl MetaDataService {
    pub fn new(
        registry: Arc<RepositoryCollectionRegistry>,
        system_types: Arc<SystemEntityTypeRegistry>,
        transactions: Arc<TransactionManager>,
    ) -> Self {
        Self {
            registry,
            system_types,
            transactions,
            packages: RwLock::new(PackageTree::new()),
            schema_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RepositoryCollectionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn system_types(&self) -> &Arc<SystemEntityTypeRegistry> {
        &self.system_types
    }

    fn entity_types(&self) -> &Arc<EntityTypeIndex> {
        self.registry.entity_types()
    }

    fn catalog(&self, name: &str) -> CoreResult<Arc<dyn Repository>> {
        self.registry.get_repository(name)
    }

    /// The calling principal must hold `WriteMeta` on `target`.
    fn ensure_write_meta(&self, target: &str) -> CoreResult<()> {
        self.registry
            .factory()
            .permissions()
            .check(&Principal::current(), target, Permission::WriteMeta)
    }

    /// Runs `work` under the schema lock, as the system principal, inside
    /// one transaction, and records the outcome.
    async fn mutate<T, F>(&self, operation: &'static str, work: F) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>>,
    {
        let _guard = self.schema_lock.lock().await;
        let timer = SCHEMA_MUTATION_DURATION
            .with_label_values(&[operation])
            .start_timer();
        let result = run_as(Principal::system(), self.transactions.run(work)).await;
        timer.observe_duration();
        SCHEMA_MUTATIONS
            .with_label_values(&[operation, status_label(&result)])
            .inc();
        if let Err(err) = &result {
            warn!("Schema operation {} failed: {}", operation, err);
        }
        result
    }

    // ===== Lookups =====

    pub fn get_entity_type(&self, name: &str) -> CoreResult<Arc<EntityType>> {
        self.entity_types().require(name)
    }

    #[must_use]
    pub fn get_entity_types(&self) -> Vec<Arc<EntityType>> {
        self.entity_types().all()
    }

    #[must_use]
    pub fn has_entity_type(&self, name: &str) -> bool {
        self.entity_types().contains(name)
    }

    #[must_use]
    pub fn has_repository(&self, name: &str) -> bool {
        self.registry.has_repository(name)
    }

    /// Decorated repository for `name`.
    pub fn get_repository(&self, name: &str) -> CoreResult<Arc<dyn Repository>> {
        self.registry.get_repository(name)
    }

    pub fn get_backend(&self, name: &str) -> CoreResult<Arc<dyn RepositoryCollection>> {
        self.registry.collection(name)
    }

    #[must_use]
    pub fn get_package(&self, id: &str) -> Option<Package> {
        self.packages.read().get(id).cloned()
    }

    /// All packages, ordered by name.
    #[must_use]
    pub fn get_packages(&self) -> Vec<Package> {
        let mut packages: Vec<Package> = self.packages.read().iter().cloned().collect();
        packages.sort_by(|a, b| a.id.cmp(&b.id));
        packages
    }

    // ===== Entity types =====

    pub async fn add_entity_type(&self, entity_type: EntityType) -> CoreResult<Arc<EntityType>> {
        self.ensure_write_meta(&entity_type.name)?;
        self.mutate("add_entity_type", self.add_locked(entity_type, &HashSet::new()))
            .await
    }

    /// Adds a batch in dependency order; references may point inside the
    /// batch, including cyclically.
    pub async fn add_entity_types(
        &self,
        entity_types: Vec<EntityType>,
    ) -> CoreResult<Vec<Arc<EntityType>>> {
        for entity_type in &entity_types {
            self.ensure_write_meta(&entity_type.name)?;
        }
        self.mutate("add_entity_types", async {
            let batch: HashSet<String> = entity_types.iter().map(|t| t.name.clone()).collect();
            let mut added = Vec::with_capacity(entity_types.len());
            for entity_type in sort_entity_types(entity_types)? {
                added.push(self.add_locked(entity_type, &batch).await?);
            }
            Ok(added)
        })
        .await
    }

    pub async fn update_entity_type(&self, entity_type: EntityType) -> CoreResult<Arc<EntityType>> {
        self.ensure_write_meta(&entity_type.name)?;
        self.mutate(
            "update_entity_type",
            self.update_locked(entity_type, UpdateMode::User),
        )
        .await
    }

    /// Adds `entity_type` if it is unknown, otherwise updates it. An upsert
    /// of an unchanged type writes nothing.
    pub async fn upsert_entity_type(&self, entity_type: EntityType) -> CoreResult<Arc<EntityType>> {
        self.ensure_write_meta(&entity_type.name)?;
        self.mutate("upsert_entity_type", async {
            if self.entity_types().contains(&entity_type.name) {
                self.update_locked(entity_type, UpdateMode::User).await
            } else {
                self.add_locked(entity_type, &HashSet::new()).await
            }
        })
        .await
    }

    pub async fn delete_entity_type(&self, name: &str) -> CoreResult<()> {
        self.ensure_write_meta(name)?;
        self.mutate("delete_entity_type", self.delete_locked(name, &HashSet::new()))
            .await
    }

    /// Deletes a batch in reverse dependency order. Types in the batch may
    /// reference or extend each other.
    pub async fn delete_entity_types(&self, names: &[String]) -> CoreResult<()> {
        for name in names {
            self.ensure_write_meta(name)?;
        }
        self.mutate("delete_entity_types", async {
            let batch: HashSet<String> = names.iter().cloned().collect();
            let nodes = names
                .iter()
                .map(|name| Ok(DependencyNode::from(&*self.entity_types().require(name)?)))
                .collect::<CoreResult<Vec<_>>>()?;
            for i in dependency_order(&nodes)?.into_iter().rev() {
                self.delete_locked(&nodes[i].name, &batch).await?;
            }
            Ok(())
        })
        .await
    }

    // ===== Attributes =====

    pub async fn add_attribute(
        &self,
        entity_type: &str,
        attribute: Attribute,
    ) -> CoreResult<Arc<EntityType>> {
        self.ensure_write_meta(entity_type)?;
        self.mutate("add_attribute", async {
            let stored = self.entity_types().require(entity_type)?;
            if stored.attribute(&attribute.name).is_some() {
                return Err(CoreError::already_exists(
                    "attribute",
                    format!("{entity_type}.{}", attribute.name),
                ));
            }
            let updated = (*stored).clone().with_attribute(attribute);
            self.update_locked(updated, UpdateMode::User).await
        })
        .await
    }

    /// Deletes an own attribute, and its parts when it is a compound.
    pub async fn delete_attribute(
        &self,
        entity_type: &str,
        attribute: &str,
    ) -> CoreResult<Arc<EntityType>> {
        self.ensure_write_meta(entity_type)?;
        self.mutate("delete_attribute", async {
            let stored = self.entity_types().require(entity_type)?;
            let Some(own) = stored.own_attribute(attribute) else {
                if stored.attribute(attribute).is_some() {
                    return Err(CoreError::schema_change(
                        entity_type,
                        format!("attribute `{attribute}` is inherited"),
                    ));
                }
                return Err(CoreError::not_found(
                    "attribute",
                    format!("{entity_type}.{attribute}"),
                ));
            };
            let system_attribute = own
                .id
                .is_some_and(|id| self.system_types.is_system_attribute(&id));
            if stored.is_system || system_attribute {
                return Err(CoreError::schema_change(
                    entity_type,
                    format!("system attribute `{attribute}` cannot be deleted"),
                ));
            }

            let doomed: HashSet<String> = stored
                .subtree(attribute)
                .iter()
                .map(|a| a.name.clone())
                .collect();
            let in_use = stored
                .id_attribute
                .iter()
                .chain(stored.label_attribute.iter())
                .chain(stored.lookup_attributes.iter())
                .find(|name| doomed.contains(*name));
            if let Some(name) = in_use {
                return Err(CoreError::schema_change(
                    entity_type,
                    format!("attribute `{name}` is the id, label or a lookup attribute"),
                ));
            }

            let mut updated = (*stored).clone();
            updated.attributes.retain(|a| !doomed.contains(&a.name));
            let updated = self.update_locked(updated, UpdateMode::DeleteAttribute).await?;
            self.evict_cached(entity_type);
            for descendant in self.entity_types().concrete_descendants(entity_type) {
                self.evict_cached(&descendant.name);
            }
            Ok(updated)
        })
        .await
    }

    // ===== Packages =====

    pub async fn add_package(&self, package: Package) -> CoreResult<()> {
        self.ensure_write_meta(PACKAGE_ENTITY_TYPE)?;
        self.mutate("add_package", async {
            if self.packages.read().contains(&package.id) {
                return Err(CoreError::already_exists("package", package.id.clone()));
            }
            self.packages.write().insert(package.clone())?;
            if let Err(err) = self.save_package(&package).await {
                self.packages.write().remove(&package.id);
                return Err(err);
            }
            info!("Added package {}", package.id);
            Ok(())
        })
        .await
    }

    pub async fn delete_package(&self, id: &str) -> CoreResult<()> {
        self.ensure_write_meta(PACKAGE_ENTITY_TYPE)?;
        self.mutate("delete_package", async {
            {
                let packages = self.packages.read();
                if !packages.contains(id) {
                    return Err(CoreError::not_found("package", id));
                }
                if !packages.children(id).is_empty() {
                    return Err(CoreError::schema_change(id, "package has sub-packages"));
                }
            }
            if self.system_types.packages().iter().any(|p| p.id == id) {
                return Err(CoreError::schema_change(id, "system package cannot be deleted"));
            }
            if let Some(entity_type) = self
                .entity_types()
                .all()
                .into_iter()
                .find(|t| t.package.as_deref() == Some(id))
            {
                return Err(CoreError::schema_change(
                    id,
                    format!("package still holds entity type `{}`", entity_type.name),
                ));
            }
            self.catalog(PACKAGE_ENTITY_TYPE)?
                .delete_by_id(&Value::from(id))
                .await?;
            self.packages.write().remove(id);
            info!("Deleted package {}", id);
            Ok(())
        })
        .await
    }

    // ===== Bootstrap and repair =====

    /// Brings the catalog up: provisions the catalog repositories, loads the
    /// persisted types and upserts every system type.
    pub async fn bootstrap(&self) -> CoreResult<()> {
        self.mutate("bootstrap", self.bootstrap_locked()).await
    }

    /// Repairs storage and search mappings and reports orphaned storage.
    pub async fn reconcile(&self) -> CoreResult<ReconcileReport> {
        self.ensure_write_meta(ANY_TARGET)?;
        self.mutate("reconcile", self.reconcile_locked()).await
    }

    // ===== Implementation =====

    fn check_new_name(&self, name: &str) -> CoreResult<()> {
        let taken = self.entity_types().contains(name)
            || self
                .registry
                .collections()
                .iter()
                .any(|collection| collection.has_repository(name));
        if taken {
            return Err(CoreError::already_exists("entity type", name));
        }
        Ok(())
    }

    /// Replaces the parent handle with the registered version.
    fn resolve_parent(&self, entity_type: &mut EntityType) -> CoreResult<()> {
        if let Some(parent) = entity_type.extends_name().map(str::to_string) {
            entity_type.extends = Some(self.entity_types().require(&parent)?);
        }
        Ok(())
    }

    fn check_references(&self, entity_type: &EntityType, batch: &HashSet<String>) -> CoreResult<()> {
        for target in entity_type
            .attributes
            .iter()
            .filter_map(|a| a.ref_entity_type.as_deref())
        {
            let known = target == entity_type.name
                || batch.contains(target)
                || self.entity_types().contains(target);
            if !known {
                return Err(CoreError::unknown_entity_type(target));
            }
        }
        Ok(())
    }

    fn check_package(&self, entity_type: &EntityType) -> CoreResult<()> {
        match entity_type.package.as_deref() {
            Some(package) if !self.packages.read().contains(package) => {
                Err(CoreError::not_found("package", package))
            }
            _ => Ok(()),
        }
    }

    async fn add_locked(
        &self,
        mut entity_type: EntityType,
        batch: &HashSet<String>,
    ) -> CoreResult<Arc<EntityType>> {
        self.check_new_name(&entity_type.name)?;
        self.resolve_parent(&mut entity_type)?;
        self.check_references(&entity_type, batch)?;
        self.check_package(&entity_type)?;
        let backend = self.registry.collection(&entity_type.backend)?;
        if !entity_type.is_abstract {
            backend
                .capabilities()
                .require(backend.name(), CollectionCapability::Manageable)?;
        }
        assign_identifiers(&mut entity_type);
        entity_type.validate()?;

        self.write_type_rows(&entity_type).await?;
        if !entity_type.is_abstract {
            backend
                .create_repository(&Arc::new(entity_type.clone()))
                .await?;
        }
        let entity_type = self.entity_types().insert(entity_type);
        info!(
            "Added entity type {} ({} attributes, backend {})",
            entity_type.name,
            entity_type.attributes.len(),
            entity_type.backend
        );
        Ok(entity_type)
    }

    /// Tag rows, attribute rows with parts first, then the entity-type row.
    async fn write_type_rows(&self, entity_type: &EntityType) -> CoreResult<()> {
        self.save_tags(tags_of(entity_type)).await?;
        self.save_attribute_rows(entity_type, entity_type.attributes_post_order())
            .await?;
        let repository = self.catalog(ENTITY_TYPE_ENTITY_TYPE)?;
        let row = catalog::entity_type_to_row(entity_type, repository.entity_type())?;
        save_row(repository.as_ref(), row).await
    }

    async fn save_tags(&self, tags: Vec<&Tag>) -> CoreResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let repository = self.catalog(TAG_ENTITY_TYPE)?;
        let mut seen = HashSet::new();
        for tag in tags {
            if !seen.insert(tag.id.as_str()) {
                continue;
            }
            let mut row = catalog::tag_to_row(tag, repository.entity_type());
            match repository
                .find_one_by_id(&Value::from(tag.id.as_str()), Fetch::Shallow)
                .await?
            {
                Some(existing) if catalog::tag_from_row(&existing)? == *tag => {}
                Some(_) => repository.update(&mut row).await?,
                None => repository.add(&mut row).await?,
            }
        }
        Ok(())
    }

    async fn save_attribute_rows(
        &self,
        entity_type: &EntityType,
        attributes: Vec<&Attribute>,
    ) -> CoreResult<()> {
        if attributes.is_empty() {
            return Ok(());
        }
        let repository = self.catalog(ATTRIBUTE_ENTITY_TYPE)?;
        for attribute in attributes {
            let sequence = entity_type
                .attributes
                .iter()
                .position(|a| a.name == attribute.name)
                .unwrap_or(entity_type.attributes.len());
            let row = catalog::attribute_to_row(
                entity_type,
                attribute,
                sequence,
                repository.entity_type(),
            )?;
            save_row(repository.as_ref(), row).await?;
        }
        Ok(())
    }

    async fn save_package(&self, package: &Package) -> CoreResult<()> {
        self.save_tags(package.tags.iter().collect()).await?;
        let repository = self.catalog(PACKAGE_ENTITY_TYPE)?;
        save_row(
            repository.as_ref(),
            catalog::package_to_row(package, repository.entity_type()),
        )
        .await
    }

    /// Whether `entity_type` or any concrete descendant holds rows.
    async fn has_instances(&self, entity_type: &EntityType) -> CoreResult<bool> {
        let mut names: Vec<String> = self
            .entity_types()
            .concrete_descendants(&entity_type.name)
            .iter()
            .map(|t| t.name.clone())
            .collect();
        if !entity_type.is_abstract {
            names.push(entity_type.name.clone());
        }
        for name in names {
            if !self.registry.has_repository(&name) {
                continue;
            }
            if self.registry.get_raw_repository(&name)?.count_all().await? > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn update_locked(
        &self,
        mut updated: EntityType,
        mode: UpdateMode,
    ) -> CoreResult<Arc<EntityType>> {
        let index = self.entity_types();
        let stored = index.require(&updated.name)?;
        self.resolve_parent(&mut updated)?;
        diff::carry_identifiers(&stored, &mut updated);

        if mode == UpdateMode::User && stored.is_system {
            let compiled = self
                .system_types
                .get_system_entity(&stored.name)
                .ok_or_else(|| CoreError::unknown_entity_type(&stored.name))?;
            if !updated.structurally_eq(&compiled) {
                return Err(CoreError::schema_change(
                    &stored.name,
                    "system entity types only change with their compiled-in definition",
                ));
            }
        }
        updated.is_system = stored.is_system || mode == UpdateMode::Reconcile;

        assign_identifiers(&mut updated);
        let changes = diff::diff(&stored, &updated);
        diff::check_update(&stored, &updated, &changes, mode.allows_removal())?;
        self.check_references(&updated, &HashSet::new())?;
        self.check_package(&updated)?;
        updated.validate()?;
        if changes.is_empty() {
            debug!("Entity type {} is unchanged", stored.name);
            return Ok(stored);
        }

        let required = changes
            .added
            .iter()
            .find(|a| !a.nillable && a.is_persistent());
        if let Some(attribute) = required {
            if self.has_instances(&stored).await? {
                return Err(CoreError::schema_change(
                    &stored.name,
                    format!(
                        "non-nillable attribute `{}` cannot be added while rows exist",
                        attribute.name
                    ),
                ));
            }
        }
        let backend = self.registry.collection(&updated.backend)?;
        if !changes.added.is_empty() || !changes.removed.is_empty() {
            backend
                .capabilities()
                .require(backend.name(), CollectionCapability::Updatable)?;
        }

        // Catalog
        self.save_tags(tags_of(&updated)).await?;
        let rewritten: Vec<&Attribute> = changes
            .added
            .iter()
            .chain(changes.changed.iter().map(|(_, after)| after))
            .collect();
        self.save_attribute_rows(&updated, rewritten).await?;
        if changes.entity_changed {
            let repository = self.catalog(ENTITY_TYPE_ENTITY_TYPE)?;
            let row = catalog::entity_type_to_row(&updated, repository.entity_type())?;
            save_row(repository.as_ref(), row).await?;
        }
        if !changes.removed.is_empty() {
            delete_rows(
                self.catalog(ATTRIBUTE_ENTITY_TYPE)?.as_ref(),
                changes.removed.iter().filter_map(attribute_key).collect(),
            )
            .await?;
        }

        // Storage
        let updated = index.insert(updated);
        let mut targets = index.concrete_descendants(&updated.name);
        if !updated.is_abstract {
            targets.insert(0, updated.clone());
        }
        for target in &targets {
            for attribute in changes.added.iter().filter(|a| a.is_persistent()) {
                backend.add_attribute(target, attribute).await?;
            }
            for attribute in changes.removed.iter().filter(|a| a.is_persistent()) {
                backend.delete_attribute(target, attribute).await?;
            }
        }

        info!(
            "Updated entity type {} (+{} -{} ~{} attributes)",
            updated.name,
            changes.added.len(),
            changes.removed.len(),
            changes.changed.len()
        );
        Ok(updated)
    }

    /// Forgets rows of `name` cached by the current transaction.
    fn evict_cached(&self, name: &str) {
        if let Some(cache) = self.registry.factory().cache() {
            cache.evict_all(name);
        }
    }

    async fn delete_locked(&self, name: &str, batch: &HashSet<String>) -> CoreResult<()> {
        let index = self.entity_types();
        let stored = index.require(name)?;
        if stored.is_system || self.system_types.is_system_entity(name) {
            return Err(CoreError::schema_change(
                name,
                "system entity types cannot be deleted",
            ));
        }
        let dependents: Vec<String> = index
            .dependents(name)
            .into_iter()
            .filter(|d| !batch.contains(d))
            .collect();
        if !dependents.is_empty() {
            return Err(CoreError::schema_change(
                name,
                format!("still extended or referenced by {}", dependents.join(", ")),
            ));
        }

        // 1. attribute rows
        let removed_attributes = delete_rows(
            self.catalog(ATTRIBUTE_ENTITY_TYPE)?.as_ref(),
            stored.attributes.iter().filter_map(attribute_key).collect(),
        )
        .await?;

        // 2. tag rows nothing else uses
        let mut in_use: HashSet<String> = index
            .all()
            .iter()
            .filter(|t| t.name != name)
            .flat_map(|t| tags_of(t).into_iter().map(|tag| tag.id.clone()).collect::<Vec<_>>())
            .collect();
        in_use.extend(
            self.packages
                .read()
                .iter()
                .flat_map(|p| p.tags.iter().map(|tag| tag.id.clone())),
        );
        let unused: Vec<Value> = tags_of(&stored)
            .into_iter()
            .filter(|tag| !in_use.contains(&tag.id))
            .map(|tag| Value::from(tag.id.as_str()))
            .collect();
        delete_rows(self.catalog(TAG_ENTITY_TYPE)?.as_ref(), unused).await?;

        // 3. storage
        if !stored.is_abstract {
            let backend = self.registry.collection(&stored.backend)?;
            if backend.has_repository(name) {
                backend.delete_repository(&stored).await?;
            } else {
                warn!("Entity type {} had no storage in {}", name, backend.name());
            }
        }

        self.evict_cached(name);

        // 4. permissions and listeners
        self.registry.factory().permissions().revoke_all(name);
        self.registry.factory().listeners().remove_all(name);

        // 5. entity-type row, 6. index
        delete_rows(
            self.catalog(ENTITY_TYPE_ENTITY_TYPE)?.as_ref(),
            vec![Value::from(name)],
        )
        .await?;
        index.remove(name);
        info!(
            "Deleted entity type {} ({} attribute rows)",
            name, removed_attributes
        );
        Ok(())
    }

    async fn bootstrap_locked(&self) -> CoreResult<()> {
        let index = self.entity_types();
        let backend = self.registry.collection(self.system_types.backend())?;

        for name in CATALOG_ENTITY_TYPES {
            let definition = self
                .system_types
                .get_system_entity(name)
                .ok_or_else(|| CoreError::unknown_entity_type(name))?;
            let entity_type = index.insert((*definition).clone());
            if !backend.has_repository(name) {
                backend.create_repository(&entity_type).await?;
                info!("Provisioned catalog repository {} in {}", name, backend.name());
            }
        }

        let tags = self.load_tags().await?;
        self.load_packages(&tags).await?;
        for package in self.system_types.packages() {
            if !self.packages.read().contains(&package.id) {
                self.save_package(&package).await?;
                self.packages.write().insert(package)?;
            }
        }
        let types = self.catalog(ENTITY_TYPE_ENTITY_TYPE)?;
        for name in CATALOG_ENTITY_TYPES {
            if types
                .find_one_by_id(&Value::from(name), Fetch::Shallow)
                .await?
                .is_none()
            {
                self.write_type_rows(&*index.require(name)?).await?;
            }
        }

        let loaded = self.load_entity_types(&tags).await?;

        let definitions: Vec<EntityType> = self
            .system_types
            .entity_types()
            .iter()
            .map(|t| (**t).clone())
            .collect();
        for definition in sort_entity_types(definitions)? {
            if index.contains(&definition.name) {
                self.update_locked(definition, UpdateMode::Reconcile).await?;
            } else {
                self.add_locked(definition, &HashSet::new()).await?;
            }
        }
        info!(
            "Bootstrapped metadata: {} entity types ({} loaded from the catalog)",
            index.len(),
            loaded
        );
        Ok(())
    }

    async fn load_tags(&self) -> CoreResult<HashMap<String, Tag>> {
        self.catalog(TAG_ENTITY_TYPE)?
            .find_all(&Query::new().fetch(Fetch::Shallow))
            .await?
            .iter()
            .map(|row| catalog::tag_from_row(row).map(|tag| (tag.id.clone(), tag)))
            .collect()
    }

    async fn load_packages(&self, tags: &HashMap<String, Tag>) -> CoreResult<()> {
        let packages = self
            .catalog(PACKAGE_ENTITY_TYPE)?
            .find_all(&Query::new().fetch(Fetch::Shallow))
            .await?
            .iter()
            .map(|row| catalog::package_from_row(row, tags))
            .collect::<CoreResult<Vec<_>>>()?;

        // Parents first, so every insert finds its parent.
        let mut tree = PackageTree::new();
        let mut pending = packages;
        while !pending.is_empty() {
            let before = pending.len();
            let mut rest = Vec::new();
            for package in pending {
                let ready = package
                    .parent
                    .as_deref()
                    .map_or(true, |parent| tree.contains(parent));
                if ready {
                    tree.insert(package)?;
                } else {
                    rest.push(package);
                }
            }
            if rest.len() == before {
                let ids: Vec<&str> = rest.iter().map(|p| p.id.as_str()).collect();
                return Err(CoreError::invalid_state(format!(
                    "packages with missing or cyclic parents: {}",
                    ids.join(", ")
                )));
            }
            pending = rest;
        }
        debug!("Loaded {} packages", tree.iter().count());
        *self.packages.write() = tree;
        Ok(())
    }

    /// Registers every stored type that is not registered yet, parents and
    /// reference targets first. Storage is expected to exist already.
    async fn load_entity_types(&self, tags: &HashMap<String, Tag>) -> CoreResult<usize> {
        let index = self.entity_types();
        let type_rows: Vec<Entity> = self
            .catalog(ENTITY_TYPE_ENTITY_TYPE)?
            .find_all(&Query::new().fetch(Fetch::Shallow))
            .await?
            .into_iter()
            .filter(|row| row.id_key().map_or(false, |name| !index.contains(&name)))
            .collect();
        if type_rows.is_empty() {
            return Ok(0);
        }
        let attribute_rows = self
            .catalog(ATTRIBUTE_ENTITY_TYPE)?
            .find_all(&Query::new().fetch(Fetch::Shallow))
            .await?;

        let mut attribute_names = HashMap::new();
        let mut by_owner: HashMap<String, Vec<Entity>> = HashMap::new();
        for row in attribute_rows {
            if let (Ok(id), Some(name)) = (row.id_key(), row.get_str(catalog::ATTRIBUTE_NAME)) {
                attribute_names.insert(id, name.to_string());
            }
            if let Some(owner) = catalog::attribute_owner(&row) {
                by_owner.entry(owner).or_default().push(row);
            }
        }

        let nodes = type_rows
            .iter()
            .map(|row| {
                let name = row.id_key()?;
                catalog::dependency_node(row, by_owner.get(&name).map_or(&[][..], Vec::as_slice))
            })
            .collect::<CoreResult<Vec<_>>>()?;
        for i in dependency_order(&nodes)? {
            let row = &type_rows[i];
            let name = &nodes[i].name;
            let parent = match catalog::entity_type_extends(row) {
                Some(parent) => Some(index.require(&parent)?),
                None => None,
            };
            let entity_type = catalog::entity_type_from_rows(
                row,
                by_owner.get(name).map_or(&[][..], Vec::as_slice),
                tags,
                &attribute_names,
                parent,
            )?;
            if !entity_type.is_abstract && !self.registry.has_collection(&entity_type.backend) {
                warn!(
                    "Entity type {} uses unknown backend {}",
                    entity_type.name, entity_type.backend
                );
            } else if !entity_type.is_abstract
                && !self.registry.collection(&entity_type.backend)?.has_repository(name)
            {
                warn!("Storage for entity type {} is missing", name);
            }
            index.insert(entity_type);
        }
        Ok(nodes.len())
    }

    async fn reconcile_locked(&self) -> CoreResult<ReconcileReport> {
        let index = self.entity_types();
        let mut report = ReconcileReport::default();

        let catalog_backend = self.registry.collection(self.system_types.backend())?;
        for name in CATALOG_ENTITY_TYPES {
            let entity_type = match index.get(name) {
                Some(entity_type) => entity_type,
                None => {
                    let definition = self
                        .system_types
                        .get_system_entity(name)
                        .ok_or_else(|| CoreError::unknown_entity_type(name))?;
                    index.insert((*definition).clone())
                }
            };
            if !catalog_backend.has_repository(name) {
                catalog_backend.create_repository(&entity_type).await?;
                info!("Recreated catalog repository {}", name);
                report
                    .repaired
                    .push(format!("created catalog repository `{name}`"));
            }
        }

        for entity_type in index.all().iter().filter(|t| !t.is_abstract) {
            let Ok(backend) = self.registry.collection(&entity_type.backend) else {
                report.missing_storage.push(entity_type.name.clone());
                continue;
            };
            if !backend.has_repository(&entity_type.name) {
                warn!("Entity type {} has no storage", entity_type.name);
                report.missing_storage.push(entity_type.name.clone());
                continue;
            }
            report
                .repaired
                .extend(backend.repair_repository(entity_type).await?);
        }

        for backend in self.registry.collections() {
            for name in backend.entity_type_names() {
                if !index.contains(&name) {
                    warn!("Orphaned storage {} in {}", name, backend.name());
                    report
                        .orphaned_storage
                        .push(format!("{}/{name}", backend.name()));
                }
            }
        }
        info!(
            "Reconciled: {} repairs, {} missing, {} orphaned",
            report.repaired.len(),
            report.missing_storage.len(),
            report.orphaned_storage.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entidb_core::DataType;

    #[test]
    fn identifiers_are_kept_or_generated() {
        let kept = AttributeId::new();
        let mut person = EntityType::new("person")
            .with_id_attribute(Attribute::new("id", DataType::String).required().with_id(kept))
            .with_attribute(Attribute::new("address", DataType::Compound))
            .with_attribute(Attribute::new("street", DataType::String).with_parent("address"));
        assign_identifiers(&mut person);
        assert_eq!(person.attributes[0].id, Some(kept));
        assert!(person.attributes.iter().all(|a| a.id.is_some()));
        assert_ne!(person.attributes[1].id, person.attributes[2].id);
    }

    #[test]
    fn tags_are_collected_from_type_and_attributes() {
        let tag = Tag::new("pii", "Personal", "isA", "http://example.org/pii");
        let person = EntityType::new("person")
            .with_tag(tag.clone())
            .with_id_attribute(Attribute::new("id", DataType::String).required())
            .with_attribute(Attribute::new("email", DataType::Email).with_tag(tag));
        assert_eq!(tags_of(&person).len(), 2);
    }

    #[test]
    fn an_empty_report_is_clean() {
        let mut report = ReconcileReport::default();
        assert!(report.is_clean());
        report.orphaned_storage.push("memory/ghost".to_string());
        assert!(!report.is_clean());
    }
}
