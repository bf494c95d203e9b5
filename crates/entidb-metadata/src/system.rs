//! Entity types declared in code.
//!
//! System types are built once, from constructor functions registered
//! explicitly at start-up. Their attributes get identifiers derived from
//! `entityType/attribute`, so a stored catalog row can be matched back to the
//! definition that produced it on every start.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use entidb_core::{
    Attribute, AttributeId, CoreError, CoreResult, DataType, EntityType, Package, OWNER_ATTRIBUTE,
};

use crate::catalog;

/// Root package of every system type.
pub const SYSTEM_PACKAGE: &str = "sys";
/// Package of the catalog types.
pub const METADATA_PACKAGE: &str = "sys_md";
/// Package of the security types.
pub const SECURITY_PACKAGE: &str = "sys_sec";

/// Builds one system entity type. Earlier registrations are visible through
/// the registry argument, so a constructor can extend them.
pub type SystemEntityTypeConstructor = fn(&SystemEntityTypeRegistry) -> CoreResult<EntityType>;

/// The abstract parent of every type whose rows have an owner.
pub fn owned_entity_type(_: &SystemEntityTypeRegistry) -> CoreResult<EntityType> {
    Ok(EntityType::new("Owned")
        .with_package(SECURITY_PACKAGE)
        .with_label("Owned")
        .abstract_type()
        .with_attribute(
            Attribute::new(OWNER_ATTRIBUTE, DataType::String)
                .read_only()
                .with_label("Owner"),
        ))
}

pub struct SystemEntityTypeRegistryBuilder {
    backend: String,
    constructors: Vec<SystemEntityTypeConstructor>,
}

impl SystemEntityTypeRegistryBuilder {
    #[must_use]
    pub fn register(mut self, constructor: SystemEntityTypeConstructor) -> Self {
        self.constructors.push(constructor);
        self
    }

    /// Runs the constructors in registration order.
    pub fn build(self) -> CoreResult<SystemEntityTypeRegistry> {
        let mut registry = SystemEntityTypeRegistry {
            backend: self.backend,
            types: Vec::with_capacity(self.constructors.len()),
            by_name: HashMap::new(),
            attribute_ids: HashSet::new(),
        };
        for constructor in self.constructors {
            let entity_type = constructor(&registry)?;
            registry.insert(entity_type)?;
        }
        debug!("Registered {} system entity types", registry.types.len());
        Ok(registry)
    }
}

/// Registry of the compiled-in entity types.
#[derive(Debug)]
pub struct SystemEntityTypeRegistry {
    backend: String,
    types: Vec<Arc<EntityType>>,
    by_name: HashMap<String, Arc<EntityType>>,
    attribute_ids: HashSet<AttributeId>,
}

impl SystemEntityTypeRegistry {
    /// Empty builder; every system type lives in `backend`.
    pub fn builder(backend: impl Into<String>) -> SystemEntityTypeRegistryBuilder {
        SystemEntityTypeRegistryBuilder {
            backend: backend.into(),
            constructors: Vec::new(),
        }
    }

    /// Builder preloaded with the catalog types and `sys_sec_Owned`.
    pub fn builtins(backend: impl Into<String>) -> SystemEntityTypeRegistryBuilder {
        Self::builder(backend)
            .register(catalog::tag_entity_type)
            .register(catalog::package_entity_type)
            .register(catalog::entity_type_entity_type)
            .register(catalog::attribute_entity_type)
            .register(owned_entity_type)
    }

    pub fn with_builtins(backend: impl Into<String>) -> CoreResult<Self> {
        Self::builtins(backend).build()
    }

    fn insert(&mut self, mut entity_type: EntityType) -> CoreResult<()> {
        if self.by_name.contains_key(&entity_type.name) {
            return Err(CoreError::already_exists(
                "system entity type",
                entity_type.name,
            ));
        }
        entity_type.is_system = true;
        entity_type.backend = self.backend.clone();
        for attribute in &mut entity_type.attributes {
            attribute.id = Some(AttributeId::derived(&entity_type.name, &attribute.name));
        }
        entity_type.validate()?;

        self.attribute_ids
            .extend(entity_type.attributes.iter().filter_map(|a| a.id));
        let entity_type = Arc::new(entity_type);
        self.by_name
            .insert(entity_type.name.clone(), entity_type.clone());
        self.types.push(entity_type);
        Ok(())
    }

    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    #[must_use]
    pub fn is_system_entity(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    #[must_use]
    pub fn get_system_entity(&self, name: &str) -> Option<Arc<EntityType>> {
        self.by_name.get(name).cloned()
    }

    #[must_use]
    pub fn is_system_attribute(&self, id: &AttributeId) -> bool {
        self.attribute_ids.contains(id)
    }

    /// System types in registration order.
    #[must_use]
    pub fn entity_types(&self) -> &[Arc<EntityType>] {
        &self.types
    }

    /// Packages the system types live in, parents first.
    #[must_use]
    pub fn packages(&self) -> Vec<Package> {
        vec![
            Package::new(SYSTEM_PACKAGE).with_label("System"),
            Package::new(METADATA_PACKAGE)
                .with_parent(SYSTEM_PACKAGE)
                .with_label("Metadata"),
            Package::new(SECURITY_PACKAGE)
                .with_parent(SYSTEM_PACKAGE)
                .with_label("Security"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entidb_core::{CATALOG_ENTITY_TYPES, OWNED_ENTITY_TYPE};

    fn note(registry: &SystemEntityTypeRegistry) -> CoreResult<EntityType> {
        let owned = registry
            .get_system_entity(OWNED_ENTITY_TYPE)
            .ok_or_else(|| CoreError::unknown_entity_type(OWNED_ENTITY_TYPE))?;
        Ok(EntityType::new("Note")
            .with_package(SECURITY_PACKAGE)
            .extending(owned)
            .with_id_attribute(Attribute::new("id", DataType::String).required()))
    }

    #[test]
    fn builtins_cover_the_catalog_and_ownership() {
        let registry = SystemEntityTypeRegistry::with_builtins("memory").expect("builtins");
        for name in CATALOG_ENTITY_TYPES {
            assert!(registry.is_system_entity(name), "{name}");
        }
        let owned = registry.get_system_entity(OWNED_ENTITY_TYPE).expect("owned");
        assert!(owned.is_abstract);
        assert!(owned.is_system);
        assert!(!registry.is_system_entity("demo"));
    }

    #[test]
    fn attribute_ids_are_stable_across_builds() {
        let first = SystemEntityTypeRegistry::with_builtins("memory").expect("first");
        let second = SystemEntityTypeRegistry::with_builtins("sqlite").expect("second");
        let a = first.get_system_entity(OWNED_ENTITY_TYPE).expect("owned");
        let b = second.get_system_entity(OWNED_ENTITY_TYPE).expect("owned");
        assert_eq!(a.attributes[0].id, b.attributes[0].id);
        assert_eq!(
            a.attributes[0].id,
            Some(AttributeId::derived(OWNED_ENTITY_TYPE, OWNER_ATTRIBUTE))
        );
        assert!(second.is_system_attribute(&AttributeId::derived(OWNED_ENTITY_TYPE, OWNER_ATTRIBUTE)));
        assert!(!second.is_system_attribute(&AttributeId::new()));
        assert_eq!(b.backend, "sqlite");
    }

    #[test]
    fn later_constructors_extend_earlier_ones() {
        let registry = SystemEntityTypeRegistry::builtins("memory")
            .register(note)
            .build()
            .expect("registry");
        let note = registry.get_system_entity("sys_sec_Note").expect("note");
        assert!(note.is_owned());
        assert_eq!(registry.entity_types().last().map(|t| t.name.as_str()), Some("sys_sec_Note"));
    }

    #[test]
    fn duplicate_registrations_fail() {
        let err = SystemEntityTypeRegistry::builtins("memory")
            .register(owned_entity_type)
            .build()
            .expect_err("duplicate");
        assert!(matches!(err, CoreError::AlreadyExists { .. }));
    }
}
