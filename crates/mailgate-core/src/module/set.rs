//! Instantiated modules, addressed by instance name

use super::{ModuleInstance, ModuleKind, Registry};
use crate::check::Check;
use crate::dns::RecordProvider;
use mailgate_common::config::{Config, ModuleDecl};
use mailgate_common::ConfigError;
use mailgate_storage::BlobStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// All module instances of a running process
#[derive(Debug, Default)]
pub struct ModuleSet {
    /// Declaration order, used for the start phase
    order: Vec<String>,
    instances: HashMap<String, ModuleInstance>,
}

impl ModuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate every declaration exactly once
    pub fn instantiate(
        registry: &Registry,
        decls: &[ModuleDecl],
        globals: &toml::Table,
    ) -> Result<Self, ConfigError> {
        let mut set = Self::new();
        for decl in decls {
            set.insert(registry.instantiate(&decl.descriptor(), &decl.args, globals)?)?;
        }
        Ok(set)
    }

    pub fn from_config(registry: &Registry, config: &Config) -> Result<Self, ConfigError> {
        Self::instantiate(registry, &config.modules, &config.globals)
    }

    pub fn insert(&mut self, instance: ModuleInstance) -> Result<(), ConfigError> {
        let name = instance.instance_name().to_string();
        if self.instances.contains_key(&name) {
            return Err(ConfigError::DuplicateInstance(name));
        }
        self.order.push(name.clone());
        self.instances.insert(name, instance);
        Ok(())
    }

    pub fn get(&self, instance: &str) -> Option<&ModuleInstance> {
        self.instances.get(instance)
    }

    fn lookup(&self, instance: &str) -> Result<&ModuleInstance, ConfigError> {
        self.get(instance)
            .ok_or_else(|| ConfigError::UnknownInstance(instance.to_string()))
    }

    fn wrong_role(instance: &ModuleInstance, expected: &'static str) -> ConfigError {
        ConfigError::WrongModuleRole {
            instance: instance.instance_name().to_string(),
            expected,
            actual: instance.kind().role(),
        }
    }

    pub fn check(&self, instance: &str) -> Result<Arc<dyn Check>, ConfigError> {
        let found = self.lookup(instance)?;
        match found.kind() {
            ModuleKind::Check(check) => Ok(check.clone()),
            _ => Err(Self::wrong_role(found, "check")),
        }
    }

    pub fn blob_store(&self, instance: &str) -> Result<Arc<dyn BlobStore>, ConfigError> {
        let found = self.lookup(instance)?;
        match found.kind() {
            ModuleKind::BlobStore(store) => Ok(store.clone()),
            _ => Err(Self::wrong_role(found, "blob store")),
        }
    }

    pub fn record_provider(&self, instance: &str) -> Result<Arc<dyn RecordProvider>, ConfigError> {
        let found = self.lookup(instance)?;
        match found.kind() {
            ModuleKind::RecordProvider(provider) => Ok(provider.clone()),
            _ => Err(Self::wrong_role(found, "record provider")),
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instances in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &ModuleInstance> {
        self.order.iter().filter_map(|name| self.instances.get(name))
    }

    /// Run every module's start phase in declaration order
    pub async fn start(&self) -> anyhow::Result<()> {
        for instance in self.iter() {
            instance.start().await?;
        }
        info!(modules = self.len(), "All modules started");
        Ok(())
    }
}
