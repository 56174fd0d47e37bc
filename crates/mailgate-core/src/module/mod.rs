//! Module registry and instantiated modules
//!
//! Modules are registered by name in a [`RegistryBuilder`] while the process
//! initializes. The builder is then frozen into a read-only [`Registry`],
//! which turns `[[modules]]` declarations into a [`ModuleSet`].

mod registry;
mod set;

pub use registry::{Registry, RegistryBuilder};
pub use set::ModuleSet;

use crate::check::Check;
use crate::dns::RecordProvider;
use anyhow::Context;
use mailgate_common::{ConfigMap, FactoryError, ModuleDescriptor};
use mailgate_storage::BlobStore;
use std::fmt;
use std::sync::Arc;

/// What an instantiated module can be used as
#[derive(Clone)]
pub enum ModuleKind {
    Check(Arc<dyn Check>),
    BlobStore(Arc<dyn BlobStore>),
    RecordProvider(Arc<dyn RecordProvider>),
}

impl ModuleKind {
    pub fn role(&self) -> &'static str {
        match self {
            ModuleKind::Check(_) => "check",
            ModuleKind::BlobStore(_) => "blob store",
            ModuleKind::RecordProvider(_) => "record provider",
        }
    }
}

impl fmt::Debug for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.role())
    }
}

/// A configured module instance
#[derive(Debug, Clone)]
pub struct ModuleInstance {
    descriptor: ModuleDescriptor,
    kind: ModuleKind,
}

impl ModuleInstance {
    pub fn new(descriptor: ModuleDescriptor, kind: ModuleKind) -> Self {
        Self { descriptor, kind }
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn kind(&self) -> &ModuleKind {
        &self.kind
    }

    pub fn instance_name(&self) -> &str {
        &self.descriptor.instance_name
    }

    /// Run the start phase, for modules that defer I/O until after
    /// configuration
    pub async fn start(&self) -> anyhow::Result<()> {
        match &self.kind {
            ModuleKind::BlobStore(store) => store
                .start()
                .await
                .with_context(|| format!("failed to start {}", self.descriptor)),
            ModuleKind::Check(_) | ModuleKind::RecordProvider(_) => Ok(()),
        }
    }
}

/// Everything a factory gets to build one instance
#[derive(Debug)]
pub struct ModuleArgs<'a> {
    pub descriptor: &'a ModuleDescriptor,
    pub args: &'a toml::Table,
    pub globals: &'a toml::Table,
}

impl<'a> ModuleArgs<'a> {
    /// Start declaring options for this instance
    pub fn config_map(&self) -> ConfigMap<'a> {
        ConfigMap::new(self.descriptor.to_string(), self.args).with_globals(self.globals)
    }
}

/// Builds a module instance from its options
pub type Factory =
    Box<dyn Fn(&ModuleArgs<'_>) -> Result<ModuleKind, FactoryError> + Send + Sync + 'static>;
