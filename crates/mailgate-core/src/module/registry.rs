//! Module registry

use super::{Factory, ModuleArgs, ModuleInstance, ModuleKind};
use crate::check::{FailAction, StatelessCheck, StatelessStages};
use mailgate_common::{Binding, ConfigError, FactoryError, ModuleDescriptor};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

static GLOBAL_REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Mutable registry used while the process initializes
#[derive(Default)]
pub struct RegistryBuilder {
    factories: BTreeMap<String, Factory>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a unique module name
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), ConfigError>
    where
        F: Fn(&ModuleArgs<'_>) -> Result<ModuleKind, FactoryError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(ConfigError::DuplicateRegistration(name));
        }
        debug!(module = %name, "Registered module");
        self.factories.insert(name, Box::new(factory));
        Ok(())
    }

    /// Register a check made of plain stage functions.
    ///
    /// Instances accept a single optional `fail_action` option that replaces
    /// `default_action`.
    pub fn register_stateless_check(
        &mut self,
        name: impl Into<String>,
        default_action: FailAction,
        stages: StatelessStages,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        let check_name = name.clone();

        self.register(name, move |args| {
            let mut map = args.config_map();
            map.bind(Binding::string("fail_action").validate(|value| match value.as_str() {
                Some(directive) => directive
                    .parse::<FailAction>()
                    .map(|_| ())
                    .map_err(|e| e.reason),
                None => Ok(()),
            }));
            let bound = map.process()?;

            let fail_action = match bound.string("fail_action") {
                Some(directive) => directive.parse()?,
                None => default_action.clone(),
            };

            Ok(ModuleKind::Check(Arc::new(StatelessCheck::new(
                check_name.clone(),
                args.descriptor.instance_name.clone(),
                fail_action,
                stages,
            ))))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Freeze the registry; no registrations are possible afterwards
    pub fn build(self) -> Registry {
        Registry {
            factories: self.factories,
        }
    }
}

/// Read-only registry of module factories
pub struct Registry {
    factories: BTreeMap<String, Factory>,
}

impl Registry {
    /// Build one module instance
    pub fn instantiate(
        &self,
        descriptor: &ModuleDescriptor,
        args: &toml::Table,
        globals: &toml::Table,
    ) -> Result<ModuleInstance, ConfigError> {
        let factory = self
            .factories
            .get(&descriptor.module_name)
            .ok_or_else(|| ConfigError::UnknownModule(descriptor.module_name.clone()))?;

        let kind = factory(&ModuleArgs {
            descriptor,
            args,
            globals,
        })
        .map_err(|source| ConfigError::Factory {
            module: descriptor.module_name.clone(),
            instance: descriptor.instance_name.clone(),
            source,
        })?;

        info!(
            module = %descriptor.module_name,
            instance = %descriptor.instance_name,
            role = kind.role(),
            "Module instantiated"
        );
        Ok(ModuleInstance::new(descriptor.clone(), kind))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered module names, sorted
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Make this registry the process-wide one. Only the first call succeeds.
    pub fn install(self) -> Result<&'static Registry, ConfigError> {
        GLOBAL_REGISTRY
            .set(self)
            .map_err(|_| ConfigError::RegistryAlreadyInstalled)?;
        GLOBAL_REGISTRY
            .get()
            .ok_or(ConfigError::RegistryAlreadyInstalled)
    }

    /// The installed process-wide registry
    pub fn global() -> Option<&'static Registry> {
        GLOBAL_REGISTRY.get()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("modules", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckContext, CheckResult, CheckStage};
    use pretty_assertions::assert_eq;

    fn accept(_: &CheckContext) -> anyhow::Result<CheckResult> {
        Ok(CheckResult::accept())
    }

    fn table(src: &str) -> toml::Table {
        toml::from_str(src).unwrap()
    }

    fn builder() -> RegistryBuilder {
        let mut builder = RegistryBuilder::new();
        builder
            .register_stateless_check(
                "noop",
                FailAction::reject(),
                StatelessStages {
                    connection: Some(accept),
                    ..Default::default()
                },
            )
            .unwrap();
        builder
    }

    fn check_of(instance: &ModuleInstance) -> Arc<dyn crate::check::Check> {
        match instance.kind() {
            ModuleKind::Check(check) => check.clone(),
            other => panic!("expected a check, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_registration() {
        let mut builder = builder();
        let err = builder
            .register_stateless_check("noop", FailAction::reject(), StatelessStages::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRegistration(ref n) if n == "noop"));
        assert!(builder.contains("noop"));
    }

    #[test]
    fn test_unknown_module() {
        let registry = builder().build();
        let err = registry
            .instantiate(
                &ModuleDescriptor::new("missing", "missing"),
                &toml::Table::new(),
                &toml::Table::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModule(ref n) if n == "missing"));
    }

    #[tokio::test]
    async fn test_default_fail_action() {
        let registry = builder().build();
        let instance = registry
            .instantiate(
                &ModuleDescriptor::new("noop", "first"),
                &toml::Table::new(),
                &toml::Table::new(),
            )
            .unwrap();

        assert_eq!(instance.instance_name(), "first");
        let check = check_of(&instance);
        assert_eq!(check.name(), "noop");
        assert_eq!(check.fail_action(), &FailAction::reject());
        let result = check
            .run(&CheckStage::Connection, &CheckContext::new("m"))
            .await
            .unwrap();
        assert!(result.is_accept());
    }

    #[test]
    fn test_fail_action_override() {
        let registry = builder().build();
        let instance = registry
            .instantiate(
                &ModuleDescriptor::new("noop", "advisory"),
                &table(r#"fail_action = "quarantine score 2""#),
                &toml::Table::new(),
            )
            .unwrap();

        let mut expected = FailAction::quarantine();
        expected.score_adjustment = Some(2.0);
        assert_eq!(check_of(&instance).fail_action(), &expected);
    }

    #[test]
    fn test_invalid_fail_action() {
        let registry = builder().build();
        let err = registry
            .instantiate(
                &ModuleDescriptor::new("noop", "bad"),
                &table(r#"fail_action = "ignore reject""#),
                &toml::Table::new(),
            )
            .unwrap_err();

        assert!(matches!(err, ConfigError::Factory { ref instance, .. } if instance == "bad"));
        assert!(matches!(
            err.root_config_error(),
            ConfigError::InvalidOptionValue { key, .. } if key == "fail_action"
        ));
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        let registry = builder().build();
        let err = registry
            .instantiate(
                &ModuleDescriptor::new("noop", "noop"),
                &table("level = 3"),
                &toml::Table::new(),
            )
            .unwrap_err();
        assert_eq!(err.root_config_error().key(), Some("level"));
    }

    #[test]
    fn test_distinct_names_instantiate_independently() {
        let mut builder = builder();
        builder
            .register_stateless_check("aaa", FailAction::ignore(), StatelessStages::default())
            .unwrap();
        let registry = builder.build();
        assert_eq!(registry.module_names().collect::<Vec<_>>(), vec!["aaa", "noop"]);

        for name in ["aaa", "noop"] {
            let instance = registry
                .instantiate(
                    &ModuleDescriptor::new(name, name),
                    &toml::Table::new(),
                    &toml::Table::new(),
                )
                .unwrap();
            assert_eq!(check_of(&instance).name(), name);
        }
    }
}
