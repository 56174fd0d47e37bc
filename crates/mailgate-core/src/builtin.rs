//! Modules shipped with mailgate

use crate::check::require_tls;
use crate::dns::MemoryProvider;
use crate::module::{Registry, RegistryBuilder};
use crate::storage;
use mailgate_common::ConfigError;

/// Register every builtin module
pub fn register_builtins(builder: &mut RegistryBuilder) -> Result<(), ConfigError> {
    require_tls::register(builder)?;
    storage::register(builder)?;
    MemoryProvider::register(builder)?;
    Ok(())
}

/// A frozen registry holding only the builtin modules
pub fn builtin_registry() -> Result<Registry, ConfigError> {
    let mut builder = RegistryBuilder::new();
    register_builtins(&mut builder)?;
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckContext, CheckPipeline, CheckStage, ConnState, Disposition, TlsState};
    use crate::dns::{DnsRecord, RecordAppender};
    use crate::module::ModuleSet;
    use mailgate_common::{Config, ModuleDescriptor};
    use mailgate_storage::conformance::run_suite;
    use mailgate_storage::{BlobKey, BlobStore, OverwritePolicy};
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn table(src: &str) -> toml::Table {
        toml::from_str(src).unwrap()
    }

    fn path_args(key: &str, path: &Path) -> toml::Table {
        let mut args = toml::Table::new();
        args.insert(
            key.to_string(),
            toml::Value::String(path.to_string_lossy().into_owned()),
        );
        args
    }

    fn blob_store(registry: &Registry, module: &str, args: &toml::Table) -> Arc<dyn BlobStore> {
        let mut set = ModuleSet::new();
        set.insert(
            registry
                .instantiate(&ModuleDescriptor::new(module, "store"), args, &toml::Table::new())
                .unwrap(),
        )
        .unwrap();
        set.blob_store("store").unwrap()
    }

    #[test]
    fn test_builtin_names() {
        let registry = builtin_registry().unwrap();
        assert_eq!(
            registry.module_names().collect::<Vec<_>>(),
            vec![
                "libdns.memory",
                "require_tls",
                "storage.blob.fs",
                "storage.blob.memory",
                "storage.blob.sqlite",
            ]
        );
    }

    #[test]
    fn test_builtins_register_once() {
        let mut builder = RegistryBuilder::new();
        register_builtins(&mut builder).unwrap();
        assert!(matches!(
            register_builtins(&mut builder),
            Err(ConfigError::DuplicateRegistration(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_conformance() {
        let registry = &builtin_registry().unwrap();
        let replace = &toml::Table::new();
        let create_only = &table("create_only = true");

        run_suite(
            move || async move { blob_store(registry, storage::MEMORY, replace) },
            |_: &Arc<dyn BlobStore>| {},
        )
        .await;
        run_suite(
            move || async move { blob_store(registry, storage::MEMORY, create_only) },
            |_: &Arc<dyn BlobStore>| {},
        )
        .await;

        assert_eq!(
            blob_store(registry, storage::MEMORY, create_only).overwrite_policy(),
            OverwritePolicy::Reject
        );
    }

    #[tokio::test]
    async fn test_fs_store_conformance() {
        let registry = &builtin_registry().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        let cases = &AtomicUsize::new(0);

        run_suite(
            move || {
                let n = cases.fetch_add(1, Ordering::SeqCst);
                let args = path_args("root", &base.join(format!("case-{n}")));
                async move { blob_store(registry, storage::FS, &args) }
            },
            |_: &Arc<dyn BlobStore>| {},
        )
        .await;
    }

    #[tokio::test]
    async fn test_sqlite_store_conformance() {
        let registry = &builtin_registry().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        let cases = &AtomicUsize::new(0);

        run_suite(
            move || {
                let n = cases.fetch_add(1, Ordering::SeqCst);
                let args = path_args("path", &base.join(format!("case-{n}.db")));
                async move {
                    let store = blob_store(registry, storage::SQLITE, &args);
                    store.start().await.unwrap();
                    store
                }
            },
            |_: &Arc<dyn BlobStore>| {},
        )
        .await;
    }

    #[test]
    fn test_fs_requires_root() {
        let registry = builtin_registry().unwrap();
        let err = registry
            .instantiate(
                &ModuleDescriptor::new(storage::FS, "local"),
                &toml::Table::new(),
                &toml::Table::new(),
            )
            .unwrap_err();
        assert!(matches!(
            err.root_config_error(),
            ConfigError::MissingRequiredOption { key } if key == "root"
        ));
    }

    #[test]
    fn test_sqlite_instantiates_without_runtime() {
        let registry = builtin_registry().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let instance = registry
            .instantiate(
                &ModuleDescriptor::new(storage::SQLITE, "db"),
                &path_args("path", &dir.path().join("blobs.db")),
                &toml::Table::new(),
            )
            .unwrap();
        assert_eq!(instance.instance_name(), "db");
    }

    #[test]
    fn test_sqlite_rejects_zero_connections() {
        let registry = builtin_registry().unwrap();
        let err = registry
            .instantiate(
                &ModuleDescriptor::new(storage::SQLITE, "db"),
                &table("path = \"blobs.db\"\nmax_connections = 0"),
                &toml::Table::new(),
            )
            .unwrap_err();
        assert_eq!(err.root_config_error().key(), Some("max_connections"));
    }

    fn sample_config(blob_root: &Path) -> Config {
        Config::from_toml_str(&format!(
            r#"
[pipeline]
checks = ["tls"]
on_check_error = "fail_closed"

[[modules]]
module = "require_tls"
instance = "tls"

[[modules]]
module = "storage.blob.fs"
instance = "spool"
[modules.args]
root = {root:?}

[[modules]]
module = "libdns.memory"
[modules.args]
default_ttl = 60
"#,
            root = blob_root.to_string_lossy()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_module_set_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config(dir.path());
        let registry = builtin_registry().unwrap();

        let modules = ModuleSet::from_config(&registry, &config).unwrap();
        modules.start().await.unwrap();
        assert_eq!(modules.len(), 3);
        assert_eq!(
            modules
                .iter()
                .map(|m| m.instance_name())
                .collect::<Vec<_>>(),
            vec!["tls", "spool", "libdns.memory"]
        );

        let spool = modules.blob_store("spool").unwrap();
        let key = BlobKey::for_content(b"hello");
        spool.put(&key, b"hello").await.unwrap();
        assert!(dir.path().join(key.as_str()).exists());

        let dns = modules.record_provider("libdns.memory").unwrap();
        let created = dns
            .append_records("example.org", &[DnsRecord::txt("x", "y")])
            .await
            .unwrap();
        assert_eq!(created[0].ttl, Some(60));

        assert!(matches!(
            modules.check("spool"),
            Err(ConfigError::WrongModuleRole { expected: "check", actual: "blob store", .. })
        ));
        assert!(matches!(
            modules.blob_store("missing"),
            Err(ConfigError::UnknownInstance(_))
        ));
    }

    #[test]
    fn test_duplicate_instances() {
        let registry = builtin_registry().unwrap();
        let decls: Vec<mailgate_common::config::ModuleDecl> = vec![
            toml::from_str(r#"module = "storage.blob.memory""#).unwrap(),
            toml::from_str(r#"module = "storage.blob.memory""#).unwrap(),
        ];

        let err = ModuleSet::instantiate(&registry, &decls, &toml::Table::new()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateInstance(ref n) if n == "storage.blob.memory"));
    }

    #[tokio::test]
    async fn test_pipeline_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config(dir.path());
        let registry = builtin_registry().unwrap();
        let modules = ModuleSet::from_config(&registry, &config).unwrap();

        let pipeline = CheckPipeline::from_config(config.pipeline.as_ref().unwrap(), &modules).unwrap();
        assert_eq!(pipeline.len(), 1);

        let plaintext = CheckContext::new("m1").with_conn(ConnState::new("ESMTP"));
        let verdict = pipeline.evaluate(&CheckStage::Connection, &plaintext).await;
        let Disposition::Reject(reason) = &verdict.disposition else {
            panic!("expected reject, got {:?}", verdict.disposition);
        };
        assert_eq!(pipeline.reply_line(reason), "550 5.7.1 TLS conversation required");

        let secure = CheckContext::new("m2")
            .with_conn(ConnState::new("ESMTPS").with_tls(TlsState::established("TLSv1.3")));
        let verdict = pipeline.evaluate(&CheckStage::Connection, &secure).await;
        assert_eq!(verdict.disposition, Disposition::Accept);
    }

    #[test]
    fn test_pipeline_rejects_non_check_instance() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config(dir.path());
        let registry = builtin_registry().unwrap();
        let modules = ModuleSet::from_config(&registry, &config).unwrap();

        let pipeline_config = config.pipeline.as_mut().unwrap();
        pipeline_config.checks = vec!["spool".to_string()];
        assert!(matches!(
            CheckPipeline::from_config(pipeline_config, &modules),
            Err(ConfigError::WrongModuleRole { .. })
        ));
    }

    #[test]
    fn test_registry_install_once() {
        let first = builtin_registry().unwrap().install();
        let second = builtin_registry().unwrap().install();

        // only one of the two may succeed, whatever other tests did first
        assert!(first.is_err() || second.is_err());
        assert!(matches!(second, Err(ConfigError::RegistryAlreadyInstalled)));
        assert!(Registry::global().is_some());
    }
}
