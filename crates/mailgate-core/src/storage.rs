//! Blob store modules

use crate::module::{ModuleKind, RegistryBuilder};
use mailgate_common::{Binding, ConfigError};
use mailgate_storage::{FsBlobStore, MemoryBlobStore, SqliteBlobStore};
use std::sync::Arc;

pub const FS: &str = "storage.blob.fs";
pub const MEMORY: &str = "storage.blob.memory";
pub const SQLITE: &str = "storage.blob.sqlite";

const DEFAULT_SQLITE_CONNECTIONS: i64 = 4;

fn positive(value: &toml::Value) -> Result<(), String> {
    match value.as_integer() {
        Some(n) if n > 0 && n <= i64::from(u32::MAX) => Ok(()),
        _ => Err("must be a positive integer".to_string()),
    }
}

pub(crate) fn register(builder: &mut RegistryBuilder) -> Result<(), ConfigError> {
    builder.register(FS, |args| {
        let mut map = args.config_map();
        map.bind(Binding::string("root").required());
        let bound = map.process()?;

        let store = FsBlobStore::open(bound.require_string("root")?)?;
        Ok(ModuleKind::BlobStore(Arc::new(store)))
    })?;

    builder.register(MEMORY, |args| {
        let mut map = args.config_map();
        map.bind(Binding::bool("create_only").default_value(false));
        let bound = map.process()?;

        let store = if bound.bool("create_only").unwrap_or(false) {
            MemoryBlobStore::create_only()
        } else {
            MemoryBlobStore::new()
        };
        Ok(ModuleKind::BlobStore(Arc::new(store)))
    })?;

    builder.register(SQLITE, |args| {
        let mut map = args.config_map();
        map.bind(Binding::string("path").required());
        map.bind(
            Binding::integer("max_connections")
                .default_value(DEFAULT_SQLITE_CONNECTIONS)
                .validate(positive),
        );
        let bound = map.process()?;

        let max_connections = bound
            .integer("max_connections")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(DEFAULT_SQLITE_CONNECTIONS as u32);
        let store = SqliteBlobStore::new(bound.require_string("path")?, max_connections);
        Ok(ModuleKind::BlobStore(Arc::new(store)))
    })?;

    Ok(())
}
