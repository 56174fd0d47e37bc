//! Module option binder
//!
//! Every module declares the options it understands on a [`ConfigMap`] and
//! then calls [`ConfigMap::process`]. Processing walks the declarations, not
//! the supplied table, so the outcome does not depend on the order options
//! appear in the file, and a key declared twice keeps only its last
//! declaration.

use crate::error::ConfigError;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::debug;

/// Expected type of an option value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Bool,
    Integer,
    /// Integers are widened to floats
    Float,
    StringList,
    Table,
}

impl OptionKind {
    pub fn name(&self) -> &'static str {
        match self {
            OptionKind::String => "string",
            OptionKind::Bool => "boolean",
            OptionKind::Integer => "integer",
            OptionKind::Float => "float",
            OptionKind::StringList => "string list",
            OptionKind::Table => "table",
        }
    }

    /// Check a supplied value against this kind, returning its normalized form
    fn coerce(&self, key: &str, value: &toml::Value) -> Result<toml::Value, ConfigError> {
        use toml::Value;

        let accepted = match (self, value) {
            (OptionKind::String, Value::String(_))
            | (OptionKind::Bool, Value::Boolean(_))
            | (OptionKind::Integer, Value::Integer(_))
            | (OptionKind::Float, Value::Float(_))
            | (OptionKind::Table, Value::Table(_)) => Some(value.clone()),
            (OptionKind::Float, Value::Integer(i)) => Some(Value::Float(*i as f64)),
            (OptionKind::StringList, Value::Array(items)) if items.iter().all(Value::is_str) => {
                Some(value.clone())
            }
            _ => None,
        };

        accepted.ok_or_else(|| ConfigError::InvalidOptionType {
            key: key.to_string(),
            expected: self.name(),
            got: value.type_str(),
        })
    }
}

type Validator = Box<dyn Fn(&toml::Value) -> Result<(), String>>;

/// Declaration of a single option
pub struct Binding {
    key: String,
    kind: OptionKind,
    required: bool,
    inherit_global: bool,
    default: Option<toml::Value>,
    validator: Option<Validator>,
}

impl Binding {
    pub fn new(key: impl Into<String>, kind: OptionKind) -> Self {
        Self {
            key: key.into(),
            kind,
            required: false,
            inherit_global: false,
            default: None,
            validator: None,
        }
    }

    pub fn string(key: impl Into<String>) -> Self {
        Self::new(key, OptionKind::String)
    }

    pub fn bool(key: impl Into<String>) -> Self {
        Self::new(key, OptionKind::Bool)
    }

    pub fn integer(key: impl Into<String>) -> Self {
        Self::new(key, OptionKind::Integer)
    }

    pub fn float(key: impl Into<String>) -> Self {
        Self::new(key, OptionKind::Float)
    }

    pub fn string_list(key: impl Into<String>) -> Self {
        Self::new(key, OptionKind::StringList)
    }

    pub fn table(key: impl Into<String>) -> Self {
        Self::new(key, OptionKind::Table)
    }

    /// Fail processing when neither the block, the globals nor a default supply a value
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<toml::Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Fall back to the same key in the global table before the default
    pub fn inherit_global(mut self) -> Self {
        self.inherit_global = true;
        self
    }

    pub fn validate<F>(mut self, validator: F) -> Self
    where
        F: Fn(&toml::Value) -> Result<(), String> + 'static,
    {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("inherit_global", &self.inherit_global)
            .field("default", &self.default)
            .finish()
    }
}

/// Option declarations for one configuration block
pub struct ConfigMap<'a> {
    block: String,
    args: &'a toml::Table,
    globals: Option<&'a toml::Table>,
    bindings: Vec<Binding>,
}

impl<'a> ConfigMap<'a> {
    /// `block` names the configuration block in diagnostics
    pub fn new(block: impl Into<String>, args: &'a toml::Table) -> Self {
        Self {
            block: block.into(),
            args,
            globals: None,
            bindings: Vec::new(),
        }
    }

    pub fn with_globals(mut self, globals: &'a toml::Table) -> Self {
        self.globals = Some(globals);
        self
    }

    /// Declare an option; redeclaring a key replaces the earlier declaration
    pub fn bind(&mut self, binding: Binding) -> &mut Self {
        match self.bindings.iter_mut().find(|b| b.key == binding.key) {
            Some(existing) => *existing = binding,
            None => self.bindings.push(binding),
        }
        self
    }

    /// Evaluate all declarations against the supplied options
    pub fn process(&self) -> Result<BoundConfig, ConfigError> {
        if let Some(unknown) = self
            .args
            .keys()
            .find(|key| !self.bindings.iter().any(|b| &b.key == *key))
        {
            return Err(ConfigError::UnknownOption {
                key: unknown.clone(),
            });
        }

        let mut values = BTreeMap::new();

        for binding in &self.bindings {
            let supplied = self.args.get(&binding.key).or_else(|| {
                if binding.inherit_global {
                    self.globals.and_then(|g| g.get(&binding.key))
                } else {
                    None
                }
            });

            let value = match (supplied, &binding.default) {
                (Some(raw), _) => binding.kind.coerce(&binding.key, raw)?,
                (None, Some(default)) => binding.kind.coerce(&binding.key, default)?,
                (None, None) if binding.required => {
                    return Err(ConfigError::MissingRequiredOption {
                        key: binding.key.clone(),
                    })
                }
                (None, None) => continue,
            };

            if let Some(validator) = &binding.validator {
                validator(&value).map_err(|reason| ConfigError::InvalidOptionValue {
                    key: binding.key.clone(),
                    reason,
                })?;
            }

            values.insert(binding.key.clone(), value);
        }

        debug!(block = %self.block, options = values.len(), "Processed configuration block");
        Ok(BoundConfig { values })
    }
}

/// Result of processing a [`ConfigMap`]
#[derive(Debug, Clone, PartialEq)]
pub struct BoundConfig {
    values: BTreeMap<String, toml::Value>,
}

impl BoundConfig {
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn value(&self, key: &str) -> Option<&toml::Value> {
        self.values.get(key)
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(toml::Value::as_str)
    }

    /// Like [`BoundConfig::string`] but treats absence as a missing option
    pub fn require_string(&self, key: &str) -> Result<&str, ConfigError> {
        self.string(key)
            .ok_or_else(|| ConfigError::MissingRequiredOption {
                key: key.to_string(),
            })
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(toml::Value::as_bool)
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(toml::Value::as_integer)
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(toml::Value::as_float)
    }

    pub fn string_list(&self, key: &str) -> Option<Vec<String>> {
        self.values.get(key).and_then(|v| {
            v.as_array().map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect()
            })
        })
    }

    /// Deserialize a bound value into any serde type
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.values
            .get(key)
            .map(|v| {
                v.clone()
                    .try_into::<T>()
                    .map_err(|e| ConfigError::InvalidOptionValue {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })
            })
            .transpose()
    }
}
