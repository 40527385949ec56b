use std::collections::BTreeMap;

use sona_core::{SonaScriptError, Value};

/// Flat ordered store of script variables. Procedure-local names (leading
/// dot) are stored under their qualified key, e.g. `.count` inside procedure
/// `greet` lives at `greet.count`.
#[derive(Debug, Default)]
pub struct VariableStore {
    entries: BTreeMap<String, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_reserved(key: &str) -> Result<(), SonaScriptError> {
        let message = match key {
            "e" => "You cannot use 'e' as the name of a variable (e is the constant 2.71...).",
            "pi" => "You cannot use 'pi' as the name of a variable (pi is the constant 3.14...).",
            "undefined" => "You cannot use 'undefined' as the name of a variable.",
            _ => return Ok(()),
        };
        Err(SonaScriptError::new("ENGINE_RESERVED_NAME", message))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn numeric(&self, key: &str) -> Option<f64> {
        self.entries.get(key).and_then(Value::as_numeric)
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    pub fn set_numeric(&mut self, key: &str, value: f64) -> Result<(), SonaScriptError> {
        if !self.entries.contains_key(key) {
            Self::check_reserved(key)?;
        }
        self.entries.insert(key.to_string(), Value::Numeric(value));
        Ok(())
    }

    pub fn set_string(&mut self, key: &str, value: String) -> Result<(), SonaScriptError> {
        if !self.entries.contains_key(key) {
            Self::check_reserved(key)?;
        }
        self.entries.insert(key.to_string(), Value::Str(value));
        Ok(())
    }

    pub fn set_matrix(&mut self, key: &str, value: Vec<Vec<f64>>) -> Result<(), SonaScriptError> {
        if !self.entries.contains_key(key) {
            Self::check_reserved(key)?;
        }
        self.entries.insert(key.to_string(), Value::Matrix(value));
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read view of the store from inside one procedure scope. `procedure` is
/// empty at global depth.
#[derive(Clone, Copy)]
pub struct ScopedVariables<'a> {
    store: &'a VariableStore,
    procedure: &'a str,
}

impl<'a> ScopedVariables<'a> {
    pub fn new(store: &'a VariableStore, procedure: &'a str) -> Self {
        Self { store, procedure }
    }

    pub fn qualify(&self, name: &str) -> String {
        if name.starts_with('.') {
            format!("{}{}", self.procedure, name)
        } else {
            name.to_string()
        }
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.store.get(&self.qualify(name))
    }

    /// Every variable with the spelling under which the current scope can
    /// reach it; local variables appear both dotted and fully qualified.
    pub fn visible(&self) -> Vec<(String, &'a Value)> {
        let mut out = Vec::new();
        for (key, value) in self.store.iter() {
            if !self.procedure.is_empty() {
                if let Some(rest) = key.strip_prefix(self.procedure) {
                    if rest.starts_with('.') {
                        out.push((rest.to_string(), value));
                    }
                }
            }
            out.push((key.to_string(), value));
        }
        out
    }
}
