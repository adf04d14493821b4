//! Persistence for named measurement scripts.
//!
//! Higher-level orchestration drives bias sweeps from named scripts — two
//! parallel bias lists plus a creation timestamp. The store keeps them in a
//! name-keyed mapping and persists the whole file (pretty JSON) on every
//! save; there is no incremental update, a save is always a full overwrite.
//! A missing file on open simply means an empty store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AcqError, AcqResult};

/// A named pair of bias lists for multi-bias point measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementScript {
    /// Unique script name, the key in the store.
    pub name: String,
    /// First bias channel values (V), one per sweep step.
    pub bias_list_a: Vec<f64>,
    /// Second bias channel values (V), paired with `bias_list_a`.
    pub bias_list_b: Vec<f64>,
    /// When the script was created.
    pub created_time: DateTime<Utc>,
}

impl MeasurementScript {
    /// Create a script stamped with the current time.
    pub fn new(name: impl Into<String>, bias_list_a: Vec<f64>, bias_list_b: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            bias_list_a,
            bias_list_b,
            created_time: Utc::now(),
        }
    }

    /// Check the bias lists pair up.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the lists are empty or of different lengths.
    pub fn validate(&self) -> AcqResult<()> {
        if self.bias_list_a.is_empty() {
            return Err(AcqError::InvalidArgument(format!(
                "script '{}' has no bias steps",
                self.name
            )));
        }
        if self.bias_list_a.len() != self.bias_list_b.len() {
            return Err(AcqError::InvalidArgument(format!(
                "script '{}' bias lists differ in length: {} vs {}",
                self.name,
                self.bias_list_a.len(),
                self.bias_list_b.len()
            )));
        }
        Ok(())
    }
}

/// Name-keyed script storage backed by one JSON file.
pub struct ScriptStore {
    path: PathBuf,
    scripts: HashMap<String, MeasurementScript>,
}

impl ScriptStore {
    /// Open a store at `path`, loading any existing scripts.
    ///
    /// A missing file yields an empty store; an unreadable or malformed file
    /// is an error so saved scripts are never silently clobbered.
    pub fn open(path: impl AsRef<Path>) -> AcqResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let scripts = if path.exists() {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str(&json)?
        } else {
            HashMap::new()
        };

        Ok(Self { path, scripts })
    }

    /// Validate, insert, and persist a script. Replaces any script of the
    /// same name.
    pub fn save_script(&mut self, script: MeasurementScript) -> AcqResult<()> {
        script.validate()?;
        if self.scripts.contains_key(&script.name) {
            warn!(name = %script.name, "overwriting existing measurement script");
        }
        self.scripts.insert(script.name.clone(), script);
        self.persist()
    }

    /// Remove a script by name and persist. Returns whether it existed.
    pub fn remove_script(&mut self, name: &str) -> AcqResult<bool> {
        let existed = self.scripts.remove(name).is_some();
        if existed {
            self.persist()?;
        }
        Ok(existed)
    }

    /// Look up a script by name.
    pub fn get(&self, name: &str) -> Option<&MeasurementScript> {
        self.scripts.get(name)
    }

    /// All stored scripts.
    pub fn all(&self) -> &HashMap<String, MeasurementScript> {
        &self.scripts
    }

    fn persist(&self) -> AcqResult<()> {
        let json = serde_json::to_string_pretty(&self.scripts)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}
