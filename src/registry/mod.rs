//! Function registry: request path → compiled module.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     functions_dir
//!     → scan regular files with an accepted extension
//!     → compile each (any failure aborts startup)
//!     → key "/" + file stem
//!     → freeze as immutable FunctionRegistry
//!
//! Request:
//!     path → resolve() → Some(Module) | None
//! ```
//!
//! # Design Decisions
//! - Built once, read-only afterwards; shared via Arc without locking
//! - A module that fails to compile is a deployment error, not a runtime one
//! - Lookups are exact matches on the full request target

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use wasmtime::{Engine, Module};

use crate::config::schema::RegistryConfig;
use crate::config::GatewayMode;

/// Errors raised while building the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The function directory could not be listed.
    #[error("cannot scan function directory {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A function file failed to compile.
    #[error("cannot compile {path}: {message}")]
    Compile { path: PathBuf, message: String },

    /// Two files map to the same request path.
    #[error("duplicate function path {0}")]
    Duplicate(String),
}

/// Immutable map from request path to compiled module.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    modules: HashMap<String, Module>,
}

impl FunctionRegistry {
    /// Scan the function directory for `mode` and compile every accepted file.
    pub fn load(engine: &Engine, config: &RegistryConfig, mode: GatewayMode) -> Result<Self, RegistryError> {
        Self::load_dir(engine, &config.resolve_dir(mode), &config.extensions)
    }

    /// Scan `dir` (non-recursively) for files whose extension is in `extensions`.
    pub fn load_dir(engine: &Engine, dir: &Path, extensions: &[String]) -> Result<Self, RegistryError> {
        let scan_err = |source| RegistryError::Scan {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(scan_err)? {
            let path = entry.map_err(scan_err)?.path();
            if !path.is_file() {
                continue;
            }
            let accepted = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| extensions.iter().any(|e| e == ext))
                .unwrap_or(false);
            if accepted {
                files.push(path);
            }
        }
        // Deterministic compile order and error reporting.
        files.sort();

        let mut modules = HashMap::new();
        for path in files {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                tracing::warn!(path = %path.display(), "Skipping function with non UTF-8 name");
                continue;
            };
            let key = format!("/{}", stem);
            let module = Module::from_file(engine, &path).map_err(|e| RegistryError::Compile {
                path: path.clone(),
                message: e.to_string(),
            })?;
            if modules.insert(key.clone(), module).is_some() {
                return Err(RegistryError::Duplicate(key));
            }
            tracing::debug!(function = %key, file = %path.display(), "Function compiled");
        }

        tracing::info!(
            dir = %dir.display(),
            functions = modules.len(),
            "Function registry built"
        );
        Ok(Self { modules })
    }

    /// Compile in-memory sources (binary or text format) keyed by path.
    pub fn from_sources<I, K, S>(engine: &Engine, sources: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (K, S)>,
        K: Into<String>,
        S: AsRef<[u8]>,
    {
        let mut modules = HashMap::new();
        for (path, source) in sources {
            let path = path.into();
            let module = Module::new(engine, source.as_ref()).map_err(|e| RegistryError::Compile {
                path: PathBuf::from(&path),
                message: e.to_string(),
            })?;
            if modules.insert(path.clone(), module).is_some() {
                return Err(RegistryError::Duplicate(path));
            }
        }
        Ok(Self { modules })
    }

    /// Look up the module registered for a request path.
    pub fn resolve(&self, path: &str) -> Option<&Module> {
        self.modules.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.modules.contains_key(path)
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("paths", &self.paths())
            .finish()
    }
}
