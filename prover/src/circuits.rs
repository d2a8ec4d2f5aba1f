//! Circuit identities and material resolution.
//!
//! Material for a circuit (witness generator, proving key, verification key)
//! comes from one of three sources:
//!
//! ```text
//! Memory     buffers handed over directly
//! Directory  {dir}/{name}.wasm, {dir}/{name}.zkey, {dir}/verifier-{name}.json
//! Urls       three explicit URLs
//! ```
//!
//! Any failure to resolve (unregistered kind, missing file, HTTP error, empty
//! artifact) surfaces as `MissingCircuit`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shroud_error::{Result, ShroudError};
use tracing::{debug, info};

/// The circuits the pipeline proves against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitKind {
    Transfer,
    Withdraw,
    Reshield,
}

impl CircuitKind {
    pub const ALL: [CircuitKind; 3] = [Self::Transfer, Self::Withdraw, Self::Reshield];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Withdraw => "withdraw",
            Self::Reshield => "reshield",
        }
    }

    pub fn wasm_file(&self) -> String {
        format!("{}.wasm", self.name())
    }

    pub fn zkey_file(&self) -> String {
        format!("{}.zkey", self.name())
    }

    pub fn verifier_file(&self) -> String {
        format!("verifier-{}.json", self.name())
    }
}

impl fmt::Display for CircuitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved circuit artifacts
#[derive(Clone, PartialEq, Eq)]
pub struct CircuitMaterial {
    pub wasm: Vec<u8>,
    pub zkey: Vec<u8>,
    pub verification_key: Vec<u8>,
}

impl CircuitMaterial {
    pub fn new(wasm: Vec<u8>, zkey: Vec<u8>, verification_key: Vec<u8>) -> Self {
        Self {
            wasm,
            zkey,
            verification_key,
        }
    }

    /// Binding digest over all three artifacts
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new_derive_key("shroud-circuit-material-v1");
        for part in [&self.wasm, &self.zkey, &self.verification_key] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        *hasher.finalize().as_bytes()
    }

    fn check(&self, kind: CircuitKind) -> Result<()> {
        let empty = [
            ("wasm", self.wasm.is_empty()),
            ("zkey", self.zkey.is_empty()),
            ("verification key", self.verification_key.is_empty()),
        ]
        .into_iter()
        .find(|(_, empty)| *empty);

        match empty {
            Some((part, _)) => Err(missing(kind, format!("{part} artifact is empty"))),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for CircuitMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitMaterial")
            .field("wasm_len", &self.wasm.len())
            .field("zkey_len", &self.zkey.len())
            .field("verification_key_len", &self.verification_key.len())
            .finish()
    }
}

/// Where to find a circuit's material
#[derive(Debug, Clone)]
pub enum CircuitSource {
    Memory(CircuitMaterial),
    Directory(PathBuf),
    Urls {
        wasm: String,
        zkey: String,
        verification_key: String,
    },
}

impl CircuitSource {
    /// URLs following the directory naming convention under `base`
    pub fn from_base_url(base: &str, kind: CircuitKind) -> Self {
        let base = base.trim_end_matches('/');
        Self::Urls {
            wasm: format!("{base}/{}", kind.wasm_file()),
            zkey: format!("{base}/{}", kind.zkey_file()),
            verification_key: format!("{base}/{}", kind.verifier_file()),
        }
    }
}

/// Registered circuit sources plus a cache of resolved material
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    sources: RwLock<HashMap<CircuitKind, CircuitSource>>,
    cache: RwLock<HashMap<CircuitKind, Arc<CircuitMaterial>>>,
    http: reqwest::Client,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every circuit kind under one directory
    pub fn from_directory(dir: impl AsRef<Path>) -> Self {
        let registry = Self::new();
        for kind in CircuitKind::ALL {
            registry.register(kind, CircuitSource::Directory(dir.as_ref().to_path_buf()));
        }
        registry
    }

    /// Register every circuit kind under one base URL
    pub fn from_base_url(base: &str) -> Self {
        let registry = Self::new();
        for kind in CircuitKind::ALL {
            registry.register(kind, CircuitSource::from_base_url(base, kind));
        }
        registry
    }

    /// Register (or replace) the source for `kind`, dropping cached material
    pub fn register(&self, kind: CircuitKind, source: CircuitSource) {
        self.sources.write().insert(kind, source);
        self.cache.write().remove(&kind);
    }

    pub fn is_registered(&self, kind: CircuitKind) -> bool {
        self.sources.read().contains_key(&kind)
    }

    pub fn registered(&self) -> Vec<CircuitKind> {
        let mut kinds: Vec<_> = self.sources.read().keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn is_cached(&self, kind: CircuitKind) -> bool {
        self.cache.read().contains_key(&kind)
    }

    /// Resolve material for `kind`, loading it on first use
    pub async fn resolve(&self, kind: CircuitKind) -> Result<Arc<CircuitMaterial>> {
        if let Some(material) = self.cache.read().get(&kind) {
            return Ok(material.clone());
        }

        let source = self
            .sources
            .read()
            .get(&kind)
            .cloned()
            .ok_or_else(|| missing(kind, "circuit is not registered"))?;

        let material = match source {
            CircuitSource::Memory(material) => material,
            CircuitSource::Directory(dir) => self.load_directory(kind, &dir).await?,
            CircuitSource::Urls {
                wasm,
                zkey,
                verification_key,
            } => CircuitMaterial {
                wasm: self.fetch(kind, &wasm).await?,
                zkey: self.fetch(kind, &zkey).await?,
                verification_key: self.fetch(kind, &verification_key).await?,
            },
        };
        material.check(kind)?;

        info!(circuit = %kind, "circuit material resolved");
        let material = Arc::new(material);
        self.cache.write().insert(kind, material.clone());
        Ok(material)
    }

    async fn load_directory(&self, kind: CircuitKind, dir: &Path) -> Result<CircuitMaterial> {
        let read = |file: String| async move {
            let path = dir.join(&file);
            debug!(path = %path.display(), "reading circuit artifact");
            tokio::fs::read(&path)
                .await
                .map_err(|e| missing(kind, format!("{}: {e}", path.display())))
        };

        Ok(CircuitMaterial {
            wasm: read(kind.wasm_file()).await?,
            zkey: read(kind.zkey_file()).await?,
            verification_key: read(kind.verifier_file()).await?,
        })
    }

    async fn fetch(&self, kind: CircuitKind, url: &str) -> Result<Vec<u8>> {
        debug!(url, "fetching circuit artifact");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| missing(kind, format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(missing(kind, format!("{url} returned {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| missing(kind, format!("{url}: {e}")))?;
        Ok(bytes.to_vec())
    }
}

fn missing(kind: CircuitKind, reason: impl Into<String>) -> ShroudError {
    ShroudError::MissingCircuit {
        circuit: kind.name().to_string(),
        reason: reason.into(),
    }
}
