use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::{Config, FileEntry};
use crate::remote::Remote;

const CONFIG_FILE: &str = "config.json";
const ANALYSES_DIR: &str = "analyses";
const SCRATCH_DIR: &str = "scratch";
const RESOURCES_DIR: &str = "resources";

/// Result of an `ensure_cached` call. The `Fetched` variant is the
/// on-cache-change notification: callers refresh whatever presentation
/// state mirrors the file's cached flag when they see it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit(PathBuf),
    Fetched(PathBuf),
}

impl CacheOutcome {
    pub fn path(&self) -> &Path {
        match self {
            CacheOutcome::Hit(p) | CacheOutcome::Fetched(p) => p,
        }
    }

    pub fn freshly_fetched(&self) -> bool {
        matches!(self, CacheOutcome::Fetched(_))
    }
}

/// The fixed local directory under which everything lives: mirrored files,
/// analysis records, launch scratch space, and the engine configuration.
#[derive(Clone)]
pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    pub fn open(root: &Path) -> Result<Self> {
        if !root.join(CONFIG_FILE).is_file() {
            return Err(Error::Config(format!(
                "no cache found at {} (run `lightbox init`)",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn init(root: &Path, force: bool) -> Result<Self> {
        if root.join(CONFIG_FILE).exists() && !force {
            return Err(Error::Config(format!(
                "cache already initialized at {} (use --force to re-init)",
                root.display()
            )));
        }

        fs::create_dir_all(root.join(ANALYSES_DIR))?;
        fs::create_dir_all(root.join(SCRATCH_DIR))?;
        fs::create_dir_all(root.join(RESOURCES_DIR))?;

        let cache = Self {
            root: root.to_path_buf(),
        };
        cache.write_config(&Config {
            version: 1,
            remote: None,
        })?;
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn analyses_dir(&self) -> PathBuf {
        self.root.join(ANALYSES_DIR)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    /// Init-file templates live here.
    pub fn resources_dir(&self) -> PathBuf {
        self.root.join(RESOURCES_DIR)
    }

    pub fn read_config(&self) -> Result<Config> {
        let bytes = fs::read(self.root.join(CONFIG_FILE))?;
        let cfg: Config = serde_json::from_slice(&bytes)?;
        if cfg.version != 1 {
            return Err(Error::Config(format!(
                "unsupported config version {}",
                cfg.version
            )));
        }
        Ok(cfg)
    }

    pub fn write_config(&self, cfg: &Config) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(cfg)?;
        write_atomic(&self.root.join(CONFIG_FILE), &bytes)?;
        Ok(())
    }

    /// Existence at the resolved path is the entire cached test; contents
    /// are never validated and never re-fetched.
    pub fn is_cached(&self, file: &FileEntry) -> bool {
        file.cache_path(&self.root).exists()
    }

    /// Materialize `file` locally, downloading at most once. Safe to call
    /// repeatedly: a present file short-circuits before any remote call.
    /// On download failure the already-created directories stay in place
    /// and the next call retries.
    pub fn ensure_cached(&self, remote: &dyn Remote, file: &FileEntry) -> Result<CacheOutcome> {
        let path = file.cache_path(&self.root);
        if path.exists() {
            return Ok(CacheOutcome::Hit(path));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        remote
            .download_file(&file.parent_id, &file.name, &path)
            .map_err(|err| Error::CacheFetch {
                container_id: file.parent_id.clone(),
                filename: file.name.clone(),
                reason: err.to_string(),
            })?;

        tracing::debug!(file = %file.id, path = %path.display(), "cached remote file");
        Ok(CacheOutcome::Fetched(path))
    }

    /// Tear down and recreate the disposable bind-mount area. Called once
    /// per container launch.
    pub fn reset_scratch(&self) -> Result<PathBuf> {
        let scratch = self.scratch_dir();
        if scratch.exists() {
            fs::remove_dir_all(&scratch)?;
        }
        fs::create_dir_all(&scratch)?;
        Ok(scratch)
    }
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
