use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::apps::{AppRegistry, AvailabilityProbe};
use crate::cache::{LocalCache, write_atomic};
use crate::error::{Error, Result};
use crate::model::{AnalysisRecord, LaunchMethod, Platform, new_record_id, now_rfc3339};
use crate::remote::{InputRef, Remote};

const RECORD_FILE: &str = "record.json";
const OUTPUT_DIR: &str = "output";

pub struct NewAnalysis {
    pub app: String,
    pub method: LaunchMethod,
    pub platform: Platform,
    pub container_id: String,
    pub input_files: BTreeMap<String, PathBuf>,
}

/// Create/edit/delete/commit of analysis records, one directory per record
/// under `<cache root>/analyses/`. Stateless over the directory: every
/// operation reads the record file fresh and rewrites it wholesale, so the
/// on-disk copy stays the single source of truth.
pub struct AnalysisStore {
    base_dir: PathBuf,
}

impl AnalysisStore {
    pub fn new(cache: &LocalCache) -> Self {
        Self {
            base_dir: cache.analyses_dir(),
        }
    }

    fn record_dir(&self, id: &str) -> PathBuf {
        self.base_dir.join(id)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.record_dir(id).join(RECORD_FILE)
    }

    fn persist(&self, record: &AnalysisRecord) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.record_path(&record.id), &bytes)?;
        Ok(())
    }

    /// Open a new Draft. The selected method must be declared and available
    /// at call time; the record's `output/` directory is created here and
    /// never relocated.
    pub fn create(
        &self,
        registry: &AppRegistry,
        probe: &dyn AvailabilityProbe,
        new: NewAnalysis,
    ) -> Result<AnalysisRecord> {
        registry.definition_for(&new.app, new.method, new.platform)?;
        if !registry
            .methods_for(&new.app, new.platform, probe)
            .contains(&new.method)
        {
            return Err(Error::MethodUnavailable {
                app: new.app,
                method: new.method,
            });
        }

        let id = new_record_id()?;
        let created_at = now_rfc3339();
        let name = format!("{}: {}", new.app, created_at);

        let output_dir = self.record_dir(&id).join(OUTPUT_DIR);
        fs::create_dir_all(&output_dir)?;

        let record = AnalysisRecord {
            version: 1,
            id,
            name,
            container_id: new.container_id,
            app: new.app,
            platform: new.platform,
            method: new.method,
            input_files: new.input_files,
            output_dir,
            created_at,
            committed_at: None,
        };
        self.persist(&record)?;
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Result<AnalysisRecord> {
        let path = self.record_path(id);
        if !path.is_file() {
            return Err(Error::NotFound(format!("analysis {id}")));
        }
        let bytes = fs::read(&path)?;
        let record: AnalysisRecord = serde_json::from_slice(&bytes)?;
        Ok(record)
    }

    /// All parseable records, oldest first. A malformed record file is
    /// skipped with a warning rather than failing the listing.
    pub fn list(&self) -> Result<Vec<AnalysisRecord>> {
        let mut out = Vec::new();
        if !self.base_dir.is_dir() {
            return Ok(out);
        }
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let path = entry.path().join(RECORD_FILE);
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping unreadable analysis record");
                    continue;
                }
            };
            match serde_json::from_slice::<AnalysisRecord>(&bytes) {
                Ok(record) => out.push(record),
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping malformed analysis record");
                }
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    /// Merge additional input files into a record. A later entry for the
    /// same remote file id overwrites the path — a no-op in practice, since
    /// cache paths are stable.
    pub fn edit(
        &self,
        id: &str,
        additional_input_files: BTreeMap<String, PathBuf>,
    ) -> Result<AnalysisRecord> {
        let mut record = self.get(id)?;
        record.input_files.extend(additional_input_files);
        self.persist(&record)?;
        Ok(record)
    }

    /// Remove the record's backing directory tree, outputs included.
    /// Best-effort: a removal failure is logged, not fatal.
    pub fn delete(&self, id: &str) {
        let dir = self.record_dir(id);
        if let Err(err) = fs::remove_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), %err, "could not remove analysis directory");
        }
    }

    /// Push a record to the remote service, exactly once.
    ///
    /// Already committed is a no-op returning the record unchanged. The
    /// commit stamp is written only after every remote step has succeeded,
    /// so any failure leaves the record committable again.
    pub fn commit(&self, id: &str, remote: &dyn Remote) -> Result<AnalysisRecord> {
        let mut record = self.get(id)?;
        if record.committed_at.is_some() {
            return Ok(record);
        }

        let mut inputs = Vec::with_capacity(record.input_files.len());
        for path in record.input_files.values() {
            inputs.push(resolve_input_ref(path)?);
        }

        let handle = remote.create_analysis(&record.container_id, &record.name, &inputs)?;

        for entry in fs::read_dir(&record.output_dir)? {
            let path = entry?.path();
            if path.is_file() {
                remote.upload_output(&handle, &path)?;
            }
        }

        record.committed_at = Some(now_rfc3339());
        self.persist(&record)?;
        Ok(record)
    }
}

/// Reverse a cache path back into the remote reference it was derived
/// from. The resolver lays files out as `.../<container>/<file id>/<name>`,
/// so the container id is the grandparent directory name.
fn resolve_input_ref(path: &Path) -> Result<InputRef> {
    let err = || Error::CommitResolution {
        path: path.to_path_buf(),
    };
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(err)?;
    let container_id = path
        .parent()
        .and_then(Path::parent)
        .and_then(Path::file_name)
        .and_then(|s| s.to_str())
        .ok_or_else(err)?;
    Ok(InputRef {
        container_id: container_id.to_string(),
        name: name.to_string(),
    })
}
