use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{HierarchyNode, RemoteConfig};

/// A file reference the remote service understands: the owning container
/// plus the filename within it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRef {
    pub container_id: String,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RemoteAnalysisHandle {
    pub id: String,
}

/// Capability interface onto the remote data-management service. Everything
/// the engine needs and nothing more; implementations own transport details.
pub trait Remote {
    /// Children of a node; `None` lists the top-level groups.
    fn list_children(&self, parent_id: Option<&str>) -> Result<Vec<HierarchyNode>>;

    fn get_node(&self, id: &str) -> Result<HierarchyNode>;

    fn download_file(&self, container_id: &str, filename: &str, dest: &Path) -> Result<()>;

    fn create_analysis(
        &self,
        container_id: &str,
        name: &str,
        inputs: &[InputRef],
    ) -> Result<RemoteAnalysisHandle>;

    fn upload_output(&self, handle: &RemoteAnalysisHandle, path: &Path) -> Result<()>;
}

fn with_retries<T>(label: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    const ATTEMPTS: usize = 3;
    let mut last: Option<Error> = None;
    for i in 0..ATTEMPTS {
        match f() {
            Ok(v) => return Ok(v),
            // A definitive miss will not improve on retry.
            Err(err @ Error::NotFound(_)) => return Err(err),
            Err(err) => {
                last = Some(err);
                if i + 1 < ATTEMPTS {
                    std::thread::sleep(std::time::Duration::from_millis(200 * (1 << i)));
                }
            }
        }
    }
    Err(last.unwrap_or_else(|| Error::RemoteService(label.to_string())))
}

pub struct HttpRemote {
    remote: RemoteConfig,
    client: reqwest::blocking::Client,
}

impl HttpRemote {
    pub fn new(remote: RemoteConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("lightbox")
            .build()
            .map_err(|e| Error::RemoteService(format!("build http client: {e}")))?;
        Ok(Self { remote, client })
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.remote.token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.remote.base_url, path)
    }

    fn ensure_ok(
        &self,
        resp: reqwest::blocking::Response,
        label: &str,
    ) -> Result<reqwest::blocking::Response> {
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::RemoteService(
                "unauthorized (token invalid/expired; run `lightbox remote set --url ... --token ...`)"
                    .to_string(),
            ));
        }
        if resp.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::RemoteService(
                "forbidden (insufficient permissions on the remote)".to_string(),
            ));
        }
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("remote object ({label})")));
        }
        resp.error_for_status()
            .map_err(|e| Error::RemoteService(format!("{label} status: {e}")))
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, label: &str) -> Result<T> {
        with_retries(label, || {
            let resp = self
                .client
                .get(self.url(path))
                .header(reqwest::header::AUTHORIZATION, self.auth())
                .send()
                .map_err(|e| Error::RemoteService(format!("{label} request: {e}")))?;
            let resp = self.ensure_ok(resp, label)?;
            resp.json()
                .map_err(|e| Error::RemoteService(format!("parse {label}: {e}")))
        })
    }
}

impl Remote for HttpRemote {
    fn list_children(&self, parent_id: Option<&str>) -> Result<Vec<HierarchyNode>> {
        match parent_id {
            None => self.get_json("/api/groups", "list groups"),
            Some(id) => self.get_json(&format!("/api/nodes/{id}/children"), "list children"),
        }
    }

    fn get_node(&self, id: &str) -> Result<HierarchyNode> {
        self.get_json(&format!("/api/nodes/{id}"), "get node")
    }

    fn download_file(&self, container_id: &str, filename: &str, dest: &Path) -> Result<()> {
        let label = "download file";
        with_retries(label, || {
            let resp = self
                .client
                .get(self.url(&format!("/api/containers/{container_id}/files/{filename}")))
                .header(reqwest::header::AUTHORIZATION, self.auth())
                .send()
                .map_err(|e| Error::RemoteService(format!("{label} request: {e}")))?;
            let mut resp = self.ensure_ok(resp, label)?;

            // Stream into a temp sibling, then rename, so a torn download is
            // never mistaken for a cached file.
            let tmp = dest.with_extension(format!("tmp.{}", std::process::id()));
            let mut out = fs::File::create(&tmp)?;
            resp.copy_to(&mut out)
                .map_err(|e| Error::RemoteService(format!("{label} body: {e}")))?;
            fs::rename(&tmp, dest)?;
            Ok(())
        })
    }

    fn create_analysis(
        &self,
        container_id: &str,
        name: &str,
        inputs: &[InputRef],
    ) -> Result<RemoteAnalysisHandle> {
        let label = "create analysis";
        let resp = self
            .client
            .post(self.url(&format!("/api/containers/{container_id}/analyses")))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .json(&serde_json::json!({
                "label": name,
                "inputs": inputs,
            }))
            .send()
            .map_err(|e| Error::RemoteService(format!("{label} request: {e}")))?;
        let resp = self.ensure_ok(resp, label)?;
        resp.json()
            .map_err(|e| Error::RemoteService(format!("parse {label}: {e}")))
    }

    fn upload_output(&self, handle: &RemoteAnalysisHandle, path: &Path) -> Result<()> {
        let label = "upload output";
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::RemoteService(format!("{label}: non-utf8 filename")))?
            .to_string();
        let bytes = fs::read(path)?;
        let resp = self
            .client
            .post(self.url(&format!("/api/analyses/{}/outputs/{filename}", handle.id)))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .body(bytes)
            .send()
            .map_err(|e| Error::RemoteService(format!("{label} request: {e}")))?;
        let _ = self.ensure_ok(resp, label)?;
        Ok(())
    }
}
