use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Group,
    Project,
    Subject,
    Session,
    Acquisition,
    File,
}

/// Kind-specific listing behavior as data, consulted by generic tree logic.
#[derive(Clone, Copy, Debug)]
pub struct Capabilities {
    pub has_files: bool,
    pub has_analyses: bool,
    pub child_kind: Option<NodeKind>,
}

impl NodeKind {
    pub fn capabilities(self) -> Capabilities {
        match self {
            NodeKind::Group => Capabilities {
                has_files: true,
                has_analyses: false,
                child_kind: Some(NodeKind::Project),
            },
            NodeKind::Project => Capabilities {
                has_files: true,
                has_analyses: true,
                child_kind: Some(NodeKind::Subject),
            },
            NodeKind::Subject => Capabilities {
                has_files: true,
                has_analyses: true,
                child_kind: Some(NodeKind::Session),
            },
            NodeKind::Session => Capabilities {
                has_files: true,
                has_analyses: true,
                child_kind: Some(NodeKind::Acquisition),
            },
            NodeKind::Acquisition => Capabilities {
                has_files: true,
                has_analyses: true,
                child_kind: None,
            },
            NodeKind::File => Capabilities {
                has_files: false,
                has_analyses: false,
                child_kind: None,
            },
        }
    }
}

/// One entity in the remote hierarchy. Owned by the remote service and
/// read-only locally.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    pub parent_id: Option<String>,
}

/// A remote File node together with its resolved ancestry, in
/// group-to-acquisition order with absent levels skipped. Everything needed
/// to compute the local cache path without further remote calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: String,
    pub name: String,
    pub parent_id: String,
    pub ancestor_ids: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    MacOs,
    Linux,
    Windows,
}

impl Platform {
    pub fn current() -> Option<Platform> {
        match std::env::consts::OS {
            "macos" => Some(Platform::MacOs),
            "linux" => Some(Platform::Linux),
            "windows" => Some(Platform::Windows),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMethod {
    NativeOs,
    DockerX11,
    DockerNovnc,
}

impl LaunchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            LaunchMethod::NativeOs => "native",
            LaunchMethod::DockerX11 => "x11",
            LaunchMethod::DockerNovnc => "novnc",
        }
    }

    pub fn parse(s: &str) -> Result<LaunchMethod> {
        match s {
            "native" => Ok(LaunchMethod::NativeOs),
            "x11" => Ok(LaunchMethod::DockerX11),
            "novnc" => Ok(LaunchMethod::DockerNovnc),
            other => Err(Error::NotFound(format!(
                "launch method {other} (expected native, x11, or novnc)"
            ))),
        }
    }
}

impl std::fmt::Display for LaunchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub version: u32,

    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub token: String,
}

/// One launch session tied to a remote container, persisted as
/// `analyses/<id>/record.json`. The on-disk file is the single source of
/// truth; the store re-serializes it wholesale after every mutation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub version: u32,
    pub id: String,
    pub name: String,
    pub container_id: String,
    pub app: String,
    pub platform: Platform,
    pub method: LaunchMethod,
    pub input_files: BTreeMap<String, PathBuf>,
    pub output_dir: PathBuf,
    pub created_at: String,
    pub committed_at: Option<String>,
}

/// 12 bytes of entropy, hex-encoded.
pub fn new_record_id() -> Result<String> {
    let mut bytes = [0u8; 12];
    getrandom::getrandom(&mut bytes).map_err(|e| Error::Config(format!("getrandom: {e:?}")))?;
    let mut out = String::with_capacity(24);
    for b in &bytes {
        out.push_str(&format!("{:02x}", b));
    }
    Ok(out)
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}
