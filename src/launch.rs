use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::apps::{AppDefinition, ContainerLaunch, InitFile, NativeLaunch};
use crate::cache::LocalCache;
use crate::error::{Error, Result};
use crate::model::{AnalysisRecord, LaunchMethod};
use crate::runtime::{BindMount, ContainerHandle, ContainerRuntime, RunOptions};
use crate::template::{self, TemplateEngine};

mod container;
mod native;

pub use self::container::NovncLaunch;

/// What a launch runs against: a persisted analysis record or an ad-hoc
/// tree selection.
#[derive(Clone, Debug)]
pub struct LaunchPayload {
    pub name: String,
    /// Remote file id → local cache path.
    pub input_files: BTreeMap<String, PathBuf>,
    /// The analysis output directory; `None` for ad-hoc launches.
    pub output_dir: Option<PathBuf>,
}

impl LaunchPayload {
    pub fn from_record(record: &AnalysisRecord) -> Self {
        Self {
            name: record.name.clone(),
            input_files: record.input_files.clone(),
            output_dir: Some(record.output_dir.clone()),
        }
    }

    pub fn ad_hoc(input_files: BTreeMap<String, PathBuf>) -> Self {
        Self {
            name: "untitled".to_string(),
            input_files,
            output_dir: None,
        }
    }

    fn template_context(&self) -> BTreeMap<String, String> {
        let output = self
            .output_dir
            .clone()
            .unwrap_or_else(home_dir)
            .display()
            .to_string();
        BTreeMap::from([
            ("name".to_string(), self.name.clone()),
            ("output".to_string(), output),
        ])
    }
}

#[derive(Debug)]
pub enum LaunchOutcome {
    /// A native viewer ran to completion on the control thread.
    Exited { code: Option<i32> },
    /// A container started; noVNC launches also report the viewer URL.
    Started {
        handle: ContainerHandle,
        viewer_url: Option<String>,
    },
}

/// Resolves an app definition plus a payload into an executed process or
/// container. Blocking and single-threaded throughout: a native launch
/// holds the control thread until the viewer exits, and the singleton
/// container slot is only ever touched sequentially.
pub struct Dispatcher<'a> {
    cache: &'a LocalCache,
    runtime: &'a dyn ContainerRuntime,
    templates: &'a dyn TemplateEngine,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        cache: &'a LocalCache,
        runtime: &'a dyn ContainerRuntime,
        templates: &'a dyn TemplateEngine,
    ) -> Self {
        Self {
            cache,
            runtime,
            templates,
        }
    }

    pub fn launch(
        &self,
        definition: &AppDefinition,
        method: LaunchMethod,
        payload: &LaunchPayload,
    ) -> Result<LaunchOutcome> {
        match (definition, method) {
            (AppDefinition::Native(def), LaunchMethod::NativeOs) => {
                let code = self.launch_native(def, payload)?;
                Ok(LaunchOutcome::Exited { code })
            }
            (AppDefinition::Container(def), LaunchMethod::DockerX11) => {
                let handle = self.launch_x11(def, payload)?;
                Ok(LaunchOutcome::Started {
                    handle,
                    viewer_url: None,
                })
            }
            (AppDefinition::Container(def), LaunchMethod::DockerNovnc) => {
                let launch = self.launch_novnc(def, payload)?;
                Ok(LaunchOutcome::Started {
                    handle: launch.handle,
                    viewer_url: Some(launch.viewer_url),
                })
            }
            _ => Err(Error::NotFound(format!(
                "{method} launcher matching the definition"
            ))),
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
