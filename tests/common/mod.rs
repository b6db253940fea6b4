#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use lightbox::apps::AvailabilityProbe;
use lightbox::error::{Error, Result};
use lightbox::model::{HierarchyNode, NodeKind};
use lightbox::remote::{InputRef, Remote, RemoteAnalysisHandle};
use lightbox::runtime::{ContainerHandle, ContainerRuntime, RunOptions};

/// In-memory remote service: a node table plus call recording.
#[derive(Default)]
pub struct FakeRemote {
    pub nodes: BTreeMap<String, HierarchyNode>,
    pub list_calls: Cell<u32>,
    pub downloads: RefCell<Vec<(String, String)>>,
    pub fail_downloads: Cell<bool>,
    pub created: RefCell<Vec<(String, String, Vec<InputRef>)>>,
    pub uploads: RefCell<Vec<PathBuf>>,
    pub fail_uploads: Cell<bool>,
}

impl FakeRemote {
    pub fn add_node(&mut self, id: &str, kind: NodeKind, label: &str, parent: Option<&str>) {
        self.nodes.insert(
            id.to_string(),
            HierarchyNode {
                id: id.to_string(),
                kind,
                label: label.to_string(),
                parent_id: parent.map(String::from),
            },
        );
    }
}

impl Remote for FakeRemote {
    fn list_children(&self, parent_id: Option<&str>) -> Result<Vec<HierarchyNode>> {
        self.list_calls.set(self.list_calls.get() + 1);
        Ok(self
            .nodes
            .values()
            .filter(|n| n.parent_id.as_deref() == parent_id)
            .cloned()
            .collect())
    }

    fn get_node(&self, id: &str) -> Result<HierarchyNode> {
        self.nodes
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("node {id}")))
    }

    fn download_file(&self, container_id: &str, filename: &str, dest: &Path) -> Result<()> {
        if self.fail_downloads.get() {
            return Err(Error::RemoteService("downloads disabled".to_string()));
        }
        self.downloads
            .borrow_mut()
            .push((container_id.to_string(), filename.to_string()));
        fs::write(dest, b"imaging data")?;
        Ok(())
    }

    fn create_analysis(
        &self,
        container_id: &str,
        name: &str,
        inputs: &[InputRef],
    ) -> Result<RemoteAnalysisHandle> {
        self.created.borrow_mut().push((
            container_id.to_string(),
            name.to_string(),
            inputs.to_vec(),
        ));
        Ok(RemoteAnalysisHandle {
            id: format!("remote-analysis-{}", self.created.borrow().len()),
        })
    }

    fn upload_output(&self, _handle: &RemoteAnalysisHandle, path: &Path) -> Result<()> {
        if self.fail_uploads.get() {
            return Err(Error::RemoteService("uploads disabled".to_string()));
        }
        self.uploads.borrow_mut().push(path.to_path_buf());
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct FakeContainer {
    pub id: String,
    pub name: Option<String>,
    pub running: bool,
}

/// In-memory container runtime recording the operation sequence.
#[derive(Default)]
pub struct FakeRuntime {
    pub images: Vec<String>,
    pub containers: RefCell<Vec<FakeContainer>>,
    pub ops: RefCell<Vec<String>>,
    pub last_run: RefCell<Option<(String, RunOptions)>>,
    pub next_id: Cell<u32>,
    pub fail_kill: Cell<bool>,
}

impl FakeRuntime {
    pub fn with_container(self, id: &str, name: &str) -> Self {
        self.containers.borrow_mut().push(FakeContainer {
            id: id.to_string(),
            name: Some(name.to_string()),
            running: true,
        });
        self
    }

    pub fn named(&self, name: &str) -> Vec<FakeContainer> {
        self.containers
            .borrow()
            .iter()
            .filter(|c| c.name.as_deref() == Some(name))
            .cloned()
            .collect()
    }
}

impl ContainerRuntime for FakeRuntime {
    fn list_images(&self) -> Result<Vec<String>> {
        Ok(self.images.clone())
    }

    fn run(&self, image: &str, options: &RunOptions) -> Result<ContainerHandle> {
        let id = format!("c{}", self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.containers.borrow_mut().push(FakeContainer {
            id: id.clone(),
            name: options.name.clone(),
            running: true,
        });
        self.ops.borrow_mut().push(format!("run {image}"));
        *self.last_run.borrow_mut() = Some((image.to_string(), options.clone()));
        Ok(ContainerHandle { id })
    }

    fn get_by_name(&self, name: &str) -> Result<Option<ContainerHandle>> {
        Ok(self
            .containers
            .borrow()
            .iter()
            .find(|c| c.name.as_deref() == Some(name))
            .map(|c| ContainerHandle { id: c.id.clone() }))
    }

    fn kill(&self, handle: &ContainerHandle) -> Result<()> {
        self.ops.borrow_mut().push(format!("kill {}", handle.id));
        if self.fail_kill.get() {
            return Err(Error::ContainerRuntime("kill disabled".to_string()));
        }
        for c in self.containers.borrow_mut().iter_mut() {
            if c.id == handle.id {
                c.running = false;
            }
        }
        Ok(())
    }

    fn prune_stopped(&self) -> Result<()> {
        self.ops.borrow_mut().push("prune".to_string());
        self.containers.borrow_mut().retain(|c| c.running);
        Ok(())
    }
}

/// Probe answering from fixed lists, so availability logic is exercised
/// without touching the host.
#[derive(Default)]
pub struct StaticProbe {
    pub executables: Vec<PathBuf>,
    pub images: Vec<String>,
}

impl AvailabilityProbe for StaticProbe {
    fn executable_exists(&self, path: &Path) -> bool {
        self.executables.iter().any(|p| p == path)
    }

    fn image_present(&self, tag: &str) -> bool {
        self.images.iter().any(|img| img == tag)
    }
}
