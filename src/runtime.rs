use std::path::PathBuf;
use std::process::Command;

use crate::apps::PortMap;
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub name: Option<String>,
    pub detach: bool,
    pub ports: Vec<PortMap>,
    pub binds: Vec<BindMount>,
    pub env: Vec<(String, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
}

/// Capability interface onto the container runtime. The engine only ever
/// needs these five calls; transport (CLI, socket) is the implementation's
/// business.
pub trait ContainerRuntime {
    fn list_images(&self) -> Result<Vec<String>>;

    fn run(&self, image: &str, options: &RunOptions) -> Result<ContainerHandle>;

    fn get_by_name(&self, name: &str) -> Result<Option<ContainerHandle>>;

    fn kill(&self, handle: &ContainerHandle) -> Result<()>;

    fn prune_stopped(&self) -> Result<()>;
}

/// Drives the `docker` binary. Non-zero exits surface as
/// [`Error::ContainerRuntime`] with the trimmed stderr.
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    fn output(&self, args: &[&str]) -> Result<String> {
        let out = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| Error::ContainerRuntime(format!("run {}: {e}", self.binary)))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(Error::ContainerRuntime(format!(
                "{} {}: {}",
                self.binary,
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime for DockerCli {
    fn list_images(&self) -> Result<Vec<String>> {
        let out = self.output(&["image", "ls", "--format", "{{.Repository}}:{{.Tag}}"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.ends_with(":<none>"))
            .map(String::from)
            .collect())
    }

    fn run(&self, image: &str, options: &RunOptions) -> Result<ContainerHandle> {
        let mut args: Vec<String> = vec!["run".to_string()];
        if options.detach {
            args.push("-d".to_string());
        }
        if let Some(name) = &options.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        for port in &options.ports {
            args.push("-p".to_string());
            args.push(format!("{}:{}", port.host, port.container));
        }
        for bind in &options.binds {
            let mode = if bind.read_only { "ro" } else { "rw" };
            args.push("-v".to_string());
            args.push(format!("{}:{}:{}", bind.source.display(), bind.target, mode));
        }
        for (key, value) in &options.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(image.to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.output(&arg_refs)?;
        Ok(ContainerHandle {
            id: out.trim().to_string(),
        })
    }

    fn get_by_name(&self, name: &str) -> Result<Option<ContainerHandle>> {
        let out = self.output(&["ps", "-aq", "--filter", &format!("name=^{name}$")])?;
        let id = out.lines().next().map(str::trim).unwrap_or("");
        if id.is_empty() {
            Ok(None)
        } else {
            Ok(Some(ContainerHandle { id: id.to_string() }))
        }
    }

    fn kill(&self, handle: &ContainerHandle) -> Result<()> {
        self.output(&["kill", &handle.id])?;
        Ok(())
    }

    fn prune_stopped(&self) -> Result<()> {
        self.output(&["container", "prune", "-f"])?;
        Ok(())
    }
}
