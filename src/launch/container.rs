use std::path::Path;

use globset::{Glob, GlobSetBuilder};

use super::*;

pub struct NovncLaunch {
    pub handle: ContainerHandle,
    pub viewer_url: String,
}

impl Dispatcher<'_> {
    /// Minimal best-effort path: start a container from the declared image
    /// and keep no state. X11 forwarding setup is the host's problem.
    pub fn launch_x11(&self, def: &ContainerLaunch, _payload: &LaunchPayload) -> Result<ContainerHandle> {
        self.runtime.run(&def.image, &RunOptions::default())
    }

    /// Start the web-viewer container in the reserved singleton slot.
    ///
    /// The slot is cleared first (kill, then prune) on a best-effort basis;
    /// only the run itself is authoritative, so teardown failures are
    /// logged and the launch proceeds. A run failure after teardown is
    /// fatal.
    pub fn launch_novnc(&self, def: &ContainerLaunch, payload: &LaunchPayload) -> Result<NovncLaunch> {
        // A project file in the output directory takes precedence over the
        // raw input list; the two are mutually exclusive.
        let project = match &payload.output_dir {
            Some(dir) => find_project_file(dir, &def.project_exts)?,
            None => None,
        };
        let args_value = match project {
            Some(path) => {
                let mapped = self.map_into_container(&path, &def.mount_target);
                match &def.project_arg_template {
                    Some(tpl) => {
                        let context =
                            BTreeMap::from([("path".to_string(), mapped)]);
                        template::render_str(tpl, &context)
                    }
                    None => mapped,
                }
            }
            None => payload
                .input_files
                .values()
                .map(|p| self.map_into_container(p, &def.mount_target))
                .collect::<Vec<_>>()
                .join(" "),
        };

        let scratch = self.cache.reset_scratch()?;
        let (output_source, read_only) = match &payload.output_dir {
            Some(dir) => (dir.clone(), false),
            None => (scratch, true),
        };
        let binds = vec![
            BindMount {
                source: self.cache.root().to_path_buf(),
                target: def.mount_target.clone(),
                read_only: true,
            },
            BindMount {
                source: output_source,
                target: def.output_target.clone(),
                read_only,
            },
        ];

        match self.runtime.get_by_name(&def.container_name) {
            Ok(Some(existing)) => {
                if let Err(err) = self.runtime.kill(&existing) {
                    tracing::warn!(name = %def.container_name, %err, "could not kill previous container");
                }
                if let Err(err) = self.runtime.prune_stopped() {
                    tracing::warn!(%err, "could not prune stopped containers");
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(name = %def.container_name, %err, "could not query singleton slot");
            }
        }

        let options = RunOptions {
            name: Some(def.container_name.clone()),
            detach: true,
            ports: def.ports.clone(),
            binds,
            env: vec![(def.args_env.clone(), args_value)],
        };
        let handle = self.runtime.run(&def.image, &options)?;

        Ok(NovncLaunch {
            handle,
            viewer_url: def.viewer_url.clone(),
        })
    }

    /// Re-root a path under the cache root at the container-side bind
    /// target. Paths outside the cache root pass through untouched.
    fn map_into_container(&self, path: &Path, target: &str) -> String {
        match path.strip_prefix(self.cache.root()) {
            Ok(rel) => format!("{}/{}", target.trim_end_matches('/'), rel.display()),
            Err(_) => path.display().to_string(),
        }
    }
}

/// First project file (by name) of a declared extension directly under
/// `dir`. Non-recursive.
fn find_project_file(dir: &Path, exts: &[String]) -> Result<Option<std::path::PathBuf>> {
    if exts.is_empty() || !dir.is_dir() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for ext in exts {
        let glob = Glob::new(&format!("*.{ext}"))
            .map_err(|e| Error::Config(format!("bad project extension {ext}: {e}")))?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| Error::Config(format!("build project extension set: {e}")))?;

    let mut matches = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file()
            && let Some(name) = path.file_name()
            && set.is_match(Path::new(name))
        {
            matches.push(path);
        }
    }
    matches.sort();
    Ok(matches.into_iter().next())
}
