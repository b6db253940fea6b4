use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{LaunchMethod, Platform};
use crate::runtime::ContainerRuntime;

/// Per-application init file handling: a template rendered at launch time
/// and written over the application's own configuration file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitFile {
    /// Template path, relative to the cache's resources directory.
    pub template: PathBuf,
    /// Directory holding the live init file; a leading `~` expands to the
    /// user's home directory.
    pub target_dir: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NativeLaunch {
    /// Base argv. The final element is the availability probe target.
    pub command: Vec<String>,

    #[serde(default)]
    pub file_arg_prefix: Option<String>,

    #[serde(default)]
    pub first_file_flag: Option<String>,

    #[serde(default)]
    pub additional_files_flag: Option<String>,

    #[serde(default)]
    pub init_file: Option<InitFile>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PortMap {
    pub host: u16,
    pub container: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerLaunch {
    /// Image tag; doubles as the availability probe target.
    pub image: String,
    /// Reserved singleton slot name, reused across launches.
    pub container_name: String,

    #[serde(default)]
    pub ports: Vec<PortMap>,

    /// Container-side bind target for the cache root.
    pub mount_target: String,
    /// Container-side bind target for the output (or scratch) directory.
    pub output_target: String,
    /// Environment variable carrying the file arguments.
    pub args_env: String,

    #[serde(default)]
    pub project_exts: Vec<String>,

    /// Rendered against `{{path}}` (the located project file) when a
    /// project file is found; without it the bare path is passed.
    #[serde(default)]
    pub project_arg_template: Option<String>,

    /// Fixed local web endpoint the viewer is reachable at after start.
    pub viewer_url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppDefinition {
    Native(NativeLaunch),
    Container(ContainerLaunch),
}

/// One declared way to launch one app on one platform.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Launcher {
    pub method: LaunchMethod,
    pub platform: Platform,
    pub definition: AppDefinition,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppEntry {
    pub name: String,
    pub launchers: Vec<Launcher>,
}

/// Availability checks, injectable so registry logic is testable without a
/// filesystem or container runtime in the declared shape.
pub trait AvailabilityProbe {
    fn executable_exists(&self, path: &Path) -> bool;
    fn image_present(&self, tag: &str) -> bool;
}

/// Probe against the real host: filesystem existence for executables, the
/// runtime's image list for images. A runtime query failure reads as
/// unavailable.
pub struct HostProbe<'a> {
    pub runtime: &'a dyn ContainerRuntime,
}

impl AvailabilityProbe for HostProbe<'_> {
    fn executable_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn image_present(&self, tag: &str) -> bool {
        match self.runtime.list_images() {
            Ok(images) => images.iter().any(|img| img == tag),
            Err(err) => {
                tracing::warn!(%err, "image list unavailable, treating images as absent");
                false
            }
        }
    }
}

/// Read-only catalog of applications, declaration-ordered. Constructed once
/// at startup and passed explicitly; never mutated at runtime.
pub struct AppRegistry {
    apps: Vec<AppEntry>,
}

impl AppRegistry {
    pub fn new(apps: Vec<AppEntry>) -> Self {
        Self { apps }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let apps: Vec<AppEntry> = serde_json::from_slice(&bytes)?;
        Ok(Self { apps })
    }

    /// App names in declaration order.
    pub fn list_apps(&self) -> Vec<&str> {
        self.apps.iter().map(|a| a.name.as_str()).collect()
    }

    /// Methods declared for `(app, platform)` whose probe passes right now.
    /// Availability is re-evaluated on every call, never cached. A platform
    /// with no declared entry contributes nothing: unsupported is not
    /// unavailable-but-listed.
    pub fn methods_for(
        &self,
        app: &str,
        platform: Platform,
        probe: &dyn AvailabilityProbe,
    ) -> Vec<LaunchMethod> {
        let Some(entry) = self.apps.iter().find(|a| a.name == app) else {
            return Vec::new();
        };
        let mut methods = Vec::new();
        for launcher in &entry.launchers {
            if launcher.platform != platform || methods.contains(&launcher.method) {
                continue;
            }
            let available = match &launcher.definition {
                AppDefinition::Native(def) => def
                    .command
                    .last()
                    .is_some_and(|target| probe.executable_exists(Path::new(target))),
                AppDefinition::Container(def) => probe.image_present(&def.image),
            };
            if available {
                methods.push(launcher.method);
            }
        }
        methods
    }

    pub fn definition_for(
        &self,
        app: &str,
        method: LaunchMethod,
        platform: Platform,
    ) -> Result<&AppDefinition> {
        self.apps
            .iter()
            .find(|a| a.name == app)
            .and_then(|a| {
                a.launchers
                    .iter()
                    .find(|l| l.method == method && l.platform == platform)
            })
            .map(|l| &l.definition)
            .ok_or_else(|| Error::NotFound(format!("{method} launcher for {app} ({platform:?})")))
    }

    /// The compiled-in catalog: the viewers the tool ships with.
    pub fn builtin() -> Self {
        let open = |target: &str| -> Vec<String> {
            ["/usr/bin/open", "-W", "-n", "-a", target]
                .into_iter()
                .map(String::from)
                .collect()
        };

        Self::new(vec![
            AppEntry {
                name: "Slicer".to_string(),
                launchers: vec![
                    Launcher {
                        method: LaunchMethod::NativeOs,
                        platform: Platform::MacOs,
                        definition: AppDefinition::Native(NativeLaunch {
                            command: open("/Applications/Slicer.app"),
                            file_arg_prefix: Some("--args".to_string()),
                            first_file_flag: None,
                            additional_files_flag: None,
                            init_file: Some(InitFile {
                                template: PathBuf::from("Slicer.ini"),
                                target_dir: "~/.config/www.na-mic.org".to_string(),
                            }),
                        }),
                    },
                    Launcher {
                        method: LaunchMethod::DockerNovnc,
                        platform: Platform::MacOs,
                        definition: AppDefinition::Container(ContainerLaunch {
                            image: "stevepieper/slicer-chronicle:latest".to_string(),
                            container_name: "slicer".to_string(),
                            ports: vec![PortMap {
                                host: 8080,
                                container: 8080,
                            }],
                            mount_target: "/home/researcher/lightbox/".to_string(),
                            output_target: "/home/researcher/Documents".to_string(),
                            args_env: "SLICER_ARGUMENTS".to_string(),
                            project_exts: vec!["mrb".to_string(), "mrml".to_string()],
                            project_arg_template: Some(
                                "--python-code \"slicer.util.loadScene('{{path}}')\"".to_string(),
                            ),
                            viewer_url:
                                "http://localhost:8080/x11/vnc.html?autoconnect=true&path=x11/websockify"
                                    .to_string(),
                        }),
                    },
                ],
            },
            AppEntry {
                name: "ITK-SNAP".to_string(),
                launchers: vec![Launcher {
                    method: LaunchMethod::NativeOs,
                    platform: Platform::MacOs,
                    definition: AppDefinition::Native(NativeLaunch {
                        command: open("/Applications/ITK-SNAP.app"),
                        file_arg_prefix: Some("--args".to_string()),
                        first_file_flag: Some("-g".to_string()),
                        additional_files_flag: Some("-o".to_string()),
                        init_file: None,
                    }),
                }],
            },
            AppEntry {
                name: "MRIcron".to_string(),
                launchers: vec![Launcher {
                    method: LaunchMethod::NativeOs,
                    platform: Platform::MacOs,
                    definition: AppDefinition::Native(NativeLaunch {
                        command: open("/Applications/MRIcron.app"),
                        file_arg_prefix: Some("--args".to_string()),
                        first_file_flag: None,
                        additional_files_flag: None,
                        init_file: None,
                    }),
                }],
            },
            AppEntry {
                name: "ImageJ".to_string(),
                launchers: vec![Launcher {
                    method: LaunchMethod::NativeOs,
                    platform: Platform::MacOs,
                    definition: AppDefinition::Native(NativeLaunch {
                        command: open("/Applications/ImageJ.app"),
                        file_arg_prefix: None,
                        first_file_flag: None,
                        additional_files_flag: None,
                        init_file: None,
                    }),
                }],
            },
        ])
    }
}
