use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use lightbox::analysis::{AnalysisStore, NewAnalysis};
use lightbox::apps::{AppRegistry, HostProbe};
use lightbox::cache::LocalCache;
use lightbox::hierarchy::resolve_file;
use lightbox::launch::{Dispatcher, LaunchOutcome, LaunchPayload};
use lightbox::model::{Config, LaunchMethod, Platform, RemoteConfig};
use lightbox::remote::{HttpRemote, Remote};
use lightbox::runtime::DockerCli;
use lightbox::template::CurlyRenderer;

#[derive(Parser)]
#[command(name = "lightbox")]
#[command(about = "Browse, cache, and view remote imaging data", long_about = None)]
struct Cli {
    /// Cache root (defaults to $LIGHTBOX_CACHE_ROOT, then ~/lightbox)
    #[arg(long, global = true)]
    cache_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the local cache
    Init {
        /// Re-initialize an existing cache
        #[arg(long)]
        force: bool,
    },

    /// Configure or show the remote
    Remote {
        #[command(subcommand)]
        command: RemoteCommands,
    },

    /// List children of a node (top-level groups when omitted)
    Ls {
        node_id: Option<String>,
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Download a file into the cache (no-op when already cached)
    Cache { file_id: String },

    /// List apps and their currently available launch methods
    Apps {
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage analyses
    Analysis {
        #[command(subcommand)]
        command: AnalysisCommands,
    },

    /// Launch a viewer against an analysis or an ad-hoc file selection
    Launch {
        /// Analysis id to launch from
        #[arg(long, conflicts_with_all = ["app", "method", "file"])]
        analysis: Option<String>,

        /// App name for an ad-hoc launch
        #[arg(long)]
        app: Option<String>,

        /// Launch method: native, x11, or novnc
        #[arg(long)]
        method: Option<String>,

        /// Remote file id (repeatable)
        #[arg(long)]
        file: Vec<String>,
    },
}

#[derive(Subcommand)]
enum RemoteCommands {
    /// Show the configured remote
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Set the configured remote
    Set {
        #[arg(long)]
        url: String,
        #[arg(long)]
        token: String,
    },
}

#[derive(Subcommand)]
enum AnalysisCommands {
    /// Create a new draft analysis from cached files
    New {
        #[arg(long)]
        app: String,
        /// Launch method: native, x11, or novnc
        #[arg(long)]
        method: String,
        /// Remote container the analysis belongs to
        #[arg(long)]
        container: String,
        /// Remote file id (repeatable)
        #[arg(long, required = true)]
        file: Vec<String>,
    },

    /// List analyses
    List {
        #[arg(long)]
        json: bool,
    },

    /// Add more input files to a draft analysis
    AddFiles {
        id: String,
        /// Remote file id (repeatable)
        #[arg(long, required = true)]
        file: Vec<String>,
    },

    /// Delete an analysis and its outputs
    Delete { id: String },

    /// Push an analysis and its outputs to the remote
    Commit { id: String },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cache_root(cli.cache_root)?;

    match cli.command {
        Commands::Init { force } => {
            LocalCache::init(&root, force)?;
            println!("Initialized cache at {}", root.display());
        }

        Commands::Remote { command } => {
            let cache = LocalCache::open(&root)?;
            match command {
                RemoteCommands::Show { json } => {
                    let cfg = cache.read_config()?;
                    if json {
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&cfg.remote)
                                .context("serialize remote json")?
                        );
                    } else if let Some(remote) = cfg.remote {
                        println!("url: {}", remote.base_url);
                    } else {
                        println!("No remote configured");
                    }
                }
                RemoteCommands::Set { url, token } => {
                    let mut cfg = cache.read_config()?;
                    cfg.remote = Some(RemoteConfig {
                        base_url: url,
                        token,
                    });
                    cache.write_config(&cfg)?;
                    println!("Remote configured");
                }
            }
        }

        Commands::Ls { node_id, json } => {
            let cache = LocalCache::open(&root)?;
            let remote = require_remote(&cache)?;
            let children = remote.list_children(node_id.as_deref())?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&children).context("serialize children json")?
                );
            } else {
                for child in children {
                    println!("{:<28} {:?}  {}", child.id, child.kind, child.label);
                }
            }
        }

        Commands::Cache { file_id } => {
            let cache = LocalCache::open(&root)?;
            let remote = require_remote(&cache)?;
            let file = resolve_file(&remote, &file_id)?;
            let outcome = cache.ensure_cached(&remote, &file)?;
            if outcome.freshly_fetched() {
                println!("Fetched {}", outcome.path().display());
            } else {
                println!("Already cached {}", outcome.path().display());
            }
        }

        Commands::Apps { json } => {
            let platform = current_platform()?;
            let registry = AppRegistry::builtin();
            let runtime = DockerCli::new();
            let probe = HostProbe { runtime: &runtime };

            let listing: Vec<(String, Vec<LaunchMethod>)> = registry
                .list_apps()
                .into_iter()
                .map(|app| {
                    let methods = registry.methods_for(app, platform, &probe);
                    (app.to_string(), methods)
                })
                .collect();

            if json {
                let value: Vec<serde_json::Value> = listing
                    .iter()
                    .map(|(app, methods)| {
                        serde_json::json!({
                            "app": app,
                            "methods": methods.iter().map(|m| m.as_str()).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&value).context("serialize apps json")?
                );
            } else {
                for (app, methods) in listing {
                    let methods = methods
                        .iter()
                        .map(|m| m.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    if methods.is_empty() {
                        println!("{:<12} (unavailable)", app);
                    } else {
                        println!("{:<12} {}", app, methods);
                    }
                }
            }
        }

        Commands::Analysis { command } => {
            let cache = LocalCache::open(&root)?;
            let store = AnalysisStore::new(&cache);
            match command {
                AnalysisCommands::New {
                    app,
                    method,
                    container,
                    file,
                } => {
                    let remote = require_remote(&cache)?;
                    let method = LaunchMethod::parse(&method)?;
                    let platform = current_platform()?;
                    let input_files = cache_all(&cache, &remote, &file)?;

                    let runtime = DockerCli::new();
                    let probe = HostProbe { runtime: &runtime };
                    let registry = AppRegistry::builtin();
                    let record = store.create(
                        &registry,
                        &probe,
                        NewAnalysis {
                            app,
                            method,
                            platform,
                            container_id: container,
                            input_files,
                        },
                    )?;
                    println!("{}  {}", record.id, record.name);
                }
                AnalysisCommands::List { json } => {
                    let records = store.list()?;
                    if json {
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&records)
                                .context("serialize analyses json")?
                        );
                    } else {
                        for record in records {
                            let state = if record.committed_at.is_some() {
                                "committed"
                            } else {
                                "draft"
                            };
                            println!("{}  {:<9}  {}", record.id, state, record.name);
                        }
                    }
                }
                AnalysisCommands::AddFiles { id, file } => {
                    let remote = require_remote(&cache)?;
                    let additional = cache_all(&cache, &remote, &file)?;
                    let record = store.edit(&id, additional)?;
                    println!("{} now has {} input file(s)", record.id, record.input_files.len());
                }
                AnalysisCommands::Delete { id } => {
                    store.delete(&id);
                    println!("Deleted {}", id);
                }
                AnalysisCommands::Commit { id } => {
                    let remote = require_remote(&cache)?;
                    let record = store.commit(&id, &remote)?;
                    println!(
                        "Committed {} at {}",
                        record.id,
                        record.committed_at.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }

        Commands::Launch {
            analysis,
            app,
            method,
            file,
        } => {
            let cache = LocalCache::open(&root)?;
            let platform = current_platform()?;
            let registry = AppRegistry::builtin();
            let runtime = DockerCli::new();
            let templates = CurlyRenderer;
            let dispatcher = Dispatcher::new(&cache, &runtime, &templates);

            let (app, method, payload) = match analysis {
                Some(id) => {
                    let store = AnalysisStore::new(&cache);
                    let record = store.get(&id)?;
                    (
                        record.app.clone(),
                        record.method,
                        LaunchPayload::from_record(&record),
                    )
                }
                None => {
                    let app = app.context("--app is required without --analysis")?;
                    let method = method.context("--method is required without --analysis")?;
                    let method = LaunchMethod::parse(&method)?;
                    let remote = require_remote(&cache)?;
                    let input_files = cache_all(&cache, &remote, &file)?;
                    (app, method, LaunchPayload::ad_hoc(input_files))
                }
            };

            let definition = registry.definition_for(&app, method, platform)?;
            match dispatcher.launch(definition, method, &payload)? {
                LaunchOutcome::Exited { code } => match code {
                    Some(code) => println!("Viewer exited with code {code}"),
                    None => println!("Viewer exited"),
                },
                LaunchOutcome::Started { handle, viewer_url } => {
                    println!("Started container {}", handle.id);
                    if let Some(url) = viewer_url {
                        println!("Viewer at {url}");
                    }
                }
            }
        }
    }

    Ok(())
}

fn cache_root(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = flag {
        return Ok(root);
    }
    if let Ok(root) = std::env::var("LIGHTBOX_CACHE_ROOT") {
        return Ok(PathBuf::from(root));
    }
    let home = std::env::var("HOME").context("HOME is not set (pass --cache-root)")?;
    Ok(PathBuf::from(home).join("lightbox"))
}

fn current_platform() -> Result<Platform> {
    Platform::current().context("unsupported host platform")
}

fn require_remote(cache: &LocalCache) -> Result<HttpRemote> {
    let cfg: Config = cache.read_config()?;
    let remote = cfg
        .remote
        .context("no remote configured (run `lightbox remote set --url ... --token ...`)")?;
    Ok(HttpRemote::new(remote)?)
}

/// Resolve and cache every named file, returning the input map an analysis
/// or launch payload wants.
fn cache_all(
    cache: &LocalCache,
    remote: &dyn Remote,
    file_ids: &[String],
) -> Result<BTreeMap<String, PathBuf>> {
    let mut out = BTreeMap::new();
    for file_id in file_ids {
        let file = resolve_file(remote, file_id)?;
        let outcome = cache.ensure_cached(remote, &file)?;
        out.insert(file_id.clone(), outcome.path().to_path_buf());
    }
    Ok(out)
}
