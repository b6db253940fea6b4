use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use lightbox::apps::{ContainerLaunch, InitFile, NativeLaunch, PortMap};
use lightbox::cache::LocalCache;
use lightbox::error::Error;
use lightbox::launch::{Dispatcher, LaunchPayload};
use lightbox::template::{CurlyRenderer, render_str};

mod common;
use common::FakeRuntime;

fn native_def() -> NativeLaunch {
    NativeLaunch {
        command: vec!["/opt/viewer/bin/viewer".to_string()],
        file_arg_prefix: Some("--args".to_string()),
        first_file_flag: Some("-g".to_string()),
        additional_files_flag: Some("-o".to_string()),
        init_file: None,
    }
}

fn novnc_def() -> ContainerLaunch {
    ContainerLaunch {
        image: "acme/viewer:latest".to_string(),
        container_name: "viewer".to_string(),
        ports: vec![PortMap {
            host: 8080,
            container: 8080,
        }],
        mount_target: "/data/".to_string(),
        output_target: "/output".to_string(),
        args_env: "VIEWER_ARGUMENTS".to_string(),
        project_exts: vec!["mrb".to_string(), "mrml".to_string()],
        project_arg_template: Some("load('{{path}}')".to_string()),
        viewer_url: "http://localhost:8080/vnc.html".to_string(),
    }
}

fn payload(files: &[(&str, PathBuf)]) -> LaunchPayload {
    LaunchPayload::ad_hoc(
        files
            .iter()
            .map(|(id, path)| (id.to_string(), path.clone()))
            .collect::<BTreeMap<_, _>>(),
    )
}

#[test]
fn native_command_orders_prefix_and_file_flags() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let cache = LocalCache::init(tmp.path(), false)?;
    let runtime = FakeRuntime::default();
    let dispatcher = Dispatcher::new(&cache, &runtime, &CurlyRenderer);

    let payload = payload(&[
        ("f1", PathBuf::from("/cache/a/scan.nii")),
        ("f2", PathBuf::from("/cache/b/mask.nii")),
        ("f3", PathBuf::from("/cache/c/more.nii")),
    ]);
    let command = dispatcher.resolve_native_command(&native_def(), &payload)?;
    assert_eq!(
        command,
        vec![
            "/opt/viewer/bin/viewer",
            "--args",
            "-g",
            "/cache/a/scan.nii",
            "-o",
            "/cache/b/mask.nii",
            "-o",
            "/cache/c/more.nii",
        ]
    );
    Ok(())
}

#[test]
fn native_command_without_files_is_bare() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let cache = LocalCache::init(tmp.path(), false)?;
    let runtime = FakeRuntime::default();
    let dispatcher = Dispatcher::new(&cache, &runtime, &CurlyRenderer);

    let command = dispatcher.resolve_native_command(&native_def(), &payload(&[]))?;
    assert_eq!(command, vec!["/opt/viewer/bin/viewer"]);
    Ok(())
}

#[test]
fn init_file_is_backed_up_then_rendered() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let cache = LocalCache::init(tmp.path(), false)?;
    let runtime = FakeRuntime::default();
    let dispatcher = Dispatcher::new(&cache, &runtime, &CurlyRenderer);

    fs::write(
        cache.resources_dir().join("Viewer.ini"),
        "session={{name}}\nscenes={{output}}\n",
    )?;

    let target_dir = tmp.path().join("appconfig");
    fs::create_dir_all(&target_dir)?;
    fs::write(target_dir.join("Viewer.ini"), "live settings")?;
    fs::write(target_dir.join("Viewer.ini.bak"), "stale backup")?;

    let def = NativeLaunch {
        init_file: Some(InitFile {
            template: PathBuf::from("Viewer.ini"),
            target_dir: target_dir.to_str().context("utf8 target dir")?.to_string(),
        }),
        ..native_def()
    };

    let mut payload = payload(&[("f1", PathBuf::from("/cache/a/scan.nii"))]);
    payload.name = "Viewer: session one".to_string();
    payload.output_dir = Some(tmp.path().join("analyses/a1/output"));

    dispatcher.resolve_native_command(&def, &payload)?;

    // The previous live file displaced the stale backup.
    assert_eq!(
        fs::read_to_string(target_dir.join("Viewer.ini.bak"))?,
        "live settings"
    );
    let rendered = fs::read_to_string(target_dir.join("Viewer.ini"))?;
    assert!(rendered.contains("session=Viewer: session one"));
    assert!(rendered.contains(&format!(
        "scenes={}",
        tmp.path().join("analyses/a1/output").display()
    )));
    Ok(())
}

#[test]
fn missing_template_fails_after_rename() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let cache = LocalCache::init(tmp.path(), false)?;
    let runtime = FakeRuntime::default();
    let dispatcher = Dispatcher::new(&cache, &runtime, &CurlyRenderer);

    let target_dir = tmp.path().join("appconfig");
    fs::create_dir_all(&target_dir)?;
    fs::write(target_dir.join("Viewer.ini"), "live settings")?;

    let def = NativeLaunch {
        init_file: Some(InitFile {
            template: PathBuf::from("Viewer.ini"),
            target_dir: target_dir.to_str().context("utf8 target dir")?.to_string(),
        }),
        ..native_def()
    };

    let err = dispatcher
        .resolve_native_command(&def, &payload(&[]))
        .unwrap_err();
    assert!(matches!(err, Error::TemplateRender { .. }));

    // Documented risk: the rename is not rolled back; only the backup
    // remains.
    assert!(!target_dir.join("Viewer.ini").exists());
    assert_eq!(
        fs::read_to_string(target_dir.join("Viewer.ini.bak"))?,
        "live settings"
    );
    Ok(())
}

#[test]
fn novnc_reuses_the_singleton_slot() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let cache = LocalCache::init(tmp.path(), false)?;
    let runtime = FakeRuntime::default().with_container("old", "viewer");
    let dispatcher = Dispatcher::new(&cache, &runtime, &CurlyRenderer);

    let launch = dispatcher.launch_novnc(&novnc_def(), &payload(&[]))?;
    assert_eq!(launch.viewer_url, "http://localhost:8080/vnc.html");

    let ops = runtime.ops.borrow().clone();
    assert_eq!(ops, vec!["kill old", "prune", "run acme/viewer:latest"]);

    // Exactly one container holds the reserved name afterwards.
    let named = runtime.named("viewer");
    assert_eq!(named.len(), 1);
    assert_eq!(named[0].id, launch.handle.id);
    Ok(())
}

#[test]
fn novnc_teardown_failures_are_not_fatal() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let cache = LocalCache::init(tmp.path(), false)?;
    let runtime = FakeRuntime::default().with_container("old", "viewer");
    runtime.fail_kill.set(true);
    let dispatcher = Dispatcher::new(&cache, &runtime, &CurlyRenderer);

    // The kill fails, the launch still runs the new container.
    let launch = dispatcher.launch_novnc(&novnc_def(), &payload(&[]))?;
    assert!(runtime
        .ops
        .borrow()
        .contains(&"run acme/viewer:latest".to_string()));
    assert!(!launch.handle.id.is_empty());
    Ok(())
}

#[test]
fn novnc_prefers_project_file_over_input_list() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let cache = LocalCache::init(tmp.path(), false)?;
    let runtime = FakeRuntime::default();
    let dispatcher = Dispatcher::new(&cache, &runtime, &CurlyRenderer);

    let output_dir = tmp.path().join("analyses/a1/output");
    fs::create_dir_all(&output_dir)?;
    fs::write(output_dir.join("scene.mrb"), b"scene")?;

    let mut payload = payload(&[("f1", tmp.path().join("grp/acq/f1/scan.nii"))]);
    payload.output_dir = Some(output_dir);

    dispatcher.launch_novnc(&novnc_def(), &payload)?;

    let last = runtime.last_run.borrow();
    let (_, options) = last.as_ref().context("run recorded")?;
    assert_eq!(
        options.env,
        vec![(
            "VIEWER_ARGUMENTS".to_string(),
            "load('/data/analyses/a1/output/scene.mrb')".to_string()
        )]
    );
    // Explicit output dir mounts read-write.
    assert_eq!(options.binds.len(), 2);
    assert!(options.binds[0].read_only);
    assert!(!options.binds[1].read_only);
    Ok(())
}

#[test]
fn novnc_falls_back_to_mapped_input_list() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let cache = LocalCache::init(tmp.path(), false)?;
    let runtime = FakeRuntime::default();
    let dispatcher = Dispatcher::new(&cache, &runtime, &CurlyRenderer);

    let payload = payload(&[
        ("f1", tmp.path().join("grp/acq/f1/scan.nii")),
        ("f2", tmp.path().join("grp/acq/f2/mask.nii")),
    ]);
    dispatcher.launch_novnc(&novnc_def(), &payload)?;

    let last = runtime.last_run.borrow();
    let (image, options) = last.as_ref().context("run recorded")?;
    assert_eq!(image, "acme/viewer:latest");
    assert_eq!(
        options.env,
        vec![(
            "VIEWER_ARGUMENTS".to_string(),
            "/data/grp/acq/f1/scan.nii /data/grp/acq/f2/mask.nii".to_string()
        )]
    );

    // Ad-hoc launches get a read-only scratch mount instead of an output
    // directory.
    assert_eq!(options.binds.len(), 2);
    assert!(options.binds[1].read_only);
    assert_eq!(options.binds[1].source, cache.scratch_dir());
    assert_eq!(options.name.as_deref(), Some("viewer"));
    Ok(())
}

#[test]
fn x11_is_a_bare_best_effort_run() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let cache = LocalCache::init(tmp.path(), false)?;
    let runtime = FakeRuntime::default();
    let dispatcher = Dispatcher::new(&cache, &runtime, &CurlyRenderer);

    dispatcher.launch_x11(&novnc_def(), &payload(&[]))?;

    let last = runtime.last_run.borrow();
    let (image, options) = last.as_ref().context("run recorded")?;
    assert_eq!(image, "acme/viewer:latest");
    assert!(options.name.is_none());
    assert!(options.binds.is_empty());
    Ok(())
}

#[test]
fn curly_templates_substitute_known_keys() {
    let context = BTreeMap::from([
        ("name".to_string(), "Slicer: now".to_string()),
        ("output".to_string(), "/tmp/out".to_string()),
    ]);
    assert_eq!(
        render_str("n={{name}} o={{ output }} u={{unknown}}", &context),
        "n=Slicer: now o=/tmp/out u="
    );
    assert_eq!(render_str("no placeholders", &context), "no placeholders");
    assert_eq!(render_str("dangling {{name", &context), "dangling {{name");
}
