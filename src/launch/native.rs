use super::*;

impl Dispatcher<'_> {
    /// Build the argv for a native launch: base command, file-arg prefix,
    /// then the input files — the first behind `first_file_flag` and each
    /// subsequent one behind `additional_files_flag`, when declared.
    ///
    /// Declaring an init file makes this call destructive: the live init
    /// file is renamed aside and replaced with a fresh render before the
    /// argv is returned.
    pub fn resolve_native_command(
        &self,
        def: &NativeLaunch,
        payload: &LaunchPayload,
    ) -> Result<Vec<String>> {
        if let Some(init) = &def.init_file {
            self.prepare_init_file(init, payload)?;
        }

        let mut command = def.command.clone();
        if !payload.input_files.is_empty() {
            if let Some(prefix) = &def.file_arg_prefix {
                command.push(prefix.clone());
            }
            for (i, path) in payload.input_files.values().enumerate() {
                if i == 0 {
                    if let Some(flag) = &def.first_file_flag {
                        command.push(flag.clone());
                    }
                } else if let Some(flag) = &def.additional_files_flag {
                    command.push(flag.clone());
                }
                command.push(path.display().to_string());
            }
        }
        Ok(command)
    }

    /// Back up the live init file (rename to a `.bak` sibling, overwriting
    /// any prior backup), render the template against the payload, write
    /// the result over the original path.
    ///
    /// Not transactional: after the rename, a render failure leaves the
    /// backup as the only copy. The error names it.
    fn prepare_init_file(&self, init: &InitFile, payload: &LaunchPayload) -> Result<()> {
        let template_path = self.cache.resources_dir().join(&init.template);
        let file_name = init.template.file_name().ok_or_else(|| Error::TemplateRender {
            template: template_path.clone(),
            reason: "template has no file name".to_string(),
        })?;

        let target_dir = expand_home(&init.target_dir);
        let target = target_dir.join(file_name);
        let backup = target_dir.join(format!("{}.bak", file_name.to_string_lossy()));

        if target.exists() {
            fs::rename(&target, &backup)?;
        }

        let rendered = self
            .templates
            .render(&template_path, &payload.template_context())
            .map_err(|err| match err {
                Error::TemplateRender { template, reason } => Error::TemplateRender {
                    template,
                    reason: format!("{reason} (original kept at {})", backup.display()),
                },
                other => other,
            })?;
        fs::write(&target, rendered)?;
        Ok(())
    }

    /// Run the resolved command synchronously; the caller is blocked until
    /// the viewer exits. Spawn failure is the typed error; the viewer's own
    /// exit status is logged but not this engine's contract.
    pub fn launch_native(&self, def: &NativeLaunch, payload: &LaunchPayload) -> Result<Option<i32>> {
        let command = self.resolve_native_command(def, payload)?;
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("native launcher declares an empty command".to_string()))?;

        tracing::info!(?command, "launching native viewer");
        let status = std::process::Command::new(program)
            .args(args)
            .status()
            .map_err(|source| Error::LaunchExecution {
                command: program.clone(),
                source,
            })?;

        if !status.success() {
            tracing::warn!(%status, "viewer exited with non-zero status");
        }
        Ok(status.code())
    }
}

fn expand_home(dir: &str) -> PathBuf {
    if let Some(rest) = dir.strip_prefix("~")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(format!("{home}{rest}"));
    }
    PathBuf::from(dir)
}
