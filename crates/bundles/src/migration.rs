//! Running a plugin's pending schema migrations on activation.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {async_trait::async_trait, tracing::debug};

use plinth_config::MigrationsConfig;

use crate::error::{Error, Result};

/// Triggers a module's pending schema migrations.
///
/// Failures are reported to the caller; activation logs them and carries on.
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    async fn run(&self, module_name: &str, module_path: &Path) -> Result<()>;
}

/// Used when no migration command is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMigrationRunner;

#[async_trait]
impl MigrationRunner for NoopMigrationRunner {
    async fn run(&self, module_name: &str, _module_path: &Path) -> Result<()> {
        debug!(module = module_name, "no migration command configured");
        Ok(())
    }
}

/// Runs an external command, e.g. `php artisan module:migrate {module}`.
///
/// `{module}` and `{path}` in any argument are replaced with the module name
/// and its directory.
#[derive(Debug, Clone)]
pub struct CommandMigrationRunner {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandMigrationRunner {
    /// Returns `None` for an empty command.
    #[must_use]
    pub fn new(command: &[String], working_dir: Option<PathBuf>) -> Option<Self> {
        let (program, args) = command.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            working_dir,
        })
    }

    /// Build from config; relative working directories resolve against `data_dir`.
    #[must_use]
    pub fn from_config(config: &MigrationsConfig, data_dir: &Path) -> Option<Self> {
        let working_dir = match &config.working_dir {
            Some(dir) if dir.is_relative() => data_dir.join(dir),
            Some(dir) => dir.clone(),
            None => data_dir.to_path_buf(),
        };
        Self::new(&config.command, Some(working_dir))
    }

    fn render_args(&self, module_name: &str, module_path: &Path) -> Vec<String> {
        let path = module_path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{module}", module_name).replace("{path}", &path))
            .collect()
    }
}

#[async_trait]
impl MigrationRunner for CommandMigrationRunner {
    async fn run(&self, module_name: &str, module_path: &Path) -> Result<()> {
        let args = self.render_args(module_name, module_path);
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&args);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(module = module_name, program = %self.program, ?args, "running migrations");
        let output = command.output().await.map_err(|e| {
            Error::migration(module_name, format!("failed to run {}: {e}", self.program))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::migration(
                module_name,
                format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            ));
        }
        Ok(())
    }
}

/// Pick the runner for `config`.
#[must_use]
pub fn runner_from_config(
    config: &MigrationsConfig,
    data_dir: &Path,
) -> Arc<dyn MigrationRunner> {
    match CommandMigrationRunner::from_config(config, data_dir) {
        Some(runner) => Arc::new(runner),
        None => Arc::new(NoopMigrationRunner),
    }
}
