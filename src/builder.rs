//! Invocation of the external STAC item builder.
use crate::config::BuilderConfig;
use crate::error::PipelineError;
use crate::product::Platform;
use std::path::Path;
use tokio::process::Command;
use tracing::{info, warn};

/// Platform sub-command understood by the builder.
pub fn platform_subcommand(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::S1 => &["sentinel1", "grd"],
        Platform::S2 => &["sentinel2"],
        Platform::S3 | Platform::S3p => &["sentinel3"],
        Platform::S5 => &["sentinel5p"],
    }
}

pub struct ItemBuilder {
    program: String,
    leading_args: Vec<String>,
}

impl ItemBuilder {
    pub fn new(config: &BuilderConfig) -> Self {
        Self {
            program: config.program.clone(),
            leading_args: config.args.clone(),
        }
    }

    /// `[leading args] <platform sub-command...> create-item <title> <source dir>`
    pub fn args(&self, platform: Platform, title: &str, source_dir: &str) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.extend(platform_subcommand(platform).iter().map(|s| s.to_string()));
        args.push("create-item".to_string());
        args.push(title.to_string());
        args.push(source_dir.to_string());
        args
    }

    /// Runs the builder inside `work_dir` with `./` as the source directory
    /// and waits for it.
    pub async fn run(
        &self,
        platform: Platform,
        title: &str,
        work_dir: &Path,
    ) -> Result<(), PipelineError> {
        let args = self.args(platform, title, "./");
        info!(program = %self.program, args = %args.join(" "), "running item builder");

        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(work_dir)
            .output()
            .await
            .map_err(|source| PipelineError::BuilderSpawn {
                program: self.program.clone(),
                source,
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            info!(target: "builder", "{line}");
        }

        if output.status.success() {
            info!("item builder finished");
            return Ok(());
        }

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            warn!(target: "builder", "{line}");
        }
        // Killed by a signal: no code to pass on.
        let code = output.status.code().unwrap_or(1);
        Err(PipelineError::Builder { code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(program: &str, args: &[&str]) -> ItemBuilder {
        ItemBuilder::new(&BuilderConfig {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn test_args_by_platform() {
        let stac = builder("/usr/local/bin/stac", &[]);
        assert_eq!(
            stac.args(Platform::S1, "S1A_X.SAFE", "./"),
            ["sentinel1", "grd", "create-item", "S1A_X.SAFE", "./"]
        );
        assert_eq!(
            stac.args(Platform::S2, "S2A_X.SAFE", "./"),
            ["sentinel2", "create-item", "S2A_X.SAFE", "./"]
        );
        assert_eq!(
            stac.args(Platform::S3p, "S3A_X.SEN3", "./")[0],
            "sentinel3"
        );
        assert_eq!(
            stac.args(Platform::S5, "S5P_X.nc", "./"),
            ["sentinel5p", "create-item", "S5P_X.nc", "./"]
        );
    }

    #[test]
    fn test_leading_args_come_first() {
        let wrapped = builder("python3", &["-m", "stactools.cli"]);
        assert_eq!(
            wrapped.args(Platform::S2, "T", "./"),
            ["-m", "stactools.cli", "sentinel2", "create-item", "T", "./"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_is_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let failing = builder("sh", &["-c", "echo oops >&2; exit 7", "stac"]);
        let result = failing.run(Platform::S2, "T", dir.path()).await;
        assert!(matches!(result, Err(PipelineError::Builder { code: 7 })));

        let passing = builder("sh", &["-c", "exit 0", "stac"]);
        assert!(passing.run(Platform::S2, "T", dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = builder("/nonexistent/stac-builder", &[]);
        assert!(matches!(
            missing.run(Platform::S2, "T", dir.path()).await,
            Err(PipelineError::BuilderSpawn { .. })
        ));
    }
}
