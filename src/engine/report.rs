//! Dashboard generation through the engine's report mode, and archiving

use crate::config::EngineConfig;
use crate::error::{ControlError, Result};
use crate::session::ReportStatus;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Invokes `<jmeter> -g <results> -o <dir>`
#[derive(Debug, Clone)]
pub struct ReportTool {
    program: PathBuf,
    working_dir: Option<PathBuf>,
}

impl ReportTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: config.jmeter_bin.clone(),
            working_dir: config.report_working_dir(),
        }
    }

    pub fn args(results: &Path, out_dir: &Path) -> Vec<String> {
        vec![
            "-g".to_string(),
            results.display().to_string(),
            "-o".to_string(),
            out_dir.display().to_string(),
        ]
    }

    /// Render the dashboard for `results` into a fresh `out_dir`.
    ///
    /// A tool that runs but fails yields [`ReportStatus::Error`] and leaves
    /// its captured output in `error_log`. A tool that cannot be started at
    /// all is a [`ControlError::Launch`].
    pub async fn generate(
        &self,
        results: &Path,
        out_dir: &Path,
        error_log: &Path,
    ) -> Result<ReportStatus> {
        // The engine refuses to write into a non-empty output directory
        if out_dir.exists() {
            tokio::fs::remove_dir_all(out_dir).await?;
        }
        if let Some(parent) = out_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(Self::args(results, out_dir))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        tracing::info!(results = %results.display(), out = %out_dir.display(), "Generating report");
        let output = cmd.output().await.map_err(|e| {
            ControlError::Launch(format!(
                "failed to start report tool {}: {}",
                self.program.display(),
                e
            ))
        })?;

        if output.status.success() {
            return Ok(ReportStatus::Ready);
        }

        let mut log = format!("exit status: {}\n", output.status).into_bytes();
        log.extend_from_slice(&output.stdout);
        log.extend_from_slice(&output.stderr);
        tokio::fs::write(error_log, log).await?;

        tracing::warn!(status = %output.status, log = %error_log.display(), "Report generation failed");
        Ok(ReportStatus::Error)
    }
}

/// Pack `dir` into a zip archive at `out`, entries rooted under `root_name/`
pub fn archive_dir(dir: &Path, root_name: &str, out: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(ControlError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        )));
    }

    let mut writer = ZipWriter::new(File::create(out)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        // Zip entry names always use forward slashes
        let mut name = root_name.to_string();
        for part in relative.components() {
            name.push('/');
            name.push_str(&part.as_os_str().to_string_lossy());
        }

        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else {
            writer.start_file(name, options)?;
            std::io::copy(&mut File::open(entry.path())?, &mut writer)?;
        }
    }

    writer.finish()?;
    Ok(())
}
