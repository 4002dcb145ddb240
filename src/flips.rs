use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;

use crate::archives::extract_zip;
use crate::config::Config;
use crate::fetch::FileApi;
use crate::patch::Patcher;
use crate::types::{PatchStatus, Platform};

/// Find an executable called `flips` in the directories of `path_var`.
pub fn find_on_path(path_var: Option<OsString>, cwd: &Path) -> Option<PathBuf> {
    which::which_in("flips", path_var, cwd).ok()
}

/// Path of a copy installed by an earlier run, if there is one.
pub fn installed_flips(platform: Platform, config: &Config) -> Option<PathBuf> {
    let exe = config.bin_dir.join(platform.bundled_binary()?);
    exe.is_file().then_some(exe)
}

/// Download the Floating IPS release, unpack it into `bin/` and keep only the
/// build for `platform`.
pub fn install_flips<A: FileApi + ?Sized>(
    api: &A,
    platform: Platform,
    config: &Config,
) -> anyhow::Result<PathBuf> {
    let verbose = config.effective_verbose();
    let Some(binary) = platform.bundled_binary() else {
        anyhow::bail!(
            "unsupported platform {platform}: install flips and put it on PATH"
        );
    };

    vprintln!(verbose, 1, "Flips not found, downloading {}", config.flips_url);
    let bytes = api
        .download(&config.flips_url)
        .with_context(|| format!("network error downloading flips from {}", config.flips_url))?;

    fs::create_dir_all(&config.bin_dir)
        .with_context(|| format!("creating {}", config.bin_dir.display()))?;
    let mut archive = tempfile::NamedTempFile::new_in(&config.work_dir)
        .context("creating temp file for the flips archive")?;
    archive.write_all(&bytes)?;
    archive.flush()?;
    extract_zip(archive.path(), &config.bin_dir)?;

    for entry in fs::read_dir(&config.bin_dir)? {
        let entry = entry?;
        if entry.file_name() == binary {
            continue;
        }
        let path = entry.path();
        let removed = if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.with_context(|| format!("removing {}", path.display()))?;
    }

    let exe = config.bin_dir.join(binary);
    if !exe.is_file() {
        anyhow::bail!("{} is missing from {}", binary, config.flips_url);
    }
    mark_executable(&exe)?;

    vprintln!(verbose, 1, "Finished downloading flips");
    Ok(std::path::absolute(&exe)?)
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("marking {} executable", path.display()))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

/// Locate flips: `PATH` (not on Windows), then a previous install under `bin/`,
/// then a fresh download.
pub fn resolve_flips_for<A: FileApi + ?Sized>(
    api: &A,
    platform: Platform,
    path_var: Option<OsString>,
    config: &Config,
) -> anyhow::Result<PathBuf> {
    if platform.searches_path() {
        if let Some(found) = find_on_path(path_var, &config.work_dir) {
            vprintln!(config.effective_verbose(), 2, "Using flips from PATH: {}", found.display());
            return Ok(found);
        }
    }
    if let Some(installed) = installed_flips(platform, config) {
        return Ok(std::path::absolute(&installed)?);
    }
    install_flips(api, platform, config)
}

pub fn resolve_flips<A: FileApi + ?Sized>(api: &A, config: &Config) -> anyhow::Result<PathBuf> {
    resolve_flips_for(api, Platform::current(), std::env::var_os("PATH"), config)
}

/// Runs `flips -a <patch> <base> <out>`.
#[derive(Debug, Clone)]
pub struct FlipsPatcher {
    exe: PathBuf,
    verbose: u8,
}

impl FlipsPatcher {
    pub fn new(exe: PathBuf, config: &Config) -> Self {
        Self {
            exe,
            verbose: config.effective_verbose(),
        }
    }

    pub fn resolve<A: FileApi + ?Sized>(api: &A, config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(resolve_flips(api, config)?, config))
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }
}

impl Patcher for FlipsPatcher {
    fn apply(&self, patch: &Path, base: &Path, out: &Path) -> anyhow::Result<PatchStatus> {
        let output = Command::new(&self.exe)
            .arg("-a")
            .arg(patch)
            .arg(base)
            .arg(out)
            .output()
            .with_context(|| format!("running {}", self.exe.display()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            vprintln!(self.verbose, 2, "flips: {}", stdout.trim());
        }
        Ok(PatchStatus {
            exit_code: output.status.code(),
            success: output.status.success(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
