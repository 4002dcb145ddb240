use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::Config;
use crate::patch::find_patch_files;

/// Remove every patch file in `dir`. Returns what was removed.
pub fn clear_patch_files(dir: &Path, marker: &str, verbose: u8) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let files = find_patch_files(dir, marker)?;
    for file in &files {
        fs::remove_file(file).with_context(|| format!("removing {}", file.display()))?;
        vprintln!(verbose, 2, "Removed file {}.", file.display());
    }
    Ok(files)
}

pub fn remove_scratch_dir(dir: &Path, verbose: u8) -> anyhow::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("removing {}", dir.display()))?;
        vprintln!(verbose, 1, "Removed {} folder", dir.display());
    }
    Ok(())
}

/// Owns the run's intermediate state. Dropping it without calling
/// [`ScratchGuard::finish`] (an early return or panic) removes only the files
/// registered with [`ScratchGuard::track`] and the scratch directory, logging
/// instead of failing. Patch files that were already in the work dir are left alone.
pub struct ScratchGuard {
    work_dir: PathBuf,
    scratch_dir: PathBuf,
    marker: String,
    created: Vec<PathBuf>,
    verbose: u8,
    quiet: u8,
    armed: bool,
}

impl ScratchGuard {
    pub fn new(config: &Config) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            scratch_dir: config.scratch_dir.clone(),
            marker: config.patch_marker.clone(),
            created: Vec::new(),
            verbose: config.effective_verbose(),
            quiet: config.quiet,
            armed: true,
        }
    }

    /// Register files this run wrote so an aborted run can remove them.
    pub fn track<I: IntoIterator<Item = PathBuf>>(&mut self, paths: I) {
        self.created.extend(paths);
    }

    fn abandon(&self) -> anyhow::Result<()> {
        for path in &self.created {
            if path.is_file() {
                fs::remove_file(path).with_context(|| format!("removing {}", path.display()))?;
                vprintln!(self.verbose, 2, "Removed file {}.", path.display());
            }
        }
        remove_scratch_dir(&self.scratch_dir, self.verbose)
    }

    /// Remove every patch file in the work dir and the scratch directory, reporting errors.
    pub fn finish(mut self) -> anyhow::Result<Vec<PathBuf>> {
        self.armed = false;
        vprintln!(self.verbose, 1, "Cleaning up...");
        let removed = clear_patch_files(&self.work_dir, &self.marker, self.verbose)?;
        remove_scratch_dir(&self.scratch_dir, self.verbose)?;
        Ok(removed)
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.abandon() {
            wprintln!(self.quiet, "cleanup after failed run incomplete: {e:#}");
        }
    }
}
