use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::Config;
use crate::progress::StageProgress;
use crate::types::{PatchOutcome, PatchStatus};

/// Something that can turn `base` plus a patch file into `out`.
pub trait Patcher {
    fn apply(&self, patch: &Path, base: &Path, out: &Path) -> anyhow::Result<PatchStatus>;
}

impl<P: Patcher + ?Sized> Patcher for &P {
    fn apply(&self, patch: &Path, base: &Path, out: &Path) -> anyhow::Result<PatchStatus> {
        (**self).apply(patch, base, out)
    }
}

/// `output_dir/<name up to the marker>.<rom_ext>`, e.g. `Kaizo (v2).bps` ->
/// `output/Kaizo (v2).sfc`.
pub fn output_path_for(patch: &Path, output_dir: &Path, marker: &str, rom_ext: &str) -> PathBuf {
    let name = patch
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match name.find(marker) {
        Some(idx) => &name[..idx],
        None => name.as_str(),
    };
    output_dir.join(format!("{stem}.{rom_ext}"))
}

/// Patch files sitting directly in `dir` (not recursive), sorted.
pub fn find_patch_files(dir: &Path, marker: &str) -> anyhow::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_file() && entry.file_name().to_string_lossy().contains(marker) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

/// Apply one patch to the base ROM. A nonzero patcher exit is reported in the
/// returned outcome; only failing to run the patcher at all is an error.
pub fn patch_rom<P: Patcher + ?Sized>(
    patcher: &P,
    patch: &Path,
    config: &Config,
) -> anyhow::Result<PatchOutcome> {
    let verbose = config.effective_verbose();
    if !config.output_dir.is_dir() {
        vprintln!(verbose, 2, "{} doesn't exist, creating", config.output_dir.display());
        fs::create_dir_all(&config.output_dir)
            .with_context(|| format!("creating {}", config.output_dir.display()))?;
    }

    let output = output_path_for(
        patch,
        &config.output_dir,
        &config.patch_marker,
        &config.rom_extension,
    );
    vprintln!(verbose, 1, "Patching rom \"{}\"", patch.display());
    let status = patcher
        .apply(patch, &config.base_rom, &output)
        .with_context(|| format!("patch apply failed for {}", patch.display()))?;
    vprintln!(
        verbose,
        2,
        "patcher exited with {:?} for {}",
        status.exit_code,
        patch.display()
    );

    Ok(PatchOutcome {
        patch: patch.to_path_buf(),
        output,
        status,
    })
}

/// Apply every patch in order, warning about (but not stopping on) patcher failures.
pub fn patch_all<P: Patcher + ?Sized>(
    patcher: &P,
    patches: &[PathBuf],
    config: &Config,
) -> anyhow::Result<Vec<PatchOutcome>> {
    let progress = StageProgress::new(config, "PATCH", patches.len());
    let mut outcomes = Vec::with_capacity(patches.len());
    for patch in patches {
        progress.working_on_path(patch);
        let outcome = match patch_rom(patcher, patch, config) {
            Ok(o) => o,
            Err(e) => {
                progress.finish();
                return Err(e);
            }
        };
        if !outcome.status.success {
            let code = outcome
                .status
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            progress.warn(&format!(
                "patching {} failed (exit {}): {}",
                patch.display(),
                code,
                outcome.status.stderr
            ));
        }
        outcomes.push(outcome);
        progress.inc();
    }
    progress.finish();
    Ok(outcomes)
}
