use std::fs;

use anyhow::Context;

use crate::archives::extract_patches;
use crate::checksum::validate_base_rom;
use crate::cleanup::ScratchGuard;
use crate::config::Config;
use crate::fetch::{FileApi, download_files_from_list};
use crate::flips::FlipsPatcher;
use crate::patch::{Patcher, find_patch_files, patch_all};
use crate::types::{FetchFailure, RunSummary};

/// Full run against the real patcher: validate, fetch, extract, patch, clean up.
pub fn run<A: FileApi + ?Sized>(config: &Config, api: &A) -> anyhow::Result<RunSummary> {
    run_with(config, api, |api| {
        let patcher = FlipsPatcher::resolve(api, config)?;
        vprintln!(config.effective_verbose(), 1, "Using flips at {}", patcher.exe().display());
        Ok(patcher)
    })
}

/// Same as [`run`] with the patcher supplied by `resolve_patcher`, which is only
/// called when there is at least one patch to apply.
pub fn run_with<A, P, F>(config: &Config, api: &A, resolve_patcher: F) -> anyhow::Result<RunSummary>
where
    A: FileApi + ?Sized,
    P: Patcher,
    F: FnOnce(&A) -> anyhow::Result<P>,
{
    let verbose = config.effective_verbose();
    validate_base_rom(&config.base_rom, &config.base_rom_md5)?;

    fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("creating work dir {}", config.work_dir.display()))?;
    let mut guard = ScratchGuard::new(config);

    let fetched = download_files_from_list(api, &config.list, config)?;
    let mut summary = RunSummary {
        identifiers: fetched.identifiers,
        archives: fetched.archives.clone(),
        fetch_failures: fetched.failures,
        ..Default::default()
    };
    guard.track(fetched.archives.iter().cloned());

    for archive in &fetched.archives {
        match extract_patches(archive, config) {
            Ok(moved) => guard.track(moved),
            Err(e) if config.keep_going => {
                wprintln!(config.quiet, "skipping {}: {e:#}", archive.display());
                summary.fetch_failures.push(FetchFailure {
                    identifier: archive.display().to_string(),
                    error: format!("{e:#}"),
                });
            }
            Err(e) => return Err(e),
        }
    }

    summary.patch_files = find_patch_files(&config.work_dir, &config.patch_marker)?;
    if summary.patch_files.is_empty() {
        wprintln!(config.quiet, "no patch files to apply");
    } else {
        let patcher = resolve_patcher(api)?;
        summary.patches = patch_all(&patcher, &summary.patch_files, config)?;
    }

    summary.cleaned = guard.finish()?;

    let failed = summary.failed_patches().count();
    vprintln!(
        verbose,
        1,
        "Patched {} of {} ROMs into {}",
        summary.patches.len() - failed,
        summary.patch_files.len(),
        config.output_dir.display()
    );
    if summary.succeeded() {
        vprintln!(verbose, 1, "All done :)");
    }
    Ok(summary)
}
