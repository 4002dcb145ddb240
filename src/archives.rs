use anyhow::Context;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use walkdir::WalkDir;
use zip::read::ZipArchive;

use crate::config::Config;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    /// Anything else is handed to a system 7z, which also reads rar.
    Other,
}

pub fn sniff_archive_kind(path: &Path) -> anyhow::Result<ArchiveKind> {
    let mut f = File::open(path).with_context(|| format!("opening archive: {:?}", path))?;
    let mut magic = [0u8; 4];
    let n = f.read(&mut magic)?;
    let head = &magic[..n];
    if head == ZIP_MAGIC || head == ZIP_EMPTY_MAGIC {
        return Ok(ArchiveKind::Zip);
    }
    let is_zip_name = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
    if is_zip_name {
        // Let the zip reader report what is wrong with it.
        return Ok(ArchiveKind::Zip);
    }
    Ok(ArchiveKind::Other)
}

/// Destroy `dir` if it exists and create it empty.
pub fn reset_scratch_dir(dir: &Path) -> anyhow::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .with_context(|| format!("removing scratch dir {}", dir.display()))?;
    }
    fs::create_dir_all(dir).with_context(|| format!("creating scratch dir {}", dir.display()))
}

pub fn extract_zip(path: &Path, dest: &Path) -> anyhow::Result<()> {
    let f = File::open(path).with_context(|| format!("opening archive: {:?}", path))?;
    let mut zip = ZipArchive::new(f)
        .with_context(|| format!("corrupt or unreadable archive {}", path.display()))?;
    zip.extract(dest)
        .with_context(|| format!("corrupt or unreadable archive {}", path.display()))?;
    Ok(())
}

/// Extract with the system 7z binary. This is the only way non-zip uploads
/// (7z, rar) are handled.
pub fn extract_with_7z(path: &Path, dest: &Path, verbose: u8) -> anyhow::Result<()> {
    let exe = which::which("7z")
        .or_else(|_| which::which("7za"))
        .map_err(|_| {
            anyhow::anyhow!(
                "unsupported archive {}: not a zip and no 7z executable on PATH",
                path.display()
            )
        })?;

    // x <archive> -o<dir> -y
    let output = Command::new(&exe)
        .arg("x")
        .arg(path.as_os_str())
        .arg(format!("-o{}", dest.to_string_lossy()))
        .arg("-y")
        .output()
        .with_context(|| format!("running 7z to extract {:?}", path))?;

    vprintln!(verbose, 2, "{}", String::from_utf8_lossy(&output.stdout));
    if !output.status.success() {
        anyhow::bail!(
            "corrupt or unreadable archive {} (7z exited with {}): {}",
            path.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

pub fn extract_archive(path: &Path, dest: &Path, verbose: u8) -> anyhow::Result<()> {
    match sniff_archive_kind(path)? {
        ArchiveKind::Zip => extract_zip(path, dest),
        ArchiveKind::Other => extract_with_7z(path, dest, verbose),
    }
}

/// Every file below `root` whose name contains `marker`, sorted.
pub fn find_marked_files(root: &Path, marker: &str) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().contains(marker))
        .map(|e| e.into_path())
        .collect();
    found.sort();
    found
}

/// First free name in `dir` for `name`: `name` itself, then `stem (2).ext`, `stem (3).ext`...
pub fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, rest) = match name.find('.') {
        Some(0) | None => (name, ""),
        Some(idx) => name.split_at(idx),
    };
    (2..)
        .map(|n| dir.join(format!("{stem} ({n}){rest}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Rename, falling back to copy + delete when `from` and `to` are on different filesystems.
pub fn move_file(from: &Path, to: &Path) -> anyhow::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).with_context(|| format!("moving {:?} to {:?}", from, to))?;
    fs::remove_file(from).with_context(|| format!("removing {:?} after copy", from))?;
    Ok(())
}

/// Extract `archive` into a fresh scratch directory, move every patch file found
/// inside it into the work dir and delete the archive. Returns the moved files.
///
/// A patch whose name is already taken in the work dir (usually by an earlier
/// archive in the same run) is renamed rather than overwriting the existing one.
pub fn extract_patches(archive: &Path, config: &Config) -> anyhow::Result<Vec<PathBuf>> {
    let verbose = config.effective_verbose();

    vprintln!(verbose, 2, "Recreating scratch dir {}", config.scratch_dir.display());
    reset_scratch_dir(&config.scratch_dir)?;
    extract_archive(archive, &config.scratch_dir, verbose)?;

    let found = find_marked_files(&config.scratch_dir, &config.patch_marker);
    if found.is_empty() {
        wprintln!(
            config.quiet,
            "no {} files found in {}",
            config.patch_marker,
            archive.display()
        );
    }

    let mut moved = Vec::with_capacity(found.len());
    for file in found {
        vprintln!(verbose, 2, "Found file {}", file.display());
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dest = unique_destination(&config.work_dir, &name);
        if dest.file_name().map(|n| n.to_string_lossy() != name).unwrap_or(false) {
            wprintln!(
                config.quiet,
                "{} from {} collides with an existing patch, keeping it as {}",
                name,
                archive.display(),
                dest.display()
            );
        }
        move_file(&file, &dest).with_context(|| format!("moving patch file {}", file.display()))?;
        vprintln!(verbose, 2, "Moved {} to {}", file.display(), dest.display());
        moved.push(dest);
    }

    fs::remove_file(archive).with_context(|| format!("deleting archive {}", archive.display()))?;
    vprintln!(verbose, 1, "Deleted {}", archive.display());

    Ok(moved)
}
