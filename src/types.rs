use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Body of an `a=getfile` response. Only the fields the pipeline reads are kept;
/// everything else the API returns is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    /// Percent-encoded location of the archive.
    pub download_url: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Windows,
    MacOs,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        match os {
            "linux" => Platform::Linux,
            "windows" => Platform::Windows,
            "macos" => Platform::MacOs,
            _ => Platform::Other,
        }
    }

    /// Name of the flips build shipped in the Floating IPS release archive, if
    /// there is one for this platform.
    pub fn bundled_binary(&self) -> Option<&'static str> {
        match self {
            Platform::Linux => Some("flips-linux"),
            Platform::Windows => Some("flips.exe"),
            Platform::MacOs | Platform::Other => None,
        }
    }

    /// Whether a pre-installed flips is looked up on `PATH`.
    pub fn searches_path(&self) -> bool {
        !matches!(self, Platform::Windows)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::Windows => write!(f, "windows"),
            Platform::MacOs => write!(f, "macos"),
            Platform::Other => write!(f, "{}", std::env::consts::OS),
        }
    }
}

/// Result of one external patcher invocation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PatchStatus {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

impl PatchStatus {
    pub fn ok() -> Self {
        Self {
            exit_code: Some(0),
            success: true,
            stderr: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PatchOutcome {
    pub patch: PathBuf,
    pub output: PathBuf,
    pub status: PatchStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchFailure {
    pub identifier: String,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub identifiers: usize,
    pub archives: Vec<PathBuf>,
    pub fetch_failures: Vec<FetchFailure>,
    pub patch_files: Vec<PathBuf>,
    pub patches: Vec<PatchOutcome>,
    pub cleaned: Vec<PathBuf>,
}

impl RunSummary {
    pub fn failed_patches(&self) -> impl Iterator<Item = &PatchOutcome> {
        self.patches.iter().filter(|p| !p.status.success)
    }

    pub fn succeeded(&self) -> bool {
        self.fetch_failures.is_empty() && self.failed_patches().next().is_none()
    }
}
