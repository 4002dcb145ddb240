use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

use crate::cli::Cli;

/// MD5 of a clean US Super Mario World ROM (headerless).
pub const SMW_MD5: &str = "cdd3c8c37322978ca8669b34bc89c804";
pub const DEFAULT_API: &str = "https://www.smwcentral.net/ajax.php";
/// Floating IPS release archive hosted on SMW Central.
pub const FLIPS_URL: &str = "https://dl.smwcentral.net/11474/floating.zip";

const ENV_PREFIX: &str = "SMWC_";

/// Contents of `settings.toml`:
///
/// ```toml
/// [ROMs]
/// smw = "smw.sfc"
///
/// [Advanced]
/// verbose = true
/// api = "https://www.smwcentral.net/ajax.php"
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Settings {
    #[serde(rename = "ROMs", default)]
    pub roms: RomSettings,
    #[serde(rename = "Advanced", default)]
    pub advanced: AdvancedSettings,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RomSettings {
    pub smw: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct AdvancedSettings {
    pub verbose: Option<bool>,
    pub api: Option<String>,
}

impl Settings {
    /// Read the settings file (a missing file yields defaults) and layer
    /// `SMWC_<TABLE>__<KEY>` environment variables over it.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .split("__")
                    .map(|key| env_key(key.as_str()).into())
                    .lowercase(false),
            )
            .extract()
            .with_context(|| format!("reading settings from {}", path.display()))
    }
}

// Env keys arrive upper-cased; the table names in the file are mixed case.
fn env_key(raw: &str) -> String {
    let mut parts = raw.split('.');
    let table = match parts.next() {
        Some(t) if t.eq_ignore_ascii_case("roms") => "ROMs".to_string(),
        Some(t) if t.eq_ignore_ascii_case("advanced") => "Advanced".to_string(),
        Some(t) => t.to_ascii_lowercase(),
        None => String::new(),
    };
    std::iter::once(table)
        .chain(parts.map(|p| p.to_ascii_lowercase()))
        .collect::<Vec<_>>()
        .join(".")
}

#[derive(Debug, Clone)]
pub struct Config {
    pub list: PathBuf,
    pub base_rom: PathBuf,
    pub base_rom_md5: String,
    pub api: String,
    pub flips_url: String,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub bin_dir: PathBuf,
    /// Substring identifying patch files inside archives.
    pub patch_marker: String,
    pub rom_extension: String,
    pub api_timeout_secs: u64,
    pub max_retries: usize,
    pub throttle_ms: Option<u64>,
    pub keep_going: bool,
    pub print_summary: bool,
    pub verbose: u8,
    pub quiet: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_work_dir(PathBuf::from("."))
    }
}

impl Config {
    /// Defaults with `output/`, `temp/` and `bin/` placed under `work_dir`.
    pub fn with_work_dir(work_dir: PathBuf) -> Self {
        Self {
            list: PathBuf::from("list.txt"),
            base_rom: PathBuf::from("smw.sfc"),
            base_rom_md5: SMW_MD5.to_string(),
            api: DEFAULT_API.to_string(),
            flips_url: FLIPS_URL.to_string(),
            output_dir: work_dir.join("output"),
            scratch_dir: work_dir.join("temp"),
            bin_dir: work_dir.join("bin"),
            work_dir,
            patch_marker: ".bps".to_string(),
            rom_extension: "sfc".to_string(),
            api_timeout_secs: 10,
            max_retries: 3,
            throttle_ms: None,
            keep_going: false,
            print_summary: false,
            verbose: 0,
            quiet: 0,
        }
    }

    /// Combine parsed CLI flags with loaded settings; flags win.
    pub fn from_parts(cli: Cli, settings: Settings) -> anyhow::Result<Self> {
        let work_dir = cli.work_dir.unwrap_or_else(|| PathBuf::from("."));
        let mut config = Self::with_work_dir(work_dir);

        config.list = cli.list;
        if let Some(rom) = cli.base_rom.or(settings.roms.smw) {
            config.base_rom = rom;
        }
        if let Some(api) = cli.api.or(settings.advanced.api) {
            config.api = api;
        }
        if let Some(output) = cli.output {
            config.output_dir = output;
        }
        config.keep_going = cli.keep_going;
        config.print_summary = cli.print_summary;
        config.verbose = cli.verbose;
        if settings.advanced.verbose == Some(true) {
            config.verbose = config.verbose.max(1);
        }
        config.quiet = cli.quiet;

        config.validate()?;
        Ok(config)
    }

    fn validate_api(&self) -> anyhow::Result<()> {
        if !(self.api.starts_with("http://") || self.api.starts_with("https://")) {
            anyhow::bail!("api must be an http:// or https:// URL, got {:?}", self.api);
        }
        Ok(())
    }

    fn validate_names(&self) -> anyhow::Result<()> {
        if self.patch_marker.is_empty() {
            anyhow::bail!("patch marker cannot be empty");
        }
        if self.rom_extension.is_empty() {
            anyhow::bail!("rom extension cannot be empty");
        }
        if self.base_rom_md5.len() != 32 || hex::decode(&self.base_rom_md5).is_err() {
            anyhow::bail!("base ROM checksum must be a 32 digit hex MD5");
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_api()?;
        self.validate_names()?;
        Ok(())
    }

    /// Quiet wins over verbose.
    pub fn effective_verbose(&self) -> u8 {
        if self.quiet > 0 { 0 } else { self.verbose }
    }
}

impl TryFrom<Cli> for Config {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let settings = Settings::load(&cli.settings)?;
        Self::from_parts(cli, settings)
    }
}
