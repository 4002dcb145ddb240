use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "smwc-fetch",
    version,
    about = "Download SMW Central hacks by ID and patch them onto a base ROM",
    long_about = "Reads a list of SMW Central file IDs (or file URLs containing id=<n>), downloads each \
                  archive, extracts its .bps patches, applies them to the base ROM with flips, and \
                  writes the patched ROMs to the output directory."
)]
pub struct Cli {
    /// Text file with one file ID or file URL per line
    #[arg(value_name = "LIST")]
    pub list: PathBuf,

    /// Settings file (TOML) with [ROMs] and [Advanced] tables
    #[arg(long = "settings", value_name = "PATH", default_value = "settings.toml")]
    pub settings: PathBuf,

    /// Path to the clean base ROM (overrides ROMs.smw from the settings file)
    #[arg(long = "base-rom", value_name = "PATH")]
    pub base_rom: Option<PathBuf>,

    /// API endpoint (overrides Advanced.api from the settings file)
    #[arg(long = "api", value_name = "URL")]
    pub api: Option<String>,

    /// Directory the patched ROMs are written to
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Directory downloads, scratch data and bin/ live in (defaults to the current directory)
    #[arg(long = "work-dir", value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Continue with the remaining IDs when a download fails
    #[arg(long = "keep-going")]
    pub keep_going: bool,

    /// Print the run summary JSON to stdout
    #[arg(long = "print-summary")]
    pub print_summary: bool,

    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,
}
