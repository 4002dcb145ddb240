// Lightweight verbosity-gated logging helper used throughout the crate.
macro_rules! vprintln {
	($verbose:expr, $level:expr, $($arg:tt)*) => {
		if $verbose >= $level {
			eprintln!($($arg)*);
		}
	};
}

// Warnings are shown unless the run is quiet.
macro_rules! wprintln {
	($quiet:expr, $($arg:tt)*) => {
		if $quiet == 0 {
			eprintln!("warning: {}", format_args!($($arg)*));
		}
	};
}

pub mod archives;
pub mod checksum;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod fetch;
pub mod flips;
pub mod patch;
pub mod pipeline;
pub mod progress;
pub mod types;
