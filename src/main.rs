use std::process::ExitCode;

use clap::Parser;

use smwc_fetch::cli::Cli;
use smwc_fetch::config::Config;
use smwc_fetch::fetch::SmwcApi;
use smwc_fetch::pipeline;

fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = Config::try_from(cli)?;
    let api = SmwcApi::new(&config)?;
    let summary = pipeline::run(&config, &api)?;
    if config.print_summary {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(summary.succeeded())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
