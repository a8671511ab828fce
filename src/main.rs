use std::process::ExitCode;

use clap::Parser;
use dylibify::cli::Args;

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // `-h`/`--version` are success, not parse failures; everything
            // else maps to the documented argument-parsing exit code.
            if err.kind() == clap::error::ErrorKind::DisplayHelp
                || err.kind() == clap::error::ErrorKind::DisplayVersion
            {
                print!("{err}");
                return ExitCode::SUCCESS;
            }
            eprint!("{err}");
            return ExitCode::from(255);
        }
    };

    if let Err(err) = dylibify::driver::run(&args) {
        eprintln!("dylibify: error: {err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
