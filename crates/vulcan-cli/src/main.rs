use std::process::ExitCode;

fn main() -> ExitCode {
    vulcan_cli::run()
}
