use std::process::ExitCode;

fn main() -> ExitCode {
    bidprice_cli::run()
}
