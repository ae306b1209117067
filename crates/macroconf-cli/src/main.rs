use std::process::ExitCode;

fn main() -> ExitCode {
    macroconf_cli::run()
}
