// Purpose: Default binary entry for the `depsight` subcommand CLI.
// Inputs/Outputs: Reads process args and returns the process exit code from the CLI dispatcher.
// Invariants: Main must not bypass centralized argument/error handling in `cli`.
// Gotchas: Keep behavior aligned with the depsight-gate wrapper.

fn main() {
    let code = depsight::cli::run_cli(std::env::args_os());
    std::process::exit(code);
}
