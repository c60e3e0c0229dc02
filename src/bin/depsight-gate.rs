// Purpose: Provide the depsight-gate pre-commit entrypoint around the shared CLI implementation.
// Inputs/Outputs: Forwards argv (gate flags only) to the CLI module and exits with its status code.
// Invariants: Wrapper must stay thin so all behavior remains centralized in cli/mod.rs.
// Gotchas: Any flag or exit-code change belongs in cli/mod.rs, not this shim.

fn main() {
    let code = depsight::cli::run_gate(std::env::args_os());
    std::process::exit(code);
}
