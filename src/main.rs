use std::process;

fn main() {
    process::exit(taskgraph::cli::run());
}
