mod cli;

fn main() {
    let matches = cli::cli();
    let code = cli::dispatch(&matches);
    std::process::exit(code);
}
