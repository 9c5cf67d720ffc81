use clap::Parser;

fn main() {
    let cli = harvestctl::Cli::parse();
    harvestctl::init_tracing(cli.debug);
    if let Err(err) = harvestctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
