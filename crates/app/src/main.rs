mod cli;
mod html;
mod viewer;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    viewer::telemetry::init_tracing();
    let args: Vec<String> = std::env::args().collect();
    if !cli::handle_commands(&args)? {
        cli::print_usage();
    }
    Ok(())
}
