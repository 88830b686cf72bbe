use clap::Parser as _;
use mbap_tools::commands;
use std::error::Error as _;

/// Multi-client Modbus/TCP server backed by an in-memory register store.
#[derive(clap::Parser)]
#[clap(version, about, author)]
struct Args {
    #[clap(flatten)]
    serve: commands::serve::Args,
    /// Log progress of operations at the debug level.
    #[arg(long, short = 'v')]
    verbose: bool,
    /// Log everything, including frame dumps.
    #[arg(long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();
    mbap_tools::logging::init(args.verbose, args.debug);
    let result = commands::serve::run(args.serve);
    std::process::exit(match result {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}
