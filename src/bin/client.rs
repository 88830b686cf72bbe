use clap::Parser as _;
use mbap_tools::{client, commands};
use std::error::Error;

/// Request/response Modbus/TCP client.
#[derive(clap::Parser)]
#[clap(version, about, author)]
struct Args {
    /// Host name or address of the server.
    host: String,
    /// Port the server listens on.
    #[arg(long, short = 'p', default_value_t = 502)]
    port: u16,
    /// Unit identifier to address requests to.
    #[arg(long, short = 'u', default_value_t = 1)]
    unit_id: u8,
    /// Give up on a request when the response takes longer than this.
    #[arg(long, short = 't', default_value = "5s")]
    timeout: humantime::Duration,
    /// Log progress of operations at the debug level.
    #[arg(long, short = 'v')]
    verbose: bool,
    /// Log everything, including frame dumps.
    #[arg(long)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Read a span of coils.
    ReadCoils(commands::read_coils::Args),
    /// Read a span of discrete inputs.
    ReadDiscrete(commands::read_discrete::Args),
    /// Read a span of holding registers.
    ReadHolding(commands::read_holding::Args),
    /// Read a span of input registers.
    ReadInput(commands::read_input::Args),
    /// Set or clear a single coil.
    WriteCoil(commands::write_coil::Args),
    /// Write a single holding register.
    WriteRegister(commands::write_register::Args),
    /// Write a span of coils in one transaction.
    WriteCoils(commands::write_coils::Args),
    /// Write a span of holding registers in one transaction.
    WriteRegisters(commands::write_registers::Args),
}

fn main() {
    let args = Args::parse();
    mbap_tools::logging::init(args.verbose, args.debug);
    let session = client::Config {
        address: format!("{}:{}", args.host, args.port),
        unit_id: args.unit_id,
        timeout: *args.timeout,
    };
    let result: Result<(), Box<dyn Error>> = match args.command {
        Command::ReadCoils(a) => commands::read_coils::run(session, a).map_err(Into::into),
        Command::ReadDiscrete(a) => commands::read_discrete::run(session, a).map_err(Into::into),
        Command::ReadHolding(a) => commands::read_holding::run(session, a).map_err(Into::into),
        Command::ReadInput(a) => commands::read_input::run(session, a).map_err(Into::into),
        Command::WriteCoil(a) => commands::write_coil::run(session, a).map_err(Into::into),
        Command::WriteRegister(a) => commands::write_register::run(session, a).map_err(Into::into),
        Command::WriteCoils(a) => commands::write_coils::run(session, a).map_err(Into::into),
        Command::WriteRegisters(a) => {
            commands::write_registers::run(session, a).map_err(Into::into)
        }
    };
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
