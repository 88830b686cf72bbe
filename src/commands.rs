pub mod serve {
    use crate::service::{Server, ServerConfig, wait_for_shutdown};
    use crate::store::{DataStore, StoreConfig};
    use std::sync::Arc;
    use tracing::info;

    /// Serve the in-memory register store to Modbus/TCP clients.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Port to listen on.
        #[arg(long, short = 'p', default_value_t = 502)]
        port: u16,
        /// Interface address to bind.
        #[arg(long, short = 'b', default_value = "0.0.0.0")]
        bind: String,
        /// Unit identifier this server answers to.
        #[arg(long, short = 'u', default_value_t = 1)]
        unit_id: u8,
        /// Refuse connections beyond this many concurrent clients.
        #[arg(long, short = 'c', default_value_t = 10)]
        max_connections: usize,
        /// Refuse protocol writes to the coil space.
        #[arg(long)]
        read_only_coils: bool,
        /// Refuse protocol writes to the holding register space.
        #[arg(long)]
        read_only_holding_registers: bool,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not create an asynchronous execution runtime")]
        CreateAsyncRuntime(#[source] std::io::Error),
        #[error("could not start the server")]
        Bind(#[source] crate::service::ServerError),
        #[error("serving failed")]
        Serve(#[source] crate::service::ServerError),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        // Frame dispatch is cheap; two workers are plenty to keep the
        // listener responsive while connections grind through the store.
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .max(2);
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .enable_all()
            .build()
            .map_err(Error::CreateAsyncRuntime)?;
        rt.block_on(async move {
            let store = Arc::new(DataStore::new(StoreConfig {
                read_only_coils: args.read_only_coils,
                read_only_holding_registers: args.read_only_holding_registers,
                ..StoreConfig::default()
            }));
            let config = ServerConfig {
                bind: args.bind,
                port: args.port,
                unit_id: args.unit_id,
                max_connections: args.max_connections,
            };
            let server = Server::bind(&config, store).await.map_err(Error::Bind)?;
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::task::spawn(async move {
                wait_for_shutdown().await;
                info!(message = "shutdown signal received");
                let _ = shutdown_tx.send(true);
            });
            server.run(shutdown_rx).await.map_err(Error::Serve)
        })
    }
}

pub mod read_coils {
    use crate::client::{Client, ClientError, Config};
    use crate::output;

    /// Read a span of coils and print their values.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Address of the first coil.
        address: u16,
        /// How many coils to read.
        count: u16,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not create an asynchronous execution runtime")]
        CreateAsyncRuntime(#[source] std::io::Error),
        #[error("could not establish a client session with the server")]
        EstablishClient(#[source] ClientError),
        #[error("communication with the server failed")]
        Communicate(#[source] ClientError),
        #[error(transparent)]
        CreateOutput(output::Error),
        #[error(transparent)]
        WriteOutput(output::Error),
        #[error(transparent)]
        CommitOutput(output::Error),
    }

    #[derive(serde::Serialize)]
    struct OutputSchema {
        address: u16,
        value: bool,
    }

    pub fn run(session: Config, args: Args) -> Result<(), Error> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::CreateAsyncRuntime)?;
        rt.block_on(async move {
            let mut output = args
                .output
                .into_output(&["Address", "Value"])
                .map_err(Error::CreateOutput)?;
            let client = Client::connect(session).await.map_err(Error::EstablishClient)?;
            let coils = client
                .read_coils(args.address, args.count)
                .await
                .map_err(Error::Communicate)?;
            client.close().await.map_err(Error::Communicate)?;
            for (offset, value) in coils.into_iter().enumerate() {
                let address = args.address + offset as u16;
                output
                    .result(
                        || vec![address.to_string(), u8::from(value).to_string()],
                        || OutputSchema { address, value },
                    )
                    .map_err(Error::WriteOutput)?;
            }
            output.commit().map_err(Error::CommitOutput)
        })
    }
}

pub mod read_holding {
    use crate::client::{Client, ClientError, Config};
    use crate::output;

    /// Read a span of holding registers and print their values.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Address of the first register.
        address: u16,
        /// How many registers to read.
        count: u16,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not create an asynchronous execution runtime")]
        CreateAsyncRuntime(#[source] std::io::Error),
        #[error("could not establish a client session with the server")]
        EstablishClient(#[source] ClientError),
        #[error("communication with the server failed")]
        Communicate(#[source] ClientError),
        #[error(transparent)]
        CreateOutput(output::Error),
        #[error(transparent)]
        WriteOutput(output::Error),
        #[error(transparent)]
        CommitOutput(output::Error),
    }

    #[derive(serde::Serialize)]
    struct OutputSchema {
        address: u16,
        value: u16,
    }

    pub fn run(session: Config, args: Args) -> Result<(), Error> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::CreateAsyncRuntime)?;
        rt.block_on(async move {
            let mut output = args
                .output
                .into_output(&["Address", "Value"])
                .map_err(Error::CreateOutput)?;
            let client = Client::connect(session).await.map_err(Error::EstablishClient)?;
            let values = client
                .read_holding_registers(args.address, args.count)
                .await
                .map_err(Error::Communicate)?;
            client.close().await.map_err(Error::Communicate)?;
            for (offset, value) in values.into_iter().enumerate() {
                let address = args.address + offset as u16;
                output
                    .result(
                        || vec![address.to_string(), value.to_string()],
                        || OutputSchema { address, value },
                    )
                    .map_err(Error::WriteOutput)?;
            }
            output.commit().map_err(Error::CommitOutput)
        })
    }
}

pub mod read_discrete {
    use crate::client::{Client, ClientError, Config};
    use crate::output;

    /// Read a span of discrete inputs and print their values.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Address of the first input.
        address: u16,
        /// How many inputs to read.
        count: u16,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not create an asynchronous execution runtime")]
        CreateAsyncRuntime(#[source] std::io::Error),
        #[error("could not establish a client session with the server")]
        EstablishClient(#[source] ClientError),
        #[error("communication with the server failed")]
        Communicate(#[source] ClientError),
        #[error(transparent)]
        CreateOutput(output::Error),
        #[error(transparent)]
        WriteOutput(output::Error),
        #[error(transparent)]
        CommitOutput(output::Error),
    }

    #[derive(serde::Serialize)]
    struct OutputSchema {
        address: u16,
        value: bool,
    }

    pub fn run(session: Config, args: Args) -> Result<(), Error> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::CreateAsyncRuntime)?;
        rt.block_on(async move {
            let mut output = args
                .output
                .into_output(&["Address", "Value"])
                .map_err(Error::CreateOutput)?;
            let client = Client::connect(session).await.map_err(Error::EstablishClient)?;
            let inputs = client
                .read_discrete_inputs(args.address, args.count)
                .await
                .map_err(Error::Communicate)?;
            client.close().await.map_err(Error::Communicate)?;
            for (offset, value) in inputs.into_iter().enumerate() {
                let address = args.address + offset as u16;
                output
                    .result(
                        || vec![address.to_string(), u8::from(value).to_string()],
                        || OutputSchema { address, value },
                    )
                    .map_err(Error::WriteOutput)?;
            }
            output.commit().map_err(Error::CommitOutput)
        })
    }
}

pub mod read_input {
    use crate::client::{Client, ClientError, Config};
    use crate::output;

    /// Read a span of input registers and print their values.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Address of the first register.
        address: u16,
        /// How many registers to read.
        count: u16,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not create an asynchronous execution runtime")]
        CreateAsyncRuntime(#[source] std::io::Error),
        #[error("could not establish a client session with the server")]
        EstablishClient(#[source] ClientError),
        #[error("communication with the server failed")]
        Communicate(#[source] ClientError),
        #[error(transparent)]
        CreateOutput(output::Error),
        #[error(transparent)]
        WriteOutput(output::Error),
        #[error(transparent)]
        CommitOutput(output::Error),
    }

    #[derive(serde::Serialize)]
    struct OutputSchema {
        address: u16,
        value: u16,
    }

    pub fn run(session: Config, args: Args) -> Result<(), Error> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::CreateAsyncRuntime)?;
        rt.block_on(async move {
            let mut output = args
                .output
                .into_output(&["Address", "Value"])
                .map_err(Error::CreateOutput)?;
            let client = Client::connect(session).await.map_err(Error::EstablishClient)?;
            let values = client
                .read_input_registers(args.address, args.count)
                .await
                .map_err(Error::Communicate)?;
            client.close().await.map_err(Error::Communicate)?;
            for (offset, value) in values.into_iter().enumerate() {
                let address = args.address + offset as u16;
                output
                    .result(
                        || vec![address.to_string(), value.to_string()],
                        || OutputSchema { address, value },
                    )
                    .map_err(Error::WriteOutput)?;
            }
            output.commit().map_err(Error::CommitOutput)
        })
    }
}

pub mod write_coil {
    use crate::client::{Client, ClientError, Config};

    /// Set or clear a single coil.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Address of the coil.
        address: u16,
        /// 1 to set the coil, 0 to clear it.
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        value: u8,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not create an asynchronous execution runtime")]
        CreateAsyncRuntime(#[source] std::io::Error),
        #[error("could not establish a client session with the server")]
        EstablishClient(#[source] ClientError),
        #[error("communication with the server failed")]
        Communicate(#[source] ClientError),
    }

    pub fn run(session: Config, args: Args) -> Result<(), Error> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::CreateAsyncRuntime)?;
        rt.block_on(async move {
            let client = Client::connect(session).await.map_err(Error::EstablishClient)?;
            client
                .write_single_coil(args.address, args.value != 0)
                .await
                .map_err(Error::Communicate)?;
            client.close().await.map_err(Error::Communicate)?;
            println!("coil {} set to {}", args.address, args.value);
            Ok(())
        })
    }
}

pub mod write_register {
    use crate::client::{Client, ClientError, Config};

    /// Write a single holding register.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Address of the register.
        address: u16,
        /// Value to store.
        value: u16,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not create an asynchronous execution runtime")]
        CreateAsyncRuntime(#[source] std::io::Error),
        #[error("could not establish a client session with the server")]
        EstablishClient(#[source] ClientError),
        #[error("communication with the server failed")]
        Communicate(#[source] ClientError),
    }

    pub fn run(session: Config, args: Args) -> Result<(), Error> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::CreateAsyncRuntime)?;
        rt.block_on(async move {
            let client = Client::connect(session).await.map_err(Error::EstablishClient)?;
            client
                .write_single_register(args.address, args.value)
                .await
                .map_err(Error::Communicate)?;
            client.close().await.map_err(Error::Communicate)?;
            println!("register {} set to {}", args.address, args.value);
            Ok(())
        })
    }
}

pub mod write_coils {
    use crate::client::{Client, ClientError, Config};

    /// Write a span of coils in one transaction.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Address of the first coil.
        address: u16,
        /// Coil states, one 0 or 1 per coil.
        #[arg(required = true, value_parser = clap::value_parser!(u8).range(0..=1))]
        values: Vec<u8>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not create an asynchronous execution runtime")]
        CreateAsyncRuntime(#[source] std::io::Error),
        #[error("could not establish a client session with the server")]
        EstablishClient(#[source] ClientError),
        #[error("communication with the server failed")]
        Communicate(#[source] ClientError),
    }

    pub fn run(session: Config, args: Args) -> Result<(), Error> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::CreateAsyncRuntime)?;
        rt.block_on(async move {
            let coils: Vec<bool> = args.values.iter().map(|v| *v != 0).collect();
            let count = coils.len();
            let client = Client::connect(session).await.map_err(Error::EstablishClient)?;
            client
                .write_multiple_coils(args.address, coils)
                .await
                .map_err(Error::Communicate)?;
            client.close().await.map_err(Error::Communicate)?;
            println!("{} coils written starting at {}", count, args.address);
            Ok(())
        })
    }
}

pub mod write_registers {
    use crate::client::{Client, ClientError, Config};

    /// Write a span of holding registers in one transaction.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Address of the first register.
        address: u16,
        /// Values to store, one per register.
        #[arg(required = true)]
        values: Vec<u16>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not create an asynchronous execution runtime")]
        CreateAsyncRuntime(#[source] std::io::Error),
        #[error("could not establish a client session with the server")]
        EstablishClient(#[source] ClientError),
        #[error("communication with the server failed")]
        Communicate(#[source] ClientError),
    }

    pub fn run(session: Config, args: Args) -> Result<(), Error> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::CreateAsyncRuntime)?;
        rt.block_on(async move {
            let count = args.values.len();
            let client = Client::connect(session).await.map_err(Error::EstablishClient)?;
            client
                .write_multiple_registers(args.address, args.values)
                .await
                .map_err(Error::Communicate)?;
            client.close().await.map_err(Error::Communicate)?;
            println!("{} registers written starting at {}", count, args.address);
            Ok(())
        })
    }
}
