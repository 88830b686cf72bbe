use crate::codec::{Frame, FrameCodec, RawFrame};
use crate::frame::{ExceptionCode, Pdu, Role, function};
use crate::store::DataStore;
use futures::{SinkExt as _, StreamExt as _};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("could not bind a TCP listener on `{1}`")]
    Bind(#[source] std::io::Error, String),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub unit_id: u8,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 502,
            unit_id: 1,
            max_connections: 10,
        }
    }
}

/// Apply a request PDU to the store and compose the response PDU, or the
/// exception code the server must report instead.
pub fn execute(store: &DataStore, request: &Pdu) -> Result<Pdu, ExceptionCode> {
    let failed = |e: crate::store::StoreError| e.exception_code();
    match request {
        Pdu::ReadCoilsRequest { address, quantity } => store
            .read_coils(*address, *quantity)
            .map(|coils| Pdu::ReadCoilsResponse { coils })
            .map_err(failed),
        Pdu::ReadDiscreteInputsRequest { address, quantity } => store
            .read_discrete_inputs(*address, *quantity)
            .map(|inputs| Pdu::ReadDiscreteInputsResponse { inputs })
            .map_err(failed),
        Pdu::ReadHoldingRegistersRequest { address, quantity } => store
            .read_holding_registers(*address, *quantity)
            .map(|values| Pdu::ReadHoldingRegistersResponse { values })
            .map_err(failed),
        Pdu::ReadInputRegistersRequest { address, quantity } => store
            .read_input_registers(*address, *quantity)
            .map(|values| Pdu::ReadInputRegistersResponse { values })
            .map_err(failed),
        Pdu::WriteSingleCoilRequest { address, value } => store
            .write_coils(*address, &[*value])
            .map(|()| Pdu::WriteSingleCoilResponse { address: *address, value: *value })
            .map_err(failed),
        Pdu::WriteSingleRegisterRequest { address, value } => store
            .write_holding_registers(*address, &[*value])
            .map(|()| Pdu::WriteSingleRegisterResponse { address: *address, value: *value })
            .map_err(failed),
        Pdu::WriteMultipleCoilsRequest { address, coils } => store
            .write_coils(*address, coils)
            .map(|()| Pdu::WriteMultipleCoilsResponse {
                address: *address,
                quantity: coils.len() as u16,
            })
            .map_err(failed),
        Pdu::WriteMultipleRegistersRequest { address, values } => store
            .write_holding_registers(*address, values)
            .map(|()| Pdu::WriteMultipleRegistersResponse {
                address: *address,
                quantity: values.len() as u16,
            })
            .map_err(failed),
        // Anything else arriving as a request is not something a server
        // serves. Request-role decoding only ever produces the variants
        // above, so this covers hand-constructed PDUs from library users.
        _ => Err(ExceptionCode::IllegalFunction),
    }
}

/// Produce the single reply owed for one received frame, or `None` when the
/// frame addresses some other unit and must be ignored without an answer.
pub fn respond(store: &DataStore, unit_id: u8, request: &RawFrame) -> Option<Frame> {
    if request.header.unit_id != unit_id {
        trace!(
            message = "dropping a frame addressed to another unit",
            unit = request.header.unit_id,
            ours = unit_id,
        );
        return None;
    }
    let pdu = match request.decode_pdu(Role::Request) {
        Ok(frame) => match execute(store, &frame.pdu) {
            Ok(response) => response,
            Err(code) => Pdu::Exception {
                function: frame.pdu.function_code(),
                code: code.code(),
            },
        },
        Err(fault) => {
            debug!(message = "request PDU did not decode", error = %fault);
            // The MBAP length guarantees at least one PDU octet, so the
            // function code is available to echo even for malformed bodies.
            let function = request.pdu.first().copied().unwrap_or(0) & !function::EXCEPTION_BIT;
            Pdu::Exception { function, code: fault.exception_code().code() }
        }
    };
    Some(Frame {
        transaction_id: request.header.transaction_id,
        unit_id,
        pdu,
    })
}

/// The reference Modbus/TCP server: accepts up to `max_connections` clients
/// and serves each from a task of its own against the shared store.
pub struct Server {
    listener: TcpListener,
    store: Arc<DataStore>,
    unit_id: u8,
    max_connections: usize,
}

impl Server {
    pub async fn bind(config: &ServerConfig, store: Arc<DataStore>) -> Result<Server, ServerError> {
        let address = format!("{}:{}", config.bind, config.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| ServerError::Bind(e, address))?;
        info!(
            message = "listening",
            address = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            unit = config.unit_id,
        );
        Ok(Server {
            listener,
            store,
            unit_id: config.unit_id,
            max_connections: config.max_connections,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the shutdown channel flips, then drain: the listener stops
    /// accepting first, existing connections run to completion, and `run`
    /// returns once the last one is gone.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let active = Arc::new(AtomicUsize::new(0));
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(error) => {
                            warn!(message = "could not accept a connection", %error);
                            continue;
                        }
                    };
                    if active.load(Ordering::SeqCst) >= self.max_connections {
                        warn!(
                            message = "refusing connection over the limit",
                            %peer,
                            limit = self.max_connections,
                        );
                        drop(socket);
                        continue;
                    }
                    debug!(message = "accepted a connection", %peer);
                    active.fetch_add(1, Ordering::SeqCst);
                    let store = Arc::clone(&self.store);
                    let active = Arc::clone(&active);
                    let unit_id = self.unit_id;
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        serve_connection(socket, peer, &store, unit_id, shutdown).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        debug!(message = "connection closed", %peer);
                    });
                }
                _ = shutdown.changed() => {
                    info!(message = "shutdown requested, refusing new connections");
                    break;
                }
            }
        }
        drop(self.listener);
        while connections.join_next().await.is_some() {}
        info!(message = "all connections drained");
        Ok(())
    }
}

/// One accepted client: assemble frames, dispatch each against the store,
/// send replies back in arrival order. Any framing fault or transport error
/// is terminal for the connection; pending output is flushed before close.
async fn serve_connection(
    socket: TcpStream,
    peer: SocketAddr,
    store: &DataStore,
    unit_id: u8,
    mut shutdown: watch::Receiver<bool>,
) {
    let nodelay_result = socket.set_nodelay(true);
    trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
    let mut io = Framed::new(socket, FrameCodec {});
    loop {
        tokio::select! {
            frame = io.next() => match frame {
                None => break,
                Some(Err(error)) => {
                    // Covers header faults as well: once the length field is
                    // untrustworthy the transaction id is too, so there is no
                    // exception response to give, only the close.
                    debug!(message = "closing connection", %peer, %error);
                    break;
                }
                Some(Ok(request)) => {
                    let Some(reply) = respond(store, unit_id, &request) else {
                        continue;
                    };
                    if let Err(error) = io.send(&reply).await {
                        debug!(message = "could not write a reply", %peer, %error);
                        break;
                    }
                }
            },
            _ = shutdown.changed() => break,
        }
    }
    let _ = io.flush().await;
}

/// Resolves when the process receives SIGINT, or SIGTERM where that exists.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let term_signal = match signal(SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(error) => {
                warn!(message = "could not install a SIGTERM handler", %error);
                None
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = async {
                match term_signal {
                    Some(mut signal) => { signal.recv().await; }
                    None => std::future::pending().await,
                }
            } => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
