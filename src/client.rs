use crate::codec::{CodecError, Frame, FrameCodec};
use crate::frame::{ExceptionCode, FrameError, Pdu, Role};
use futures::{SinkExt as _, StreamExt as _};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt as _;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::time::delay_queue::{DelayQueue, Key};
use tracing::{debug, trace};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("the connection worker is no longer running")]
    ScheduleRequest,
    #[error("could not read data from the stream")]
    Receive(#[source] std::io::Error),
    #[error("response is not a well-formed Modbus frame")]
    Protocol(#[source] FrameError),
    #[error("could not send out the request")]
    Send(#[source] CodecError),
    #[error("could not shut down the connection")]
    Shutdown(#[source] std::io::Error),
    #[error("the server closed the connection")]
    ConnectionClosed,
    #[error("the server did not respond before the deadline")]
    Timeout,
    #[error("server responded with {}", ExceptionCode::describe(*.code))]
    Exception { function: u8, code: u8 },
    #[error("the response does not answer the request that was sent")]
    ResponseMismatch,
    #[error("the connection worker crashed")]
    WorkerPanic(#[source] tokio::task::JoinError),
}

/// Why a waiter was released without a response.
#[derive(Debug, Clone)]
enum SessionFault {
    Protocol(FrameError),
    Transport(std::io::ErrorKind),
    Closed,
}

impl SessionFault {
    fn into_error(self) -> ClientError {
        match self {
            SessionFault::Protocol(fault) => ClientError::Protocol(fault),
            SessionFault::Transport(kind) => ClientError::Receive(kind.into()),
            SessionFault::Closed => ClientError::ConnectionClosed,
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Response(Frame),
    TimedOut,
    Failed(SessionFault),
}

/// Rendezvous between the I/O worker and callers blocked in
/// [`Client::request`]. Holds are table-update-only, never across I/O.
#[derive(Default)]
struct ResponseTracker {
    outcomes: Mutex<BTreeMap<u16, Outcome>>,
    change_notify: Notify,
}

impl ResponseTracker {
    fn resolve(&self, transaction_id: u16, outcome: Outcome) {
        let mut guard = self.outcomes.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(transaction_id, outcome);
        self.change_notify.notify_waiters();
        drop(guard);
    }

    async fn wait_for(&self, transaction_id: u16) -> Outcome {
        loop {
            let notified = self.change_notify.notified();
            tokio::pin!(notified);
            // Register for wakeups before checking, so a resolution landing
            // between the check and the await cannot be missed.
            notified.as_mut().enable();
            {
                let mut guard = self.outcomes.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(outcome) = guard.remove(&transaction_id) {
                    return outcome;
                }
            }
            notified.await;
        }
    }
}

/// Monotonic transaction identifiers; zero is skipped on wraparound so the
/// id of a live request is never ambiguous with an unset field.
struct TransactionIds(AtomicU16);

impl TransactionIds {
    fn new() -> Self {
        Self(AtomicU16::new(1))
    }

    fn next(&self) -> u16 {
        loop {
            let id = self.0.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port` of the server; resolved at connect time.
    pub address: String,
    pub unit_id: u8,
    /// How long each request may wait for its response.
    pub timeout: Duration,
}

struct Job {
    frame: Frame,
    deadline: Instant,
}

/// One persistent Modbus/TCP session.
///
/// Callers may share the client across tasks; requests are serialized onto
/// the wire in submission order while responses release their callers
/// independently, correlated by transaction id.
pub struct Client {
    request_queue: mpsc::UnboundedSender<Job>,
    worker: tokio::task::JoinHandle<Result<(), ClientError>>,
    response_tracker: Arc<ResponseTracker>,
    transaction_ids: TransactionIds,
    unit_id: u8,
    timeout: Duration,
}

impl Client {
    pub async fn connect(config: Config) -> Result<Client, ClientError> {
        let addresses = tokio::net::lookup_host(&config.address)
            .await
            .map_err(|e| ClientError::LookupHost(e, config.address.clone()))?
            .collect::<Vec<_>>();
        trace!(message = "resolved", ?addresses);
        let socket = TcpStream::connect(&*addresses)
            .await
            .map_err(|e| ClientError::Connect(e, config.address.clone()))?;
        let nodelay_result = socket.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        let (request_queue, jobs) = mpsc::unbounded_channel();
        let response_tracker = Arc::<ResponseTracker>::default();
        let worker = tokio::task::spawn(io_worker(
            socket,
            jobs,
            Arc::clone(&response_tracker),
            config.unit_id,
        ));
        Ok(Client {
            request_queue,
            worker,
            response_tracker,
            transaction_ids: TransactionIds::new(),
            unit_id: config.unit_id,
            timeout: config.timeout,
        })
    }

    /// Send one request PDU and await its counterpart. Exception responses
    /// surface as [`ClientError::Exception`]; a timeout releases the caller
    /// without affecting other outstanding requests or the session itself.
    pub async fn request(&self, pdu: Pdu) -> Result<Pdu, ClientError> {
        let transaction_id = self.transaction_ids.next();
        let frame = Frame { transaction_id, unit_id: self.unit_id, pdu };
        let deadline = Instant::now() + self.timeout;
        self.request_queue
            .send(Job { frame, deadline })
            .map_err(|_| ClientError::ScheduleRequest)?;
        match self.response_tracker.wait_for(transaction_id).await {
            Outcome::Response(frame) => match frame.pdu {
                Pdu::Exception { function, code } => Err(ClientError::Exception { function, code }),
                pdu => Ok(pdu),
            },
            Outcome::TimedOut => Err(ClientError::Timeout),
            Outcome::Failed(fault) => Err(fault.into_error()),
        }
    }

    pub async fn read_coils(&self, address: u16, quantity: u16) -> Result<Vec<bool>, ClientError> {
        match self.request(Pdu::ReadCoilsRequest { address, quantity }).await? {
            Pdu::ReadCoilsResponse { mut coils } if coils.len() >= quantity.into() => {
                // The wire pads to whole octets; the caller asked for bits.
                coils.truncate(quantity.into());
                Ok(coils)
            }
            _ => Err(ClientError::ResponseMismatch),
        }
    }

    pub async fn read_discrete_inputs(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, ClientError> {
        match self.request(Pdu::ReadDiscreteInputsRequest { address, quantity }).await? {
            Pdu::ReadDiscreteInputsResponse { mut inputs } if inputs.len() >= quantity.into() => {
                inputs.truncate(quantity.into());
                Ok(inputs)
            }
            _ => Err(ClientError::ResponseMismatch),
        }
    }

    pub async fn read_holding_registers(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ClientError> {
        match self.request(Pdu::ReadHoldingRegistersRequest { address, quantity }).await? {
            Pdu::ReadHoldingRegistersResponse { values } if values.len() == usize::from(quantity) => {
                Ok(values)
            }
            _ => Err(ClientError::ResponseMismatch),
        }
    }

    pub async fn read_input_registers(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ClientError> {
        match self.request(Pdu::ReadInputRegistersRequest { address, quantity }).await? {
            Pdu::ReadInputRegistersResponse { values } if values.len() == usize::from(quantity) => {
                Ok(values)
            }
            _ => Err(ClientError::ResponseMismatch),
        }
    }

    pub async fn write_single_coil(&self, address: u16, value: bool) -> Result<(), ClientError> {
        match self.request(Pdu::WriteSingleCoilRequest { address, value }).await? {
            Pdu::WriteSingleCoilResponse { address: a, value: v } if a == address && v == value => {
                Ok(())
            }
            _ => Err(ClientError::ResponseMismatch),
        }
    }

    pub async fn write_single_register(
        &self,
        address: u16,
        value: u16,
    ) -> Result<(), ClientError> {
        match self.request(Pdu::WriteSingleRegisterRequest { address, value }).await? {
            Pdu::WriteSingleRegisterResponse { address: a, value: v }
                if a == address && v == value =>
            {
                Ok(())
            }
            _ => Err(ClientError::ResponseMismatch),
        }
    }

    pub async fn write_multiple_coils(
        &self,
        address: u16,
        coils: Vec<bool>,
    ) -> Result<(), ClientError> {
        let quantity = coils.len() as u16;
        match self.request(Pdu::WriteMultipleCoilsRequest { address, coils }).await? {
            Pdu::WriteMultipleCoilsResponse { address: a, quantity: q }
                if a == address && q == quantity =>
            {
                Ok(())
            }
            _ => Err(ClientError::ResponseMismatch),
        }
    }

    pub async fn write_multiple_registers(
        &self,
        address: u16,
        values: Vec<u16>,
    ) -> Result<(), ClientError> {
        let quantity = values.len() as u16;
        match self.request(Pdu::WriteMultipleRegistersRequest { address, values }).await? {
            Pdu::WriteMultipleRegistersResponse { address: a, quantity: q }
                if a == address && q == quantity =>
            {
                Ok(())
            }
            _ => Err(ClientError::ResponseMismatch),
        }
    }

    /// Stop accepting new requests, let the in-flight ones resolve, and wait
    /// for the worker to wind the socket down.
    pub async fn close(self) -> Result<(), ClientError> {
        drop(self.request_queue);
        match self.worker.await {
            Ok(result) => result,
            Err(error) => Err(ClientError::WorkerPanic(error)),
        }
    }
}

async fn io_worker(
    socket: TcpStream,
    mut jobs: UnboundedReceiver<Job>,
    responses: Arc<ResponseTracker>,
    unit_id: u8,
) -> Result<(), ClientError> {
    let mut io = Framed::new(socket, FrameCodec {});
    let mut inflight_keys: BTreeMap<u16, Key> = BTreeMap::new();
    let mut inflight = DelayQueue::new();
    let mut draining = false;
    loop {
        if draining && inflight.is_empty() {
            return Ok(());
        }
        tokio::select! {
            biased;
            frame = io.next() => match frame {
                None => {
                    abort_session(&mut jobs, &responses, &mut inflight_keys, &mut inflight, SessionFault::Closed);
                    return if draining { Ok(()) } else { Err(ClientError::ConnectionClosed) };
                }
                Some(Err(error)) => {
                    let (fault, error) = match error {
                        CodecError::Io(e) => {
                            (SessionFault::Transport(e.kind()), ClientError::Receive(e))
                        }
                        // A header fault desynchronizes the stream for good.
                        CodecError::Frame(e) => (SessionFault::Protocol(e), ClientError::Protocol(e)),
                    };
                    abort_session(&mut jobs, &responses, &mut inflight_keys, &mut inflight, fault);
                    return Err(error);
                }
                Some(Ok(raw)) => {
                    if raw.header.unit_id != unit_id {
                        debug!(
                            message = "dropping a response for another unit",
                            unit = raw.header.unit_id,
                        );
                        continue;
                    }
                    let Some(key) = inflight_keys.remove(&raw.header.transaction_id) else {
                        debug!(
                            message = "decoded a response we were not expecting",
                            transaction = raw.header.transaction_id,
                        );
                        continue;
                    };
                    inflight.try_remove(&key);
                    match raw.decode_pdu(Role::Response) {
                        Ok(frame) => {
                            trace!(message = "decoded a response", transaction = frame.transaction_id);
                            responses.resolve(frame.transaction_id, Outcome::Response(frame));
                        }
                        Err(fault) => {
                            // The frame was well delimited, so the stream is
                            // still in sync; only this request is lost.
                            debug!(message = "malformed response PDU", error = %fault);
                            responses.resolve(
                                raw.header.transaction_id,
                                Outcome::Failed(SessionFault::Protocol(fault)),
                            );
                        }
                    }
                }
            },

            Some(expired) = inflight.next() => {
                let transaction_id: u16 = expired.into_inner();
                inflight_keys.remove(&transaction_id);
                debug!(message = "an inflight request timed out", transaction_id);
                responses.resolve(transaction_id, Outcome::TimedOut);
            }

            job = jobs.recv(), if !draining => match job {
                None => {
                    draining = true;
                    if let Err(error) = io.get_mut().shutdown().await {
                        abort_session(
                            &mut jobs,
                            &responses,
                            &mut inflight_keys,
                            &mut inflight,
                            SessionFault::Transport(error.kind()),
                        );
                        return Err(ClientError::Shutdown(error));
                    }
                }
                Some(job) => {
                    let transaction_id = job.frame.transaction_id;
                    let key = inflight.insert_at(transaction_id, job.deadline);
                    if let Some(previous) = inflight_keys.insert(transaction_id, key) {
                        // 65535 outstanding requests later the counter laps
                        // itself; the older waiter loses.
                        inflight.try_remove(&previous);
                    }
                    if let Err(error) = io.send(&job.frame).await {
                        let fault = match &error {
                            CodecError::Io(e) => SessionFault::Transport(e.kind()),
                            CodecError::Frame(e) => SessionFault::Protocol(*e),
                        };
                        abort_session(&mut jobs, &responses, &mut inflight_keys, &mut inflight, fault);
                        return Err(ClientError::Send(error));
                    }
                }
            },
        }
    }
}

/// Release every caller this worker will never be able to answer: the ones
/// with requests on the wire, and the ones whose jobs are still queued. The
/// queue is closed first so a send racing this teardown either fails at the
/// caller or lands in the drained backlog.
fn abort_session(
    jobs: &mut UnboundedReceiver<Job>,
    responses: &ResponseTracker,
    inflight_keys: &mut BTreeMap<u16, Key>,
    inflight: &mut DelayQueue<u16>,
    fault: SessionFault,
) {
    jobs.close();
    while let Ok(job) = jobs.try_recv() {
        responses.resolve(job.frame.transaction_id, Outcome::Failed(fault.clone()));
    }
    for (transaction_id, _) in std::mem::take(inflight_keys) {
        responses.resolve(transaction_id, Outcome::Failed(fault.clone()));
    }
    inflight.clear();
}
