use mbap_tools::client::{Client, ClientError, Config};
use mbap_tools::service::{Server, ServerConfig, ServerError};
use mbap_tools::store::{DataStore, StoreConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct TestServer {
    address: SocketAddr,
    store: Arc<DataStore>,
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<Result<(), ServerError>>,
}

async fn start_server(
    store_config: StoreConfig,
    unit_id: u8,
    max_connections: usize,
) -> TestServer {
    let store = Arc::new(DataStore::new(store_config));
    let config = ServerConfig {
        bind: "127.0.0.1".to_string(),
        port: 0,
        unit_id,
        max_connections,
    };
    let server = Server::bind(&config, Arc::clone(&store)).await.unwrap();
    let address = server.local_addr().unwrap();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(server.run(shutdown_rx));
    TestServer { address, store, shutdown, handle }
}

fn session(address: SocketAddr) -> Config {
    Config {
        address: address.to_string(),
        unit_id: 1,
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn reads_observe_host_populated_state() {
    let server = start_server(StoreConfig::default(), 1, 10).await;
    server.store.load_holding_registers(0, &[100, 200, 300, 400, 500]).unwrap();
    server.store.load_input_registers(2, &[9]).unwrap();
    server.store.load_discrete_inputs(0, &[true, false, true]).unwrap();

    let client = Client::connect(session(server.address)).await.unwrap();
    assert_eq!(
        client.read_holding_registers(0, 5).await.unwrap(),
        vec![100, 200, 300, 400, 500],
    );
    assert_eq!(client.read_input_registers(2, 1).await.unwrap(), vec![9]);
    assert_eq!(
        client.read_discrete_inputs(0, 3).await.unwrap(),
        vec![true, false, true],
    );
    client.close().await.unwrap();
}

#[tokio::test]
async fn writes_are_readable_back_and_visible_in_the_store() {
    let server = start_server(StoreConfig::default(), 1, 10).await;
    let client = Client::connect(session(server.address)).await.unwrap();

    client.write_single_coil(0, true).await.unwrap();
    assert_eq!(client.read_coils(0, 1).await.unwrap(), vec![true]);

    client.write_single_register(7, 0xBEEF).await.unwrap();
    assert_eq!(client.read_holding_registers(7, 1).await.unwrap(), vec![0xBEEF]);

    let pattern = vec![true, false, true, true, false, false, true, true, true];
    client.write_multiple_coils(10, pattern.clone()).await.unwrap();
    assert_eq!(client.read_coils(10, 9).await.unwrap(), pattern);

    client.write_multiple_registers(100, vec![1, 2, 3]).await.unwrap();
    assert_eq!(client.read_holding_registers(100, 3).await.unwrap(), vec![1, 2, 3]);

    client.close().await.unwrap();
    assert_eq!(server.store.read_coils(0, 1).unwrap(), vec![true]);
    assert_eq!(server.store.read_holding_registers(7, 1).unwrap(), vec![0xBEEF]);
}

#[tokio::test]
async fn out_of_range_reads_surface_as_exceptions() {
    let server = start_server(
        StoreConfig { holding_registers: 10, ..StoreConfig::default() },
        1,
        10,
    )
    .await;
    let client = Client::connect(session(server.address)).await.unwrap();
    let result = client.read_holding_registers(8, 5).await;
    assert!(
        matches!(result, Err(ClientError::Exception { function: 0x03, code: 2 })),
        "unexpected outcome: {result:?}",
    );
    // The session survives an exception response.
    assert_eq!(client.read_holding_registers(0, 1).await.unwrap(), vec![0]);
    client.close().await.unwrap();
}

#[tokio::test]
async fn read_only_spaces_surface_illegal_function() {
    let server = start_server(
        StoreConfig { read_only_holding_registers: true, ..StoreConfig::default() },
        1,
        10,
    )
    .await;
    let client = Client::connect(session(server.address)).await.unwrap();
    let result = client.write_single_register(0, 1).await;
    assert!(
        matches!(result, Err(ClientError::Exception { function: 0x06, code: 1 })),
        "unexpected outcome: {result:?}",
    );
    client.close().await.unwrap();
}

#[tokio::test]
async fn requests_for_another_unit_go_unanswered() {
    let server = start_server(StoreConfig::default(), 1, 10).await;
    let client = Client::connect(Config {
        address: server.address.to_string(),
        unit_id: 7,
        timeout: Duration::from_millis(200),
    })
    .await
    .unwrap();
    let result = client.read_holding_registers(0, 1).await;
    assert!(matches!(result, Err(ClientError::Timeout)), "unexpected outcome: {result:?}");
}

#[tokio::test]
async fn timeouts_release_the_caller_and_spare_the_session() {
    // A listener that accepts and then stays silent forever.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let sink = tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        std::future::pending::<()>().await;
    });

    let client = Client::connect(Config {
        address: address.to_string(),
        unit_id: 1,
        timeout: Duration::from_millis(200),
    })
    .await
    .unwrap();
    let started = std::time::Instant::now();
    let result = client.read_coils(0, 1).await;
    assert!(matches!(result, Err(ClientError::Timeout)), "unexpected outcome: {result:?}");
    assert!(started.elapsed() >= Duration::from_millis(200));
    // A timed-out request does not poison the session for the next one.
    let result = client.read_holding_registers(0, 1).await;
    assert!(matches!(result, Err(ClientError::Timeout)), "unexpected outcome: {result:?}");
    sink.abort();
}

#[tokio::test]
async fn connections_over_the_limit_are_refused() {
    let server = start_server(StoreConfig::default(), 1, 1).await;
    let first = Client::connect(session(server.address)).await.unwrap();
    // Complete one exchange so the first connection is counted for sure.
    first.read_coils(0, 1).await.unwrap();

    let second = Client::connect(session(server.address)).await.unwrap();
    let result = second.read_coils(0, 1).await;
    assert!(result.is_err(), "server over the limit still answered");
    assert!(!matches!(result, Err(ClientError::Timeout)), "refusal should be prompt");

    // Once the first client leaves, a newcomer is welcome again.
    first.close().await.unwrap();
    let third = loop {
        let candidate = Client::connect(session(server.address)).await.unwrap();
        match candidate.read_coils(0, 1).await {
            Ok(_) => break candidate,
            // The slot frees asynchronously after close.
            Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    };
    third.close().await.unwrap();
}

#[tokio::test]
async fn concurrent_callers_share_one_session() {
    let server = start_server(StoreConfig::default(), 1, 10).await;
    server.store.load_holding_registers(0, &[11, 22, 33]).unwrap();
    server.store.load_coils(5, &[true]).unwrap();

    let client = Arc::new(Client::connect(session(server.address)).await.unwrap());
    let registers = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.read_holding_registers(0, 3).await })
    };
    let coils = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.read_coils(5, 1).await })
    };
    assert_eq!(registers.await.unwrap().unwrap(), vec![11, 22, 33]);
    assert_eq!(coils.await.unwrap().unwrap(), vec![true]);
}

#[tokio::test]
async fn shutdown_drains_connections_and_stops_accepting() {
    let server = start_server(StoreConfig::default(), 1, 10).await;
    let client = Client::connect(session(server.address)).await.unwrap();
    client.write_single_register(3, 7).await.unwrap();

    server.shutdown.send(true).unwrap();
    server.handle.await.unwrap().unwrap();
    assert_eq!(server.store.read_holding_registers(3, 1).unwrap(), vec![7]);
    assert!(tokio::net::TcpStream::connect(server.address).await.is_err());
}
