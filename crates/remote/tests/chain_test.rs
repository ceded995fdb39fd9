//! Integration tests for chains over TCP

use proven_remote::{
    Bytes, ChainConfig, ClientFactory, Codec, Error, Invocation, RemoteError, RemoteErrorCode,
    RemoteInterface, Result, ServerFactory, Service, ServiceProxy, ServiceRegistry,
    async_trait, create_service,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct CalculatorService;

#[async_trait]
impl Service for CalculatorService {
    async fn invoke(&self, call: Invocation) -> std::result::Result<Bytes, RemoteError> {
        match call.method() {
            "add" => {
                let (a, b): (i64, i64) = call.args()?;
                call.reply(&(a + b))
            }
            "div" => {
                let (a, b): (i64, i64) = call.args()?;
                if b == 0 {
                    return Err(RemoteError::new(
                        RemoteErrorCode::InvalidArguments,
                        "division by zero",
                    ));
                }
                call.reply(&(a / b))
            }
            "sleep" => {
                let millis: u64 = call.args()?;
                tokio::time::sleep(Duration::from_millis(millis)).await;
                call.reply(&millis)
            }
            other => Err(RemoteError::method_not_found(other)),
        }
    }
}

struct Calculator(ServiceProxy);

impl RemoteInterface for Calculator {
    fn bind(proxy: ServiceProxy) -> Self {
        Self(proxy)
    }
}

impl Calculator {
    async fn add(&self, a: i64, b: i64) -> Result<i64> {
        self.0.call("add", &(a, b)).await
    }

    async fn div(&self, a: i64, b: i64) -> Result<i64> {
        self.0.call("div", &(a, b)).await
    }

    async fn sleep(&self, millis: u64) -> Result<u64> {
        self.0.call("sleep", &millis).await
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn calculator_registry() -> ServiceRegistry {
    let registry = ServiceRegistry::new();
    registry.register("calculator", CalculatorService).unwrap();
    registry
}

async fn start_server(config: ChainConfig) -> (Arc<ServerFactory>, SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server =
        Arc::new(ServerFactory::with_config(config, Arc::new(calculator_registry())).unwrap());

    let handle = tokio::spawn({
        let server = Arc::clone(&server);
        async move {
            server.serve(listener).await.unwrap();
        }
    });

    (server, addr, handle)
}

fn client(config: ChainConfig) -> ClientFactory {
    ClientFactory::with_config(config, Arc::new(ServiceRegistry::new())).unwrap()
}

async fn wait_for_connections(server: &ServerFactory, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while server.connection_count() != count {
        assert!(Instant::now() < deadline, "expected {count} connections");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_calls_over_tcp() {
    init_logging();

    let (server, addr, _handle) = start_server(ChainConfig::default()).await;
    let client = client(ChainConfig::default());
    let chain = client.connect(addr).await.unwrap();
    assert_eq!(chain.peer_addr(), Some(addr));

    let calc: Calculator = create_service(Some(&chain), "calculator").unwrap();
    assert_eq!(calc.add(2, 3).await.unwrap(), 5);
    assert_eq!(calc.div(9, 3).await.unwrap(), 3);

    match calc.div(1, 0).await {
        Err(Error::Remote(e)) => {
            assert_eq!(e.code, RemoteErrorCode::InvalidArguments);
            assert_eq!(e.message, "division by zero");
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    // The chain keeps working after a remote failure.
    assert_eq!(calc.add(-1, 1).await.unwrap(), 0);
    wait_for_connections(&server, 1).await;

    chain.close();
    chain.closed().await;
    wait_for_connections(&server, 0).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_calls_on_one_chain() {
    init_logging();

    let (server, addr, _handle) = start_server(ChainConfig::default()).await;
    let client = client(ChainConfig::default());
    let chain = client.connect(addr).await.unwrap();
    let calc: Calculator = chain.create_service("calculator").unwrap();

    let calls = (0..64i64).map(|i| {
        let calc = &calc;
        async move { (i, calc.add(i, i).await) }
    });
    for (i, result) in futures::future::join_all(calls).await {
        assert_eq!(result.unwrap(), i * 2);
    }
    assert_eq!(chain.ps_client().pending_calls(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_server_calls_back_into_client() {
    init_logging();

    let (server, addr, _handle) = start_server(ChainConfig::default()).await;
    let client = ClientFactory::build(2, Duration::from_secs(5), Arc::new(calculator_registry()))
        .unwrap();
    let chain = client.connect(addr).await.unwrap();

    wait_for_connections(&server, 1).await;
    let server_chain = server.connections().remove(0);
    let from_server: Calculator = server_chain.create_service("calculator").unwrap();
    let from_client: Calculator = chain.create_service("calculator").unwrap();

    let (a, b) = tokio::join!(from_server.add(40, 2), from_client.add(1, 1));
    assert_eq!(a.unwrap(), 42);
    assert_eq!(b.unwrap(), 2);

    server.shutdown().await;
}

#[tokio::test]
async fn test_timeout_leaves_chain_usable() {
    init_logging();

    let (server, addr, _handle) = start_server(ChainConfig::default()).await;
    let timeout = Duration::from_millis(200);
    let client = client(ChainConfig::default().with_timeout(timeout));
    let chain = client.connect(addr).await.unwrap();
    let calc: Calculator = chain.create_service("calculator").unwrap();

    let started = Instant::now();
    let (slow, fast) = tokio::join!(calc.sleep(600), calc.add(1, 2));
    assert!(matches!(slow, Err(Error::Timeout(d)) if d == timeout));
    assert!(started.elapsed() >= timeout);
    assert_eq!(fast.unwrap(), 3);

    // Let the late response arrive and be discarded.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(chain.ps_client().pending_calls(), 0);
    assert_eq!(calc.add(2, 2).await.unwrap(), 4);

    server.shutdown().await;
}

#[tokio::test]
async fn test_server_shutdown_fails_pending_calls() {
    init_logging();

    let (server, addr, handle) = start_server(ChainConfig::default()).await;
    let client = client(ChainConfig::default());
    let chain = client.connect(addr).await.unwrap();
    let calc = Arc::new(chain.create_service::<Calculator>("calculator").unwrap());

    let calls: Vec<_> = (0..4)
        .map(|_| {
            let calc = Arc::clone(&calc);
            tokio::spawn(async move { calc.sleep(1_000).await })
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(2);
    while chain.ps_client().pending_calls() < 4 {
        assert!(Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let shutdown = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.shutdown().await }
    });

    for call in calls {
        assert!(matches!(call.await.unwrap(), Err(Error::Disconnected)));
    }
    chain.closed().await;
    assert!(chain.is_closed());
    assert!(matches!(calc.add(1, 1).await, Err(Error::Disconnected)));

    shutdown.await.unwrap();
    handle.await.unwrap();
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_remote_dispatch_failures() {
    init_logging();

    let (server, addr, _handle) = start_server(ChainConfig::default()).await;
    let client = client(ChainConfig::default());
    let chain = client.connect(addr).await.unwrap();

    let missing: ServiceProxy = chain.create_service("missing").unwrap();
    let result: Result<i64> = missing.call("add", &(1, 2)).await;
    assert!(matches!(result, Err(Error::Remote(e)) if e.code == RemoteErrorCode::ServiceNotFound));

    let calc: ServiceProxy = chain.create_service("calculator").unwrap();
    let result: Result<i64> = calc.call("add", "not numbers").await;
    assert!(matches!(result, Err(Error::Remote(e)) if e.code == RemoteErrorCode::InvalidArguments));

    let result: Result<i64> = calc.call("mul", &(1, 2)).await;
    assert!(matches!(result, Err(Error::Remote(e)) if e.code == RemoteErrorCode::MethodNotFound));

    server.shutdown().await;
}

#[tokio::test]
async fn test_empty_service_id_rejected() {
    init_logging();

    let (server, addr, _handle) = start_server(ChainConfig::default()).await;
    let client = client(ChainConfig::default());
    let chain = client.connect(addr).await.unwrap();

    assert!(matches!(
        create_service::<Calculator>(Some(&chain), ""),
        Err(Error::Argument(_))
    ));
    assert!(matches!(
        create_service::<Calculator>(None, "calculator"),
        Err(Error::Argument(_))
    ));

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_frame_closes_chain() {
    init_logging();

    let (server, addr, _handle) =
        start_server(ChainConfig::default().with_max_frame_size(256)).await;
    let client = client(ChainConfig::default());
    let chain = client.connect(addr).await.unwrap();
    let calc: ServiceProxy = chain.create_service("calculator").unwrap();

    let big = "x".repeat(4096);
    let result: Result<i64> = calc.call("add", &big).await;
    assert!(matches!(result, Err(Error::Disconnected)));
    chain.closed().await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_json_codec_end_to_end() {
    init_logging();

    let config = ChainConfig::default().with_codec(Codec::Json);
    let (server, addr, _handle) = start_server(config.clone()).await;
    let client = client(config);
    let chain = client.connect(addr).await.unwrap();
    let calc: Calculator = chain.create_service("calculator").unwrap();

    assert_eq!(calc.add(20, 22).await.unwrap(), 42);

    server.shutdown().await;
}

#[tokio::test]
async fn test_undecodable_envelope_closes_chain() {
    init_logging();

    let client = client(ChainConfig::default());
    let (near, mut far) = tokio::io::duplex(4096);
    let chain = client.attach(near);
    let calc: Calculator = chain.create_service("calculator").unwrap();

    let call = tokio::spawn(async move { calc.add(1, 2).await });

    // Read the request frame, then answer with a well-formed frame whose
    // payload is not an envelope.
    let len = far.read_u32().await.unwrap();
    let mut request = vec![0u8; len as usize];
    far.read_exact(&mut request).await.unwrap();
    far.write_all(&[0x00, 0x00, 0x00, 0x02, 0xFF, 0x00])
        .await
        .unwrap();

    assert!(matches!(call.await.unwrap(), Err(Error::Disconnected)));
    chain.closed().await;
    assert!(chain.is_closed());
    assert_eq!(chain.ps_client().pending_calls(), 0);
}
