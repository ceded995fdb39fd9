//! Calculator served over TCP and called through a typed proxy.
//!
//! Run with `RUST_LOG=debug` to see the chain at work.

use proven_remote::{
    Bytes, ClientFactory, Invocation, RemoteError, RemoteInterface, Result, ServerFactory, Service,
    ServiceProxy, ServiceRegistry, async_trait, create_service,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// Server-side implementation.
struct CalculatorService;

#[async_trait]
impl Service for CalculatorService {
    async fn invoke(&self, call: Invocation) -> std::result::Result<Bytes, RemoteError> {
        match call.method() {
            "add" => {
                let (a, b): (i64, i64) = call.args()?;
                call.reply(&(a + b))
            }
            "mul" => {
                let (a, b): (i64, i64) = call.args()?;
                call.reply(&(a * b))
            }
            other => Err(RemoteError::method_not_found(other)),
        }
    }
}

/// Client-side typed interface.
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

    async fn mul(&self, a: i64, b: i64) -> Result<i64> {
        self.0.call("mul", &(a, b)).await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let registry = ServiceRegistry::new();
    registry.register("calculator", CalculatorService)?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = Arc::new(ServerFactory::build(
        4,
        Duration::from_secs(10),
        Arc::new(registry),
    )?);
    let serving = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve(listener).await }
    });

    let client = ClientFactory::build(1, Duration::from_secs(10), Arc::new(ServiceRegistry::new()))?;
    let chain = client.connect(addr).await?;
    let calc: Calculator = create_service(Some(&chain), "calculator")?;

    info!("2 + 3 = {}", calc.add(2, 3).await?);
    info!("6 * 7 = {}", calc.mul(6, 7).await?);

    match calc.0.call::<_, i64>("pow", &(2, 10)).await {
        Err(e) => info!("pow failed as expected: {}", e),
        Ok(value) => info!("pow unexpectedly returned {}", value),
    }

    chain.close();
    server.shutdown().await;
    client.stop().await;
    if let Ok(result) = serving.await {
        result?;
    }

    Ok(())
}
