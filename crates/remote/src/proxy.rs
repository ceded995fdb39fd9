//! Typed handles to remote services.

use crate::chain::Chain;
use crate::client::PsClient;
use crate::error::{Error, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;

/// A remote service bound to the client of one chain.
///
/// Keeps the client alive; the chain stays usable for as long as a proxy
/// exists.
#[derive(Clone)]
pub struct ServiceProxy {
    client: Arc<PsClient>,
    service_id: Arc<str>,
}

impl ServiceProxy {
    pub(crate) fn new(client: Arc<PsClient>, service_id: &str) -> Self {
        Self {
            client,
            service_id: Arc::from(service_id),
        }
    }

    /// Id of the remote service.
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Client the proxy issues calls through.
    #[must_use]
    pub const fn client(&self) -> &Arc<PsClient> {
        &self.client
    }

    /// Call `method` with `args` and decode the result.
    ///
    /// # Errors
    ///
    /// See [`PsClient::call`].
    pub async fn call<A, R>(&self, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        self.client.call(&self.service_id, method, args).await
    }
}

impl std::fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("service_id", &self.service_id)
            .finish_non_exhaustive()
    }
}

/// A typed interface implemented on top of a [`ServiceProxy`].
///
/// ```
/// use proven_remote::{RemoteInterface, Result, ServiceProxy};
///
/// struct Calculator(ServiceProxy);
///
/// impl RemoteInterface for Calculator {
///     fn bind(proxy: ServiceProxy) -> Self {
///         Self(proxy)
///     }
/// }
///
/// impl Calculator {
///     async fn add(&self, a: i64, b: i64) -> Result<i64> {
///         self.0.call("add", &(a, b)).await
///     }
/// }
/// ```
pub trait RemoteInterface: Sized {
    /// Wrap `proxy` in the typed interface.
    fn bind(proxy: ServiceProxy) -> Self;
}

impl RemoteInterface for ServiceProxy {
    fn bind(proxy: ServiceProxy) -> Self {
        proxy
    }
}

/// Resolve a typed proxy for `service_id` on `chain`.
///
/// # Errors
///
/// Returns an argument error if `chain` is `None` or `service_id` is empty.
pub fn create_service<I: RemoteInterface>(chain: Option<&Chain>, service_id: &str) -> Result<I> {
    let chain = chain.ok_or_else(|| Error::Argument("chain handle is missing".to_string()))?;
    chain.ps_client().create_service(service_id)
}
