//! Proxy-stub client: correlates outgoing calls with their responses and
//! dispatches inbound requests to local services.

use crate::codec::Codec;
use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::{Error, ProtocolError, RemoteError, Result};
use crate::layer::{Deliver, Transmit};
use crate::pending::PendingCalls;
use crate::pool::WorkerPool;
use crate::proxy::{RemoteInterface, ServiceProxy};
use crate::service::{Invocation, ServiceFactory};
use bytes::Bytes;
use futures::FutureExt;
use serde::{Serialize, de::DeserializeOwned};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, instrument, warn};

/// Top layer of a chain.
///
/// Acts as a client for calls issued through [`ServiceProxy`] and as a
/// server for requests arriving from the peer, on the same connection.
pub struct PsClient {
    lower: Box<dyn Transmit>,
    codec: Codec,
    timeout: Duration,
    pending: PendingCalls,
    services: Arc<dyn ServiceFactory>,
    workers: WorkerPool,
}

impl PsClient {
    /// Create a client on top of `lower`.
    ///
    /// Inbound requests run on `workers` against services resolved by
    /// `services`. Every outgoing call fails after `timeout`.
    pub fn new(
        lower: Box<dyn Transmit>,
        codec: Codec,
        timeout: Duration,
        services: Arc<dyn ServiceFactory>,
        workers: WorkerPool,
    ) -> Self {
        Self {
            lower,
            codec,
            timeout,
            pending: PendingCalls::new(),
            services,
            workers,
        }
    }

    /// Bind a typed proxy for the remote service `service_id`.
    ///
    /// # Errors
    ///
    /// Returns an argument error if `service_id` is empty.
    pub fn create_service<I: RemoteInterface>(self: &Arc<Self>, service_id: &str) -> Result<I> {
        if service_id.is_empty() {
            return Err(Error::Argument("service id must not be empty".to_string()));
        }
        Ok(I::bind(ServiceProxy::new(Arc::clone(self), service_id)))
    }

    /// Call `method` on the remote service `service_id` and wait for the
    /// decoded result.
    ///
    /// A timed-out call is abandoned locally; the peer is not notified and a
    /// late response is discarded.
    ///
    /// # Errors
    ///
    /// Fails with exactly one of: argument, serialization, timeout,
    /// disconnected, protocol or remote error.
    #[instrument(skip(self, args))]
    pub async fn call<A, R>(&self, service_id: &str, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        if service_id.is_empty() {
            return Err(Error::Argument("service id must not be empty".to_string()));
        }

        let payload = self.codec.encode(args)?;

        // Registered before the frame leaves so the response cannot race it.
        let mut call = self.pending.register()?;
        let request = Envelope::request(call.id(), service_id, method, payload);
        self.lower.send(self.codec.encode(&request)?)?;
        debug!("Sent request {}", call.id());

        let response = timeout(self.timeout, call.wait()).await.map_err(|_| {
            debug!("Request {} timed out", call.id());
            Error::Timeout(self.timeout)
        })??;

        match response.kind {
            EnvelopeKind::Response => self.codec.decode(&response.payload),
            EnvelopeKind::Error => {
                let remote: RemoteError = self.codec.decode(&response.payload)?;
                Err(Error::Remote(remote))
            }
            EnvelopeKind::Request => Err(ProtocolError::InvalidEnvelope(
                "request envelope completed a pending call".to_string(),
            )
            .into()),
        }
    }

    /// Number of calls waiting for a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Per-call deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Codec used for envelopes, arguments and results.
    #[must_use]
    pub const fn codec(&self) -> Codec {
        self.codec
    }

    /// Close the session underneath this client.
    pub fn close(&self) -> bool {
        self.lower.close()
    }

    /// Whether the session underneath has left the open state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lower.is_closed()
    }

    fn receive(self: &Arc<Self>, data: &[u8]) -> Result<()> {
        let envelope: Envelope = self
            .codec
            .decode(data)
            .map_err(|e| ProtocolError::InvalidEnvelope(e.to_string()))?;

        match envelope.kind {
            EnvelopeKind::Request => self.dispatch(envelope),
            EnvelopeKind::Response | EnvelopeKind::Error => {
                let id = envelope.correlation_id;
                if !self.pending.complete(id, Ok(envelope)) {
                    warn!("Dropping response for unknown request {}", id);
                }
            }
        }

        Ok(())
    }

    fn dispatch(self: &Arc<Self>, request: Envelope) {
        let rejected = request.clone();
        let client = Arc::clone(self);
        if let Err(e) = self.workers.post(async move { client.serve(request).await }) {
            warn!("Rejecting request {}: {}", rejected.correlation_id, e);
            self.respond(
                &rejected,
                Err(RemoteError::internal("server is shutting down")),
            );
        }
    }

    async fn serve(&self, mut request: Envelope) {
        debug!(
            "Handling request {} for {}.{}",
            request.correlation_id, request.service_id, request.method_id
        );

        let result = match self.services.create(&request.service_id) {
            Some(service) => {
                let call = Invocation::new(
                    request.service_id.clone(),
                    request.method_id.clone(),
                    std::mem::take(&mut request.payload),
                    self.codec,
                );
                AssertUnwindSafe(service.invoke(call))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(RemoteError::internal("service panicked")))
            }
            None => Err(RemoteError::service_not_found(&request.service_id)),
        };

        self.respond(&request, result);
    }

    fn respond(&self, request: &Envelope, result: std::result::Result<Bytes, RemoteError>) {
        let reply = match result {
            Ok(payload) => request.reply(EnvelopeKind::Response, payload),
            Err(remote) => {
                debug!("Request {} failed: {}", request.correlation_id, remote);
                match self.codec.encode(&remote) {
                    Ok(payload) => request.reply(EnvelopeKind::Error, payload),
                    Err(e) => {
                        error!("Failed to encode error reply: {}", e);
                        return;
                    }
                }
            }
        };

        let sent = self
            .codec
            .encode(&reply)
            .and_then(|bytes| self.lower.send(bytes));
        if let Err(e) = sent {
            debug!("Failed to send reply {}: {}", reply.correlation_id, e);
        }
    }

    fn disconnected(&self) {
        let failed = self.pending.fail_all();
        if failed > 0 {
            debug!("Failed {} pending calls on disconnect", failed);
        }
    }
}

impl Drop for PsClient {
    fn drop(&mut self) {
        self.lower.close();
    }
}

impl std::fmt::Debug for PsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PsClient")
            .field("codec", &self.codec)
            .field("timeout", &self.timeout)
            .field("pending_calls", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Upward callback feeding decoded frames into a [`PsClient`].
///
/// Holds a weak reference: the chain above owns the client, never the
/// session below.
pub struct ClientInbound {
    client: Weak<PsClient>,
}

impl ClientInbound {
    /// Deliver to `client`.
    #[must_use]
    pub fn new(client: &Arc<PsClient>) -> Self {
        Self {
            client: Arc::downgrade(client),
        }
    }
}

impl Deliver for ClientInbound {
    fn deliver(&mut self, data: Bytes) -> Result<()> {
        match self.client.upgrade() {
            Some(client) => client.receive(&data),
            None => Err(Error::Disconnected),
        }
    }

    fn closed(&mut self) {
        if let Some(client) = self.client.upgrade() {
            client.disconnected();
        }
    }
}
