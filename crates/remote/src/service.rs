//! Server-side dispatch: locally hosted services reachable by the peer.

use crate::codec::Codec;
use crate::error::{Error, RemoteError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;

/// An inbound call to a local service.
#[derive(Debug, Clone)]
pub struct Invocation {
    service_id: String,
    method: String,
    args: Bytes,
    codec: Codec,
}

impl Invocation {
    pub(crate) const fn new(service_id: String, method: String, args: Bytes, codec: Codec) -> Self {
        Self {
            service_id,
            method,
            args,
            codec,
        }
    }

    /// Service the call targets.
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Method the call targets.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Decode the call arguments.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the arguments do not decode as `T`;
    /// propagated with `?` this reaches the caller as `InvalidArguments`.
    pub fn args<T: DeserializeOwned>(&self) -> Result<T> {
        self.codec.decode(&self.args)
    }

    /// Encode a result value for the response.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` remote error if the value cannot be encoded; the
    /// caller's arguments were fine.
    pub fn reply<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> std::result::Result<Bytes, RemoteError> {
        self.codec
            .encode(value)
            .map_err(|e| RemoteError::internal(format!("failed to encode result: {e}")))
    }
}

/// A locally hosted service.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Handle one call and return the encoded result.
    async fn invoke(&self, call: Invocation) -> std::result::Result<Bytes, RemoteError>;
}

/// Resolves service ids to local implementations for inbound requests.
pub trait ServiceFactory: Send + Sync + 'static {
    /// Look up the service registered as `service_id`.
    fn create(&self, service_id: &str) -> Option<Arc<dyn Service>>;
}

/// Service factory backed by a concurrent map of registered instances.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<DashMap<String, Arc<dyn Service>>>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under `service_id`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns an argument error if `service_id` is empty.
    pub fn register<S: Service>(&self, service_id: impl Into<String>, service: S) -> Result<()> {
        let service_id = service_id.into();
        if service_id.is_empty() {
            return Err(Error::Argument("service id must not be empty".to_string()));
        }
        self.services.insert(service_id, Arc::new(service));
        Ok(())
    }

    /// Remove the service registered under `service_id`.
    pub fn unregister(&self, service_id: &str) -> bool {
        self.services.remove(service_id).is_some()
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl ServiceFactory for ServiceRegistry {
    fn create(&self, service_id: &str) -> Option<Arc<dyn Service>> {
        self.services
            .get(service_id)
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        f.debug_struct("ServiceRegistry")
            .field("services", &ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteErrorCode;

    struct Echo;

    #[async_trait]
    impl Service for Echo {
        async fn invoke(&self, call: Invocation) -> std::result::Result<Bytes, RemoteError> {
            match call.method() {
                "echo" => {
                    let text: String = call.args()?;
                    call.reply(&text)
                }
                other => Err(RemoteError::method_not_found(other)),
            }
        }
    }

    fn invocation(method: &str, args: Bytes) -> Invocation {
        Invocation::new("echo".to_string(), method.to_string(), args, Codec::Cbor)
    }

    #[tokio::test]
    async fn test_registry_lookup_and_invoke() {
        let registry = ServiceRegistry::new();
        registry.register("echo", Echo).unwrap();

        let service = registry.create("echo").unwrap();
        let args = Codec::Cbor.encode("hi").unwrap();
        let result = service.invoke(invocation("echo", args)).await.unwrap();
        assert_eq!(Codec::Cbor.decode::<String>(&result).unwrap(), "hi");

        assert!(registry.create("missing").is_none());
    }

    #[tokio::test]
    async fn test_bad_arguments_map_to_invalid_arguments() {
        let service = Echo;
        let args = Codec::Cbor.encode(&42u32).unwrap();
        let err = service.invoke(invocation("echo", args)).await.unwrap_err();
        assert_eq!(err.code, RemoteErrorCode::InvalidArguments);
    }

    #[test]
    fn test_unencodable_result_is_internal() {
        let call = Invocation::new(
            "echo".to_string(),
            "echo".to_string(),
            Bytes::new(),
            Codec::Json,
        );
        // JSON object keys must be strings.
        let value = std::collections::HashMap::from([((1u8, 2u8), 3u8)]);

        let err = call.reply(&value).unwrap_err();
        assert_eq!(err.code, RemoteErrorCode::Internal);
    }

    #[test]
    fn test_register_rejects_empty_id() {
        let registry = ServiceRegistry::new();
        assert!(matches!(registry.register("", Echo), Err(Error::Argument(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister() {
        let registry = ServiceRegistry::new();
        registry.register("echo", Echo).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister("echo"));
        assert!(!registry.unregister("echo"));
    }
}
