//! Envelope carried inside every frame.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// What an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// A call to a service hosted by the peer.
    Request,
    /// Successful result of an earlier request.
    Response,
    /// Failure of an earlier request; the payload is a [`crate::RemoteError`].
    Error,
}

/// Wire envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// What this envelope carries.
    pub kind: EnvelopeKind,
    /// Request id this envelope belongs to.
    pub correlation_id: u64,
    /// Target service.
    pub service_id: String,
    /// Target method.
    pub method_id: String,
    /// Codec-encoded arguments, result or error.
    pub payload: Bytes,
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(
        correlation_id: u64,
        service_id: impl Into<String>,
        method_id: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Request,
            correlation_id,
            service_id: service_id.into(),
            method_id: method_id.into(),
            payload,
        }
    }

    /// Build the response to `self` carrying `payload`.
    #[must_use]
    pub fn reply(&self, kind: EnvelopeKind, payload: Bytes) -> Self {
        Self {
            kind,
            correlation_id: self.correlation_id,
            service_id: self.service_id.clone(),
            method_id: self.method_id.clone(),
            payload,
        }
    }
}
