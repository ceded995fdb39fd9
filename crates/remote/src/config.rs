//! Configuration shared by the server and client factories.

use crate::codec::Codec;
use crate::framing::FramingConfig;
use crate::session::SessionConfig;
use std::time::Duration;

/// Configuration for every chain a factory builds.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Number of workers dispatching inbound requests.
    pub thread_count: usize,
    /// Deadline for each outgoing call.
    pub timeout: Duration,
    /// Codec for envelopes and payloads. Both peers must agree.
    pub codec: Codec,
    /// Session settings.
    pub session: SessionConfig,
    /// Framing settings.
    pub framing: FramingConfig,
    /// Deadline for a single connect attempt.
    pub connect_timeout: Duration,
    /// Connect attempts before giving up.
    pub connect_retries: usize,
    /// Pause between connect attempts.
    pub retry_delay: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            thread_count: 4,
            timeout: Duration::from_secs(30),
            codec: Codec::default(),
            session: SessionConfig::default(),
            framing: FramingConfig::default(),
            connect_timeout: Duration::from_secs(5),
            connect_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl ChainConfig {
    /// Set the worker count.
    #[must_use]
    pub const fn with_thread_count(mut self, count: usize) -> Self {
        self.thread_count = count;
        self
    }

    /// Set the per-call deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the codec.
    #[must_use]
    pub const fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Reject inbound frames longer than `size` bytes.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.framing.max_frame_size = Some(size);
        self
    }

    /// Set the capacity reserved for each socket read.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.session.read_buffer_size = size;
        self
    }

    /// Set the connect deadline, attempt count and pause between attempts.
    #[must_use]
    pub const fn with_connect_retry(
        mut self,
        timeout: Duration,
        retries: usize,
        delay: Duration,
    ) -> Self {
        self.connect_timeout = timeout;
        self.connect_retries = retries;
        self.retry_delay = delay;
        self
    }
}
