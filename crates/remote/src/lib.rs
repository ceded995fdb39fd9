//! Layered RPC over a single byte stream.
//!
//! Every connection is a chain of three layers built bottom-up:
//!
//! - **Session**: owns the socket and drives its reads and writes on one task
//! - **Framing**: splits the byte stream into length-prefixed messages
//! - **PS client**: correlates calls with responses and serves inbound
//!   requests from local services
//!
//! Both ends of a connection can call services hosted by the other end.
//! Chains are built by a [`ServerFactory`] for accepted connections and a
//! [`ClientFactory`] for outbound ones; typed proxies are resolved with
//! [`create_service`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use proven_remote::{ClientFactory, ServiceProxy, ServiceRegistry, create_service};
//!
//! async fn example() -> proven_remote::Result<()> {
//!     let factory = ClientFactory::build(
//!         2,
//!         Duration::from_secs(10),
//!         Arc::new(ServiceRegistry::new()),
//!     )?;
//!     let chain = factory.connect(([127, 0, 0, 1], 5555).into()).await?;
//!
//!     let calc: ServiceProxy = create_service(Some(&chain), "calculator")?;
//!     let sum: i64 = calc.call("add", &(2, 3)).await?;
//!     assert_eq!(sum, 5);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod chain;
pub mod client;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod framing;
pub mod layer;
pub mod pending;
pub mod pool;
pub mod proxy;
pub mod service;
pub mod session;

// Re-export commonly used types
pub use chain::{Chain, ClientFactory, ServerFactory};
pub use client::PsClient;
pub use codec::Codec;
pub use config::ChainConfig;
pub use error::{Error, ProtocolError, RemoteError, RemoteErrorCode, Result};
pub use proxy::{RemoteInterface, ServiceProxy, create_service};
pub use service::{Invocation, Service, ServiceFactory, ServiceRegistry};

// Re-export dependencies that are part of our public API
pub use async_trait::async_trait;
pub use bytes::Bytes;
