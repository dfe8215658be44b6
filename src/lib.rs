//! A minimal Rust client core for partitioned service clusters.
//!
//! This crate implements the client-side control-plane machinery that sits
//! between an application and a cluster gateway:
//!
//! - a two-level LRU **resolution cache** mapping service names to
//!   partitioned service descriptors and per-partition resolved locations,
//!   with single-flight fetch and version-ordered invalidation
//!   ([`cache`]),
//! - a **service-address notification** client that synchronizes missed
//!   deletion notifications after reconnect and fans updates out to
//!   per-registration callbacks ([`notification`]),
//! - a chunked, flow-controlled **file transfer** engine with per-chunk
//!   retry, protocol downgrade and a commit handshake ([`file_transfer`]),
//! - a transactional **reliable concurrent queue** state provider built on
//!   an ordered key store plus a lock-free segmented ring queue ([`rcq`]).
//!
//! The wire transport and the replicated transaction manager are external
//! collaborators; the crate talks to them through the [`transport::Gateway`]
//! trait and the [`rcq`] apply entry points.
//!
//! # Example
//!
//! ```no_run
//! # async fn test(gateway: std::sync::Arc<dyn rfabric::transport::Gateway>) {
//! use rfabric::client::ClientBuilder;
//! use rfabric::types::PartitionKey;
//! use std::time::Duration;
//!
//! let client = ClientBuilder::new(gateway).client_id("example").build();
//!
//! let rsp = client
//!     .resolution_cache()
//!     .resolve(
//!         &"fabric:/app/svc".parse().unwrap(),
//!         &PartitionKey::Int64(42),
//!         None,
//!         Duration::from_secs(30),
//!     )
//!     .await
//!     .unwrap();
//! println!("primary at {:?}", rsp.replicas.primary);
//! # }
//! ```
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::future_not_send,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod backoff;
#[cfg(feature = "unstable-fuzzing")]
pub mod build_info;
#[cfg(not(feature = "unstable-fuzzing"))]
pub(crate) mod build_info;
pub mod cache;
pub mod client;
pub mod file_transfer;
pub mod notification;
pub mod protocol;
pub mod rcq;
pub mod settings;
pub mod transport;
pub mod types;
