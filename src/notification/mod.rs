//! Service-address notification subsystem.
//!
//! [`client::NotificationClient`] keeps a client synchronized with its
//! gateway across reconnects, detecting deletion notifications the gateway
//! has already trimmed; [`manager::TrackerManager`] fans accepted updates
//! and poll replies out to per-registration callbacks.

pub mod client;
pub mod manager;
pub mod tracker;
mod undeleted;

pub use client::{DeliveredNotification, NotificationClient, NotificationHandler};
pub use manager::{PollOutcome, TrackerManager};
pub use tracker::{AddressChangeHandler, AddressTracker, AddressUpdate, HandlerId};
pub use undeleted::{UndeletedIndex, UndeletedPartition};
