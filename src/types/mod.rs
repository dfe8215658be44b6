//! Core domain types shared by every subsystem.

mod name;
mod psd;
mod rsp;
mod version_ranges;

pub use name::ServiceName;
pub use psd::{PartitionDescription, PartitionInfo, PartitionKey, PartitionScheme, Psd};
pub use rsp::{AddressDetectionFailure, Cuid, Generation, ReplicaSet, Rsp, RspVersion, ServiceTableEntry};
pub use version_ranges::{VersionRange, VersionRangeCollection};
