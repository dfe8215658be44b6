use crate::protocol::error::ErrorKind;
use crate::types::rsp::Cuid;

/// Key used to address a partition of a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    /// For singleton services.
    None,
    /// For uniform int64-range partitioned services.
    Int64(i64),
    /// For named partitions.
    Named(String),
}

/// How a service splits its key space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionScheme {
    Singleton,
    UniformInt64Range { low: i64, high: i64 },
    Named { names: Vec<String> },
}

/// The key range or name covered by one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionInfo {
    Singleton,
    Int64Range { low: i64, high: i64 },
    Named(String),
}

/// One partition of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescription {
    pub cuid: Cuid,
    pub info: PartitionInfo,
}

/// Partitioned service descriptor: the versioned metadata describing a
/// service's partition layout.
///
/// An instance is immutable; a refresh replaces the whole descriptor and
/// older versions never overwrite newer ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Psd {
    /// Monotonic store version of the descriptor.
    pub version: i64,
    pub scheme: PartitionScheme,
    /// Partition list, index-aligned with the scheme.
    pub partitions: Vec<PartitionDescription>,
    pub is_service_group: bool,
}

impl Psd {
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Map a partition key to the index of the covering partition.
    ///
    /// A key that does not match the scheme yields
    /// [`ErrorKind::InvalidServicePartition`].
    pub fn partition_index(&self, key: &PartitionKey) -> Result<usize, ErrorKind> {
        match (&self.scheme, key) {
            (PartitionScheme::Singleton, PartitionKey::None) => Ok(0),
            (PartitionScheme::UniformInt64Range { low, high }, PartitionKey::Int64(k)) => {
                if k < low || k > high {
                    return Err(ErrorKind::InvalidServicePartition);
                }
                let count = self.partitions.len() as i128;
                let span = *high as i128 - *low as i128 + 1;
                let offset = *k as i128 - *low as i128;
                Ok((offset * count / span) as usize)
            }
            (PartitionScheme::Named { names }, PartitionKey::Named(n)) => names
                .iter()
                .position(|candidate| candidate == n)
                .ok_or(ErrorKind::InvalidServicePartition),
            _ => Err(ErrorKind::InvalidServicePartition),
        }
    }
}
