use std::collections::{BTreeMap, HashMap};

use crate::types::{Cuid, ServiceTableEntry};

/// What the client remembers about a live partition it has delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndeletedPartition {
    pub cuid: Cuid,
    pub service_name: String,
    pub primary_endpoint: Option<String>,
}

/// Client-side index of partitions that have been delivered to the
/// application and not yet superseded by an empty (deleted) notification.
///
/// Indexed both ways: by CUID for the accept rule and by version for
/// reconnect synchronization. The two views form a bijection, exactly one
/// entry per live CUID.
#[derive(Debug, Default)]
pub struct UndeletedIndex {
    versions_by_cuid: HashMap<Cuid, i64>,
    partitions_by_version: BTreeMap<i64, UndeletedPartition>,
}

impl UndeletedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.versions_by_cuid.len(), self.partitions_by_version.len());
        self.partitions_by_version.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions_by_version.is_empty()
    }

    pub fn clear(&mut self) {
        self.versions_by_cuid.clear();
        self.partitions_by_version.clear();
    }

    pub fn version_of(&self, cuid: &Cuid) -> Option<i64> {
        self.versions_by_cuid.get(cuid).copied()
    }

    pub fn get_by_version(&self, version: i64) -> Option<&UndeletedPartition> {
        self.partitions_by_version.get(&version)
    }

    /// Entries whose version does not exceed `version`, ascending. These
    /// are the partitions a trimming gateway may no longer remember.
    pub fn entries_up_to(&self, version: i64) -> impl Iterator<Item = (i64, &UndeletedPartition)> {
        self.partitions_by_version
            .range(..=version)
            .map(|(v, p)| (*v, p))
    }

    /// Remove the entry delivered at `version`.
    pub fn remove_version(&mut self, version: i64) -> Option<UndeletedPartition> {
        let partition = self.partitions_by_version.remove(&version)?;
        self.versions_by_cuid.remove(&partition.cuid);
        Some(partition)
    }

    /// Apply the per-CUID accept rule for `entry` and record the outcome.
    ///
    /// Empty entries are delivered only when a strictly older version of
    /// the CUID has been delivered before (and the CUID is forgotten).
    /// Non-empty entries are delivered when the version changed or, for
    /// primary-only matches, the primary endpoint changed; the index then
    /// tracks the new version.
    pub fn try_update(&mut self, entry: &ServiceTableEntry, matched_primary_only: bool) -> bool {
        let stored_version = self.versions_by_cuid.get(&entry.cuid).copied();

        if entry.is_empty() {
            return match stored_version {
                Some(stored) if stored < entry.version => {
                    self.remove_version(stored);
                    true
                }
                // Never delivered to this client (or delivered at this or a
                // newer version already): nothing to revoke.
                _ => false,
            };
        }

        let deliver = match stored_version {
            None => true,
            Some(stored) if stored != entry.version => true,
            Some(stored) => {
                matched_primary_only
                    && self
                        .partitions_by_version
                        .get(&stored)
                        .is_some_and(|p| p.primary_endpoint != entry.replicas.primary)
            }
        };

        if deliver {
            if let Some(stored) = stored_version {
                self.partitions_by_version.remove(&stored);
            }
            self.versions_by_cuid.insert(entry.cuid, entry.version);
            self.partitions_by_version.insert(
                entry.version,
                UndeletedPartition {
                    cuid: entry.cuid,
                    service_name: entry.service_name.clone(),
                    primary_endpoint: entry.replicas.primary.clone(),
                },
            );
        }

        deliver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Generation, PartitionInfo, ReplicaSet};
    use uuid::Uuid;

    fn entry(cuid: u128, version: i64, primary: Option<&str>) -> ServiceTableEntry {
        ServiceTableEntry {
            cuid: Cuid(Uuid::from_u128(cuid)),
            service_name: "fabric:/svc".to_owned(),
            version,
            generation: Generation(1, 1),
            info: PartitionInfo::Singleton,
            is_service_group: false,
            replicas: ReplicaSet {
                is_stateful: true,
                is_primary_valid: true,
                primary: primary.map(str::to_owned),
                secondaries: vec![],
            },
        }
    }

    fn tombstone(cuid: u128, version: i64) -> ServiceTableEntry {
        entry(cuid, version, None)
    }

    #[test]
    fn non_empty_entries_track_one_version_per_cuid() {
        let mut index = UndeletedIndex::new();

        assert!(index.try_update(&entry(1, 10, Some("tcp://n1:1")), false));
        assert_eq!(index.len(), 1);
        assert_eq!(index.version_of(&Cuid(Uuid::from_u128(1))), Some(10));

        // same version, not primary-only: duplicate
        assert!(!index.try_update(&entry(1, 10, Some("tcp://n1:1")), false));

        // version change replaces the tracked version
        assert!(index.try_update(&entry(1, 12, Some("tcp://n1:1")), false));
        assert_eq!(index.len(), 1);
        assert_eq!(index.version_of(&Cuid(Uuid::from_u128(1))), Some(12));
        assert!(index.get_by_version(10).is_none());
    }

    #[test]
    fn primary_only_matches_deliver_on_endpoint_change() {
        let mut index = UndeletedIndex::new();
        assert!(index.try_update(&entry(1, 10, Some("tcp://n1:1")), true));

        // same version, same primary: duplicate
        assert!(!index.try_update(&entry(1, 10, Some("tcp://n1:1")), true));

        // same version, new primary: delivered
        assert!(index.try_update(&entry(1, 10, Some("tcp://n2:1")), true));
    }

    #[test]
    fn empty_entries_revoke_older_versions_only() {
        let mut index = UndeletedIndex::new();

        // tombstone for an unknown cuid is not delivered
        assert!(!index.try_update(&tombstone(1, 10), false));

        assert!(index.try_update(&entry(1, 10, Some("tcp://n1:1")), false));

        // tombstone at the same version is stale
        assert!(!index.try_update(&tombstone(1, 10), false));
        assert_eq!(index.len(), 1);

        // newer tombstone removes the entry
        assert!(index.try_update(&tombstone(1, 11), false));
        assert!(index.is_empty());
    }

    #[test]
    fn entries_up_to_bounds_the_sync_set() {
        let mut index = UndeletedIndex::new();
        index.try_update(&entry(1, 10, Some("tcp://n1:1")), false);
        index.try_update(&entry(2, 40, Some("tcp://n1:2")), false);
        index.try_update(&entry(3, 60, Some("tcp://n1:3")), false);

        let versions: Vec<i64> = index.entries_up_to(55).map(|(v, _)| v).collect();
        assert_eq!(versions, vec![10, 40]);
    }

    #[test]
    fn remove_version_keeps_bijection() {
        let mut index = UndeletedIndex::new();
        index.try_update(&entry(1, 10, Some("tcp://n1:1")), false);

        let removed = index.remove_version(10).unwrap();
        assert_eq!(removed.cuid, Cuid(Uuid::from_u128(1)));
        assert!(index.is_empty());
        assert_eq!(index.version_of(&removed.cuid), None);
    }
}
