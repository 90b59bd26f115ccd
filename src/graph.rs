//! Referral tree traversal.
//!
//! The graph is expected to be a forest. Upline traversal is bounded by
//! the caller's `max_levels` and stops quietly on a null or missing
//! parent. Downline traversal uses an explicit worklist with a visited
//! set, so a malformed parent chain can never loop it.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::interfaces::CommissionStore;

/// Aggregate downline figures for one affiliate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownlineStats {
    pub direct_referrals: u32,
    pub total_downline: u32,
}

/// Upline/downline queries over the affiliate store.
pub struct ReferralGraph {
    store: Arc<dyn CommissionStore>,
}

impl ReferralGraph {
    pub fn new(store: Arc<dyn CommissionStore>) -> Self {
        Self { store }
    }

    /// Follow parent pointers from `affiliate_id`, nearest parent first.
    ///
    /// The starting affiliate is not included. Traversal stops at a null
    /// parent, a missing row, or after `max_levels` hops; a broken chain
    /// is not an error.
    pub async fn upline_chain(&self, affiliate_id: Uuid, max_levels: u32) -> Result<Vec<Uuid>> {
        let mut chain = Vec::new();

        let Some(start) = self.store.affiliate(affiliate_id).await? else {
            return Ok(chain);
        };

        let mut next_parent = start.parent_id;
        while let Some(parent_id) = next_parent {
            if chain.len() as u32 >= max_levels {
                break;
            }
            let Some(parent) = self.store.affiliate(parent_id).await? else {
                break;
            };
            chain.push(parent.id);
            next_parent = parent.parent_id;
        }

        Ok(chain)
    }

    /// All downline affiliates of `affiliate_id`, breadth-first, depth
    /// limited. Used for reporting and statistics only, never for
    /// commission calculation.
    pub async fn downline(&self, affiliate_id: Uuid, max_depth: u32) -> Result<Vec<Uuid>> {
        let mut members = Vec::new();
        let mut visited = HashSet::from([affiliate_id]);
        let mut queue = VecDeque::from([(affiliate_id, 0u32)]);

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for child in self.store.children_of(current).await? {
                // The visited set makes cycle safety structural rather
                // than relying on the depth limit.
                if visited.insert(child) {
                    members.push(child);
                    queue.push_back((child, depth + 1));
                }
            }
        }

        Ok(members)
    }

    /// Recompute the denormalized counters for one affiliate and write
    /// them back.
    pub async fn refresh_counters(
        &self,
        affiliate_id: Uuid,
        max_depth: u32,
    ) -> Result<DownlineStats> {
        let direct = self.store.children_of(affiliate_id).await?.len() as u32;
        let total = self.downline(affiliate_id, max_depth).await?.len() as u32;

        self.store
            .update_counters(affiliate_id, direct, total)
            .await?;

        Ok(DownlineStats {
            direct_referrals: direct,
            total_downline: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::Affiliate;

    async fn seed_chain(store: &MemoryStore, depth: usize) -> Vec<Uuid> {
        let mut ids = Vec::new();
        let mut parent = None;
        for i in 0..depth {
            let affiliate = Affiliate::new(format!("CODE{i}"), parent);
            parent = Some(affiliate.id);
            ids.push(affiliate.id);
            store.insert_affiliate(&affiliate).await.unwrap();
        }
        ids
    }

    #[tokio::test]
    async fn upline_is_nearest_parent_first_and_capped() {
        let store = Arc::new(MemoryStore::new());
        let ids = seed_chain(&store, 4).await;
        let graph = ReferralGraph::new(store);

        // ids[3] -> parent ids[2] -> ids[1] -> ids[0]
        let chain = graph.upline_chain(ids[3], 10).await.unwrap();
        assert_eq!(chain, vec![ids[2], ids[1], ids[0]]);

        let capped = graph.upline_chain(ids[3], 2).await.unwrap();
        assert_eq!(capped, vec![ids[2], ids[1]]);

        let root = graph.upline_chain(ids[0], 10).await.unwrap();
        assert!(root.is_empty());
    }

    #[tokio::test]
    async fn missing_start_yields_empty_chain() {
        let store = Arc::new(MemoryStore::new());
        let graph = ReferralGraph::new(store);
        let chain = graph.upline_chain(Uuid::new_v4(), 5).await.unwrap();
        assert!(chain.is_empty());
    }

    #[tokio::test]
    async fn downline_counts_whole_subtree() {
        let store = Arc::new(MemoryStore::new());

        let root = Affiliate::new("ROOT".into(), None);
        store.insert_affiliate(&root).await.unwrap();
        let mut grandchildren = 0;
        for i in 0..3 {
            let child = Affiliate::new(format!("C{i}"), Some(root.id));
            store.insert_affiliate(&child).await.unwrap();
            for j in 0..2 {
                let grandchild = Affiliate::new(format!("G{i}{j}"), Some(child.id));
                store.insert_affiliate(&grandchild).await.unwrap();
                grandchildren += 1;
            }
        }

        let graph = ReferralGraph::new(store.clone());
        let stats = graph.refresh_counters(root.id, 10).await.unwrap();
        assert_eq!(stats.direct_referrals, 3);
        assert_eq!(stats.total_downline, 3 + grandchildren);

        let depth_limited = graph.downline(root.id, 1).await.unwrap();
        assert_eq!(depth_limited.len(), 3);

        let stored = store.affiliate(root.id).await.unwrap().unwrap();
        assert_eq!(stored.total_downline, 9);
    }

    #[tokio::test]
    async fn downline_survives_a_cycle() {
        let store = Arc::new(MemoryStore::new());

        // Deliberately corrupt chain: a <-> b point at each other.
        let mut a = Affiliate::new("A".into(), None);
        let b = Affiliate::new("B".into(), Some(a.id));
        a.parent_id = Some(b.id);
        store.insert_affiliate(&a).await.unwrap();
        store.insert_affiliate(&b).await.unwrap();

        let graph = ReferralGraph::new(store);
        let members = graph.downline(a.id, 10).await.unwrap();
        assert_eq!(members, vec![b.id]);
    }
}
