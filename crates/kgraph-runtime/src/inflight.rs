//! Registry of embed calls in progress.

use std::sync::Arc;

use dashmap::DashMap;
use kgraph_core::OwnerKey;
use kgraph_store::EmbeddingTicket;

type Key = (OwnerKey, String);

/// Remembers which content version of a node is being embedded right now.
///
/// A ticket is accepted unless the same or a newer version of that node is
/// already in flight. Entries are released when the returned guard drops.
#[derive(Clone, Default)]
pub struct InFlight {
    entries: Arc<DashMap<Key, i64>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, owner: &OwnerKey, tickets: &[EmbeddingTicket]) -> InFlightGuard {
        let mut accepted = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            let key = (owner.clone(), ticket.node_id.clone());
            let mut entry = self.entries.entry(key).or_insert(i64::MIN);
            if *entry < ticket.content_version {
                *entry = ticket.content_version;
                accepted.push(ticket.clone());
            }
        }
        InFlightGuard {
            entries: self.entries.clone(),
            owner: owner.clone(),
            tickets: accepted,
        }
    }

    pub fn is_in_flight(&self, owner: &OwnerKey, node_id: &str) -> bool {
        self.entries
            .contains_key(&(owner.clone(), node_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Tickets accepted by [`InFlight::acquire`].
pub struct InFlightGuard {
    entries: Arc<DashMap<Key, i64>>,
    owner: OwnerKey,
    tickets: Vec<EmbeddingTicket>,
}

impl InFlightGuard {
    pub fn tickets(&self) -> &[EmbeddingTicket] {
        &self.tickets
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        for ticket in &self.tickets {
            // a newer version may have taken the slot meanwhile
            self.entries.remove_if(
                &(self.owner.clone(), ticket.node_id.clone()),
                |_, version| *version == ticket.content_version,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(id: &str, version: i64) -> EmbeddingTicket {
        EmbeddingTicket {
            node_id: id.into(),
            content_version: version,
        }
    }

    #[test]
    fn test_duplicate_version_is_rejected() {
        let inflight = InFlight::new();
        let owner = OwnerKey::user("u1");

        let first = inflight.acquire(&owner, &[ticket("n1", 1)]);
        assert_eq!(first.tickets().len(), 1);
        let dup = inflight.acquire(&owner, &[ticket("n1", 1), ticket("n2", 1)]);
        assert_eq!(dup.tickets(), &[ticket("n2", 1)]);

        drop(first);
        assert!(!inflight.is_in_flight(&owner, "n1"));
        drop(dup);
        assert!(inflight.is_empty());
    }

    #[test]
    fn test_newer_version_takes_over() {
        let inflight = InFlight::new();
        let owner = OwnerKey::user("u1");

        let old = inflight.acquire(&owner, &[ticket("n1", 1)]);
        let new = inflight.acquire(&owner, &[ticket("n1", 2)]);
        assert!(!new.is_empty());

        // releasing the old call must not clear the newer one
        drop(old);
        assert!(inflight.is_in_flight(&owner, "n1"));
        drop(new);
        assert!(!inflight.is_in_flight(&owner, "n1"));
    }

    #[test]
    fn test_owners_do_not_collide() {
        let inflight = InFlight::new();
        let a = inflight.acquire(&OwnerKey::user("u1"), &[ticket("n1", 1)]);
        let b = inflight.acquire(&OwnerKey::user("u2"), &[ticket("n1", 1)]);
        assert!(!a.is_empty());
        assert!(!b.is_empty());
        assert_eq!(inflight.len(), 2);
    }
}
