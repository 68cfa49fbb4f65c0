use std::collections::HashMap;
use std::time::Instant;

use crate::core::types::{GroupMember, Session};

struct CacheEntry {
    session: Session,
    inserted_at: Instant,
    // Tie-break for entries inserted within the same clock tick
    seq: u64,
}

#[derive(Default)]
struct GroupEntry {
    members: HashMap<String, GroupMember>,
    /// Set once the membership came from a full scan (or a freshly minted group)
    complete: bool,
}

/// Session cache plus the group -> members accelerator.
///
/// Both live behind one lock in `SessionStore`; nothing here does I/O.
pub(crate) struct SessionCache {
    entries: HashMap<String, CacheEntry>,
    groups: HashMap<String, GroupEntry>,
    capacity: usize,
    eviction_batch: usize,
    next_seq: u64,
}

impl SessionCache {
    pub(crate) fn new(capacity: usize, eviction_batch: usize) -> Self {
        Self {
            entries: HashMap::new(),
            groups: HashMap::new(),
            capacity: capacity.max(1),
            eviction_batch: eviction_batch.clamp(1, capacity.max(1)),
            next_seq: 0,
        }
    }

    pub(crate) fn get(&self, session_id: &str) -> Option<&Session> {
        self.entries.get(session_id).map(|e| &e.session)
    }

    pub(crate) fn contains(&self, session_id: &str) -> bool {
        self.entries.contains_key(session_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Insert or refresh a session. Returns how many entries were evicted.
    pub(crate) fn insert(&mut self, session: Session) -> usize {
        let mut evicted = 0;
        if !self.entries.contains_key(&session.session_id) && self.entries.len() >= self.capacity {
            evicted = self.evict_oldest(self.eviction_batch);
        }

        self.next_seq += 1;
        self.entries.insert(
            session.session_id.clone(),
            CacheEntry {
                session,
                inserted_at: Instant::now(),
                seq: self.next_seq,
            },
        );
        evicted
    }

    fn evict_oldest(&mut self, count: usize) -> usize {
        let mut by_age: Vec<(Instant, u64, String)> = self
            .entries
            .iter()
            .map(|(id, e)| (e.inserted_at, e.seq, id.clone()))
            .collect();
        by_age.sort();

        by_age
            .into_iter()
            .take(count)
            .filter(|(_, _, id)| self.entries.remove(id).is_some())
            .count()
    }

    pub(crate) fn remove(&mut self, session_id: &str) -> Option<Session> {
        self.entries.remove(session_id).map(|e| e.session)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Add one member to its group's index entry
    pub(crate) fn index_member(&mut self, group_id: &str, member: GroupMember, fresh_group: bool) {
        let entry = self.groups.entry(group_id.to_string()).or_insert_with(|| GroupEntry {
            members: HashMap::new(),
            complete: fresh_group,
        });
        entry.members.insert(member.session_id.clone(), member);
    }

    pub(crate) fn unindex_member(&mut self, group_id: &str, session_id: &str) {
        if let Some(entry) = self.groups.get_mut(group_id) {
            entry.members.remove(session_id);
            if entry.members.is_empty() {
                self.groups.remove(group_id);
            }
        }
    }

    /// Members of `group_id` if the index knows the whole group
    pub(crate) fn complete_group(&self, group_id: &str) -> Option<Vec<GroupMember>> {
        self.groups
            .get(group_id)
            .filter(|entry| entry.complete)
            .map(|entry| entry.members.values().cloned().collect())
    }

    /// Replace one group's membership with the result of a scan
    pub(crate) fn replace_group(&mut self, group_id: &str, members: Vec<GroupMember>) {
        self.groups.insert(
            group_id.to_string(),
            GroupEntry {
                members: members
                    .into_iter()
                    .map(|m| (m.session_id.clone(), m))
                    .collect(),
                complete: true,
            },
        );
    }

    /// Replace the whole index with the result of a full scan
    pub(crate) fn replace_index(&mut self, groups: HashMap<String, Vec<GroupMember>>) {
        self.groups.clear();
        for (group_id, members) in groups {
            self.replace_group(&group_id, members);
        }
    }

    #[cfg(test)]
    pub(crate) fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ArtifactRef;
    use chrono::Utc;

    fn session(id: &str, group: &str, ordinal: usize) -> Session {
        Session {
            session_id: id.to_string(),
            group_id: group.to_string(),
            ordinal,
            created_at: Utc::now(),
            source_name: format!("{id}.png"),
            source_language: "ja".to_string(),
            target_language: "en".to_string(),
            original_ref: ArtifactRef("o".to_string()),
            repaired_ref: ArtifactRef("r".to_string()),
            bubble_mask_ref: ArtifactRef("b".to_string()),
            text_mask_ref: ArtifactRef("t".to_string()),
            blocks: Vec::new(),
        }
    }

    #[test]
    fn test_overflow_evicts_oldest_batch() {
        let mut cache = SessionCache::new(5, 2);
        for i in 0..5 {
            assert_eq!(cache.insert(session(&format!("s{i}"), "g", i)), 0);
        }
        assert_eq!(cache.insert(session("s5", "g", 5)), 2);
        assert_eq!(cache.len(), 4);
        assert!(!cache.contains("s0"));
        assert!(!cache.contains("s1"));
        assert!(cache.contains("s2"));
        assert!(cache.contains("s5"));
    }

    #[test]
    fn test_refresh_does_not_evict() {
        let mut cache = SessionCache::new(2, 1);
        cache.insert(session("a", "g", 0));
        cache.insert(session("b", "g", 1));
        assert_eq!(cache.insert(session("a", "g", 0)), 0);
        assert_eq!(cache.len(), 2);
        // "b" is now the oldest
        cache.insert(session("c", "g", 2));
        assert!(!cache.contains("b"));
        assert!(cache.contains("a"));
    }

    #[test]
    fn test_group_index_completeness() {
        let mut cache = SessionCache::new(10, 1);
        let s = session("a", "g", 0);
        cache.index_member("g", s.member(), false);
        assert!(cache.complete_group("g").is_none());

        cache.replace_group("g", vec![s.member(), session("b", "g", 1).member()]);
        assert_eq!(cache.complete_group("g").map(|m| m.len()), Some(2));

        cache.unindex_member("g", "a");
        cache.unindex_member("g", "b");
        assert_eq!(cache.group_count(), 0);
    }
}
