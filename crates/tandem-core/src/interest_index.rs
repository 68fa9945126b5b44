//! Interest index.
//!
//! Maps interest tags to the unpaired interest-mode clients advertising them.
//! Tags whose bucket empties are dropped immediately, so `tag_count()` always
//! reflects live demand.
//!
//! The index does not know about pairing. The coordinator removes a client
//! from all of its buckets when it pairs and adds it back when it unpairs.

use std::collections::{BTreeSet, HashMap};

use tandem_proto::ClientId;

/// Interest tag → waiting client ids.
#[derive(Debug, Default)]
pub struct InterestIndex {
    /// Tag → ids, ascending
    buckets: HashMap<String, BTreeSet<ClientId>>,
}

impl InterestIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` under `interest`, creating the bucket if needed.
    ///
    /// Returns `false` if it was already there.
    pub fn add(&mut self, interest: &str, id: ClientId) -> bool {
        match self.buckets.get_mut(interest) {
            Some(bucket) => bucket.insert(id),
            None => {
                self.buckets.insert(interest.to_string(), BTreeSet::from([id]));
                true
            },
        }
    }

    /// Remove `id` from `interest`, pruning the bucket if it empties.
    ///
    /// Returns `true` if the id was present.
    pub fn remove(&mut self, interest: &str, id: ClientId) -> bool {
        let removed = self.buckets.get_mut(interest).is_some_and(|bucket| bucket.remove(&id));

        if self.buckets.get(interest).is_some_and(BTreeSet::is_empty) {
            self.buckets.remove(interest);
        }

        removed
    }

    /// Add `id` under every tag in `interests`.
    pub fn add_all(&mut self, interests: &[String], id: ClientId) {
        for interest in interests {
            self.add(interest, id);
        }
    }

    /// Remove `id` from every tag in `interests`.
    pub fn remove_all(&mut self, interests: &[String], id: ClientId) {
        for interest in interests {
            self.remove(interest, id);
        }
    }

    /// Ids waiting under `interest`, ascending. Empty for unknown tags.
    pub fn candidates<'a>(&'a self, interest: &str) -> impl Iterator<Item = ClientId> + use<'a> {
        self.buckets.get(interest).into_iter().flat_map(|bucket| bucket.iter().copied())
    }

    /// Check if `id` is indexed under `interest`.
    pub fn contains(&self, interest: &str, id: ClientId) -> bool {
        self.buckets.get(interest).is_some_and(|bucket| bucket.contains(&id))
    }

    /// Number of non-empty tags.
    pub fn tag_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of ids under `interest`.
    pub fn bucket_len(&self, interest: &str) -> usize {
        self.buckets.get(interest).map_or(0, BTreeSet::len)
    }

    /// Indexed tags, in no particular order.
    pub fn tags(&self) -> impl Iterator<Item = &str> + '_ {
        self.buckets.keys().map(String::as_str)
    }

    /// Total (tag, id) memberships.
    pub fn len(&self) -> usize {
        self.buckets.values().map(BTreeSet::len).sum()
    }

    /// Every (tag, id) membership, in no particular tag order.
    pub fn memberships(&self) -> impl Iterator<Item = (&str, ClientId)> + '_ {
        self.buckets
            .iter()
            .flat_map(|(tag, bucket)| bucket.iter().map(move |id| (tag.as_str(), *id)))
    }

    /// No tags indexed.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_creates_bucket() {
        let mut index = InterestIndex::new();

        assert!(index.add("chess", ClientId(1)));
        assert!(!index.add("chess", ClientId(1)));

        assert!(index.contains("chess", ClientId(1)));
        assert_eq!(index.tag_count(), 1);
        assert_eq!(index.bucket_len("chess"), 1);
    }

    #[test]
    fn remove_prunes_empty_bucket() {
        let mut index = InterestIndex::new();
        index.add("chess", ClientId(1));
        index.add("chess", ClientId(2));

        assert!(index.remove("chess", ClientId(1)));
        assert_eq!(index.tag_count(), 1);

        assert!(index.remove("chess", ClientId(2)));
        assert_eq!(index.tag_count(), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn remove_missing_is_noop() {
        let mut index = InterestIndex::new();
        index.add("chess", ClientId(1));

        assert!(!index.remove("chess", ClientId(2)));
        assert!(!index.remove("go", ClientId(1)));
        assert_eq!(index.tag_count(), 1);
    }

    #[test]
    fn candidates_in_ascending_order() {
        let mut index = InterestIndex::new();
        index.add("chess", ClientId(7));
        index.add("chess", ClientId(3));
        index.add("chess", ClientId(5));

        let ids: Vec<_> = index.candidates("chess").collect();
        assert_eq!(ids, vec![ClientId(3), ClientId(5), ClientId(7)]);

        assert_eq!(index.candidates("go").count(), 0);
    }

    #[test]
    fn add_all_and_remove_all() {
        let mut index = InterestIndex::new();
        let tags = vec!["chess".to_string(), "go".to_string()];

        index.add_all(&tags, ClientId(1));
        index.add("go", ClientId(2));
        assert_eq!(index.memberships().count(), 3);
        assert_eq!(index.len(), 3);

        let mut indexed: Vec<_> = index.tags().collect();
        indexed.sort_unstable();
        assert_eq!(indexed, vec!["chess", "go"]);

        index.remove_all(&tags, ClientId(1));
        let memberships: Vec<_> = index.memberships().collect();
        assert_eq!(memberships, vec![("go", ClientId(2))]);
    }
}
