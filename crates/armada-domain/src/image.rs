use serde::{Deserialize, Serialize};

/// One `(node, image id)` tuple in a repository's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub node: String,
    pub image_id: String,
}

/// Per-repository pull/build/commit history with derived "last" fields.
///
/// The history is a value keyed by repository; nodes never back-reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHistory {
    pub repository: String,
    pub entries: Vec<ImageEntry>,
    /// Image id of the most recent entry, empty when the history is empty.
    pub last_id: String,
    /// Node address of the most recent entry, empty when the history is empty.
    pub last_node: String,
}

impl ImageHistory {
    pub fn new(repository: impl Into<String>) -> Self {
        ImageHistory {
            repository: repository.into(),
            entries: Vec::new(),
            last_id: String::new(),
            last_node: String::new(),
        }
    }

    /// Append a tuple. Inserting an already-present `(node, image_id)` pair
    /// is a no-op, including for the derived last fields.
    pub fn record(&mut self, node: impl Into<String>, image_id: impl Into<String>) {
        let node = node.into();
        let image_id = image_id.into();
        if self
            .entries
            .iter()
            .any(|e| e.node == node && e.image_id == image_id)
        {
            return;
        }
        self.last_id = image_id.clone();
        self.last_node = node.clone();
        self.entries.push(ImageEntry { node, image_id });
    }

    /// Remove one tuple; returns whether it was present. The last fields are
    /// recomputed from the remaining tail.
    pub fn remove(&mut self, node: &str, image_id: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.node == node && e.image_id == image_id));
        if self.entries.len() == before {
            return false;
        }
        match self.entries.last() {
            Some(last) => {
                self.last_id = last.image_id.clone();
                self.last_node = last.node.clone();
            }
            None => {
                self.last_id.clear();
                self.last_node.clear();
            }
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct node addresses holding this image, in first-seen order.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        for entry in &self.entries {
            if !hosts.contains(&entry.node) {
                hosts.push(entry.node.clone());
            }
        }
        hosts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_updates_last_fields() {
        let mut h = ImageHistory::new("ubuntu");
        h.record("http://h1:2375", "img-1");
        h.record("http://h2:2375", "img-2");
        assert_eq!(h.entries.len(), 2);
        assert_eq!(h.last_id, "img-2");
        assert_eq!(h.last_node, "http://h2:2375");
    }

    #[test]
    fn duplicate_record_is_noop() {
        let mut h = ImageHistory::new("ubuntu");
        h.record("http://h1:2375", "img-1");
        h.record("http://h2:2375", "img-2");
        h.record("http://h1:2375", "img-1");
        assert_eq!(h.entries.len(), 2);
        // last fields untouched by the duplicate
        assert_eq!(h.last_id, "img-2");
        assert_eq!(h.last_node, "http://h2:2375");
    }

    #[test]
    fn remove_recomputes_last_fields() {
        let mut h = ImageHistory::new("ubuntu");
        h.record("http://h1:2375", "img-1");
        h.record("http://h2:2375", "img-2");
        assert!(h.remove("http://h2:2375", "img-2"));
        assert_eq!(h.last_id, "img-1");
        assert_eq!(h.last_node, "http://h1:2375");
    }

    #[test]
    fn removing_last_entry_empties_history() {
        let mut h = ImageHistory::new("ubuntu");
        h.record("http://h1:2375", "img-1");
        assert!(h.remove("http://h1:2375", "img-1"));
        assert!(h.is_empty());
        assert!(h.last_id.is_empty());
        assert!(h.last_node.is_empty());
    }

    #[test]
    fn remove_absent_tuple_reports_false() {
        let mut h = ImageHistory::new("ubuntu");
        h.record("http://h1:2375", "img-1");
        assert!(!h.remove("http://h1:2375", "img-9"));
        assert_eq!(h.entries.len(), 1);
    }

    #[test]
    fn hosts_are_distinct() {
        let mut h = ImageHistory::new("ubuntu");
        h.record("http://h1:2375", "img-1");
        h.record("http://h1:2375", "img-2");
        h.record("http://h2:2375", "img-2");
        assert_eq!(h.hosts(), vec!["http://h1:2375", "http://h2:2375"]);
    }
}
