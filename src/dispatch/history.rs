// Bounded, time-ordered record of recently dispatched notifications.
//
// Kept newest first by lastModified. Only the dispatcher's broadcast loop
// writes to it; `/__history` reads it.

use parking_lot::RwLock;

use super::notification::Notification;

/// The last `capacity` notifications pushed to subscribers.
#[derive(Debug)]
pub struct History {
    capacity: usize,
    notifications: RwLock<Vec<Notification>>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            notifications: RwLock::new(Vec::with_capacity(capacity + 1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert `n`, re-sort newest first, and drop the oldest entry when over capacity.
    ///
    /// Entries with a missing or malformed lastModified sort as oldest.
    pub fn push(&self, n: Notification) {
        let mut notifications = self.notifications.write();
        notifications.push(n);
        notifications.sort_by_key(|n| std::cmp::Reverse(n.last_modified_at()));
        notifications.truncate(self.capacity);
    }

    /// Snapshot, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(id: &str, last_modified: &str) -> Notification {
        Notification {
            id: id.to_string(),
            last_modified: last_modified.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_newest_first() {
        let history = History::new(10);
        let n1 = at("n1", "2016-11-02T10:54:22.234Z");
        let n2 = at("n2", "2016-11-02T10:55:24.244Z");
        history.push(n1.clone());
        history.push(n2.clone());
        assert_eq!(history.notifications(), vec![n2, n1]);
    }

    #[test]
    fn test_out_of_order_pushes_are_sorted() {
        let history = History::new(10);
        history.push(at("late", "2016-11-02T10:59:00Z"));
        history.push(at("early", "2016-11-02T10:50:00Z"));
        history.push(at("middle", "2016-11-02T10:55:00+00:00"));
        let ids: Vec<String> = history.notifications().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["late", "middle", "early"]);
    }

    #[test]
    fn test_bounded_drops_oldest() {
        let history = History::new(2);
        history.push(at("oldest", "2016-11-02T10:00:00Z"));
        for minute in 10..20 {
            history.push(at(&format!("n{minute}"), &format!("2016-11-02T10:{minute}:00Z")));
        }
        let ids: Vec<String> = history.notifications().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["n19", "n18"]);
    }

    #[test]
    fn test_unparseable_dates_sort_last() {
        let history = History::new(3);
        history.push(at("bad", "yesterday"));
        history.push(at("good", "2016-11-02T10:00:00Z"));
        let ids: Vec<String> = history.notifications().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["good", "bad"]);
    }
}
