use crate::operation::OperationRecord;

/// Fixed-capacity ring of completed slow operations.
///
/// Appends overwrite the oldest slot once the ring is full; it never grows.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    slots: Vec<Option<OperationRecord>>,
    next: usize,
    filled: usize,
}

impl HistoryRing {
    /// A capacity of zero is clamped to one slot.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            next: 0,
            filled: 0,
        }
    }

    pub fn append(&mut self, record: OperationRecord) {
        if self.slots[self.next].is_none() {
            self.filled += 1;
        }
        self.slots[self.next] = Some(record);
        self.next = (self.next + 1) % self.slots.len();
    }

    /// Populated entries, oldest first.
    pub fn snapshot(&self) -> Vec<OperationRecord> {
        let (newer, older) = self.slots.split_at(self.next);
        older.iter().chain(newer).flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(opid: i32) -> OperationRecord {
        OperationRecord {
            opid,
            effective_user: "bob".into(),
            running_micros: 6_000_000,
            delta_micros: 0,
            operation: "query".into(),
            namespace: "app.users".into(),
            command: String::new(),
            observed_at: Utc::now(),
            completed_at: None,
            raw: serde_json::Value::Null,
        }
    }

    fn opids(ring: &HistoryRing) -> Vec<i32> {
        ring.snapshot().iter().map(|r| r.opid).collect()
    }

    #[test]
    fn empty_ring_snapshots_nothing() {
        let ring = HistoryRing::new(4);
        assert!(ring.is_empty());
        assert!(ring.snapshot().is_empty());
        assert_eq!(ring.capacity(), 4);
    }

    #[test]
    fn partial_ring_keeps_insertion_order() {
        let mut ring = HistoryRing::new(4);
        ring.append(record(1));
        ring.append(record(2));
        assert_eq!(ring.len(), 2);
        assert_eq!(opids(&ring), vec![1, 2]);
    }

    #[test]
    fn overflow_evicts_oldest_first() {
        let mut ring = HistoryRing::new(3);
        for opid in 1..=7 {
            ring.append(record(opid));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(opids(&ring), vec![5, 6, 7]);
    }

    #[test]
    fn zero_capacity_holds_latest_entry() {
        let mut ring = HistoryRing::new(0);
        ring.append(record(1));
        ring.append(record(2));
        assert_eq!(ring.capacity(), 1);
        assert_eq!(opids(&ring), vec![2]);
    }
}
