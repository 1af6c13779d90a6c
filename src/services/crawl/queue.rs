//! Priority frontier for one crawl session.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::models::{CrawlQueueEntry, EntryState};
use crate::scrapers::links::normalize_url;

/// Heap slot: shallower first, then higher priority, then FIFO.
#[derive(Debug)]
struct Slot {
    seq: u64,
    entry: CrawlQueueEntry,
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Slot {}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest element.
        other
            .entry
            .depth
            .cmp(&self.entry.depth)
            .then(self.entry.priority.cmp(&other.entry.priority))
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Counters of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub done: usize,
    pub failed: usize,
}

/// Frontier ordered by (depth asc, priority desc, insertion order).
///
/// A normalized URL is accepted at most once per session. Entries deeper
/// than `max_depth` are rejected, and once `max_pages` entries have been
/// accepted further enqueues are no-ops.
#[derive(Debug)]
pub struct CrawlQueue {
    heap: BinaryHeap<Slot>,
    seen: HashSet<String>,
    in_flight: HashMap<String, CrawlQueueEntry>,
    max_depth: u32,
    max_pages: Option<usize>,
    accepted: usize,
    seq: u64,
    done: usize,
    failed: usize,
}

impl CrawlQueue {
    pub fn new(max_depth: u32, max_pages: Option<usize>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            seen: HashSet::new(),
            in_flight: HashMap::new(),
            max_depth,
            max_pages,
            accepted: 0,
            seq: 0,
            done: 0,
            failed: 0,
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Whether the page cap has been reached.
    pub fn is_full(&self) -> bool {
        self.max_pages.is_some_and(|cap| self.accepted >= cap)
    }

    /// Add a URL. Returns false when it was rejected.
    pub fn enqueue(&mut self, url: &str, depth: u32, priority: i32, parent: Option<&str>) -> bool {
        if depth > self.max_depth || self.is_full() {
            return false;
        }
        let Some(url) = normalize_url(url) else {
            return false;
        };
        if !self.seen.insert(url.clone()) {
            return false;
        }
        self.accepted += 1;
        self.seq += 1;
        self.heap.push(Slot {
            seq: self.seq,
            entry: CrawlQueueEntry {
                url,
                depth,
                priority,
                state: EntryState::Pending,
                parent: parent.map(str::to_string),
            },
        });
        true
    }

    /// Re-add persisted entries from an earlier session.
    pub fn restore(&mut self, entries: Vec<CrawlQueueEntry>) -> usize {
        entries
            .into_iter()
            .filter(|e| self.enqueue(&e.url, e.depth, e.priority, e.parent.as_deref()))
            .count()
    }

    /// Mark a URL as already visited without queueing it.
    pub fn mark_seen(&mut self, url: &str) {
        if let Some(url) = normalize_url(url) {
            self.seen.insert(url);
        }
    }

    pub fn is_seen(&self, url: &str) -> bool {
        normalize_url(url).is_some_and(|u| self.seen.contains(&u))
    }

    /// Take the next entry and move it to in-flight.
    pub fn dequeue(&mut self) -> Option<CrawlQueueEntry> {
        let Slot { mut entry, .. } = self.heap.pop()?;
        entry.state = EntryState::InFlight;
        self.in_flight.insert(entry.url.clone(), entry.clone());
        Some(entry)
    }

    pub fn mark_done(&mut self, url: &str) -> bool {
        let finished = self.in_flight.remove(url).is_some();
        if finished {
            self.done += 1;
        }
        finished
    }

    pub fn mark_failed(&mut self, url: &str) -> bool {
        let finished = self.in_flight.remove(url).is_some();
        if finished {
            self.failed += 1;
        }
        finished
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.heap.len(),
            in_flight: self.in_flight.len(),
            done: self.done,
            failed: self.failed,
        }
    }

    /// Entries to persist when the session stops: interrupted in-flight
    /// entries first, then pending entries in dequeue order.
    pub fn pending_entries(&self) -> Vec<CrawlQueueEntry> {
        let mut out: Vec<CrawlQueueEntry> = self
            .in_flight
            .values()
            .cloned()
            .map(|mut e| {
                e.state = EntryState::Pending;
                e
            })
            .collect();
        out.sort_by(|a, b| a.url.cmp(&b.url));

        let mut slots: Vec<&Slot> = self.heap.iter().collect();
        slots.sort_by(|a, b| b.cmp(a));
        out.extend(slots.into_iter().map(|s| s.entry.clone()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_depth_then_priority_then_fifo() {
        let mut q = CrawlQueue::new(3, None);
        q.enqueue("https://example.com/catalog/b", 1, 5, None);
        q.enqueue("https://example.com/item/1", 1, 10, None);
        q.enqueue("https://example.com/", 0, 100, None);
        q.enqueue("https://example.com/catalog/c", 1, 5, None);
        q.enqueue("https://example.com/deep", 2, 50, None);

        let order: Vec<String> = std::iter::from_fn(|| q.dequeue().map(|e| e.url)).collect();
        assert_eq!(
            order,
            vec![
                "https://example.com/",
                "https://example.com/item/1",
                "https://example.com/catalog/b",
                "https://example.com/catalog/c",
                "https://example.com/deep",
            ]
        );
    }

    #[test]
    fn test_rejects_seen_and_too_deep() {
        let mut q = CrawlQueue::new(1, None);
        assert!(q.enqueue("https://example.com/a?utm_source=x", 0, 1, None));
        assert!(!q.enqueue("https://example.com/a#frag", 1, 1, None));
        assert!(!q.enqueue("https://example.com/b", 2, 1, None));
        assert!(!q.enqueue("ftp://example.com/c", 0, 1, None));

        let entry = q.dequeue().unwrap();
        assert_eq!(entry.state, EntryState::InFlight);
        assert!(q.mark_done(&entry.url));
        assert!(!q.enqueue("https://example.com/a", 1, 1, None));
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn test_page_cap_makes_enqueue_noop() {
        let mut q = CrawlQueue::new(5, Some(2));
        assert!(q.enqueue("https://example.com/1", 0, 1, None));
        assert!(q.enqueue("https://example.com/2", 0, 1, None));
        assert!(q.is_full());
        assert!(!q.enqueue("https://example.com/3", 0, 1, None));
        q.dequeue();
        assert!(!q.enqueue("https://example.com/4", 0, 1, None));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_pending_entries_include_interrupted() {
        let mut q = CrawlQueue::new(2, None);
        q.enqueue("https://example.com/", 0, 100, None);
        q.enqueue("https://example.com/x", 1, 5, Some("https://example.com/"));
        q.enqueue("https://example.com/y", 1, 10, Some("https://example.com/"));
        let first = q.dequeue().unwrap();

        let pending = q.pending_entries();
        let urls: Vec<&str> = pending.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec![first.url.as_str(), "https://example.com/y", "https://example.com/x"]);
        assert!(pending.iter().all(|e| e.state == EntryState::Pending));
        assert_eq!(pending[1].parent.as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn test_mark_seen_blocks_resumed_urls() {
        let mut q = CrawlQueue::new(2, None);
        q.mark_seen("https://example.com/done");
        assert!(q.is_seen("https://example.com/done#x"));
        assert!(!q.enqueue("https://example.com/done", 1, 5, None));
        let restored = q.restore(vec![CrawlQueueEntry {
            url: "https://example.com/next".to_string(),
            depth: 1,
            priority: 5,
            state: EntryState::Pending,
            parent: None,
        }]);
        assert_eq!(restored, 1);
        assert_eq!(q.stats().pending, 1);
    }
}
