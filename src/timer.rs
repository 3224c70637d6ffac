//! Expiry-ordered timer list for idle-connection eviction.
//!
//! Nodes live in a [`Slab`] and are linked by index, so a [`TimerId`] stays
//! valid until its node is deleted or swept. The list is kept sorted ascending
//! by expiry; expired timers therefore always form a prefix and `sweep` stops at
//! the first live one.

use std::time::Instant;

use slab::Slab;

/// Handle to a scheduled timer. Not `Clone`: deleting consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct TimerId(usize);

struct Node<T> {
    expire: Instant,
    payload: T,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct TimerList<T> {
    nodes: Slab<Node<T>>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<T> TimerList<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Slab::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Expiry of the earliest timer.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.head.map(|h| self.nodes[h].expire)
    }

    pub fn expiry(&self, id: &TimerId) -> Instant {
        self.nodes[id.0].expire
    }

    /// Schedule `payload` at `expire`. O(1) when it becomes the new minimum,
    /// otherwise a forward scan from the head.
    pub fn add(&mut self, expire: Instant, payload: T) -> TimerId {
        let key = self.nodes.insert(Node {
            expire,
            payload,
            prev: None,
            next: None,
        });

        match self.head {
            None => {
                self.head = Some(key);
                self.tail = Some(key);
            }
            Some(head) if expire < self.nodes[head].expire => {
                self.nodes[key].next = Some(head);
                self.nodes[head].prev = Some(key);
                self.head = Some(key);
            }
            Some(head) => self.insert_after(key, head),
        }
        TimerId(key)
    }

    /// Move a timer to `expire`. When the new expiry is not before its former
    /// successor the node is unlinked and reinserted scanning forward from that
    /// successor; otherwise it stays put.
    pub fn modify(&mut self, id: &TimerId, expire: Instant) {
        let key = id.0;
        self.nodes[key].expire = expire;

        if let Some(prev) = self.nodes[key].prev
            && expire < self.nodes[prev].expire
        {
            // Moved earlier than its predecessor: full reinsert.
            self.unlink(key);
            self.relink_from_head(key);
            return;
        }

        let Some(next) = self.nodes[key].next else {
            return;
        };
        if expire < self.nodes[next].expire {
            return;
        }
        self.unlink(key);
        self.insert_after(key, next);
    }

    /// Remove a timer and hand back its payload.
    pub fn delete(&mut self, id: TimerId) -> T {
        self.unlink(id.0);
        self.nodes.remove(id.0).payload
    }

    /// Evict every timer whose expiry is `<= now`, earliest first. Returns the
    /// number evicted. The remaining timers are untouched.
    pub fn sweep<F>(&mut self, now: Instant, mut evict: F) -> usize
    where
        F: FnMut(T),
    {
        let mut evicted = 0;
        while let Some(head) = self.head {
            if now < self.nodes[head].expire {
                break;
            }
            self.unlink(head);
            let node = self.nodes.remove(head);
            evict(node.payload);
            evicted += 1;
        }
        evicted
    }

    /// In-order traversal (ascending expiry).
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// Link `key` somewhere after `start`, which must already be linked and
    /// expire no later than `key`.
    fn insert_after(&mut self, key: usize, start: usize) {
        let expire = self.nodes[key].expire;
        let mut pre = start;
        let mut cursor = self.nodes[pre].next;

        while let Some(cur) = cursor {
            if expire < self.nodes[cur].expire {
                self.nodes[pre].next = Some(key);
                self.nodes[key].prev = Some(pre);
                self.nodes[key].next = Some(cur);
                self.nodes[cur].prev = Some(key);
                return;
            }
            pre = cur;
            cursor = self.nodes[cur].next;
        }

        self.nodes[pre].next = Some(key);
        self.nodes[key].prev = Some(pre);
        self.nodes[key].next = None;
        self.tail = Some(key);
    }

    fn relink_from_head(&mut self, key: usize) {
        match self.head {
            None => {
                self.head = Some(key);
                self.tail = Some(key);
            }
            Some(head) if self.nodes[key].expire < self.nodes[head].expire => {
                self.nodes[key].next = Some(head);
                self.nodes[head].prev = Some(key);
                self.head = Some(key);
            }
            Some(head) => self.insert_after(key, head),
        }
    }

    fn unlink(&mut self, key: usize) {
        let (prev, next) = {
            let node = &self.nodes[key];
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        let node = &mut self.nodes[key];
        node.prev = None;
        node.next = None;
    }
}

impl<T> Default for TimerList<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, T> {
    list: &'a TimerList<T>,
    cursor: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Instant, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.cursor?;
        let node = &self.list.nodes[key];
        self.cursor = node.next;
        Some((node.expire, &node.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    fn order<T: Copy>(list: &TimerList<T>) -> Vec<T> {
        list.iter().map(|(_, p)| *p).collect()
    }

    fn assert_sorted<T>(list: &TimerList<T>) {
        let expiries: Vec<_> = list.iter().map(|(e, _)| e).collect();
        assert!(expiries.windows(2).all(|w| w[0] <= w[1]), "not sorted");
        assert_eq!(expiries.len(), list.len());
    }

    #[test]
    fn add_keeps_ascending_order() {
        let base = Instant::now();
        let mut list = TimerList::new();
        list.add(at(base, 5), 'b');
        list.add(at(base, 1), 'a');
        list.add(at(base, 9), 'd');
        list.add(at(base, 7), 'c');
        assert_eq!(order(&list), vec!['a', 'b', 'c', 'd']);
        assert_eq!(list.next_expiry(), Some(at(base, 1)));
    }

    #[test]
    fn equal_expiry_goes_after_existing() {
        let base = Instant::now();
        let mut list = TimerList::new();
        list.add(at(base, 3), 1);
        list.add(at(base, 3), 2);
        list.add(at(base, 3), 3);
        assert_eq!(order(&list), vec![1, 2, 3]);
    }

    #[test]
    fn modify_moves_delayed_timer_back() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let a = list.add(at(base, 1), 'a');
        list.add(at(base, 2), 'b');
        list.add(at(base, 3), 'c');

        list.modify(&a, at(base, 10));
        assert_eq!(order(&list), vec!['b', 'c', 'a']);

        let d = list.add(at(base, 4), 'd');
        list.modify(&d, at(base, 5));
        assert_eq!(order(&list), vec!['b', 'c', 'd', 'a']);
        assert_sorted(&list);
    }

    #[test]
    fn modify_earlier_than_successor_is_noop_for_position() {
        let base = Instant::now();
        let mut list = TimerList::new();
        list.add(at(base, 1), 'a');
        let b = list.add(at(base, 2), 'b');
        list.add(at(base, 9), 'c');
        list.modify(&b, at(base, 8));
        assert_eq!(order(&list), vec!['a', 'b', 'c']);
        assert_eq!(list.expiry(&b), at(base, 8));
    }

    #[test]
    fn delete_head_tail_and_middle() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let a = list.add(at(base, 1), 'a');
        let b = list.add(at(base, 2), 'b');
        let c = list.add(at(base, 3), 'c');
        let d = list.add(at(base, 4), 'd');

        assert_eq!(list.delete(b), 'b');
        assert_eq!(order(&list), vec!['a', 'c', 'd']);
        assert_eq!(list.delete(a), 'a');
        assert_eq!(list.delete(d), 'd');
        assert_eq!(order(&list), vec!['c']);
        assert_eq!(list.delete(c), 'c');
        assert!(list.is_empty());
        assert_eq!(list.next_expiry(), None);
    }

    #[test]
    fn sweep_removes_exactly_expired_prefix() {
        let base = Instant::now();
        let mut list = TimerList::new();
        for secs in [4, 1, 7, 3, 9, 3] {
            list.add(at(base, secs), secs);
        }
        let survivors_before: Vec<_> = list
            .iter()
            .filter(|(e, _)| *e > at(base, 3))
            .map(|(e, p)| (e, *p))
            .collect();

        let mut fired = Vec::new();
        let n = list.sweep(at(base, 3), |p| fired.push(p));

        assert_eq!(n, 3);
        assert_eq!(fired, vec![1, 3, 3]);
        let survivors_after: Vec<_> = list.iter().map(|(e, p)| (e, *p)).collect();
        assert_eq!(survivors_after, survivors_before);
    }

    #[test]
    fn sweep_on_empty_or_future_is_noop() {
        let base = Instant::now();
        let mut list: TimerList<u8> = TimerList::new();
        assert_eq!(list.sweep(base, |_| panic!("nothing to evict")), 0);
        list.add(at(base, 5), 1);
        assert_eq!(list.sweep(at(base, 4), |_| panic!("not expired")), 0);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn random_churn_stays_sorted() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let mut ids = Vec::new();
        // Small LCG so the sequence is reproducible.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            seed >> 33
        };

        for i in 0..500u64 {
            match next() % 4 {
                0 | 1 => ids.push(list.add(at(base, next() % 100), i)),
                2 if !ids.is_empty() => {
                    let idx = (next() as usize) % ids.len();
                    let cur = list.expiry(&ids[idx]);
                    list.modify(&ids[idx], cur + Duration::from_secs(next() % 50));
                }
                3 if !ids.is_empty() => {
                    let idx = (next() as usize) % ids.len();
                    list.delete(ids.swap_remove(idx));
                }
                _ => {}
            }
            assert_sorted(&list);
        }

        let cutoff = at(base, 60);
        let mut fired = Vec::new();
        list.sweep(cutoff, |p| fired.push(p));
        assert!(list.iter().all(|(e, _)| e > cutoff));
        assert_sorted(&list);
    }
}
