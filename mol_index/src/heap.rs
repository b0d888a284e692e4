use std::cmp::Ordering;

use crate::data::CompoundIndex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredHit {
    pub id: CompoundIndex,
    pub score: f32,
}

impl ScoredHit {

    //higher score first, lower id breaks ties
    fn outranks(&self, other: &ScoredHit) -> bool {
        self.score > other.score || (self.score == other.score && self.id < other.id)
    }
}

///struct for keeping scored candidates until they can be released in order
///
///binary max-heap over a flat array: `entries[i]` outranks both of its children
#[derive(Debug, Clone, Default)]
pub struct TopHits {
    entries: Vec<ScoredHit>,
}

impl TopHits {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peek(&self) -> Option<&ScoredHit> {
        self.entries.first()
    }

    pub fn push(&mut self, id: CompoundIndex, score: f32) {

        self.entries.push(ScoredHit { id, score });

        let mut child = self.entries.len() - 1;
        while child > 0 {
            let parent = (child - 1) / 2;
            if !self.entries[child].outranks(&self.entries[parent]) {
                break;
            }
            self.entries.swap(child, parent);
            child = parent;
        }
    }

    pub fn pop(&mut self) -> Option<ScoredHit> {

        if self.entries.is_empty() {
            return None;
        }

        let top = self.entries.swap_remove(0);
        let len = self.entries.len();
        let mut parent = 0;

        loop {
            let left = 2 * parent + 1;
            let right = left + 1;
            let mut best = parent;

            if left < len && self.entries[left].outranks(&self.entries[best]) {
                best = left;
            }
            if right < len && self.entries[right].outranks(&self.entries[best]) {
                best = right;
            }
            if best == parent {
                break;
            }

            self.entries.swap(parent, best);
            parent = best;
        }

        Some(top)
    }

    /// Pops the head if its score is at least `bound`.
    pub fn pop_at_least(&mut self, bound: f32) -> Option<ScoredHit> {

        match self.peek() {
            Some(hit) if hit.score >= bound => self.pop(),
            _ => None,
        }
    }

    /// Keeps only the `len` best hits.
    pub fn truncate(&mut self, len: usize) {

        if self.entries.len() <= len {
            return;
        }

        //a descending array is a valid heap
        self.entries.sort_unstable_by(|a, b| {
            if a.outranks(b) {
                Ordering::Less
            } else if b.outranks(a) {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        });
        self.entries.truncate(len);
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use rand::prelude::*;

    #[test]
    fn drains_in_non_increasing_order() {

        let mut rng = StdRng::seed_from_u64(5);

        for size in [0usize, 1, 2, 17, 500] {
            let mut heap = TopHits::with_capacity(size);
            for id in 0..size {
                heap.push(id as CompoundIndex, rng.gen_range(0..20) as f32 / 20.0);
            }
            assert_eq!(heap.len(), size);

            let mut drained: Vec<ScoredHit> = Vec::new();
            while let Some(hit) = heap.pop() {
                drained.push(hit);
            }

            assert_eq!(drained.len(), size);
            for pair in drained.windows(2) {
                assert!(pair[0].score >= pair[1].score);
                if pair[0].score == pair[1].score {
                    assert!(pair[0].id < pair[1].id);
                }
            }
        }
    }

    #[test]
    fn pop_at_least_respects_bound() {

        let mut heap = TopHits::new();
        heap.push(1, 0.5);
        heap.push(2, 0.9);
        heap.push(3, 0.7);

        assert_eq!(heap.pop_at_least(0.8).map(|h| h.id), Some(2));
        assert_eq!(heap.pop_at_least(0.8), None);
        assert_eq!(heap.pop_at_least(0.7).map(|h| h.id), Some(3));
        assert_eq!(heap.peek().map(|h| h.id), Some(1));
    }

    #[test]
    fn truncate_keeps_best() {

        let mut rng = StdRng::seed_from_u64(11);
        let mut heap = TopHits::new();
        let mut scores: Vec<(CompoundIndex, f32)> = Vec::new();

        for id in 0..100 {
            let score = rng.gen_range(0..10) as f32 / 10.0;
            heap.push(id, score);
            scores.push((id, score));
        }

        heap.truncate(8);
        heap.truncate(20);
        assert_eq!(heap.len(), 8);

        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
        heap.push(500, 2.0);

        assert_eq!(heap.pop().map(|h| h.id), Some(500));
        for &(id, _) in scores.iter().take(8) {
            assert_eq!(heap.pop().map(|h| h.id), Some(id));
        }
        assert!(heap.is_empty());
    }
}
