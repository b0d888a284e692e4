//! Tanimoto similarity search over bit-count buckets.
//!
//! A target with `b` features scores at most `min(q, b) / max(q, b)` against a query with
//! `q` features. Buckets are visited outward from `q`, always taking whichever frontier
//! bucket has the larger bound, so the bound of the next bucket caps every unvisited target.
//! Heap entries at or above that cap are final and are released before the bucket is read.

use std::collections::VecDeque;

use log::debug;

use crate::bitset::BitSet;
use crate::cancel::Cancellation;
use crate::data::SearchHit;
use crate::error::{Error, Result};
use crate::heap::TopHits;
use crate::index::InvertedIndex;

/// `|A & B| / (|A| + |B| - |A & B|)`; two empty fingerprints are identical.
pub fn tanimoto(a: &BitSet, b: &BitSet) -> f32 {
    tanimoto_from_counts(a.cardinality(), b.cardinality(), a.and_cardinality(b))
}

pub fn tanimoto_from_counts(a: usize, b: usize, common: usize) -> f32 {

    let union = a + b - common;
    if union == 0 {
        return 1.0;
    }
    common as f32 / union as f32
}

/// Highest score any target with `bucket` features can reach against `query` features.
pub fn bucket_bound(query: usize, bucket: usize) -> f32 {

    if query == 0 && bucket == 0 {
        return 1.0;
    }

    if bucket <= query {
        bucket as f32 / query as f32
    } else {
        query as f32 / bucket as f32
    }
}

/// Streams `(id, score)` hits in non-increasing score order.
pub struct SimilaritySearch<'a, I: InvertedIndex + ?Sized> {
    index: &'a I,
    query: BitSet,
    query_count: usize,
    cutoff: f32,
    top_k: Option<usize>,
    cancellation: Cancellation,

    //next unvisited bucket below / above the query count
    low: Option<usize>,
    high: usize,

    heap: TopHits,
    ready: VecDeque<SearchHit>,
    emitted: usize,
    scored: usize,
    finished: bool,
}

impl<'a, I: InvertedIndex + ?Sized> SimilaritySearch<'a, I> {

    pub fn new(index: &'a I, query: BitSet, cutoff: f32, top_k: Option<usize>, cancellation: Cancellation) -> Self {

        let query_count = query.cardinality();

        Self {
            index,
            query,
            query_count,
            cutoff,
            top_k,
            cancellation,
            low: Some(query_count.min(index.max_bit_count())),
            high: query_count + 1,
            heap: TopHits::with_capacity(top_k.unwrap_or(0)),
            ready: VecDeque::new(),
            emitted: 0,
            scored: 0,
            finished: false,
        }
    }

    /// The unvisited bucket with the highest bound, if that bound still reaches the cutoff.
    fn next_bucket(&self) -> Option<(usize, f32)> {

        let max = self.index.max_bit_count();

        let low = self.low.filter(|&l| l <= max).map(|l| (l, bucket_bound(self.query_count, l)));
        let high = if self.high <= max { Some((self.high, bucket_bound(self.query_count, self.high))) } else { None };

        let best = match (low, high) {
            (Some(l), Some(h)) => if l.1 >= h.1 { l } else { h },
            (Some(l), None) => l,
            (None, Some(h)) => h,
            (None, None) => return None,
        };

        if best.1 < self.cutoff { None } else { Some(best) }
    }

    fn advance_past(&mut self, bucket: usize) {

        if Some(bucket) == self.low {
            self.low = bucket.checked_sub(1);
        } else {
            self.high = bucket + 1;
        }
    }

    fn scan_bucket(&mut self, bucket: usize, bound: f32) {

        for &id in self.index.bucket(bucket) {
            let fingerprint = match self.index.fingerprint(id) {
                Some(x) => x,
                None => continue,
            };

            self.scored += 1;
            let common = self.query.and_cardinality(fingerprint);
            let score = tanimoto_from_counts(self.query_count, bucket, common);

            if score < self.cutoff {
                continue;
            }

            if score >= bound {
                self.ready.push_back(SearchHit { id, score: Some(score) });
            } else {
                self.heap.push(id, score);
                self.cap_heap();
            }
        }
    }

    /// With a top-k, drops heap entries that can no longer be emitted.
    fn cap_heap(&mut self) {

        if let Some(k) = self.top_k {
            let keep = k.saturating_sub(self.emitted + self.ready.len());
            if self.heap.len() > 2 * keep.max(16) {
                self.heap.truncate(keep);
            }
        }
    }

    fn emit(&mut self, hit: SearchHit) -> Option<Result<SearchHit>> {
        self.emitted += 1;
        Some(Ok(hit))
    }

    fn finish(&mut self) {

        if !self.finished {
            debug!("similarity search: scored {} targets, emitted {}", self.scored, self.emitted);
        }
        self.finished = true;
    }
}

impl<'a, I: InvertedIndex + ?Sized> Iterator for SimilaritySearch<'a, I> {
    type Item = Result<SearchHit>;

    fn next(&mut self) -> Option<Self::Item> {

        loop {
            if self.finished {
                return None;
            }

            if self.top_k.map_or(false, |k| self.emitted >= k) {
                self.finish();
                return None;
            }

            if let Some(hit) = self.ready.pop_front() {
                return self.emit(hit);
            }

            if self.cancellation.is_cancelled() {
                self.finish();
                return Some(Err(Error::Cancelled));
            }

            match self.next_bucket() {
                Some((bucket, bound)) => {
                    if let Some(hit) = self.heap.pop_at_least(bound) {
                        return self.emit(SearchHit { id: hit.id, score: Some(hit.score) });
                    }

                    self.advance_past(bucket);
                    self.scan_bucket(bucket, bound);
                },
                None => {
                    match self.heap.pop() {
                        Some(hit) => return self.emit(SearchHit { id: hit.id, score: Some(hit.score) }),
                        None => {
                            self.finish();
                            return None;
                        },
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::cancel::CancelFlag;
    use crate::index::MemoryIndex;
    use assert_approx_eq::assert_approx_eq;
    use rand::prelude::*;

    const BITS: usize = 64;

    fn random_features(rng: &mut StdRng) -> Vec<u32> {

        let mut features: Vec<u32> = (0..BITS as u32).filter(|_| rng.gen_bool(0.3)).collect();
        features.dedup();
        features
    }

    fn random_index(rng: &mut StdRng, n: usize) -> (MemoryIndex, Vec<BitSet>) {

        let mut index = MemoryIndex::new(BITS);
        let mut fingerprints = Vec::new();

        for id in 0..n {
            let features = random_features(rng);
            index.insert(id as u32, &features, false).unwrap();
            fingerprints.push(BitSet::from_bits(BITS, features.iter().map(|&f| f as usize)));
        }

        index.finalize();
        (index, fingerprints)
    }

    #[test]
    fn tanimoto_properties() {

        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..100 {
            let a = BitSet::from_bits(BITS, random_features(&mut rng).into_iter().map(|f| f as usize));
            let b = BitSet::from_bits(BITS, random_features(&mut rng).into_iter().map(|f| f as usize));

            let ab = tanimoto(&a, &b);
            assert_approx_eq!(ab, tanimoto(&b, &a));
            assert!((0.0..=1.0).contains(&ab));
            assert_approx_eq!(tanimoto(&a, &a), 1.0);
        }

        let left = BitSet::from_bits(BITS, [1, 2, 3]);
        let right = BitSet::from_bits(BITS, [4, 5]);
        assert_approx_eq!(tanimoto(&left, &right), 0.0);
        assert_approx_eq!(tanimoto(&left, &BitSet::from_bits(BITS, [2, 3, 4])), 0.5);
    }

    #[test]
    fn matches_brute_force() {

        let mut rng = StdRng::seed_from_u64(17);
        let (index, fingerprints) = random_index(&mut rng, 300);

        for cutoff in [0.0f32, 0.3, 0.6] {
            let query = BitSet::from_bits(BITS, random_features(&mut rng).into_iter().map(|f| f as usize));

            let mut expected: Vec<(u32, f32)> = fingerprints.iter().enumerate()
                .map(|(id, fp)| (id as u32, tanimoto(&query, fp)))
                .filter(|&(_, s)| s >= cutoff)
                .collect();
            expected.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

            let hits: Vec<SearchHit> = SimilaritySearch::new(&index, query, cutoff, None, Cancellation::none())
                .collect::<Result<Vec<_>>>()
                .unwrap();

            assert_eq!(hits.len(), expected.len());

            let mut ids: Vec<u32> = hits.iter().map(|h| h.id).collect();
            ids.sort_unstable();
            let mut expected_ids: Vec<u32> = expected.iter().map(|e| e.0).collect();
            expected_ids.sort_unstable();
            assert_eq!(ids, expected_ids);

            for pair in hits.windows(2) {
                assert!(pair[0].score >= pair[1].score);
            }
            for (hit, (_, score)) in hits.iter().zip(expected.iter()) {
                assert_approx_eq!(hit.score.unwrap(), *score);
            }
        }
    }

    #[test]
    fn top_k_returns_best_scores() {

        let mut rng = StdRng::seed_from_u64(23);
        let (index, fingerprints) = random_index(&mut rng, 200);
        let query = fingerprints[7].clone();

        let hits: Vec<SearchHit> = SimilaritySearch::new(&index, query.clone(), 0.0, Some(5), Cancellation::none())
            .collect::<Result<Vec<_>>>()
            .unwrap();

        assert_eq!(hits.len(), 5);
        assert_approx_eq!(hits[0].score.unwrap(), 1.0);

        let mut all: Vec<f32> = fingerprints.iter().map(|fp| tanimoto(&query, fp)).collect();
        all.sort_by(|a, b| b.partial_cmp(a).unwrap());
        for (hit, best) in hits.iter().zip(all.iter()) {
            assert_approx_eq!(hit.score.unwrap(), *best);
        }
    }

    #[test]
    fn top_k_caps_pending_hits() {

        let mut index = MemoryIndex::new(BITS);
        for id in 0..1000u32 {
            //every target has 8 bits, half of them shared with the query
            let shift = 4 + (id % 50);
            let features: Vec<u32> = (0..4).chain(shift..shift + 4).collect();
            index.insert(id, &features, false).unwrap();
        }
        index.finalize();

        let query = BitSet::from_bits(BITS, (0..4).chain(60..64));
        let mut search = SimilaritySearch::new(&index, query, 0.0, Some(3), Cancellation::none());

        let first = search.next().unwrap().unwrap();
        assert!(search.heap.len() <= 32);

        let mut hits = vec![first];
        hits.extend(search.by_ref().map(|hit| hit.unwrap()));
        assert_eq!(hits.len(), 3);
        for hit in hits.iter() {
            assert_approx_eq!(hit.score.unwrap(), 4.0 / 12.0);
        }
        //ties are released in id order
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn bound_covers_unvisited_buckets() {

        for q in 0..20 {
            for b in 0..40 {
                //best case: the smaller fingerprint is a subset of the larger one
                let common = q.min(b);
                assert!(tanimoto_from_counts(q, b, common) <= bucket_bound(q, b));
            }
        }
    }

    #[test]
    fn cancelled_search_ends_with_error() {

        let mut rng = StdRng::seed_from_u64(29);
        let (index, fingerprints) = random_index(&mut rng, 50);

        let flag = CancelFlag::new();
        flag.cancel();

        let mut search = SimilaritySearch::new(&index, fingerprints[0].clone(), 0.0, None, Cancellation::new(flag, None));
        assert!(matches!(search.next(), Some(Err(Error::Cancelled))));
        assert!(search.next().is_none());
    }
}
