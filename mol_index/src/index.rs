//! Inverted fingerprint index: one [`BitSet`] row per feature id, bit = compound index.
//!
//! Molecules with pseudo atoms can match queries whose features they lack, so they are
//! recorded in a wildcard set that [`MemoryIndex::finalize`] ORs into every row. A feature
//! no molecule has is answered with the wildcard set alone.

use crate::bitset::BitSet;
use crate::data::CompoundIndex;
use crate::error::{Error, Result};

pub trait InvertedIndex: Send + Sync {

    /// Size of the feature space.
    fn feature_size(&self) -> usize;

    /// Compounds having `feature`; `None` means only the wildcard set.
    fn row(&self, feature: u32) -> Option<&BitSet>;

    fn wildcards(&self) -> &BitSet;

    /// Every compound that can be returned by a search.
    fn live(&self) -> &BitSet;

    fn fingerprint(&self, id: CompoundIndex) -> Option<&BitSet>;

    /// Compounds whose fingerprint has exactly `bit_count` features.
    fn bucket(&self, bit_count: usize) -> &[CompoundIndex];

    fn max_bit_count(&self) -> usize {
        self.feature_size()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    feature_size: usize,
    rows: Vec<BitSet>,
    fingerprints: Vec<BitSet>,
    buckets: Vec<Vec<CompoundIndex>>,
    wildcards: BitSet,
    live: BitSet,
    finalized: bool,
}

impl MemoryIndex {

    pub fn new(feature_size: usize) -> Self {
        Self {
            feature_size,
            rows: vec![BitSet::new(); feature_size],
            fingerprints: Vec::new(),
            buckets: vec![Vec::new(); feature_size + 1],
            wildcards: BitSet::new(),
            live: BitSet::new(),
            finalized: false,
        }
    }

    /// Number of ids covered, live or not.
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn is_wildcard(&self, id: CompoundIndex) -> bool {
        self.wildcards.get(id as usize)
    }

    /// Makes ids below `len` addressable without indexing them.
    pub fn reserve_ids(&mut self, len: usize) -> Result<()> {

        if self.fingerprints.len() < len {
            self.fingerprints.try_reserve(len - self.fingerprints.len())?;
            self.fingerprints.resize(len, BitSet::new());
        }
        Ok(())
    }

    /// Adds the postings of one compound. `features` must be sorted and unique.
    pub fn insert(&mut self, id: CompoundIndex, features: &[u32], wildcard: bool) -> Result<()> {

        let index = id as usize;

        if let Some(&bad) = features.iter().find(|&&f| f as usize >= self.feature_size) {
            return Err(Error::InvalidInput(format!("feature {} outside index of size {}", bad, self.feature_size)));
        }

        if self.live.get(index) {
            return Err(Error::InvalidInput(format!("compound {} indexed twice", id)));
        }

        self.reserve_ids(index + 1)?;

        for &feature in features {
            self.rows[feature as usize].set(index);
        }

        self.fingerprints[index] = BitSet::from_bits(self.feature_size, features.iter().map(|&f| f as usize));
        self.buckets[features.len()].push(id);

        if wildcard {
            self.wildcards.set(index);
        }
        self.live.set(index);
        self.finalized = false;

        Ok(())
    }

    /// Removes a compound's postings. Its id is not reused.
    pub fn delete(&mut self, id: CompoundIndex) {

        let index = id as usize;
        if !self.live.get(index) {
            return;
        }

        let fingerprint = std::mem::take(&mut self.fingerprints[index]);
        for feature in fingerprint.ones() {
            self.rows[feature].unset(index);
        }

        self.buckets[fingerprint.cardinality()].retain(|&x| x != id);

        if self.wildcards.get(index) {
            self.wildcards.unset(index);
            for row in self.rows.iter_mut() {
                if row.get(index) {
                    row.unset(index);
                }
            }
        }

        self.live.unset(index);
    }

    /// Moves every compound of `other` to the end of `self`; its ids shift by `self.len()`.
    pub fn append(&mut self, other: MemoryIndex) -> Result<()> {

        if other.feature_size != self.feature_size {
            return Err(Error::InvalidInput(format!("cannot merge index of size {} into {}", other.feature_size, self.feature_size)));
        }

        let offset = self.len();

        for (feature, row) in other.rows.iter().enumerate() {
            for id in row.ones() {
                self.rows[feature].set(offset + id);
            }
        }

        for id in other.wildcards.ones() {
            self.wildcards.set(offset + id);
        }
        for id in other.live.ones() {
            self.live.set(offset + id);
        }

        for (count, bucket) in other.buckets.into_iter().enumerate() {
            self.buckets[count].extend(bucket.into_iter().map(|id| id + offset as CompoundIndex));
        }

        self.fingerprints.try_reserve(other.fingerprints.len())?;
        self.fingerprints.extend(other.fingerprints);
        self.finalized = false;

        Ok(())
    }

    /// Commits pending postings: folds wildcards into every row and orders the buckets.
    pub fn finalize(&mut self) {

        if !self.wildcards.is_empty() {
            for row in self.rows.iter_mut() {
                row.merge_or(&self.wildcards);
            }
        }

        for bucket in self.buckets.iter_mut() {
            bucket.sort_unstable();
        }

        self.finalized = true;
    }
}

impl InvertedIndex for MemoryIndex {

    fn feature_size(&self) -> usize {
        self.feature_size
    }

    fn row(&self, feature: u32) -> Option<&BitSet> {

        match self.rows.get(feature as usize) {
            Some(row) if !row.is_empty() => Some(row),
            _ => None,
        }
    }

    fn wildcards(&self) -> &BitSet {
        &self.wildcards
    }

    fn live(&self) -> &BitSet {
        &self.live
    }

    fn fingerprint(&self, id: CompoundIndex) -> Option<&BitSet> {

        if !self.live.get(id as usize) {
            return None;
        }
        self.fingerprints.get(id as usize)
    }

    fn bucket(&self, bit_count: usize) -> &[CompoundIndex] {

        match self.buckets.get(bit_count) {
            Some(bucket) => bucket,
            None => &[],
        }
    }
}
