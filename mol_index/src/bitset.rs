//! Growable word-packed bit vector.
//!
//! Serves both as a molecule's raw fingerprint and as one row of the inverted index
//! (bit `i` set = compound `i` has the feature). Trailing zero words are trimmed from
//! `words_in_use` after every shrinking mutation, so popcounts and intersections only
//! touch the live prefix.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

const WORD_BITS: usize = 64;

#[inline]
fn word_index(bit: usize) -> usize {
    bit / WORD_BITS
}

#[derive(Debug, Clone, Default)]
pub struct BitSet {
    words: Vec<u64>,
    //words[words_in_use - 1] != 0 whenever words_in_use > 0
    words_in_use: usize,
}

impl BitSet {

    pub fn new() -> Self {
        Self::default()
    }

    /// Empty set pre-sized to hold `bits` bits without reallocating.
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: vec![0u64; (bits + WORD_BITS - 1) / WORD_BITS],
            words_in_use: 0,
        }
    }

    /// Set with the first `bits` bits set.
    pub fn full(bits: usize) -> Self {

        let mut set = Self::with_capacity(bits);
        let whole = bits / WORD_BITS;

        for word in set.words[..whole].iter_mut() {
            *word = u64::MAX;
        }

        if bits % WORD_BITS != 0 {
            set.words[whole] = (1u64 << (bits % WORD_BITS)) - 1;
        }

        set.words_in_use = set.words.len();
        set.recalculate_words_in_use();
        set
    }

    pub fn from_words(words: Vec<u64>) -> Self {

        let words_in_use = words.len();
        let mut set = Self { words, words_in_use };
        set.recalculate_words_in_use();
        set
    }

    /// Decodes a little-endian byte array; a trailing partial word is zero-padded.
    pub fn from_bytes(bytes: &[u8]) -> Self {

        let mut words: Vec<u64> = Vec::with_capacity((bytes.len() + 7) / 8);

        for chunk in bytes.chunks(8) {
            let mut padded = [0u8; 8];
            padded[..chunk.len()].copy_from_slice(chunk);
            words.push(LittleEndian::read_u64(&padded));
        }

        Self::from_words(words)
    }

    pub fn from_bits<I: IntoIterator<Item = usize>>(bits: usize, ones: I) -> Self {

        let mut set = Self::with_capacity(bits);
        for bit in ones {
            set.set(bit);
        }
        set
    }

    /// Capacity in bits.
    pub fn len(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    pub fn is_empty(&self) -> bool {
        self.words_in_use == 0
    }

    pub fn words(&self) -> &[u64] {
        &self.words[..self.words_in_use]
    }

    fn recalculate_words_in_use(&mut self) {

        let mut n = self.words_in_use.min(self.words.len());
        while n > 0 && self.words[n - 1] == 0 {
            n -= 1;
        }
        self.words_in_use = n;
    }

    fn ensure_words(&mut self, required: usize) {

        if self.words.len() < required {
            let grown = required.max(self.words.len() * 2);
            self.words.resize(grown, 0);
        }
    }

    pub fn set(&mut self, bit: usize) {

        let w = word_index(bit);
        self.ensure_words(w + 1);
        self.words[w] |= 1u64 << (bit % WORD_BITS);
        self.words_in_use = self.words_in_use.max(w + 1);
    }

    pub fn unset(&mut self, bit: usize) {

        debug_assert!(bit < self.len() || self.len() == 0, "unset({}) beyond capacity {}", bit, self.len());

        let w = word_index(bit);
        if w >= self.words_in_use {
            return;
        }

        self.words[w] &= !(1u64 << (bit % WORD_BITS));

        if w + 1 == self.words_in_use && self.words[w] == 0 {
            self.recalculate_words_in_use();
        }
    }

    pub fn get(&self, bit: usize) -> bool {

        let w = word_index(bit);
        w < self.words_in_use && self.words[w] & (1u64 << (bit % WORD_BITS)) != 0
    }

    pub fn clear(&mut self) {

        for word in self.words[..self.words_in_use].iter_mut() {
            *word = 0;
        }
        self.words_in_use = 0;
    }

    pub fn cardinality(&self) -> usize {

        self.words[..self.words_in_use]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum()
    }

    /// Popcount of `self & other` without materialising the intersection.
    pub fn and_cardinality(&self, other: &BitSet) -> usize {

        let n = self.words_in_use.min(other.words_in_use);

        self.words[..n]
            .iter()
            .zip(other.words[..n].iter())
            .map(|(a, b)| (a & b).count_ones() as usize)
            .sum()
    }

    /// In-place intersection.
    pub fn merge_and(&mut self, other: &BitSet) {

        let n = self.words_in_use.min(other.words_in_use);

        for (a, b) in self.words[..n].iter_mut().zip(other.words[..n].iter()) {
            *a &= b;
        }

        for word in self.words[n..self.words_in_use].iter_mut() {
            *word = 0;
        }

        self.words_in_use = n;
        self.recalculate_words_in_use();
    }

    /// In-place union, growing to fit `other`.
    pub fn merge_or(&mut self, other: &BitSet) {

        self.ensure_words(other.words_in_use);

        for (a, b) in self.words.iter_mut().zip(other.words[..other.words_in_use].iter()) {
            *a |= b;
        }

        self.words_in_use = self.words_in_use.max(other.words_in_use);
    }

    /// Overwrites `self` with `other`. Both sets must have the same capacity.
    pub fn copy_from(&mut self, other: &BitSet) -> Result<()> {

        if self.words.len() != other.words.len() {
            return Err(Error::CapacityMismatch { left: self.words.len(), right: other.words.len() });
        }

        self.words.copy_from_slice(&other.words);
        self.words_in_use = other.words_in_use;
        Ok(())
    }

    /// Index of the first set bit at or after `from`, or `None` past the last one.
    pub fn next_set_bit(&self, from: usize) -> Option<usize> {

        let mut w = word_index(from);
        if w >= self.words_in_use {
            return None;
        }

        let mut word = self.words[w] & (u64::MAX << (from % WORD_BITS));

        loop {
            if word != 0 {
                return Some(w * WORD_BITS + word.trailing_zeros() as usize);
            }

            w += 1;
            if w == self.words_in_use {
                return None;
            }
            word = self.words[w];
        }
    }

    pub fn ones(&self) -> Ones<'_> {
        Ones { set: self, next: 0 }
    }
}

impl PartialEq for BitSet {
    fn eq(&self, other: &Self) -> bool {
        self.words() == other.words()
    }
}

impl Eq for BitSet {}

/// Lazy scan over set bits. Can be repositioned with [`Ones::seek`].
#[derive(Debug, Clone)]
pub struct Ones<'a> {
    set: &'a BitSet,
    next: usize,
}

impl<'a> Ones<'a> {

    pub fn seek(&mut self, from: usize) {
        self.next = from;
    }
}

impl<'a> Iterator for Ones<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {

        let bit = self.set.next_set_bit(self.next)?;
        self.next = bit + 1;
        Some(bit)
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use rand::prelude::*;

    fn random_set(rng: &mut StdRng, bits: usize, density: f64) -> BitSet {

        let mut set = BitSet::with_capacity(bits);
        for i in 0..bits {
            if rng.gen_bool(density) {
                set.set(i);
            }
        }
        set
    }

    #[test]
    fn set_then_next_set_bit() {

        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let bit = rng.gen_range(0..5000);
            let mut set = BitSet::with_capacity(5000);
            set.set(bit);
            assert_eq!(set.next_set_bit(bit), Some(bit));
            assert_eq!(set.next_set_bit(0), Some(bit));
            assert_eq!(set.next_set_bit(bit + 1), None);
        }
    }

    #[test]
    fn unset_trims_trailing_words() {

        let mut set = BitSet::with_capacity(256);
        set.set(3);
        set.set(200);
        assert_eq!(set.words().len(), 4);

        set.unset(200);
        assert!(!set.get(200));
        assert_eq!(set.words().len(), 1);

        set.unset(3);
        assert!(set.is_empty());
        assert_eq!(set.next_set_bit(0), None);
    }

    #[test]
    fn set_grows_past_capacity() {

        let mut set = BitSet::new();
        set.set(1000);
        assert!(set.get(1000));
        assert!(set.len() > 1000);
        assert_eq!(set.cardinality(), 1);
    }

    #[test]
    fn cardinality_matches_scan() {

        let mut rng = StdRng::seed_from_u64(11);

        for density in [0.01, 0.2, 0.7] {
            let set = random_set(&mut rng, 3000, density);
            let scanned = (0..3000).filter(|&i| set.get(i)).count();
            assert_eq!(set.cardinality(), scanned);
            assert_eq!(set.ones().count(), scanned);
        }
    }

    #[test]
    fn merge_and_laws() {

        let mut rng = StdRng::seed_from_u64(13);

        for _ in 0..50 {
            let a = random_set(&mut rng, 700, 0.3);
            let b = random_set(&mut rng, 700, 0.3);

            let mut ab = a.clone();
            ab.merge_and(&b);
            let mut ba = b.clone();
            ba.merge_and(&a);
            assert_eq!(ab, ba);

            let mut aa = a.clone();
            aa.merge_and(&a);
            assert_eq!(aa, a);

            assert_eq!(a.and_cardinality(&b), ab.cardinality());
        }
    }

    #[test]
    fn merge_and_with_shorter_set_trims() {

        let mut a = BitSet::with_capacity(640);
        a.set(5);
        a.set(600);
        let mut b = BitSet::with_capacity(64);
        b.set(5);

        a.merge_and(&b);
        assert_eq!(a.words().len(), 1);
        assert_eq!(a.ones().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn copy_from_requires_equal_capacity() {

        let mut a = BitSet::with_capacity(128);
        let mut b = BitSet::with_capacity(128);
        b.set(77);
        a.copy_from(&b).unwrap();
        assert_eq!(a, b);

        let c = BitSet::with_capacity(512);
        match a.copy_from(&c) {
            Err(Error::CapacityMismatch { left: 2, right: 8 }) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn full_and_from_bytes() {

        let full = BitSet::full(130);
        assert_eq!(full.cardinality(), 130);
        assert!(full.get(129));
        assert!(!full.get(130));

        let set = BitSet::from_bytes(&[0b0000_0101, 0, 0, 0, 0, 0, 0, 0, 0x80]);
        assert_eq!(set.ones().collect::<Vec<_>>(), vec![0, 2, 71]);
    }

    #[test]
    fn ones_can_restart() {

        let set = BitSet::from_bits(300, [1, 64, 65, 299]);
        let mut ones = set.ones();
        assert_eq!(ones.next(), Some(1));
        assert_eq!(ones.next(), Some(64));
        ones.seek(66);
        assert_eq!(ones.next(), Some(299));
        assert_eq!(ones.next(), None);
        ones.seek(0);
        assert_eq!(ones.count(), 4);
    }
}
