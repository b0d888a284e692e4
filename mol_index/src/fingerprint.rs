//! Fingerprint generators: molecule -> sorted set of integer feature ids.
//!
//! Every generator here is monotone under substructure: a feature emitted for a query is
//! emitted for any target without pseudo atoms that contains the query. Features are built
//! from concrete heavy atoms only, so they do not depend on whether a molecule was decoded
//! in compact or extended mode.

use std::sync::OnceLock;

use log::warn;

use crate::cancel::Cancellation;
use crate::config::{IndexConfig, SearchMode};
use crate::encode::MoleculeBuilder;
use crate::matcher::{MatchOptions, Matcher};
use crate::molecule::{
    is_pseudo, Molecule, BOND_AROMATIC, BOND_DOUBLE, BOND_SINGLE, BOND_TRIPLE, CARBON, HETEROATOM, HYDROGEN,
    PSEUDO_ATOM,
};

pub trait FingerprintGenerator: Send + Sync {

    /// Number of distinct feature ids; every id is below this.
    fn size(&self) -> usize;

    /// Sorted, deduplicated feature ids of `molecule`.
    fn features(&self, molecule: &Molecule) -> Vec<u32>;

    /// Features used to prefilter a query. Defaults to the full set.
    fn query_features(&self, molecule: &Molecule) -> Vec<u32> {
        self.features(molecule)
    }
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a_init() -> u64 {
    FNV_OFFSET
}

fn fnv1a_update(hash: u64, value: u64) -> u64 {

    let mut h = hash;
    for &b in value.to_le_bytes().iter() {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

fn fold_hash(hash: u64, bits: usize) -> u32 {
    (hash % bits as u64) as u32
}

fn concrete_heavy(molecule: &Molecule, atom: usize) -> bool {

    let n = molecule.atomic_number(atom);
    !is_pseudo(n) && n != HYDROGEN
}

/// Hashed linear paths of concrete heavy atoms, up to `path_length` bonds.
#[derive(Debug, Clone)]
pub struct PathFingerprint {
    bits: usize,
    path_length: usize,
}

impl PathFingerprint {

    pub fn new(bits: usize, path_length: usize) -> Self {
        Self { bits: bits.max(1), path_length }
    }

    fn walk(&self, molecule: &Molecule, tokens: &mut Vec<u64>, visited: &mut [bool], last: usize, out: &mut Vec<u32>) {

        out.push(self.hash_path(tokens));

        if tokens.len() / 2 == self.path_length {
            return;
        }

        for &bond in molecule.bonds_of(last) {
            let bond = bond as usize;
            let next = molecule.other_atom(bond, last);

            if visited[next] || !concrete_heavy(molecule, next) {
                continue;
            }

            visited[next] = true;
            tokens.push(molecule.bond_type(bond) as u64);
            tokens.push(molecule.atomic_number(next) as u8 as u64);

            self.walk(molecule, tokens, visited, next, out);

            tokens.pop();
            tokens.pop();
            visited[next] = false;
        }
    }

    //atoms and bonds alternate, so the reversed token list is the reversed path
    fn hash_path(&self, tokens: &[u64]) -> u32 {

        let mut h = fnv1a_update(fnv1a_init(), tokens.len() as u64);

        if tokens.iter().cmp(tokens.iter().rev()).is_le() {
            for &t in tokens.iter() {
                h = fnv1a_update(h, t);
            }
        } else {
            for &t in tokens.iter().rev() {
                h = fnv1a_update(h, t);
            }
        }

        fold_hash(h, self.bits)
    }
}

impl FingerprintGenerator for PathFingerprint {

    fn size(&self) -> usize {
        self.bits
    }

    fn features(&self, molecule: &Molecule) -> Vec<u32> {

        let mut out: Vec<u32> = Vec::new();
        let mut visited = vec![false; molecule.atom_count()];
        let mut tokens: Vec<u64> = Vec::with_capacity(2 * self.path_length + 1);

        for atom in 0..molecule.atom_count() {
            if !concrete_heavy(molecule, atom) {
                continue;
            }

            visited[atom] = true;
            tokens.push(molecule.atomic_number(atom) as u8 as u64);

            self.walk(molecule, &mut tokens, &mut visited, atom, &mut out);

            tokens.pop();
            visited[atom] = false;
        }

        out.sort_unstable();
        out.dedup();
        out
    }
}

const PATTERN_LEVELS: [usize; 4] = [1, 2, 4, 8];
const MAX_OCCURRENCES: usize = 8;

struct PatternEntry {
    id: usize,
    compact: Molecule,
    extended: Molecule,
}

struct PatternTable {
    entries: Vec<PatternEntry>,
    size: usize,
}

static PATTERNS: OnceLock<PatternTable> = OnceLock::new();

fn pattern_builders() -> Vec<MoleculeBuilder> {

    let pair = |a: i8, b: i8, bond: u8| MoleculeBuilder::chain(&[a, b], bond);

    let branched = |center: i8, first: (i8, u8), second: (i8, u8)| {
        let mut b = MoleculeBuilder::new();
        let c = b.add_atom(center);
        for (element, bond) in [first, second] {
            let x = b.add_atom(element);
            b.add_bond(c, x, bond);
        }
        b
    };

    vec![
        pair(CARBON, 8, BOND_DOUBLE),
        pair(CARBON, 7, BOND_TRIPLE),
        branched(CARBON, (8, BOND_DOUBLE), (8, BOND_SINGLE)),
        branched(CARBON, (8, BOND_DOUBLE), (7, BOND_SINGLE)),
        pair(16, 8, BOND_DOUBLE),
        pair(7, 8, BOND_DOUBLE),
        pair(15, 8, BOND_DOUBLE),
        pair(CARBON, CARBON, BOND_DOUBLE),
        pair(CARBON, CARBON, BOND_TRIPLE),
        MoleculeBuilder::ring(&[CARBON; 6], BOND_AROMATIC),
        pair(CARBON, 7, BOND_AROMATIC),
        MoleculeBuilder::ring(&[PSEUDO_ATOM; 5], BOND_SINGLE),
        MoleculeBuilder::ring(&[PSEUDO_ATOM; 6], BOND_SINGLE),
        pair(CARBON, 7, BOND_SINGLE),
        pair(CARBON, 8, BOND_SINGLE),
        pair(CARBON, 16, BOND_SINGLE),
        pair(CARBON, 9, BOND_SINGLE),
        pair(CARBON, 17, BOND_SINGLE),
        pair(CARBON, 35, BOND_SINGLE),
        pair(CARBON, 53, BOND_SINGLE),
        pair(CARBON, HETEROATOM, BOND_SINGLE),
    ]
}

fn build_pattern_table() -> PatternTable {

    let builders = pattern_builders();
    let size = builders.len() * PATTERN_LEVELS.len();
    let mut entries = Vec::with_capacity(builders.len());

    for (id, builder) in builders.iter().enumerate() {
        let decoded = builder.encode().and_then(|blob| {
            Ok((Molecule::decode(&blob, false, None)?, Molecule::decode(&blob, true, None)?))
        });

        match decoded {
            Ok((compact, extended)) => entries.push(PatternEntry { id, compact, extended }),
            Err(e) => warn!("skipping fingerprint pattern {}: {}", id, e),
        }
    }

    PatternTable { entries, size }
}

/// Counted occurrences of a fixed table of functional groups and rings.
///
/// The table is built on first use and shared by every generator instance.
#[derive(Debug, Clone, Default)]
pub struct PatternFingerprint;

impl PatternFingerprint {

    pub fn new() -> Self {
        Self::ensure_initialized();
        Self
    }

    pub fn ensure_initialized() {
        PATTERNS.get_or_init(build_pattern_table);
    }

    fn table() -> &'static PatternTable {
        PATTERNS.get_or_init(build_pattern_table)
    }
}

impl FingerprintGenerator for PatternFingerprint {

    fn size(&self) -> usize {
        Self::table().size
    }

    fn features(&self, molecule: &Molecule) -> Vec<u32> {

        let options = MatchOptions { mode: SearchMode::Substructure, ..MatchOptions::default() };
        let cancellation = Cancellation::none();
        let mut out = Vec::new();

        for entry in Self::table().entries.iter() {
            let pattern = if molecule.is_extended() { &entry.extended } else { &entry.compact };

            let mut matcher = match Matcher::new(pattern, options) {
                Ok(m) => m,
                Err(_) => continue,
            };

            //no deadline is armed, so the search cannot be interrupted
            let occurrences = match matcher.find_all(molecule, Some(MAX_OCCURRENCES), &cancellation) {
                Ok(x) => x,
                Err(_) => continue,
            };

            let concrete = occurrences.iter()
                .filter(|mapping| mapping.iter().all(|&a| !is_pseudo(molecule.atomic_number(a))))
                .count();

            for (level, &threshold) in PATTERN_LEVELS.iter().enumerate() {
                if concrete >= threshold {
                    out.push((entry.id * PATTERN_LEVELS.len() + level) as u32);
                }
            }
        }

        out
    }
}

/// Path features followed by pattern features, offset past the path space.
#[derive(Debug, Clone)]
pub struct CombinedFingerprint {
    path: PathFingerprint,
    pattern: PatternFingerprint,
}

impl CombinedFingerprint {

    pub fn new(bits: usize, path_length: usize) -> Self {
        Self {
            path: PathFingerprint::new(bits, path_length),
            pattern: PatternFingerprint::new(),
        }
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(config.fingerprint_bits, config.path_length)
    }
}

impl FingerprintGenerator for CombinedFingerprint {

    fn size(&self) -> usize {
        self.path.size() + self.pattern.size()
    }

    fn features(&self, molecule: &Molecule) -> Vec<u32> {

        let offset = self.path.size() as u32;
        let mut out = self.path.features(molecule);
        out.extend(self.pattern.features(molecule).into_iter().map(|f| f + offset));
        out
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn decode(builder: &MoleculeBuilder, extended: bool) -> Molecule {
        Molecule::decode(&builder.encode().unwrap(), extended, None).unwrap()
    }

    fn is_subset(small: &[u32], large: &[u32]) -> bool {
        small.iter().all(|f| large.binary_search(f).is_ok())
    }

    #[test]
    fn path_features_ignore_direction() {

        let generator = PathFingerprint::new(2048, 4);
        let forward = decode(&MoleculeBuilder::chain(&[CARBON, 7, 8], BOND_SINGLE), false);
        let backward = decode(&MoleculeBuilder::chain(&[8, 7, CARBON], BOND_SINGLE), false);

        assert_eq!(generator.features(&forward), generator.features(&backward));
    }

    #[test]
    fn path_features_are_monotone() {

        let generator = PathFingerprint::new(1024, 5);
        let propane = decode(&MoleculeBuilder::chain(&[CARBON; 3], BOND_SINGLE), false);
        let butanol = decode(&MoleculeBuilder::chain(&[CARBON, CARBON, CARBON, CARBON, 8], BOND_SINGLE), false);
        let ethanol = decode(&MoleculeBuilder::chain(&[CARBON, CARBON, 8], BOND_SINGLE), false);

        let query = generator.features(&propane);
        assert!(is_subset(&query, &generator.features(&butanol)));
        assert!(is_subset(&generator.features(&ethanol), &generator.features(&butanol)));
        assert!(!is_subset(&generator.features(&butanol), &query));
        assert!(query.iter().all(|&f| (f as usize) < generator.size()));
    }

    #[test]
    fn hydrogens_do_not_change_features() {

        let generator = CombinedFingerprint::new(1024, 5);
        let mut b = MoleculeBuilder::chain(&[CARBON, CARBON, 8], BOND_SINGLE);
        b.add_hydrogens(0, 3);
        b.add_hydrogens(1, 2);
        b.add_hydrogens(2, 1);

        assert_eq!(generator.features(&decode(&b, false)), generator.features(&decode(&b, true)));
    }

    #[test]
    fn pattern_levels_count_occurrences() {

        let generator = PatternFingerprint::new();
        let chloro = |n: usize| {
            let mut b = MoleculeBuilder::new();
            let c = b.add_atom(CARBON);
            for _ in 0..n {
                let cl = b.add_atom(17);
                b.add_bond(c, cl, BOND_SINGLE);
            }
            decode(&b, false)
        };

        //C-Cl is pattern 17
        let base = 17 * PATTERN_LEVELS.len() as u32;
        let one = generator.features(&chloro(1));
        let four = generator.features(&chloro(4));

        assert!(one.contains(&base));
        assert!(!one.contains(&(base + 1)));
        assert!(four.contains(&(base + 2)));
        assert!(!four.contains(&(base + 3)));
        assert!(is_subset(&one, &four));
    }

    #[test]
    fn pseudo_occurrences_are_not_counted() {

        let generator = PatternFingerprint::new();
        let query = decode(&MoleculeBuilder::chain(&[CARBON, PSEUDO_ATOM], BOND_DOUBLE), false);
        let features = generator.features(&query);

        //C=* would otherwise hit the carbonyl and alkene patterns
        assert!(!features.contains(&0));
        assert!(!features.contains(&(7 * PATTERN_LEVELS.len() as u32)));
    }
}
