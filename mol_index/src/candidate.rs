//! Filter-then-verify substructure search.
//!
//! For each query variant the candidate set starts as the compounds not yet matched by an
//! earlier variant, is narrowed by the index row of every query feature and then pruned by
//! feature-count lower bounds. Survivors are decoded one at a time into a reused
//! [`Molecule`] and handed to the [`Matcher`].

use log::{debug, warn};

use crate::bitset::BitSet;
use crate::cancel::Cancellation;
use crate::config::SearchOptions;
use crate::data::{CompoundIndex, SearchHit};
use crate::database::PopulationStore;
use crate::error::{Error, Interrupt, Result};
use crate::features::FeatureCounts;
use crate::fingerprint::FingerprintGenerator;
use crate::index::InvertedIndex;
use crate::matcher::{MatchOptions, MatchOutcome, Matcher};
use crate::molecule::{needs_extended_search, Molecule};

/// One disjunctive form of a query, decoded with everything the prefilter needs.
#[derive(Debug, Clone)]
pub struct QueryVariant {
    molecule: Molecule,
    features: Vec<u32>,
    counts: FeatureCounts,
}

impl QueryVariant {

    pub fn new(blob: &[u8], rest_h: Option<&[bool]>, generator: &dyn FingerprintGenerator) -> Result<Self> {

        let extended = needs_extended_search(blob)?;
        let molecule = Molecule::decode(blob, extended, rest_h)?;
        let features = generator.query_features(&molecule);
        let counts = FeatureCounts::from_molecule(&molecule);

        Ok(Self { molecule, features, counts })
    }

    pub fn molecule(&self) -> &Molecule {
        &self.molecule
    }

    pub fn features(&self) -> &[u32] {
        &self.features
    }

    pub fn counts(&self) -> &FeatureCounts {
        &self.counts
    }

    /// Targets must be decoded in this mode.
    pub fn is_extended(&self) -> bool {
        self.molecule.is_extended()
    }
}

/// Query input as received from a caller: the blob and its optional restH flags.
#[derive(Debug, Clone, Default)]
pub struct QueryInput {
    pub blob: Vec<u8>,
    pub rest_h: Option<Vec<bool>>,
}

impl QueryInput {

    pub fn new(blob: Vec<u8>) -> Self {
        Self { blob, rest_h: None }
    }
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    variants: Vec<QueryVariant>,
    options: SearchOptions,
}

impl QueryPlan {

    pub fn new(inputs: &[QueryInput], options: SearchOptions, generator: &dyn FingerprintGenerator) -> Result<Self> {

        if inputs.is_empty() {
            return Err(Error::InvalidInput("query has no variants".to_string()));
        }

        let mut variants = Vec::with_capacity(inputs.len());
        let mut last_error = None;

        for (i, input) in inputs.iter().enumerate() {
            match QueryVariant::new(&input.blob, input.rest_h.as_deref(), generator) {
                Ok(variant) => variants.push(variant),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("skipping query variant {}: {}", i, e);
                    last_error = Some(e);
                },
            }
        }

        //every variant was malformed
        if variants.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        Ok(Self { variants, options })
    }

    pub fn variants(&self) -> &[QueryVariant] {
        &self.variants
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub prefiltered: usize,
    pub pruned: usize,
    pub verified: usize,
    pub matched: usize,
    pub malformed: usize,
    pub timed_out: usize,
}

/// Streams matching compounds, variant by variant. Each compound is emitted at most once.
pub struct SubstructureSearch<'a, S: PopulationStore + ?Sized, I: InvertedIndex + ?Sized> {
    plan: &'a QueryPlan,
    store: &'a S,
    index: &'a I,
    cancellation: Cancellation,

    unmatched: BitSet,
    candidates: BitSet,

    variant: usize,
    matcher: Option<Matcher<'a>>,
    cursor: usize,

    //decode buffer reused for every candidate
    target: Molecule,

    variant_stats: SearchStats,
    stats: SearchStats,
    finished: bool,
}

impl<'a, S: PopulationStore + ?Sized, I: InvertedIndex + ?Sized> SubstructureSearch<'a, S, I> {

    pub fn new(plan: &'a QueryPlan, store: &'a S, index: &'a I, cancellation: Cancellation) -> Self {

        let unmatched = index.live().clone();
        let candidates = unmatched.clone();

        Self {
            plan,
            store,
            index,
            cancellation,
            unmatched,
            candidates,
            variant: 0,
            matcher: None,
            cursor: 0,
            target: Molecule::default(),
            variant_stats: SearchStats::default(),
            stats: SearchStats::default(),
            finished: false,
        }
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Prefilters the candidate set of the current variant and arms its matcher.
    fn start_variant(&mut self) -> Result<()> {

        let plan = self.plan;
        let variant = &plan.variants[self.variant];

        self.candidates.copy_from(&self.unmatched)?;

        for &feature in variant.features.iter() {
            if self.candidates.is_empty() {
                break;
            }

            match self.index.row(feature) {
                Some(row) => self.candidates.merge_and(row),
                None => self.candidates.merge_and(self.index.wildcards()),
            }
        }

        self.variant_stats = SearchStats { prefiltered: self.candidates.cardinality(), ..SearchStats::default() };
        self.cursor = 0;
        self.matcher = Some(Matcher::new(&variant.molecule, MatchOptions::from(&plan.options))?);

        debug!("variant {}: {} features, {} candidates after prefilter", self.variant, variant.features.len(), self.variant_stats.prefiltered);

        Ok(())
    }

    fn end_variant(&mut self) {

        let s = self.variant_stats;
        debug!(
            "variant {}: {} pruned by counts, {} verified, {} matched, {} malformed, {} timed out",
            self.variant, s.pruned, s.verified, s.matched, s.malformed, s.timed_out
        );

        self.stats.prefiltered += s.prefiltered;
        self.stats.pruned += s.pruned;
        self.stats.verified += s.verified;
        self.stats.matched += s.matched;
        self.stats.malformed += s.malformed;
        self.stats.timed_out += s.timed_out;

        self.matcher = None;
        self.variant += 1;
    }

    fn fail(&mut self, error: Error) -> Option<Result<SearchHit>> {
        self.finished = true;
        Some(Err(error))
    }

    /// Decodes and matches one candidate. `Ok(None)` skips it.
    fn verify(&mut self, id: CompoundIndex) -> Result<Option<SearchHit>> {

        let (plan, store) = (self.plan, self.store);
        let variant = &plan.variants[self.variant];

        if let Some(counts) = store.feature_counts(id) {
            if !counts.may_contain(&variant.counts) {
                self.variant_stats.pruned += 1;
                return Ok(None);
            }
        }

        let blob = match store.blob(id) {
            Some(x) => x,
            None => {
                warn!("compound {} is indexed but missing from the store", id);
                self.variant_stats.malformed += 1;
                return Ok(None);
            },
        };

        match self.target.load(blob, variant.is_extended(), None) {
            Ok(()) => {},
            Err(Error::Structural(reason)) => {
                warn!("skipping compound {}: {}", id, reason);
                self.variant_stats.malformed += 1;
                return Ok(None);
            },
            Err(e) => return Err(e),
        }

        let matcher = match self.matcher.as_mut() {
            Some(x) => x,
            None => return Ok(None),
        };

        self.variant_stats.verified += 1;

        match matcher.is_match(&self.target, &self.cancellation) {
            MatchOutcome::Match => {
                self.variant_stats.matched += 1;
                self.unmatched.unset(id as usize);
                Ok(Some(SearchHit { id, score: None }))
            },
            MatchOutcome::NoMatch => Ok(None),
            MatchOutcome::Inconclusive(Interrupt::TimedOut) => {
                warn!("match against compound {} timed out, skipping", id);
                self.variant_stats.timed_out += 1;
                Ok(None)
            },
            MatchOutcome::Inconclusive(Interrupt::Cancelled) => Err(Error::Cancelled),
        }
    }
}

impl<'a, S: PopulationStore + ?Sized, I: InvertedIndex + ?Sized> Iterator for SubstructureSearch<'a, S, I> {
    type Item = Result<SearchHit>;

    fn next(&mut self) -> Option<Self::Item> {

        loop {
            if self.finished {
                return None;
            }

            if self.matcher.is_none() {
                if self.variant >= self.plan.variants.len() {
                    self.finished = true;
                    debug!("substructure search done: {:?}", self.stats);
                    return None;
                }

                if let Err(e) = self.start_variant() {
                    return self.fail(e);
                }
            }

            if self.cancellation.is_cancelled() {
                return self.fail(Error::Cancelled);
            }

            let id = match self.candidates.next_set_bit(self.cursor) {
                Some(x) => x,
                None => {
                    self.end_variant();
                    continue;
                },
            };
            self.cursor = id + 1;

            match self.verify(id as CompoundIndex) {
                Ok(Some(hit)) => return Some(Ok(hit)),
                Ok(None) => {},
                Err(e) => return self.fail(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::cancel::CancelFlag;
    use crate::config::SearchMode;
    use crate::data::CompoundIdentifier;
    use crate::database::MoleculeStore;
    use crate::encode::MoleculeBuilder;
    use crate::fingerprint::PathFingerprint;
    use crate::index::MemoryIndex;
    use crate::molecule::{BOND_DOUBLE, BOND_SINGLE, CARBON, PSEUDO_ATOM};
    use std::time::Duration;

    const N: i8 = 7;
    const O: i8 = 8;

    fn population(molecules: &[MoleculeBuilder], generator: &dyn FingerprintGenerator) -> (MoleculeStore, MemoryIndex) {

        let mut store = MoleculeStore::new();
        let mut index = MemoryIndex::new(generator.size());

        for builder in molecules {
            let blob = builder.encode().unwrap();
            let molecule = Molecule::decode(&blob, true, None).unwrap();
            let counts = FeatureCounts::from_molecule(&molecule);
            let id = store.add_entry(CompoundIdentifier::random(), &blob, counts).unwrap();
            index.insert(id, &generator.features(&molecule), molecule.has_pseudo_atoms()).unwrap();
        }

        index.finalize();
        (store, index)
    }

    fn search(query: &[MoleculeBuilder], options: SearchOptions, store: &MoleculeStore, index: &MemoryIndex, generator: &dyn FingerprintGenerator) -> Vec<CompoundIndex> {

        let inputs: Vec<QueryInput> = query.iter().map(|b| QueryInput::new(b.encode().unwrap())).collect();
        let plan = QueryPlan::new(&inputs, options, generator).unwrap();

        SubstructureSearch::new(&plan, store, index, Cancellation::none())
            .map(|hit| hit.unwrap().id)
            .collect()
    }

    #[test]
    fn variants_are_disjunctive() {

        let generator = PathFingerprint::new(256, 4);
        let (store, index) = population(&[
            MoleculeBuilder::chain(&[CARBON, O], BOND_SINGLE),
            MoleculeBuilder::chain(&[CARBON, N], BOND_SINGLE),
            MoleculeBuilder::chain(&[CARBON, CARBON], BOND_SINGLE),
            MoleculeBuilder::chain(&[N, CARBON, O], BOND_SINGLE),
        ], &generator);

        let hits = search(&[
            MoleculeBuilder::chain(&[CARBON, O], BOND_SINGLE),
            MoleculeBuilder::chain(&[CARBON, N], BOND_SINGLE),
        ], SearchOptions::default(), &store, &index, &generator);

        //compound 3 matches both variants but is emitted once
        let mut sorted = hits.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), hits.len());
        assert_eq!(sorted, vec![0, 1, 3]);
    }

    #[test]
    fn pseudo_atom_targets_survive_prefilter() {

        let generator = PathFingerprint::new(256, 4);
        let (store, index) = population(&[
            MoleculeBuilder::chain(&[CARBON, PSEUDO_ATOM], BOND_DOUBLE),
            MoleculeBuilder::chain(&[CARBON, CARBON], BOND_SINGLE),
        ], &generator);

        let hits = search(&[MoleculeBuilder::chain(&[CARBON, O], BOND_DOUBLE)], SearchOptions::default(), &store, &index, &generator);
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn exact_mode_requires_whole_graph() {

        let generator = PathFingerprint::new(256, 4);
        let (store, index) = population(&[
            MoleculeBuilder::chain(&[CARBON, O], BOND_SINGLE),
            MoleculeBuilder::chain(&[CARBON, CARBON, O], BOND_SINGLE),
        ], &generator);

        let options = SearchOptions { mode: SearchMode::Exact, ..SearchOptions::default() };
        let hits = search(&[MoleculeBuilder::chain(&[CARBON, O], BOND_SINGLE)], options, &store, &index, &generator);
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn malformed_targets_are_skipped() {

        let generator = PathFingerprint::new(256, 4);
        let (mut store, mut index) = population(&[MoleculeBuilder::chain(&[CARBON, O], BOND_SINGLE)], &generator);

        let oxygen = MoleculeBuilder::chain(&[O], BOND_SINGLE).encode().unwrap();
        let decoded = Molecule::decode(&oxygen, true, None).unwrap();

        //header claims one bond that is not there
        let broken = vec![0, 1, 0, 0, 0, 0, 0, 1, 0, 0, O as u8];
        let id = store.add_entry(CompoundIdentifier::random(), &broken, FeatureCounts::from_molecule(&decoded)).unwrap();
        index.insert(id, &generator.features(&decoded), false).unwrap();
        index.finalize();

        let plan = QueryPlan::new(&[QueryInput::new(oxygen)], SearchOptions::default(), &generator).unwrap();
        let mut search = SubstructureSearch::new(&plan, &store, &index, Cancellation::none());

        let hits: Vec<CompoundIndex> = search.by_ref().map(|hit| hit.unwrap().id).collect();
        assert_eq!(hits, vec![0]);
        assert_eq!(search.stats().malformed, 1);
    }

    #[test]
    fn cancellation_ends_the_stream() {

        let generator = PathFingerprint::new(256, 4);
        let (store, index) = population(&[
            MoleculeBuilder::chain(&[CARBON, O], BOND_SINGLE),
            MoleculeBuilder::chain(&[CARBON, O], BOND_SINGLE),
        ], &generator);

        let inputs = vec![QueryInput::new(MoleculeBuilder::chain(&[CARBON, O], BOND_SINGLE).encode().unwrap())];
        let plan = QueryPlan::new(&inputs, SearchOptions::default(), &generator).unwrap();

        let flag = CancelFlag::new();
        let mut search = SubstructureSearch::new(&plan, &store, &index, Cancellation::new(flag.clone(), None));

        assert_eq!(search.next().unwrap().unwrap().id, 0);
        flag.cancel();
        assert!(matches!(search.next(), Some(Err(Error::Cancelled))));
        assert!(search.next().is_none());
    }

    #[test]
    fn empty_query_is_rejected() {

        let generator = PathFingerprint::new(64, 2);
        assert!(QueryPlan::new(&[], SearchOptions::default(), &generator).is_err());
    }

    #[test]
    fn malformed_variant_is_skipped() {

        let generator = PathFingerprint::new(256, 4);
        let (store, index) = population(&[
            MoleculeBuilder::chain(&[CARBON, O], BOND_SINGLE),
            MoleculeBuilder::chain(&[CARBON, N], BOND_SINGLE),
        ], &generator);

        let good = MoleculeBuilder::chain(&[CARBON, O], BOND_SINGLE).encode().unwrap();
        let mut truncated = MoleculeBuilder::chain(&[N, O, CARBON], BOND_SINGLE).encode().unwrap();
        truncated.truncate(truncated.len() - 4);

        let plan = QueryPlan::new(&[QueryInput::new(good), QueryInput::new(truncated.clone())], SearchOptions::default(), &generator).unwrap();
        assert_eq!(plan.variants().len(), 1);

        let hits: Vec<CompoundIndex> = SubstructureSearch::new(&plan, &store, &index, Cancellation::none())
            .map(|hit| hit.unwrap().id)
            .collect();
        assert_eq!(hits, vec![0]);

        //nothing left to search
        let only_broken = QueryPlan::new(&[QueryInput::new(truncated)], SearchOptions::default(), &generator);
        assert!(matches!(only_broken, Err(Error::Structural(_))));
    }

    #[test]
    fn timed_out_candidates_are_skipped() {

        let generator = PathFingerprint::new(256, 4);
        let rings: Vec<MoleculeBuilder> = (0..3).map(|_| MoleculeBuilder::ring(&[CARBON; 6], BOND_SINGLE)).collect();
        let (store, index) = population(&rings, &generator);

        let inputs = vec![QueryInput::new(MoleculeBuilder::chain(&[CARBON, CARBON, CARBON], BOND_SINGLE).encode().unwrap())];
        let plan = QueryPlan::new(&inputs, SearchOptions::default(), &generator).unwrap();

        let expired = Cancellation::new(CancelFlag::new(), Some(Duration::ZERO));
        let mut search = SubstructureSearch::new(&plan, &store, &index, expired);

        assert!(search.next().is_none());
        assert_eq!(search.stats().timed_out, 3);
        assert_eq!(search.stats().matched, 0);

        let hits: Vec<CompoundIndex> = SubstructureSearch::new(&plan, &store, &index, Cancellation::none())
            .map(|hit| hit.unwrap().id)
            .collect();
        assert_eq!(hits, vec![0, 1, 2]);
    }

    //one feature per element, so absent features are predictable
    struct ElementFeatures;

    impl FingerprintGenerator for ElementFeatures {

        fn size(&self) -> usize {
            128
        }

        fn features(&self, molecule: &Molecule) -> Vec<u32> {
            let mut out: Vec<u32> = (0..molecule.atom_count())
                .map(|a| molecule.atomic_number(a))
                .filter(|&n| n > 0)
                .map(|n| n as u32)
                .collect();
            out.sort_unstable();
            out.dedup();
            out
        }
    }

    #[test]
    fn unindexed_feature_leaves_only_wildcards() {

        let generator = ElementFeatures;
        let query = [MoleculeBuilder::chain(&[CARBON, N], BOND_SINGLE)];

        let (store, index) = population(&[
            MoleculeBuilder::chain(&[CARBON, O], BOND_SINGLE),
            MoleculeBuilder::chain(&[CARBON, CARBON], BOND_SINGLE),
        ], &generator);
        assert!(index.row(N as u32).is_none());

        let inputs: Vec<QueryInput> = query.iter().map(|b| QueryInput::new(b.encode().unwrap())).collect();
        let plan = QueryPlan::new(&inputs, SearchOptions::default(), &generator).unwrap();
        let mut search = SubstructureSearch::new(&plan, &store, &index, Cancellation::none());
        assert!(search.next().is_none());
        assert_eq!(search.stats().prefiltered, 0);

        let (store, index) = population(&[
            MoleculeBuilder::chain(&[CARBON, O], BOND_SINGLE),
            MoleculeBuilder::chain(&[CARBON, PSEUDO_ATOM], BOND_SINGLE),
        ], &generator);
        assert_eq!(search_ids(&plan, &store, &index), vec![1]);
    }

    fn search_ids(plan: &QueryPlan, store: &MoleculeStore, index: &MemoryIndex) -> Vec<CompoundIndex> {
        SubstructureSearch::new(plan, store, index, Cancellation::none())
            .map(|hit| hit.unwrap().id)
            .collect()
    }
}
