//! One immutable version of a searchable index, and the handle that swaps versions.
//!
//! Queries hold an `Arc<Snapshot>` for their whole lifetime, so a reload never changes the
//! population under a running search.

use std::sync::{Arc, Mutex};

use log::info;

use crate::bitset::BitSet;
use crate::cancel::{CancelFlag, Cancellation};
use crate::candidate::{QueryInput, QueryPlan, SubstructureSearch};
use crate::config::{IndexConfig, SearchMode, SearchOptions};
use crate::data::SearchHit;
use crate::database::MoleculeStore;
use crate::error::{Error, Result};
use crate::fingerprint::{CombinedFingerprint, FingerprintGenerator};
use crate::index::{InvertedIndex, MemoryIndex};
use crate::io::read_index_directory;
use crate::molecule::Molecule;
use crate::similarity::SimilaritySearch;

#[derive(Debug)]
pub struct Snapshot {
    config: IndexConfig,
    store: MoleculeStore,
    index: MemoryIndex,
    generator: CombinedFingerprint,
}

impl Snapshot {

    pub fn new(config: IndexConfig, store: MoleculeStore, mut index: MemoryIndex) -> Result<Self> {

        let generator = CombinedFingerprint::from_config(&config);

        if generator.size() != index.feature_size() {
            return Err(Error::InvalidInput(format!(
                "index has {} features but the configured fingerprint has {}", index.feature_size(), generator.size()
            )));
        }

        if !index.is_finalized() {
            index.finalize();
        }

        Ok(Self { config, store, index, generator })
    }

    pub fn from_directory(directory: &str) -> Result<Self> {

        let (config, store, index) = read_index_directory(directory)?;
        Self::new(config, store, index)
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn version(&self) -> u64 {
        self.config.version
    }

    pub fn store(&self) -> &MoleculeStore {
        &self.store
    }

    pub fn index(&self) -> &MemoryIndex {
        &self.index
    }

    pub fn generator(&self) -> &CombinedFingerprint {
        &self.generator
    }

    pub fn plan(&self, inputs: &[QueryInput], options: SearchOptions) -> Result<QueryPlan> {
        QueryPlan::new(inputs, options, &self.generator)
    }

    pub fn cancellation(&self, options: &SearchOptions, flag: CancelFlag) -> Cancellation {
        Cancellation::new(flag, options.match_timeout(&self.config))
    }

    /// Lazy result stream for a prepared plan.
    pub fn substructure_search<'a>(&'a self, plan: &'a QueryPlan, cancellation: Cancellation) -> SubstructureSearch<'a, MoleculeStore, MemoryIndex> {
        SubstructureSearch::new(plan, &self.store, &self.index, cancellation)
    }

    /// Runs a substructure (or exact, per `options.mode`) search up to `options.limit` hits.
    pub fn substructure(&self, inputs: &[QueryInput], options: SearchOptions, flag: CancelFlag) -> Result<Vec<SearchHit>> {

        let cancellation = self.cancellation(&options, flag);
        let limit = options.limit.unwrap_or(usize::MAX);
        let plan = self.plan(inputs, options)?;

        self.substructure_search(&plan, cancellation)
            .take(limit)
            .collect()
    }

    pub fn exact(&self, inputs: &[QueryInput], options: SearchOptions, flag: CancelFlag) -> Result<Vec<SearchHit>> {
        self.substructure(inputs, SearchOptions { mode: SearchMode::Exact, ..options }, flag)
    }

    /// Fingerprint of a query blob, computed the way index entries are.
    pub fn fingerprint(&self, blob: &[u8]) -> Result<BitSet> {

        let molecule = Molecule::decode(blob, true, None)?;
        let features = self.generator.features(&molecule);

        Ok(BitSet::from_bits(self.index.feature_size(), features.into_iter().map(|f| f as usize)))
    }

    pub fn similarity_search(&self, blob: &[u8], cutoff: f32, top_k: Option<usize>, cancellation: Cancellation) -> Result<SimilaritySearch<'_, MemoryIndex>> {

        let query = self.fingerprint(blob)?;
        Ok(SimilaritySearch::new(&self.index, query, cutoff, top_k, cancellation))
    }

    pub fn similarity(&self, blob: &[u8], cutoff: f32, top_k: Option<usize>, flag: CancelFlag) -> Result<Vec<SearchHit>> {

        let cancellation = Cancellation::new(flag, None);
        self.similarity_search(blob, cutoff, top_k, cancellation)?.collect()
    }
}

/// Shared pointer to the current snapshot.
#[derive(Debug)]
pub struct IndexHandle {
    current: Mutex<Arc<Snapshot>>,
}

impl IndexHandle {

    pub fn new(snapshot: Snapshot) -> Self {
        Self { current: Mutex::new(Arc::new(snapshot)) }
    }

    pub fn get(&self) -> Arc<Snapshot> {

        match self.current.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Installs `snapshot` and returns the one it replaced.
    pub fn swap(&self, snapshot: Snapshot) -> Arc<Snapshot> {

        let next = Arc::new(snapshot);

        let mut guard = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        info!("index snapshot version {} -> {} ({} compounds)", guard.version(), next.version(), next.store.num_entries());
        std::mem::replace(&mut *guard, next)
    }
}
