//! Parallel bulk indexing.
//!
//! Records are handed out in fixed-size chunks through one shared atomic cursor. Each worker
//! builds a private store and index per chunk; the parts are concatenated in chunk order
//! once every worker has joined, so compound ids follow input order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use log::{debug, info, warn};

use crate::data::CompoundIdentifier;
use crate::database::MoleculeStore;
use crate::error::{Error, Result};
use crate::features::FeatureCounts;
use crate::fingerprint::FingerprintGenerator;
use crate::index::MemoryIndex;
use crate::molecule::Molecule;

const CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub identifier: CompoundIdentifier,
    pub blob: Vec<u8>,
}

impl InputRecord {

    /// Parses an `identifier,hexblob` line.
    pub fn from_line(line: &str) -> Result<Self> {

        let (identifier, blob) = match line.trim().split_once(',') {
            Some(x) => x,
            None => return Err(Error::InvalidInput(format!("expected identifier,hexblob: {}", line))),
        };

        let blob = decode_hex(blob.trim())?;
        let identifier = CompoundIdentifier::from_str(identifier.trim())?;

        Ok(Self { identifier, blob })
    }
}

pub fn decode_hex(text: &str) -> Result<Vec<u8>> {
    hex::decode(text).map_err(|e| Error::InvalidInput(format!("bad hex blob ({}): {}", e, text)))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub indexed: usize,
    pub malformed: usize,
}

#[derive(Debug)]
pub struct IndexBuild {
    pub store: MoleculeStore,
    pub index: MemoryIndex,
    pub stats: IndexStats,
}

struct Part {
    chunk: usize,
    store: MoleculeStore,
    index: MemoryIndex,
    stats: IndexStats,
}

pub struct Indexer<'g> {
    generator: &'g dyn FingerprintGenerator,
    num_workers: usize,
}

impl<'g> Indexer<'g> {

    pub fn new(generator: &'g dyn FingerprintGenerator, num_workers: usize) -> Self {
        Self { generator, num_workers: num_workers.max(1) }
    }

    pub fn build(&self, records: &[InputRecord]) -> Result<IndexBuild> {

        let cursor = &AtomicUsize::new(0);
        let num_chunks = (records.len() + CHUNK_SIZE - 1) / CHUNK_SIZE;
        let num_workers = self.num_workers.min(num_chunks.max(1));

        info!("indexing {} records with {} workers", records.len(), num_workers);

        let mut parts: Vec<Part> = thread::scope(|scope| {

            let handles: Vec<_> = (0..num_workers)
                .map(|_| scope.spawn(move || self.work(records, cursor)))
                .collect();

            let mut parts = Vec::new();
            for handle in handles {
                match handle.join() {
                    Ok(result) => parts.extend(result?),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }

            Ok::<Vec<Part>, Error>(parts)
        })?;

        parts.sort_unstable_by_key(|part| part.chunk);

        let mut store = MoleculeStore::new();
        let mut index = MemoryIndex::new(self.generator.size());
        let mut stats = IndexStats::default();

        for part in parts {
            store.append(part.store)?;
            index.append(part.index)?;
            index.reserve_ids(store.num_entries())?;

            stats.indexed += part.stats.indexed;
            stats.malformed += part.stats.malformed;
        }

        index.finalize();

        info!("indexed {} records, skipped {} malformed", stats.indexed, stats.malformed);

        Ok(IndexBuild { store, index, stats })
    }

    fn work(&self, records: &[InputRecord], cursor: &AtomicUsize) -> Result<Vec<Part>> {

        let mut parts = Vec::new();
        let mut molecule = Molecule::default();

        loop {
            let start = cursor.fetch_add(CHUNK_SIZE, Ordering::Relaxed);
            if start >= records.len() {
                break;
            }

            let end = (start + CHUNK_SIZE).min(records.len());
            let mut part = Part {
                chunk: start / CHUNK_SIZE,
                store: MoleculeStore::new(),
                index: MemoryIndex::new(self.generator.size()),
                stats: IndexStats::default(),
            };

            for record in records[start..end].iter() {
                match molecule.load(&record.blob, true, None) {
                    Ok(()) => {},
                    Err(Error::Structural(reason)) => {
                        warn!("skipping {}: {}", record.identifier.to_string(), reason);
                        part.stats.malformed += 1;
                        continue;
                    },
                    Err(e) => return Err(e),
                }

                let counts = FeatureCounts::from_molecule(&molecule);
                let features = self.generator.features(&molecule);

                let id = part.store.add_entry(record.identifier.clone(), &record.blob, counts)?;
                part.index.insert(id, &features, molecule.has_pseudo_atoms())?;
                part.stats.indexed += 1;
            }

            debug!("chunk {} done: {:?}", part.chunk, part.stats);
            parts.push(part);
        }

        Ok(parts)
    }
}
