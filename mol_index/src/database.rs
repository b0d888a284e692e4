use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::data::{CompoundIdentifier, CompoundIndex, IDENTIFIER_SIZE};
use crate::error::{Error, Result};
use crate::features::{FeatureCounts, FEATURE_COUNT_SLOTS};

/// Source of stored molecules for the verify phase of a search.
pub trait PopulationStore: Send + Sync {

    /// Number of ids handed out; an upper bound for bitset sizing.
    fn population(&self) -> usize;

    fn blob(&self, id: CompoundIndex) -> Option<&[u8]>;

    fn identifier(&self, id: CompoundIndex) -> Option<&CompoundIdentifier>;

    fn feature_counts(&self, id: CompoundIndex) -> Option<&FeatureCounts>;
}

/// In-memory population: concatenated molecule blobs addressed by compound index.
#[derive(Debug, Clone, Default)]
pub struct MoleculeStore {
    data: Vec<u8>,
    //offsets[i]..offsets[i + 1] is molecule i
    offsets: Vec<usize>,
    identifiers: Vec<CompoundIdentifier>,
    counts: Vec<FeatureCounts>,
}

impl MoleculeStore {

    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            offsets: vec![0],
            identifiers: Vec::new(),
            counts: Vec::new(),
        }
    }

    pub fn num_entries(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    pub fn add_entry(&mut self, identifier: CompoundIdentifier, blob: &[u8], counts: FeatureCounts) -> Result<CompoundIndex> {

        let index = CompoundIndex::try_from(self.identifiers.len())
            .map_err(|_| Error::InvalidInput("molecule store is full".to_string()))?;

        self.data.try_reserve(blob.len())?;
        self.data.extend_from_slice(blob);

        if self.offsets.is_empty() {
            self.offsets.push(0);
        }
        self.offsets.push(self.data.len());
        self.identifiers.push(identifier);
        self.counts.push(counts);

        Ok(index)
    }

    /// Moves every entry of `other` to the end of `self`; its ids shift by `self.num_entries()`.
    pub fn append(&mut self, other: MoleculeStore) -> Result<()> {

        for id in 0..other.num_entries() {
            let start = other.offsets[id];
            let end = other.offsets[id + 1];
            self.add_entry(other.identifiers[id].clone(), &other.data[start..end], other.counts[id])?;
        }

        Ok(())
    }

    pub fn to_file(&self, filename: &str) -> Result<()> {

        let fd = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(Path::new(filename))?;

        let mut writer = BufWriter::new(fd);

        writer.write_u64::<BigEndian>(self.num_entries() as u64)?;

        for id in 0..self.num_entries() {
            let blob = &self.data[self.offsets[id]..self.offsets[id + 1]];

            writer.write_all(&self.identifiers[id].0)?;
            for &count in self.counts[id].0.iter() {
                writer.write_u16::<BigEndian>(count)?;
            }
            writer.write_u32::<BigEndian>(blob.len() as u32)?;
            writer.write_all(blob)?;
        }

        writer.flush()?;
        Ok(())
    }

    pub fn from_file(filename: &str) -> Result<Self> {

        let mut reader = BufReader::new(File::open(Path::new(filename))?);

        let num_entries = reader.read_u64::<BigEndian>()? as usize;
        let mut store = Self::new();
        let mut identifier = [0u8; IDENTIFIER_SIZE];
        let mut blob: Vec<u8> = Vec::new();

        for _ in 0..num_entries {
            reader.read_exact(&mut identifier)?;

            let mut counts = [0u16; FEATURE_COUNT_SLOTS];
            for count in counts.iter_mut() {
                *count = reader.read_u16::<BigEndian>()?;
            }

            let length = reader.read_u32::<BigEndian>()? as usize;
            blob.clear();
            blob.try_reserve(length)?;
            blob.resize(length, 0);
            reader.read_exact(&mut blob)?;

            store.add_entry(CompoundIdentifier(identifier), &blob, FeatureCounts(counts))?;
        }

        Ok(store)
    }
}

impl PopulationStore for MoleculeStore {

    fn population(&self) -> usize {
        self.num_entries()
    }

    fn blob(&self, id: CompoundIndex) -> Option<&[u8]> {

        let id = id as usize;
        if id >= self.num_entries() {
            return None;
        }
        Some(&self.data[self.offsets[id]..self.offsets[id + 1]])
    }

    fn identifier(&self, id: CompoundIndex) -> Option<&CompoundIdentifier> {
        self.identifiers.get(id as usize)
    }

    fn feature_counts(&self, id: CompoundIndex) -> Option<&FeatureCounts> {
        self.counts.get(id as usize)
    }
}
