//! Handles read and write of a whole index directory
//!
//! ```text
//! <directory>/config.yaml   IndexConfig
//! <directory>/molecules     MoleculeStore (identifiers, feature counts, blobs)
//! <directory>/index         per-compound fingerprints
//! ```
//!
//! The fingerprint file is a header (entries: u64, feature size: u32) followed by one
//! record per compound id: a flags byte, a u32 feature count and that many u32 feature ids,
//! all big-endian. Feature rows and bit-count buckets are rebuilt on load.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::info;

use crate::config::IndexConfig;
use crate::data::CompoundIndex;
use crate::database::MoleculeStore;
use crate::error::{Error, Result};
use crate::index::{InvertedIndex, MemoryIndex};
use crate::layout;

const FLAG_LIVE: u8 = 0b01;
const FLAG_WILDCARD: u8 = 0b10;

pub fn write_index(index: &MemoryIndex, filename: &str) -> Result<()> {

    let fd = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(Path::new(filename))?;

    let mut writer = BufWriter::new(fd);

    writer.write_u64::<BigEndian>(index.len() as u64)?;
    writer.write_u32::<BigEndian>(index.feature_size() as u32)?;

    for id in 0..index.len() as CompoundIndex {
        match index.fingerprint(id) {
            Some(fingerprint) => {
                let mut flags = FLAG_LIVE;
                if index.is_wildcard(id) {
                    flags |= FLAG_WILDCARD;
                }

                writer.write_u8(flags)?;
                writer.write_u32::<BigEndian>(fingerprint.cardinality() as u32)?;
                for feature in fingerprint.ones() {
                    writer.write_u32::<BigEndian>(feature as u32)?;
                }
            },
            None => {
                writer.write_u8(0)?;
                writer.write_u32::<BigEndian>(0)?;
            },
        }
    }

    writer.flush()?;
    Ok(())
}

pub fn read_index(filename: &str) -> Result<MemoryIndex> {

    let file = File::open(Path::new(filename))?;
    let file_len = file.metadata()?.len() as usize;
    let mut reader = BufReader::new(file);

    let entries = reader.read_u64::<BigEndian>()? as usize;
    let feature_size = reader.read_u32::<BigEndian>()? as usize;

    //every record is at least a flags byte and a count
    if entries > file_len.saturating_sub(layout::FP_DATA_START) / 5 {
        return Err(Error::InvalidInput(format!("{} claims {} entries in {} bytes", filename, entries, file_len)));
    }

    let mut index = MemoryIndex::new(feature_size);
    index.reserve_ids(entries)?;

    let mut features: Vec<u32> = Vec::new();

    for id in 0..entries {
        let flags = reader.read_u8()?;
        let count = reader.read_u32::<BigEndian>()? as usize;

        if count > feature_size {
            return Err(Error::InvalidInput(format!("compound {} has {} features, more than the index size {}", id, count, feature_size)));
        }

        features.clear();
        for _ in 0..count {
            features.push(reader.read_u32::<BigEndian>()?);
        }

        if flags & FLAG_LIVE != 0 {
            index.insert(id as CompoundIndex, &features, flags & FLAG_WILDCARD != 0)?;
        }
    }

    index.finalize();
    Ok(index)
}

/// Writes config, store and index into `config.directory`, creating it if needed.
pub fn write_index_directory(config: &IndexConfig, store: &MoleculeStore, index: &MemoryIndex) -> Result<()> {

    if store.num_entries() < index.len() {
        return Err(Error::InvalidInput(format!("index covers {} compounds but the store holds {}", index.len(), store.num_entries())));
    }

    std::fs::create_dir_all(&config.directory)?;

    let mut config = config.clone();
    config.num_records = Some(store.num_entries());

    config.to_file(&config.get_config_filename())?;
    store.to_file(&config.get_store_filename())?;
    write_index(index, &config.get_index_filename())?;

    info!("wrote {} compounds (version {}) to {}", store.num_entries(), config.version, config.directory);

    Ok(())
}

pub fn read_index_directory(directory: &str) -> Result<(IndexConfig, MoleculeStore, MemoryIndex)> {

    let mut config = IndexConfig::from_file(&(directory.to_string() + "/config.yaml"))?;
    //the directory may have been moved since it was written
    config.directory = directory.to_string();

    let store = MoleculeStore::from_file(&config.get_store_filename())?;
    let index = read_index(&config.get_index_filename())?;

    if store.num_entries() < index.len() {
        return Err(Error::InvalidInput(format!("index covers {} compounds but the store holds {}", index.len(), store.num_entries())));
    }

    if let Some(n) = config.num_records {
        if n != store.num_entries() {
            return Err(Error::InvalidInput(format!("config records {} compounds, store holds {}", n, store.num_entries())));
        }
    }

    info!("loaded {} compounds (version {}) from {}", store.num_entries(), config.version, directory);

    Ok((config, store, index))
}
