//! Chemical substructure and similarity search over an in-memory compound index.
//!
//! Molecules are stored as compact binary blobs (see [`layout`]) and decoded on demand into
//! [`molecule::Molecule`] graphs. A substructure query is answered in two phases: an inverted
//! fingerprint index narrows the population to candidates that have every query feature,
//! then a VF2-style [`matcher::Matcher`] verifies each candidate. Similarity queries rank
//! compounds by Tanimoto score, visiting fingerprint bit-count buckets in order of their
//! score bound so hits stream out best first.
//!
//! Indexes are built in parallel by [`indexer::Indexer`], persisted as a directory (see
//! [`io`]) and served through [`snapshot::IndexHandle`], which swaps whole versions while
//! running queries keep the version they started on.
//!
//! TODO
//! - [x] substructure, exact and similarity search
//! - [x] parallel bulk indexing
//! - [x] server with whole index in memory
//! - [ ] incremental append to a persisted index without a full rebuild
//!
pub mod bitset;
pub mod cancel;
pub mod candidate;
pub mod config;
pub mod data;
pub mod database;
pub mod encode;
pub mod error;
pub mod features;
pub mod fingerprint;
pub mod heap;
pub mod index;
pub mod indexer;
pub mod io;
pub mod layout;
pub mod matcher;
pub mod molecule;
pub mod similarity;
pub mod snapshot;
pub mod stereo;
