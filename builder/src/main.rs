use mol_index::config::IndexConfig;
use mol_index::fingerprint::CombinedFingerprint;
use mol_index::indexer::{InputRecord, Indexer};
use mol_index::io::write_index_directory;

use kdam::tqdm;
use glob::glob;
use log::{info, warn};
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead};
use std::path::Path;
use std::time::Instant;

// Returns an Iterator to the Reader of the lines of the file.
fn read_lines<P>(filename: P) -> io::Result<io::Lines<io::BufReader<File>>>
where P: AsRef<Path>, {
    let file = File::open(filename)?;
    Ok(io::BufReader::new(file).lines())
}

use clap::Parser;
#[derive(Parser, Debug)] #[command(author, version, about, long_about = None)]
struct Args {

    //Input files with one `identifier,hexblob` line per molecule
    #[arg(short, long)]
    input_glob: String,

    //Index directory to create or overwrite
    #[arg(short, long)]
    output_dirname: String,

    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    //Size of the hashed path feature space
    #[arg(long, default_value_t = 1024)]
    fingerprint_bits: usize,

    //Longest path, in bonds, hashed into a feature
    #[arg(long, default_value_t = 5)]
    path_length: usize,

    //Default per-match timeout stored with the index
    #[arg(long)]
    match_timeout_ms: Option<u64>,

    #[arg(long, default_value_t = 0)]
    index_version: u64,
}

fn read_records(pattern: &str) -> Result<Vec<InputRecord>, Box<dyn Error>> {

    let mut filenames: Vec<String> = Vec::new();
    for entry in glob(pattern)? {
        filenames.push(entry?.to_string_lossy().into_owned());
    }
    filenames.sort();

    if filenames.is_empty() {
        return Err(format!("no input files match {}", pattern).into());
    }

    let mut records: Vec<InputRecord> = Vec::new();
    let mut skipped = 0;

    for filename in filenames.iter() {
        info!("reading {}", filename);

        for line in tqdm!(read_lines(filename)?) {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            match InputRecord::from_line(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("skipping line in {}: {}", filename, e);
                    skipped += 1;
                },
            }
        }
    }

    info!("read {} records from {} files, skipped {} lines", records.len(), filenames.len(), skipped);

    Ok(records)
}

fn main() -> Result<(), Box<dyn Error>> {

    env_logger::init();

    let args = Args::parse();

    let mut config = IndexConfig::default();
    config.directory = args.output_dirname.clone();
    config.fingerprint_bits = args.fingerprint_bits;
    config.path_length = args.path_length;
    config.num_workers = args.workers;
    config.version = args.index_version;
    if args.match_timeout_ms.is_some() {
        config.match_timeout_ms = args.match_timeout_ms;
    }

    let records = read_records(&args.input_glob)?;

    let start = Instant::now();

    let generator = CombinedFingerprint::from_config(&config);
    let build = Indexer::new(&generator, config.num_workers).build(&records)?;

    info!("indexed {} compounds in {:.2}s ({} malformed)", build.stats.indexed, start.elapsed().as_secs_f64(), build.stats.malformed);

    write_index_directory(&config, &build.store, &build.index)?;

    Ok(())
}
