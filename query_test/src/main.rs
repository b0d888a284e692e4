use mol_index::cancel::CancelFlag;
use mol_index::candidate::QueryInput;
use mol_index::config::{SearchMode, SearchOptions};
use mol_index::database::PopulationStore;
use mol_index::snapshot::Snapshot;

use clap::Parser;
use log::info;
use std::error::Error;
use std::time::Instant;

#[derive(Parser, Debug)] #[command(author, version, about, long_about = None)]
struct Args {

    //Index directory written by the builder
    #[arg(short, long)]
    directory: String,

    //Hex encoded query blobs, comma separated variants
    #[arg(short, long)]
    query: String,

    #[arg(short, long)]
    exact: bool,

    #[arg(short, long)]
    similarity: bool,

    #[arg(short, long, default_value_t = 0.5)]
    cutoff: f32,

    #[arg(short, long, default_value_t = 10)]
    top_k: usize,

    //Result limit for substructure searches
    #[arg(short, long)]
    limit: Option<usize>,

    //Run the query this many times and log each timing
    #[arg(short, long, default_value_t = 1)]
    repeat: usize,
}

fn main() -> Result<(), Box<dyn Error>> {

    env_logger::init();

    let args = Args::parse();

    let start = Instant::now();
    let snapshot = Snapshot::from_directory(&args.directory)?;
    info!("loaded {} in {:.3}s", &args.directory, start.elapsed().as_secs_f64());

    let mut blobs: Vec<Vec<u8>> = Vec::new();
    for text in args.query.split(',') {
        blobs.push(hex::decode(text)?);
    }

    for _ in 0..args.repeat {

        let start = Instant::now();

        let hits = if args.similarity {
            snapshot.similarity(&blobs[0], args.cutoff, Some(args.top_k), CancelFlag::new())?
        } else {
            let inputs: Vec<QueryInput> = blobs.iter().cloned().map(QueryInput::new).collect();
            let mode = if args.exact { SearchMode::Exact } else { SearchMode::Substructure };
            let options = SearchOptions { mode, limit: args.limit, ..SearchOptions::default() };
            snapshot.substructure(&inputs, options, CancelFlag::new())?
        };

        let duration = start.elapsed();
        info!("{} hits: {:.6}s", hits.len(), duration.as_secs_f64());

        for hit in hits.iter() {
            let identifier = snapshot.store().identifier(hit.id).map(|x| x.to_string()).unwrap_or_default();
            match hit.score {
                Some(score) => println!("{}\t{}\t{:.4}", hit.id, identifier, score),
                None => println!("{}\t{}", hit.id, identifier),
            }
        }
    }

    Ok(())
}
