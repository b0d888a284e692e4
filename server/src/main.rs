use mol_index::cancel::CancelFlag;
use mol_index::candidate::QueryInput;
use mol_index::config::{ChargeMode, IsotopeMode, SearchMode, SearchOptions, StereoMode};
use mol_index::data::SearchHit;
use mol_index::database::PopulationStore;
use mol_index::error::Error as IndexError;
use mol_index::snapshot::{IndexHandle, Snapshot};

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use clap::Parser;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use hyper::server::Server;
use log::{info, warn};
use serde::Serialize;

#[derive(Parser, Debug)] #[command(author, version, about, long_about = None)]
struct Args {

    //Index directory written by the builder
    #[arg(short, long)]
    directory: String,

    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    //Whole-request budget; the search is cancelled when it elapses
    #[arg(short, long, default_value_t = 30000)]
    statement_timeout_ms: u64,
}

struct ServerState {
    handle: IndexHandle,
    directory: String,
    statement_timeout: Duration,
}

#[derive(Serialize, Debug)]
struct Hit {
    index: u32,
    identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f32>,
}

#[derive(Serialize, Debug)]
struct SearchResponse {
    version: u64,
    hits: Vec<Hit>,
    elapsed_ms: u128,
    /// set when the stream ended early; `hits` holds what was found before that
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
}

/// Cancels the running search if the request future is dropped, e.g. on client disconnect.
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

enum Query {
    Substructure { limit: usize, inputs: Vec<QueryInput>, options: SearchOptions },
    Similarity { top_k: usize, cutoff: f32, blob: Vec<u8> },
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {

    let body = match serde_json::to_vec(value) {
        Ok(x) => Bytes::from(x),
        Err(e) => Bytes::from(format!("{{\"error\":\"{}\"}}", e)),
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(hyper::header::CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
    response
}

fn bad_request(message: String) -> Response<Body> {
    json_response(StatusCode::BAD_REQUEST, &ErrorResponse { error: message })
}

fn parse_enum<T: serde::de::DeserializeOwned>(key: &str, value: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).map_err(|_| format!("bad value for {}: {}", key, value))
}

/// Reads `key=value` pairs of the query string into search options.
fn parse_options(query: Option<&str>, mode: SearchMode) -> Result<(SearchOptions, Option<Duration>), String> {

    let mut options = SearchOptions { mode, ..SearchOptions::default() };
    let mut statement_timeout = None;

    for pair in query.unwrap_or("").split('&').filter(|x| !x.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));

        match key {
            "charge_mode" => options.charge_mode = parse_enum::<ChargeMode>(key, value)?,
            "isotope_mode" => options.isotope_mode = parse_enum::<IsotopeMode>(key, value)?,
            "stereo_mode" => options.stereo_mode = parse_enum::<StereoMode>(key, value)?,
            "match_timeout" => options.match_timeout = Some(value.parse::<u64>().map_err(|_| format!("bad match_timeout: {}", value))?),
            "timeout" => statement_timeout = Some(Duration::from_millis(value.parse::<u64>().map_err(|_| format!("bad timeout: {}", value))?)),
            _ => return Err(format!("unknown option: {}", key)),
        }
    }

    Ok((options, statement_timeout))
}

fn parse_blob(text: &str) -> Result<Vec<u8>, String> {
    hex::decode(text).map_err(|e| format!("bad hex blob: {}", e))
}

fn parse_query(req: &Request<Body>) -> Result<(Query, Option<Duration>), String> {

    let path = req.uri().path().to_string();
    let items: Vec<&str> = path.split('/').filter(|x| !x.is_empty()).collect();

    let parse_count = |s: &str| s.parse::<usize>().map_err(|_| format!("bad count: {}", s));

    match items.as_slice() {
        [method @ ("substructure" | "exact"), limit, blobs] => {
            let mode = if *method == "exact" { SearchMode::Exact } else { SearchMode::Substructure };
            let (mut options, statement_timeout) = parse_options(req.uri().query(), mode)?;
            let limit = parse_count(limit)?;
            options.limit = Some(limit);

            let inputs = blobs.split(',')
                .map(|b| parse_blob(b).map(QueryInput::new))
                .collect::<Result<Vec<_>, String>>()?;

            Ok((Query::Substructure { limit, inputs, options }, statement_timeout))
        },
        ["similarity", top_k, cutoff, blob] => {
            let (_, statement_timeout) = parse_options(req.uri().query(), SearchMode::Substructure)?;
            let top_k = parse_count(top_k)?;
            let cutoff = cutoff.parse::<f32>().map_err(|_| format!("bad cutoff: {}", cutoff))?;
            if !(0.0..=1.0).contains(&cutoff) {
                return Err(format!("cutoff must be within [0, 1]: {}", cutoff));
            }

            Ok((Query::Similarity { top_k, cutoff, blob: parse_blob(blob)? }, statement_timeout))
        },
        _ => Err(format!("method not recognized: {}", path)),
    }
}

fn drain<I>(stream: I) -> (Vec<SearchHit>, Option<IndexError>)
where
    I: Iterator<Item = Result<SearchHit, IndexError>>,
{
    let mut hits = Vec::new();

    for hit in stream {
        match hit {
            Ok(x) => hits.push(x),
            Err(e) => return (hits, Some(e)),
        }
    }

    (hits, None)
}

/// Runs on a blocking thread. Hits found before a stream error are kept.
fn run_query(snapshot: &Snapshot, query: Query, flag: CancelFlag) -> Result<(Vec<SearchHit>, Option<IndexError>), IndexError> {

    match query {
        Query::Substructure { limit, inputs, options } => {
            let cancellation = snapshot.cancellation(&options, flag);
            let plan = snapshot.plan(&inputs, options)?;
            Ok(drain(snapshot.substructure_search(&plan, cancellation).take(limit)))
        },
        Query::Similarity { top_k, cutoff, blob } => {
            let cancellation = snapshot.cancellation(&SearchOptions::default(), flag);
            Ok(drain(snapshot.similarity_search(&blob, cutoff, Some(top_k), cancellation)?))
        },
    }
}

async fn search(req: Request<Body>, state: Arc<ServerState>) -> Response<Body> {

    let (query, statement_timeout) = match parse_query(&req) {
        Ok(x) => x,
        Err(e) => return bad_request(e),
    };

    let snapshot = state.handle.get();
    let flag = CancelFlag::new();
    let _guard = CancelOnDrop(flag.clone());

    let timeout = statement_timeout.unwrap_or(state.statement_timeout);
    let timer_flag = flag.clone();
    let timer = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        timer_flag.cancel();
    });

    let start = Instant::now();
    let worker_snapshot = snapshot.clone();
    let result = tokio::task::spawn_blocking(move || run_query(&worker_snapshot, query, flag)).await;
    timer.abort();

    let elapsed_ms = start.elapsed().as_millis();

    match result {
        Ok(Ok((hits, error))) => {
            if let Some(e) = &error {
                warn!("search ended early after {} hits: {}", hits.len(), e);
            }

            let hits = hits.into_iter()
                .map(|hit| Hit {
                    index: hit.id,
                    identifier: snapshot.store().identifier(hit.id).map(|x| x.to_string()).unwrap_or_default(),
                    score: hit.score,
                })
                .collect();

            json_response(StatusCode::OK, &SearchResponse {
                version: snapshot.version(),
                hits,
                elapsed_ms,
                error: error.map(|e| e.to_string()),
            })
        },
        Ok(Err(e)) => bad_request(e.to_string()),
        Err(e) => json_response(StatusCode::INTERNAL_SERVER_ERROR, &ErrorResponse { error: e.to_string() }),
    }
}

async fn reload(state: Arc<ServerState>) -> Response<Body> {

    let directory = state.directory.clone();
    let loaded = tokio::task::spawn_blocking(move || Snapshot::from_directory(&directory)).await;

    match loaded {
        Ok(Ok(snapshot)) => {
            let version = snapshot.version();
            state.handle.swap(snapshot);
            json_response(StatusCode::OK, &serde_json::json!({ "version": version }))
        },
        Ok(Err(e)) => json_response(StatusCode::INTERNAL_SERVER_ERROR, &ErrorResponse { error: e.to_string() }),
        Err(e) => json_response(StatusCode::INTERNAL_SERVER_ERROR, &ErrorResponse { error: e.to_string() }),
    }
}

async fn route(req: Request<Body>, state: Arc<ServerState>) -> Result<Response<Body>, Infallible> {

    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, "/reload") => reload(state).await,
        (&Method::GET, _) => search(req, state).await,
        _ => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
            response
        },
    };

    Ok(response)
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {

    env_logger::init();

    let args = Args::parse();

    let directory = args.directory.clone();
    let snapshot = tokio::task::spawn_blocking(move || Snapshot::from_directory(&directory)).await??;

    let state = Arc::new(ServerState {
        handle: IndexHandle::new(snapshot),
        directory: args.directory.clone(),
        statement_timeout: Duration::from_millis(args.statement_timeout_ms),
    });

    // For every connection, we must make a `Service` to handle all
    // incoming HTTP requests on said connection.
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| {
            let state = state.clone();
            route(req, state)
        }))}
    });

    let addr = ([127, 0, 0, 1], args.port).into();

    let server = Server::bind(&addr).serve(make_svc);

    info!("Listening on http://{}", addr);

    server.await?;

    Ok(())
}
