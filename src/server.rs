//! HTTP request path and build pipeline.
//!
//! Cached tiles are answered from the thread-local read connection.
//! Misses coalesce onto a single build per tile id through the promise
//! registry; the request that created the entry persists the result and
//! removes the entry once the write lands.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::task::spawn_blocking;
use tracing::{error, info, warn};

use crate::builder::build_tile;
use crate::cache::{PersistJob, Persister, TileCache};
use crate::error::Error;
use crate::pool::WorkerPool;
use crate::schema::Schema;
use crate::store::Store;
use crate::tile_id::TileId;

const BUILD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct Stats {
    pub reqs: AtomicU64,
    pub reqsok: AtomicU64,
    pub tilesbuilt: AtomicU64,
    pub ofltiles: AtomicU64,
    pub bytesout: AtomicU64,
    pub reqscached: AtomicU64,
    pub nscached_ns: AtomicU64,
    pub nsbuilt_ns: AtomicU64,
    last_cpu_us: AtomicU64,
}

/// Shared result of an in-flight tile build; fulfilled once, observed by
/// every coalesced request.
pub struct TilePromise {
    result: Mutex<Option<Arc<Vec<u8>>>>,
    cv: Condvar,
}

impl TilePromise {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    fn fulfill(&self, bytes: Arc<Vec<u8>>) {
        *self.result.lock().unwrap() = Some(bytes);
        self.cv.notify_all();
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<Arc<Vec<u8>>> {
        let guard = self.result.lock().unwrap();

        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |r| r.is_none())
            .unwrap();

        guard.clone()
    }
}

type BuildQueue = Arc<Mutex<HashMap<TileId, Arc<TilePromise>>>>;

pub enum Fetched {
    Cached(Vec<u8>),
    Built(Arc<Vec<u8>>),
    Empty,
    Timeout,
    DbError,
}

pub struct AppState {
    pub world: Arc<Store>,
    pub ocean: Arc<Store>,
    pub schema: Arc<Schema>,
    pub cache: TileCache,
    pub persister: Persister,
    pub builders: Arc<WorkerPool>,
    pub queue: BuildQueue,
    pub stats: Stats,
    pub start: Instant,
    pub max_zoom: i8,
    pub admin_key: Option<String>,
}

impl AppState {
    /// Blocking fetch: cache lookup, then coalesced build.
    pub fn fetch_tile(&self, id: TileId, rebuild: bool) -> Fetched {
        if !rebuild {
            let t0 = Instant::now();

            match self.cache.read_tile(id) {
                Ok(Some(bytes)) => {
                    self.stats.reqscached.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .nscached_ns
                        .fetch_add(t0.elapsed().as_nanos() as u64, Ordering::Relaxed);

                    return Fetched::Cached(bytes);
                }
                Ok(None) => {}
                Err(e) => {
                    error!("error opening tile db on worker thread: {e}");
                    return Fetched::DbError;
                }
            }
        }

        let t0 = Instant::now();

        // small chance of a repeated build here, but the registry lock is
        // not worth holding across the cache query above
        let (promise, savetile) = {
            let mut queue = self.queue.lock().unwrap();

            if let Some(promise) = queue.get(&id) {
                (Arc::clone(promise), false)
            } else {
                let promise = Arc::new(TilePromise::new());

                queue.insert(id, Arc::clone(&promise));
                self.stats.tilesbuilt.fetch_add(1, Ordering::Relaxed);

                let world = Arc::clone(&self.world);
                let ocean = Arc::clone(&self.ocean);
                let schema = Arc::clone(&self.schema);
                let fulfilled = Arc::clone(&promise);

                self.builders.enqueue(move || {
                    let mvt = build_tile(&world, &ocean, &*schema, id);

                    fulfilled.fulfill(Arc::new(mvt));
                });

                (promise, true)
            }
        };

        let Some(bytes) = promise.wait_timeout(BUILD_TIMEOUT) else {
            return Fetched::Timeout; // 504 would be more correct
        };

        if bytes.is_empty() {
            // drop the registry entry so the tile can be retried later;
            // empty results are never persisted
            self.queue.lock().unwrap().remove(&id);

            return Fetched::Empty;
        }

        if savetile {
            let queue = Arc::clone(&self.queue);

            self.persister.enqueue(PersistJob {
                id,
                bytes: Arc::clone(&bytes),
                on_done: Some(Box::new(move || {
                    queue.lock().unwrap().remove(&id);
                })),
            });
        }

        self.stats
            .nsbuilt_ns
            .fetch_add(t0.elapsed().as_nanos() as u64, Ordering::Relaxed);

        Fetched::Built(bytes)
    }
}

async fn get_tile(
    State(state): State<Arc<AppState>>,
    Path((z, x, y)): Path<(i32, i32, i32)>,
    headers: HeaderMap,
) -> Response {
    state.stats.reqs.fetch_add(1, Ordering::Relaxed);

    if !(0..=30).contains(&z) {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let id = TileId::new(x, y, z as i8);

    if !id.is_valid() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    if id.z > state.max_zoom {
        return StatusCode::NOT_FOUND.into_response();
    }

    let header_is = |name: &str, value: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == value)
    };

    // X-Rebuild-Tile forces a rebuild, given a valid admin key
    let rebuild = state
        .admin_key
        .as_deref()
        .is_some_and(|key| headers.contains_key("X-Rebuild-Tile") && header_is("X-Admin-Key", key));

    let offline = header_is("X-Tile-Priority", "background");
    let hide_encoding = header_is("X-Hide-Encoding", "yes");

    let worker_state = Arc::clone(&state);
    let fetched = spawn_blocking(move || worker_state.fetch_tile(id, rebuild)).await;

    let bytes: Vec<u8> = match fetched {
        Ok(Fetched::Cached(bytes)) => bytes,
        Ok(Fetched::Built(bytes)) => bytes.to_vec(),
        Ok(Fetched::Empty) => return StatusCode::NOT_FOUND.into_response(),
        Ok(Fetched::Timeout) => return StatusCode::REQUEST_TIMEOUT.into_response(),
        Ok(Fetched::DbError) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Err(e) => {
            error!("tile worker failed for {id}: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    state.stats.reqsok.fetch_add(1, Ordering::Relaxed);
    state
        .stats
        .bytesout
        .fetch_add(bytes.len() as u64, Ordering::Relaxed);

    if offline {
        state.stats.ofltiles.fetch_add(1, Ordering::Relaxed);
    }

    let mut response_headers = HeaderMap::new();

    response_headers.insert(
        header::CONTENT_TYPE,
        "application/vnd.mapbox-vector-tile".parse().unwrap(),
    );

    // a client caching compressed tiles can suppress the header so its
    // network stack does not unzip them in transit
    if !hide_encoding {
        response_headers.insert(header::CONTENT_ENCODING, "gzip".parse().unwrap());
    }

    (StatusCode::OK, response_headers, bytes).into_response()
}

fn cpu_seconds() -> f64 {
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();

        libc::getrusage(libc::RUSAGE_SELF, &mut usage);

        let tv = |t: libc::timeval| t.tv_sec as f64 + t.tv_usec as f64 * 1e-6;

        tv(usage.ru_utime) + tv(usage.ru_stime)
    }
}

async fn get_status(State(state): State<Arc<AppState>>) -> String {
    let stats = &state.stats;
    let cpu_us = (cpu_seconds() * 1e6) as u64;
    let prev_us = stats.last_cpu_us.swap(cpu_us, Ordering::Relaxed);

    format!(
        "Uptime: {:.0} s\n\
         Reqs: {}\n\
         200 Reqs: {}\n\
         Tiles built: {}\n\
         Offline tiles: {}\n\
         Bytes out: {}\n\
         Cached reqs: {}\n\
         Cached ns: {}\n\
         Built ns: {}\n\
         CPU since last poll: {:.2} s\n",
        state.start.elapsed().as_secs_f64(),
        stats.reqs.load(Ordering::Relaxed),
        stats.reqsok.load(Ordering::Relaxed),
        stats.tilesbuilt.load(Ordering::Relaxed),
        stats.ofltiles.load(Ordering::Relaxed),
        stats.bytesout.load(Ordering::Relaxed),
        stats.reqscached.load(Ordering::Relaxed),
        stats.nscached_ns.load(Ordering::Relaxed),
        stats.nsbuilt_ns.load(Ordering::Relaxed),
        (cpu_us.saturating_sub(prev_us)) as f64 * 1e-6,
    )
}

async fn shutdown_signal(builders: Arc<WorkerPool>) {
    tokio::signal::ctrl_c().await.ok();
    info!("SIGINT: requesting shutdown (again to force exit)");
    builders.request_stop(true);

    tokio::spawn(async {
        tokio::signal::ctrl_c().await.ok();
        std::process::exit(1);
    });
}

pub async fn serve(state: Arc<AppState>, port: u16) -> Result<(), Error> {
    let builders = Arc::clone(&state.builders);

    let app = Router::new()
        .route("/v1/{z}/{x}/{y}", get(get_tile))
        .route("/status", get(get_status))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;

    info!("server listening on port {port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(builders))
        .await?;

    Ok(())
}

// Pre-build mode: build one tile and recursively its children, without
// the HTTP server.

pub struct Prebuild {
    pub world: Arc<Store>,
    pub ocean: Arc<Store>,
    pub schema: Arc<Schema>,
    pub persister: Persister,
    pub pool: Arc<WorkerPool>,
    pub max_zoom: i8,
    pub tiles_built: AtomicU64,
}

static TERMINATED: AtomicBool = AtomicBool::new(false);

fn install_prebuild_sigint(pool: Arc<WorkerPool>) {
    unsafe {
        let result = signal_hook::low_level::register(signal_hook::consts::SIGINT, || {
            if TERMINATED.swap(true, Ordering::SeqCst) {
                signal_hook::low_level::exit(1);
            }
        });

        if let Err(e) = result {
            warn!("failed to register SIGINT handler: {e}");
        }
    }

    // signal handlers must not take locks; a watcher thread performs the
    // actual stop
    std::thread::spawn(move || loop {
        if TERMINATED.load(Ordering::SeqCst) {
            warn!("SIGINT: discarding queued tiles (again to force exit)");
            pool.request_stop(true);
            return;
        }

        std::thread::sleep(Duration::from_millis(100));
    });
}

fn build_one(ctx: &Arc<Prebuild>, id: TileId) {
    info!("building {id}");
    ctx.tiles_built.fetch_add(1, Ordering::Relaxed);

    let mvt = build_tile(&ctx.world, &ctx.ocean, &*ctx.schema, id);

    if !mvt.is_empty() {
        ctx.persister.enqueue(PersistJob {
            id,
            bytes: Arc::new(mvt),
            on_done: None,
        });
    }

    if id.z < ctx.max_zoom {
        for i in 0..4 {
            enqueue_build(ctx, id.child(i, ctx.max_zoom));
        }
    }
}

fn enqueue_build(ctx: &Arc<Prebuild>, id: TileId) {
    let ctx = Arc::clone(ctx);

    ctx.pool.clone().enqueue(move || build_one(&ctx, id));
}

/// Build `top` and every descendant down to the configured max zoom,
/// persisting non-empty tiles. Returns the number of builds attempted.
pub fn prebuild(ctx: &Arc<Prebuild>, top: TileId) -> u64 {
    let t0 = Instant::now();

    install_prebuild_sigint(Arc::clone(&ctx.pool));
    enqueue_build(ctx, top);
    ctx.pool.wait_for_idle();

    let built = ctx.tiles_built.load(Ordering::Relaxed);

    info!("built {built} tiles in {:.0} s", t0.elapsed().as_secs_f64());

    built
}
