mod builder;
mod cache;
mod clip;
mod coastline;
mod error;
mod geom;
mod mercator;
mod mvt;
mod options;
mod polylabel;
mod pool;
mod schema;
mod server;
mod simplify;
mod store;
#[cfg(test)]
mod testutil;
mod tile_id;

use std::process;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::cache::{Persister, TileCache};
use crate::options::Options;
use crate::pool::WorkerPool;
use crate::schema::{Schema, SchemaConfig};
use crate::server::{AppState, Prebuild, Stats};
use crate::store::Store;

fn init_logging(options: &Options) {
    let directives = std::env::var("RUST_LOG").unwrap_or("info".into());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    let builder = FmtSubscriber::builder().with_env_filter(env_filter);

    match &options.log {
        Some(path) => {
            let file = match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => file,
                Err(e) => {
                    eprintln!("cannot open log file {}: {e}", path.display());
                    process::exit(-2);
                }
            };

            builder
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => builder.init(),
    }
}

fn main() {
    let options = Options::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        process::exit(-1);
    });

    init_logging(&options);

    let world = match Store::open(&options.world) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("{e}");
            process::exit(-1);
        }
    };

    let ocean = match Store::open(&options.ocean) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("{e}");
            process::exit(-1);
        }
    };

    info!(
        "loaded {} ({} features) and {} ({} features)",
        options.world.display(),
        world.len(),
        options.ocean.display(),
        ocean.len()
    );

    if world.is_empty() {
        warn!("world snapshot contains no features");
    }

    let schema = Arc::new(Schema::new(&world, SchemaConfig::default()));

    // the single read-write handle lives on the persister thread
    let persister = match Persister::spawn(&options.db, options.maxz) {
        Ok(persister) => persister,
        Err(e) => {
            error!("error opening tile db {}: {e}", options.db.display());
            process::exit(-1);
        }
    };

    let threads = options.build_threads();
    let builders = WorkerPool::new(threads);

    if let Some(top) = options.build {
        if !top.is_valid_at(options.maxz) {
            error!("--build tile {top} exceeds --maxz {}", options.maxz);
            process::exit(-1);
        }

        let ctx = Arc::new(Prebuild {
            world,
            ocean,
            schema,
            persister,
            pool: builders,
            max_zoom: options.maxz,
            tiles_built: AtomicU64::new(0),
        });

        server::prebuild(&ctx, top);
        return;
    }

    let state = Arc::new(AppState {
        world,
        ocean,
        schema,
        cache: TileCache::new(&options.db),
        persister,
        builders: Arc::clone(&builders),
        queue: Arc::new(Mutex::new(std::collections::HashMap::new())),
        stats: Stats::default(),
        start: Instant::now(),
        max_zoom: options.maxz,
        admin_key: options.admin_key.clone(),
    });

    info!("starting with {threads} tile threads");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {e}");
            process::exit(-1);
        }
    };

    if let Err(e) = runtime.block_on(server::serve(state, options.port)) {
        error!("server error: {e}");
        process::exit(-1);
    }

    builders.request_stop(true);
    builders.join();
    info!("exiting main()");
}
