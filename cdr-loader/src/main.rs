use std::path::PathBuf;
use std::sync::Arc;

use envconfig::Envconfig;
use eyre::Result;
use futures::future::{select, Either};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cdr_common::health::HealthRegistry;
use cdr_common::metrics::{serve, setup_metrics_recorder};
use cdr_common::sink::{PrintSink, RecordSink};
use cdr_common::store::{CdrStore, MemoryStore, PgStore};
use cdr_loader::config::{Config, StoreBackend};
use cdr_loader::cycle::{cycle_loop, Loader};
use cdr_loader::handlers;
use cdr_loader::kafka_producer::KafkaSink;

async fn build_store(config: &Config) -> Result<Arc<dyn CdrStore>> {
    match config.store_backend {
        StoreBackend::Postgres => {
            let store = PgStore::new(
                &config.database_url,
                config.max_pg_connections,
                "cdr-loader",
            )?;
            if config.run_migrations {
                store.run_migrations().await?;
                info!("database migrations applied");
            }
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("using the in-memory store, records will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn build_sink(config: &Config) -> Result<Arc<dyn RecordSink>> {
    if config.print_sink {
        return Ok(Arc::new(PrintSink {}));
    }

    Ok(Arc::new(KafkaSink::new(&config.kafka).await?))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::init_from_env()?;

    let store = build_store(&config).await?;
    let sink = build_sink(&config).await?;

    let interval = config.cycle_interval_secs.0;
    let liveness = HealthRegistry::new("liveness");
    let cycle_liveness = liveness.register("cycle_loop".to_owned(), interval * 3);

    let loader = Loader::new(PathBuf::from(&config.cdr_directory), store, sink);
    info!(
        "loading CDR files from {} every {}s",
        config.cdr_directory,
        interval.as_secs()
    );
    let cycle_loop = Box::pin(cycle_loop(loader, interval, cycle_liveness));

    let recorder_handle = setup_metrics_recorder()?;
    let app = handlers::app(liveness, Some(recorder_handle));
    let bind = config.bind();
    let http_server = Box::pin(serve(app, &bind));

    match select(http_server, cycle_loop).await {
        Either::Left((listen_result, _)) => {
            if let Err(e) = listen_result {
                error!("failed to start cdr-loader http server, {}", e);
                return Err(e.into());
            }
        }
        Either::Right((_, _)) => error!("cdr-loader cycle task exited"),
    };

    Ok(())
}
