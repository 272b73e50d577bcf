use deltafi_domain::{ContentStorage, DeltaFileRepository, InMemoryContentStorage};
use deltafi_orchestrator::{configured_policies, scheduler, CoreConfig, CoreContext};
use deltafi_queue::{ActionQueueClient, InMemoryKeyedQueue, RedisKeyedQueue};
use flow::{FlowDefinitionSource, InMemoryFlowSource, JsonFileFlowSource};
use std::error::Error;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Conexiones máximas del pool de Redis.
const REDIS_POOL_SIZE: u32 = 8;

/// Arranca el núcleo: almacén de DeltaFiles (SQLite o Postgres con `pg`),
/// cola de acciones (Redis si `DELTAFI_QUEUE_URL` está definida, en memoria
/// si no) y los loops periódicos. Termina con Ctrl-C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    // los crates del núcleo loguean con `log`; el subscriber los recoge
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();

    let config = CoreConfig::from_env()?;
    let repo: Arc<dyn DeltaFileRepository> = Arc::new(deltafi_persistence::new_from_env()?);
    let queue = build_queue(&config)?;
    let flow_source = build_flow_source(&config);
    let policies = configured_policies(&config)?;
    log::info!("sistema '{}': {} políticas de borrado", config.system_name, policies.len());

    let ctx = CoreContext::new(config, repo, queue, flow_source, build_content_storage(), policies)?;
    let handle = scheduler::spawn(Arc::new(ctx));

    tokio::signal::ctrl_c().await?;
    log::info!("señal de salida recibida, deteniendo loops");
    handle.shutdown().await;
    Ok(())
}

fn build_queue(config: &CoreConfig) -> Result<ActionQueueClient, Box<dyn Error>> {
    match &config.queue_url {
        Some(url) => {
            log::info!("cola de acciones en Redis");
            Ok(ActionQueueClient::new(Arc::new(RedisKeyedQueue::new(url, REDIS_POOL_SIZE)?)))
        }
        None => {
            log::warn!("DELTAFI_QUEUE_URL sin definir: cola en memoria, los workers externos no la verán");
            Ok(ActionQueueClient::new(Arc::new(InMemoryKeyedQueue::new())))
        }
    }
}

fn build_content_storage() -> Arc<dyn ContentStorage> {
    log::warn!("almacenamiento de contenido en memoria: el borrado sólo purga lo ingresado por este proceso");
    Arc::new(InMemoryContentStorage::new())
}

fn build_flow_source(config: &CoreConfig) -> Arc<dyn FlowDefinitionSource> {
    match &config.flows_path {
        Some(path) => Arc::new(JsonFileFlowSource::new(path)),
        None => {
            log::warn!("DELTAFI_FLOWS_PATH sin definir: no hay flujos configurados");
            Arc::new(InMemoryFlowSource::default())
        }
    }
}
