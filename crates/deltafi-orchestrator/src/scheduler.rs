// Archivo: scheduler.rs
// Propósito: loops periódicos del núcleo (eventos, requeue, borrado y
// refresco de flujos) sobre tokio.
//
// Cada loop corre su tick en `spawn_blocking` porque el almacén, la cola y
// el procesamiento con rayon son bloqueantes. Los loops no se coordinan
// entre sí: la concurrencia optimista del almacén serializa las escrituras.
use crate::context::CoreContext;
use crate::retention::DeleteRunner;
use crate::service::DeltaFilesService;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle de los loops en ejecución.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Pide a los loops que terminen y espera a que lo hagan. Un tick en
    /// curso se completa antes de salir.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("loop terminado con error: {}", e);
            }
        }
    }
}

/// Arranca los cuatro loops con los intervalos de `ctx.config`. Debe
/// llamarse dentro de un runtime tokio.
pub fn spawn(ctx: Arc<CoreContext>) -> SchedulerHandle {
    let (shutdown, rx) = watch::channel(false);
    let service = Arc::new(DeltaFilesService::new(Arc::clone(&ctx)));
    let runner = Arc::new(DeleteRunner::new(Arc::clone(&ctx)));
    let config = &ctx.config;
    let mut tasks = Vec::with_capacity(4);

    let events = Arc::clone(&service);
    tasks.push(tokio::spawn(run_loop("events", config.event_poll_interval, rx.clone(), move || {
        event_tick(&events)
    })));

    let requeue = Arc::clone(&service);
    tasks.push(tokio::spawn(run_loop("requeue", config.requeue_interval(), rx.clone(), move || {
        requeue_tick(&requeue)
    })));

    tasks.push(tokio::spawn(run_loop("delete", config.delete_interval, rx.clone(), move || delete_tick(&runner))));

    let refresh = Arc::clone(&service);
    tasks.push(tokio::spawn(run_loop("flow-refresh", config.flow_refresh_interval, rx, move || {
        refresh_tick(&refresh)
    })));

    SchedulerHandle { shutdown, tasks }
}

async fn run_loop<F>(name: &'static str, period: Duration, mut shutdown: watch::Receiver<bool>, work: F)
    where F: Fn() + Send + Sync + 'static
{
    let work = Arc::new(work);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log::info!("loop '{}' iniciado (cada {:?})", name, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let job = Arc::clone(&work);
                if let Err(e) = tokio::task::spawn_blocking(move || job()).await {
                    log::error!("loop '{}': tick abortado: {}", name, e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    log::info!("loop '{}' detenido", name);
}

fn event_tick(service: &DeltaFilesService) {
    match service.process_pending_events() {
        Ok(report) if report.total() > 0 => {
            log::info!("eventos: {} aplicados, {} obsoletos, {} sin destino, {} inválidos, {} devueltos, {} fallidos",
                       report.applied,
                       report.stale,
                       report.not_found,
                       report.invalid,
                       report.requeued,
                       report.failed);
        }
        Ok(_) => {}
        Err(e) => log::error!("no se pudieron leer eventos: {}; se reintenta en el próximo tick", e),
    }
}

fn requeue_tick(service: &DeltaFilesService) {
    let now = Utc::now();
    if let Err(e) = service.requeue(now) {
        log::error!("requeue fallido: {}", e);
    }
    match service.warm_cold_queued(now) {
        Ok(0) => {}
        Ok(n) => log::info!("{} acciones salieron del cold queue", n),
        Err(e) => log::error!("cold queue: {}", e),
    }
}

fn delete_tick(runner: &DeleteRunner) {
    match runner.run_once(Utc::now()) {
        Ok(report) => {
            if report.marked + report.purged + report.removed > 0 {
                log::info!("borrado: {} marcados, {} purgados ({} objetos), {} registros eliminados",
                           report.marked,
                           report.purged,
                           report.objects_deleted,
                           report.removed);
            }
        }
        Err(e) => log::error!("run de borrado fallido: {}", e),
    }
}

fn refresh_tick(service: &DeltaFilesService) {
    if let Err(e) = service.refresh_flows() {
        log::warn!("refresco de flujos fallido, se conserva el snapshot vigente: {}", e);
    }
}
