//! Service trait, process-wide queue registry, and the running-services
//! scope
//!
//! Each service owns a bounded FIFO queue and one worker loop. The worker
//! waits until `can_process` reports capacity, pulls the next job, and
//! spawns its processing so independent jobs run concurrently (the rate
//! limiter, not the worker, is the concurrency bound). A job failure is
//! captured onto the submitter's reply slot and never kills the worker.
//!
//! The submitting task's jurisdiction binding travels with the job, and the
//! worker re-enters that scope around `process`, so logs emitted inside a
//! service land in the submitter's log file.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::llm::LlmError;

/// Max number of queued job submissions per service
const QUEUE_CAPACITY: usize = 10_000;

/// Poll interval while a worker waits for `can_process`
const CAPACITY_POLL: Duration = Duration::from_millis(10);

/// Errors raised by the service runtime
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(
        "service {name} is not running; submit calls inside a \
         RunningServices scope that registers it"
    )]
    NotInitialized { name: &'static str },

    #[error("service {name} is already registered in a running scope")]
    AlreadyRunning { name: &'static str },

    #[error("service call cancelled during scope teardown")]
    Cancelled,

    #[error("pool worker crashed: {0}")]
    WorkerCrashed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("{0}")]
    Other(String),
}

/// A queued unit of work that can run behind a bounded service queue.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Service name used in registry diagnostics
    const NAME: &'static str;

    type Request: Send + 'static;
    type Response: Send + 'static;

    /// Fast check consulted by the worker before dequeuing the next job
    fn can_process(&self) -> bool {
        true
    }

    /// Process one job
    async fn process(&self, request: Self::Request) -> Result<Self::Response, ServiceError>;

    /// Allocate resources at scope entry
    async fn acquire_resources(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Clean up resources at scope exit
    async fn release_resources(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

struct Job<S: Service> {
    request: S::Request,
    reply: oneshot::Sender<Result<S::Response, ServiceError>>,
    task_name: Option<String>,
}

type Registry = StdMutex<HashMap<TypeId, Box<dyn Any + Send>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Default::default)
}

fn register<S: Service>(sender: mpsc::Sender<Job<S>>) -> Result<(), ServiceError> {
    let mut map = registry().lock().unwrap_or_else(|e| e.into_inner());
    if map.contains_key(&TypeId::of::<S>()) {
        return Err(ServiceError::AlreadyRunning { name: S::NAME });
    }
    map.insert(TypeId::of::<S>(), Box::new(sender));
    Ok(())
}

fn deregister<S: Service>() {
    let mut map = registry().lock().unwrap_or_else(|e| e.into_inner());
    map.remove(&TypeId::of::<S>());
}

fn sender_for<S: Service>() -> Result<mpsc::Sender<Job<S>>, ServiceError> {
    let map = registry().lock().unwrap_or_else(|e| e.into_inner());
    map.get(&TypeId::of::<S>())
        .and_then(|entry| entry.downcast_ref::<mpsc::Sender<Job<S>>>())
        .cloned()
        .ok_or(ServiceError::NotInitialized { name: S::NAME })
}

/// Submit a job to a running service and await its result.
pub async fn call<S: Service>(request: S::Request) -> Result<S::Response, ServiceError> {
    let sender = sender_for::<S>()?;
    let (reply_tx, reply_rx) = oneshot::channel();
    let job = Job {
        request,
        reply: reply_tx,
        task_name: crate::logs::current_jurisdiction(),
    };
    sender.send(job).await.map_err(|_| ServiceError::Cancelled)?;
    reply_rx.await.map_err(|_| ServiceError::Cancelled)?
}

async fn worker_loop<S: Service>(
    service: Arc<S>,
    mut rx: mpsc::Receiver<Job<S>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut in_flight: JoinSet<()> = JoinSet::new();
    'outer: loop {
        let job = tokio::select! {
            _ = shutdown.changed() => break,
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => continue,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        while !service.can_process() {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = job.reply.send(Err(ServiceError::Cancelled));
                    break 'outer;
                }
                _ = tokio::time::sleep(CAPACITY_POLL) => {}
            }
        }

        let service = Arc::clone(&service);
        in_flight.spawn(async move {
            let Job {
                request,
                reply,
                task_name,
            } = job;
            let result = match task_name {
                Some(name) => crate::logs::scope(name, service.process(request)).await,
                None => service.process(request).await,
            };
            let _ = reply.send(result);
        });
    }

    // Teardown: fail everything still queued, abort everything in flight.
    rx.close();
    while let Ok(job) = rx.try_recv() {
        let _ = job.reply.send(Err(ServiceError::Cancelled));
    }
    in_flight.abort_all();
    while in_flight.join_next().await.is_some() {}
    debug!(service = S::NAME, "service worker stopped");
}

struct RunningService {
    name: &'static str,
    worker: tokio::task::JoinHandle<()>,
    teardown: BoxFuture<'static, ()>,
}

type StartFn =
    Box<dyn FnOnce(watch::Receiver<bool>) -> BoxFuture<'static, Result<RunningService, ServiceError>> + Send>;

/// Builder collecting the services for one scope.
#[derive(Default)]
pub struct ServicesBuilder {
    starts: Vec<StartFn>,
}

impl ServicesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service to the scope.
    pub fn with<S: Service>(mut self, service: S) -> Self {
        self.starts.push(Box::new(move |shutdown| {
            Box::pin(async move {
                let service = Arc::new(service);
                service.acquire_resources().await?;
                let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
                if let Err(err) = register::<S>(tx) {
                    let _ = service.release_resources().await;
                    return Err(err);
                }
                debug!(service = S::NAME, "service registered");
                let worker = tokio::spawn(worker_loop(Arc::clone(&service), rx, shutdown));
                let teardown: BoxFuture<'static, ()> = Box::pin(async move {
                    deregister::<S>();
                    if let Err(err) = service.release_resources().await {
                        warn!(service = S::NAME, %err, "release_resources failed");
                    }
                });
                Ok(RunningService {
                    name: S::NAME,
                    worker,
                    teardown,
                })
            })
        }));
        self
    }

    /// Start every service; on any failure the already-started services are
    /// torn down before the error is returned.
    pub async fn start(self) -> Result<RunningServices, ServiceError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut services = Vec::with_capacity(self.starts.len());
        for start in self.starts {
            match start(shutdown_rx.clone()).await {
                Ok(running) => services.push(running),
                Err(err) => {
                    RunningServices {
                        shutdown: shutdown_tx,
                        services,
                    }
                    .shutdown()
                    .await;
                    return Err(err);
                }
            }
        }
        Ok(RunningServices {
            shutdown: shutdown_tx,
            services,
        })
    }

    /// Run a future inside the scope: start services, await the future,
    /// then tear the scope down regardless of the future's outcome.
    pub async fn run<F: Future>(self, fut: F) -> Result<F::Output, ServiceError> {
        let scope = self.start().await?;
        let out = fut.await;
        scope.shutdown().await;
        Ok(out)
    }
}

/// A live scope of registered services.
pub struct RunningServices {
    shutdown: watch::Sender<bool>,
    services: Vec<RunningService>,
}

impl std::fmt::Debug for RunningServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningServices")
            .field("services", &self.services.iter().map(|s| s.name).collect::<Vec<_>>())
            .finish()
    }
}

impl RunningServices {
    /// Signal cancellation, drain outstanding jobs with a cancellation
    /// error, release resources, and remove the queues.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for service in self.services {
            if service.worker.await.is_err() {
                warn!(service = service.name, "service worker panicked");
            }
            service.teardown.await;
        }
    }
}
