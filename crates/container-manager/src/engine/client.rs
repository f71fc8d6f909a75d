//! Serialized async access to the engine
//!
//! ```text
//! ┌──────────────┐                       ┌────────────────┐     ┌────────┐
//! │ start/stop/  │── EngineCommand ────► │ engine worker  │───► │ Docker │
//! │ find callers │      (mpsc, FIFO)     │ (one task)     │     │ engine │
//! └──────────────┘                       └───────┬────────┘     └────────┘
//!        ▲                                       │
//!        └──────── EngineResult<T> (oneshot) ────┘
//! ```
//!
//! Every call is queued to one worker which awaits it to completion before
//! taking the next, so create, start and port queries issued by the manager
//! reach the engine in the order they were submitted. The backend is built
//! on the first call, not when the client is constructed.

use super::{BollardBackend, DockerBackend, EngineError, EngineResult};
use crate::config::DockerConfig;
use bollard::container::Config;
use bollard::models::{ContainerInspectResponse, ContainerSummary, ImageInspect, PortBinding};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type Reply<T> = oneshot::Sender<EngineResult<T>>;

/// Builds the backend on first use
pub type Connector = Box<dyn FnMut() -> EngineResult<Arc<dyn DockerBackend>> + Send>;

/// One queued engine call with its reply channel
enum EngineCommand {
    InspectImage {
        name: String,
        reply: Reply<ImageInspect>,
    },
    ListContainers {
        label_filters: Vec<String>,
        reply: Reply<Vec<ContainerSummary>>,
    },
    InspectContainer {
        container_id: String,
        reply: Reply<ContainerInspectResponse>,
    },
    CreateContainer {
        name: String,
        config: Box<Config<String>>,
        reply: Reply<String>,
    },
    StartContainer {
        container_id: String,
        reply: Reply<()>,
    },
    StopContainer {
        container_id: String,
        reply: Reply<()>,
    },
    RemoveContainer {
        container_id: String,
        reply: Reply<()>,
    },
    Port {
        container_id: String,
        private_port: u16,
        reply: Reply<Option<Vec<PortBinding>>>,
    },
}

impl EngineCommand {
    fn name(&self) -> &'static str {
        match self {
            EngineCommand::InspectImage { .. } => "inspect_image",
            EngineCommand::ListContainers { .. } => "list_containers",
            EngineCommand::InspectContainer { .. } => "inspect_container",
            EngineCommand::CreateContainer { .. } => "create_container",
            EngineCommand::StartContainer { .. } => "start_container",
            EngineCommand::StopContainer { .. } => "stop_container",
            EngineCommand::RemoveContainer { .. } => "remove_container",
            EngineCommand::Port { .. } => "port",
        }
    }

    /// Run the call against the backend and deliver the result.
    async fn execute(self, backend: &dyn DockerBackend) {
        // A dropped receiver means the caller went away; nothing to report.
        match self {
            EngineCommand::InspectImage { name, reply } => {
                let _ = reply.send(backend.inspect_image(&name).await);
            }
            EngineCommand::ListContainers {
                label_filters,
                reply,
            } => {
                let _ = reply.send(backend.list_containers(label_filters).await);
            }
            EngineCommand::InspectContainer {
                container_id,
                reply,
            } => {
                let _ = reply.send(backend.inspect_container(&container_id).await);
            }
            EngineCommand::CreateContainer {
                name,
                config,
                reply,
            } => {
                let _ = reply.send(backend.create_container(&name, *config).await);
            }
            EngineCommand::StartContainer {
                container_id,
                reply,
            } => {
                let _ = reply.send(backend.start_container(&container_id).await);
            }
            EngineCommand::StopContainer {
                container_id,
                reply,
            } => {
                let _ = reply.send(backend.stop_container(&container_id).await);
            }
            EngineCommand::RemoveContainer {
                container_id,
                reply,
            } => {
                let _ = reply.send(backend.remove_container(&container_id).await);
            }
            EngineCommand::Port {
                container_id,
                private_port,
                reply,
            } => {
                let _ = reply.send(backend.port(&container_id, private_port).await);
            }
        }
    }

    /// Deliver an error without reaching the backend.
    fn fail(self, error: EngineError) {
        match self {
            EngineCommand::InspectImage { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            EngineCommand::ListContainers { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            EngineCommand::InspectContainer { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            EngineCommand::CreateContainer { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            EngineCommand::StartContainer { reply, .. }
            | EngineCommand::StopContainer { reply, .. }
            | EngineCommand::RemoveContainer { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            EngineCommand::Port { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// Awaitable facade over a [`DockerBackend`], serialized through one worker.
///
/// Cloning is cheap; clones share the same worker and queue. The worker exits
/// once every clone has been dropped.
#[derive(Clone)]
pub struct AsyncDockerClient {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl AsyncDockerClient {
    /// Client for the engine described by `config`. The connection is made
    /// lazily by the worker.
    pub fn new(config: DockerConfig) -> Self {
        Self::with_connector(Box::new(move || {
            BollardBackend::connect(&config).map(|b| Arc::new(b) as Arc<dyn DockerBackend>)
        }))
    }

    /// Client over an already-built backend.
    pub fn with_backend(backend: Arc<dyn DockerBackend>) -> Self {
        Self::with_connector(Box::new(move || Ok(backend.clone())))
    }

    /// Client whose backend is produced by `connector` on first use. A failed
    /// connection is reported to the waiting call and retried on the next one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_connector(connector: Connector) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(rx, connector));
        Self { tx }
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> EngineCommand) -> EngineResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| EngineError::WorkerStopped)?;
        rx.await.map_err(|_| EngineError::WorkerStopped)?
    }

    pub async fn inspect_image(&self, name: &str) -> EngineResult<ImageInspect> {
        let name = name.to_string();
        self.call(|reply| EngineCommand::InspectImage { name, reply })
            .await
    }

    pub async fn list_containers(
        &self,
        label_filters: Vec<String>,
    ) -> EngineResult<Vec<ContainerSummary>> {
        self.call(|reply| EngineCommand::ListContainers {
            label_filters,
            reply,
        })
        .await
    }

    pub async fn inspect_container(
        &self,
        container_id: &str,
    ) -> EngineResult<ContainerInspectResponse> {
        let container_id = container_id.to_string();
        self.call(|reply| EngineCommand::InspectContainer {
            container_id,
            reply,
        })
        .await
    }

    pub async fn create_container(
        &self,
        name: &str,
        config: Config<String>,
    ) -> EngineResult<String> {
        let name = name.to_string();
        self.call(|reply| EngineCommand::CreateContainer {
            name,
            config: Box::new(config),
            reply,
        })
        .await
    }

    pub async fn start_container(&self, container_id: &str) -> EngineResult<()> {
        let container_id = container_id.to_string();
        self.call(|reply| EngineCommand::StartContainer {
            container_id,
            reply,
        })
        .await
    }

    pub async fn stop_container(&self, container_id: &str) -> EngineResult<()> {
        let container_id = container_id.to_string();
        self.call(|reply| EngineCommand::StopContainer {
            container_id,
            reply,
        })
        .await
    }

    pub async fn remove_container(&self, container_id: &str) -> EngineResult<()> {
        let container_id = container_id.to_string();
        self.call(|reply| EngineCommand::RemoveContainer {
            container_id,
            reply,
        })
        .await
    }

    pub async fn port(
        &self,
        container_id: &str,
        private_port: u16,
    ) -> EngineResult<Option<Vec<PortBinding>>> {
        let container_id = container_id.to_string();
        self.call(|reply| EngineCommand::Port {
            container_id,
            private_port,
            reply,
        })
        .await
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<EngineCommand>, mut connector: Connector) {
    let mut backend: Option<Arc<dyn DockerBackend>> = None;

    while let Some(command) = rx.recv().await {
        if backend.is_none() {
            match connector() {
                Ok(connected) => backend = Some(connected),
                Err(e) => {
                    warn!(error = %e, command = command.name(), "Engine connection failed");
                    command.fail(e);
                    continue;
                }
            }
        }

        if let Some(backend) = backend.as_deref() {
            debug!(command = command.name(), "Engine call");
            command.execute(backend).await;
        }
    }

    debug!("Engine worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records the order calls reach it; `inspect_image` of "slow" sleeps.
    #[derive(Default)]
    struct OrderedBackend {
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl OrderedBackend {
        async fn enter(&self, entry: String, delay: Duration) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.calls.lock().unwrap().push(entry);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DockerBackend for OrderedBackend {
        async fn inspect_image(&self, name: &str) -> EngineResult<ImageInspect> {
            let delay = if name == "slow" { 50 } else { 0 };
            self.enter(format!("image:{name}"), Duration::from_millis(delay))
                .await;
            Ok(ImageInspect {
                id: Some(format!("sha256:{name}")),
                ..Default::default()
            })
        }

        async fn list_containers(
            &self,
            label_filters: Vec<String>,
        ) -> EngineResult<Vec<ContainerSummary>> {
            self.enter(format!("list:{}", label_filters.join(",")), Duration::ZERO)
                .await;
            Ok(Vec::new())
        }

        async fn inspect_container(&self, id: &str) -> EngineResult<ContainerInspectResponse> {
            Err(EngineError::NotFound(id.to_string()))
        }

        async fn create_container(&self, name: &str, _: Config<String>) -> EngineResult<String> {
            self.enter(format!("create:{name}"), Duration::ZERO).await;
            Ok(format!("id-{name}"))
        }

        async fn start_container(&self, id: &str) -> EngineResult<()> {
            self.enter(format!("start:{id}"), Duration::ZERO).await;
            Ok(())
        }

        async fn stop_container(&self, id: &str) -> EngineResult<()> {
            self.enter(format!("stop:{id}"), Duration::ZERO).await;
            Ok(())
        }

        async fn remove_container(&self, id: &str) -> EngineResult<()> {
            self.enter(format!("remove:{id}"), Duration::ZERO).await;
            Ok(())
        }

        async fn port(&self, id: &str, port: u16) -> EngineResult<Option<Vec<PortBinding>>> {
            self.enter(format!("port:{id}:{port}"), Duration::ZERO).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_calls_execute_in_submission_order() {
        let backend = Arc::new(OrderedBackend::default());
        let client = AsyncDockerClient::with_backend(backend.clone());

        // The slow call is submitted first; the fast ones must wait behind it.
        let slow = {
            let client = client.clone();
            tokio::spawn(async move { client.inspect_image("slow").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let create = client.create_container("c1", Config::default());
        let start = client.start_container("id-c1");
        let (created, started) = tokio::join!(create, start);

        assert_eq!(created.expect("create"), "id-c1");
        started.expect("start");
        slow.await.expect("join").expect("inspect");

        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["image:slow", "create:c1", "start:id-c1"]);
        assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_propagate_unchanged() {
        let client = AsyncDockerClient::with_backend(Arc::new(OrderedBackend::default()));
        let err = client
            .inspect_container("missing")
            .await
            .expect_err("not found");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_backend_is_built_lazily_and_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let client = AsyncDockerClient::with_connector(Box::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(EngineError::Connect("daemon unavailable".into()))
            } else {
                Ok(Arc::new(OrderedBackend::default()) as Arc<dyn DockerBackend>)
            }
        }));

        tokio::task::yield_now().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 0);

        let first = client.list_containers(vec![]).await;
        assert!(matches!(first, Err(EngineError::Connect(_))));

        client
            .list_containers(vec!["a=b".into()])
            .await
            .expect("second call connects");
        client.stop_container("x").await.expect("reuses backend");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
