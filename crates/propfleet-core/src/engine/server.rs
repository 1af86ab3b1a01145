use super::backend::CalculationBackend;
use super::config::ServerConfig;
use super::error::EngineError;
use super::protocol::{
    ClientMessage, FailureKind, RequestStatus, ServerMessage, read_message, write_message,
};
use super::storage::{LocalFileStorage, cache_key};
use crate::core::models::property::{PhysicalProperty, PropertyId};
use crate::core::models::request::{EstimationRequest, EstimationTask};
use crate::core::models::result::{
    EstimationException, EstimationResult, OutcomeRecord, OutcomeStatus,
};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    Listening,
    ServingRequests,
    Stopped,
}

struct Shared<B: ?Sized> {
    config: ServerConfig,
    backend: Arc<B>,
    storage: LocalFileStorage,
    state: Mutex<ServerState>,
    requests: Mutex<HashMap<String, RequestStatus>>,
    next_request: AtomicU64,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<B: ?Sized> Shared<B> {
    fn state(&self) -> ServerState {
        *lock(&self.state)
    }

    fn set_status(&self, request_id: &str, status: RequestStatus) {
        lock(&self.requests).insert(request_id.to_string(), status);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut in_flight = lock(&self.in_flight);
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }
}

/// Accepts estimation requests over TCP and runs them on a calculation backend.
pub struct EvaluatorServer<B: CalculationBackend + ?Sized + 'static> {
    shared: Arc<Shared<B>>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<watch::Sender<bool>>,
    accept_loop: Option<JoinHandle<()>>,
}

impl<B: CalculationBackend + ?Sized + 'static> EvaluatorServer<B> {
    pub fn new(config: ServerConfig, backend: Arc<B>) -> Result<Self, EngineError> {
        let storage =
            LocalFileStorage::new(&config.storage_directory, config.cache_objects_in_memory)?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                backend,
                storage,
                state: Mutex::new(ServerState::Uninitialized),
                requests: Mutex::new(HashMap::new()),
                next_request: AtomicU64::new(0),
                in_flight: Mutex::new(Vec::new()),
            }),
            local_addr: None,
            shutdown: None,
            accept_loop: None,
        })
    }

    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub async fn start(&mut self) -> Result<SocketAddr, EngineError> {
        if self.state() != ServerState::Uninitialized {
            return Err(EngineError::Protocol(format!(
                "server cannot be started from state {:?}",
                self.state()
            )));
        }
        let config = &self.shared.config;
        std::fs::create_dir_all(&config.working_directory)
            .map_err(|e| EngineError::io(&config.working_directory, e))?;

        let listener = TcpListener::bind((config.bind_address, config.port))
            .await
            .map_err(|e| {
                EngineError::Protocol(format!(
                    "failed to bind {}:{}: {}",
                    config.bind_address, config.port, e
                ))
            })?;
        let address = listener
            .local_addr()
            .map_err(|e| EngineError::Protocol(format!("failed to read bound address: {}", e)))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.accept_loop = Some(tokio::spawn(accept_loop(
            self.shared.clone(),
            listener,
            shutdown_rx,
        )));
        self.shutdown = Some(shutdown_tx);
        self.local_addr = Some(address);
        *lock(&self.shared.state) = ServerState::Listening;

        info!(
            address = %address,
            caching = config.enable_data_caching,
            delete_working_files = config.delete_working_files,
            "Estimation server listening."
        );
        Ok(address)
    }

    /// Stops accepting connections, waits for in-flight requests to finish and
    /// releases the port.
    pub async fn stop(&mut self) {
        if self.state() == ServerState::Stopped {
            return;
        }
        *lock(&self.shared.state) = ServerState::Stopped;

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(handle) = self.accept_loop.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Accept loop ended abnormally.");
            }
        }

        loop {
            let pending: Vec<_> = std::mem::take(&mut *lock(&self.shared.in_flight));
            if pending.is_empty() {
                break;
            }
            debug!(count = pending.len(), "Draining in-flight work.");
            for handle in pending {
                if let Err(e) = handle.await {
                    warn!(error = %e, "In-flight task ended abnormally.");
                }
            }
        }
        info!("Estimation server stopped.");
    }
}

/// Starts a server, runs `body` with its address, and stops the server on every
/// exit path of the body.
pub async fn with_server<B, F, Fut, T>(
    config: ServerConfig,
    backend: Arc<B>,
    body: F,
) -> Result<T, EngineError>
where
    B: CalculationBackend + ?Sized + 'static,
    F: FnOnce(SocketAddr) -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut server = EvaluatorServer::new(config, backend)?;
    let address = server.start().await?;
    let outcome = body(address).await;
    server.stop().await;
    outcome
}

async fn accept_loop<B: CalculationBackend + ?Sized + 'static>(
    shared: Arc<Shared<B>>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Accepted connection.");
                    let handle = tokio::spawn(handle_connection(
                        shared.clone(),
                        stream,
                        shutdown.clone(),
                    ));
                    shared.track(handle);
                }
                Err(e) => warn!(error = %e, "Failed to accept connection."),
            },
        }
    }
}

async fn handle_connection<B: CalculationBackend + ?Sized + 'static>(
    shared: Arc<Shared<B>>,
    mut stream: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => return,
            read = read_message::<_, ClientMessage>(&mut stream) => match read {
                Ok(Some(message)) => message,
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "Dropping connection after a malformed message.");
                    return;
                }
            },
        };

        let reply = match message {
            ClientMessage::Submit { request } => submit(&shared, request),
            ClientMessage::Query { request_id } => {
                let status = lock(&shared.requests).get(&request_id).cloned();
                match status {
                    Some(status) => ServerMessage::Status { request_id, status },
                    None => ServerMessage::Rejected {
                        reason: format!("unknown request '{}'", request_id),
                    },
                }
            }
        };

        if let Err(e) = write_message(&mut stream, &reply).await {
            warn!(error = %e, "Failed to answer client.");
            return;
        }
    }
}

fn submit<B: CalculationBackend + ?Sized + 'static>(
    shared: &Arc<Shared<B>>,
    request: EstimationRequest,
) -> ServerMessage {
    {
        let mut state = lock(&shared.state);
        match *state {
            ServerState::Listening | ServerState::ServingRequests => {
                *state = ServerState::ServingRequests
            }
            other => {
                return ServerMessage::Rejected {
                    reason: format!("server is not accepting requests ({:?})", other),
                };
            }
        }
    }

    let request_id = format!(
        "request-{}",
        shared.next_request.fetch_add(1, Ordering::SeqCst)
    );
    shared.set_status(&request_id, RequestStatus::Queued);
    info!(request = %request_id, properties = request.properties.len(), "Accepted estimation request.");

    let handle = tokio::spawn(process_request(
        shared.clone(),
        request_id.clone(),
        request,
    ));
    shared.track(handle);
    ServerMessage::Accepted { request_id }
}

#[instrument(skip_all, fields(request = %request_id))]
async fn process_request<B: CalculationBackend + ?Sized + 'static>(
    shared: Arc<Shared<B>>,
    request_id: String,
    request: EstimationRequest,
) {
    let working_directory = shared.config.working_directory.join(&request_id);
    let status = match run_request(&shared, &request_id, &working_directory, request).await {
        Ok(result) => {
            info!(
                estimated = result.estimated.len(),
                unsuccessful = result.unsuccessful.len(),
                exceptions = result.exceptions.len(),
                "Request finished."
            );
            RequestStatus::Completed { result }
        }
        Err(e) => {
            error!(error = %e, "Request failed.");
            RequestStatus::Failed {
                kind: FailureKind::of(&e),
                message: e.to_string(),
            }
        }
    };

    if shared.config.delete_working_files {
        match tokio::fs::remove_dir_all(&working_directory).await {
            Ok(()) => debug!(path = %working_directory.display(), "Removed working files."),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %working_directory.display(), error = %e, "Failed to remove working files."),
        }
    }
    shared.set_status(&request_id, status);
}

async fn run_request<B: CalculationBackend + ?Sized + 'static>(
    shared: &Arc<Shared<B>>,
    request_id: &str,
    working_directory: &Path,
    request: EstimationRequest,
) -> Result<EstimationResult, EngineError> {
    std::fs::create_dir_all(working_directory)
        .map_err(|e| EngineError::io(working_directory, e))?;

    let EstimationRequest {
        properties,
        force_field,
        options,
    } = request;
    let caching = shared.config.enable_data_caching;

    let mut result = EstimationResult::new();
    let mut keys: HashMap<PropertyId, String> = HashMap::new();
    let mut pending: Vec<PhysicalProperty> = Vec::new();

    for property in properties {
        if !caching {
            pending.push(property);
            continue;
        }
        let key = cache_key(&property, &force_field, &options)?;
        match shared.storage.retrieve(&key).await? {
            Some(OutcomeRecord {
                status: OutcomeStatus::Estimated,
                property: Some(mut cached),
                ..
            }) => {
                debug!(property = %property.id, "Reusing stored estimate.");
                cached.id = property.id.clone();
                result.estimated.push(cached);
            }
            _ => {
                keys.insert(property.id.clone(), key);
                pending.push(property);
            }
        }
    }
    if caching {
        info!(reused = result.estimated.len(), pending = pending.len(), "Checked stored estimates.");
    }
    if pending.is_empty() {
        return Ok(result);
    }

    let batch_size = shared.config.batch_size.unwrap_or(pending.len());
    let mut tasks = JoinSet::new();
    for (index, batch) in pending.chunks(batch_size).enumerate() {
        let task = EstimationTask {
            task_id: format!("{}-{}", request_id, index),
            properties: batch.to_vec(),
            force_field: force_field.clone(),
            options: options.clone(),
        };
        let backend = shared.backend.clone();
        let task_directory = working_directory.join(&task.task_id);
        let ids: Vec<PropertyId> = batch.iter().map(|p| p.id.clone()).collect();
        tasks.spawn(async move { (ids, backend.submit_task(task, task_directory).await) });
    }

    let total_tasks = tasks.len();
    let mut completed_tasks = 0;
    shared.set_status(
        request_id,
        RequestStatus::Running {
            completed_tasks,
            total_tasks,
        },
    );

    while let Some(joined) = tasks.join_next().await {
        let (ids, outcome) = joined
            .map_err(|e| EngineError::Backend(format!("backend task panicked: {}", e)))?;
        match outcome {
            Ok(batch_result) => {
                if caching {
                    for property in &batch_result.estimated {
                        if let Some(key) = keys.get(&property.id) {
                            let record = OutcomeRecord {
                                status: OutcomeStatus::Estimated,
                                property: Some(property.clone()),
                                message: None,
                            };
                            shared.storage.store(key, &record).await?;
                        }
                    }
                }
                result.extend(batch_result);
            }
            Err(e @ EngineError::ResourceProvisioning(_)) => {
                tasks.abort_all();
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, properties = ids.len(), "Backend task failed.");
                let message = e.to_string();
                result
                    .exceptions
                    .extend(ids.into_iter().map(|property_id| EstimationException {
                        property_id,
                        message: message.clone(),
                    }));
            }
        }
        completed_tasks += 1;
        shared.set_status(
            request_id,
            RequestStatus::Running {
                completed_tasks,
                total_tasks,
            },
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::ForceFieldSource;
    use crate::core::models::dataset::PhysicalPropertyDataSet;
    use crate::core::models::property::Quantity;
    use crate::core::options::RequestOptions;
    use crate::core::resources::{DeviceBinding, GpuToolkit};
    use crate::engine::backend::local::LocalBackend;
    use crate::engine::client::{ConnectionOptions, EvaluatorClient};
    use crate::engine::config::{PoolConfig, ServerConfigBuilder};
    use crate::engine::estimator::PropertyEstimator;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    /// Estimates every property as its own value doubled, except ids starting
    /// with `bad`, which are reported unsuccessful.
    #[derive(Default)]
    struct DoublingEstimator {
        calls: AtomicUsize,
        estimated: AtomicUsize,
    }

    #[async_trait]
    impl PropertyEstimator for DoublingEstimator {
        async fn estimate(
            &self,
            task: &EstimationTask,
            _binding: &DeviceBinding,
            working_directory: &Path,
        ) -> Result<EstimationResult, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::write(working_directory.join("trajectory.dcd"), b"frames").unwrap();
            let mut result = EstimationResult::new();
            for property in &task.properties {
                if property.id.as_str().starts_with("bad") {
                    result.unsuccessful.push(property.clone());
                } else {
                    self.estimated.fetch_add(1, Ordering::SeqCst);
                    let mut estimate = property.clone();
                    estimate.value = property.value.with_value(property.value.value * 2.0);
                    result.estimated.push(estimate);
                }
            }
            Ok(result)
        }
    }

    struct ProvisioningFailure;

    #[async_trait]
    impl PropertyEstimator for ProvisioningFailure {
        async fn estimate(
            &self,
            _task: &EstimationTask,
            _binding: &DeviceBinding,
            _working_directory: &Path,
        ) -> Result<EstimationResult, EngineError> {
            Err(EngineError::ResourceProvisioning(
                "no node became available".to_string(),
            ))
        }
    }

    fn dataset(ids: &[&str]) -> PhysicalPropertyDataSet {
        PhysicalPropertyDataSet::from_properties(
            ids.iter()
                .map(|id| PhysicalProperty::new(*id, "Density", Quantity::new(0.5, "g / ml")))
                .collect(),
        )
        .unwrap()
    }

    fn config(dir: &TempDir, caching: bool, delete: bool, batch: Option<usize>) -> ServerConfig {
        ServerConfigBuilder::new()
            .port(0)
            .working_directory(dir.path().join("working-directory"))
            .storage_directory(dir.path().join("stored_data"))
            .enable_data_caching(caching)
            .delete_working_files(delete)
            .batch_size(batch)
            .build()
            .unwrap()
    }

    fn backend(estimator: Arc<dyn PropertyEstimator>) -> Arc<LocalBackend> {
        Arc::new(LocalBackend::new(
            PoolConfig::default(),
            DeviceBinding::new(GpuToolkit::Cuda, 0),
            estimator,
        ))
    }

    async fn estimate_over_tcp(
        address: SocketAddr,
        data_set: &PhysicalPropertyDataSet,
    ) -> Result<EstimationResult, EngineError> {
        let client = EvaluatorClient::new(ConnectionOptions::new("127.0.0.1", address.port()));
        let request = client
            .request_estimate(
                data_set,
                &ForceFieldSource { files: Vec::new() },
                &RequestOptions::default(),
            )
            .await?;
        request.results(Duration::from_millis(20)).await
    }

    async fn run_once(
        config: ServerConfig,
        backend: Arc<LocalBackend>,
        data_set: &PhysicalPropertyDataSet,
    ) -> Result<EstimationResult, EngineError> {
        backend.start().await?;
        let outcome = with_server(config, backend.clone(), |address| {
            estimate_over_tcp(address, data_set)
        })
        .await;
        backend.stop().await?;
        outcome
    }

    #[tokio::test]
    async fn round_trip_over_tcp_reports_every_property() {
        let dir = tempdir().unwrap();
        let estimator = Arc::new(DoublingEstimator::default());

        let result = run_once(
            config(&dir, false, false, Some(2)),
            backend(estimator.clone()),
            &dataset(&["a", "b", "bad-c"]),
        )
        .await
        .unwrap();

        assert_eq!(result.total(), 3);
        assert_eq!(result.estimated.len(), 2);
        assert_eq!(result.unsuccessful.len(), 1);
        assert!(result.estimated.iter().all(|p| p.value.value == 1.0));
        assert_eq!(estimator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn caching_reuses_estimates_only_when_enabled() {
        let dir = tempdir().unwrap();
        let estimator = Arc::new(DoublingEstimator::default());

        for _ in 0..2 {
            run_once(
                config(&dir, true, false, None),
                backend(estimator.clone()),
                &dataset(&["a", "b"]),
            )
            .await
            .unwrap();
        }
        assert_eq!(estimator.estimated.load(Ordering::SeqCst), 2);

        let uncached = Arc::new(DoublingEstimator::default());
        for _ in 0..2 {
            run_once(
                config(&dir, false, false, None),
                backend(uncached.clone()),
                &dataset(&["a", "b"]),
            )
            .await
            .unwrap();
        }
        assert_eq!(uncached.estimated.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn working_files_are_retained_unless_deletion_is_enabled() {
        let kept = tempdir().unwrap();
        run_once(
            config(&kept, false, false, None),
            backend(Arc::new(DoublingEstimator::default())),
            &dataset(&["a"]),
        )
        .await
        .unwrap();
        let trajectory: PathBuf = kept
            .path()
            .join("working-directory/request-0/request-0-0/trajectory.dcd");
        assert!(trajectory.exists());

        let deleted = tempdir().unwrap();
        run_once(
            config(&deleted, false, true, None),
            backend(Arc::new(DoublingEstimator::default())),
            &dataset(&["a"]),
        )
        .await
        .unwrap();
        assert!(!deleted.path().join("working-directory/request-0").exists());
    }

    #[tokio::test]
    async fn provisioning_failure_surfaces_through_the_request() {
        let dir = tempdir().unwrap();
        let err = run_once(
            config(&dir, false, false, None),
            backend(Arc::new(ProvisioningFailure)),
            &dataset(&["a"]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::ResourceProvisioning(_)));
    }

    #[tokio::test]
    async fn stop_releases_the_port_and_rejects_late_clients() {
        let dir = tempdir().unwrap();
        let backend = backend(Arc::new(DoublingEstimator::default()));
        let mut server = EvaluatorServer::new(config(&dir, false, false, None), backend).unwrap();

        let address = server.start().await.unwrap();
        assert_eq!(server.state(), ServerState::Listening);
        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);

        let client = EvaluatorClient::new(ConnectionOptions::new("127.0.0.1", address.port()));
        let err = client
            .request_estimate(
                &dataset(&["a"]),
                &ForceFieldSource { files: Vec::new() },
                &RequestOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Submission(_)));
    }
}
