use super::error::EngineError;
use super::progress::{Progress, ProgressReporter};
use super::protocol::{ClientMessage, RequestStatus, ServerMessage, read_message, write_message};
use crate::core::forcefield::ForceFieldSource;
use crate::core::models::dataset::PhysicalPropertyDataSet;
use crate::core::models::request::EstimationRequest;
use crate::core::models::result::EstimationResult;
use crate::core::options::RequestOptions;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub server_address: String,
    pub server_port: u16,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new("localhost", 8100)
    }
}

impl ConnectionOptions {
    pub fn new(server_address: impl Into<String>, server_port: u16) -> Self {
        Self {
            server_address: server_address.into(),
            server_port,
        }
    }

    async fn exchange(&self, message: &ClientMessage) -> Result<ServerMessage, EngineError> {
        let mut stream = TcpStream::connect((self.server_address.as_str(), self.server_port))
            .await
            .map_err(|e| {
                EngineError::Protocol(format!(
                    "cannot reach server at {}:{}: {}",
                    self.server_address, self.server_port, e
                ))
            })?;
        write_message(&mut stream, message).await?;
        read_message(&mut stream).await?.ok_or_else(|| {
            EngineError::Protocol("server closed the connection without replying".to_string())
        })
    }
}

/// Submits estimation requests to a running server.
#[derive(Debug, Clone, Default)]
pub struct EvaluatorClient {
    connection_options: ConnectionOptions,
}

impl EvaluatorClient {
    pub fn new(connection_options: ConnectionOptions) -> Self {
        Self { connection_options }
    }

    /// # Errors
    ///
    /// Any failure to reach the server, or a refusal by it, is reported as
    /// [`EngineError::Submission`].
    pub async fn request_estimate(
        &self,
        data_set: &PhysicalPropertyDataSet,
        force_field: &ForceFieldSource,
        options: &RequestOptions,
    ) -> Result<Request, EngineError> {
        let message = ClientMessage::Submit {
            request: EstimationRequest {
                properties: data_set.properties.clone(),
                force_field: force_field.clone(),
                options: options.clone(),
            },
        };

        let reply = self
            .connection_options
            .exchange(&message)
            .await
            .map_err(|e| EngineError::Submission(e.to_string()))?;

        match reply {
            ServerMessage::Accepted { request_id } => {
                info!(request = %request_id, properties = data_set.len(), "Request submitted.");
                Ok(Request {
                    id: request_id,
                    connection_options: self.connection_options.clone(),
                })
            }
            ServerMessage::Rejected { reason } => Err(EngineError::Submission(reason)),
            other => Err(EngineError::Submission(format!(
                "unexpected reply to submission: {:?}",
                other
            ))),
        }
    }
}

/// Handle to a submitted request.
#[derive(Debug, Clone)]
pub struct Request {
    id: String,
    connection_options: ConnectionOptions,
}

impl Request {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn status(&self) -> Result<RequestStatus, EngineError> {
        let reply = self
            .connection_options
            .exchange(&ClientMessage::Query {
                request_id: self.id.clone(),
            })
            .await?;
        match reply {
            ServerMessage::Status { status, .. } => Ok(status),
            ServerMessage::Rejected { reason } => Err(EngineError::Protocol(reason)),
            other => Err(EngineError::Protocol(format!(
                "unexpected reply to status query: {:?}",
                other
            ))),
        }
    }

    /// Waits for the request to finish, querying the server every `polling_interval`.
    pub async fn results(&self, polling_interval: Duration) -> Result<EstimationResult, EngineError> {
        self.results_with_progress(polling_interval, &ProgressReporter::new())
            .await
    }

    pub async fn results_with_progress(
        &self,
        polling_interval: Duration,
        reporter: &ProgressReporter<'_>,
    ) -> Result<EstimationResult, EngineError> {
        let mut last_completed = 0;
        let mut announced_total = false;
        loop {
            match self.status().await? {
                RequestStatus::Completed { result } => {
                    if announced_total {
                        reporter.report(Progress::TaskFinish);
                    }
                    return Ok(result);
                }
                RequestStatus::Failed { kind, message } => {
                    if announced_total {
                        reporter.report(Progress::TaskFinish);
                    }
                    return Err(kind.into_error(message));
                }
                RequestStatus::Queued => {
                    reporter.report(Progress::StatusUpdate {
                        text: "Waiting for the server to schedule the request...".to_string(),
                    });
                }
                RequestStatus::Running {
                    completed_tasks,
                    total_tasks,
                } => {
                    if !announced_total {
                        reporter.report(Progress::TaskStart {
                            total: total_tasks as u64,
                        });
                        announced_total = true;
                    }
                    if completed_tasks > last_completed {
                        reporter.report(Progress::TaskIncrement {
                            amount: (completed_tasks - last_completed) as u64,
                        });
                        last_completed = completed_tasks;
                    }
                }
            }
            debug!(request = %self.id, "Request still running; polling again later.");
            tokio::time::sleep(polling_interval).await;
        }
    }
}
