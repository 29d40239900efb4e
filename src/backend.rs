use crate::config::BackendConfig;
use crate::error::{AppError, Result};
use crate::jobs::JobState;
use crate::request::ExportRequest;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// HTTP client for the analytics backend's task API.
pub struct Backend {
    client: Client,
    base_url: String,
    project: String,
    token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStatus {
    pub state: JobState,
    pub error_message: Option<String>,
}

#[derive(Deserialize)]
struct StartResponse {
    id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    state: String,
    #[serde(default)]
    error_message: Option<String>,
}

impl Backend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("basin-hydro/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            project: config.project.clone(),
            token: config.token.clone(),
        })
    }

    fn tasks_url(&self) -> String {
        format!("{}/projects/{}/tasks", self.base_url, self.project)
    }

    /// Start an export task and return its remote id.
    pub async fn start_export(&self, request: &ExportRequest) -> Result<String> {
        let url = self.tasks_url();
        debug!("Starting export {} via {}", request.description, url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        let body: StartResponse = check_status(response).await?.json().await?;

        if body.id.trim().is_empty() {
            return Err(AppError::InvalidData(format!(
                "Backend returned an empty task id for {}",
                request.description
            )));
        }

        Ok(body.id)
    }

    pub async fn task_status(&self, id: &str) -> Result<RemoteStatus> {
        let url = format!("{}/{}", self.tasks_url(), id);
        debug!("Querying task status from {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body: StatusResponse = check_status(response).await?.json().await?;

        Ok(RemoteStatus {
            state: map_state(&body.state)?,
            error_message: body.error_message.filter(|m| !m.is_empty()),
        })
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(AppError::Backend {
        status: status.as_u16(),
        message: if message.is_empty() {
            status.canonical_reason().unwrap_or("unknown").to_string()
        } else {
            message
        },
    })
}

fn map_state(state: &str) -> Result<JobState> {
    match state.to_ascii_uppercase().as_str() {
        "UNSUBMITTED" | "READY" | "PENDING" => Ok(JobState::Pending),
        "RUNNING" | "CANCEL_REQUESTED" | "CANCELLING" => Ok(JobState::Running),
        "COMPLETED" | "SUCCEEDED" => Ok(JobState::Completed),
        "FAILED" | "CANCELLED" => Ok(JobState::Failed),
        other => Err(AppError::Parse(format!("Unknown task state '{}'", other))),
    }
}
