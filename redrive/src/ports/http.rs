//! Orchestration client speaking the Step Functions JSON 1.0 protocol.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{MapRunDescription, Orchestrator, StartedExecution};
use crate::errors::{RedriveError, Result};

const TARGET_PREFIX: &str = "AWSStepFunctions";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// HTTP client for the orchestration service.
///
/// Requests are sent unsigned. The endpoint is expected to be a local
/// emulator or a proxy that attaches credentials.
#[derive(Debug, Clone)]
pub struct StatesHttpClient {
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartExecutionRequest<'a> {
    state_machine_arn: &'a str,
    name: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartExecutionResponse {
    execution_arn: String,
    #[serde(default)]
    start_date: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeMapRunRequest<'a> {
    map_run_arn: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeMapRunResponse {
    map_run_arn: String,
    execution_arn: String,
}

#[derive(Deserialize, Default)]
struct ServiceError {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(alias = "Message", default)]
    message: String,
}

impl ServiceError {
    /// Error code without the namespace, e.g. `ExecutionAlreadyExists`.
    fn code(&self) -> &str {
        self.error_type
            .rsplit('#')
            .next()
            .unwrap_or(self.error_type.as_str())
    }

    fn is_throttling(&self) -> bool {
        matches!(
            self.code(),
            "ThrottlingException" | "TooManyRequestsException" | "ServiceUnavailable"
        )
    }
}

impl StatesHttpClient {
    /// Creates a client for the given endpoint URL.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// The endpoint requests are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<Req, Resp>(&self, operation: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        debug!(operation, endpoint = %self.endpoint, "Calling orchestration service");

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!(operation, error = %e, "Orchestration service unreachable");
                RedriveError::Orchestration(format!("{operation}: {e}"))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RedriveError::Orchestration(format!("{operation}: {e}")))?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(RedriveError::from);
        }

        let service_error: ServiceError = serde_json::from_str(&body).unwrap_or_default();
        error!(
            operation,
            status = %status,
            code = service_error.code(),
            message = %service_error.message,
            "Orchestration service returned an error"
        );
        Err(Self::classify(operation, status, &service_error, &body))
    }

    fn classify(operation: &str, status: StatusCode, err: &ServiceError, body: &str) -> RedriveError {
        if status.is_server_error() || err.is_throttling() {
            return RedriveError::Orchestration(format!("{operation} returned {status}: {body}"));
        }

        let message = if err.message.is_empty() {
            format!("{} ({status})", err.code())
        } else {
            format!("{}: {}", err.code(), err.message)
        };

        if operation == "StartExecution" {
            RedriveError::Dispatch(message)
        } else {
            RedriveError::rejected(operation, message)
        }
    }
}

fn epoch_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    let whole = seconds.trunc();
    // Epoch seconds are far inside i64 range; the cast only drops the fraction.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = ((seconds - whole) * 1e9) as u32;
    #[allow(clippy::cast_possible_truncation)]
    Utc.timestamp_opt(whole as i64, nanos).single()
}

#[async_trait]
impl Orchestrator for StatesHttpClient {
    async fn start_execution(
        &self,
        state_machine_arn: &str,
        run_name: &str,
        input: &str,
    ) -> Result<StartedExecution> {
        let response: StartExecutionResponse = self
            .call(
                "StartExecution",
                &StartExecutionRequest {
                    state_machine_arn,
                    name: run_name,
                    input,
                },
            )
            .await?;

        Ok(StartedExecution {
            execution_arn: response.execution_arn,
            run_name: run_name.to_string(),
            start_time: response
                .start_date
                .and_then(epoch_to_datetime)
                .unwrap_or_else(Utc::now),
        })
    }

    async fn describe_map_run(&self, map_run_arn: &str) -> Result<MapRunDescription> {
        let response: DescribeMapRunResponse = self
            .call("DescribeMapRun", &DescribeMapRunRequest { map_run_arn })
            .await?;

        Ok(MapRunDescription {
            map_run_arn: response.map_run_arn,
            execution_arn: response.execution_arn,
        })
    }
}
