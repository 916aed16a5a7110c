use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::config::ExecutionConfig;
use crate::error::{CollabError, Result};

/// A single code submission bound for the external execution service.
/// All fields are required; stdin may be empty but must be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
    pub stdin: String,
}

/// Normalized result of one sandboxed run.
///
/// The gateway reports either an error message or a
/// status/time/memory/output tuple; both shapes are surfaced to the
/// submitter verbatim. Time is seconds, memory is peak KB.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionOutcome {
    Failure {
        error: String,
    },
    Success {
        status: String,
        time: f64,
        memory: u64,
        output: String,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    fn failure(message: impl Into<String>) -> Self {
        ExecutionOutcome::Failure {
            error: message.into(),
        }
    }
}

/// Client for the external code-execution gateway.
///
/// Each call is a single independent sandboxed run: no retry, no caching,
/// no shared state between submissions. The only timeout is the HTTP
/// client's request timeout, mirroring the gateway's own policy.
pub struct ExecutionClient {
    gateway_url: String,
    client: reqwest::Client,
}

impl ExecutionClient {
    pub fn new(config: &ExecutionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CollabError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            gateway_url: config.gateway_url.clone(),
            client,
        })
    }

    /// Submit code for execution and normalize the response.
    ///
    /// Transport failures and malformed responses become an error outcome
    /// carrying a human-readable message; the caller surfaces it and the
    /// user re-submits explicitly.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        tracing::info!(
            language = %request.language,
            code_bytes = request.code.len(),
            "Submitting code to execution gateway"
        );

        match self.try_execute(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    language = %request.language,
                    error = %e,
                    "Execution gateway call failed"
                );
                ExecutionOutcome::failure(e.to_string())
            }
        }
    }

    async fn try_execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome> {
        let response = self
            .client
            .post(&self.gateway_url)
            .json(request)
            .send()
            .await
            .map_err(|e| CollabError::gateway(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CollabError::gateway(format!(
                "Gateway returned status {}: {}",
                status, error_text
            )));
        }

        response
            .json::<ExecutionOutcome>()
            .await
            .map_err(|e| CollabError::gateway(format!("Malformed gateway response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_shape_deserializes() {
        let json = r#"{"status":"Accepted","time":0.002,"memory":3412,"output":"2\n"}"#;
        let outcome: ExecutionOutcome = serde_json::from_str(json).unwrap();

        match outcome {
            ExecutionOutcome::Success {
                status,
                time,
                memory,
                output,
            } => {
                assert_eq!(status, "Accepted");
                assert!(time < 1.0);
                assert_eq!(memory, 3412);
                assert!(output.contains('2'));
            }
            ExecutionOutcome::Failure { error } => panic!("unexpected failure: {}", error),
        }
    }

    #[test]
    fn test_error_shape_deserializes() {
        let json = r#"{"error":"Unsupported language: brainfuck"}"#;
        let outcome: ExecutionOutcome = serde_json::from_str(json).unwrap();

        assert!(!outcome.is_success());
        match outcome {
            ExecutionOutcome::Failure { error } => {
                assert!(error.contains("Unsupported language"));
            }
            ExecutionOutcome::Success { .. } => panic!("error shape must not parse as success"),
        }
    }

    #[test]
    fn test_error_shape_never_becomes_empty_success() {
        // A body with only an error field must not produce a success
        // outcome with defaulted fields
        let json = r#"{"error":"sandbox crashed"}"#;
        let outcome: ExecutionOutcome = serde_json::from_str(json).unwrap();
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_request_requires_all_fields() {
        let missing_stdin = r#"{"language":"python","code":"print(1)"}"#;
        assert!(serde_json::from_str::<ExecutionRequest>(missing_stdin).is_err());

        let complete = r#"{"language":"python","code":"print(1)","stdin":""}"#;
        assert!(serde_json::from_str::<ExecutionRequest>(complete).is_ok());
    }

    #[test]
    fn test_outcome_roundtrip_preserves_fields() {
        let outcome = ExecutionOutcome::Success {
            status: "Accepted".to_string(),
            time: 0.01,
            memory: 1024,
            output: "hello\n".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "Accepted");
        assert_eq!(json["memory"], 1024);
        assert_eq!(json["output"], "hello\n");
        assert!(json.get("error").is_none());
    }
}
