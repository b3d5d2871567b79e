use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use crate::codec::{self, CodecError};
use crate::invoke::{CompletionRequest, InvocationCall, Invoker};
use crate::resolver::ShapeResolver;
use crate::runtime::{DeadlineExecutor, InvocationOutcome};
use crate::shape::ShapeError;

/// 5 minutes, long enough for tool-using completions.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(300);

/// Route aliases served when no table is configured.
pub fn default_models() -> BTreeMap<String, String> {
    BTreeMap::from([
        (String::from("gpt4o"), String::from("gpt-4o")),
        (String::from("gpt4o-mini"), String::from("gpt-4o-mini")),
    ])
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("unsupported response_format: {0}")]
    Shape(#[from] ShapeError),

    #[error("Error processing request: {0}")]
    Encode(#[from] CodecError),

    #[error("Error processing request: {cause}")]
    Invocation { cause: String },

    #[error("request timed out")]
    TimedOut,
}

impl DispatchError {
    /// HTTP status for this failure. Timeouts get their own code.
    pub fn status(&self) -> u16 {
        match self {
            Self::UnknownModel(_) => 404,
            Self::Shape(_) => 400,
            Self::Encode(_) | Self::Invocation { .. } => 500,
            Self::TimedOut => 504,
        }
    }
}

// Output: what the caller gets back on success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub result: String,
}

// Output: what the caller gets back on any failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Completion(CompletionResponse),
    Error(ErrorBody),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl From<DispatchError> for DispatchResponse {
    fn from(err: DispatchError) -> Self {
        Self {
            status: err.status(),
            body: ResponseBody::Error(ErrorBody {
                detail: err.to_string(),
            }),
        }
    }
}

/// Schedules, bounds and marshals calls to the model routine.
///
/// Holds only read-only collaborators, so one instance serves every
/// concurrent request.
pub struct RequestDispatcher {
    invoker: Arc<dyn Invoker>,
    resolver: ShapeResolver,
    executor: DeadlineExecutor,
    deadline: Duration,
    models: BTreeMap<String, String>,
}

impl RequestDispatcher {
    pub fn new(invoker: Arc<dyn Invoker>, resolver: ShapeResolver, executor: DeadlineExecutor) -> Self {
        Self {
            invoker,
            resolver,
            executor,
            deadline: DEFAULT_DEADLINE,
            models: default_models(),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_models(mut self, models: BTreeMap<String, String>) -> Self {
        self.models = models;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Handles one request end to end. Every failure is folded into the response.
    pub async fn handle(&self, request: CompletionRequest) -> DispatchResponse {
        match self.try_handle(request).await {
            Ok(result) => DispatchResponse {
                status: 200,
                body: ResponseBody::Completion(CompletionResponse { result }),
            },
            Err(err) => err.into(),
        }
    }

    async fn try_handle(&self, request: CompletionRequest) -> Result<String, DispatchError> {
        // STEP 1: LOCATE the model behind the route alias
        let model = self
            .models
            .get(&request.model)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownModel(request.model.clone()))?;

        // STEP 2: RESOLVE the desired output shape
        let shape = self.resolver.resolve(&request.output_shape_token)?;
        info!("Model '{}' requested with output shape {}", model, shape);

        // STEP 3: ACT on a worker, bounded by the deadline
        let call = InvocationCall {
            model,
            prompt: request.prompt,
            shape,
            tools: request.tool_names,
            mcp_servers: request.mcp_servers,
        };
        let invoker = Arc::clone(&self.invoker);
        let outcome = self
            .executor
            .run(self.deadline, move |cancel| invoker.invoke(&call, cancel))
            .await;

        // STEP 4: MARSHAL the result for transport
        match outcome {
            InvocationOutcome::Success(value) => Ok(encode(&value)?),
            InvocationOutcome::Failure { cause, trace } => {
                error!("Invocation failed: {}", trace);
                Err(DispatchError::Invocation { cause })
            }
            InvocationOutcome::TimedOut => Err(DispatchError::TimedOut),
        }
    }
}

fn encode(value: &Value) -> Result<String, CodecError> {
    codec::encode_result(value).inspect_err(|err| error!("Result encoding failed: {}", err))
}
