use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::shape::OutputShape;

/// A completion request as received from a caller. Never mutated after receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub output_shape_token: String,
    pub tool_names: Vec<String>,
    pub mcp_servers: Vec<BTreeMap<String, String>>,
}

/// Everything the model routine needs for one call, with the shape already resolved.
#[derive(Debug, Clone)]
pub struct InvocationCall {
    pub model: String,
    pub prompt: String,
    pub shape: OutputShape,
    pub tools: Vec<String>,
    pub mcp_servers: Vec<BTreeMap<String, String>>,
}

/// The blocking model routine.
///
/// Runs on a worker thread, never on the async front end. Implementations
/// should poll `cancel` (or race it) and give up once it fires: the caller
/// has already stopped waiting.
pub trait Invoker: Send + Sync + 'static {
    fn invoke(&self, call: &InvocationCall, cancel: &CancellationToken) -> Result<Value>;
}

impl<F> Invoker for F
where
    F: Fn(&InvocationCall, &CancellationToken) -> Result<Value> + Send + Sync + 'static,
{
    fn invoke(&self, call: &InvocationCall, cancel: &CancellationToken) -> Result<Value> {
        self(call, cancel)
    }
}
