use anyhow::{anyhow, bail, Context, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::invoke::{InvocationCall, Invoker};
use crate::shape::{OutputShape, PrimitiveKind};

/// Model routine backed by the OpenAI chat completions API.
///
/// Every call builds its own client and single-threaded runtime on the
/// worker thread, so nothing network-related outlives the call or leaks
/// between requests.
pub struct OpenAiInvoker {
    config: OpenAIConfig,
}

impl OpenAiInvoker {
    pub fn new(api_key: &str, api_base: Option<&str>) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = api_base {
            config = config.with_api_base(base);
        }
        info!("OpenAI invoker configured. Base: {}", api_base.unwrap_or("default"));
        Self { config }
    }

    async fn complete(&self, call: &InvocationCall) -> Result<Value> {
        // 1. Prepare the Request
        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(&call.model).messages([ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(call.prompt.as_str())
                .build()?,
        )]);

        // 2. Ask for structured output unless plain text will do
        if call.shape != OutputShape::Primitive(PrimitiveKind::String) {
            request.response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: format_name(&call.shape),
                    schema: Some(envelope_schema(&call.shape)),
                    strict: None,
                },
            });
        }
        let request = request.build()?;

        // 3. Send to AI
        let client = Client::with_config(self.config.clone());
        let response = client.chat().create(request).await?;
        let message = &response
            .choices
            .first()
            .context("model returned no choices")?
            .message;

        // 4. Read the answer back into the requested shape
        match (&message.content, &message.refusal) {
            (Some(content), _) => read_answer(&call.shape, content),
            (None, Some(refusal)) => bail!("model refused: {}", refusal),
            (None, None) => bail!("model returned an empty message"),
        }
    }
}

impl Invoker for OpenAiInvoker {
    fn invoke(&self, call: &InvocationCall, cancel: &CancellationToken) -> Result<Value> {
        if !call.tools.is_empty() || !call.mcp_servers.is_empty() {
            // Tool hosting lives outside this service.
            debug!(
                "Forwarding {} tool names and {} MCP servers without local execution",
                call.tools.len(),
                call.mcp_servers.len()
            );
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start worker runtime")?;

        runtime.block_on(async {
            tokio::select! {
                answer = self.complete(call) => answer,
                () = cancel.cancelled() => Err(anyhow!("invocation cancelled")),
            }
        })
    }
}

// OpenAI wants an object at the root, so every shape travels as {"result": ...}.
fn envelope_schema(shape: &OutputShape) -> Value {
    json!({
        "type": "object",
        "properties": { "result": shape.json_schema() },
        "required": ["result"],
        "additionalProperties": false,
    })
}

// Names must match ^[a-zA-Z0-9_-]{1,64}$.
fn format_name(shape: &OutputShape) -> String {
    let name: String = shape
        .name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if name.is_empty() {
        String::from("result")
    } else {
        name
    }
}

pub fn read_answer(shape: &OutputShape, content: &str) -> Result<Value> {
    if *shape == OutputShape::Primitive(PrimitiveKind::String) {
        return Ok(Value::String(content.to_string()));
    }

    let mut envelope: Value = serde_json::from_str(content).context("model answer is not valid JSON")?;
    let answer = envelope
        .get_mut("result")
        .map(Value::take)
        .context("model answer has no 'result' member")?;
    if !shape.accepts(&answer) {
        bail!("model answer {} does not match {}", answer, shape);
    }
    Ok(answer)
}
