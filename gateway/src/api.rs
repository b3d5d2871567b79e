use std::collections::BTreeMap;

use levelone_core::CompletionRequest;
use serde::Deserialize;

fn default_response_format() -> String {
    String::from("str")
}

// Input: What the user sends us
#[derive(Debug, Deserialize)]
pub struct CompletionBody {
    pub prompt: String,

    // A primitive keyword, or a base64 shape descriptor
    #[serde(default = "default_response_format")]
    pub response_format: String,

    #[serde(default)]
    pub tools: Vec<String>,

    #[serde(default)]
    pub mcp_servers: Vec<BTreeMap<String, String>>,
}

impl CompletionBody {
    pub fn into_request(self, model: String) -> CompletionRequest {
        CompletionRequest {
            model,
            prompt: self.prompt,
            output_shape_token: self.response_format,
            tool_names: self.tools,
            mcp_servers: self.mcp_servers,
        }
    }
}
