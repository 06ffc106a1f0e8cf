use serde::{Deserialize, Serialize};
use toolwire_model::{ModelFinishReason, ModelMessage, ModelRequest};

use crate::WatsonxConfig;
use crate::config::GenerationParameters;

#[derive(Clone, Debug, Deserialize)]
pub struct IamToken {
    pub access_token: String,
    /// Unix timestamp in seconds.
    pub expiration: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TextGenerationRequest<'a> {
    input: String,
    model_id: &'a str,
    project_id: &'a str,
    parameters: &'a GenerationParameters,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TextGenerationResponse {
    pub results: Vec<TextGenerationResult>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TextGenerationResult {
    pub generated_text: String,
    #[serde(default)]
    pub generated_token_count: u64,
    #[serde(default)]
    pub input_token_count: u64,
    pub stop_reason: Option<String>,
}

impl TextGenerationResult {
    pub fn finish_reason(&self) -> ModelFinishReason {
        match self.stop_reason.as_deref() {
            Some("max_tokens") | Some("token_limit") => {
                ModelFinishReason::Length
            }
            _ => ModelFinishReason::Stop,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ErrorBody {
    pub errors: Vec<ErrorDetail>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
}

pub fn create_request<'a>(
    req: &ModelRequest,
    config: &'a WatsonxConfig,
) -> TextGenerationRequest<'a> {
    TextGenerationRequest {
        input: create_prompt(&req.messages),
        model_id: &config.model,
        project_id: &config.project_id,
        parameters: &config.parameters,
    }
}

/// Flattens the conversation into a single prompt, since the text
/// generation endpoint has no notion of roles.
pub fn create_prompt(messages: &[ModelMessage]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        match msg {
            ModelMessage::System(content) => prompt.push_str(content),
            ModelMessage::User(content) => {
                prompt.push_str("Question: ");
                prompt.push_str(content);
            }
            ModelMessage::Assistant { content, .. } => {
                prompt.push_str("Answer: ");
                prompt.push_str(content);
            }
            ModelMessage::Tool(result) => {
                prompt.push_str(&format!("Observation ({}): ", result.name));
                prompt.push_str(&result.content);
            }
        }
        prompt.push_str("\n\n");
    }
    prompt.push_str("Answer:");
    prompt
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use toolwire_model::ToolCallResult;

    use super::*;
    use crate::WatsonxConfigBuilder;

    #[test]
    fn test_create_prompt() {
        let prompt = create_prompt(&[
            ModelMessage::System("You are concise.".to_owned()),
            ModelMessage::User("What is AIOps?".to_owned()),
            ModelMessage::assistant("Let me look it up."),
            ModelMessage::Tool(ToolCallResult {
                id: "1".to_owned(),
                name: "search".to_owned(),
                content: "AI for IT operations".to_owned(),
            }),
        ]);
        assert_eq!(
            prompt,
            "You are concise.\n\n\
             Question: What is AIOps?\n\n\
             Answer: Let me look it up.\n\n\
             Observation (search): AI for IT operations\n\n\
             Answer:"
        );
    }

    #[test]
    fn test_request_wire_format() {
        let config = WatsonxConfigBuilder::new(
            "https://us-south.ml.cloud.ibm.com/",
            "key",
            "project-1",
        )
        .build();
        let req = ModelRequest {
            messages: vec![ModelMessage::User("What is GitOps?".to_owned())],
            tools: vec![],
        };
        let value = serde_json::to_value(create_request(&req, &config)).unwrap();
        assert_eq!(
            value,
            json!({
                "input": "Question: What is GitOps?\n\nAnswer:",
                "model_id": "ibm/granite-3-2-8b-instruct",
                "project_id": "project-1",
                "parameters": {
                    "decoding_method": "sample",
                    "max_new_tokens": 100,
                    "min_new_tokens": 1,
                    "temperature": 0.5,
                    "top_k": 50,
                    "top_p": 1.0
                }
            })
        );
    }

    #[test]
    fn test_parse_response() {
        let resp: TextGenerationResponse = serde_json::from_value(json!({
            "model_id": "ibm/granite-3-2-8b-instruct",
            "created_at": "2025-01-01T00:00:00.000Z",
            "results": [{
                "generated_text": " AIOps applies machine learning to IT operations.",
                "generated_token_count": 11,
                "input_token_count": 9,
                "stop_reason": "eos_token"
            }]
        }))
        .unwrap();
        let result = &resp.results[0];
        assert_eq!(result.generated_token_count, 11);
        assert_eq!(result.finish_reason(), ModelFinishReason::Stop);
    }
}
