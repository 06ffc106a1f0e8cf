use std::fmt::Debug;

use serde::Serialize;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "ibm/granite-3-2-8b-instruct";

/// The IBM Cloud IAM token endpoint.
pub const IAM_TOKEN_URL: &str = "https://iam.cloud.ibm.com/identity/token";

/// Text generation parameters sent with every request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenerationParameters {
    /// `greedy` or `sample`.
    pub decoding_method: String,
    /// Upper bound of generated tokens.
    pub max_new_tokens: u32,
    /// Lower bound of generated tokens.
    pub min_new_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Top-k sampling cutoff.
    pub top_k: u32,
    /// Nucleus sampling cutoff.
    pub top_p: f32,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            decoding_method: "sample".to_owned(),
            max_new_tokens: 100,
            min_new_tokens: 1,
            temperature: 0.5,
            top_k: 50,
            top_p: 1.0,
        }
    }
}

/// Builder for [`WatsonxConfig`].
#[derive(Clone)]
pub struct WatsonxConfigBuilder {
    url: String,
    api_key: String,
    project_id: String,
    model: Option<String>,
    iam_url: Option<String>,
    parameters: GenerationParameters,
}

impl WatsonxConfigBuilder {
    /// Creates a builder for the service at `url` (for example
    /// `https://us-south.ml.cloud.ibm.com`).
    #[inline]
    pub fn new<S1, S2, S3>(url: S1, api_key: S2, project_id: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            project_id: project_id.into(),
            model: None,
            iam_url: None,
            parameters: GenerationParameters::default(),
        }
    }

    /// Sets the model to use.
    #[inline]
    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Overrides the IAM token endpoint.
    #[inline]
    pub fn with_iam_url<S: Into<String>>(mut self, iam_url: S) -> Self {
        self.iam_url = Some(iam_url.into());
        self
    }

    /// Replaces the generation parameters.
    #[inline]
    pub fn with_parameters(mut self, parameters: GenerationParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Builds the configuration.
    #[inline]
    pub fn build(self) -> WatsonxConfig {
        WatsonxConfig {
            url: self.url.trim_end_matches('/').to_owned(),
            api_key: self.api_key,
            project_id: self.project_id,
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
            iam_url: self.iam_url.unwrap_or_else(|| IAM_TOKEN_URL.to_owned()),
            parameters: self.parameters,
        }
    }
}

impl Debug for WatsonxConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatsonxConfigBuilder")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Configuration for the watsonx.ai provider.
#[derive(Clone)]
pub struct WatsonxConfig {
    pub(crate) url: String,
    pub(crate) api_key: String,
    pub(crate) project_id: String,
    pub(crate) model: String,
    pub(crate) iam_url: String,
    pub(crate) parameters: GenerationParameters,
}

impl WatsonxConfig {
    /// Returns the model id.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Debug for WatsonxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatsonxConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("model", &self.model)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}
