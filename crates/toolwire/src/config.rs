//! Settings read from the process environment.

use std::env;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};
use std::path::{Path, PathBuf};

use toolwire_openai_model::{OpenAIConfig, OpenAIConfigBuilder};
use toolwire_watsonx_model::{WatsonxConfig, WatsonxConfigBuilder};

/// Endpoint used when `MCP_SERVER_URL` is not set.
pub const DEFAULT_MCP_SERVER_URL: &str = "http://0.0.0.0:8000/sse";

/// Application name used when `TOOLWIRE_APP_NAME` is not set.
pub const DEFAULT_APP_NAME: &str = "Weather-Agent";

/// A configuration error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    Missing(&'static str),
    /// A variable holds a value that is not understood.
    Invalid {
        /// Variable name.
        var: &'static str,
        /// The offending value.
        value: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(var) => {
                write!(f, "environment variable {var} is not set")
            }
            ConfigError::Invalid { var, value } => {
                write!(f, "environment variable {var} has invalid value {value:?}")
            }
        }
    }
}

impl StdError for ConfigError {}

/// Loads `.env` from the working directory or its parents into the
/// process environment. Variables that are already set are kept.
///
/// Returns the path of the loaded file, `None` if there is none. This
/// must run before [`telemetry::init`](crate::telemetry::init) so that a
/// `RUST_LOG` from the file takes effect.
pub fn load_dotenv() -> Result<Option<PathBuf>, dotenvy::Error> {
    match dotenvy::dotenv() {
        Ok(path) => Ok(Some(path)),
        Err(err) if err.not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Loads the environment file at `path`, like [`load_dotenv`].
pub fn load_dotenv_from(path: &Path) -> Result<(), dotenvy::Error> {
    dotenvy::from_path(path)
}

/// Which model provider answers the queries, with its credentials.
#[derive(Clone, PartialEq, Eq)]
pub enum ProviderSettings {
    /// Groq, or any other OpenAI-compatible chat completion API.
    Groq {
        /// API key.
        api_key: String,
        /// Model id, provider default when unset.
        model: Option<String>,
        /// Base URL, Groq when unset.
        base_url: Option<String>,
    },
    /// IBM watsonx.ai text generation.
    Watsonx {
        /// Regional service URL.
        url: String,
        /// IBM Cloud API key.
        api_key: String,
        /// Project id.
        project_id: String,
        /// Model id, provider default when unset.
        model: Option<String>,
    },
}

/// Provider configuration ready to build a model provider from.
#[derive(Clone, Debug)]
pub enum ModelConfig {
    /// For `OpenAIProvider`.
    OpenAI(OpenAIConfig),
    /// For `WatsonxProvider`.
    Watsonx(WatsonxConfig),
}

impl ProviderSettings {
    /// Builds the configuration of the selected provider.
    pub fn model_config(&self) -> ModelConfig {
        match self {
            ProviderSettings::Groq {
                api_key,
                model,
                base_url,
            } => {
                let mut builder = OpenAIConfigBuilder::with_api_key(api_key);
                if let Some(model) = model {
                    builder = builder.with_model(model);
                }
                if let Some(base_url) = base_url {
                    builder = builder.with_base_url(base_url);
                }
                ModelConfig::OpenAI(builder.build())
            }
            ProviderSettings::Watsonx {
                url,
                api_key,
                project_id,
                model,
            } => {
                let mut builder =
                    WatsonxConfigBuilder::new(url, api_key, project_id);
                if let Some(model) = model {
                    builder = builder.with_model(model);
                }
                ModelConfig::Watsonx(builder.build())
            }
        }
    }
}

impl Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderSettings::Groq {
                model, base_url, ..
            } => f
                .debug_struct("Groq")
                .field("api_key", &"<redacted>")
                .field("model", model)
                .field("base_url", base_url)
                .finish(),
            ProviderSettings::Watsonx {
                url,
                project_id,
                model,
                ..
            } => f
                .debug_struct("Watsonx")
                .field("url", url)
                .field("api_key", &"<redacted>")
                .field("project_id", project_id)
                .field("model", model)
                .finish(),
        }
    }
}

/// Everything the workflow needs to know before it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// The selected model provider.
    pub provider: ProviderSettings,
    /// SSE endpoint of the MCP tool server.
    pub mcp_server_url: String,
    /// Name recorded on the root tracing span.
    pub app_name: String,
}

impl Settings {
    /// Reads the settings from the process environment.
    ///
    /// Call [`load_dotenv`] first for `.env` values to be seen.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Reads the settings through `lookup`, which returns the value of a
    /// variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset.
        let get = |var: &str| lookup(var).filter(|value| !value.is_empty());
        let require = |var: &'static str| get(var).ok_or(ConfigError::Missing(var));

        let provider = match get("TOOLWIRE_PROVIDER").as_deref() {
            None | Some("groq") => ProviderSettings::Groq {
                api_key: require("GROQ_API_KEY")?,
                model: get("GROQ_MODEL"),
                base_url: get("GROQ_BASE_URL"),
            },
            Some("watsonx") => ProviderSettings::Watsonx {
                url: require("WATSONX_URL")?,
                api_key: require("WATSONX_API_KEY")?,
                project_id: require("WATSONX_PROJECT_ID")?,
                model: get("WATSONX_MODEL"),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "TOOLWIRE_PROVIDER",
                    value: other.to_owned(),
                });
            }
        };

        Ok(Self {
            provider,
            mcp_server_url: get("MCP_SERVER_URL")
                .unwrap_or_else(|| DEFAULT_MCP_SERVER_URL.to_owned()),
            app_name: get("TOOLWIRE_APP_NAME")
                .unwrap_or_else(|| DEFAULT_APP_NAME.to_owned()),
        })
    }
}
