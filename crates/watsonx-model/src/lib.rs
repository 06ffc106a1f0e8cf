//! A model provider for IBM watsonx.ai text generation.
//!
//! The service authenticates with short-lived IAM bearer tokens that are
//! exchanged for the account API key. Tokens are cached by the provider
//! and refreshed shortly before they expire.

#[macro_use]
extern crate tracing;

mod config;
mod proto;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::{Client, Response, StatusCode};
use tokio::sync::Mutex;
use toolwire_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelRequest, ModelResponse,
    ModelResponseEvent, TokenUsage,
};

pub use config::{
    DEFAULT_MODEL, GenerationParameters, IAM_TOKEN_URL, WatsonxConfig,
    WatsonxConfigBuilder,
};
use proto::{IamToken, TextGenerationResponse};

const API_VERSION: &str = "2023-05-29";

// Refresh the token this many seconds before it actually expires.
const TOKEN_EXPIRY_MARGIN: u64 = 60;

/// Error type for [`WatsonxProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// watsonx.ai model provider.
///
/// Tool definitions in requests are ignored, the text generation endpoint
/// only produces plain text.
#[derive(Clone)]
pub struct WatsonxProvider {
    client: Client,
    config: Arc<WatsonxConfig>,
    token: Arc<Mutex<Option<IamToken>>>,
}

impl WatsonxProvider {
    /// Creates a new `WatsonxProvider` with the given configuration.
    #[inline]
    pub fn new(config: WatsonxConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
            token: Default::default(),
        }
    }
}

impl fmt::Debug for WatsonxProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatsonxProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ModelProvider for WatsonxProvider {
    type Error = Error;
    type Response = WatsonxResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        if !req.tools.is_empty() {
            debug!(
                "ignoring {} tools, not supported by text generation",
                req.tools.len()
            );
        }
        let body = serde_json::to_value(proto::create_request(req, &self.config));
        let client = self.client.clone();
        let config = Arc::clone(&self.config);
        let token = Arc::clone(&self.token);

        async move {
            let body = body
                .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
            let access_token = access_token(&client, &config, &token).await?;

            let resp = client
                .post(format!(
                    "{}/ml/v1/text/generation?version={API_VERSION}",
                    config.url
                ))
                .bearer_auth(access_token)
                .json(&body)
                .send()
                .await
                .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
            let resp = check_status(resp).await?;
            let resp: TextGenerationResponse = resp
                .json()
                .await
                .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
            Ok(WatsonxResponse::from_generation(resp))
        }
    }
}

async fn access_token(
    client: &Client,
    config: &WatsonxConfig,
    cache: &Mutex<Option<IamToken>>,
) -> Result<String, Error> {
    // The lock is held across the refresh so concurrent requests only
    // exchange the key once.
    let mut cached = cache.lock().await;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    if let Some(token) = cached.as_ref() {
        if token.expiration > now + TOKEN_EXPIRY_MARGIN {
            return Ok(token.access_token.clone());
        }
    }

    debug!("requesting a new IAM token");
    let resp = client
        .post(&config.iam_url)
        .form(&[
            ("grant_type", "urn:ibm:params:oauth:grant-type:apikey"),
            ("apikey", config.api_key.as_str()),
        ])
        .send()
        .await
        .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
    let resp = check_status(resp).await?;
    let token: IamToken = resp
        .json()
        .await
        .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
    let access_token = token.access_token.clone();
    *cached = Some(token);
    Ok(access_token)
}

async fn check_status(resp: Response) -> Result<Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let kind = match status {
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimitExceeded,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ErrorKind::Unauthorized
        }
        _ => ErrorKind::Other,
    };
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<proto::ErrorBody>(&body)
        .ok()
        .and_then(|b| b.errors.into_iter().next())
        .map(|e| e.message)
        .unwrap_or(body);
    error!("watsonx request failed with {status}: {message}");
    Err(Error::new(format!("{status}: {message}"), kind))
}

/// A completed text generation, replayed as response events.
#[derive(Debug)]
pub struct WatsonxResponse {
    events: VecDeque<ModelResponseEvent>,
}

impl WatsonxResponse {
    fn from_generation(resp: TextGenerationResponse) -> Self {
        let mut events = VecDeque::new();
        let Some(result) = resp.results.into_iter().next() else {
            events.push_back(ModelResponseEvent::Completed(
                toolwire_model::ModelFinishReason::Stop,
            ));
            return Self { events };
        };

        let finish_reason = result.finish_reason();
        let text = result.generated_text.trim();
        if !text.is_empty() {
            events.push_back(ModelResponseEvent::MessageDelta(text.to_owned()));
        }
        events.push_back(ModelResponseEvent::Usage(TokenUsage {
            prompt_tokens: result.input_token_count,
            completion_tokens: result.generated_token_count,
        }));
        events.push_back(ModelResponseEvent::Completed(finish_reason));
        Self { events }
    }
}

impl ModelResponse for WatsonxResponse {
    type Error = Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        Poll::Ready(Ok(self.get_mut().events.pop_front()))
    }
}
