use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;

use toolwire_model::{
    ModelFinishReason, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent, TokenUsage, ToolCallRequest,
};
use tracing::Instrument;

pub(crate) type TranscriptFn = Arc<dyn Fn(String) + Send + Sync>;
type SendRequestResult =
    Result<ModelClientResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, Option<TranscriptFn>) -> BoxedSendRequestFuture
        + Send + Sync
>;

/// A wrapper around a model provider that erases its type and collects
/// a streamed response into one message.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // `P` is erased here so that `Agent` needs no generic parameter.
        let handler_fn: HandlerFn = Arc::new(move |req, on_transcript| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err, on_transcript).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request and waits for the complete response.
    ///
    /// `on_transcript` receives every message delta as it arrives.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_transcript: Option<TranscriptFn>,
    ) -> SendRequestResult {
        (self.handler_fn)(req, on_transcript).await
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug, Default)]
pub struct ModelClientResponse {
    /// Concatenated message deltas.
    pub content: String,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
    /// Tokens spent on this request.
    pub usage: TokenUsage,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    on_transcript: Option<TranscriptFn>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("model request failed: {err}");
            return Err(Box::new(err));
        }
    };

    let mut collected = ModelClientResponse::default();
    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(err) => {
                error!("model response failed: {err}");
                return Err(Box::new(err));
            }
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(delta) => {
                collected.content.push_str(&delta);
                if let Some(on_transcript) = &on_transcript {
                    on_transcript(delta);
                }
            }
            ModelResponseEvent::ToolCall(req) => {
                collected.tool_calls.push(req);
            }
            ModelResponseEvent::Usage(usage) => {
                collected.usage.accumulate(usage);
            }
            ModelResponseEvent::Completed(reason) => {
                collected.finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use toolwire_model::{ErrorKind, ModelMessage};
    use toolwire_test_model::{
        PresetEvent, PresetResponse, TestModelProvider,
    };

    use super::*;

    fn request() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_assistant_turn(PresetResponse::with_events([
            PresetEvent::MessageDelta("Let me ".to_owned()),
            PresetEvent::MessageDelta("check.".to_owned()),
            PresetEvent::ToolCall(ToolCallRequest {
                id: "call_1".to_owned(),
                name: "get_alerts".to_owned(),
                arguments: json!({ "state": "NY" }),
            }),
        ]));

        let model_client = ModelClient::new(model_provider);

        // The provider picks the turn from history, so the same request
        // gets the same answer every time.
        for _ in 0..3 {
            let deltas = Arc::new(Mutex::new(vec![]));
            let on_transcript: TranscriptFn = {
                let deltas = Arc::clone(&deltas);
                Arc::new(move |delta: String| {
                    deltas.lock().unwrap().push(delta)
                })
            };
            let resp = model_client
                .send_request(request(), Some(on_transcript))
                .await
                .unwrap();
            assert_eq!(resp.content, "Let me check.");
            assert_eq!(resp.tool_calls.len(), 1);
            assert_eq!(resp.finish_reason, Some(ModelFinishReason::ToolCalls));
            assert_eq!(*deltas.lock().unwrap(), ["Let me ", "check."]);
        }
    }

    #[tokio::test]
    async fn test_error_handling() {
        let model_provider = TestModelProvider::default();
        let model_client = ModelClient::new(model_provider);
        let err = model_client
            .send_request(request(), None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Other);
    }
}
