use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use serde_json::Value;
use toolwire_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    TokenUsage, ToolCallRequest,
};
use toolwire_sse::Sse;

use crate::Error;
use crate::proto::{ChatCompletionChunk, ToolCall};

struct PartialState {
    sse: Sse,
    id: Option<String>,
    tool_calls: Vec<ToolCall>,
    // Indexes of tool calls that are complete but not yet emitted. A tool
    // call is only complete once the next one starts or the choice finishes,
    // since its arguments arrive in pieces.
    pending_tool_call_idx: VecDeque<usize>,
    pending_usage: Option<TokenUsage>,
    // This field will be cleared after the response returns the complete event.
    pending_finish_reason: Option<ModelFinishReason>,
    done: bool,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    /// A streamed chat completion.
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub(crate) fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            tool_calls: Default::default(),
            pending_tool_call_idx: Default::default(),
            pending_usage: None,
            pending_finish_reason: None,
            done: false,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<ModelResponseEvent>, PartialState), Error> {
    let mut message_delta = None;

    while !partial_state.done && message_delta.is_none() {
        if !partial_state.pending_tool_call_idx.is_empty()
            || partial_state.pending_finish_reason.is_some()
        {
            // Flush what we have before reading further.
            break;
        }

        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                partial_state.done = true;
                break;
            }
            Err(err) => {
                return Err(Error::new(format!("{err}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {}", sse_event.data);
        if sse_event.data == "[DONE]" {
            partial_state.done = true;
            break;
        }

        let mut chunk =
            serde_json::from_str::<ChatCompletionChunk>(&sse_event.data)
                .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        if partial_state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id
        {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        };

        if let Some(usage) = chunk.usage {
            partial_state.pending_usage = Some(TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            });
        }

        let Some(choice) = chunk.choices.pop() else {
            continue;
        };

        message_delta = choice.delta.content.filter(|c| !c.is_empty());
        if let Some(tool_calls) = choice.delta.tool_calls {
            merge_tool_calls(&mut partial_state, tool_calls);
        }

        if let Some(finish_reason) = choice.finish_reason {
            // The last tool call is complete now.
            if let Some(last) = partial_state.tool_calls.len().checked_sub(1) {
                partial_state.pending_tool_call_idx.push_back(last);
            }
            partial_state.pending_finish_reason =
                Some(match finish_reason.as_str() {
                    "tool_calls" => ModelFinishReason::ToolCalls,
                    "length" => ModelFinishReason::Length,
                    _ => ModelFinishReason::Stop,
                });
        }
    }

    // The order of events are important. Always emit message delta first,
    // then pending tool calls, then usage once the stream has ended, and
    // finally the finish reason.

    if let Some(message_delta) = message_delta {
        return Ok((
            Some(ModelResponseEvent::MessageDelta(message_delta)),
            partial_state,
        ));
    }

    if let Some(idx) = partial_state.pending_tool_call_idx.pop_front() {
        let event = make_tool_call_event(&partial_state.tool_calls[idx]);
        return Ok((Some(event), partial_state));
    }

    if partial_state.pending_finish_reason.is_some() && !partial_state.done {
        // Keep reading, a usage chunk usually follows the finish reason.
        drain_trailer(&mut partial_state).await?;
    }

    if let Some(usage) = partial_state.pending_usage.take() {
        return Ok((Some(ModelResponseEvent::Usage(usage)), partial_state));
    }

    if let Some(finish_reason) = partial_state.pending_finish_reason.take() {
        return Ok((
            Some(ModelResponseEvent::Completed(finish_reason)),
            partial_state,
        ));
    }

    Ok((None, partial_state))
}

/// Reads the chunks after the finish reason until the stream ends, only
/// collecting usage from them.
async fn drain_trailer(partial_state: &mut PartialState) -> Result<(), Error> {
    loop {
        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(err) => {
                return Err(Error::new(format!("{err}"), ErrorKind::Other));
            }
        };
        if sse_event.data == "[DONE]" {
            break;
        }
        match serde_json::from_str::<ChatCompletionChunk>(&sse_event.data) {
            Ok(ChatCompletionChunk {
                usage: Some(usage), ..
            }) => {
                partial_state.pending_usage = Some(TokenUsage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                });
            }
            Ok(_) => {}
            Err(err) => warn!("ignoring malformed trailing chunk: {err}"),
        }
    }
    partial_state.done = true;
    Ok(())
}

fn merge_tool_calls(partial_state: &mut PartialState, tool_calls: Vec<ToolCall>) {
    for tool_call in tool_calls {
        let Some(partial_tool_call) = partial_state
            .tool_calls
            .iter_mut()
            .find(|t| t.index == tool_call.index)
        else {
            // A new tool call starts, so the previous one is complete.
            if let Some(prev) = partial_state.tool_calls.len().checked_sub(1) {
                partial_state.pending_tool_call_idx.push_back(prev);
            }
            partial_state.tool_calls.push(tool_call);
            continue;
        };
        // Patch the partial tool call.
        if let Some(id) = tool_call.id {
            partial_tool_call.id.get_or_insert_default().push_str(&id);
        }
        if let Some(function) = tool_call.function {
            match partial_tool_call.function {
                Some(ref mut partial_func) => {
                    if let Some(name) = function.name {
                        partial_func.name.get_or_insert_default().push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        partial_func
                            .arguments
                            .get_or_insert_default()
                            .push_str(&arguments);
                    }
                }
                None => partial_tool_call.function = Some(function),
            }
        }
    }
}

fn make_tool_call_event(tool_call: &ToolCall) -> ModelResponseEvent {
    let id = tool_call.id.clone().unwrap_or_default();
    let name = tool_call
        .function
        .as_ref()
        .and_then(|f| f.name.clone())
        .unwrap_or_default();
    let arguments = tool_call
        .function
        .as_ref()
        .and_then(|f| f.arguments.as_deref())
        .filter(|args| !args.trim().is_empty())
        .map(|args| {
            serde_json::from_str::<Value>(args).unwrap_or_else(|err| {
                warn!("tool call arguments are not valid JSON: {err}");
                Value::String(args.to_owned())
            })
        })
        .unwrap_or_else(|| Value::Object(Default::default()));
    ModelResponseEvent::ToolCall(ToolCallRequest {
        id,
        name,
        arguments,
    })
}
