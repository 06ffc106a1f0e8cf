//! Conversation-related types.

use std::fmt::{self, Display};

use toolwire_model::{ModelMessage, TokenUsage};

const BANNER_WIDTH: usize = 80;

/// Represents a conversation.
#[derive(Clone, Default, Debug)]
pub struct Conversation {
    pub(crate) items: Vec<Item>,
    pub(crate) usage: TokenUsage,
}

impl Conversation {
    /// Returns the items in the order they were produced.
    #[inline]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Returns the final answer of the assistant, if there is one.
    pub fn final_answer(&self) -> Option<&str> {
        match self.items.last().map(Item::message) {
            Some(ModelMessage::Assistant {
                content,
                tool_calls,
            }) if tool_calls.is_empty() => Some(content.as_str()),
            _ => None,
        }
    }

    /// Returns the tokens spent on every model request.
    #[inline]
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    #[inline]
    pub(crate) fn push(&mut self, msg: ModelMessage) {
        self.items.push(Item { msg });
    }

    pub(crate) fn messages(&self) -> Vec<ModelMessage> {
        self.items.iter().map(|item| item.msg.clone()).collect()
    }
}

/// Pretty-prints every item, one block per message.
impl Display for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            writeln!(f, "{item}")?;
        }
        Ok(())
    }
}

/// An item in the conversation.
#[derive(Clone, Debug)]
pub struct Item {
    pub(crate) msg: ModelMessage,
}

impl Item {
    /// Returns the underlying message.
    #[inline]
    pub fn message(&self) -> &ModelMessage {
        &self.msg
    }

    /// Returns the title of the banner printed above this item.
    pub fn role(&self) -> &'static str {
        match self.msg {
            ModelMessage::System(_) => "System Message",
            ModelMessage::User(_) => "Human Message",
            ModelMessage::Assistant { .. } => "Ai Message",
            ModelMessage::Tool(_) => "Tool Message",
        }
    }
}

/// Renders the item as a banner line, followed by the content and, for
/// the assistant, the tool calls it requested.
impl Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = format!(" {} ", self.role());
        writeln!(f, "{title:=^width$}", width = BANNER_WIDTH)?;
        match &self.msg {
            ModelMessage::System(content) | ModelMessage::User(content) => {
                write!(f, "\n{content}")
            }
            ModelMessage::Assistant {
                content,
                tool_calls,
            } => {
                if !content.is_empty() {
                    write!(f, "\n{content}")?;
                }
                if tool_calls.is_empty() {
                    return Ok(());
                }
                if !content.is_empty() {
                    writeln!(f)?;
                }
                write!(f, "Tool Calls:")?;
                for call in tool_calls {
                    write!(f, "\n  {} ({})", call.name, call.id)?;
                    write!(f, "\n Call ID: {}", call.id)?;
                    write!(f, "\n  Args:")?;
                    match call.arguments.as_object() {
                        Some(args) => {
                            for (key, value) in args {
                                match value.as_str() {
                                    Some(s) => write!(f, "\n    {key}: {s}")?,
                                    None => write!(f, "\n    {key}: {value}")?,
                                }
                            }
                        }
                        None => write!(f, "\n    {}", call.arguments)?,
                    }
                }
                Ok(())
            }
            ModelMessage::Tool(result) => {
                write!(f, "Name: {}\n\n{}", result.name, result.content)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use toolwire_model::{ToolCallRequest, ToolCallResult};

    use super::*;

    #[test]
    fn test_pretty_print() {
        let mut conversation = Conversation::default();
        conversation.push(ModelMessage::User("Any alerts in NY?".to_owned()));
        conversation.push(ModelMessage::Assistant {
            content: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: "call_a".to_owned(),
                name: "get_alerts".to_owned(),
                arguments: json!({ "state": "NY" }),
            }],
        });
        conversation.push(ModelMessage::Tool(ToolCallResult {
            id: "call_a".to_owned(),
            name: "get_alerts".to_owned(),
            content: "No active alerts for this state.".to_owned(),
        }));
        conversation.push(ModelMessage::assistant("There are no alerts."));

        let expected = "\
================================ Human Message =================================

Any alerts in NY?
================================== Ai Message ==================================
Tool Calls:
  get_alerts (call_a)
 Call ID: call_a
  Args:
    state: NY
================================= Tool Message =================================
Name: get_alerts

No active alerts for this state.
================================== Ai Message ==================================

There are no alerts.
";
        assert_eq!(conversation.to_string(), expected);
        assert_eq!(conversation.final_answer(), Some("There are no alerts."));
    }

    #[test]
    fn test_final_answer_requires_no_tool_calls() {
        let mut conversation = Conversation::default();
        assert_eq!(conversation.final_answer(), None);
        conversation.push(ModelMessage::Assistant {
            content: "Let me check.".to_owned(),
            tool_calls: vec![ToolCallRequest {
                id: "call_a".to_owned(),
                name: "get_alerts".to_owned(),
                arguments: json!({ "state": "NY" }),
            }],
        });
        assert_eq!(conversation.final_answer(), None);
        assert_eq!(conversation.items()[0].role(), "Ai Message");
    }
}
