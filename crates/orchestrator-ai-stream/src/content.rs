use crate::event::ProviderEvent;
use crate::ledger::Session;
use crate::usage::UsageTotals;

/// A structured tool call as it stood at `ToolCallEnd`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CompletedToolCall {
    pub index: usize,
    pub id: String,
    pub name: String,
    /// Concatenated argument payload, exactly as streamed.
    pub arguments: String,
}

impl CompletedToolCall {
    /// Parses the argument payload as JSON.
    pub fn arguments_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }
}

/// Final aggregated output for a completed run.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunOutput {
    /// Visible text with inline tool sections removed.
    pub content: String,
    /// Structured tool calls in the order they closed.
    pub tool_calls: Vec<CompletedToolCall>,
    pub finish_reason: Option<String>,
    /// `None` if the backend never reported usage.
    pub usage: Option<UsageTotals>,
    /// The ledger record after this run's usage update, when one happened.
    pub session: Option<Session>,
}

impl RunOutput {
    pub fn text(&self) -> &str {
        &self.content
    }

    /// Folds one event into the output.
    pub(crate) fn observe(&mut self, event: &ProviderEvent) {
        match event {
            ProviderEvent::ContentDelta { content } => self.content.push_str(content),
            ProviderEvent::ToolCallEnd {
                index,
                id,
                name,
                arguments,
            } => self.tool_calls.push(CompletedToolCall {
                index: *index,
                id: id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            }),
            ProviderEvent::Finish { finish_reason, .. } => {
                self.finish_reason.clone_from(finish_reason);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_collects_text_tool_calls_and_finish_reason() {
        let mut output = RunOutput::default();
        let events = [
            ProviderEvent::content("hello"),
            ProviderEvent::ToolCallDelta {
                index: 0,
                id: "c".into(),
                arguments_fragment: "{\"a\":".into(),
            },
            ProviderEvent::content(" world"),
            ProviderEvent::ToolCallEnd {
                index: 0,
                id: "c".into(),
                name: "t".into(),
                arguments: "{\"a\":1}".into(),
            },
            ProviderEvent::Finish {
                finish_reason: Some("tool_calls".into()),
                usage: None,
            },
        ];
        for event in &events {
            output.observe(event);
        }
        assert_eq!(output.text(), "hello world");
        assert_eq!(output.tool_calls.len(), 1);
        assert_eq!(
            output.tool_calls[0].arguments_json().expect("json"),
            serde_json::json!({"a": 1})
        );
        assert_eq!(output.finish_reason.as_deref(), Some("tool_calls"));
    }
}
