use crate::{
    error::Result,
    llm::{FunctionSpec, Message, ToolCall, ToolSpec},
};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// A function the model may call during a flow.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the argument object.
    fn parameters(&self) -> Value;

    async fn call(&self, arguments: Value) -> Result<Value>;
}

#[derive(Clone, Default)]
pub struct ToolBox {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolBox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|tool| ToolSpec {
                kind: "function",
                function: FunctionSpec {
                    name: tool.name(),
                    description: tool.description(),
                    parameters: tool.parameters(),
                },
            })
            .collect()
    }

    /// Runs one call and wraps the outcome as a `tool` message.
    ///
    /// Failures are reported back to the model as `{"error": ...}` so it can recover.
    pub async fn execute(&self, call: &ToolCall) -> Message {
        let content = match self.run(call).await {
            Ok(value) => value,
            Err(message) => {
                warn!("Tool call {} ({}) failed: {}", call.id, call.function.name, message);
                json!({ "error": message })
            }
        };

        Message::Tool {
            tool_call_id: call.id.clone(),
            content: content.to_string(),
        }
    }

    /// Runs all calls concurrently, keeping their order.
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<Message> {
        join_all(calls.iter().map(|call| self.execute(call))).await
    }

    async fn run(&self, call: &ToolCall) -> std::result::Result<Value, String> {
        let tool = self
            .tools
            .iter()
            .find(|tool| tool.name() == call.function.name)
            .ok_or_else(|| format!("Unknown tool '{}'", call.function.name))?;

        let raw = call.function.arguments.trim();
        let arguments = if raw.is_empty() {
            json!({})
        } else {
            serde_json::from_str(raw).map_err(|e| format!("Invalid arguments: {}", e))?
        };

        debug!("Calling tool {} with {}", tool.name(), arguments);
        tool.call(arguments).await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::llm::testing::tool_call;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echoes its arguments"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn call(&self, arguments: Value) -> Result<Value> {
            if arguments.get("fail").is_some() {
                return Err(ApiError::InvalidInput("asked to fail".to_string()));
            }
            Ok(arguments)
        }
    }

    fn content(message: &Message) -> Value {
        match message {
            Message::Tool { content, .. } => serde_json::from_str(content).unwrap(),
            other => panic!("expected tool message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_all_keeps_order_and_reports_errors() {
        let tools = ToolBox::new().with(Echo);
        let calls = vec![
            tool_call("1", "echo", r#"{"n": 1}"#),
            tool_call("2", "missing", "{}"),
            tool_call("3", "echo", "not json"),
            tool_call("4", "echo", r#"{"fail": true}"#),
            tool_call("5", "echo", ""),
        ];

        let results = tools.execute_all(&calls).await;

        assert_eq!(results.len(), 5);
        assert_eq!(content(&results[0]), json!({"n": 1}));
        assert!(content(&results[1])["error"]
            .as_str()
            .unwrap()
            .contains("Unknown tool"));
        assert!(content(&results[2])["error"]
            .as_str()
            .unwrap()
            .contains("Invalid arguments"));
        assert!(content(&results[3])["error"]
            .as_str()
            .unwrap()
            .contains("asked to fail"));
        assert_eq!(content(&results[4]), json!({}));

        match &results[1] {
            Message::Tool { tool_call_id, .. } => assert_eq!(tool_call_id, "2"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_specs() {
        let specs = ToolBox::new().with(Echo).specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].function.name, "echo");

        let value = serde_json::to_value(&specs[0]).unwrap();
        assert_eq!(value["type"], "function");
    }
}
