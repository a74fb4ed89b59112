use crate::{
    error::{ApiError, Result},
    llm::{CompletionRequest, LanguageModel, Message, PromptTemplate, ResponseFormat, ToolBox},
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A prompt pair bound to typed input and output.
///
/// The input is serialized to a JSON object whose fields fill the templates.
pub trait ChatFlow: Send + Sync {
    type Input: Serialize + Send + Sync;
    type Output: Send;

    fn name(&self) -> &'static str;

    fn system_template(&self) -> PromptTemplate;

    fn user_template(&self) -> PromptTemplate;

    /// Structured flows request a JSON object response.
    fn structured(&self) -> bool {
        true
    }

    fn temperature(&self) -> Option<f32> {
        None
    }

    fn parse_output(&self, content: &str) -> Result<Self::Output>;
}

/// Parses a JSON object from a model reply, tolerating code fences and
/// surrounding prose.
pub fn parse_json_output<T: DeserializeOwned>(content: &str) -> Result<T> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let (start, end) = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            return Err(ApiError::ExternalServiceError(
                "Model reply did not contain a JSON object".to_string(),
            ))
        }
    };

    serde_json::from_str(&trimmed[start..=end]).map_err(|e| {
        ApiError::ExternalServiceError(format!("Model reply was not valid JSON: {}", e))
    })
}

/// Executes flows against a language model, resolving tool calls in rounds.
pub struct FlowRunner {
    model: Arc<dyn LanguageModel>,
    max_tool_rounds: usize,
}

impl FlowRunner {
    pub fn new(model: Arc<dyn LanguageModel>, max_tool_rounds: usize) -> Self {
        Self {
            model,
            max_tool_rounds,
        }
    }

    pub fn model(&self) -> Arc<dyn LanguageModel> {
        Arc::clone(&self.model)
    }

    pub async fn run<F: ChatFlow>(&self, flow: &F, input: &F::Input) -> Result<F::Output> {
        self.run_with(flow, input, &[], &ToolBox::default()).await
    }

    /// Runs `flow` with prior conversation turns placed between the system
    /// prompt and the rendered user prompt.
    pub async fn run_with<F: ChatFlow>(
        &self,
        flow: &F,
        input: &F::Input,
        history: &[Message],
        tools: &ToolBox,
    ) -> Result<F::Output> {
        let vars = serde_json::to_value(input)?;
        let system = flow.system_template().render(&vars)?;
        let user = flow.user_template().render(&vars)?;

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system));
        messages.extend_from_slice(history);
        messages.push(Message::user(user));

        let mut request = CompletionRequest {
            messages,
            tools: tools.specs(),
            response_format: flow
                .structured()
                .then_some(ResponseFormat { kind: "json_object" }),
            temperature: flow.temperature(),
        };

        let mut round = 0;
        loop {
            let reply = self.model.complete(&request).await?;
            let calls = reply.pending_tool_calls().to_vec();

            if calls.is_empty() {
                let content = reply.content.unwrap_or_default();
                if content.trim().is_empty() {
                    return Err(ApiError::ExternalServiceError(format!(
                        "Flow {} received an empty reply",
                        flow.name()
                    )));
                }
                debug!("Flow {} finished after {} tool rounds", flow.name(), round);
                return flow.parse_output(&content);
            }

            if round >= self.max_tool_rounds {
                warn!(
                    "Flow {} exceeded {} tool rounds",
                    flow.name(),
                    self.max_tool_rounds
                );
                return Err(ApiError::ExternalServiceError(format!(
                    "Flow {} did not finish within {} tool rounds",
                    flow.name(),
                    self.max_tool_rounds
                )));
            }

            info!(
                "Flow {} round {}: model requested {} tool calls",
                flow.name(),
                round + 1,
                calls.len()
            );

            let results = tools.execute_all(&calls).await;
            request.messages.push(Message::Assistant {
                content: reply.content,
                tool_calls: Some(calls),
            });
            request.messages.extend(results);
            round += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        testing::{tool_call, ScriptedModel},
        AssistantMessage, Tool,
    };
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::{json, Value};

    #[derive(Serialize)]
    struct Question {
        question: String,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        answer: String,
    }

    struct QuestionFlow;

    impl ChatFlow for QuestionFlow {
        type Input = Question;
        type Output = Answer;

        fn name(&self) -> &'static str {
            "question"
        }

        fn system_template(&self) -> PromptTemplate {
            PromptTemplate::new("Answer in JSON.")
        }

        fn user_template(&self) -> PromptTemplate {
            PromptTemplate::new("Q: {{question}}")
        }

        fn parse_output(&self, content: &str) -> Result<Answer> {
            parse_json_output(content)
        }
    }

    struct Clock;

    #[async_trait]
    impl Tool for Clock {
        fn name(&self) -> &'static str {
            "clock"
        }

        fn description(&self) -> &'static str {
            "Current time"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn call(&self, _arguments: Value) -> Result<Value> {
            Ok(json!({"time": "noon"}))
        }
    }

    fn question() -> Question {
        Question {
            question: "When?".to_string(),
        }
    }

    fn calling(calls: Vec<crate::llm::ToolCall>) -> Result<AssistantMessage> {
        Ok(AssistantMessage {
            content: None,
            tool_calls: Some(calls),
        })
    }

    #[test]
    fn test_parse_json_output_tolerates_fences() {
        let answer: Answer =
            parse_json_output("Sure!\n```json\n{\"answer\": \"42\"}\n```").unwrap();
        assert_eq!(answer.answer, "42");

        assert!(parse_json_output::<Answer>("no json here").is_err());
    }

    #[tokio::test]
    async fn test_structured_flow_renders_and_parses() {
        let model = Arc::new(ScriptedModel::text(&[r#"{"answer": "now"}"#]));
        let runner = FlowRunner::new(model.clone(), 2);

        let answer = runner.run(&QuestionFlow, &question()).await.unwrap();
        assert_eq!(answer.answer, "now");

        let requests = model.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.messages[1], Message::user("Q: When?"));
        assert!(request.response_format.is_some());
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn test_tool_results_are_fed_back() {
        let model = Arc::new(ScriptedModel::new(vec![
            calling(vec![tool_call("c1", "clock", "{}")]),
            Ok(AssistantMessage::text(r#"{"answer": "noon"}"#)),
        ]));
        let runner = FlowRunner::new(model.clone(), 2);
        let tools = ToolBox::new().with(Clock);

        let answer = runner
            .run_with(&QuestionFlow, &question(), &[], &tools)
            .await
            .unwrap();
        assert_eq!(answer.answer, "noon");

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second = &requests[1].messages;
        assert!(matches!(second[2], Message::Assistant { .. }));
        match &second[3] {
            Message::Tool {
                tool_call_id,
                content,
            } => {
                assert_eq!(tool_call_id, "c1");
                assert!(content.contains("noon"));
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tool_rounds_are_bounded() {
        let model = Arc::new(ScriptedModel::new(vec![
            calling(vec![tool_call("c1", "clock", "{}")]),
            calling(vec![tool_call("c2", "clock", "{}")]),
        ]));
        let runner = FlowRunner::new(model.clone(), 1);
        let tools = ToolBox::new().with(Clock);

        let result = runner
            .run_with(&QuestionFlow, &question(), &[], &tools)
            .await;
        assert!(matches!(result, Err(ApiError::ExternalServiceError(_))));
        assert_eq!(model.request_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_reply_is_an_error() {
        let model = Arc::new(ScriptedModel::text(&["   "]));
        let runner = FlowRunner::new(model, 2);

        let result = runner.run(&QuestionFlow, &question()).await;
        assert!(matches!(result, Err(ApiError::ExternalServiceError(_))));
    }
}
