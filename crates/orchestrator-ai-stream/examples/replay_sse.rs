//! Replays a recorded chat-completions capture through the full pipeline.
//!
//! Runs offline: the transport serves the capture below instead of HTTP.

use std::sync::Arc;

use orchestrator_ai_stream::init_observability;
use orchestrator_ai_stream::prelude::*;
use orchestrator_ai_stream::transport::ScriptedTransport;
use orchestrator_ai_stream::vendors::openai::OpenAiChatNormalizer;

const CAPTURE: &str = concat!(
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Checking the \"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"weather <|tool_calls_sec\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"tion_begin|>get_weather{}<|tool_calls_section_end|>now.\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"get_weather\",\"arguments\":\"{\\\"city\\\":\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"Paris\\\"}\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
    "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":120,\"completion_tokens\":45,\"cost\":0.0031}}\n\n",
    "data: [DONE]\n\n",
);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HarnessError> {
    init_observability();
    let harness = Harness::builder()
        .register(
            Arc::new(OpenAiChatNormalizer::default()),
            Arc::new(ScriptedTransport::from_sse(CAPTURE)),
        )
        .ledger(Arc::new(InMemoryLedger::new()))
        .build()?;

    let session = harness
        .create_session(CreateSession::new("replay", "Replay"))
        .await?;
    let mut run = session
        .run(ModelRef::new("openai", "recorded"))
        .request_body(serde_json::json!({"stream": true}))
        .start_stream()
        .await?;

    while let Some(event) = run.next_event().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(err) => eprintln!("unprintable event: {err}"),
        }
    }

    let output = run.finish().await?;
    println!("text: {:?}", output.text());
    if let Some(session) = output.session {
        println!(
            "session {}: prompt={} completion={} cost={}",
            session.id, session.prompt_tokens, session.completion_tokens, session.cost
        );
    }
    Ok(())
}
