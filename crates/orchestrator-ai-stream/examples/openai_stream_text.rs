use std::sync::Arc;

use orchestrator_ai_stream::init_observability;
use orchestrator_ai_stream::prelude::*;
use orchestrator_ai_stream::vendors::openai::openai_backend_from_env;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HarnessError> {
    init_observability();
    let harness = Harness::builder()
        .register_backend(openai_backend_from_env()?)
        .ledger(Arc::new(InMemoryLedger::new()))
        .build()?;

    let session = harness
        .create_session(CreateSession::new("stream", "Streaming demo"))
        .await?;
    let mut run = session
        .run(ModelRef::new("openai", "gpt-5-nano"))
        .request_body(serde_json::json!({
            "model": "gpt-5-nano",
            "stream": true,
            "stream_options": {"include_usage": true},
            "messages": [{"role": "user", "content": "Stream a greeting."}],
        }))
        .start_stream()
        .await?;

    while let Some(event) = run.next_event().await {
        match event {
            ProviderEvent::ContentDelta { content } => print!("{content}"),
            ProviderEvent::ToolCallEnd { name, arguments, .. } => {
                println!("\n[tool call] {name}({arguments})");
            }
            ProviderEvent::Finish { .. } => println!(),
            ProviderEvent::Error { error } => eprintln!("run error: {error}"),
            _ => {}
        }
    }

    let _ = run.finish().await?;
    let record = session.record().await?;
    println!(
        "session {}: prompt={} completion={} cost={:.6}",
        record.id, record.prompt_tokens, record.completion_tokens, record.cost
    );
    Ok(())
}
