// Run a scripted agent end to end and print the event stream.
//
// cargo run -p trellis-core --example simple_agent

use std::sync::Arc;

use futures::StreamExt;
use uuid::Uuid;

use trellis_core::{
    Agent, EchoTool, ExecutionContext, InMemorySessionStore, Result, Runnable, ScriptedLlmDriver,
    SessionStore, StepFilter, Wire,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let store = Arc::new(InMemorySessionStore::new());

    let driver = Arc::new(ScriptedLlmDriver::new());
    driver.push_tool_call("call_1", "echo", r#"{"message":"hello from the tool"}"#);
    driver.push_text("The echo tool says: hello from the tool");

    let agent = Agent::builder("demo")
        .driver(driver)
        .store(store.clone())
        .tool(EchoTool)
        .system_prompt("You are a terse assistant.")
        .build()?;

    let session_id = Uuid::now_v7();
    let wire = Wire::default();
    let mut events = wire.subscribe().await;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            println!("event: {}", event.kind());
        }
    });

    let ctx = ExecutionContext::root(session_id, wire.clone());
    let output = agent.run("Say hello via the echo tool", &ctx).await?;
    wire.close().await;
    let _ = printer.await;

    println!("response: {}", output.response);

    let steps = store.get_steps(session_id, &StepFilter::default()).await?;
    for step in steps {
        println!(
            "step {} [{}] {}",
            step.sequence,
            step.role,
            step.content.as_deref().unwrap_or("<no content>")
        );
    }

    Ok(())
}
