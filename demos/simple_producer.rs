use aragog_amqp::{Aragog, ClientOptions, ConnectionParams, Task, TaskCompletion, TaskEnvelope, TaskType};
use futures_util::StreamExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let hostname = std::env::var("RABBITMQ_HOST").unwrap_or_else(|_| "localhost".to_string());
    let params = ConnectionParams::new(hostname, "guest", "guest", "crawler");
    let client = Aragog::connect(params, ClientOptions::default()).await?;

    let mut completions = client.on_completed().await?;

    let urls = ["https://example.com", "https://example.com/broken", "https://example.com/crash"];
    for (priority, url) in urls.iter().enumerate() {
        let envelope = TaskEnvelope::new(format!("task-{priority}"), Task::new(*url, "return document.title"))
            .with_priority(priority as i32);
        client.add_task(TaskType::Headless, &envelope).await?;
    }

    // the crashed task is rejected by the worker and never answered
    for _ in 0..urls.len() - 1 {
        let Some(next) = completions.next().await else { break };
        match next.completion {
            TaskCompletion::Completed(data) => {
                log::info!("[{}] {} completed: {:?}", next.queue, data.id, data.result.data)
            }
            TaskCompletion::Failed { error, result } => log::warn!(
                "[{}] {} failed: {}",
                next.queue,
                result.map(|r| r.id).unwrap_or_default(),
                error
            ),
        }
    }

    let queue = client.queue_info(TaskType::Headless).await?;
    log::info!("headless queue: {} messages, {} consumers", queue.messages, queue.consumers);

    completions.cancel().await?;
    client.close().await?;
    Ok(())
}
