use aragog_amqp::{
    connect, ConnectionParams, ErrorCode, HandlerError, TaskHandler, TaskResult, Worker,
    WorkerConfig, WorkerTask,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// 1. A handler that pretends to fetch pages. Real deployments plug in a
//    headless browser or HTTP fetcher here.
struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    type Context = ();

    fn handler_name(&self) -> &str {
        "EchoHandler"
    }

    async fn handle_task(
        &self,
        task: WorkerTask,
        _context: Option<Arc<()>>,
    ) -> Result<TaskResult, HandlerError> {
        let started = aragog_amqp::task::now_millis();
        log::info!("Handling task {} for {}", task.task_id, task.task.url);

        if task.task.url.contains("slow") {
            log::info!("Simulating a long-running task...");
            tokio::time::sleep(Duration::from_secs(10)).await;
        }

        if task.task.url.contains("broken") {
            return Ok(TaskResult::failure(
                ErrorCode::PageLoadError,
                format!("failed to load {}", task.task.url),
                started,
            ));
        }

        if task.task.url.contains("crash") {
            return Err(format!("handler crashed on {}", task.task.url).into());
        }

        Ok(TaskResult::success(
            json!({ "url": task.task.url, "script": task.task.script }),
            started,
        ))
    }
}

// 2. Connect, declare the queue and consume until Ctrl+C.
#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let hostname = std::env::var("RABBITMQ_HOST").unwrap_or_else(|_| "localhost".to_string());
    let params = ConnectionParams::new(hostname, "guest", "guest", "worker");
    let reconnect_delay = Duration::from_secs(5);

    loop {
        let run = async {
            let connection = Arc::new(connect(&params).await?);
            let config = WorkerConfig::builder("headless")
                .prefetch_count(5)
                .message_timeout(Duration::from_secs(5))
                .build();
            let mut worker = Worker::new(connection, config, Arc::new(EchoHandler));
            worker.init().await?;
            worker
                .consume(|error| log::error!("Task crashed: {}", error))
                .await
        };

        tokio::select! {
            // Listen for Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                log::info!("Ctrl+C received. Shutting down.");
                break;
            },

            result = run => {
                match result {
                    Ok(_) => {
                        log::info!("Worker finished unexpectedly. Will not reconnect.");
                        break;
                    }
                    Err(e) => {
                        log::error!("Worker failed: {}. Reconnecting in {:?}...", e, reconnect_delay);
                        tokio::time::sleep(reconnect_delay).await;
                    }
                }
            }
        }
    }

    log::info!("Application has shut down.");
}
