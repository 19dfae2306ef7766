//! End-to-end demo of the Prism engine: a simulated image super-resolution
//! pipeline (download -> classify -> GPU upscale -> encode -> upload) run
//! through the real manager, broker, workers and timeout monitor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{Duration, sleep};

use prism_core::{
    EmailNotifier, Handler, HandlerRegistry, InMemoryBroker, LogNotifier, Notifier, Outcome,
    PrismConfig, QueueName, SubTaskSpec, TaskContext, TaskError, TaskManager, TimeoutMonitor,
    WebhookNotifier, WorkerPool,
};

// ----------------------------------------------------------------------
// Pipeline task types
// ----------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct PipelinePayload {
    image_url: String,
}

impl prism_core::Task for PipelinePayload {
    const NAME: &'static str = "image_super_resolution_pipeline";
}

#[derive(Serialize, Deserialize)]
struct DownloadPayload {
    image_url: String,
}

impl prism_core::Task for DownloadPayload {
    const NAME: &'static str = "download_image";
}

#[derive(Serialize, Deserialize)]
struct ClassifyPayload {
    #[serde(default)]
    input: serde_json::Value,
}

impl prism_core::Task for ClassifyPayload {
    const NAME: &'static str = "classify_image";
}

#[derive(Serialize, Deserialize)]
struct UpscalePayload {
    #[serde(default)]
    input: serde_json::Value,
}

impl prism_core::Task for UpscalePayload {
    const NAME: &'static str = "super_resolve_image";
}

#[derive(Serialize, Deserialize)]
struct EncodePayload {
    #[serde(default)]
    input: serde_json::Value,
}

impl prism_core::Task for EncodePayload {
    const NAME: &'static str = "encode_result";
}

#[derive(Serialize, Deserialize)]
struct UploadPayload {
    #[serde(default)]
    input: serde_json::Value,
}

impl prism_core::Task for UploadPayload {
    const NAME: &'static str = "upload_result";
}

// ----------------------------------------------------------------------
// Handlers (simulated work)
// ----------------------------------------------------------------------

/// Entry point: decomposes into the five-stage chain. The GPU stage picks
/// its queue at runtime from the classifier's result.
struct PipelineHandler;

#[async_trait]
impl Handler<PipelinePayload> for PipelineHandler {
    async fn handle(
        &self,
        _ctx: &TaskContext,
        task: PipelinePayload,
    ) -> Result<Outcome, TaskError> {
        Ok(Outcome::chained(vec![
            SubTaskSpec::new("download_image", json!({ "image_url": task.image_url })),
            SubTaskSpec::new("classify_image", json!({})),
            SubTaskSpec::new("super_resolve_image", json!({})).routed_from_result("category"),
            SubTaskSpec::new("encode_result", json!({})),
            SubTaskSpec::new("upload_result", json!({})),
        ]))
    }
}

struct DownloadHandler;

#[async_trait]
impl Handler<DownloadPayload> for DownloadHandler {
    async fn handle(
        &self,
        ctx: &TaskContext,
        task: DownloadPayload,
    ) -> Result<Outcome, TaskError> {
        sleep(Duration::from_millis(30)).await;

        // Fake image dimensions derived from the URL so different inputs
        // exercise different GPU pools.
        let seed: u32 = task.image_url.bytes().map(u32::from).sum();
        let (width, height) = match seed % 3 {
            0 => (1024, 768),
            1 => (768, 1365),
            _ => (512, 512),
        };

        let path = ctx
            .storage()
            .save(ctx.task_id(), "original.jpg", task.image_url.as_bytes())
            .map_err(|e| TaskError::transient(format!("download write: {e}")))?;
        ctx.report_progress(1.0);

        Ok(Outcome::success(json!({
            "path": path,
            "width": width,
            "height": height,
        })))
    }
}

struct ClassifyHandler;

#[async_trait]
impl Handler<ClassifyPayload> for ClassifyHandler {
    async fn handle(
        &self,
        _ctx: &TaskContext,
        task: ClassifyPayload,
    ) -> Result<Outcome, TaskError> {
        let width = task.input["width"].as_f64().unwrap_or(0.0);
        let height = task.input["height"].as_f64().unwrap_or(0.0);
        if width <= 0.0 || height <= 0.0 {
            return Err(TaskError::terminal("no dimensions from download stage"));
        }

        // Aspect-ratio heuristic: clearly tall is portrait, clearly wide is
        // landscape, everything else goes to the general pool.
        let category = if height / width >= 1.2 {
            "portrait"
        } else if width / height >= 1.2 {
            "landscape"
        } else {
            "general"
        };

        Ok(Outcome::success(json!({
            "category": category,
            "width": width,
            "height": height,
            "path": task.input["path"],
        })))
    }
}

struct UpscaleHandler;

#[async_trait]
impl Handler<UpscalePayload> for UpscaleHandler {
    async fn handle(
        &self,
        ctx: &TaskContext,
        task: UpscalePayload,
    ) -> Result<Outcome, TaskError> {
        // Pretend to run model inference, with progress heartbeats.
        for step in 1..=4 {
            sleep(Duration::from_millis(50)).await;
            ctx.report_progress(step as f64 / 4.0);
        }

        let scale = 4;
        Ok(Outcome::success(json!({
            "category": task.input["category"],
            "width": task.input["width"].as_f64().unwrap_or(0.0) * scale as f64,
            "height": task.input["height"].as_f64().unwrap_or(0.0) * scale as f64,
            "path": task.input["path"],
            "scale": scale,
        })))
    }
}

struct EncodeHandler;

#[async_trait]
impl Handler<EncodePayload> for EncodeHandler {
    async fn handle(&self, ctx: &TaskContext, task: EncodePayload) -> Result<Outcome, TaskError> {
        sleep(Duration::from_millis(20)).await;
        let path = ctx
            .storage()
            .save(ctx.task_id(), "upscaled.png", b"png bytes")
            .map_err(|e| TaskError::transient(format!("encode write: {e}")))?;
        Ok(Outcome::success(json!({
            "format": "png",
            "path": path,
            "width": task.input["width"],
            "height": task.input["height"],
        })))
    }
}

struct UploadHandler;

#[async_trait]
impl Handler<UploadPayload> for UploadHandler {
    async fn handle(&self, ctx: &TaskContext, task: UploadPayload) -> Result<Outcome, TaskError> {
        sleep(Duration::from_millis(30)).await;
        Ok(Outcome::success(json!({
            "url": format!("https://cdn.example.com/results/{}.png", ctx.task_id()),
            "width": task.input["width"],
            "height": task.input["height"],
        })))
    }
}

// ----------------------------------------------------------------------

fn build_handlers() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    // 同名の二重登録は起動時に落とす
    registry
        .register::<PipelinePayload, PipelineHandler>(PipelineHandler)
        .expect("register pipeline");
    registry
        .register::<DownloadPayload, DownloadHandler>(DownloadHandler)
        .expect("register download");
    registry
        .register::<ClassifyPayload, ClassifyHandler>(ClassifyHandler)
        .expect("register classify");
    registry
        .register::<UpscalePayload, UpscaleHandler>(UpscaleHandler)
        .expect("register upscale");
    registry
        .register::<EncodePayload, EncodeHandler>(EncodeHandler)
        .expect("register encode");
    registry
        .register::<UploadPayload, UploadHandler>(UploadHandler)
        .expect("register upload");
    registry
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    // (A) config / notifier / manager
    let config = match PrismConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::warn!("bad environment overrides, using defaults: {e}");
            PrismConfig::default()
        }
    };
    let notifier: Arc<dyn Notifier> = match (&config.admin_webhook_url, &config.admin_email) {
        (Some(url), _) => Arc::new(WebhookNotifier::new(url.clone())),
        (None, Some(email)) => Arc::new(EmailNotifier::new(email.clone())),
        (None, None) => Arc::new(LogNotifier),
    };
    let manager = Arc::new(TaskManager::new(
        &config,
        Arc::new(InMemoryBroker::new()),
        Arc::new(build_handlers()),
        notifier,
    ));

    // (B) worker pools per queue class
    let execution_deadline = config.execution_deadline();
    let pools: Vec<WorkerPool> = [
        (config.queue_main.as_str(), 2),
        (config.queue_io.as_str(), config.io_worker_concurrency),
        (config.queue_cpu.as_str(), config.cpu_worker_concurrency),
        (config.queue_gpu_general.as_str(), config.gpu_worker_concurrency),
        (config.queue_gpu_portrait.as_str(), config.gpu_worker_concurrency),
        (config.queue_gpu_landscape.as_str(), config.gpu_worker_concurrency),
    ]
    .into_iter()
    .map(|(queue, concurrency)| {
        WorkerPool::spawn(
            QueueName::new(queue),
            concurrency,
            Arc::clone(&manager),
            execution_deadline,
        )
    })
    .collect();

    // (C) admission timeout sweeper
    let monitor = TimeoutMonitor::new(Arc::clone(&manager), &config).spawn();

    // (D) submit one pipeline and follow it to the end
    let id = manager
        .submit(
            "image_super_resolution_pipeline",
            json!({ "image_url": "https://images.example.com/photos/tower.jpg" }),
            5,
            None,
        )
        .await
        .expect("submit pipeline");
    println!("submitted pipeline task {id}");

    let status = manager
        .await_completion(id, Duration::from_secs(30))
        .await
        .expect("pipeline task exists");
    println!("final state: {}", status.state);
    if let Some(result) = &status.result {
        println!("result: {result}");
    }
    if let Some(error) = &status.error {
        println!("error: {}", error.message);
    }
    for sub in &status.subtasks {
        if let Ok(s) = manager.get_status(*sub) {
            println!("  stage {} [{}] -> {}", s.name, s.queue, s.state);
        }
    }
    println!("state counts: {:?}", manager.registry().counts());

    // (E) tear down: records, scratch space, then the runtime
    let stages = status.subtasks.clone();
    for sub in stages {
        let _ = manager.cleanup(sub);
    }
    manager.cleanup(id).expect("cleanup pipeline record");

    monitor.shutdown_and_join().await;
    manager.broker().close();
    for pool in pools {
        pool.shutdown_and_join().await;
    }
}
