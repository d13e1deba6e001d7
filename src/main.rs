use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use tutor_judge::core::{Catalog, EngineConfig};
use tutor_judge::engine::build_sandbox;
use tutor_judge::jobs::{Delivery, JobSequencer, WorkerJob};
use tutor_judge::platform::Platform;
use tutor_judge::redis_manager::{RedisManager, ResultPublisher};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tutor_judge=info".parse()?),
        )
        .init();

    let config = EngineConfig::from_env()?;

    let catalog = match &config.exercises_path {
        Some(path) => Catalog::from_path(path)
            .with_context(|| format!("Failed to load exercises from {:?}", path))?,
        None => Catalog::embedded().context("Failed to load embedded exercises")?,
    };
    info!(exercises = catalog.len(), "loaded exercise catalog");

    info!("Starting tutor worker...");
    let mut redis = RedisManager::connect(&config.redis_url).await?;
    let worker_id = redis.worker_id();

    let sandbox = build_sandbox(&config, worker_id)
        .await
        .context("Failed to initialize sandbox")?;
    info!(
        worker_id,
        backend = sandbox.name(),
        time_limit_ms = config.time_limit.as_millis() as u64,
        memory_limit_mb = config.memory_limit_mb,
        max_concurrent_runs = config.max_concurrent_runs,
        "sandbox ready"
    );

    let platform = Arc::new(Platform::from_config(&config, Arc::new(catalog), sandbox));
    let publisher = redis.publisher().await?;
    let permits = Arc::new(Semaphore::new(config.max_concurrent_runs));
    let mut sequencer = JobSequencer::new();

    info!("Waiting for jobs...");

    loop {
        let job = redis.pop_job().await?;
        info!(
            job_type = job.job_type(),
            request_id = job.request_id(),
            "received job"
        );

        let learner = job.learner().cloned();
        let platform = platform.clone();
        let permits = permits.clone();
        let publisher = publisher.clone();

        sequencer.spawn(learner, async move {
            handle_job(job, &platform, &permits, publisher).await;
        });
    }
}

async fn handle_job(
    job: WorkerJob,
    platform: &Platform,
    permits: &Semaphore,
    mut publisher: ResultPublisher,
) {
    // Only jobs that execute code count against the run limit
    let _permit = if job.needs_sandbox() {
        match permits.acquire().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                error!(request_id = job.request_id(), error = %e, "run limiter closed");
                return;
            }
        }
    } else {
        None
    };

    let reply = match job.process(platform).await {
        Ok(reply) => reply,
        Err(e) => {
            error!(request_id = job.request_id(), error = %e, "failed to serialize reply");
            return;
        }
    };

    let delivered = match job.delivery() {
        Delivery::Stored => publisher.store_result(job.request_id(), &reply).await,
        Delivery::Reply => publisher.push_reply(job.request_id(), &reply).await,
    };

    match delivered {
        Ok(()) => debug!(
            job_type = job.job_type(),
            request_id = job.request_id(),
            "job completed"
        ),
        Err(e) => error!(
            job_type = job.job_type(),
            request_id = job.request_id(),
            error = %format!("{:#}", e),
            "failed to deliver job reply"
        ),
    }
}
