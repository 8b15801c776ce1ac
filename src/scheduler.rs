use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::model::ScrapMode;
use crate::pipeline::LadderPipeline;

/// Run `job` now and then once per `interval` until cancelled. The next tick
/// is only awaited after the previous job finished, so jobs never overlap.
pub async fn every<F, Fut>(label: &str, interval: Duration, cancel: CancellationToken, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("{}: scheduled every {}s", label, interval.as_secs());

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("{}: stopping", label);
                break;
            }
            _ = ticker.tick() => job().await,
        }
    }
}

/// Periodic ladder runs for one world.
pub fn start_periodic(
    pipeline: Arc<LadderPipeline>,
    world: String,
    mode: ScrapMode,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let label = format!("{} ladder", world);
        every(&label, interval, cancel, || {
            let pipeline = Arc::clone(&pipeline);
            let world = world.clone();
            async move {
                pipeline.run(&world, mode).await;
            }
        })
        .await;
    })
}
