//! Progress reporting for a batch of crawl jobs.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::{CrawlJob, CrawlResult};
use crate::traits::BatchSubmitter;

/// One step of batch progress, in the order results complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started {
        total: usize,
    },
    Succeeded {
        product_code: String,
        completed: usize,
        total: usize,
    },
    Failed {
        product_code: String,
        error: String,
        completed: usize,
        total: usize,
    },
    Finished {
        succeeded: usize,
        failed: usize,
        total: usize,
    },
}

/// Handle to a batch in flight.
pub struct BatchProgress {
    pub events: mpsc::Receiver<ProgressEvent>,
    /// Resolves to every result received before the batch closed.
    pub results: JoinHandle<Vec<CrawlResult>>,
}

/// Submit `jobs` and report progress on a channel of `capacity` events.
///
/// Event sends race the cancellation token, so a reader that stops
/// consuming cannot wedge the collector. Dropping `events` only stops
/// emission; results are still gathered.
pub fn track_batch<B: BatchSubmitter>(
    submitter: &B,
    cancel: CancellationToken,
    jobs: Vec<CrawlJob>,
    capacity: usize,
) -> Result<BatchProgress, AppError> {
    let total = jobs.len();
    let mut results_rx = submitter.submit_batch(cancel.clone(), jobs)?;
    let (events_tx, events_rx) = mpsc::channel(capacity.max(1));

    let results = tokio::spawn(async move {
        let mut emitter = Emitter {
            tx: Some(events_tx),
            cancel,
        };
        emitter.emit(ProgressEvent::Started { total }).await;

        let mut collected = Vec::with_capacity(total);
        let (mut succeeded, mut failed) = (0, 0);
        while let Some(result) = results_rx.recv().await {
            let product_code = result.job.product_code.clone();
            let event = match &result.outcome {
                Ok(_) => {
                    succeeded += 1;
                    ProgressEvent::Succeeded {
                        product_code,
                        completed: succeeded + failed,
                        total,
                    }
                }
                Err(e) => {
                    failed += 1;
                    ProgressEvent::Failed {
                        product_code,
                        error: e.to_string(),
                        completed: succeeded + failed,
                        total,
                    }
                }
            };
            collected.push(result);
            emitter.emit(event).await;
        }

        emitter
            .emit(ProgressEvent::Finished {
                succeeded,
                failed,
                total,
            })
            .await;
        collected
    });

    Ok(BatchProgress {
        events: events_rx,
        results,
    })
}

struct Emitter {
    tx: Option<mpsc::Sender<ProgressEvent>>,
    cancel: CancellationToken,
}

impl Emitter {
    async fn emit(&mut self, event: ProgressEvent) {
        let Some(tx) = &self.tx else { return };
        let delivered = tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = tx.send(event) => sent.is_ok(),
        };
        if !delivered {
            self.tx = None;
        }
    }
}
