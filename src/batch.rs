// batch.rs - Runs the size-targeting search over the registry in fixed-size,
// strictly sequential batches and reports progress as events.

use crate::compression::{Encoder, OutputFormat};
use crate::config::SearchConfig;
use crate::error::CompressError;
use crate::registry::{CompressionResult, ItemId, Registry, SizeTotals, UploadItem};
use crate::search::{compress_image, Goal, SearchOutcome};
use std::sync::Arc;

pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Encode settings shared by every item of a run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CompressOptions {
    pub format: OutputFormat,
    pub goal: Goal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunScope {
    /// Every item in the registry. Publishes totals when done.
    All,
    /// Caller-chosen items, in the given order. Ids not in the registry are ignored.
    Subset(Vec<ItemId>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Removal is blocked from here until `RunFinished`.
    RunStarted { total: usize },
    /// The item is done and its result can be saved.
    ItemCompressed {
        id: ItemId,
        size: u64,
        format: OutputFormat,
    },
    ItemFailed { id: ItemId, reason: String },
    BatchCompleted {
        processed: usize,
        total: usize,
        percent: u8,
    },
    /// `totals` is only present for `RunScope::All`.
    RunFinished { totals: Option<SizeTotals> },
}

pub trait ProgressSink {
    fn on_event(&mut self, event: ProgressEvent);
}

impl ProgressSink for Vec<ProgressEvent> {
    fn on_event(&mut self, event: ProgressEvent) {
        self.push(event);
    }
}

/// Per-run counters. `compressed_bytes` only covers this run's successes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub compressed_bytes: u64,
}

pub fn overall_percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((processed as f64 / total as f64) * 100.0).round() as u8
}

/// One compression run, advanced one item at a time.
///
/// The caller takes `current()`, compresses it however it likes (awaiting a
/// task, a UI command...) and hands the outcome back to `finish_item`. Items
/// are snapshotted at start so the queue never depends on list positions.
#[derive(Debug)]
pub struct BatchRun {
    queue: Vec<UploadItem>,
    next: usize,
    batch_size: usize,
    full_run: bool,
    options: CompressOptions,
    summary: RunSummary,
}

impl BatchRun {
    /// Start a run, or `None` when there is nothing to compress. An empty
    /// scope leaves the registry and the sink untouched.
    pub fn start(
        registry: &mut Registry,
        scope: RunScope,
        batch_size: usize,
        options: CompressOptions,
        sink: &mut dyn ProgressSink,
    ) -> Option<Self> {
        let full_run = scope == RunScope::All;
        let queue: Vec<UploadItem> = match scope {
            RunScope::All => registry.items().to_vec(),
            RunScope::Subset(ids) => ids
                .into_iter()
                .filter_map(|id| registry.item(id).cloned())
                .collect(),
        };
        if queue.is_empty() {
            log::info!("Nothing to compress");
            return None;
        }

        if full_run {
            registry.clear_results();
        }
        registry.set_locked(true);

        let total = queue.len();
        log::info!(
            "Compressing {} images as {} ({:?}), batches of {}",
            total,
            options.format,
            options.goal,
            batch_size.max(1)
        );
        sink.on_event(ProgressEvent::RunStarted { total });

        Some(Self {
            queue,
            next: 0,
            batch_size: batch_size.max(1),
            full_run,
            options,
            summary: RunSummary {
                total,
                ..RunSummary::default()
            },
        })
    }

    pub fn current(&self) -> Option<&UploadItem> {
        self.queue.get(self.next)
    }

    pub fn options(&self) -> CompressOptions {
        self.options
    }

    pub fn is_finished(&self) -> bool {
        self.next >= self.queue.len()
    }

    pub fn processed(&self) -> usize {
        self.next
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Record the outcome for the current item and move on.
    ///
    /// Outcomes for any other item are ignored, so a stale completion can never
    /// be stored against the wrong image.
    pub fn finish_item(
        &mut self,
        registry: &mut Registry,
        id: ItemId,
        outcome: Result<SearchOutcome, CompressError>,
        sink: &mut dyn ProgressSink,
    ) {
        let Some(item) = self.current() else {
            log::warn!("Ignoring result for {} after the run finished", id);
            return;
        };
        if item.id != id {
            log::warn!("Ignoring out-of-order result for {} (expected {})", id, item.id);
            return;
        }
        let name = item.name.clone();

        match outcome {
            Ok(outcome) => {
                if !outcome.met_target {
                    log::debug!("{}: target not reached after {} attempts", name, outcome.attempts);
                }
                let result = CompressionResult {
                    item: id,
                    data: outcome.data.into(),
                    format: outcome.format,
                };
                let size = result.size();
                registry.store_result(result);
                self.summary.succeeded += 1;
                self.summary.compressed_bytes += size;
                sink.on_event(ProgressEvent::ItemCompressed {
                    id,
                    size,
                    format: outcome.format,
                });
            }
            Err(e) => {
                log::error!("Compression error for {}: {}", name, e);
                registry.clear_result(id);
                self.summary.failed += 1;
                sink.on_event(ProgressEvent::ItemFailed {
                    id,
                    reason: e.to_string(),
                });
            }
        }

        self.next += 1;
        let total = self.queue.len();
        if self.next % self.batch_size == 0 || self.next == total {
            sink.on_event(ProgressEvent::BatchCompleted {
                processed: self.next,
                total,
                percent: overall_percent(self.next, total),
            });
        }
        if self.next == total {
            self.finish(registry, sink);
        }
    }

    fn finish(&mut self, registry: &mut Registry, sink: &mut dyn ProgressSink) {
        registry.set_locked(false);
        let totals = self.full_run.then(|| registry.totals());
        log::info!(
            "Run finished: {} compressed, {} failed, {} bytes",
            self.summary.succeeded,
            self.summary.failed,
            self.summary.compressed_bytes
        );
        if let Some(totals) = totals {
            log::info!(
                "Original {} bytes, compressed {} bytes, saved {}%",
                totals.original,
                totals.compressed,
                totals.saved_percent_label()
            );
        }
        sink.on_event(ProgressEvent::RunFinished { totals });
    }
}

/// Decode and search one item on the blocking pool.
pub async fn compress_item(
    encoder: Arc<dyn Encoder>,
    config: SearchConfig,
    item: UploadItem,
    options: CompressOptions,
) -> Result<SearchOutcome, CompressError> {
    tokio::task::spawn_blocking(move || {
        let image = encoder.decode(&item.data)?;
        compress_image(
            encoder.as_ref(),
            &image,
            &item.data,
            options.format,
            options.goal,
            &config,
        )
    })
    .await
    .map_err(|e| CompressError::Task(e.to_string()))?
}

/// Drive a whole run to completion, one item at a time.
#[allow(dead_code)]
pub async fn run_batches(
    registry: &mut Registry,
    scope: RunScope,
    batch_size: usize,
    options: CompressOptions,
    encoder: Arc<dyn Encoder>,
    config: &SearchConfig,
    sink: &mut dyn ProgressSink,
) -> Option<RunSummary> {
    let mut run = BatchRun::start(registry, scope, batch_size, options, sink)?;

    while let Some(item) = run.current().cloned() {
        let id = item.id;
        let outcome = compress_item(encoder.clone(), config.clone(), item, run.options()).await;
        run.finish_item(registry, id, outcome, sink);
    }

    Some(run.summary())
}
