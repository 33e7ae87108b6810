//! Classification entry points: one thread, or many with bounded
//! concurrency and per-thread failure isolation.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::matcher::PatternMatcher;
use super::scorer::aggregate;
use super::types::{BulkItem, BulkOptions, BulkOutcome, ClassificationResult};
use crate::config::EngineConfig;
use crate::error::{ClassifyError, EngineUnavailableError, ThreadClassificationError, ThreadErrorKind};
use crate::graph::GraphBuilder;
use crate::mail::EmailThread;
use crate::rules::{RuleSnapshot, RuleSource};
use crate::semantic::SemanticMatcher;

/// Stateless per-thread work shared by all workers.
struct Engine {
    builder: GraphBuilder,
    matcher: PatternMatcher,
}

impl Engine {
    async fn classify(
        &self,
        thread: &EmailThread,
        snapshot: &RuleSnapshot,
    ) -> Result<ClassificationResult, ThreadClassificationError> {
        if !thread.is_well_formed() {
            return Err(ThreadClassificationError::new(
                thread.id.clone(),
                ThreadErrorKind::MalformedThread,
                "thread id must not be empty",
            ));
        }

        let graph = self.builder.build(thread, &snapshot.vocabulary);
        let mut witnesses = Vec::new();
        for rule in &snapshot.active {
            witnesses.extend(self.matcher.match_rule(rule, &graph).await);
        }
        let outcome = aggregate(&witnesses, snapshot);

        debug!(
            thread_id = %thread.id,
            rules = snapshot.active.len(),
            witnesses = witnesses.len(),
            labels = outcome.labels.len(),
            confidence = outcome.confidence,
            "Thread classified"
        );

        Ok(ClassificationResult {
            thread_id: thread.id.clone(),
            labels: outcome.labels,
            confidence: outcome.confidence,
            reasoning: outcome.reasoning,
            applied_at: Utc::now(),
        })
    }
}

/// Public entry point of the engine.
#[derive(Clone)]
pub struct Classifier {
    rules: Arc<dyn RuleSource>,
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl Classifier {
    pub fn new(rules: Arc<dyn RuleSource>, semantic: Arc<dyn SemanticMatcher>, config: EngineConfig) -> Self {
        let engine = Engine {
            builder: GraphBuilder::new(&config.personal_domains),
            matcher: PatternMatcher::new(semantic, config.ai_match_threshold, config.max_bindings_per_rule),
        };
        Self {
            rules,
            engine: Arc::new(engine),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Classify one thread against the current active rules.
    pub async fn classify_thread(&self, thread: &EmailThread) -> Result<ClassificationResult, ClassifyError> {
        let snapshot = self.rules.snapshot().await?;
        let limit = self.config.thread_timeout;
        match timeout(limit, self.engine.classify(thread, &snapshot)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(thread_id = %thread.id, ?limit, "Thread classification timed out");
                Err(ThreadClassificationError::timeout(thread.id.clone(), limit).into())
            }
        }
    }

    /// Classify many threads against one rule snapshot.
    ///
    /// Items come back in input order. A failing thread only fails its own
    /// slot. When `cancel` fires, or the bulk deadline passes, no further
    /// threads are started and the remaining slots are `NotDispatched`.
    /// Cancellation lets in-flight threads finish; the deadline aborts them
    /// (their slots become `Timeout`).
    pub async fn classify_bulk(
        &self,
        threads: Vec<EmailThread>,
        options: BulkOptions,
        cancel: CancellationToken,
    ) -> Result<BulkOutcome, EngineUnavailableError> {
        let snapshot = self.rules.snapshot().await?;

        let width = options.concurrency.unwrap_or(self.config.concurrency).max(1);
        let thread_timeout = options.thread_timeout.unwrap_or(self.config.thread_timeout);
        let bulk_timeout = options.bulk_timeout.unwrap_or(self.config.bulk_timeout);
        let total = threads.len();
        info!(
            threads = total,
            width,
            generation = snapshot.generation,
            "Bulk classification started"
        );

        let ids: Vec<String> = threads.iter().map(|t| t.id.clone()).collect();
        let mut slots: Vec<Option<BulkItem>> = (0..total).map(|_| None).collect();
        let semaphore = Arc::new(Semaphore::new(width));
        let mut workers: JoinSet<(usize, BulkItem)> = JoinSet::new();
        let deadline = sleep_until(Instant::now() + bulk_timeout);
        tokio::pin!(deadline);

        let mut dispatched = 0;
        let mut cancelled = false;
        let mut timed_out = false;

        for (index, thread) in threads.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                _ = &mut deadline => {
                    timed_out = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let engine = self.engine.clone();
            let snapshot = snapshot.clone();
            workers.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(timeout(thread_timeout, engine.classify(&thread, &snapshot)))
                    .catch_unwind()
                    .await;
                let item = match outcome {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(ThreadClassificationError::timeout(thread.id.clone(), thread_timeout)),
                    Err(panic) => Err(ThreadClassificationError::new(
                        thread.id.clone(),
                        ThreadErrorKind::Internal,
                        panic_message(panic.as_ref()),
                    )),
                };
                (index, item)
            });
            dispatched += 1;
        }

        if timed_out {
            workers.abort_all();
        }

        loop {
            tokio::select! {
                biased;
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Ok((index, item))) => slots[index] = Some(item),
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => error!(error = %e, "Bulk worker failed to join"),
                },
                _ = &mut deadline, if !timed_out => {
                    warn!(?bulk_timeout, "Bulk deadline passed; aborting in-flight threads");
                    timed_out = true;
                    workers.abort_all();
                }
            }
        }

        let items: Vec<BulkItem> = slots
            .into_iter()
            .zip(ids)
            .enumerate()
            .map(|(index, (slot, id))| match slot {
                Some(item) => item,
                None if index >= dispatched => Err(ThreadClassificationError::not_dispatched(id)),
                None if timed_out => Err(ThreadClassificationError::new(
                    id,
                    ThreadErrorKind::Timeout,
                    format!("bulk deadline of {bulk_timeout:?} passed before this thread finished"),
                )),
                None => Err(ThreadClassificationError::new(
                    id,
                    ThreadErrorKind::Internal,
                    "worker ended without a result",
                )),
            })
            .collect();

        let outcome = BulkOutcome {
            items,
            cancelled,
            timed_out,
        };
        info!(
            total,
            dispatched,
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            cancelled,
            timed_out,
            "Bulk classification complete"
        );
        Ok(outcome)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("worker panicked: {msg}")
    } else {
        "worker panicked".to_string()
    }
}
