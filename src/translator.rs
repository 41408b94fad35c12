//! Translator: the caller-facing job orchestrator.
//!
//! Applies the skip policy and cache, waits for backend readiness, plans batches and
//! hands each one to the retry controller. Jobs against one `Translator` run one at a
//! time; the backend is held for the whole job.

use crate::cache::{CacheConfig, CacheKey, CacheStats, TranslationCache};
use crate::config::TranslatorConfig;
use crate::error::{TranslateError, TransportError};
use crate::planner::{plan, PlanLimits};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::retry::RetryController;
use crate::transport::Transport;
use crate::types::{Batch, Fragment, FragmentId, Resolution, ResolutionMap, UnresolvedReason};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-job statistics, reported with the terminal event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub batches_planned: usize,
    pub requests_sent: usize,
    pub resplits: usize,
    pub cache_hits: usize,
    pub attempts_exhausted: usize,
    pub duplicates_folded: usize,
    pub language_rejections: usize,
}

pub struct Translator {
    transport: Arc<dyn Transport>,
    cache: TranslationCache,
    job: Mutex<()>,
}

impl Translator {
    /// `cache` sizes the cache until a job's `TranslatorConfig::cache` replaces it.
    pub fn new(transport: Arc<dyn Transport>, cache: CacheConfig) -> Self {
        Self {
            transport,
            cache: TranslationCache::new(cache),
            job: Mutex::new(()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Translates `fragments` and returns a map holding every submitted id.
    ///
    /// `sink` receives zero or more partial events and exactly one terminal event.
    /// Cancellation returns the map accumulated so far with pending fragments marked
    /// cancelled. Only session failures, readiness timeouts and invalid input or
    /// configuration are errors; session errors carry the partial map.
    pub async fn translate(
        &self,
        fragments: Vec<Fragment>,
        config: &TranslatorConfig,
        sink: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Result<ResolutionMap, TranslateError> {
        let result = self.run(fragments, config, sink, &cancel).await;
        if let Err(err) = &result {
            warn!(error = %err, "Translation job failed");
            sink.emit(ProgressEvent::Failed {
                error: err.to_string(),
            });
        }
        result
    }

    async fn run(
        &self,
        fragments: Vec<Fragment>,
        config: &TranslatorConfig,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ResolutionMap, TranslateError> {
        config.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            TranslateError::Config(error_msgs.join("; "))
        })?;
        validate_fragments(&fragments)?;

        let started = Instant::now();
        let mut report = JobReport::default();
        let mut map = ResolutionMap::new();

        let _job = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                for fragment in &fragments {
                    map.mark_unresolved(fragment.id, UnresolvedReason::Cancelled);
                }
                return Ok(self.finish(map, report, sink, cancel, started));
            }
            guard = self.job.lock() => guard,
        };
        self.cache.configure(config.cache);

        let pending = self.apply_skip_policy_and_cache(fragments, config, &mut map, &mut report);
        if pending.is_empty() {
            return Ok(self.finish(map, report, sink, cancel, started));
        }

        if let Err(err) = self.transport.ensure_ready(cancel).await {
            return match err {
                TransportError::Cancelled => {
                    finalize(&mut map, &pending, UnresolvedReason::Cancelled);
                    Ok(self.finish(map, report, sink, cancel, started))
                }
                err => Err(session_error(err, map, &pending)),
            };
        }

        let limits = PlanLimits::from(&config.batch);
        let batches = plan(pending.clone(), &limits);
        report.batches_planned = batches.len();
        info!(
            transport = self.transport.name(),
            fragments = pending.len(),
            batches = batches.len(),
            "Translation job started"
        );

        let mut controller = RetryController::new(
            self.transport.as_ref(),
            &config.prompt,
            config.retry,
            limits,
            config.request_timeout(),
            sink,
            cancel,
        );

        let total = batches.len();
        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                finalize(&mut map, batch.fragments(), UnresolvedReason::Cancelled);
                continue;
            }
            let batch_id = batch.id();
            let ids = batch.ids();
            sink.emit(ProgressEvent::BatchStarted {
                batch_id,
                index,
                total,
                fragment_count: batch.len(),
            });

            let outcome = controller.resolve(batch.clone(), &mut map).await;
            let stats = controller.stats();
            report.requests_sent = stats.requests_sent;
            report.resplits = stats.resplits;
            report.attempts_exhausted = stats.attempts_exhausted;
            report.duplicates_folded = stats.duplicates_folded;
            report.language_rejections = stats.language_rejections;

            if let Err(err) = outcome {
                return Err(session_error(err, map, &pending));
            }

            let resolved = ids.iter().filter(|id| map.is_translated(**id)).count();
            sink.emit(ProgressEvent::BatchResolved {
                batch_id,
                resolved,
                unresolved: ids.len() - resolved,
            });
            self.remember(&batch, config, &map);
        }

        Ok(self.finish(map, report, sink, cancel, started))
    }

    /// Settles fragments that are never dispatched and returns the rest in input order.
    fn apply_skip_policy_and_cache(
        &self,
        fragments: Vec<Fragment>,
        config: &TranslatorConfig,
        map: &mut ResolutionMap,
        report: &mut JobReport,
    ) -> Vec<Fragment> {
        let mut pending = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            if fragment.metadata.skip_translation {
                map.mark_unresolved(fragment.id, UnresolvedReason::Skipped);
                continue;
            }
            if fragment.metadata.is_formula || fragment.text.trim().is_empty() {
                map.merge_translation(fragment.id, fragment.text);
                continue;
            }
            if let Some(hit) = self.cache.get(&CacheKey::new(&config.prompt, &fragment.text)) {
                report.cache_hits += 1;
                map.merge_translation(fragment.id, hit);
                continue;
            }
            pending.push(fragment);
        }
        debug!(
            pending = pending.len(),
            settled = map.len(),
            cache_hits = report.cache_hits,
            "Applied skip policy and cache"
        );
        pending
    }

    fn remember(&self, batch: &Batch, config: &TranslatorConfig, map: &ResolutionMap) {
        for fragment in batch.fragments() {
            if let Some(translation) = map.translation(fragment.id) {
                self.cache.insert(
                    CacheKey::new(&config.prompt, &fragment.text),
                    translation.to_string(),
                );
            }
        }
    }

    /// Emits the terminal event and returns the map.
    fn finish(
        &self,
        map: ResolutionMap,
        report: JobReport,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
        started: Instant,
    ) -> ResolutionMap {
        let unresolved_ids: Vec<FragmentId> = map
            .iter()
            .filter_map(|(id, resolution)| match resolution {
                Resolution::Unresolved { reason }
                    if *reason != UnresolvedReason::Skipped =>
                {
                    Some(id)
                }
                _ => None,
            })
            .collect();

        info!(
            fragments = map.len(),
            translated = map.translated_count(),
            unresolved = unresolved_ids.len(),
            batches_planned = report.batches_planned,
            requests_sent = report.requests_sent,
            resplits = report.resplits,
            cache_hits = report.cache_hits,
            attempts_exhausted = report.attempts_exhausted,
            duplicates_folded = report.duplicates_folded,
            language_rejections = report.language_rejections,
            duration_ms = started.elapsed().as_millis() as u64,
            "Translation job finished"
        );

        let cancelled = cancel.is_cancelled()
            && !map.unresolved_with_reason(UnresolvedReason::Cancelled).is_empty();
        let event = if cancelled {
            ProgressEvent::Cancelled {
                map: map.clone(),
                report,
            }
        } else if unresolved_ids.is_empty() {
            ProgressEvent::Completed {
                map: map.clone(),
                report,
            }
        } else {
            ProgressEvent::Partial {
                map: map.clone(),
                unresolved_ids,
                report,
            }
        };
        sink.emit(event);
        map
    }
}

fn validate_fragments(fragments: &[Fragment]) -> Result<(), TranslateError> {
    let mut seen = HashSet::with_capacity(fragments.len());
    for fragment in fragments {
        if !seen.insert(fragment.id) {
            return Err(TranslateError::InvalidInput(format!(
                "duplicate fragment id {}",
                fragment.id
            )));
        }
    }
    Ok(())
}

fn finalize(map: &mut ResolutionMap, fragments: &[Fragment], reason: UnresolvedReason) {
    for fragment in fragments {
        map.mark_unresolved(fragment.id, reason);
    }
}

/// Converts a job-ending transport error, completing the partial map first.
fn session_error(err: TransportError, mut map: ResolutionMap, pending: &[Fragment]) -> TranslateError {
    finalize(&mut map, pending, UnresolvedReason::SessionUnavailable);
    let partial = Box::new(map);
    match err {
        TransportError::SessionUnavailable(message) => {
            TranslateError::SessionUnavailable { message, partial }
        }
        TransportError::StartupTimeout(timeout) => TranslateError::StartupTimeout { timeout, partial },
        other => TranslateError::Transport(other),
    }
}
