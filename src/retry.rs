//! Retry Controller
//!
//! Drives prompt assembly, dispatch and reconciliation for one planned batch across a
//! bounded number of attempts. Identical source texts in a batch are sent once and the
//! result is copied to every fragment that shares the text. Only the still-unresolved
//! fragments are re-dispatched, each retry waits an increasing backoff and carries
//! stricter formatting guidance, and translations in the wrong output language are
//! rejected and retried with an explicit language instruction.
//!
//! A "too long" rejection re-splits the batch. When the backend raised it, the dispatch
//! counts as an attempt; when the budget precheck raised it, nothing was sent and no
//! attempt is used.

use crate::config::RetryPolicy;
use crate::error::TransportError;
use crate::language::check_output;
use crate::planner::{resplit, PlanLimits, Resplit};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::prompt::{
    assemble, escalation_instruction, language_instruction, PromptOptions, TranslationRequest,
};
use crate::reconcile::reconcile;
use crate::relay::StreamingRelay;
use crate::transport::Transport;
use crate::types::{Batch, FragmentId, RawResponse, Resolution, ResolutionMap, UnresolvedReason};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters accumulated across every batch a controller resolves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub requests_sent: usize,
    pub resplits: usize,
    pub attempts_exhausted: usize,
    pub duplicates_folded: usize,
    pub language_rejections: usize,
}

pub struct RetryController<'a> {
    transport: &'a dyn Transport,
    options: &'a PromptOptions,
    policy: RetryPolicy,
    limits: PlanLimits,
    request_timeout: Duration,
    sink: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
    /// Dispatches per fragment, including ones the backend rejected as too long.
    dispatches: HashMap<FragmentId, u32>,
    /// Fragments whose last translation came back in the wrong language.
    wrong_language: HashSet<FragmentId>,
    stats: RetryStats,
}

/// What happened to one dispatch of a batch.
enum Outcome {
    /// Every fragment in the batch is settled.
    Settled,
    /// These fragments need another attempt.
    Retry(Batch),
}

impl<'a> RetryController<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        options: &'a PromptOptions,
        policy: RetryPolicy,
        limits: PlanLimits,
        request_timeout: Duration,
        sink: &'a dyn ProgressSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            transport,
            options,
            policy,
            limits,
            request_timeout,
            sink,
            cancel,
            dispatches: HashMap::new(),
            wrong_language: HashSet::new(),
            stats: RetryStats::default(),
        }
    }

    pub fn stats(&self) -> RetryStats {
        self.stats
    }

    /// Resolves `batch` into `map`.
    ///
    /// On return every fragment of `batch` has an entry in `map`: translated, or
    /// unresolved with its reason. The only error is a session failure, after which
    /// `map` still holds everything resolved before it.
    pub async fn resolve(
        &mut self,
        batch: Batch,
        map: &mut ResolutionMap,
    ) -> Result<(), TransportError> {
        let (batch, duplicates) = self.fold_duplicates(batch);
        let result = self.resolve_unique(batch, map).await;
        fan_out(map, &duplicates);
        result
    }

    async fn resolve_unique(
        &mut self,
        batch: Batch,
        map: &mut ResolutionMap,
    ) -> Result<(), TransportError> {
        let mut queue = VecDeque::from([(batch, self.limits)]);
        while let Some((batch, limits)) = queue.pop_front() {
            if self.cancel.is_cancelled() {
                finalize(map, &batch, UnresolvedReason::Cancelled);
                continue;
            }
            if let Some(split) = self.resolve_batch(batch, limits, map).await? {
                for entry in split.into_iter().rev() {
                    queue.push_front(entry);
                }
            }
        }
        Ok(())
    }

    /// Keeps the first fragment of each distinct source text. Returns the reduced batch
    /// and `(duplicate, kept)` id pairs.
    fn fold_duplicates(&mut self, batch: Batch) -> (Batch, Vec<(FragmentId, FragmentId)>) {
        let mut first: HashMap<&str, FragmentId> = HashMap::new();
        let mut keep = HashSet::new();
        let mut duplicates = Vec::new();
        for fragment in batch.fragments() {
            match first.get(fragment.text.as_str()) {
                Some(kept) => duplicates.push((fragment.id, *kept)),
                None => {
                    first.insert(fragment.text.as_str(), fragment.id);
                    keep.insert(fragment.id);
                }
            }
        }
        if duplicates.is_empty() {
            return (batch, duplicates);
        }

        match batch.retain(&keep) {
            Some(unique) => {
                self.stats.duplicates_folded += duplicates.len();
                info!(
                    batch_id = %batch.id(),
                    unique = unique.len(),
                    original = batch.len(),
                    "Batch deduplication"
                );
                (unique, duplicates)
            }
            None => (batch, Vec::new()),
        }
    }

    /// Attempts one batch until it settles, or returns the batches it was re-split into.
    async fn resolve_batch(
        &mut self,
        mut batch: Batch,
        limits: PlanLimits,
        map: &mut ResolutionMap,
    ) -> Result<Option<Vec<(Batch, PlanLimits)>>, TransportError> {
        loop {
            let attempt = self.attempt_of(&batch);
            let options = self.options_for(&batch, attempt);
            let request = assemble(&batch, &options, self.transport.protocol());

            let (dispatched, result) = match self.precheck(&request) {
                Err(err) => (false, Err(err)),
                Ok(()) => (true, self.dispatch(request).await),
            };

            let outcome = match result {
                Err(TransportError::TooLong {
                    prompt_chars,
                    budget_chars,
                }) => {
                    debug!(
                        batch_id = %batch.id(),
                        prompt_chars,
                        budget_chars = ?budget_chars,
                        fragment_count = batch.len(),
                        dispatched,
                        "Batch too long for transport"
                    );
                    if dispatched {
                        self.record_dispatch(&batch);
                        match self.exhaust(batch, map) {
                            Some(remaining) => batch = remaining,
                            None => return Ok(None),
                        }
                    }
                    return Ok(self.split(batch, &limits, map));
                }
                Err(TransportError::Cancelled) => {
                    finalize(map, &batch, UnresolvedReason::Cancelled);
                    return Ok(None);
                }
                Err(err) if err.is_session_unavailable() => {
                    warn!(batch_id = %batch.id(), error = %err, "Backend session unavailable");
                    return Err(err);
                }
                Err(err) if err.is_retryable() => {
                    self.record_dispatch(&batch);
                    warn!(
                        batch_id = %batch.id(),
                        attempt,
                        error = %err,
                        "Transport request failed"
                    );
                    Outcome::Retry(batch)
                }
                Err(err) => {
                    warn!(batch_id = %batch.id(), error = %err, "Transport error is not retryable");
                    return Err(err);
                }
                Ok(raw) => {
                    self.record_dispatch(&batch);
                    self.merge_response(&raw, batch, attempt, map)
                }
            };

            let Outcome::Retry(remaining) = outcome else {
                return Ok(None);
            };
            let Some(remaining) = self.exhaust(remaining, map) else {
                return Ok(None);
            };

            let next_attempt = self.attempt_of(&remaining);
            let wait = self.policy.backoff(next_attempt - 1);
            self.sink.emit(ProgressEvent::Retrying {
                batch_id: remaining.id(),
                attempt: next_attempt,
                wait_ms: wait.as_millis() as u64,
            });
            info!(
                batch_id = %remaining.id(),
                attempt = next_attempt,
                max_attempts = self.policy.max_attempts,
                pending = remaining.len(),
                wait_ms = wait.as_millis() as u64,
                "Retrying unresolved fragments"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    finalize(map, &remaining, UnresolvedReason::Cancelled);
                    return Ok(None);
                }
                _ = tokio::time::sleep(wait) => {}
            }
            batch = remaining;
        }
    }

    /// 1-based attempt number for the next dispatch of `batch`.
    fn attempt_of(&self, batch: &Batch) -> u32 {
        batch
            .fragments()
            .iter()
            .map(|f| self.dispatches.get(&f.id).copied().unwrap_or(0))
            .max()
            .unwrap_or(0)
            + 1
    }

    fn options_for(&self, batch: &Batch, attempt: u32) -> PromptOptions {
        let options = self
            .options
            .with_escalation(escalation_instruction(self.transport.protocol(), attempt));
        if batch.ids().iter().any(|id| self.wrong_language.contains(id)) {
            options.with_escalation(Some(language_instruction(self.options.direction)))
        } else {
            options
        }
    }

    fn record_dispatch(&mut self, batch: &Batch) {
        for id in batch.ids() {
            *self.dispatches.entry(id).or_insert(0) += 1;
        }
    }

    /// Rejects a request over the transport's declared budget without dispatching it.
    fn precheck(&self, request: &TranslationRequest) -> Result<(), TransportError> {
        match self.transport.char_budget() {
            Some(budget) if request.serialized_len() > budget => Err(TransportError::TooLong {
                prompt_chars: request.serialized_len(),
                budget_chars: Some(budget),
            }),
            _ => Ok(()),
        }
    }

    /// Sends one request under the per-request timeout, relaying chunks when the
    /// transport streams.
    async fn dispatch(&mut self, request: TranslationRequest) -> Result<RawResponse, TransportError> {
        self.stats.requests_sent += 1;
        let batch_id = request.batch_id();
        let timeout = self.request_timeout;
        let transport = self.transport;
        let sink = self.sink;
        let cancel = self.cancel;

        let call = async move {
            if transport.supports_streaming() {
                let stream = transport.send_streaming(request).await?;
                StreamingRelay::new(sink).run(batch_id, stream, cancel).await
            } else {
                transport.send(request).await
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = tokio::time::timeout(timeout, call) => {
                result.map_err(|_| TransportError::Timeout(timeout))?
            }
        }
    }

    fn merge_response(
        &mut self,
        raw: &RawResponse,
        batch: Batch,
        attempt: u32,
        map: &mut ResolutionMap,
    ) -> Outcome {
        match reconcile(raw, &batch) {
            Ok(reconciliation) => {
                let (accepted, rejected) = self.screen_language(&batch, &reconciliation.resolved);
                let resolved = accepted.len();
                map.merge(accepted);
                let mut unresolved = reconciliation.unresolved_ids;
                unresolved.extend(rejected);
                if unresolved.is_empty() {
                    return Outcome::Settled;
                }
                debug!(
                    batch_id = %batch.id(),
                    attempt,
                    strategy = reconciliation.strategy.as_str(),
                    resolved,
                    unresolved = unresolved.len(),
                    "Partial reconciliation"
                );
                let keep: HashSet<FragmentId> = unresolved.into_iter().collect();
                match batch.retain(&keep) {
                    Some(remaining) => Outcome::Retry(remaining),
                    None => Outcome::Settled,
                }
            }
            Err(err) => {
                warn!(batch_id = %batch.id(), attempt, error = %err, "Response could not be reconciled");
                Outcome::Retry(batch)
            }
        }
    }

    /// Splits reconciled translations into those in the requested language and the ids
    /// of those that are not.
    fn screen_language(
        &mut self,
        batch: &Batch,
        resolved: &ResolutionMap,
    ) -> (ResolutionMap, Vec<FragmentId>) {
        let mut accepted = ResolutionMap::new();
        let mut rejected = Vec::new();
        for fragment in batch.fragments() {
            let Some(translation) = resolved.translation(fragment.id) else {
                continue;
            };
            match check_output(self.options.direction, &fragment.text, translation) {
                Some(mismatch) => {
                    debug!(
                        batch_id = %batch.id(),
                        fragment_id = %fragment.id,
                        mismatch = mismatch.as_str(),
                        "Rejected translation in the wrong output language"
                    );
                    self.stats.language_rejections += 1;
                    self.wrong_language.insert(fragment.id);
                    rejected.push(fragment.id);
                }
                None => {
                    self.wrong_language.remove(&fragment.id);
                    accepted.merge_translation(fragment.id, translation);
                }
            }
        }
        (accepted, rejected)
    }

    /// Finalizes fragments at the attempt ceiling; returns the rest, if any.
    fn exhaust(&mut self, batch: Batch, map: &mut ResolutionMap) -> Option<Batch> {
        let max_attempts = self.policy.max_attempts;
        let mut keep = HashSet::new();
        for id in batch.ids() {
            if self.dispatches.get(&id).copied().unwrap_or(0) >= max_attempts {
                if map.mark_unresolved(id, UnresolvedReason::AttemptsExhausted) {
                    self.stats.attempts_exhausted += 1;
                }
            } else {
                keep.insert(id);
            }
        }
        if keep.len() < batch.len() {
            warn!(
                batch_id = %batch.id(),
                exhausted = batch.len() - keep.len(),
                max_attempts,
                "Fragments left unresolved after final attempt"
            );
        }
        batch.retain(&keep)
    }

    fn split(
        &mut self,
        batch: Batch,
        limits: &PlanLimits,
        map: &mut ResolutionMap,
    ) -> Option<Vec<(Batch, PlanLimits)>> {
        let batch_id = batch.id();
        match resplit(batch, limits) {
            Resplit::Split { batches, limits } => {
                self.stats.resplits += 1;
                self.sink.emit(ProgressEvent::Resplit {
                    batch_id,
                    new_budget: limits.max_chars,
                });
                info!(
                    batch_id = %batch_id,
                    batches = batches.len(),
                    max_chars = limits.max_chars,
                    max_items = limits.max_items,
                    "Re-split batch after too-long rejection"
                );
                Some(batches.into_iter().map(|b| (b, limits)).collect())
            }
            Resplit::Oversize(fragment) => {
                warn!(
                    batch_id = %batch_id,
                    fragment_id = %fragment.id,
                    fragment_chars = fragment.char_len(),
                    "Fragment exceeds backend budget on its own"
                );
                map.mark_unresolved(fragment.id, UnresolvedReason::Oversize);
                None
            }
        }
    }
}

fn finalize(map: &mut ResolutionMap, batch: &Batch, reason: UnresolvedReason) {
    for id in batch.ids() {
        map.mark_unresolved(id, reason);
    }
}

/// Gives each folded duplicate the resolution of the fragment that was sent in its place.
fn fan_out(map: &mut ResolutionMap, duplicates: &[(FragmentId, FragmentId)]) {
    for (duplicate, kept) in duplicates {
        match map.get(*kept).cloned() {
            Some(Resolution::Translated { text }) => {
                map.merge_translation(*duplicate, text);
            }
            Some(Resolution::Unresolved { reason }) => {
                map.mark_unresolved(*duplicate, reason);
            }
            None => {}
        }
    }
}
