//! Event schema for job progress.

use crate::translator::JobReport;
use crate::types::{BatchId, FragmentId, ResolutionMap, StreamChunk};
use serde::{Deserialize, Serialize};

/// Zero or more partial events followed by exactly one terminal event per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    BatchStarted {
        batch_id: BatchId,
        /// 0-based position in dispatch order.
        index: usize,
        total: usize,
        fragment_count: usize,
    },
    Chunk(StreamChunk),
    BatchResolved {
        batch_id: BatchId,
        resolved: usize,
        unresolved: usize,
    },
    Retrying {
        batch_id: BatchId,
        attempt: u32,
        wait_ms: u64,
    },
    Resplit {
        batch_id: BatchId,
        new_budget: usize,
    },
    Completed {
        map: ResolutionMap,
        report: JobReport,
    },
    Partial {
        map: ResolutionMap,
        unresolved_ids: Vec<FragmentId>,
        report: JobReport,
    },
    Cancelled {
        map: ResolutionMap,
        report: JobReport,
    },
    Failed {
        error: String,
    },
}

impl ProgressEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::BatchStarted { .. } => "batch_started",
            ProgressEvent::Chunk(_) => "chunk",
            ProgressEvent::BatchResolved { .. } => "batch_resolved",
            ProgressEvent::Retrying { .. } => "retrying",
            ProgressEvent::Resplit { .. } => "resplit",
            ProgressEvent::Completed { .. } => "completed",
            ProgressEvent::Partial { .. } => "partial",
            ProgressEvent::Cancelled { .. } => "cancelled",
            ProgressEvent::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Completed { .. }
                | ProgressEvent::Partial { .. }
                | ProgressEvent::Cancelled { .. }
                | ProgressEvent::Failed { .. }
        )
    }
}

/// A progress event stamped with its sequence number and emission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEnvelope {
    pub ts: String,
    pub seq: u64,
    pub event: ProgressEvent,
}

impl ProgressEnvelope {
    pub fn with_now(seq: u64, event: ProgressEvent) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339(),
            seq,
            event,
        }
    }
}
