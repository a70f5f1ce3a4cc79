//! Metric and label names.
//!
//! Centralized so dashboards and alerts have one place to look.

/// Metric names.
pub mod names {
    /// Counter: reconciliation passes, labeled by outcome.
    pub const RECONCILE_TOTAL: &str = "vetes_agent_reconcile_total";
    /// Counter: tasks materialized locally by the syncer.
    pub const TASKS_SYNCED_TOTAL: &str = "vetes_agent_tasks_synced_total";
    /// Counter: tasks finished, labeled by terminal state.
    pub const TASKS_FINISHED_TOTAL: &str = "vetes_agent_tasks_finished_total";
    /// Gauge: tasks currently inside the reconcile critical section.
    pub const TASKS_PROCESSING: &str = "vetes_agent_tasks_processing";
}

/// Label keys and values.
pub mod labels {
    /// Outcome label key.
    pub const OUTCOME: &str = "outcome";
    /// Outcome: pass finished.
    pub const OUTCOME_OK: &str = "ok";
    /// Outcome: pass asked for a requeue.
    pub const OUTCOME_REQUEUE: &str = "requeue";
    /// Outcome: pass errored.
    pub const OUTCOME_ERROR: &str = "error";
    /// Terminal state label key.
    pub const STATE: &str = "state";
}
