//! Stage counters.
//!
//! The coarse stage walks the task through its lifecycle:
//!
//! ```text
//! Init
//!  |
//! Initializing = PvcToCreate
//!  |
//! PvcCreated = InputsFilerToCreate
//!  |
//! InputsFilerCreated
//!  |
//! InputsFilerFinished
//!  |
//! Running = ExecutorsToCreate
//!  |
//! ExecutorsFinished = OutputsFilerToCreate
//!  |
//! OutputsFilerCreated
//!  |
//! OutputsFilerFinished
//! ```
//!
//! The counter never decreases, and each stage's side effect is performed
//! before the counter is persisted, so re-entry after a crash either redoes
//! an idempotent side effect or observes the advanced counter.
//!
//! The executor sub-machine uses a composite counter `index * 10 + status`
//! so one annotation carries both pieces.

/// Coarse stage values.
pub const STAGE_INIT: i32 = 0;
/// Reported Initializing to the control plane.
pub const STAGE_INITIALIZING: i32 = 1;
/// Scratch claim ensured (or not needed).
pub const STAGE_PVC_CREATED: i32 = 2;
/// Inputs stager submitted (or not needed).
pub const STAGE_INPUTS_FILER_CREATED: i32 = 3;
/// Inputs staging finished.
pub const STAGE_INPUTS_FILER_FINISHED: i32 = 4;
/// Reported Running to the control plane.
pub const STAGE_RUNNING: i32 = 5;
/// All executors finished.
pub const STAGE_EXECUTORS_FINISHED: i32 = 6;
/// Outputs stager submitted (or not needed).
pub const STAGE_OUTPUTS_FILER_CREATED: i32 = 7;
/// Outputs staging finished.
pub const STAGE_OUTPUTS_FILER_FINISHED: i32 = 8;

/// First stage at which the scratch claim may exist.
pub const STAGE_PVC_TO_CREATE: i32 = STAGE_INITIALIZING;
/// First stage at which the inputs stager may exist.
pub const STAGE_INPUTS_FILER_TO_CREATE: i32 = STAGE_PVC_CREATED;
/// First stage at which executor jobs may exist.
pub const STAGE_EXECUTORS_TO_CREATE: i32 = STAGE_RUNNING;
/// First stage at which the outputs stager may exist.
pub const STAGE_OUTPUTS_FILER_TO_CREATE: i32 = STAGE_EXECUTORS_FINISHED;

/// Status part of the composite executor counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorStatus {
    /// The job at this index is not created yet.
    ToCreate,
    /// The job was submitted; waiting for it to finish.
    Created,
    /// The job failed.
    Failed,
    /// The job completed.
    Success,
}

impl ExecutorStatus {
    const fn value(self) -> i32 {
        match self {
            Self::ToCreate => 0,
            Self::Created => 1,
            Self::Failed => 2,
            Self::Success => 3,
        }
    }

    const fn from_value(value: i32) -> Self {
        match value {
            0 => Self::ToCreate,
            1 => Self::Created,
            2 => Self::Failed,
            _ => Self::Success,
        }
    }
}

/// Decoded composite executor counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStage {
    /// Executor index.
    pub index: i32,
    /// Status at that index.
    pub status: ExecutorStatus,
}

impl ExecutorStage {
    /// Builds a stage.
    #[must_use]
    pub const fn new(index: i32, status: ExecutorStatus) -> Self {
        Self { index, status }
    }

    /// Encodes as `index * 10 + status`.
    #[must_use]
    pub const fn value(self) -> i32 {
        self.index * 10 + self.status.value()
    }

    /// Decodes a composite value.
    #[must_use]
    pub const fn from_value(value: i32) -> Self {
        Self {
            index: value / 10,
            status: ExecutorStatus::from_value(value % 10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_strict() {
        assert!(STAGE_INIT < STAGE_INITIALIZING);
        assert!(STAGE_INITIALIZING < STAGE_PVC_CREATED);
        assert!(STAGE_PVC_CREATED < STAGE_INPUTS_FILER_CREATED);
        assert!(STAGE_INPUTS_FILER_CREATED < STAGE_INPUTS_FILER_FINISHED);
        assert!(STAGE_INPUTS_FILER_FINISHED < STAGE_RUNNING);
        assert!(STAGE_RUNNING < STAGE_EXECUTORS_FINISHED);
        assert!(STAGE_EXECUTORS_FINISHED < STAGE_OUTPUTS_FILER_CREATED);
        assert!(STAGE_OUTPUTS_FILER_CREATED < STAGE_OUTPUTS_FILER_FINISHED);
    }

    #[test]
    fn executor_stage_round_trips() {
        for index in 0..5 {
            for status in [
                ExecutorStatus::ToCreate,
                ExecutorStatus::Created,
                ExecutorStatus::Failed,
                ExecutorStatus::Success,
            ] {
                let stage = ExecutorStage::new(index, status);
                assert_eq!(ExecutorStage::from_value(stage.value()), stage);
            }
        }
    }

    #[test]
    fn executor_stage_encoding_is_stable() {
        assert_eq!(ExecutorStage::new(0, ExecutorStatus::ToCreate).value(), 0);
        assert_eq!(ExecutorStage::new(2, ExecutorStatus::Created).value(), 21);
        assert_eq!(ExecutorStage::new(1, ExecutorStatus::Success).value(), 13);
    }
}
