pub mod geo;
pub mod pipeline;
pub mod reconcile;
pub mod topology;

pub mod errors {
    use std::fmt;
    use std::path::PathBuf;

    use choras_io::IoError;
    use thiserror::Error;

    use crate::task::TaskStatus;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("invalid task transition from {from} to {to}")]
        InvalidTransition { from: TaskStatus, to: TaskStatus },
        #[error("failed to read file {path:?}: {source}")]
        ReadError {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("failed to write file {path:?}: {source}")]
        WriteError {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
    }

    /// 物理组键无法回写的原因。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MismatchCause {
        /// 映射中没有该材质。
        Unmapped,
        /// 该材质的对象 ID 已全部用完。
        Exhausted,
    }

    impl fmt::Display for MismatchCause {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                MismatchCause::Unmapped => f.write_str("no mapping entry"),
                MismatchCause::Exhausted => f.write_str("object ids exhausted"),
            }
        }
    }

    #[derive(Debug, Error)]
    pub enum ReconcileError {
        #[error("material mismatch for group \"{key}\" at line {line}: {cause}")]
        MaterialMismatch {
            key: String,
            line: usize,
            cause: MismatchCause,
        },
        #[error(transparent)]
        Engine(#[from] EngineError),
    }

    #[derive(Debug, Error)]
    pub enum PipelineError {
        #[error(transparent)]
        Io(#[from] IoError),
        #[error(transparent)]
        Engine(#[from] EngineError),
        #[error(transparent)]
        Reconcile(#[from] ReconcileError),
    }
}

pub mod task {
    use std::fmt;
    use std::path::{Path, PathBuf};

    use choras_core::diagnostics::Diagnostic;
    use tracing::{debug, warn};

    use crate::errors::EngineError;

    /// 转换任务状态：`Created → InProgress → Completed | Error`。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum TaskStatus {
        Created,
        InProgress,
        Completed,
        Error,
    }

    impl TaskStatus {
        #[inline]
        pub fn is_terminal(self) -> bool {
            matches!(self, TaskStatus::Completed | TaskStatus::Error)
        }

        fn can_transition_to(self, next: TaskStatus) -> bool {
            matches!(
                (self, next),
                (TaskStatus::Created, TaskStatus::InProgress)
                    | (TaskStatus::InProgress, TaskStatus::Completed)
                    | (TaskStatus::InProgress, TaskStatus::Error)
            )
        }
    }

    impl fmt::Display for TaskStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let label = match self {
                TaskStatus::Created => "Created",
                TaskStatus::InProgress => "InProgress",
                TaskStatus::Completed => "Completed",
                TaskStatus::Error => "Error",
            };
            f.write_str(label)
        }
    }

    /// 单个源文件的转换任务。终态后不可再变更，也不会自动重试。
    #[derive(Debug, Clone)]
    pub struct ConversionTask {
        id: u64,
        source: PathBuf,
        status: TaskStatus,
        message: Option<String>,
        diagnostics: Vec<Diagnostic>,
    }

    impl ConversionTask {
        pub fn new(id: u64, source: impl Into<PathBuf>) -> Self {
            Self {
                id,
                source: source.into(),
                status: TaskStatus::Created,
                message: None,
                diagnostics: Vec::new(),
            }
        }

        #[inline]
        pub fn id(&self) -> u64 {
            self.id
        }

        #[inline]
        pub fn source(&self) -> &Path {
            &self.source
        }

        #[inline]
        pub fn status(&self) -> TaskStatus {
            self.status
        }

        /// 仅在 `Error` 状态下有值。
        pub fn message(&self) -> Option<&str> {
            self.message.as_deref()
        }

        pub fn diagnostics(&self) -> &[Diagnostic] {
            &self.diagnostics
        }

        pub fn start(&mut self) -> Result<(), EngineError> {
            self.transition(TaskStatus::InProgress)
        }

        pub fn complete(&mut self) -> Result<(), EngineError> {
            self.transition(TaskStatus::Completed)
        }

        pub fn fail(&mut self, message: impl Into<String>) -> Result<(), EngineError> {
            self.transition(TaskStatus::Error)?;
            self.message = Some(message.into());
            Ok(())
        }

        /// 记录本次运行产生的可恢复问题，每条同时输出警告日志。
        pub fn record_diagnostics<I>(&mut self, diagnostics: I)
        where
            I: IntoIterator<Item = Diagnostic>,
        {
            for diagnostic in diagnostics {
                warn!(task = self.id, %diagnostic, "转换过程中出现可恢复问题");
                self.diagnostics.push(diagnostic);
            }
        }

        fn transition(&mut self, next: TaskStatus) -> Result<(), EngineError> {
            if !self.status.can_transition_to(next) {
                return Err(EngineError::InvalidTransition {
                    from: self.status,
                    to: next,
                });
            }
            debug!(task = self.id, from = %self.status, to = %next, "任务状态变更");
            self.status = next;
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn happy_path_reaches_completed() {
            let mut task = ConversionTask::new(7, "room.dxf");
            assert_eq!(task.status(), TaskStatus::Created);

            task.start().expect("start task");
            assert_eq!(task.status(), TaskStatus::InProgress);

            task.complete().expect("complete task");
            assert_eq!(task.status(), TaskStatus::Completed);
            assert!(task.status().is_terminal());
            assert!(task.message().is_none());
        }

        #[test]
        fn failure_records_message() {
            let mut task = ConversionTask::new(1, "room.obj");
            task.start().unwrap();
            task.fail("source is corrupt").unwrap();

            assert_eq!(task.status(), TaskStatus::Error);
            assert_eq!(task.message(), Some("source is corrupt"));
        }

        #[test]
        fn terminal_states_reject_transitions() {
            let mut task = ConversionTask::new(2, "room.obj");
            task.start().unwrap();
            task.complete().unwrap();

            let err = task.start().unwrap_err();
            assert!(matches!(
                err,
                EngineError::InvalidTransition {
                    from: TaskStatus::Completed,
                    to: TaskStatus::InProgress,
                }
            ));
            assert!(task.fail("late failure").is_err());
            assert!(task.message().is_none());
        }

        #[test]
        fn cannot_finish_before_start() {
            let mut task = ConversionTask::new(3, "room.dxf");
            assert!(task.complete().is_err());
            assert!(task.fail("never started").is_err());
            assert_eq!(task.status(), TaskStatus::Created);
        }

        #[test]
        fn diagnostics_accumulate() {
            let mut task = ConversionTask::new(4, "room.dxf");
            task.record_diagnostics([
                Diagnostic::unsupported_entity("TEXT"),
                Diagnostic::degenerate("face 3"),
            ]);
            assert_eq!(task.diagnostics().len(), 2);
        }
    }
}
