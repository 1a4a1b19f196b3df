pub mod compact;
pub mod estimator;
pub mod log_sink;
pub mod tools;
pub mod turn;

pub use compact::{CompactionMode, CompactionReport, Compactor};
pub use estimator::TokenEstimator;
pub use log_sink::{LogEntry, LogLevel, LogSink, MemoryLogSink, NullLogSink, TracingLogSink};
pub use tools::{build_tool_result, NoTools, ToolCatalog, ToolExecutor, ToolOutput};
pub use turn::{AgentLoop, TaskContext, TaskOutcome, TaskReport, TurnEvent};
