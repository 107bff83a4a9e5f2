use std::io;

use domain::traffic::entity::FlowResult;

/// Destination for simulation records. The writer owns its sinks for
/// the lifetime of a run; `Send` so a sink can move into the writer task.
pub trait ResultSink: Send {
    /// Append one record.
    fn write(&mut self, result: &FlowResult) -> io::Result<()>;

    /// Flush buffered records to the underlying storage.
    fn flush(&mut self) -> io::Result<()>;
}
