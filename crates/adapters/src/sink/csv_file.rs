use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use domain::traffic::entity::FlowResult;
use ports::secondary::result_sink::ResultSink;

use crate::csvutil;

/// Buffered CSV sink. The fixed header row is written at creation so a
/// failed create is caught before the pipeline starts. `BufWriter`
/// flushes on drop as a backstop, but the writer flushes explicitly at
/// the end of every run.
pub struct CsvFileSink {
    writer: BufWriter<File>,
}

impl CsvFileSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", csvutil::format_record(&FlowResult::HEADER))?;
        Ok(Self { writer })
    }
}

impl ResultSink for CsvFileSink {
    fn write(&mut self, result: &FlowResult) -> io::Result<()> {
        writeln!(self.writer, "{}", csvutil::format_record(&result.record()))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
