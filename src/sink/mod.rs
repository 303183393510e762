// Report sinks: where a finished ReportSet gets published

pub mod csv_sink;
pub mod sqlite;

pub use csv_sink::{CsvReportSink, Manifest, ManifestEntry};
pub use sqlite::{RunRecord, SqliteReportSink};
