//! Dataset loaders. These belong to the shell: the pipeline itself only ever
//! sees an already-parsed `Dataset`.

pub mod csv;
pub mod json;
#[cfg(feature = "parquet")]
pub mod parquet_reader;

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::dataset::Dataset;

/// Strategy for turning a byte stream into a table.
pub trait TableReader {
    fn read_table(&mut self, reader: &mut dyn BufRead) -> io::Result<Dataset>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Tsv,
    Json,
    Parquet,
}

impl InputFormat {
    pub fn parse(name: &str) -> Option<InputFormat> {
        match name.to_ascii_lowercase().as_str() {
            "csv" => Some(InputFormat::Csv),
            "tsv" | "tab" => Some(InputFormat::Tsv),
            "json" | "jsonl" | "ndjson" => Some(InputFormat::Json),
            "parquet" => Some(InputFormat::Parquet),
            _ => None,
        }
    }

    /// Detect format from the file extension.
    pub fn from_extension(path: &Path) -> Option<InputFormat> {
        let ext = path.extension()?.to_str()?;
        InputFormat::parse(ext)
    }
}

/// Load a dataset from a file. Without an explicit format the extension
/// decides, falling back to CSV.
pub fn load_path(path: &Path, format: Option<InputFormat>) -> io::Result<Dataset> {
    let format = format
        .or_else(|| InputFormat::from_extension(path))
        .unwrap_or(InputFormat::Csv);
    let display = path.display();

    if format == InputFormat::Parquet {
        #[cfg(feature = "parquet")]
        {
            return parquet_reader::read_parquet_file(path);
        }
        #[cfg(not(feature = "parquet"))]
        {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("nlq: {}: parquet support not compiled in", display),
            ));
        }
    }

    let file = File::open(path).map_err(|e| io::Error::new(e.kind(), format!("nlq: {}: {}", display, e)))?;
    let mut reader = BufReader::new(file);
    load_reader(&mut reader, format)
        .map_err(|e| io::Error::new(e.kind(), format!("nlq: {}: {}", display, e)))
}

/// Load a dataset from an already-open stream.
pub fn load_reader(reader: &mut dyn BufRead, format: InputFormat) -> io::Result<Dataset> {
    match format {
        InputFormat::Csv => csv::CsvReader::comma().read_table(reader),
        InputFormat::Tsv => csv::CsvReader::tab().read_table(reader),
        InputFormat::Json => json::JsonReader.read_table(reader),
        InputFormat::Parquet => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "parquet input must be read from a file",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn format_from_extension() {
        assert_eq!(InputFormat::from_extension(Path::new("a/b.csv")), Some(InputFormat::Csv));
        assert_eq!(InputFormat::from_extension(Path::new("x.TSV")), Some(InputFormat::Tsv));
        assert_eq!(InputFormat::from_extension(Path::new("x.jsonl")), Some(InputFormat::Json));
        assert_eq!(InputFormat::from_extension(Path::new("x.txt")), None);
    }

    #[test]
    fn load_csv_file() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "State,Sales").unwrap();
        writeln!(file, "CA,10").unwrap();
        writeln!(file, "NY,7.5").unwrap();
        let ds = load_path(file.path(), None).unwrap();
        assert_eq!(ds.column_names(), vec!["State", "Sales"]);
        assert_eq!(ds.height(), 2);
    }

    #[test]
    fn missing_file_mentions_path() {
        let err = load_path(Path::new("/nonexistent/data.csv"), None).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/data.csv"));
    }
}
