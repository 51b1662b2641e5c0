//! Parquet file reader: loads every row group into a typed `Dataset`.
//!
//! This module is only compiled when the `parquet` feature is enabled.

use std::io;
use std::path::Path;

use crate::dataset::{Cell, Column, Dataset};

/// Read a whole Parquet file. Numeric and boolean Arrow columns keep their
/// types; everything else is rendered as text.
pub fn read_parquet_file(path: &Path) -> io::Result<Dataset> {
    use parquet::arrow::arrow_reader::{ArrowReaderOptions, ParquetRecordBatchReaderBuilder};
    use std::fs::File;

    let display = path.display();
    let invalid = |e: &dyn std::fmt::Display| {
        io::Error::new(io::ErrorKind::InvalidData, format!("nlq: {}: parquet: {}", display, e))
    };

    let file = File::open(path).map_err(|e| io::Error::new(e.kind(), format!("nlq: {}: {}", display, e)))?;

    let options = ArrowReaderOptions::new().with_skip_arrow_metadata(true);
    let builder = ParquetRecordBatchReaderBuilder::try_new_with_options(file, options).map_err(|e| invalid(&e))?;

    let schema = builder.schema().clone();
    let mut columns: Vec<Column> = schema
        .fields()
        .iter()
        .map(|f| Column::new(f.name().clone(), Vec::new()))
        .collect();

    let reader = builder.build().map_err(|e| invalid(&e))?;
    let mut height = 0;

    for batch_result in reader {
        let batch = batch_result.map_err(|e| invalid(&e))?;
        height += batch.num_rows();
        for (col_idx, column) in columns.iter_mut().enumerate() {
            let array = batch.column(col_idx);
            for row_idx in 0..batch.num_rows() {
                column.values.push(array_value_to_cell(array.as_ref(), row_idx));
            }
        }
    }

    if columns.is_empty() {
        return Ok(Dataset::with_height(height));
    }
    Dataset::new(columns).map_err(|e| invalid(&e))
}

fn array_value_to_cell(array: &dyn arrow::array::Array, idx: usize) -> Cell {
    use arrow::array::*;
    use arrow::datatypes::DataType;

    if array.is_null(idx) {
        return Cell::Null;
    }

    macro_rules! number {
        ($ty:ty) => {
            array
                .as_any()
                .downcast_ref::<$ty>()
                .map_or(Cell::Null, |a| Cell::Number(a.value(idx) as f64))
        };
    }

    match array.data_type() {
        DataType::Boolean => array
            .as_any()
            .downcast_ref::<BooleanArray>()
            .map_or(Cell::Null, |a| Cell::Bool(a.value(idx))),
        DataType::Int8 => number!(Int8Array),
        DataType::Int16 => number!(Int16Array),
        DataType::Int32 => number!(Int32Array),
        DataType::Int64 => number!(Int64Array),
        DataType::UInt8 => number!(UInt8Array),
        DataType::UInt16 => number!(UInt16Array),
        DataType::UInt32 => number!(UInt32Array),
        DataType::UInt64 => number!(UInt64Array),
        DataType::Float32 => number!(Float32Array),
        DataType::Float64 => number!(Float64Array),
        DataType::Utf8 => array
            .as_any()
            .downcast_ref::<StringArray>()
            .map_or(Cell::Null, |a| Cell::from_raw(a.value(idx))),
        DataType::LargeUtf8 => array
            .as_any()
            .downcast_ref::<LargeStringArray>()
            .map_or(Cell::Null, |a| Cell::from_raw(a.value(idx))),
        _ => {
            // Dates, timestamps, dictionaries and nested types are categorical text.
            use arrow::util::display::ArrayFormatter;
            match ArrayFormatter::try_new(array, &Default::default()) {
                Ok(f) => Cell::from_raw(&f.value(idx).to_string()),
                Err(_) => Cell::Null,
            }
        }
    }
}
