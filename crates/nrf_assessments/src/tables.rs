//! Named Arrow result tables.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;

use crate::error::AdapterError;

/// Result tables of one assessment run, keyed by table name.
pub type NamedTables = BTreeMap<String, RecordBatch>;

/// Column-at-a-time construction of a record batch.
#[derive(Debug, Default)]
pub struct TableBuilder {
    fields: Vec<Field>,
    columns: Vec<ArrayRef>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: &str, data_type: DataType, nullable: bool, column: ArrayRef) -> Self {
        self.fields.push(Field::new(name, data_type, nullable));
        self.columns.push(column);
        self
    }

    pub fn int64(self, name: &str, values: Vec<i64>) -> Self {
        self.push(name, DataType::Int64, false, Arc::new(Int64Array::from(values)))
    }

    pub fn float64(self, name: &str, values: Vec<f64>) -> Self {
        self.push(name, DataType::Float64, false, Arc::new(Float64Array::from(values)))
    }

    pub fn opt_float64(self, name: &str, values: Vec<Option<f64>>) -> Self {
        self.push(name, DataType::Float64, true, Arc::new(Float64Array::from(values)))
    }

    pub fn utf8(self, name: &str, values: Vec<String>) -> Self {
        self.push(name, DataType::Utf8, false, Arc::new(StringArray::from(values)))
    }

    pub fn opt_utf8(self, name: &str, values: Vec<Option<String>>) -> Self {
        self.push(name, DataType::Utf8, true, Arc::new(StringArray::from(values)))
    }

    pub fn build(self) -> Result<RecordBatch, ArrowError> {
        RecordBatch::try_new(Arc::new(Schema::new(self.fields)), self.columns)
    }
}

/// Typed, row-addressed reads from a named table. Every failure names the
/// table and column it came from.
pub struct TableReader<'a> {
    name: &'a str,
    batch: &'a RecordBatch,
}

impl<'a> TableReader<'a> {
    pub fn open(tables: &'a NamedTables, name: &'a str) -> Result<Self, AdapterError> {
        let batch = tables
            .get(name)
            .ok_or_else(|| AdapterError::MissingTable(name.to_string()))?;
        Ok(Self { name, batch })
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    fn column<T: Array + 'static>(&self, column: &str, expected: &'static str) -> Result<&'a T, AdapterError> {
        let array = self
            .batch
            .column_by_name(column)
            .ok_or_else(|| AdapterError::MissingColumn {
                table: self.name.to_string(),
                column: column.to_string(),
            })?;
        array
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| AdapterError::ColumnType {
                table: self.name.to_string(),
                column: column.to_string(),
                expected,
            })
    }

    fn null(&self, column: &str, row: usize) -> AdapterError {
        AdapterError::NullValue {
            table: self.name.to_string(),
            column: column.to_string(),
            row,
        }
    }

    pub fn opt_f64(&self, column: &str, row: usize) -> Result<Option<f64>, AdapterError> {
        let array = self.column::<Float64Array>(column, "float64")?;
        Ok((!array.is_null(row)).then(|| array.value(row)))
    }

    pub fn required_f64(&self, column: &str, row: usize) -> Result<f64, AdapterError> {
        self.opt_f64(column, row)?.ok_or_else(|| self.null(column, row))
    }

    pub fn opt_i64(&self, column: &str, row: usize) -> Result<Option<i64>, AdapterError> {
        let array = self.column::<Int64Array>(column, "int64")?;
        Ok((!array.is_null(row)).then(|| array.value(row)))
    }

    pub fn required_i64(&self, column: &str, row: usize) -> Result<i64, AdapterError> {
        self.opt_i64(column, row)?.ok_or_else(|| self.null(column, row))
    }

    pub fn opt_str(&self, column: &str, row: usize) -> Result<Option<String>, AdapterError> {
        let array = self.column::<StringArray>(column, "utf8")?;
        Ok((!array.is_null(row)).then(|| array.value(row).to_string()))
    }

    pub fn required_str(&self, column: &str, row: usize) -> Result<String, AdapterError> {
        self.opt_str(column, row)?.ok_or_else(|| self.null(column, row))
    }
}
