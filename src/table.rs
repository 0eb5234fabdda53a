// src/table.rs

use anyhow::{anyhow, bail, Context, Result};
use arrow::{
    array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray},
    compute::{cast, concat_batches, filter_record_batch},
    csv::{reader::Format, ReaderBuilder, WriterBuilder},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use std::{collections::BTreeMap, fs::File, io::Cursor, path::Path, sync::Arc};

/// Parse an in-memory CSV document (header row required) into a single
/// RecordBatch, inferring column types from the full content.
pub fn read_csv(text: &str) -> Result<RecordBatch> {
    let format = Format::default().with_header(true);
    let mut cursor = Cursor::new(text.as_bytes());
    let (schema, _) = format
        .infer_schema(&mut cursor, None)
        .context("inferring CSV schema")?;
    cursor.set_position(0);

    let schema = Arc::new(schema);
    let reader = ReaderBuilder::new(schema.clone())
        .with_format(format)
        .build(cursor)
        .context("building CSV reader")?;

    let batches: Vec<RecordBatch> = reader
        .collect::<std::result::Result<_, _>>()
        .context("parsing CSV rows")?;
    concat_batches(&schema, &batches).context("concatenating CSV batches")
}

/// True when every name in `names` is a column of `batch`.
pub fn has_columns(batch: &RecordBatch, names: &[String]) -> bool {
    let schema = batch.schema();
    names.iter().all(|n| schema.index_of(n).is_ok())
}

/// Drop every row with a missing value in any column of the batch. Empty
/// strings in Utf8 columns count as missing, the same way pandas reads an
/// empty CSV field as NaN.
pub fn drop_missing_rows(batch: &RecordBatch) -> Result<RecordBatch> {
    let mask: Vec<bool> = (0..batch.num_rows())
        .map(|row| {
            batch.columns().iter().all(|col| {
                if !col.is_valid(row) {
                    return false;
                }
                match col.data_type() {
                    DataType::Utf8 => col
                        .as_any()
                        .downcast_ref::<StringArray>()
                        .map(|s| !s.value(row).is_empty())
                        .unwrap_or(true),
                    _ => true,
                }
            })
        })
        .collect();

    filter_record_batch(batch, &BooleanArray::from(mask)).context("filtering missing rows")
}

/// Keep exactly the named columns, in the order given.
pub fn project(batch: &RecordBatch, names: &[String]) -> Result<RecordBatch> {
    let schema = batch.schema();
    let indices: Vec<usize> = names
        .iter()
        .map(|n| {
            schema
                .index_of(n)
                .map_err(|_| anyhow!("column {n:?} not found"))
        })
        .collect::<Result<_>>()?;
    batch.project(&indices).context("projecting columns")
}

/// Group on `key` and average `value`, one output row per distinct key,
/// ordered by key ascending. Integer keys keep their type; any other key is
/// grouped by its string rendering.
pub fn group_by_mean(batch: &RecordBatch, key: &str, value: &str) -> Result<RecordBatch> {
    let schema = batch.schema();
    let key_idx = schema
        .index_of(key)
        .map_err(|_| anyhow!("group key column {key:?} not found"))?;
    let value_idx = schema
        .index_of(value)
        .map_err(|_| anyhow!("value column {value:?} not found"))?;

    let values = cast(batch.column(value_idx), &DataType::Float64)
        .with_context(|| format!("casting {value:?} to Float64"))?;
    let values = values
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| anyhow!("cast of {value:?} produced a non-Float64 array"))?;

    match schema.field(key_idx).data_type() {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => {
            let keys = cast(batch.column(key_idx), &DataType::Int64)
                .with_context(|| format!("casting {key:?} to Int64"))?;
            let keys = keys
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| anyhow!("cast of {key:?} produced a non-Int64 array"))?;

            let mut groups: BTreeMap<i64, (f64, u64)> = BTreeMap::new();
            for row in 0..batch.num_rows() {
                if !keys.is_valid(row) || !values.is_valid(row) {
                    continue;
                }
                let entry = groups.entry(keys.value(row)).or_insert((0.0, 0));
                entry.0 += values.value(row);
                entry.1 += 1;
            }

            let (ks, means): (Vec<i64>, Vec<f64>) = groups
                .into_iter()
                .map(|(k, (sum, count))| (k, sum / count as f64))
                .unzip();
            build_grouped_batch(
                Field::new(key, DataType::Int64, false),
                Arc::new(Int64Array::from(ks)),
                value,
                means,
            )
        }
        _ => {
            let keys = cast(batch.column(key_idx), &DataType::Utf8)
                .with_context(|| format!("casting {key:?} to Utf8"))?;
            let keys = keys
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| anyhow!("cast of {key:?} produced a non-Utf8 array"))?;

            let mut groups: BTreeMap<String, (f64, u64)> = BTreeMap::new();
            for row in 0..batch.num_rows() {
                if !keys.is_valid(row) || !values.is_valid(row) {
                    continue;
                }
                let entry = groups.entry(keys.value(row).to_string()).or_insert((0.0, 0));
                entry.0 += values.value(row);
                entry.1 += 1;
            }

            let (ks, means): (Vec<String>, Vec<f64>) = groups
                .into_iter()
                .map(|(k, (sum, count))| (k, sum / count as f64))
                .unzip();
            build_grouped_batch(
                Field::new(key, DataType::Utf8, false),
                Arc::new(StringArray::from(ks)),
                value,
                means,
            )
        }
    }
}

fn build_grouped_batch(
    key_field: Field,
    key_array: ArrayRef,
    value_name: &str,
    means: Vec<f64>,
) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        key_field,
        Field::new(value_name, DataType::Float64, false),
    ]));
    RecordBatch::try_new(schema, vec![key_array, Arc::new(Float64Array::from(means))])
        .context("building grouped batch")
}

/// Write `batch` as CSV (with a header row) to `path`, replacing any
/// existing file.
pub fn write_csv(batch: &RecordBatch, path: &Path) -> Result<()> {
    if batch.num_columns() == 0 {
        bail!("refusing to write a batch with no columns");
    }
    let file =
        File::create(path).with_context(|| format!("creating output file {}", path.display()))?;
    let mut writer = WriterBuilder::new().with_header(true).build(file);
    writer
        .write(batch)
        .with_context(|| format!("writing CSV to {}", path.display()))
}
