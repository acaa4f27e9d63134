//! Transcript and audio-code mappings, and loading them from Arrow/Parquet files.

use std::{collections::HashMap, fs::File, io::{BufReader, Read, Seek, SeekFrom}, path::{Path, PathBuf}, sync::Arc};

use anyhow::{bail, Context, Result};
use arrow::{
    array::{Array, ArrayRef, AsArray, RecordBatch},
    buffer::NullBuffer,
    compute::cast,
    datatypes::{DataType, Field, Int64Type},
    ipc::reader::{FileReader, StreamReader},
};
use indicatif::{ParallelProgressIterator, ProgressBar};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::info;

use crate::config::ColumnNames;

// Arrow IPC file format starts with this magic; the stream format does not.
const ARROW_FILE_MAGIC: &[u8; 6] = b"ARROW1";

// Written by `save_to_disk` next to the shards; `_data_files` lists them in order.
const STATE_FILE: &str = "state.json";
// `map`/`filter` cache shards left in a split directory. Not part of the split.
const CACHE_PREFIX: &str = "cache-";

/// One row of the source dataset after column extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRow {
    pub id: String,
    pub text: Option<String>,
    pub codes: Option<Vec<u32>>,
}

/// Sample identifiers in dataset order, plus the two lookups they join.
#[derive(Debug, Default, Clone)]
pub struct SampleTable {
    ids: Vec<String>,
    transcripts: HashMap<String, String>,
    audio_codes: HashMap<String, Vec<u32>>,
}

impl SampleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row. A later row with the same id replaces the earlier mapping entries,
    /// but the id is still listed once per row.
    pub fn push(&mut self, row: SampleRow) {
        if let Some(text) = row.text {
            self.transcripts.insert(row.id.clone(), text);
        }
        if let Some(codes) = row.codes {
            self.audio_codes.insert(row.id.clone(), codes);
        }
        self.ids.push(row.id);
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn transcript(&self, id: &str) -> Option<&str> {
        self.transcripts.get(id).map(String::as_str)
    }

    pub fn audio_codes(&self, id: &str) -> Option<&[u32]> {
        self.audio_codes.get(id).map(Vec::as_slice)
    }
}

impl FromIterator<SampleRow> for SampleTable {
    fn from_iter<I: IntoIterator<Item = SampleRow>>(iter: I) -> Self {
        let mut table = SampleTable::new();
        for row in iter {
            table.push(row);
        }
        table
    }
}

/// The identifier of a sample: the audio path's file name without its last extension.
pub fn sample_id_from_path(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        // A leading dot is part of the name, not an extension.
        Some(dot) if dot > 0 => name[..dot].to_string(),
        _ => name.to_string(),
    }
}

/// Lists the dataset files of a split directory.
///
/// When `dir` holds a `state.json`, its `_data_files` are returned in the listed order.
/// Otherwise every `.arrow` and `.parquet` file under `dir` is returned, sorted by path,
/// skipping `cache-*` shards.
pub fn find_dataset_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let state = dir.join(STATE_FILE);
    if state.is_file() {
        return data_files_from_state(dir, &state);
    }

    let root = glob::Pattern::escape(&dir.to_string_lossy());
    let mut paths = Vec::new();
    for ext in ["arrow", "parquet"] {
        let pattern = format!("{}/**/*.{}", root, ext);
        for entry in glob::glob(&pattern)? {
            let path = entry?;
            let is_cache = path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with(CACHE_PREFIX));
            if path.is_file() && !is_cache {
                paths.push(path);
            }
        }
    }
    paths.sort();
    Ok(paths)
}

fn data_files_from_state(dir: &Path, state: &Path) -> Result<Vec<PathBuf>> {
    let text = std::fs::read_to_string(state).with_context(|| format!("reading {}", state.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", state.display()))?;
    let files = json["_data_files"]
        .as_array()
        .with_context(|| format!("{} has no '_data_files' list!", state.display()))?;

    files
        .iter()
        .map(|entry| {
            let name = entry["filename"]
                .as_str()
                .with_context(|| format!("{} has a data file without a 'filename'!", state.display()))?;
            let path = dir.join(name);
            if !path.is_file() {
                bail!("{} lists {}, which does not exist", state.display(), path.display());
            }
            Ok(path)
        })
        .collect()
}

/// Picks the directory a split is read from: `<root>/<split>` when it exists, otherwise
/// the root itself, but only if the root is not laid out as several split directories.
pub fn resolve_split_dir(root: &Path, split: &str) -> Result<PathBuf> {
    let dir = root.join(split);
    if dir.is_dir() {
        return Ok(dir);
    }

    let mut available = Vec::new();
    for entry in std::fs::read_dir(root).with_context(|| format!("reading {}", root.display()))? {
        let path = entry?.path();
        if path.is_dir() && !find_dataset_files(&path)?.is_empty() {
            if let Some(name) = path.file_name() {
                available.push(name.to_string_lossy().into_owned());
            }
        }
    }
    if !available.is_empty() {
        available.sort();
        bail!(
            "No split '{}' under {}. Available splits: {}",
            split,
            root.display(),
            available.join(", ")
        );
    }
    Ok(root.to_path_buf())
}

/// Loads every dataset file under `dir` in parallel and merges the rows in file order.
pub fn load_samples(dir: &Path, columns: &ColumnNames, pb: ProgressBar) -> Result<SampleTable> {
    let paths = find_dataset_files(dir)?;
    if paths.is_empty() {
        bail!("No .arrow or .parquet files found under {}", dir.display());
    }
    info!(files = paths.len(), dir = %dir.display(), "loading dataset");

    pb.set_length(paths.len() as u64);
    let per_file: Vec<Vec<SampleRow>> = paths
        .into_par_iter()
        .progress_with(pb)
        .map(|path| load_file(&path, columns).with_context(|| format!("reading {}", path.display())))
        .collect::<Result<Vec<_>>>()?;

    let table: SampleTable = per_file.into_iter().flatten().collect();
    info!(
        rows = table.len(),
        transcripts = table.transcripts.len(),
        audio_codes = table.audio_codes.len(),
        "dataset loaded"
    );
    Ok(table)
}

/// Reads all rows of a single `.arrow` (IPC stream or file) or `.parquet` file.
pub fn load_file(path: &Path, columns: &ColumnNames) -> Result<Vec<SampleRow>> {
    let batches = read_batches(path)?;
    let mut rows = Vec::new();
    for batch in &batches {
        rows.extend(rows_from_batch(batch, columns)?);
    }
    Ok(rows)
}

fn read_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    let is_parquet = path.extension().is_some_and(|ext| ext == "parquet");
    let mut file = File::open(path)?;
    if is_parquet {
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        return Ok(reader.collect::<Result<Vec<_>, _>>()?);
    }

    let mut magic = [0u8; 6];
    let is_file_format = file.read_exact(&mut magic).is_ok() && &magic == ARROW_FILE_MAGIC;
    file.seek(SeekFrom::Start(0))?;
    if is_file_format {
        let reader = FileReader::try_new(file, None)?;
        Ok(reader.collect::<Result<Vec<_>, _>>()?)
    } else {
        let reader = StreamReader::try_new(BufReader::new(file), None)?;
        Ok(reader.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Extracts `(id, text, codes)` from every row of a batch.
pub fn rows_from_batch(batch: &RecordBatch, columns: &ColumnNames) -> Result<Vec<SampleRow>> {
    let paths = string_column(batch, &columns.path)?;
    let texts = string_column(batch, &columns.text)?;
    let (codes, parent_nulls) = codes_column(batch, columns)?;

    let paths = paths.as_string::<i32>();
    let texts = texts.as_string::<i32>();
    let codes = codes.as_list::<i32>();

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        if paths.is_null(i) {
            bail!("row {} has no {}", i, columns.path);
        }
        let id = sample_id_from_path(paths.value(i));
        let text = texts.is_valid(i).then(|| texts.value(i).to_string());
        let has_codes = codes.is_valid(i) && parent_nulls.as_ref().is_none_or(|nulls| nulls.is_valid(i));
        let row_codes = if has_codes {
            Some(codes_from_values(&codes.value(i)).with_context(|| format!("audio codes of {id}"))?)
        } else {
            None
        };
        rows.push(SampleRow { id, text, codes: row_codes });
    }
    Ok(rows)
}

fn string_column(batch: &RecordBatch, name: &str) -> Result<ArrayRef> {
    let column = batch
        .column_by_name(name)
        .with_context(|| format!("Missing '{}' column!", name))?;
    cast(column, &DataType::Utf8).with_context(|| format!("'{}' column is not a string column!", name))
}

/// Normalizes the codes column to `List<Int64>`, unwrapping a struct column's codes field first.
/// The struct's own validity is returned alongside.
fn codes_column(batch: &RecordBatch, columns: &ColumnNames) -> Result<(ArrayRef, Option<NullBuffer>)> {
    let column = batch
        .column_by_name(&columns.codes)
        .with_context(|| format!("Missing '{}' column!", columns.codes))?;
    let (column, parent_nulls) = match column.data_type() {
        DataType::Struct(_) => {
            let parent = column.as_struct();
            let child = parent
                .column_by_name(&columns.codes_field)
                .with_context(|| format!("Struct '{}' is missing '{}' field!", columns.codes, columns.codes_field))?;
            (child.clone(), parent.nulls().cloned())
        }
        _ => (column.clone(), None),
    };
    match column.data_type() {
        DataType::List(item) | DataType::LargeList(item) | DataType::FixedSizeList(item, _)
            if item.data_type().is_integer() => {}
        other => bail!("'{}' does not hold a list of integers (found {})!", columns.codes, other),
    }
    let target = DataType::List(Arc::new(Field::new("item", DataType::Int64, true)));
    let lists = cast(&column, &target).with_context(|| format!("'{}' does not hold a list of integers!", columns.codes))?;
    Ok((lists, parent_nulls))
}

fn codes_from_values(values: &ArrayRef) -> Result<Vec<u32>> {
    let values = values.as_primitive::<Int64Type>();
    if values.null_count() > 0 {
        bail!("null audio code");
    }
    values
        .values()
        .iter()
        .map(|&code| {
            if code < 0 || code > i32::MAX as i64 {
                bail!("audio code {} is out of range", code);
            }
            Ok(code as u32)
        })
        .collect()
}
