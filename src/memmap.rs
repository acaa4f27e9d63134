//! Flat row-major `i32` artifacts with `.npy` shape sidecars.
//!
//! For a split named `train` the output directory gets:
//!
//! * `train_input_ids.memmap`: `rows * cols` little-endian `i32`s, no header.
//! * `train_input_ids_shape.npy`: a 1-D `<i8` array holding `[rows, cols]`.
//!
//! The raw file is only meaningful together with its sidecar. A write that dies halfway
//! leaves a raw file whose size disagrees with the recorded shape; [`read_split`] checks
//! for exactly that.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Context, Result};
use memmap2::Mmap;
use npyz::WriterBuilder;

pub const TRAIN_SPLIT: &str = "train";
pub const VAL_SPLIT: &str = "val";

const DTYPE_SIZE: usize = std::mem::size_of::<i32>();

/// A dense `rows x cols` matrix of token ids in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMatrix {
    data: Vec<i32>,
    rows: usize,
    cols: usize,
}

impl TokenMatrix {
    pub fn new(cols: usize) -> Self {
        Self { data: Vec::new(), rows: 0, cols }
    }

    pub fn from_rows<I>(cols: usize, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = Vec<i32>>,
    {
        let mut matrix = Self::new(cols);
        for row in rows {
            matrix.push_row(&row)?;
        }
        Ok(matrix)
    }

    pub fn push_row(&mut self, row: &[i32]) -> Result<()> {
        ensure!(row.len() == self.cols, "row has {} ids, expected {}", row.len(), self.cols);
        self.data.extend_from_slice(row);
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn row(&self, i: usize) -> Option<&[i32]> {
        (i < self.rows).then(|| &self.data[i * self.cols..(i + 1) * self.cols])
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.data
    }

    fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() * DTYPE_SIZE);
        for &id in &self.data {
            bytes.extend_from_slice(&id.to_le_bytes());
        }
        bytes
    }
}

/// Paths of one written split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitArtifact {
    pub data_path: PathBuf,
    pub shape_path: PathBuf,
    pub shape: (usize, usize),
}

pub fn data_path(dir: &Path, split: &str) -> PathBuf {
    dir.join(format!("{}_input_ids.memmap", split))
}

pub fn shape_path(dir: &Path, split: &str) -> PathBuf {
    dir.join(format!("{}_input_ids_shape.npy", split))
}

/// Writes a split's raw file and shape sidecar into `dir`.
///
/// The whole buffer is built before anything touches the disk. It goes to a temporary
/// name first and is renamed over the final path once complete.
pub fn write_split(dir: &Path, split: &str, matrix: &TokenMatrix) -> Result<SplitArtifact> {
    let data_path = data_path(dir, split);
    let shape_path = shape_path(dir, split);
    let bytes = matrix.to_le_bytes();

    let temp_path = dir.join(format!("{}_input_ids.memmap.tmp", split));
    fs::write(&temp_path, &bytes).with_context(|| format!("writing {}", temp_path.display()))?;
    fs::rename(&temp_path, &data_path).with_context(|| format!("renaming to {}", data_path.display()))?;

    write_shape(&shape_path, matrix.shape())?;

    Ok(SplitArtifact { data_path, shape_path, shape: matrix.shape() })
}

/// Writes both splits, creating `dir` if needed.
pub fn write_artifacts(dir: &Path, train: &TokenMatrix, val: &TokenMatrix) -> Result<[SplitArtifact; 2]> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let train = write_split(dir, TRAIN_SPLIT, train)?;
    let val = write_split(dir, VAL_SPLIT, val)?;
    Ok([train, val])
}

fn write_shape(path: &Path, (rows, cols): (usize, usize)) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut buf = BufWriter::new(file);
    let mut npy = npyz::WriteOptions::new()
        .default_dtype()
        .shape(&[2])
        .writer(&mut buf)
        .begin_nd()?;
    npy.push(&(rows as i64))?;
    npy.push(&(cols as i64))?;
    npy.finish()?;
    buf.flush()?;
    Ok(())
}

/// Reads the `(rows, cols)` recorded in a shape sidecar.
pub fn read_shape(path: &Path) -> Result<(usize, usize)> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let npy = npyz::NpyFile::new(BufReader::new(file))?;
    let values: Vec<i64> = npy.into_vec()?;
    let &[rows, cols] = values.as_slice() else {
        bail!("{} holds {} values, expected a (rows, cols) pair", path.display(), values.len());
    };
    ensure!(rows >= 0 && cols >= 0, "{} holds a negative shape", path.display());
    Ok((rows as usize, cols as usize))
}

/// Maps a split back into memory using its recorded shape.
pub fn read_split(dir: &Path, split: &str) -> Result<TokenMatrix> {
    let (rows, cols) = read_shape(&shape_path(dir, split))?;
    let path = data_path(dir, split);
    let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;

    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(DTYPE_SIZE))
        .with_context(|| format!("shape ({}, {}) in {} is too large", rows, cols, shape_path(dir, split).display()))?;
    let actual = file.metadata()?.len() as usize;
    if actual != expected {
        bail!(
            "{} is {} bytes but its shape ({}, {}) needs {}; the write was probably interrupted",
            path.display(),
            actual,
            rows,
            cols,
            expected
        );
    }
    if expected == 0 {
        return Ok(TokenMatrix::new(cols));
    }

    // SAFETY: the file is opened read-only and not modified while mapped.
    let mmap = unsafe { Mmap::map(&file) }?;
    let data = mmap
        .chunks_exact(DTYPE_SIZE)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(TokenMatrix { data, rows, cols })
}
