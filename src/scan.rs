//! Finding `.npy` artifacts under a directory and reporting what is in them.

use std::{
    fs::File,
    io::{BufReader, Seek},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use npyz::{DType, NpyFile};

/// Header information of a loadable `.npy` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyInfo {
    pub shape: Vec<u64>,
    pub dtype: String,
}

/// Opens `path` as an `.npy` file, reads its header, and checks that the file holds
/// every element the header describes.
pub fn inspect_npy(path: &Path) -> Result<NpyInfo> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let (dtype, shape, elements) = {
        let npy = NpyFile::new(&mut reader).context("not a valid .npy file")?;
        (npy.dtype(), npy.shape().to_vec(), npy.len())
    };
    let data_start = reader.stream_position()?;
    let payload = dtype
        .num_bytes()
        .and_then(|size| elements.checked_mul(size as u64))
        .context("array size overflows")?;
    let available = file_len.saturating_sub(data_start);
    if available < payload {
        bail!("truncated data: expected {} bytes after the header, found {}", payload, available);
    }

    let dtype = match dtype {
        DType::Plain(ty) => ty.to_string(),
        other => other.descr(),
    };
    Ok(NpyInfo { shape, dtype })
}

/// Walks `root` recursively and reports every `.npy` file found. Files that fail to load
/// are reported and skipped. Returns the paths that loaded.
pub fn scan_for_npy_files(root: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/**/*.npy", glob::Pattern::escape(&root.to_string_lossy()));
    let mut found = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                println!("Error reading {}: {}", e.path().display(), e.error());
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        match inspect_npy(&path) {
            Ok(info) => {
                println!("Found: {}", path.display());
                println!("Shape: {:?}, Type: {}", info.shape, info.dtype);
                found.push(path);
            }
            Err(e) => println!("Error loading {}: {:#}", path.display(), e),
        }
    }
    Ok(found)
}
