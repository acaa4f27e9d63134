//! Bakes paired transcript/audio-code samples into fixed-length token rows for TTS
//! language-model training, stored as flat `i32` memmap files with `.npy` shape sidecars.

pub mod bake;
pub mod config;
pub mod dataset;
pub mod encode;
pub mod memmap;
pub mod scan;
pub mod split;
pub mod tokenizer;

pub use bake::{run, BakeOptions, BakeOutcome, BakeReport};
pub use config::BakeConfig;
pub use dataset::SampleTable;
pub use encode::{remap_codes, SampleEncoder};
pub use memmap::{read_split, write_artifacts, TokenMatrix};
pub use tokenizer::{ControlToken, HfTokenizer, TextTokenizer, Vocabulary};
