use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tts_bake::scan::scan_for_npy_files;

#[derive(Parser)]
#[command(name = "scan-npy", about = "List every loadable .npy file under a directory")]
struct Args {
    /// Directory to scan.
    #[arg(default_value = ".")]
    root: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    println!("Scanning for .npy files...");
    let npy_files = scan_for_npy_files(&args.root)?;

    if npy_files.is_empty() {
        println!("\nNo .npy files found. You might need to generate VQ codes first.");
    } else {
        println!("\nFound .npy files in these locations:");
        for file in &npy_files {
            println!("{}", file.display());
        }
    }
    Ok(())
}
