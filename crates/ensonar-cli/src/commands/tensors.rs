//! `enso tensors` - list tensor names and shapes of a weights file.

use std::path::Path;

use colored::Colorize;

use ensonar::serialization::load_safetensors;

use crate::error::{CliError, Result};

pub(crate) fn run(file: &Path, limit: usize) -> Result<()> {
    if !file.exists() {
        return Err(CliError::FileNotFound(file.to_path_buf()));
    }

    let store = load_safetensors(file)?;
    let total: usize = store
        .values()
        .map(|(_, shape)| shape.iter().product::<usize>())
        .sum();

    println!(
        "{} {} tensors, {} parameters",
        "weights".cyan().bold(),
        store.len(),
        total
    );

    for (name, (_, shape)) in store.iter().take(limit) {
        let numel: usize = shape.iter().product();
        println!("  {:<48} {:<20} {:>10}", name, format!("{shape:?}"), numel);
    }
    if store.len() > limit {
        println!("  ... and {} more (raise --limit to see them)", store.len() - limit);
    }

    Ok(())
}
