//! `turnout setup` — downloads the ONNX models used for detection and recognition.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use turnout_core::models::{sha256_hex, verify_checksum, ModelError, ModelSpec, MODEL_SPECS};

/// Manifest entries that are missing from `dir` or fail their checksum.
fn models_to_fetch(dir: &Path) -> Vec<&'static ModelSpec> {
    MODEL_SPECS
        .iter()
        .filter(|model| match verify_checksum(&dir.join(model.file_name), model.sha256) {
            Ok(()) => {
                println!("  {} already present (checksum ok)", model.file_name);
                false
            }
            Err(ModelError::Missing(_)) => true,
            Err(e) => {
                println!("  {}: {e}, downloading again", model.file_name);
                true
            }
        })
        .collect()
}

/// Download one model to `dest` through a `.part` file, verified before the rename.
fn download_model(model: &ModelSpec, dest: &Path) -> Result<()> {
    let tmp_path = dest.with_extension("onnx.part");

    println!("  downloading {} ({})...", model.file_name, model.size_display);
    tracing::debug!(url = model.url, "model download started");

    let resp = ureq::get(model.url)
        .call()
        .with_context(|| format!("failed to download {}", model.url))?;

    let content_length = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut reader = resp.into_body().into_reader();
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut buf = vec![0u8; 64 * 1024];
    let mut total: u64 = 0;
    let mut last_decile: u64 = 0;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        total += n as u64;

        if let Some(len) = content_length.filter(|&l| l > 0) {
            let decile = total * 10 / len;
            if decile > last_decile {
                print!("  {}%\r", decile * 10);
                io::stdout().flush().ok();
                last_decile = decile;
            }
        }
    }
    file.flush()?;
    drop(file);

    print!("  verifying checksum... ");
    io::stdout().flush().ok();
    let digest = sha256_hex(&tmp_path)?;
    if digest != model.sha256 {
        fs::remove_file(&tmp_path).ok();
        bail!(
            "checksum mismatch for {}:\n  expected: {}\n  got:      {}",
            model.file_name,
            model.sha256,
            digest
        );
    }
    println!("ok");

    fs::rename(&tmp_path, dest).with_context(|| {
        format!("failed to rename {} -> {}", tmp_path.display(), dest.display())
    })?;
    tracing::info!(path = %dest.display(), bytes = total, "model installed");
    Ok(())
}

/// Run the setup command: download and verify every model into `dir`.
pub fn run(dir: &Path) -> Result<()> {
    println!("Model directory: {}", dir.display());
    fs::create_dir_all(dir).with_context(|| format!("failed to create directory {}", dir.display()))?;

    let pending = models_to_fetch(dir);
    let skipped = MODEL_SPECS.len() - pending.len();
    for model in &pending {
        download_model(model, &dir.join(model.file_name))?;
    }

    println!();
    if pending.is_empty() {
        println!("All models already present. Nothing to download.");
    } else {
        println!(
            "Setup complete: {} model(s) downloaded, {skipped} already present.",
            pending.len()
        );
    }
    Ok(())
}
