use crate::config::PreprocessingConfig;
use crate::engine::Engine;
use crate::models::PredictionResult;
use crossbeam_channel::{bounded, unbounded};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use walkdir::WalkDir;

/// One classified input, as printed by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    pub filename: String,
    pub file_size: Option<u64>,
    #[serde(flatten)]
    pub result: PredictionResult,
}

/// Expands directories into the supported image files beneath them, in
/// sorted order. Explicit file arguments are passed through untouched so the
/// format check can reject them visibly.
pub fn collect_inputs(inputs: &[PathBuf], preprocessing: &PreprocessingConfig) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let walked = WalkDir::new(input)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| preprocessing.check_format(e.path()).is_ok())
                .map(|e| e.into_path());
            files.extend(walked);
        } else {
            files.push(input.clone());
        }
    }
    files
}

pub fn classify_file(engine: &Engine, path: &Path) -> BatchEntry {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let file_size = std::fs::metadata(path).ok().map(|m| m.len());
    let result = match engine.settings().preprocessing.check_format(path) {
        Ok(()) => engine.predict_path(path),
        Err(err) => {
            log::warn!("Skipping {}: {err}", path.display());
            PredictionResult::failure(err.to_string())
        }
    };
    BatchEntry {
        filename,
        file_size,
        result,
    }
}

/// Classifies `paths` on `workers` threads sharing `engine`. Entries come
/// back in input order.
pub fn classify_all(engine: &Arc<Engine>, paths: &[PathBuf], workers: usize) -> Vec<BatchEntry> {
    let workers = workers.clamp(1, paths.len().max(1));
    if workers == 1 {
        return paths.iter().map(|p| classify_file(engine, p)).collect();
    }

    let (job_tx, job_rx) = bounded::<(usize, PathBuf)>(workers * 2);
    let (done_tx, done_rx) = unbounded::<(usize, BatchEntry)>();

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let engine = Arc::clone(engine);
        let job_rx = job_rx.clone();
        let done_tx = done_tx.clone();
        handles.push(thread::spawn(move || {
            for (idx, path) in job_rx.iter() {
                if done_tx.send((idx, classify_file(&engine, &path))).is_err() {
                    break;
                }
            }
        }));
    }
    drop(done_tx);

    for (idx, path) in paths.iter().enumerate() {
        if job_tx.send((idx, path.clone())).is_err() {
            break;
        }
    }
    drop(job_tx);

    let mut slots: Vec<Option<BatchEntry>> = vec![None; paths.len()];
    for (idx, entry) in done_rx.iter() {
        slots[idx] = Some(entry);
    }
    for handle in handles {
        if handle.join().is_err() {
            log::error!("Classification worker panicked");
        }
    }
    slots
        .into_iter()
        .zip(paths)
        .map(|(slot, path)| {
            slot.unwrap_or_else(|| BatchEntry {
                filename: path.display().to_string(),
                file_size: None,
                result: PredictionResult::failure("Worker exited before classifying this file"),
            })
        })
        .collect()
}
