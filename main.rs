use clap::Parser;
use kyc_doc_classifier::batch::{classify_all, collect_inputs};
use kyc_doc_classifier::{Cli, Command, Engine, Result};
use std::io::Write;
use std::sync::Arc;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = cli.settings()?;
    let engine = Arc::new(Engine::from_settings(settings)?);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match &cli.command {
        Command::Info => {
            serde_json::to_writer_pretty(&mut out, &engine.info())?;
            writeln!(out)?;
        }
        Command::Classes => {
            let classes = engine.class_names();
            let body = serde_json::json!({
                "classes": classes,
                "num_classes": classes.len(),
            });
            serde_json::to_writer_pretty(&mut out, &body)?;
            writeln!(out)?;
        }
        Command::Classify {
            inputs,
            workers,
            pretty,
        } => {
            let files = collect_inputs(inputs, &engine.settings().preprocessing);
            if files.is_empty() {
                log::warn!("No supported images found in the given inputs");
            }
            let entries = classify_all(&engine, &files, *workers);
            let succeeded = entries.iter().filter(|e| e.result.success).count();
            if *pretty {
                serde_json::to_writer_pretty(&mut out, &entries)?;
                writeln!(out)?;
            } else {
                for entry in &entries {
                    serde_json::to_writer(&mut out, entry)?;
                    writeln!(out)?;
                }
            }
            log::info!("Classified {}/{} files", succeeded, entries.len());
        }
    }
    Ok(())
}
