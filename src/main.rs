//! rsdu - an interactive disk usage analyzer
//!
//! Scans a directory tree, folding per-entry stats into a single
//! in-memory model as it goes (§3, §4.1), then lets you browse the
//! result interactively. Dumps produced by `--output` (or read back via
//! `--file`) use the same streaming `[MAJOR,MINOR,{...},root]` format
//! ncdu's own dump files use (§4.3, §4.4).

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

mod cli;
mod config;
mod export;
mod import;
mod model;
mod scanner;
mod sink;
mod tui;
mod util;

mod error;

use cli::Args;
use config::{Config, ScanUi};
use export::Exporter;
use model::Model;
use scanner::{NullObserver, ScanConfig, ScanObserver, ScanProgress};
use sink::Sink;
use tui::TuiApp;

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::from_args(&args)?;

    if config.scan_ui.is_none() {
        config.scan_ui = Some(if atty::is(atty::Stream::Stdout) {
            ScanUi::Full
        } else {
            ScanUi::None
        });
    }

    if let Some(import_file) = args.import_file.clone() {
        return handle_import(&import_file, config);
    }

    let scan_path = resolve_scan_path(&args)?;
    run_application(&scan_path, config)
}

fn resolve_scan_path(args: &Args) -> Result<PathBuf> {
    let path = args
        .directory
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    path.canonicalize()
        .with_context(|| format!("Cannot access directory '{}'", path.display()))
}

/// `--file FILE` (or `-` for stdin): read a dump instead of scanning.
/// If `--output` is also given, the dump is just re-serialized (import
/// straight into an [`Exporter`]) rather than built into a [`Model`].
fn handle_import(import_file: &str, config: Config) -> Result<()> {
    if let Some(export_path) = &config.export_json {
        let file =
            File::create(export_path).with_context(|| format!("Cannot create '{}'", export_path))?;
        let mut exporter = Exporter::new(file, "rsdu", env!("CARGO_PKG_VERSION"), current_unix_time())
            .context("failed to start export")?;
        read_dump_into(import_file, &mut exporter)?;
        exporter.finish().context("failed to finish export")?;
        return Ok(());
    }

    let mut model = Model::new();
    read_dump_into(import_file, &mut model)?;
    model.finalize_deferred_links();

    let mut app = TuiApp::new(config)?;
    app.browse(model).map_err(|e| anyhow::anyhow!("{}", e))
}

fn read_dump_into<S: Sink>(import_file: &str, sink: &mut S) -> Result<()> {
    if import_file == "-" {
        let mut data = Vec::new();
        io::stdin()
            .read_to_end(&mut data)
            .context("failed to read dump from stdin")?;
        import::import_from_slice(&data, sink).map_err(|e| anyhow::anyhow!("{}", e))
    } else {
        import::import_root(Path::new(import_file), sink).map_err(|e| anyhow::anyhow!("{}", e))
    }
}

/// Scan-then-browse (or scan-then-export) flow.
fn run_application(scan_path: &Path, config: Config) -> Result<()> {
    let scan_config = config.to_scan_config()?;

    if let Some(export_path) = &config.export_json {
        let file =
            File::create(export_path).with_context(|| format!("Cannot create '{}'", export_path))?;
        let mut exporter = Exporter::new(file, "rsdu", env!("CARGO_PKG_VERSION"), current_unix_time())
            .context("failed to start export")?;
        scanner::scan_root(scan_path, &mut exporter, &scan_config, &mut NullObserver)
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        exporter.finish().context("failed to finish export")?;
        return Ok(());
    }

    match config.scan_ui.unwrap_or(ScanUi::Full) {
        ScanUi::None => {
            let model = scan_headless(scan_path, &scan_config)?;
            browse_interactively(model, config)
        }
        ScanUi::Line => {
            let model = scan_with_line_progress(scan_path, &scan_config)?;
            browse_interactively(model, config)
        }
        ScanUi::Full => {
            let mut app = TuiApp::new(config)?;
            match app.scan(scan_path, &scan_config)? {
                Some(model) => app.browse(model).map_err(|e| anyhow::anyhow!("{}", e)),
                None => Ok(()), // cancelled mid-scan
            }
        }
    }
}

fn browse_interactively(model: Model, config: Config) -> Result<()> {
    let mut app = TuiApp::new(config)?;
    app.browse(model).map_err(|e| anyhow::anyhow!("{}", e))
}

fn scan_headless(scan_path: &Path, scan_config: &ScanConfig) -> Result<Model> {
    let mut model = Model::new();
    scanner::scan_root(scan_path, &mut model, scan_config, &mut NullObserver)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    model.finalize_deferred_links();
    Ok(model)
}

/// A single status line on stderr, rewritten in place — the `--line-ui`
/// counterpart to the full scanning screen in [`tui`]. The total item
/// count isn't known ahead of a scan, so this is a spinner rather than a
/// bounded bar.
struct LineProgressObserver {
    bar: indicatif::ProgressBar,
    last_draw: Instant,
}

impl LineProgressObserver {
    fn new() -> Self {
        let bar = indicatif::ProgressBar::new_spinner();
        bar.set_style(
            indicatif::ProgressStyle::with_template("{spinner} scanning... {msg}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner()),
        );
        Self {
            bar,
            last_draw: Instant::now() - Duration::from_secs(1),
        }
    }
}

impl ScanObserver for LineProgressObserver {
    fn handle_event(&mut self, progress: &ScanProgress) -> bool {
        if self.last_draw.elapsed() >= Duration::from_millis(100) {
            self.last_draw = Instant::now();
            self.bar.set_message(format!(
                "{} entries (depth {})",
                progress.entries_seen, progress.current_dir_depth
            ));
            self.bar.tick();
        }
        true
    }
}

fn scan_with_line_progress(scan_path: &Path, scan_config: &ScanConfig) -> Result<Model> {
    let mut model = Model::new();
    let mut observer = LineProgressObserver::new();
    scanner::scan_root(scan_path, &mut model, scan_config, &mut observer)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    observer.bar.finish_and_clear();
    model.finalize_deferred_links();
    Ok(model)
}

fn current_unix_time() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_unix_time_is_positive() {
        assert!(current_unix_time() > 0);
    }
}
