//! Frame delivery: a reader thread parses JSON-lines frames ahead of the
//! engine through a bounded channel; the engine consumes them in order.

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::Serialize;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    fs,
    io::{self, BufRead, BufReader, Write},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError, SyncSender},
    },
    thread,
    time::Duration,
};

use crate::config::Config;
use crate::detection::RawFrame;
use crate::engine::Engine;
use crate::events::LogSink;
use crate::store::ViolationLog;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// `None` or `-` reads stdin.
    pub input: Option<PathBuf>,
    pub violations_path: PathBuf,
    pub quiet: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    pub skipped_lines: u64,
    pub rejected_frames: u64,
    pub violations: u64,
    pub unpersisted: u64,
    pub dropped_entries: usize,
}

fn spawn_reader<R>(
    input: R,
    tx: SyncSender<RawFrame>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<u64>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        let mut skipped = 0u64;
        for (n, line) in input.lines().enumerate() {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    error!("input read failed: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RawFrame>(&line) {
                // blocks while the engine is behind
                Ok(frame) => {
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("line {}: not a frame: {e}", n + 1);
                    skipped += 1;
                }
            }
        }
        skipped
    })
}

/// Drive `engine` over every frame in `input`, appending violations to `log`
/// and writing one report line per frame to `out`.
pub fn run_stream<R, W>(
    engine: &mut Engine,
    input: R,
    log: &ViolationLog,
    out: &mut W,
    quiet: bool,
    capacity: usize,
    stop: Arc<AtomicBool>,
) -> Result<RunSummary>
where
    R: BufRead + Send + 'static,
    W: Write,
{
    let (tx, rx) = mpsc::sync_channel::<RawFrame>(capacity);
    let reader = spawn_reader(input, tx, stop.clone());
    let mut sink = LogSink;
    let mut summary = RunSummary::default();

    loop {
        if stop.load(Ordering::Relaxed) {
            info!("stop requested");
            break;
        }
        let raw = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(f) => f,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let mut report = match engine.process(&raw, &mut sink) {
            Ok(r) => r,
            Err(e) => {
                warn!("{e}");
                summary.rejected_frames += 1;
                continue;
            }
        };
        summary.frames += 1;

        summary.violations = engine.violation_count();
        for v in &report.violations {
            if let Err(e) = log.append(v) {
                error!("violation at frame {} not persisted: {e}", v.frame_id);
                summary.unpersisted += 1;
                report.unpersisted.push(v.hand_id);
            }
        }

        if !quiet {
            let line = serde_json::to_string(&report)?;
            if let Err(e) = writeln!(out, "{line}") {
                if e.kind() == io::ErrorKind::BrokenPipe {
                    info!("output closed");
                    // the reader may be parked on an idle input; don't wait for it
                    stop.store(true, Ordering::Relaxed);
                    break;
                }
                return Err(e).context("failed to write frame report");
            }
        }
    }

    drop(rx);
    summary.dropped_entries = engine.shutdown(&mut sink);
    if !stop.load(Ordering::Relaxed) {
        summary.skipped_lines = reader.join().unwrap_or_default();
    }
    out.flush().ok();
    Ok(summary)
}

pub fn run(cfg: &Config, opts: RunOptions) -> Result<RunSummary> {
    let mut engine = Engine::new(cfg)?;
    let log = ViolationLog::open(&opts.violations_path);
    info!(
        "{} zone(s), violations -> {}",
        engine.zones().len(),
        log.path().display()
    );

    let stop = Arc::new(AtomicBool::new(false));
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let signal_handle = signals.handle();
    {
        let stop = stop.clone();
        thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("caught signal {sig}, stopping");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let summary = match opts.input.as_deref() {
        Some(p) if p.as_os_str() != "-" => {
            let f = fs::File::open(p).with_context(|| format!("failed to open {}", p.display()))?;
            run_stream(
                &mut engine,
                BufReader::new(f),
                &log,
                &mut out,
                opts.quiet,
                cfg.output.queue_capacity,
                stop,
            )?
        }
        _ => run_stream(
            &mut engine,
            BufReader::new(io::stdin()),
            &log,
            &mut out,
            opts.quiet,
            cfg.output.queue_capacity,
            stop,
        )?,
    };
    signal_handle.close();

    info!(
        "processed {} frame(s) ({} unreadable lines, {} out-of-order frames), {} violation(s) ({} not persisted), {} open entr(ies) dropped",
        summary.frames,
        summary.skipped_lines,
        summary.rejected_frames,
        summary.violations,
        summary.unpersisted,
        summary.dropped_entries
    );
    Ok(summary)
}
