//! recorder.rs
//! Background CSV recording of mocap samples.
//!
//! While active, one thread polls the latest-value slot every 10 ms and appends
//! a timestamped row, flushing after each one. The thread is the sole owner of
//! the file; `stop()` cancels it and waits for the final flush and close.
//!
//! Row layout: `timestamp,body_x,body_y,body_z,foot_x,foot_y,foot_z`

use chrono::{DateTime, Local};
use crossbeam::channel::{Receiver, RecvTimeoutError, bounded};
use csv::{Writer, WriterBuilder};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    fs::{File, create_dir_all},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use log::{debug, error, info, warn};

use crate::error::RecorderError;
use crate::telemetry::sample::{LatestSlot, TelemetrySample};

pub const CSV_HEADER: [&str; 7] = [
    "timestamp", "body_x", "body_y", "body_z", "foot_x", "foot_y", "foot_z",
];

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Upper bound on how long `stop()` waits for the writer thread.
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
struct CsvRow {
    timestamp: String,
    body_x: f32,
    body_y: f32,
    body_z: f32,
    foot_x: f32,
    foot_y: f32,
    foot_z: f32,
}

impl CsvRow {
    fn new(ts: DateTime<Local>, s: &TelemetrySample) -> Self {
        Self {
            timestamp: ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            body_x: s.body_x,
            body_y: s.body_y,
            body_z: s.body_z,
            foot_x: s.foot_x,
            foot_y: s.foot_y,
            foot_z: s.foot_z,
        }
    }
}

/// `<dir>/<tag>_<YYYYMMDD_HHMMSS>.csv`, with `_<n>` appended if that name is taken.
pub fn recording_path(dir: &Path, device_tag: &str, at: DateTime<Local>) -> PathBuf {
    let stem = format!("{}_{}", device_tag, at.format("%Y%m%d_%H%M%S"));
    let mut path = dir.join(format!("{}.csv", stem));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}.csv", stem, n));
        n += 1;
    }
    path
}

/// One recording session: a file plus the thread writing it.
pub struct Recorder {
    path: PathBuf,
    cancel: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    rows: Arc<AtomicU64>,
    fault: Arc<Mutex<Option<String>>>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl Recorder {
    /// Creates `output_path` (and its directory) and spawns the writer thread.
    /// The header is written even if no sample ever arrives.
    pub fn start(source: Arc<LatestSlot>, output_path: impl Into<PathBuf>) -> Result<Self, RecorderError> {
        let path = output_path.into();
        let file_err = |source| RecorderError::File {
            path: path.clone(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_dir_all(dir).map_err(file_err)?;
        }
        let file = File::create(&path).map_err(file_err)?;
        let writer = WriterBuilder::new().has_headers(false).from_writer(file);

        let cancel = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicBool::new(true));
        let rows = Arc::new(AtomicU64::new(0));
        let fault = Arc::new(Mutex::new(None));
        let (done_tx, done_rx) = bounded::<()>(1);

        let worker = RecordLoop {
            writer,
            source,
            cancel: cancel.clone(),
            rows: rows.clone(),
        };
        let thread_active = active.clone();
        let thread_fault = fault.clone();
        let thread_path = path.clone();

        let handle = thread::Builder::new()
            .name("recorder".into())
            .spawn(move || {
                if let Err(e) = worker.run() {
                    error!("[Recorder] {:?}: {}", thread_path, e);
                    *thread_fault.lock() = Some(e.to_string());
                }
                thread_active.store(false, Ordering::SeqCst);
                let _ = done_tx.send(());
            })
            .map_err(RecorderError::Spawn)?;

        info!("[Recorder] recording to {:?}", path);
        Ok(Self {
            path,
            cancel,
            active,
            rows,
            fault,
            done_rx,
            handle: Some(handle),
        })
    }

    /// Cancels the writer and waits (bounded) for it to flush and close the file.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.cancel.store(true, Ordering::SeqCst);

        match self.done_rx.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    error!("[Recorder] writer thread panicked");
                }
                info!(
                    "[Recorder] saved {:?} ({} rows)",
                    self.path,
                    self.rows.load(Ordering::Relaxed)
                );
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("[Recorder] writer did not stop within {:?}; detaching", STOP_TIMEOUT);
            }
        }
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// False once stopped or after the writer died on a file error.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn rows_written(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    /// File error that ended the recording early, if any.
    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

struct RecordLoop {
    writer: Writer<File>,
    source: Arc<LatestSlot>,
    cancel: Arc<AtomicBool>,
    rows: Arc<AtomicU64>,
}

impl RecordLoop {
    fn run(mut self) -> Result<(), csv::Error> {
        self.writer.write_record(CSV_HEADER)?;
        self.writer.flush()?;

        while !self.cancel.load(Ordering::SeqCst) {
            if let Some(sample) = self.source.latest() {
                self.writer.serialize(CsvRow::new(Local::now(), &sample))?;
                self.writer.flush()?;
                self.rows.fetch_add(1, Ordering::Relaxed);
            }
            thread::sleep(POLL_INTERVAL);
        }

        self.writer.flush()?;
        debug!("[Recorder] writer exiting");
        Ok(())
    }
}
