//! Open handle bookkeeping
//!
//! Every tracked handle gets a [`Record`] holding who opened it, when, and
//! from where. Records live until the handle is dropped.

use chrono::{DateTime, Local};
use dashmap::DashMap;
use std::backtrace::Backtrace;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::options::AgentOptions;

/// One open handle
#[derive(Debug, Clone)]
pub struct Record {
    pub id: u64,
    pub description: String,
    pub thread: String,
    pub opened_at: DateTime<Local>,
    pub frames: Vec<String>,
}

impl Record {
    fn write_to(&self, index: usize, sink: &mut dyn Write) -> io::Result<()> {
        writeln!(
            sink,
            "#{} {} by thread:{} on {}",
            index,
            self.description,
            self.thread,
            self.opened_at.format("%a %b %d %H:%M:%S %Z %Y")
        )?;
        for frame in &self.frames {
            writeln!(sink, "\tat {frame}")?;
        }
        Ok(())
    }
}

/// The resident tracker
pub struct Agent {
    options: AgentOptions,
    records: DashMap<u64, Record>,
    next_id: AtomicU64,
    trace: Option<Mutex<File>>,
    over_threshold: AtomicBool,
}

impl Agent {
    pub(crate) fn new(options: AgentOptions) -> Result<Self, AgentError> {
        let trace = match &options.trace {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| AgentError::TraceFile {
                        path: path.clone(),
                        source,
                    })?;
                Some(Mutex::new(file))
            }
            None => None,
        };

        Ok(Self {
            options,
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
            trace,
            over_threshold: AtomicBool::new(false),
        })
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Number of handles currently open
    pub fn open_count(&self) -> usize {
        self.records.len()
    }

    /// Records ordered by the time they were opened
    pub fn snapshot(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Write the textual dump of every open handle into `sink`
    pub fn dump(&self, sink: &mut dyn Write) -> io::Result<()> {
        let records = self.snapshot();
        writeln!(sink, "{} descriptors are open", records.len())?;
        for (i, record) in records.iter().enumerate() {
            record.write_to(i + 1, sink)?;
        }
        sink.flush()
    }

    /// Returns `None` when the description is excluded.
    pub(crate) fn record_open(&self, description: String) -> Option<u64> {
        if self.options.is_excluded(&description) {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let thread = std::thread::current()
            .name()
            .unwrap_or("<unnamed>")
            .to_string();
        self.trace_event(&format!("Opened {description} by thread:{thread}"));

        self.records.insert(
            id,
            Record {
                id,
                description,
                thread,
                opened_at: Local::now(),
                frames: capture_frames(self.options.max_frames),
            },
        );
        self.check_threshold();
        Some(id)
    }

    pub(crate) fn record_close(&self, id: u64) {
        if let Some((_, record)) = self.records.remove(&id) {
            self.trace_event(&format!("Closed {}", record.description));
        }
        if let Some(threshold) = self.options.threshold {
            if self.records.len() <= threshold {
                self.over_threshold.store(false, Ordering::Relaxed);
            }
        }
    }

    fn check_threshold(&self) {
        let Some(threshold) = self.options.threshold else {
            return;
        };
        if self.records.len() > threshold && !self.over_threshold.swap(true, Ordering::Relaxed) {
            let mut buf = Vec::new();
            if self.dump(&mut buf).is_ok() {
                warn!(
                    "Open handle count exceeded threshold {threshold}:\n{}",
                    String::from_utf8_lossy(&buf)
                );
            }
        }
    }

    fn trace_event(&self, line: &str) {
        let Some(trace) = &self.trace else {
            return;
        };
        let mut file = match trace.lock() {
            Ok(f) => f,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{line}") {
            debug!("Failed to write trace event: {e}");
        }
    }
}

/// Capture the caller's stack, skipping the frames that belong to the agent itself
fn capture_frames(max_frames: usize) -> Vec<String> {
    if max_frames == 0 {
        return Vec::new();
    }

    let rendered = Backtrace::force_capture().to_string();
    rendered
        .lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (index, symbol) = line.split_once(": ")?;
            index.parse::<usize>().ok()?;
            Some(symbol.trim().to_string())
        })
        .filter(|symbol| !is_internal_frame(symbol))
        .take(max_frames)
        .collect()
}

fn is_internal_frame(symbol: &str) -> bool {
    symbol.starts_with("std::backtrace")
        || symbol.starts_with("leak_agent::agent::")
        || symbol.starts_with("leak_agent::tracked::")
        || symbol.starts_with("<leak_agent::tracked::")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_with(options: AgentOptions) -> Agent {
        Agent::new(options).unwrap()
    }

    #[test]
    fn test_open_and_close() {
        let agent = agent_with(AgentOptions::default());
        let id = agent.record_open("/tmp/a".to_string()).unwrap();
        assert_eq!(agent.open_count(), 1);

        let records = agent.snapshot();
        assert_eq!(records[0].description, "/tmp/a");
        assert_eq!(records[0].id, id);

        agent.record_close(id);
        assert_eq!(agent.open_count(), 0);
    }

    #[test]
    fn test_dump_format() {
        let agent = agent_with(AgentOptions::default());
        agent.record_open("/tmp/first".to_string());
        agent.record_open("selector".to_string());

        let mut out = Vec::new();
        agent.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("2 descriptors are open\n"));
        assert!(text.contains("#1 /tmp/first by thread:"));
        assert!(text.contains("#2 selector by thread:"));
        let first = text.find("/tmp/first").unwrap();
        let second = text.find("selector").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_thread_name_recorded() {
        let agent = std::sync::Arc::new(agent_with(AgentOptions::default()));
        let a = agent.clone();
        std::thread::Builder::new()
            .name("opener".to_string())
            .spawn(move || {
                a.record_open("/tmp/from-thread".to_string());
            })
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(agent.snapshot()[0].thread, "opener");
    }

    #[test]
    fn test_excludes_skip_recording() {
        let agent = agent_with(AgentOptions {
            excludes: vec!["/proc".to_string()],
            ..AgentOptions::default()
        });
        assert!(agent.record_open("/proc/self/stat".to_string()).is_none());
        assert_eq!(agent.open_count(), 0);
    }

    #[test]
    fn test_maxframes_limits_stack() {
        let agent = agent_with(AgentOptions {
            max_frames: 2,
            ..AgentOptions::default()
        });
        agent.record_open("/tmp/x".to_string());
        assert!(agent.snapshot()[0].frames.len() <= 2);

        let bare = agent_with(AgentOptions {
            max_frames: 0,
            ..AgentOptions::default()
        });
        bare.record_open("/tmp/y".to_string());
        assert!(bare.snapshot()[0].frames.is_empty());
    }

    #[test]
    fn test_trace_file_receives_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        let agent = agent_with(AgentOptions {
            trace: Some(path.clone()),
            ..AgentOptions::default()
        });

        let id = agent.record_open("/tmp/traced".to_string()).unwrap();
        agent.record_close(id);

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("Opened /tmp/traced by thread:"));
        assert!(log.contains("Closed /tmp/traced"));
    }

    #[test]
    fn test_trace_file_unwritable() {
        let result = Agent::new(AgentOptions {
            trace: Some("/nonexistent-dir/trace.log".into()),
            ..AgentOptions::default()
        });
        assert!(matches!(result, Err(AgentError::TraceFile { .. })));
    }

    #[test]
    fn test_threshold_rearms_after_drop() {
        let agent = agent_with(AgentOptions {
            threshold: Some(1),
            ..AgentOptions::default()
        });
        let a = agent.record_open("/tmp/1".to_string()).unwrap();
        assert!(!agent.over_threshold.load(Ordering::Relaxed));
        let b = agent.record_open("/tmp/2".to_string()).unwrap();
        assert!(agent.over_threshold.load(Ordering::Relaxed));
        agent.record_close(b);
        assert!(!agent.over_threshold.load(Ordering::Relaxed));
        agent.record_close(a);
    }
}
