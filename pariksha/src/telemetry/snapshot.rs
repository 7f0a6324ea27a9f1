//! Periodic resource snapshots of the benchmark's process tree.
//!
//! The tracked set (a root process and all its descendants) is captured
//! once at startup. Each tick refreshes those processes and writes one
//! postcard-encoded file `ps_{seq:08}.bin` holding one field map per
//! process still alive.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, select, tick};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System};
use thiserror::Error;

/// Fields that are never recorded, even if a backend provides them.
pub const EXCLUDED_FIELDS: &[&str] = &["connections", "memory_maps", "environ"];

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] postcard::Error),
}

/// A single process field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    TextList(Vec<String>),
    Missing,
}

/// Field name to value, for one process.
pub type ProcessRecord = BTreeMap<String, FieldValue>;

/// Decode the contents of a snapshot file.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Vec<ProcessRecord>, SnapshotError> {
    Ok(postcard::from_bytes(bytes)?)
}

/// File name of snapshot `seq`.
pub fn snapshot_file_name(seq: u64) -> String {
    format!("ps_{:08}.bin", seq)
}

/// Captures process snapshots into a folder.
pub struct ProcessSnapshotter {
    system: System,
    tracked: Vec<Pid>,
    folder: PathBuf,
    sequence: u64,
}

impl ProcessSnapshotter {
    /// Track `root_pid` (the current process when `None`) and its
    /// descendants, writing snapshots into `folder`.
    pub fn new(root_pid: Option<u32>, folder: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let folder = folder.into();
        fs::create_dir_all(&folder)?;

        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let root = match root_pid {
            Some(pid) => Some(Pid::from_u32(pid)),
            None => sysinfo::get_current_pid().ok(),
        };
        let tracked = match root {
            Some(root) if system.process(root).is_some() => process_tree(&system, root),
            _ => {
                tracing::warn!("Root process {:?} not found, no process will be tracked", root);
                Vec::new()
            }
        };

        tracing::info!(
            "Tracking {} processes for resource snapshots in {:?}",
            tracked.len(),
            folder
        );

        Ok(Self {
            system,
            tracked,
            folder,
            sequence: 0,
        })
    }

    /// Snapshotter with an empty tracked set; every tick writes an empty list.
    pub fn untracked(folder: impl Into<PathBuf>) -> Self {
        Self {
            system: System::new(),
            tracked: Vec::new(),
            folder: folder.into(),
            sequence: 0,
        }
    }

    pub fn tracked_pids(&self) -> Vec<u32> {
        self.tracked.iter().map(|p| p.as_u32()).collect()
    }

    /// Sequence number of the next snapshot.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Take one snapshot. The sequence number advances even on failure.
    pub fn snapshot_once(&mut self) -> Result<PathBuf, SnapshotError> {
        let seq = self.sequence;
        self.sequence += 1;

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&self.tracked),
            true,
            ProcessRefreshKind::everything(),
        );

        // Exited processes are skipped
        let records: Vec<ProcessRecord> = self
            .tracked
            .iter()
            .filter_map(|pid| self.system.process(*pid))
            .map(process_record)
            .collect();

        let bytes = postcard::to_allocvec(&records)?;
        let path = self.folder.join(snapshot_file_name(seq));
        fs::write(&path, bytes)?;
        Ok(path)
    }
}

/// `root` followed by all of its descendants, breadth first.
fn process_tree(system: &System, root: Pid) -> Vec<Pid> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut tree = vec![root];
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        if let Some(kids) = children.get(&pid) {
            let mut kids = kids.clone();
            kids.sort();
            for kid in kids {
                if !tree.contains(&kid) {
                    tree.push(kid);
                    queue.push_back(kid);
                }
            }
        }
    }
    tree
}

fn process_record(process: &Process) -> ProcessRecord {
    let path_text = |p: Option<&Path>| {
        p.map(|p| FieldValue::Text(p.display().to_string()))
            .unwrap_or(FieldValue::Missing)
    };
    let disk = process.disk_usage();

    let mut record = ProcessRecord::new();
    record.insert("pid".into(), FieldValue::UInt(process.pid().as_u32() as u64));
    record.insert(
        "ppid".into(),
        process
            .parent()
            .map(|p| FieldValue::UInt(p.as_u32() as u64))
            .unwrap_or(FieldValue::Missing),
    );
    record.insert(
        "name".into(),
        FieldValue::Text(process.name().to_string_lossy().into_owned()),
    );
    record.insert(
        "cmdline".into(),
        FieldValue::TextList(
            process
                .cmd()
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect(),
        ),
    );
    record.insert("exe".into(), path_text(process.exe()));
    record.insert("cwd".into(), path_text(process.cwd()));
    record.insert("status".into(), FieldValue::Text(process.status().to_string()));
    record.insert("create_time".into(), FieldValue::UInt(process.start_time()));
    record.insert("run_time".into(), FieldValue::UInt(process.run_time()));
    record.insert(
        "cpu_percent".into(),
        FieldValue::Float(process.cpu_usage() as f64),
    );
    record.insert("memory_rss".into(), FieldValue::UInt(process.memory()));
    record.insert("memory_vms".into(), FieldValue::UInt(process.virtual_memory()));
    record.insert(
        "num_threads".into(),
        process
            .tasks()
            .map(|t| FieldValue::UInt(t.len() as u64))
            .unwrap_or(FieldValue::Missing),
    );
    record.insert("io_read_bytes".into(), FieldValue::UInt(disk.total_read_bytes));
    record.insert(
        "io_write_bytes".into(),
        FieldValue::UInt(disk.total_written_bytes),
    );
    record
}

/// Run `snapshot_once` every `period` until `shutdown` disconnects.
///
/// Returns the snapshotter so the caller can read the final sequence.
pub fn spawn_snapshot_timer(
    mut snapshotter: ProcessSnapshotter,
    period: Duration,
    shutdown: Receiver<()>,
) -> JoinHandle<ProcessSnapshotter> {
    thread::Builder::new()
        .name("ps-snapshot".into())
        .spawn(move || {
            let ticker = tick(period);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        if let Err(e) = snapshotter.snapshot_once() {
                            tracing::error!(
                                "Process snapshot {} failed: {}",
                                snapshotter.sequence().saturating_sub(1),
                                e
                            );
                        }
                    }
                    recv(shutdown) -> _ => break,
                }
            }
            snapshotter
        })
        .expect("Failed to spawn snapshot thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_untracked_writes_empty_snapshots() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("ps");
        fs::create_dir_all(&folder).unwrap();
        let mut snapshotter = ProcessSnapshotter::untracked(&folder);

        assert!(snapshotter.tracked_pids().is_empty());
        let path = snapshotter.snapshot_once().unwrap();
        assert!(decode_snapshot(&fs::read(path).unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_tracks_current_process() {
        let dir = TempDir::new().unwrap();
        let snapshotter = ProcessSnapshotter::new(None, dir.path().join("ps")).unwrap();

        let me = std::process::id();
        assert_eq!(snapshotter.tracked_pids().first(), Some(&me));
        assert!(dir.path().join("ps").is_dir());
    }

    #[test]
    fn test_snapshots_numbered_contiguously() {
        let dir = TempDir::new().unwrap();
        let mut snapshotter = ProcessSnapshotter::new(None, dir.path()).unwrap();

        for i in 0..3 {
            let path = snapshotter.snapshot_once().unwrap();
            assert_eq!(
                path.file_name().unwrap().to_string_lossy(),
                format!("ps_{:08}.bin", i)
            );
        }
        assert_eq!(snapshotter.sequence(), 3);

        let bytes = fs::read(dir.path().join("ps_00000002.bin")).unwrap();
        let records = decode_snapshot(&bytes).unwrap();
        assert!(!records.is_empty());
        let me = &records[0];
        assert_eq!(
            me.get("pid"),
            Some(&FieldValue::UInt(std::process::id() as u64))
        );
        for field in EXCLUDED_FIELDS {
            assert!(!me.contains_key(*field));
        }
    }

    #[test]
    fn test_unknown_root_writes_empty_snapshots() {
        let dir = TempDir::new().unwrap();
        let mut snapshotter = ProcessSnapshotter::new(Some(u32::MAX - 7), dir.path()).unwrap();
        assert!(snapshotter.tracked_pids().is_empty());

        let path = snapshotter.snapshot_once().unwrap();
        let records = decode_snapshot(&fs::read(path).unwrap()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_sequence_advances_on_failure() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("ps");
        let mut snapshotter = ProcessSnapshotter::new(None, &folder).unwrap();

        fs::remove_dir_all(&folder).unwrap();
        assert!(snapshotter.snapshot_once().is_err());
        assert_eq!(snapshotter.sequence(), 1);

        fs::create_dir_all(&folder).unwrap();
        let path = snapshotter.snapshot_once().unwrap();
        assert!(path.ends_with("ps_00000001.bin"));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_snapshot(&[0xff, 0xff, 0xff]).is_err());
    }
}
