//! Durable, append-only storage for debate sessions.
//!
//! Each session lives in its own directory under the store root:
//!
//! ```text
//! <root>/session_20261019_142501_037/
//!   session.json          metadata, replaced atomically on every change
//!   rounds/round_001.json one file per completed round
//!   debate_history.md     human-readable transcript
//!   final_design.md       final artifact, written once by finalize
//!   quality_report.json   quality report
//!   writer.lock           pid of the process writing this session
//! ```
//!
//! Every file is published with write-temp-then-rename, so readers only ever
//! see complete files. Rounds are validated on read: indices must be
//! contiguous from 1. A structurally invalid *last* round is treated as a
//! torn write and discarded; invalid rounds anywhere else make the whole
//! session corrupt.

use crate::config::SessionConfig;
use crate::quality::QualityReport;
use chrono::{DateTime, Utc};
use parley_proto::{Role, Round, SessionStatus};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const META_FILE: &str = "session.json";
const ROUNDS_DIR: &str = "rounds";
const FINAL_FILE: &str = "final_design.md";
const HISTORY_FILE: &str = "debate_history.md";
const REPORT_FILE: &str = "quality_report.json";
const LOCK_FILE: &str = "writer.lock";
const ID_PREFIX: &str = "session_";

/// Storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unknown session '{0}'")]
    InvalidSession(String),

    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("session '{id}' is corrupt: {reason}")]
    CorruptSession { id: String, reason: String },

    #[error("session '{id}' is being written by process {pid}")]
    Busy { id: String, pid: u32 },

    #[error("session '{id}' has an unreadable writer lease at {}", path.display())]
    UnreadableLease { id: String, path: PathBuf },

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

/// Programming errors. These halt the operation before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("session '{id}' was already finalized")]
    DoubleFinalize { id: String },

    #[error("round {got} appended to session '{id}' out of order (expected round {expected})")]
    OutOfOrderRound { id: String, expected: u32, got: u32 },

    #[error("session '{id}' cannot be finalized with non-terminal status '{status}'")]
    NonTerminalFinalize { id: String, status: SessionStatus },

    #[error("session '{id}' status '{status}' must be set through finalize")]
    TerminalStatusUpdate { id: String, status: SessionStatus },

    #[error("session '{id}' is finalized and cannot be modified")]
    ModifiedAfterFinalize { id: String },
}

fn unavailable(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::StorageUnavailable {
        path: path.to_path_buf(),
        source,
    }
}

/// Reference to a stored session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: String,
    pub dir: PathBuf,
}

/// Metadata persisted in `session.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub task: String,
    pub config: SessionConfig,
    pub status: SessionStatus,
    pub round_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finalized: bool,
    /// Why the session stopped, for interrupted and failed sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// A session reconstructed from storage.
#[derive(Debug, Clone)]
pub struct Session {
    pub meta: SessionMeta,
    pub rounds: Vec<Round>,
    pub final_artifact: Option<String>,
    /// Index of a torn trailing round that was dropped on load.
    pub discarded_round: Option<u32>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn status(&self) -> SessionStatus {
        self.meta.status
    }

    pub fn next_round_index(&self) -> u32 {
        self.rounds.len() as u32 + 1
    }

    pub fn last_round(&self) -> Option<&Round> {
        self.rounds.last()
    }
}

/// Filesystem-backed transcript store rooted at one output directory.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    root: PathBuf,
}

impl TranscriptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a session directory and writes its initial metadata.
    pub fn create(&self, task: &str, config: &SessionConfig) -> Result<SessionHandle, StoreError> {
        let handle = self.allocate()?;
        let rounds = handle.dir.join(ROUNDS_DIR);
        fs::create_dir(&rounds).map_err(unavailable(&rounds))?;

        let now = Utc::now();
        let meta = SessionMeta {
            id: handle.id.clone(),
            task: task.to_string(),
            config: config.clone(),
            status: SessionStatus::Running,
            round_count: 0,
            created_at: now,
            updated_at: now,
            finalized: false,
            cause: None,
        };
        write_json(&handle.dir.join(META_FILE), &meta)?;

        info!(session_id = %handle.id, dir = %handle.dir.display(), "Created session");
        Ok(handle)
    }

    /// Claims a fresh directory. `create_dir` fails on existing paths, so two
    /// creators racing for the same timestamp end up with different ids.
    fn allocate(&self) -> Result<SessionHandle, StoreError> {
        fs::create_dir_all(&self.root).map_err(unavailable(&self.root))?;
        let base = format!("{ID_PREFIX}{}", Utc::now().format("%Y%m%d_%H%M%S_%3f"));

        for n in 0..1000 {
            let id = if n == 0 {
                base.clone()
            } else {
                format!("{base}_{n:03}")
            };
            let dir = self.root.join(&id);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok(SessionHandle { id, dir }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(unavailable(&dir)(e)),
            }
        }

        Err(StoreError::StorageUnavailable {
            path: self.root.clone(),
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "could not allocate a unique session id",
            ),
        })
    }

    /// Returns the handle of an existing session, or `None` if it has no metadata.
    pub fn handle(&self, id: &str) -> Option<SessionHandle> {
        if !is_valid_id(id) {
            return None;
        }
        let dir = self.root.join(id);
        dir.join(META_FILE).is_file().then(|| SessionHandle {
            id: id.to_string(),
            dir,
        })
    }

    /// Lists all sessions, oldest first.
    pub fn list(&self) -> Result<Vec<SessionHandle>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unavailable(&self.root)(e)),
        };

        let mut handles = Vec::new();
        for entry in entries {
            let entry = entry.map_err(unavailable(&self.root))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.starts_with(ID_PREFIX) {
                continue;
            }
            if let Some(handle) = self.handle(&name) {
                handles.push(handle);
            }
        }

        // Ids embed the creation timestamp, so lexical order is creation order.
        handles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(handles)
    }

    /// The most recently created session.
    pub fn latest(&self) -> Result<Option<SessionHandle>, StoreError> {
        Ok(self.list()?.pop())
    }

    /// Reads only the metadata of a session.
    pub fn read_meta(&self, id: &str) -> Result<SessionMeta, StoreError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        read_meta(&handle)
    }

    /// Reconstructs a session with all of its rounds.
    pub fn load(&self, id: &str) -> Result<Session, StoreError> {
        let dir = self.root.join(id);
        if !is_valid_id(id) || !dir.is_dir() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let handle = SessionHandle {
            id: id.to_string(),
            dir,
        };

        let meta = read_meta(&handle)?;
        let (rounds, discarded_round) = read_rounds(&handle)?;

        let final_path = handle.dir.join(FINAL_FILE);
        let final_artifact = match fs::read_to_string(&final_path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(unavailable(&final_path)(e)),
        };

        debug!(
            session_id = %id,
            rounds = rounds.len(),
            status = %meta.status,
            "Loaded session"
        );

        Ok(Session {
            meta,
            rounds,
            final_artifact,
            discarded_round,
        })
    }

    /// Publishes one completed round.
    ///
    /// The round must directly follow the last valid stored round. A torn
    /// trailing round is overwritten.
    pub fn append_round(&self, id: &str, round: &Round) -> Result<(), StoreError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| StoreError::InvalidSession(id.to_string()))?;
        let mut meta = read_meta(&handle)?;
        if meta.finalized {
            return Err(InvariantViolation::ModifiedAfterFinalize { id: id.to_string() }.into());
        }

        let (existing, _) = read_rounds(&handle)?;
        let expected = existing.len() as u32 + 1;
        if round.index != expected {
            return Err(InvariantViolation::OutOfOrderRound {
                id: id.to_string(),
                expected,
                got: round.index,
            }
            .into());
        }

        write_json(&round_path(&handle.dir, round.index), round)?;

        meta.round_count = round.index;
        meta.updated_at = Utc::now();
        write_json(&handle.dir.join(META_FILE), &meta)?;

        debug!(session_id = %id, round = round.index, "Round persisted");
        Ok(())
    }

    /// Moves a session between `running` and `interrupted`.
    pub fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
        cause: Option<&str>,
    ) -> Result<(), StoreError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| StoreError::InvalidSession(id.to_string()))?;
        if status.is_terminal() {
            return Err(InvariantViolation::TerminalStatusUpdate {
                id: id.to_string(),
                status,
            }
            .into());
        }

        let mut meta = read_meta(&handle)?;
        if meta.finalized {
            return Err(InvariantViolation::ModifiedAfterFinalize { id: id.to_string() }.into());
        }
        meta.status = status;
        meta.cause = cause.map(str::to_string);
        meta.updated_at = Utc::now();
        write_json(&handle.dir.join(META_FILE), &meta)
    }

    /// Replaces the configuration snapshot, used when a resume raises limits.
    pub fn update_config(&self, id: &str, config: &SessionConfig) -> Result<(), StoreError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| StoreError::InvalidSession(id.to_string()))?;
        let mut meta = read_meta(&handle)?;
        if meta.finalized {
            return Err(InvariantViolation::ModifiedAfterFinalize { id: id.to_string() }.into());
        }
        meta.config = config.clone();
        meta.updated_at = Utc::now();
        write_json(&handle.dir.join(META_FILE), &meta)
    }

    /// Records the terminal status and the final artifact. Allowed once.
    pub fn finalize(
        &self,
        id: &str,
        status: SessionStatus,
        artifact: Option<&str>,
        cause: Option<&str>,
    ) -> Result<(), StoreError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| StoreError::InvalidSession(id.to_string()))?;
        let mut meta = read_meta(&handle)?;
        if meta.finalized {
            return Err(InvariantViolation::DoubleFinalize { id: id.to_string() }.into());
        }
        if !status.is_terminal() {
            return Err(InvariantViolation::NonTerminalFinalize {
                id: id.to_string(),
                status,
            }
            .into());
        }

        if let Some(artifact) = artifact {
            write_atomic(&handle.dir.join(FINAL_FILE), artifact.as_bytes())?;
        }

        meta.status = status;
        meta.finalized = true;
        meta.cause = cause.map(str::to_string);
        meta.updated_at = Utc::now();
        write_json(&handle.dir.join(META_FILE), &meta)?;

        info!(session_id = %id, status = %status, "Session finalized");
        Ok(())
    }

    pub fn write_history(&self, id: &str, markdown: &str) -> Result<(), StoreError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| StoreError::InvalidSession(id.to_string()))?;
        write_atomic(&handle.dir.join(HISTORY_FILE), markdown.as_bytes())
    }

    pub fn write_quality_report(&self, id: &str, report: &QualityReport) -> Result<(), StoreError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| StoreError::InvalidSession(id.to_string()))?;
        write_json(&handle.dir.join(REPORT_FILE), report)
    }

    pub fn read_quality_report(&self, id: &str) -> Result<Option<QualityReport>, StoreError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let path = handle.dir.join(REPORT_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(&path)(e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::CorruptSession {
                id: id.to_string(),
                reason: format!("{REPORT_FILE}: {e}"),
            })
    }

    /// Claims single-writer access to a session for the caller's lifetime.
    ///
    /// The lease is staged with the owner's pid and hard-linked into place,
    /// so it is never visible without its holder. A lease left behind by a
    /// process that no longer exists is reclaimed; one that cannot be read
    /// is left alone.
    pub fn acquire_writer(&self, id: &str) -> Result<WriterLease, StoreError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| StoreError::InvalidSession(id.to_string()))?;
        let path = handle.dir.join(LOCK_FILE);
        let pid = std::process::id();
        let staged = handle.dir.join(format!("{LOCK_FILE}.{pid}.tmp"));

        fs::write(&staged, format!("{pid}\n")).map_err(unavailable(&staged))?;
        let result = publish_lease(id, &staged, &path);
        if let Err(e) = fs::remove_file(&staged) {
            debug!(path = %staged.display(), error = %e, "Failed to remove staged writer lease");
        }
        result
    }
}

fn publish_lease(id: &str, staged: &Path, path: &Path) -> Result<WriterLease, StoreError> {
    for _ in 0..2 {
        match fs::hard_link(staged, path) {
            Ok(()) => {
                debug!(session_id = %id, "Writer lease acquired");
                return Ok(WriterLease {
                    path: path.to_path_buf(),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let contents = match fs::read_to_string(path) {
                    Ok(contents) => contents,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(unavailable(path)(e)),
                };
                let Ok(holder) = contents.trim().parse::<u32>() else {
                    return Err(StoreError::UnreadableLease {
                        id: id.to_string(),
                        path: path.to_path_buf(),
                    });
                };
                if process_alive(holder) {
                    return Err(StoreError::Busy {
                        id: id.to_string(),
                        pid: holder,
                    });
                }
                warn!(session_id = %id, holder, "Reclaiming stale writer lease");
                reclaim_stale_lease(id, path, &contents)?;
            }
            Err(e) => return Err(unavailable(path)(e)),
        }
    }

    Err(StoreError::Busy {
        id: id.to_string(),
        pid: 0,
    })
}

/// Moves a dead holder's lease aside. If another process published a fresh
/// lease after `expected` was read, that lease is put back untouched.
fn reclaim_stale_lease(id: &str, path: &Path, expected: &str) -> Result<(), StoreError> {
    let claimed = path.with_file_name(format!("{LOCK_FILE}.{}.stale", std::process::id()));
    match fs::rename(path, &claimed) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(unavailable(path)(e)),
    }

    let taken = fs::read_to_string(&claimed).map_err(unavailable(&claimed))?;
    let restore = taken != expected;
    if restore && let Err(e) = fs::hard_link(&claimed, path) {
        warn!(session_id = %id, error = %e, "Could not restore a fresh writer lease");
    }
    fs::remove_file(&claimed).map_err(unavailable(&claimed))?;

    if restore {
        return Err(StoreError::Busy {
            id: id.to_string(),
            pid: taken.trim().parse().unwrap_or(0),
        });
    }
    Ok(())
}

/// Exclusive write access to one session. Released on drop.
#[derive(Debug)]
pub struct WriterLease {
    path: PathBuf,
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release writer lease");
        }
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '\\']) && !id.starts_with('.')
}

fn round_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(ROUNDS_DIR).join(format!("round_{index:03}.json"))
}

fn parse_round_index(name: &str) -> Option<u32> {
    name.strip_prefix("round_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

fn read_meta(handle: &SessionHandle) -> Result<SessionMeta, StoreError> {
    let path = handle.dir.join(META_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StoreError::CorruptSession {
                id: handle.id.clone(),
                reason: format!("{META_FILE} is missing"),
            });
        }
        Err(e) => return Err(unavailable(&path)(e)),
    };

    let meta: SessionMeta =
        serde_json::from_str(&content).map_err(|e| StoreError::CorruptSession {
            id: handle.id.clone(),
            reason: format!("{META_FILE}: {e}"),
        })?;

    if meta.id != handle.id {
        return Err(StoreError::CorruptSession {
            id: handle.id.clone(),
            reason: format!("{META_FILE} belongs to session '{}'", meta.id),
        });
    }
    Ok(meta)
}

/// Reads and validates all rounds. Returns the valid rounds and the index of
/// a torn trailing round, if one was dropped.
fn read_rounds(handle: &SessionHandle) -> Result<(Vec<Round>, Option<u32>), StoreError> {
    let dir = handle.dir.join(ROUNDS_DIR);
    let corrupt = |reason: String| StoreError::CorruptSession {
        id: handle.id.clone(),
        reason,
    };

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(corrupt(format!("{ROUNDS_DIR}/ directory is missing")));
        }
        Err(e) => return Err(unavailable(&dir)(e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(unavailable(&dir))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        match parse_round_index(name) {
            Some(index) => files.push((index, entry.path())),
            None => debug!(file = %name, "Ignoring non-round file"),
        }
    }
    files.sort_by_key(|(index, _)| *index);

    let mut rounds = Vec::with_capacity(files.len());
    let last = files.len();
    for (pos, (index, path)) in files.into_iter().enumerate() {
        let expected = pos as u32 + 1;
        if index != expected {
            return Err(corrupt(format!(
                "round files are not contiguous: expected round {expected}, found round {index}"
            )));
        }

        let content = fs::read_to_string(&path).map_err(unavailable(&path))?;
        match validate_round(&content, index) {
            Ok(round) => rounds.push(round),
            Err(reason) if pos + 1 == last => {
                warn!(
                    session_id = %handle.id,
                    round = index,
                    reason = %reason,
                    "Discarding torn trailing round"
                );
                return Ok((rounds, Some(index)));
            }
            Err(reason) => return Err(corrupt(format!("round {index}: {reason}"))),
        }
    }

    Ok((rounds, None))
}

fn validate_round(content: &str, index: u32) -> Result<Round, String> {
    let round: Round = serde_json::from_str(content).map_err(|e| e.to_string())?;
    if round.index != index {
        return Err(format!("file holds round {}", round.index));
    }
    if round.architect.role != Role::Architect || round.reviewer.role != Role::Reviewer {
        return Err("turns are not in architect, reviewer order".to_string());
    }
    Ok(round)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| StoreError::StorageUnavailable {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    })?;
    write_atomic(path, json.as_bytes())
}

/// Writes to a sibling temp file, syncs it, then renames it into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp_path).map_err(unavailable(&tmp_path))?;
    file.write_all(bytes).map_err(unavailable(&tmp_path))?;
    file.sync_all().map_err(unavailable(&tmp_path))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(unavailable(path))
}
