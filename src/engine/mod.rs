mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::EngineError;
pub use mutations::{ChangeOutcome, EventUpdate, UpdateReport};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedTeamState = Arc<RwLock<TeamState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<Record>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => {
                            batch.push((record, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty: flush batch
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Record, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Record, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (record, _) in batch {
        if let Err(e) = wal.append_buffered(record) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { record, response } => {
            let mut batch = vec![(record, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// The roster engine: per-team state, the role configuration and the WAL writer.
pub struct Engine {
    pub state: DashMap<String, SharedTeamState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) roles: RoleSet,
    /// Reverse lookup: event id → team slug
    pub(super) event_to_team: DashMap<Ulid, String>,
    /// Reverse lookup: username → team slug
    pub(super) user_to_team: DashMap<String, String>,
    /// Serializes team/user catalog changes and WAL compaction.
    pub(super) catalog: Mutex<()>,
}

/// Apply a record to a team's state. The caller holds the team lock.
fn apply_to_team(
    ts: &mut TeamState,
    record: &Record,
    event_map: &DashMap<Ulid, String>,
    user_map: &DashMap<String, String>,
) {
    match record {
        Record::UserAdded { username, team } => {
            ts.members.insert(username.clone());
            user_map.insert(username.clone(), team.clone());
        }
        Record::UserRemoved { username, .. } => {
            ts.members.remove(username);
            user_map.remove(username);
        }
        Record::EventCreated { event } => {
            event_map.insert(event.id, event.team.clone());
            ts.insert_event(event.clone());
        }
        Record::EventUpdated { event } => {
            ts.remove_event(event.id);
            ts.insert_event(event.clone());
        }
        Record::EventDeleted { id, .. } => {
            ts.remove_event(*id);
            event_map.remove(id);
        }
        // TeamCreated/Deleted are handled at the DashMap level, not here
        Record::TeamCreated { .. } | Record::TeamDeleted { .. } => {}
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` (created if missing) and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, roles: RoleSet) -> io::Result<Self> {
        let records = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            roles,
            event_to_team: DashMap::new(),
            user_to_team: DashMap::new(),
            catalog: Mutex::new(()),
        };

        // We're the sole owner of these Arcs during replay, so try_write never
        // contends. blocking_write would panic inside an async context.
        for record in &records {
            match record {
                Record::TeamCreated { slug, name } => {
                    let ts = TeamState::new(slug.clone(), name.clone());
                    engine.state.insert(slug.clone(), Arc::new(RwLock::new(ts)));
                }
                Record::TeamDeleted { slug } => {
                    engine.state.remove(slug);
                }
                other => {
                    if let Some(entry) = engine.state.get(other.team()) {
                        let ts_arc = entry.clone();
                        if let Ok(mut guard) = ts_arc.try_write() {
                            apply_to_team(
                                &mut guard,
                                other,
                                &engine.event_to_team,
                                &engine.user_to_team,
                            );
                        }
                    }
                }
            }
        }

        info!(
            "roster loaded: {} records, {} teams, {} events",
            records.len(),
            engine.state.len(),
            engine.event_to_team.len()
        );
        metrics::gauge!(crate::observability::EVENTS_ACTIVE).set(engine.event_to_team.len() as f64);
        Ok(engine)
    }

    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    /// Write a record to the WAL via the background group-commit writer.
    async fn wal_append(&self, record: &Record) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                record: record.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_team(&self, slug: &str) -> Option<SharedTeamState> {
        self.state.get(slug).map(|e| e.value().clone())
    }

    pub fn get_team_for_event(&self, event_id: &Ulid) -> Option<String> {
        self.event_to_team.get(event_id).map(|e| e.value().clone())
    }

    pub fn get_team_for_user(&self, username: &str) -> Option<String> {
        self.user_to_team.get(username).map(|e| e.value().clone())
    }

    /// WAL-append + apply in one call. The caller holds the team's write lock,
    /// so the validation it just did still holds when the record lands.
    pub(super) async fn persist_and_apply(
        &self,
        ts: &mut TeamState,
        record: &Record,
    ) -> Result<(), EngineError> {
        self.wal_append(record).await?;
        apply_to_team(ts, record, &self.event_to_team, &self.user_to_team);
        Ok(())
    }

    /// Lookup event → team, get the team, acquire its write lock.
    pub(super) async fn resolve_event_write(
        &self,
        event_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<TeamState>, EngineError> {
        let slug = self
            .get_team_for_event(event_id)
            .ok_or(EngineError::EventNotFound(*event_id))?;
        let ts = self
            .get_team(&slug)
            .ok_or(EngineError::TeamNotFound(slug))?;
        Ok(ts.write_owned().await)
    }

    /// Lookup event → team, get the team, acquire its read lock.
    pub(super) async fn resolve_event_read(
        &self,
        event_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockReadGuard<TeamState>, EngineError> {
        let slug = self
            .get_team_for_event(event_id)
            .ok_or(EngineError::EventNotFound(*event_id))?;
        let ts = self
            .get_team(&slug)
            .ok_or(EngineError::TeamNotFound(slug))?;
        Ok(ts.read_owned().await)
    }
}
