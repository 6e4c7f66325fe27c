use std::cmp::Reverse;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::model::*;
use crate::wal::Wal;

pub type SharedBooking = Arc<RwLock<Booking>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("booking {0} already stored")]
    Duplicate(BookingId),
    #[error("booking {0} missing from store")]
    Missing(BookingId),
    /// Compare-and-set lost: the record is no longer in the expected state.
    #[error("booking {id} is {actual}, expected {expected}")]
    StatusMismatch {
        id: BookingId,
        expected: BookingStatus,
        actual: BookingStatus,
    },
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A status change to apply to a stored booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: BookingStatus,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Keyed collection of booking records.
///
/// `update` is a compare-and-set on the status so two racing transitions of one
/// booking cannot both win.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: &Booking) -> Result<(), StoreError>;

    async fn get(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    async fn update(
        &self,
        id: BookingId,
        expected: BookingStatus,
        change: StatusUpdate,
    ) -> Result<Booking, StoreError>;

    /// Matching bookings newest first, skipping `offset`, at most `limit`, plus the total
    /// number of matches.
    async fn list(
        &self,
        filter: &BookingFilter,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Booking>, usize), StoreError>;

    /// Every booking that still holds an interval. Used to rebuild the availability index.
    async fn active(&self) -> Result<Vec<Booking>, StoreError>;
}

fn apply_status(b: &mut Booking, change: StatusUpdate) {
    b.status = change.status;
    if change.reason.is_some() {
        b.cancellation_reason = change.reason;
    }
    b.updated_at = change.at;
}

fn check_expected(b: &Booking, expected: BookingStatus) -> Result<(), StoreError> {
    if b.status != expected {
        return Err(StoreError::StatusMismatch {
            id: b.id,
            expected,
            actual: b.status,
        });
    }
    Ok(())
}

/// Bookings held in memory, each behind its own lock.
pub struct InMemoryStore {
    records: DashMap<BookingId, SharedBooking>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn record(&self, id: BookingId) -> Option<SharedBooking> {
        self.records.get(&id).map(|e| e.value().clone())
    }

    fn put(&self, booking: Booking) -> Result<(), StoreError> {
        match self.records.entry(booking.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Duplicate(booking.id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(booking)));
                Ok(())
            }
        }
    }

    /// Clone of every record. Snapshots the Arcs first so no map shard stays locked
    /// across an await.
    async fn snapshot(&self) -> Vec<Booking> {
        let records: Vec<SharedBooking> = self.records.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(records.len());
        for rec in records {
            out.push(rec.read().await.clone());
        }
        out
    }

    /// Replay one WAL event into memory.
    fn apply_event(&self, event: Event) {
        match event {
            Event::BookingCreated { booking } => {
                self.records.insert(booking.id, Arc::new(RwLock::new(booking)));
            }
            Event::StatusChanged { id, status, reason, at } => {
                if let Some(rec) = self.record(id) {
                    // Replay runs before anyone else holds the record.
                    if let Ok(mut guard) = rec.try_write() {
                        apply_status(&mut guard, StatusUpdate { status, reason, at });
                    }
                } else {
                    tracing::warn!("WAL status change for unknown booking {id}");
                }
            }
        }
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn insert(&self, booking: &Booking) -> Result<(), StoreError> {
        self.put(booking.clone())
    }

    async fn get(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        match self.record(id) {
            Some(rec) => Ok(Some(rec.read().await.clone())),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        id: BookingId,
        expected: BookingStatus,
        change: StatusUpdate,
    ) -> Result<Booking, StoreError> {
        let rec = self.record(id).ok_or(StoreError::Missing(id))?;
        let mut guard = rec.write().await;
        check_expected(&guard, expected)?;
        apply_status(&mut guard, change);
        Ok(guard.clone())
    }

    async fn list(
        &self,
        filter: &BookingFilter,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Booking>, usize), StoreError> {
        let mut matching: Vec<Booking> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|b| filter.matches(b))
            .collect();
        matching.sort_by_key(|b| Reverse((b.created_at, b.id)));
        let total = matching.len();
        let page = matching.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn active(&self) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .snapshot()
            .await
            .into_iter()
            .filter(|b| b.status.holds_interval())
            .collect())
    }
}

// ── WAL-backed store ─────────────────────────────────────

pub(crate) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL and group-commits appends: wait for one, drain whatever else is
/// already queued, then a single fsync for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut pending: Option<WalCommand> = None;
    loop {
        let cmd = match pending.take() {
            Some(cmd) => cmd,
            None => match rx.recv().await {
                Some(cmd) => cmd,
                None => break,
            },
        };
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, response } => batch.push((event, response)),
                        other => {
                            // Flush what we have before a compact or a counter read.
                            pending = Some(other);
                            break;
                        }
                    }
                }
                commit_batch(&mut wal, batch);
            }
            WalCommand::Compact { events, response } => {
                let result = Wal::write_compact_file(wal.path(), &events)
                    .and_then(|()| wal.swap_compact_file());
                let _ = response.send(result);
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(wal.appends_since_compact());
            }
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after an append error so half-buffered bytes don't ride along
    // with the next batch.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// [`InMemoryStore`] whose writes go through a write-ahead log first.
pub struct WalStore {
    memory: InMemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Writers share it; compaction takes it exclusively so no append lands between the
    /// snapshot and the file swap.
    gate: RwLock<()>,
}

impl WalStore {
    /// Replay the log at `path` and start the writer task. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let replayed = events.len();
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let memory = InMemoryStore::new();
        for event in events {
            memory.apply_event(event);
        }
        tracing::info!(
            "replayed {replayed} events from {}, {} bookings",
            path.display(),
            memory.len()
        );
        Ok(Self {
            memory,
            wal_tx,
            gate: RwLock::new(()),
        })
    }

    async fn wal_append(&self, event: Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Rewrite the log as one `BookingCreated` per booking in its current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _exclusive = self.gate.write().await;
        let mut bookings = self.memory.snapshot().await;
        bookings.sort_by_key(|b| (b.created_at, b.id));
        let events = bookings
            .into_iter()
            .map(|booking| Event::BookingCreated { booking })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }
}

#[async_trait]
impl BookingStore for WalStore {
    async fn insert(&self, booking: &Booking) -> Result<(), StoreError> {
        if self.memory.record(booking.id).is_some() {
            return Err(StoreError::Duplicate(booking.id));
        }
        let _shared = self.gate.read().await;
        self.wal_append(Event::BookingCreated {
            booking: booking.clone(),
        })
        .await?;
        self.memory.put(booking.clone())
    }

    async fn get(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        self.memory.get(id).await
    }

    async fn update(
        &self,
        id: BookingId,
        expected: BookingStatus,
        change: StatusUpdate,
    ) -> Result<Booking, StoreError> {
        let _shared = self.gate.read().await;
        let rec = self.memory.record(id).ok_or(StoreError::Missing(id))?;
        // Record lock held across the append so concurrent transitions are ordered
        // the same way in memory and on disk.
        let mut guard = rec.write().await;
        check_expected(&guard, expected)?;
        self.wal_append(Event::StatusChanged {
            id,
            status: change.status,
            reason: change.reason.clone(),
            at: change.at,
        })
        .await?;
        apply_status(&mut guard, change);
        Ok(guard.clone())
    }

    async fn list(
        &self,
        filter: &BookingFilter,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Booking>, usize), StoreError> {
        self.memory.list(filter, offset, limit).await
    }

    async fn active(&self) -> Result<Vec<Booking>, StoreError> {
        self.memory.active().await
    }
}
