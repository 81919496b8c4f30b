//! Persistent response cache with at-most-one-computation-in-flight
//! semantics.
//!
//! Entries live in a sqlite database keyed by fingerprint; sqlite gives us
//! atomic single-entry writes, so a process killed mid-write leaves no
//! partially visible record. Concurrent identical fingerprints serialize on
//! a per-fingerprint slot (a watch channel in a map guarded by its own
//! mutex), so unrelated fingerprints proceed fully in parallel. A cache
//! that cannot open degrades to pure-miss: analysis always proceeds, only
//! the performance benefit is lost.

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;

/// What a cache miss computes: the provider's raw response plus its origin.
#[derive(Debug, Clone)]
pub struct ComputedResponse {
    pub response: String,
    pub provider: String,
    pub model: String,
}

/// A stored response. Immutable after creation; expiry removes it wholesale.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub response: String,
    pub provider: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at).num_seconds() >= self.ttl_secs as i64
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: u64,
    pub capacity: usize,
    pub path: PathBuf,
}

/// Outcome shared with every waiter on an in-flight slot. Errors travel as
/// strings so one failure can be observed by all of them.
type SlotResult = std::result::Result<CacheEntry, String>;
type SlotRx = watch::Receiver<Option<SlotResult>>;

pub struct CacheStore {
    /// `None` when the database could not be opened; every operation then
    /// behaves as a miss.
    conn: Option<Mutex<Connection>>,
    path: PathBuf,
    capacity: usize,
    ttl: Duration,
    wait_timeout: Duration,
    inflight: Mutex<HashMap<String, SlotRx>>,
}

/// Removes the in-flight slot when the leader finishes or is cancelled,
/// so an abandoned computation never wedges later requests.
struct SlotGuard<'a> {
    store: &'a CacheStore,
    key: String,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.store.inflight.lock().remove(&self.key);
    }
}

impl CacheStore {
    /// Open (or create) the cache under `dir`. Never fails: an unusable
    /// database is logged and the store runs in pure-miss mode.
    pub fn open(dir: &Path, capacity: usize, ttl: Duration, wait_timeout: Duration) -> Self {
        let path = dir.join("responses.db");
        let conn = Self::open_db(dir, &path)
            .map_err(|e| {
                tracing::warn!(path = %path.display(), "cache unavailable, degrading to pure-miss: {e}");
                e
            })
            .ok()
            .map(Mutex::new);

        Self {
            conn,
            path,
            capacity: capacity.max(1),
            ttl,
            wait_timeout,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    fn open_db(dir: &Path, path: &Path) -> anyhow::Result<Connection> {
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;
             PRAGMA temp_store   = MEMORY;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                fingerprint TEXT PRIMARY KEY,
                response    TEXT NOT NULL,
                provider    TEXT NOT NULL,
                model       TEXT NOT NULL DEFAULT '',
                created_at  TEXT NOT NULL,
                last_used   TEXT NOT NULL,
                ttl_secs    INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_entries_last_used ON entries(last_used);",
        )?;
        Ok(conn)
    }

    /// Look up a fingerprint. Expired or unreadable rows are removed and
    /// reported absent; a hit refreshes the LRU timestamp.
    pub fn lookup(&self, fp: &Fingerprint) -> Option<CacheEntry> {
        let conn = self.conn.as_ref()?.lock();

        let row = conn
            .query_row(
                "SELECT response, provider, model, created_at, ttl_secs
                 FROM entries WHERE fingerprint = ?1",
                params![fp.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional();

        let (response, provider, model, created_raw, ttl_secs) = match row {
            Ok(Some(r)) => r,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(fingerprint = fp.as_str(), "cache read failed, treating as miss: {e}");
                return None;
            }
        };

        // A row we cannot parse is a partial/corrupt record: drop it and
        // report a miss rather than failing the request.
        let created_at = match DateTime::parse_from_rfc3339(&created_raw) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(_) => {
                let _ = conn.execute(
                    "DELETE FROM entries WHERE fingerprint = ?1",
                    params![fp.as_str()],
                );
                return None;
            }
        };

        let entry = CacheEntry {
            fingerprint: fp.as_str().to_string(),
            response,
            provider,
            model,
            created_at,
            ttl_secs: ttl_secs.max(0) as u64,
        };

        if entry.is_expired(Utc::now()) {
            let _ = conn.execute(
                "DELETE FROM entries WHERE fingerprint = ?1",
                params![fp.as_str()],
            );
            return None;
        }

        let _ = conn.execute(
            "UPDATE entries SET last_used = ?1 WHERE fingerprint = ?2",
            params![now_stamp(), fp.as_str()],
        );
        Some(entry)
    }

    /// Insert an entry, then enforce the LRU capacity bound. Failures are
    /// logged, never propagated: a broken cache only costs recomputation.
    fn store(&self, entry: &CacheEntry) {
        let Some(conn) = self.conn.as_ref() else {
            return;
        };
        let conn = conn.lock();

        let result = conn.execute(
            "INSERT OR REPLACE INTO entries
                (fingerprint, response, provider, model, created_at, last_used, ttl_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.fingerprint,
                entry.response,
                entry.provider,
                entry.model,
                entry.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                now_stamp(),
                entry.ttl_secs as i64,
            ],
        );
        if let Err(e) = result {
            tracing::warn!("cache write failed: {e}");
            return;
        }

        // LRU beyond capacity: drop the least recently used excess.
        let prune = conn.execute(
            "DELETE FROM entries WHERE fingerprint IN (
                SELECT fingerprint FROM entries ORDER BY last_used ASC
                LIMIT max(0, (SELECT COUNT(*) FROM entries) - ?1)
             )",
            params![self.capacity as i64],
        );
        if let Err(e) = prune {
            tracing::warn!("cache LRU prune failed: {e}");
        }
    }

    /// Return the cached entry for `fp`, or run `compute` to produce it,
    /// collapsing concurrent identical requests into one computation.
    ///
    /// The first caller for a fingerprint becomes the leader and runs
    /// `compute`; everyone else awaits the leader's result. A failing
    /// computation is observed by all waiters with the same message, and
    /// the slot is released so a later request can retry.
    pub async fn get_or_compute<F>(&self, fp: &Fingerprint, compute: F) -> Result<CacheEntry>
    where
        F: Future<Output = Result<ComputedResponse>>,
    {
        if let Some(entry) = self.lookup(fp) {
            tracing::debug!(fingerprint = fp.as_str(), "cache hit");
            return Ok(entry);
        }

        let key = fp.as_str().to_string();
        // The map lock must be fully released before any await so the
        // returned future stays Send and spawnable.
        let claimed: std::result::Result<watch::Sender<Option<SlotResult>>, SlotRx> = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&key) {
                Some(rx) => Err(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.clone(), rx);
                    Ok(tx)
                }
            }
        };
        let leader_tx = match claimed {
            Ok(tx) => tx,
            Err(rx) => return self.await_slot(rx).await,
        };

        let guard = SlotGuard { store: self, key };

        // Another request may have completed and stored while we raced for
        // the slot; identical inputs must never recompute.
        if let Some(entry) = self.lookup(fp) {
            let _ = leader_tx.send(Some(Ok(entry.clone())));
            drop(guard);
            return Ok(entry);
        }

        let outcome = compute.await;
        let result = match outcome {
            Ok(computed) => {
                let entry = CacheEntry {
                    fingerprint: fp.as_str().to_string(),
                    response: computed.response,
                    provider: computed.provider,
                    model: computed.model,
                    created_at: Utc::now(),
                    ttl_secs: self.ttl.as_secs(),
                };
                self.store(&entry);
                Ok(entry)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(entry) => {
                let _ = leader_tx.send(Some(Ok(entry.clone())));
                drop(guard);
                Ok(entry)
            }
            Err(e) => {
                let _ = leader_tx.send(Some(Err(e.to_string())));
                drop(guard);
                Err(e)
            }
        }
    }

    /// Wait (bounded) for the leader's result on an in-flight slot.
    async fn await_slot(&self, mut rx: SlotRx) -> Result<CacheEntry> {
        let waited = tokio::time::timeout(self.wait_timeout, async {
            loop {
                if let Some(result) = rx.borrow_and_update().clone() {
                    return Some(result);
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        })
        .await;

        match waited {
            Err(_) => Err(Error::CacheWaitTimeout),
            Ok(None) => Err(Error::Compute(
                "in-flight computation was abandoned".to_string(),
            )),
            Ok(Some(Ok(entry))) => Ok(entry),
            Ok(Some(Err(msg))) => Err(Error::Compute(msg)),
        }
    }

    /// Remove a single entry.
    pub fn invalidate(&self, fp: &Fingerprint) {
        if let Some(conn) = self.conn.as_ref() {
            let _ = conn.lock().execute(
                "DELETE FROM entries WHERE fingerprint = ?1",
                params![fp.as_str()],
            );
        }
    }

    /// Garbage-collect entries created more than `age` ago.
    pub fn evict_older_than(&self, age: Duration) {
        let Some(conn) = self.conn.as_ref() else {
            return;
        };
        let cutoff = Utc::now() - chrono::Duration::seconds(age.as_secs() as i64);
        let removed = conn.lock().execute(
            "DELETE FROM entries WHERE created_at < ?1",
            params![cutoff.to_rfc3339_opts(SecondsFormat::Micros, true)],
        );
        match removed {
            Ok(n) if n > 0 => tracing::debug!(removed = n, "evicted aged cache entries"),
            Ok(_) => {}
            Err(e) => tracing::warn!("cache eviction failed: {e}"),
        }
    }

    /// Drop every entry.
    pub fn clear(&self) -> Result<u64> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(0);
        };
        let removed = conn
            .lock()
            .execute("DELETE FROM entries", [])
            .map_err(|e| Error::Compute(format!("cache clear failed: {e}")))?;
        Ok(removed as u64)
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .conn
            .as_ref()
            .and_then(|c| {
                c.lock()
                    .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get::<_, i64>(0))
                    .ok()
            })
            .unwrap_or(0);
        CacheStats {
            entries: entries.max(0) as u64,
            capacity: self.capacity,
            path: self.path.clone(),
        }
    }

    /// Whether the backing database opened successfully.
    pub fn is_persistent(&self) -> bool {
        self.conn.is_some()
    }
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
