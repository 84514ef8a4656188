//! Per-thread reading sessions and the registry that owns them.
//!
//! Every mutation of a [`Session`] happens under its entry's async mutex,
//! which is held across sends so the recorded message ID always matches
//! what was actually delivered. The registry itself is a [`DashMap`];
//! handles are cloned out before any await so shard locks are never held
//! across a suspension point.

use crate::chunk;
use crate::schedule::PostTime;
use chrono::NaiveDate;
use dashmap::DashMap;
use lectern_common::config::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use lectern_common::{Error, Result};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

/// Reading state for one thread.
#[derive(Debug, Clone)]
pub struct Session {
    thread_id: String,
    chunks: Vec<String>,
    index: usize,
    chunk_size: usize,
    completed: bool,
    /// Whether scheduled delivery is armed
    pub auto_active: bool,
    /// Daily delivery time
    pub auto_post_time: Option<PostTime>,
    /// Calendar date of the last scheduled fire
    pub last_auto_post_date: Option<NaiveDate>,
    latest_message_id: Option<String>,
    joined_users: HashSet<String>,
    latest_reactors: HashSet<String>,
}

impl Session {
    /// Build a session from segmented paragraphs.
    pub fn new<S: AsRef<str>>(
        thread_id: impl Into<String>,
        paragraphs: &[S],
        chunk_size: usize,
    ) -> Self {
        let chunk_size = chunk::clamp_chunk_size(chunk_size);
        let chunks = chunk::build(paragraphs, chunk_size);
        let completed = chunks.is_empty();
        Self {
            thread_id: thread_id.into(),
            chunks,
            index: 0,
            chunk_size,
            completed,
            auto_active: false,
            auto_post_time: None,
            last_auto_post_date: None,
            latest_message_id: None,
            joined_users: HashSet::new(),
            latest_reactors: HashSet::new(),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Next chunk to deliver (0-based).
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn latest_message_id(&self) -> Option<&str> {
        self.latest_message_id.as_deref()
    }

    pub fn joined_users(&self) -> &HashSet<String> {
        &self.joined_users
    }

    pub fn latest_reactors(&self) -> &HashSet<String> {
        &self.latest_reactors
    }

    /// Rebuild the chunks with a new size.
    ///
    /// The position maps to the chunk holding the first undelivered
    /// paragraph, so a partly covered chunk is delivered again. A fully
    /// delivered text stays finished.
    pub fn rechunk(&mut self, new_size: usize) -> Result<()> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&new_size) {
            return Err(Error::validation(format!(
                "Chunk size must be between {MIN_CHUNK_SIZE} and {MAX_CHUNK_SIZE}."
            )));
        }

        let delivered = chunk::paragraphs_before(&self.chunks, self.index);
        let total = chunk::paragraphs_before(&self.chunks, self.chunks.len());
        self.chunks = chunk::rebuild(&self.chunks, new_size);
        self.chunk_size = new_size;
        self.index = if delivered >= total {
            self.chunks.len()
        } else {
            delivered / new_size
        };
        self.latest_reactors.clear();
        self.refresh_completed();
        Ok(())
    }

    /// Add a participant to the consensus group.
    ///
    /// A newly joined member does not count toward the ballot in progress.
    pub fn join(&mut self, actor_id: &str) -> bool {
        self.latest_reactors.remove(actor_id);
        self.joined_users.insert(actor_id.to_string())
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index.min(self.chunks.len());
        self.refresh_completed();
    }

    pub(crate) fn refresh_completed(&mut self) {
        self.completed = self.index >= self.chunks.len();
    }

    pub(crate) fn mark_exhausted(&mut self) {
        self.completed = true;
        self.latest_message_id = None;
        self.latest_reactors.clear();
    }

    /// Open a new ballot: no latest message, nobody has acknowledged.
    pub(crate) fn reset_ballot(&mut self) {
        self.latest_message_id = None;
        self.latest_reactors.clear();
    }

    pub(crate) fn record_delivery(&mut self, message_id: String) {
        self.latest_message_id = Some(message_id);
    }

    pub(crate) fn record_reactor(&mut self, actor_id: &str) {
        self.latest_reactors.insert(actor_id.to_string());
    }

    #[cfg(test)]
    pub(crate) fn force_incomplete(&mut self) {
        self.completed = false;
    }

    /// Every joined participant has acknowledged the latest message.
    pub fn has_consensus(&self) -> bool {
        !self.joined_users.is_empty() && self.joined_users.is_subset(&self.latest_reactors)
    }
}

/// A session plus the thread metadata that never changes after load.
#[derive(Debug)]
pub struct SessionEntry {
    pub thread_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    state: Arc<Mutex<Session>>,
}

impl SessionEntry {
    pub fn new(session: Session, parent_id: Option<String>, name: impl Into<String>) -> Self {
        Self {
            thread_id: session.thread_id().to_string(),
            parent_id,
            name: name.into(),
            state: Arc::new(Mutex::new(session)),
        }
    }

    /// Take exclusive access to the session.
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.state.lock().await
    }

    /// Like [`lock`](Self::lock), but the guard can move into a spawned task.
    pub async fn lock_owned(&self) -> OwnedMutexGuard<Session> {
        Arc::clone(&self.state).lock_owned().await
    }

    /// Exclusive access if nothing else holds the session right now.
    pub fn try_lock_owned(&self) -> Option<OwnedMutexGuard<Session>> {
        Arc::clone(&self.state).try_lock_owned().ok()
    }
}

type PendingNames = std::sync::Mutex<HashSet<(Option<String>, String)>>;

/// A thread name held for a load that has not registered its session yet.
///
/// Released on drop.
#[derive(Debug)]
pub struct NameReservation {
    pending: Arc<PendingNames>,
    key: (Option<String>, String),
}

impl NameReservation {
    pub fn name(&self) -> &str {
        &self.key.1
    }
}

impl Drop for NameReservation {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Concurrent registry of sessions keyed by thread ID.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, Arc<SessionEntry>>>,
    pending_names: Arc<PendingNames>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, replacing any previous one for the same thread.
    pub fn insert(&self, entry: SessionEntry) -> Arc<SessionEntry> {
        let entry = Arc::new(entry);
        if self
            .sessions
            .insert(entry.thread_id.clone(), Arc::clone(&entry))
            .is_some()
        {
            tracing::info!(thread_id = %entry.thread_id, "Replaced existing reading session");
        }
        entry
    }

    pub fn get(&self, thread_id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions
            .get(thread_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Look up a session or report that none is loaded.
    pub fn require(&self, thread_id: &str) -> Result<Arc<SessionEntry>> {
        self.get(thread_id)
            .ok_or_else(|| Error::not_found("No text loaded in this thread."))
    }

    /// Handles to every session, detached from the map's locks.
    pub fn snapshot(&self) -> Vec<Arc<SessionEntry>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// `title`, or `title (n)` with the smallest `n` not already used
    /// by a session or a pending load under the same parent.
    pub fn unique_name(&self, parent_id: Option<&str>, title: &str) -> String {
        let pending = self
            .pending_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.free_name(&pending, parent_id, title)
    }

    /// Pick a unique name and hold it until the returned reservation drops.
    ///
    /// Keep the reservation alive until the session is inserted so that
    /// concurrent loads under one parent never pick the same name.
    pub fn reserve_name(&self, parent_id: Option<&str>, title: &str) -> NameReservation {
        let mut pending = self
            .pending_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let name = self.free_name(&pending, parent_id, title);
        let key = (parent_id.map(str::to_string), name);
        pending.insert(key.clone());
        NameReservation {
            pending: Arc::clone(&self.pending_names),
            key,
        }
    }

    fn free_name(
        &self,
        pending: &HashSet<(Option<String>, String)>,
        parent_id: Option<&str>,
        title: &str,
    ) -> String {
        let mut taken: HashSet<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.parent_id.as_deref() == parent_id)
            .map(|entry| entry.name.clone())
            .collect();
        taken.extend(
            pending
                .iter()
                .filter(|(parent, _)| parent.as_deref() == parent_id)
                .map(|(_, name)| name.clone()),
        );

        let mut name = title.to_string();
        let mut counter = 1;
        while taken.contains(&name) {
            name = format!("{title} ({counter})");
            counter += 1;
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraphs(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("Paragraph number {i}.")).collect()
    }

    #[test]
    fn new_session_starts_at_zero() {
        let session = Session::new("t1", &paragraphs(7), 3);
        assert_eq!(session.len(), 3);
        assert_eq!(session.index(), 0);
        assert_eq!(session.chunk_size(), 3);
        assert!(!session.is_completed());
        assert!(!session.auto_active);
        assert!(session.latest_message_id().is_none());
    }

    #[test]
    fn set_index_recomputes_completed() {
        let mut session = Session::new("t1", &paragraphs(7), 3);
        session.set_index(3);
        assert!(session.is_completed());
        session.set_index(1);
        assert!(!session.is_completed());
        session.set_index(99);
        assert_eq!(session.index(), 3);
    }

    #[test]
    fn rechunk_preserves_position() {
        let mut session = Session::new("t1", &paragraphs(12), 2);
        // 3 chunks of 2 delivered = 6 paragraphs
        session.set_index(3);
        session.rechunk(4).unwrap();
        assert_eq!(session.len(), 3);
        assert_eq!(session.index(), 1);
        assert_eq!(session.chunk_size(), 4);

        // 4 paragraphs delivered, size 3 lands inside chunk 1 which is resent
        session.rechunk(3).unwrap();
        assert_eq!(session.index(), 1);
        assert!(!session.is_completed());
    }

    #[test]
    fn rechunk_when_finished_stays_finished() {
        let mut session = Session::new("t1", &paragraphs(7), 3);
        session.set_index(3);
        session.rechunk(1).unwrap();
        assert_eq!(session.len(), 7);
        assert_eq!(session.index(), 7);
        assert!(session.is_completed());
    }

    #[test]
    fn rechunk_finished_text_with_short_tail_stays_finished() {
        // 7 paragraphs at size 2 end in a one-paragraph chunk
        let mut session = Session::new("t1", &paragraphs(7), 2);
        session.set_index(session.len());
        assert!(session.is_completed());

        session.rechunk(3).unwrap();
        assert_eq!(session.len(), 3);
        assert_eq!(session.index(), 3);
        assert!(session.is_completed());
    }

    #[test]
    fn rechunk_rejects_out_of_range() {
        let mut session = Session::new("t1", &paragraphs(7), 3);
        assert!(session.rechunk(0).is_err());
        assert!(session.rechunk(51).is_err());
        assert_eq!(session.chunk_size(), 3);
        assert_eq!(session.len(), 3);
    }

    #[test]
    fn join_is_idempotent_and_resets_own_vote() {
        let mut session = Session::new("t1", &paragraphs(3), 1);
        session.record_reactor("a");
        assert!(session.join("a"));
        assert!(!session.join("a"));
        assert_eq!(session.joined_users().len(), 1);
        assert!(session.latest_reactors().is_empty());
    }

    #[test]
    fn consensus_requires_everyone() {
        let mut session = Session::new("t1", &paragraphs(3), 1);
        assert!(!session.has_consensus());
        session.join("a");
        session.join("b");
        session.record_reactor("a");
        assert!(!session.has_consensus());
        session.record_reactor("b");
        assert!(session.has_consensus());
    }

    #[tokio::test]
    async fn store_insert_get_snapshot() {
        let store = SessionStore::new();
        assert!(store.is_empty());
        store.insert(SessionEntry::new(
            Session::new("t1", &paragraphs(3), 1),
            Some("parent".into()),
            "Dune",
        ));
        assert_eq!(store.len(), 1);
        assert!(store.get("t2").is_none());
        assert!(matches!(store.require("t2"), Err(Error::NotFound(_))));

        let entry = store.require("t1").unwrap();
        assert_eq!(entry.lock().await.len(), 3);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn unique_names_per_parent() {
        let store = SessionStore::new();
        assert_eq!(store.unique_name(Some("p"), "Dune"), "Dune");
        store.insert(SessionEntry::new(
            Session::new("t1", &paragraphs(1), 1),
            Some("p".into()),
            "Dune",
        ));
        assert_eq!(store.unique_name(Some("p"), "Dune"), "Dune (1)");
        store.insert(SessionEntry::new(
            Session::new("t2", &paragraphs(1), 1),
            Some("p".into()),
            "Dune (1)",
        ));
        assert_eq!(store.unique_name(Some("p"), "Dune"), "Dune (2)");
        assert_eq!(store.unique_name(Some("other"), "Dune"), "Dune");
    }

    #[test]
    fn reserved_names_are_skipped_until_released() {
        let store = SessionStore::new();
        let first = store.reserve_name(Some("p"), "Dune");
        let second = store.reserve_name(Some("p"), "Dune");
        assert_eq!(first.name(), "Dune");
        assert_eq!(second.name(), "Dune (1)");
        assert_eq!(store.unique_name(Some("p"), "Dune"), "Dune (2)");
        assert_eq!(store.reserve_name(None, "Dune").name(), "Dune");

        drop(first);
        assert_eq!(store.unique_name(Some("p"), "Dune"), "Dune");
    }
}
