//! Reaction consensus: advance once every joined reader has acknowledged.
//!
//! Each delivery opens a new ballot on its last message. A reaction counts
//! only when it targets that message and comes from a joined reader. When
//! the joined set is covered, a full `chunk_size` batch goes out at once,
//! which also clears the ballot.

use crate::delivery;
use crate::message::ReactionEvent;
use crate::session::{Session, SessionStore};
use crate::traits::Destination;
use lectern_common::Result;
use std::sync::Arc;

/// Why a reaction was not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    /// The bot's own reaction
    OwnActor,
    /// No session in that channel
    NoSession,
    /// Every chunk has been delivered
    Completed,
    /// Not the latest delivered message
    StaleMessage,
    /// Reactor has not joined
    NotJoined,
}

/// What a reaction did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgment {
    Ignored(Ignored),
    /// Counted; this many joined readers are still outstanding.
    Counted { remaining: usize },
    /// Consensus reached; this many chunks were delivered.
    Advanced { delivered: usize },
}

/// Apply one acknowledgment to a locked session.
pub async fn acknowledge(
    destination: &dyn Destination,
    session: &mut Session,
    actor_id: &str,
    message_id: &str,
) -> Result<Acknowledgment> {
    if session.is_completed() {
        return Ok(Acknowledgment::Ignored(Ignored::Completed));
    }
    if session.latest_message_id() != Some(message_id) {
        return Ok(Acknowledgment::Ignored(Ignored::StaleMessage));
    }
    if !session.joined_users().contains(actor_id) {
        return Ok(Acknowledgment::Ignored(Ignored::NotJoined));
    }

    session.record_reactor(actor_id);
    if !session.has_consensus() {
        let remaining = session
            .joined_users()
            .difference(session.latest_reactors())
            .count();
        return Ok(Acknowledgment::Counted { remaining });
    }

    let batch = session.chunk_size();
    let delivered = delivery::advance_batch(destination, session, batch).await?;
    Ok(Acknowledgment::Advanced { delivered })
}

/// Routes reaction events to their sessions.
#[derive(Clone)]
pub struct ConsensusGate {
    store: SessionStore,
    destination: Arc<dyn Destination>,
    self_id: Option<String>,
}

impl ConsensusGate {
    pub fn new(store: SessionStore, destination: Arc<dyn Destination>) -> Self {
        Self {
            store,
            destination,
            self_id: None,
        }
    }

    /// Ignore reactions from this actor (the bot itself).
    pub fn with_self_id(mut self, self_id: impl Into<String>) -> Self {
        self.self_id = Some(self_id.into());
        self
    }

    /// Handle a reaction. Delivery failures are logged and returned; the
    /// ballot has already been consumed by then.
    pub async fn on_reaction(&self, event: &ReactionEvent) -> Result<Acknowledgment> {
        if self.self_id.as_deref() == Some(event.actor_id.as_str()) {
            return Ok(Acknowledgment::Ignored(Ignored::OwnActor));
        }
        let Some(entry) = self.store.get(&event.channel_id) else {
            return Ok(Acknowledgment::Ignored(Ignored::NoSession));
        };

        let mut session = entry.lock().await;
        let outcome = acknowledge(
            self.destination.as_ref(),
            &mut session,
            &event.actor_id,
            &event.message_id,
        )
        .await;

        match &outcome {
            Ok(Acknowledgment::Advanced { delivered }) => tracing::info!(
                thread_id = %entry.thread_id,
                delivered,
                "All readers acknowledged; advanced"
            ),
            Ok(Acknowledgment::Counted { remaining }) => tracing::debug!(
                thread_id = %entry.thread_id,
                actor_id = %event.actor_id,
                remaining,
                "Acknowledgment counted"
            ),
            Ok(Acknowledgment::Ignored(reason)) => tracing::trace!(
                thread_id = %entry.thread_id,
                actor_id = %event.actor_id,
                ?reason,
                "Reaction ignored"
            ),
            Err(e) => {
                tracing::warn!(thread_id = %entry.thread_id, error = %e, "Consensus delivery failed");
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionEntry;
    use crate::traits::{ChannelError, ChannelResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Offline;

    #[async_trait]
    impl Destination for Offline {
        async fn send(&self, _thread_id: &str, _text: &str) -> ChannelResult<String> {
            Err(ChannelError::SendFailed("offline".into()))
        }
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl Destination for Counter {
        async fn send(&self, _thread_id: &str, _text: &str) -> ChannelResult<String> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("m{n}"))
        }
    }

    async fn delivered_session(dest: &Counter, chunks: usize, size: usize) -> Session {
        let paragraphs: Vec<String> = (1..=chunks * size)
            .map(|i| format!("Paragraph number {i}."))
            .collect();
        let mut session = Session::new("t1", &paragraphs, size);
        delivery::advance(dest, &mut session).await.unwrap();
        session
    }

    #[tokio::test]
    async fn two_readers_then_batch() {
        let dest = Counter::default();
        let mut s = delivered_session(&dest, 5, 2).await;
        s.join("a");
        s.join("b");
        let latest = s.latest_message_id().unwrap().to_string();

        let ack = acknowledge(&dest, &mut s, "a", &latest).await.unwrap();
        assert_eq!(ack, Acknowledgment::Counted { remaining: 1 });
        assert_eq!(s.index(), 1);

        let ack = acknowledge(&dest, &mut s, "b", &latest).await.unwrap();
        assert_eq!(ack, Acknowledgment::Advanced { delivered: 2 });
        assert_eq!(s.index(), 3);
        assert!(s.latest_reactors().is_empty());
        assert_ne!(s.latest_message_id(), Some(latest.as_str()));
    }

    #[tokio::test]
    async fn stale_and_outsider_reactions_are_ignored() {
        let dest = Counter::default();
        let mut s = delivered_session(&dest, 3, 1).await;
        s.join("a");

        let ack = acknowledge(&dest, &mut s, "a", "old").await.unwrap();
        assert_eq!(ack, Acknowledgment::Ignored(Ignored::StaleMessage));

        let latest = s.latest_message_id().unwrap().to_string();
        let ack = acknowledge(&dest, &mut s, "stranger", &latest).await.unwrap();
        assert_eq!(ack, Acknowledgment::Ignored(Ignored::NotJoined));
        assert!(s.latest_reactors().is_empty());
        assert_eq!(s.index(), 1);
    }

    #[tokio::test]
    async fn no_joined_readers_never_triggers() {
        let dest = Counter::default();
        let mut s = delivered_session(&dest, 3, 1).await;
        let latest = s.latest_message_id().unwrap().to_string();
        let ack = acknowledge(&dest, &mut s, "a", &latest).await.unwrap();
        assert_eq!(ack, Acknowledgment::Ignored(Ignored::NotJoined));
        assert_eq!(s.index(), 1);
    }

    #[tokio::test]
    async fn completed_session_ignores_reactions() {
        let dest = Counter::default();
        let mut s = delivered_session(&dest, 1, 1).await;
        s.join("a");
        let latest = s.latest_message_id().unwrap().to_string();
        assert!(s.is_completed());
        let ack = acknowledge(&dest, &mut s, "a", &latest).await.unwrap();
        assert_eq!(ack, Acknowledgment::Ignored(Ignored::Completed));
    }

    #[tokio::test]
    async fn late_joiner_must_vote_again() {
        let dest = Counter::default();
        let mut s = delivered_session(&dest, 4, 1).await;
        s.join("a");
        let latest = s.latest_message_id().unwrap().to_string();

        acknowledge(&dest, &mut s, "a", &latest).await.unwrap();
        // "a" alone was the whole group, so that already advanced.
        assert_eq!(s.index(), 2);

        let latest = s.latest_message_id().unwrap().to_string();
        s.join("b");
        s.join("a"); // rejoining wipes a's vote on the new ballot
        let ack = acknowledge(&dest, &mut s, "b", &latest).await.unwrap();
        assert_eq!(ack, Acknowledgment::Counted { remaining: 1 });
    }

    #[tokio::test]
    async fn gate_reports_delivery_failure_and_consumes_ballot() {
        let dest = Counter::default();
        let mut s = delivered_session(&dest, 3, 1).await;
        s.join("a");
        let latest = s.latest_message_id().unwrap().to_string();

        let store = SessionStore::new();
        let entry = store.insert(SessionEntry::new(s, None, "Dune"));
        let gate = ConsensusGate::new(store, Arc::new(Offline)).with_self_id("bot");

        let own = gate.on_reaction(&ReactionEvent::new("bot", latest.clone(), "t1")).await;
        assert_eq!(own.unwrap(), Acknowledgment::Ignored(Ignored::OwnActor));
        let missing = gate.on_reaction(&ReactionEvent::new("a", latest.clone(), "t9")).await;
        assert_eq!(missing.unwrap(), Acknowledgment::Ignored(Ignored::NoSession));

        let err = gate
            .on_reaction(&ReactionEvent::new("a", latest.clone(), "t1"))
            .await
            .unwrap_err();
        assert!(err.is_transport());

        let session = entry.lock().await;
        assert_eq!(session.index(), 1);
        assert!(session.latest_message_id().is_none());
        assert!(session.latest_reactors().is_empty());
    }
}
