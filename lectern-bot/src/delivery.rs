//! Chunk delivery and progress tracking.
//!
//! All functions here take the session by `&mut`, so callers hold the
//! session lock for the whole delivery, sends included.

use crate::render;
use crate::session::Session;
use crate::traits::Destination;
use lectern_common::{Error, Result};

/// Notice posted once the last chunk has gone out.
pub const ALL_DELIVERED_NOTICE: &str = "🎉 All chunks sent!";

/// Outcome of [`advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// A chunk was sent; carries the ID of its last message.
    Delivered(String),
    /// Nothing was left; the session is now marked completed.
    Exhausted,
    /// Nothing to do.
    Idle,
}

/// Send chunk `chunk_index` without moving the session's position.
///
/// Out-of-range indices are a no-op. The ballot is reset before sending;
/// `latest_message_id` then follows each segment that goes out, so a
/// partial failure leaves it on the last segment actually sent.
pub async fn deliver_at(
    destination: &dyn Destination,
    session: &mut Session,
    chunk_index: usize,
) -> Result<Option<String>> {
    let Some(text) = session.chunks().get(chunk_index) else {
        return Ok(None);
    };
    let segments = render::render_chunk(chunk_index + 1, text);

    session.reset_ballot();
    let thread_id = session.thread_id().to_string();
    let mut last_id = None;
    for segment in &segments {
        let message_id = destination.send(&thread_id, segment).await.map_err(|e| {
            tracing::warn!(thread_id = %thread_id, chunk = chunk_index + 1, error = %e, "Chunk send failed");
            Error::from(e)
        })?;
        session.record_delivery(message_id.clone());
        last_id = Some(message_id);
    }

    tracing::info!(
        thread_id = %thread_id,
        chunk = chunk_index + 1,
        total = session.len(),
        messages = segments.len(),
        "Chunk delivered"
    );
    Ok(last_id)
}

/// Deliver the next chunk and move forward.
pub async fn advance(destination: &dyn Destination, session: &mut Session) -> Result<Advance> {
    if session.is_completed() {
        return Ok(Advance::Idle);
    }

    if session.index() >= session.len() {
        session.mark_exhausted();
        destination
            .send(session.thread_id(), ALL_DELIVERED_NOTICE)
            .await?;
        return Ok(Advance::Exhausted);
    }

    let index = session.index();
    let delivered = deliver_at(destination, session, index).await?;
    session.set_index(index + 1);
    Ok(delivered.map_or(Advance::Idle, Advance::Delivered))
}

/// Advance up to `count` times, stopping at the first non-delivery.
/// Returns how many chunks were delivered.
pub async fn advance_batch(
    destination: &dyn Destination,
    session: &mut Session,
    count: usize,
) -> Result<usize> {
    let mut delivered = 0;
    for _ in 0..count {
        match advance(destination, session).await {
            Ok(Advance::Delivered(_)) => delivered += 1,
            Ok(_) => break,
            Err(e) => {
                if delivered > 0 {
                    tracing::warn!(thread_id = %session.thread_id(), delivered, "Batch stopped early");
                }
                return Err(e);
            }
        }
    }
    Ok(delivered)
}

/// Deliver chunk `number` (1-based) and continue from there.
pub async fn jump_to(
    destination: &dyn Destination,
    session: &mut Session,
    number: usize,
) -> Result<Option<String>> {
    if number == 0 || number > session.len() {
        return Err(Error::validation(format!(
            "Chunk number must be between 1 and {}.",
            session.len()
        )));
    }

    let delivered = deliver_at(destination, session, number - 1).await?;
    session.set_index(number);
    Ok(delivered)
}

/// Deliver the most recently delivered chunk again.
pub async fn resend_last(
    destination: &dyn Destination,
    session: &mut Session,
) -> Result<Option<String>> {
    match session.index() {
        0 => Ok(None),
        index => deliver_at(destination, session, index - 1).await,
    }
}
