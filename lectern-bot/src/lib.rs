//! Lectern - paces a long text into a Discord thread, chunk by chunk.
//!
//! ## Architecture
//!
//! ```text
//! raw text → segment → chunk → Session ─┬─ more / jump / resend (commands)
//!                                        ├─ Scheduler tick (daily time)
//!                                        └─ ConsensusGate (reactions)
//!                                                 ↓
//!                                      delivery → render → Destination
//! ```
//!
//! The reading core only talks to the platform through the
//! [`Destination`] and [`ThreadOpener`] traits; [`DiscordChannel`]
//! implements both.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod chunk;
pub mod commands;
pub mod consensus;
pub mod delivery;
pub mod discord;
pub mod librarian;
pub mod message;
pub mod render;
pub mod schedule;
pub mod segment;
pub mod session;
pub mod traits;

// Re-export commonly used types
pub use commands::Command;
pub use consensus::{Acknowledgment, ConsensusGate, Ignored};
pub use delivery::Advance;
pub use discord::DiscordChannel;
pub use librarian::{CommandContext, Librarian};
pub use message::{ChannelMessage, InboundEvent, ReactionEvent};
pub use schedule::{PostTime, Scheduler, SchedulerHandle, Tick};
pub use session::{NameReservation, Session, SessionEntry, SessionStore};
pub use traits::{ChannelError, ChannelResult, Destination, ThreadOpener};

use anyhow::Context;
use lectern_common::Config;
use std::sync::Arc;
use std::time::{Duration, Instant};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// A gateway connection that lasted this long resets the backoff.
const STABLE_CONNECTION: Duration = Duration::from_secs(300);

/// Run the bot until Ctrl-C.
pub async fn run(config: &Config) -> anyhow::Result<()> {
    let mut discord = DiscordChannel::from_config(&config.discord);
    discord.init().await.context("Discord login failed")?;
    let discord = Arc::new(discord);

    let mut librarian = Librarian::new(SessionStore::new(), discord.clone())
        .with_thread_opener(discord.clone())
        .with_default_chunk_size(config.reading.default_chunk_size)
        .with_command_prefix(config.discord.command_prefix.clone());
    if let Some(bot_user_id) = discord.bot_user_id() {
        librarian = librarian.with_self_id(bot_user_id);
    }

    let scheduler = librarian
        .scheduler(Duration::from_secs(config.reading.tick_interval_secs))
        .spawn();

    tokio::select! {
        () = listen_forever(&discord, &librarian) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        }
    }

    scheduler.stop().await;
    discord.shutdown().await;
    Ok(())
}

/// Keep a gateway connection open, reconnecting with exponential backoff.
async fn listen_forever(discord: &DiscordChannel, librarian: &Librarian) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let handler = librarian.clone();
        let connected_at = Instant::now();
        let result = discord
            .listen(move |event| {
                let handler = handler.clone();
                tokio::spawn(async move {
                    handler.handle(event).await;
                });
            })
            .await;

        match result {
            Ok(()) => tracing::info!("Discord gateway disconnected"),
            Err(e) => tracing::warn!(error = %e, "Discord gateway error"),
        }

        if connected_at.elapsed() >= STABLE_CONNECTION {
            backoff = INITIAL_BACKOFF;
        }
        tracing::info!(delay_secs = backoff.as_secs(), "Reconnecting to Discord gateway");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
