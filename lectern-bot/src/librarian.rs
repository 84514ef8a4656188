//! The session command surface.
//!
//! [`Librarian`] owns the session store and turns commands and reactions
//! into session transitions. It is platform-agnostic: everything it sends
//! goes through a [`Destination`], and thread creation through an optional
//! [`ThreadOpener`].

use crate::commands::{self, Command};
use crate::consensus::{Acknowledgment, ConsensusGate};
use crate::delivery;
use crate::message::{ChannelMessage, InboundEvent, ReactionEvent};
use crate::render;
use crate::schedule::{self, Scheduler};
use crate::segment;
use crate::session::{Session, SessionEntry, SessionStore};
use crate::traits::{Destination, ThreadOpener};
use chrono::{Local, NaiveDateTime};
use lectern_common::config::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use lectern_common::logging::generate_trace_id;
use lectern_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Who issued a command, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    /// Channel or thread the command was sent in
    pub channel_id: String,
    /// Author of the command
    pub user_id: String,
}

impl CommandContext {
    pub fn new(channel_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Reply to the ping command.
pub const PONG: &str = "🏓 Pong! Bot is working!";

/// Executes session commands against a shared store.
#[derive(Clone)]
pub struct Librarian {
    store: SessionStore,
    destination: Arc<dyn Destination>,
    thread_opener: Option<Arc<dyn ThreadOpener>>,
    gate: ConsensusGate,
    self_id: Option<String>,
    default_chunk_size: usize,
    command_prefix: String,
}

impl Librarian {
    pub fn new(store: SessionStore, destination: Arc<dyn Destination>) -> Self {
        let gate = ConsensusGate::new(store.clone(), Arc::clone(&destination));
        Self {
            store,
            destination,
            thread_opener: None,
            gate,
            self_id: None,
            default_chunk_size: 3,
            command_prefix: "!".into(),
        }
    }

    /// Open a dedicated thread for every loaded text.
    pub fn with_thread_opener(mut self, opener: Arc<dyn ThreadOpener>) -> Self {
        self.thread_opener = Some(opener);
        self
    }

    pub fn with_default_chunk_size(mut self, size: usize) -> Self {
        self.default_chunk_size = size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self
    }

    /// The bot's own user ID; its messages and reactions are ignored.
    pub fn with_self_id(mut self, self_id: impl Into<String>) -> Self {
        let self_id = self_id.into();
        self.gate = self.gate.with_self_id(self_id.clone());
        self.self_id = Some(self_id);
        self
    }

    pub fn with_command_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = prefix.into();
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn command_prefix(&self) -> &str {
        &self.command_prefix
    }

    /// A scheduler over the same store and destination.
    pub fn scheduler(&self, interval: Duration) -> Scheduler {
        Scheduler::new(self.store.clone(), Arc::clone(&self.destination), interval)
    }

    /// Dispatch one inbound event.
    pub async fn handle(&self, event: InboundEvent) {
        match event {
            InboundEvent::Message(message) => self.on_message(message).await,
            InboundEvent::Reaction(reaction) => {
                // Failures are logged by the gate.
                let _ = self.on_reaction(&reaction).await;
            }
        }
    }

    /// Feed a reaction to the consensus gate.
    pub async fn on_reaction(&self, reaction: &ReactionEvent) -> Result<Acknowledgment> {
        self.gate.on_reaction(reaction).await
    }

    async fn on_message(&self, message: ChannelMessage) {
        if self.self_id.as_deref() == Some(message.user_id.as_str()) {
            return;
        }
        let Some(parsed) = Command::parse(&self.command_prefix, &message.text) else {
            return;
        };

        let trace_id = generate_trace_id();
        tracing::info!(
            trace_id = %trace_id,
            channel_id = %message.channel_id,
            user_id = %message.user_id,
            command = ?parsed.as_ref().ok().map(command_name),
            "Command received"
        );

        let ctx = CommandContext::new(message.channel_id, message.user_id);
        let outcome = match parsed {
            Ok(command) => self.execute(&ctx, command).await,
            Err(e) => Err(e),
        };
        let reply = outcome.unwrap_or_else(|e| {
            tracing::debug!(trace_id = %trace_id, error = %e, "Command rejected");
            format!("❌ {e}")
        });

        for piece in render::split_message(&reply) {
            if let Err(e) = self.destination.send(&ctx.channel_id, &piece).await {
                tracing::warn!(trace_id = %trace_id, channel_id = %ctx.channel_id, error = %e, "Failed to send reply");
                break;
            }
        }
    }

    /// Execute `command` at the current local time.
    pub async fn execute(&self, ctx: &CommandContext, command: Command) -> Result<String> {
        self.execute_at(ctx, command, Local::now().naive_local()).await
    }

    /// Execute `command` as if the local wall clock read `now`.
    pub async fn execute_at(
        &self,
        ctx: &CommandContext,
        command: Command,
        now: NaiveDateTime,
    ) -> Result<String> {
        match command {
            Command::Ping => Ok(PONG.to_string()),
            Command::Help => Ok(commands::help_text(&self.command_prefix)),
            Command::Load { title, text } => self.load(ctx, &title, &text).await,
            command => {
                let entry = self.store.require(&ctx.channel_id)?;
                let mut session = entry.lock().await;
                self.apply(&entry, &mut session, ctx, command, now).await
            }
        }
    }

    /// Segment `text`, open its thread and register the session.
    pub async fn load(&self, ctx: &CommandContext, title: &str, text: &str) -> Result<String> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::validation("Title cannot be empty."));
        }
        if text.trim().is_empty() {
            return Err(Error::validation("Text content is required."));
        }
        let paragraphs = segment::segment(text);
        if paragraphs.is_empty() {
            return Err(Error::validation(
                "No paragraphs found. Each paragraph needs at least 11 characters.",
            ));
        }

        let Some(opener) = &self.thread_opener else {
            let name = self.store.unique_name(None, title);
            let session = Session::new(ctx.channel_id.clone(), &paragraphs, self.default_chunk_size);
            let reply = loaded_notice(&name, &session);
            self.register(session, None, name);
            return Ok(reply);
        };

        let reservation = self.store.reserve_name(Some(ctx.channel_id.as_str()), title);
        let name = reservation.name().to_string();
        let thread_id = opener
            .open_thread(&ctx.channel_id, &name)
            .await
            .map_err(|e| Error::transport(format!("Failed to create thread: {e}")))?;

        let session = Session::new(thread_id.clone(), &paragraphs, self.default_chunk_size);
        let notice = loaded_notice(&name, &session);
        let chunks = session.len();
        self.register(session, Some(ctx.channel_id.clone()), name.clone());
        drop(reservation);

        if let Err(e) = self.destination.send(&thread_id, &notice).await {
            tracing::warn!(thread_id = %thread_id, error = %e, "Failed to post load notice");
        }
        Ok(format!("✅ Created thread **{name}** with {chunks} chunks!"))
    }

    fn register(&self, session: Session, parent_id: Option<String>, name: String) {
        tracing::info!(
            thread_id = %session.thread_id(),
            name = %name,
            chunks = session.len(),
            chunk_size = session.chunk_size(),
            "Reading session loaded"
        );
        self.store.insert(SessionEntry::new(session, parent_id, name));
    }

    async fn apply(
        &self,
        entry: &SessionEntry,
        session: &mut Session,
        ctx: &CommandContext,
        command: Command,
        now: NaiveDateTime,
    ) -> Result<String> {
        let destination = self.destination.as_ref();
        match command {
            Command::SetChunkSize(size) => {
                session.rechunk(size)?;
                if session.is_completed() {
                    Ok(format!(
                        "📖 Chunk size set to {size}. All {} chunks have already been sent.",
                        session.len()
                    ))
                } else {
                    Ok(format!(
                        "📖 Chunk size set to {size}. Continuing from chunk {} of {}.",
                        session.index() + 1,
                        session.len()
                    ))
                }
            }
            Command::Start => {
                schedule::start(session, now);
                Ok(match session.auto_post_time {
                    Some(time) => format!("🚀 Daily reading started! A new chunk posts every day at {time}."),
                    None => "🚀 Daily reading started!".to_string(),
                })
            }
            Command::Stop => {
                schedule::stop(session);
                Ok("⏸️ Daily reading paused.".to_string())
            }
            Command::SetTime(time) => {
                schedule::set_time(session, time, now);
                if session.auto_active {
                    Ok(format!("⏰ Daily post time set to {time}."))
                } else {
                    Ok(format!(
                        "⏰ Daily post time set to {time}. Use `{}start` to begin.",
                        self.command_prefix
                    ))
                }
            }
            Command::Join => {
                let readers = if session.join(&ctx.user_id) {
                    session.joined_users().len()
                } else {
                    return Ok("🙋 You have already joined this reading.".to_string());
                };
                Ok(format!(
                    "🙋 Joined! {readers} reader(s) now advance together. React to the latest chunk when you finish it."
                ))
            }
            Command::More => {
                let batch = session.chunk_size();
                match delivery::advance_batch(destination, session, batch).await? {
                    0 => Ok("🎉 All chunks have been sent!".to_string()),
                    sent => Ok(format!("📚 Sent {sent} chunk(s)!")),
                }
            }
            Command::Jump(number) => {
                delivery::jump_to(destination, session, number).await?;
                Ok(format!("⏭️ Jumped to chunk {number} of {}.", session.len()))
            }
            Command::Resend => match delivery::resend_last(destination, session).await? {
                Some(_) => Ok(format!("🔁 Resent chunk {}.", session.index())),
                None => Ok("Nothing has been sent yet.".to_string()),
            },
            Command::Info => Ok(info(entry, session)),
            Command::Load { .. } | Command::Help | Command::Ping => Err(Error::validation(
                "That command does not act on a reading session.",
            )),
        }
    }
}

fn loaded_notice(name: &str, session: &Session) -> String {
    format!(
        "✅ **{name}** loaded with {} chunks (size={}).",
        session.len(),
        session.chunk_size()
    )
}

fn info(entry: &SessionEntry, session: &Session) -> String {
    let schedule = match (session.auto_active, session.auto_post_time) {
        (true, Some(time)) => format!("daily at {time}"),
        (false, Some(time)) => format!("paused ({time})"),
        _ => "off".to_string(),
    };
    let status = if session.is_completed() {
        "finished"
    } else {
        "in progress"
    };
    format!(
        "📖 **{}**\n\
         • Progress: {}/{} chunks sent ({status})\n\
         • Chunk size: {} paragraphs\n\
         • Schedule: {schedule}\n\
         • Readers joined: {}",
        entry.name,
        session.index(),
        session.len(),
        session.chunk_size(),
        session.joined_users().len()
    )
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Load { .. } => "load",
        Command::SetChunkSize(_) => "setchunksize",
        Command::Start => "start",
        Command::Stop => "stop",
        Command::SetTime(_) => "settime",
        Command::Join => "join",
        Command::More => "more",
        Command::Jump(_) => "jump",
        Command::Resend => "resend",
        Command::Info => "info",
        Command::Help => "help",
        Command::Ping => "ping",
    }
}
