//! Daily scheduled delivery.
//!
//! A ticker evaluates every session at a fixed interval. A session fires
//! when scheduling is armed, it is not finished, the local hour and minute
//! match its post time, and it has not fired yet today. The date is
//! stamped before delivering, so a failed send still counts as that day's
//! attempt and a missed minute is skipped rather than retried.
//!
//! Each delivery runs in its own task. A session whose lock is held by an
//! in-flight send is evaluated in the background once it is free, so a
//! stalled send never holds up the tick or any other session.

use crate::delivery::{self, Advance};
use crate::session::{Session, SessionStore};
use crate::traits::Destination;
use chrono::{Local, NaiveDateTime, Timelike};
use futures_util::future::join_all;
use lectern_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::task::JoinHandle;

/// Daily wall-clock delivery time with minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PostTime {
    hour: u32,
    minute: u32,
}

impl PostTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(Error::validation(
                "Time must be a valid 24-hour HH:MM value.",
            ));
        }
        Ok(Self { hour, minute })
    }

    /// The hour and minute of `now`.
    pub fn of(now: &NaiveDateTime) -> Self {
        Self {
            hour: now.hour(),
            minute: now.minute(),
        }
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }
}

impl FromStr for PostTime {
    type Err = Error;

    /// Parse strict `HH:MM`, e.g. `09:00` or `21:30`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::validation("Time must be in HH:MM 24-hour format, e.g. 09:00.");
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let two_digits =
            |part: &str| part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit());
        if !two_digits(hour) || !two_digits(minute) {
            return Err(invalid());
        }
        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

impl fmt::Display for PostTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Arm scheduled delivery.
///
/// Without a configured time, the current minute becomes the daily slot
/// and today counts as already posted, so the first post is tomorrow.
pub fn start(session: &mut Session, now: NaiveDateTime) {
    session.auto_active = true;
    match session.auto_post_time {
        Some(time) => stamp_if_elapsed(session, time, now),
        None => {
            session.auto_post_time = Some(PostTime::of(&now));
            session.last_auto_post_date = Some(now.date());
        }
    }
}

/// Disarm scheduled delivery, keeping the configured time.
pub fn stop(session: &mut Session) {
    session.auto_active = false;
}

/// Configure the daily delivery time.
pub fn set_time(session: &mut Session, time: PostTime, now: NaiveDateTime) {
    session.auto_post_time = Some(time);
    if session.auto_active {
        stamp_if_elapsed(session, time, now);
    }
}

/// Mark today as done when today's slot is already behind us.
fn stamp_if_elapsed(session: &mut Session, time: PostTime, now: NaiveDateTime) {
    session.last_auto_post_date = (time < PostTime::of(&now)).then(|| now.date());
}

/// Whether `session` should fire at `now`.
pub fn is_due(session: &Session, now: NaiveDateTime) -> bool {
    session.auto_active
        && !session.is_completed()
        && session.auto_post_time == Some(PostTime::of(&now))
        && session.last_auto_post_date != Some(now.date())
}

/// Deliveries set off by one [`Scheduler::tick_at`].
///
/// Dropping it detaches the tasks; they still run to completion.
#[derive(Default)]
pub struct Tick {
    started: usize,
    tasks: Vec<JoinHandle<bool>>,
}

impl Tick {
    /// Sessions that were free and due, with delivery already under way.
    pub fn started(&self) -> usize {
        self.started
    }

    /// Wait for every task of this tick, including sessions that were
    /// busy when it ran. Returns how many fired.
    pub async fn join(self) -> usize {
        join_all(self.tasks)
            .await
            .into_iter()
            .filter(|fired| matches!(fired, Ok(true)))
            .count()
    }
}

async fn deliver(destination: &dyn Destination, mut session: OwnedMutexGuard<Session>) {
    let thread_id = session.thread_id().to_string();
    tracing::info!(thread_id = %thread_id, chunk = session.index() + 1, "Running scheduled delivery");
    match delivery::advance(destination, &mut session).await {
        Ok(Advance::Delivered(message_id)) => {
            tracing::debug!(thread_id = %thread_id, message_id = %message_id, "Scheduled chunk delivered");
        }
        Ok(outcome) => {
            tracing::debug!(thread_id = %thread_id, ?outcome, "Scheduled delivery had nothing to send");
        }
        Err(e) => {
            tracing::warn!(thread_id = %thread_id, error = %e, "Scheduled delivery failed; skipping until tomorrow");
        }
    }
}

/// Periodic evaluator over every session in the store.
#[derive(Clone)]
pub struct Scheduler {
    store: SessionStore,
    destination: Arc<dyn Destination>,
    interval: Duration,
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

impl Scheduler {
    pub fn new(store: SessionStore, destination: Arc<dyn Destination>, interval: Duration) -> Self {
        Self {
            store,
            destination,
            interval,
        }
    }

    /// Evaluate every session once at `now`, spawning a task per delivery.
    ///
    /// Returns without waiting for any send.
    pub fn tick_at(&self, now: NaiveDateTime) -> Tick {
        let mut tick = Tick::default();
        for entry in self.store.snapshot() {
            let destination = Arc::clone(&self.destination);
            match entry.try_lock_owned() {
                Some(mut session) => {
                    if !is_due(&session, now) {
                        continue;
                    }
                    session.last_auto_post_date = Some(now.date());
                    tick.started += 1;
                    tick.tasks.push(tokio::spawn(async move {
                        deliver(destination.as_ref(), session).await;
                        true
                    }));
                }
                None => {
                    tracing::trace!(thread_id = %entry.thread_id, "Session busy; evaluating when free");
                    tick.tasks.push(tokio::spawn(async move {
                        let mut session = entry.lock_owned().await;
                        if !is_due(&session, now) {
                            return false;
                        }
                        session.last_auto_post_date = Some(now.date());
                        deliver(destination.as_ref(), session).await;
                        true
                    }));
                }
            }
        }
        tick
    }

    /// Start the scheduler loop on the runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs = self.interval.as_secs(), "Scheduler started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Scheduler shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let tick = self.tick_at(Local::now().naive_local());
                        if tick.started() > 0 {
                            tracing::debug!(started = tick.started(), "Scheduler tick");
                        }
                    }
                }
            }
        });

        SchedulerHandle { shutdown_tx, task }
    }
}
