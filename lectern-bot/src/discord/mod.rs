//! Discord adapter.
//!
//! REST for sending messages and opening threads, and the Gateway
//! WebSocket for real-time messages and reactions.

use crate::message::{ChannelMessage, InboundEvent, ReactionEvent};
use crate::traits::{ChannelError, ChannelResult, Destination, ThreadOpener};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use lectern_common::config::DiscordConfig;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;

const API_BASE: &str = "https://discord.com/api/v10";

/// GUILDS | GUILD_MESSAGES | GUILD_MESSAGE_REACTIONS | MESSAGE_CONTENT
pub const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 10) | (1 << 15);

/// Discord caps thread names at 100 characters.
pub const MAX_THREAD_NAME_CHARS: usize = 100;

const PUBLIC_THREAD: u8 = 11;
const AUTO_ARCHIVE_MINUTES: u32 = 1440;
const DEFAULT_HEARTBEAT_MS: u64 = 41250;

/// Discord channel using REST plus the Gateway WebSocket.
pub struct DiscordChannel {
    bot_token: String,
    allowed_guilds: Vec<String>,
    client: Client,
    connected: Arc<RwLock<bool>>,
    bot_user_id: Option<String>,
}

impl DiscordChannel {
    pub fn new(bot_token: String, allowed_guilds: Vec<String>) -> Self {
        let bot_user_id = Self::bot_user_id_from_token(&bot_token);
        Self {
            bot_token,
            allowed_guilds,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            connected: Arc::new(RwLock::new(false)),
            bot_user_id,
        }
    }

    pub fn from_config(config: &DiscordConfig) -> Self {
        Self::new(config.bot_token.clone(), config.allowed_guilds.clone())
    }

    /// The bot's own user ID, once known.
    pub fn bot_user_id(&self) -> Option<&str> {
        self.bot_user_id.as_deref()
    }

    /// Whether events from `guild_id` should be handled. An empty allowlist
    /// admits every guild; direct messages only pass an empty allowlist.
    pub fn is_guild_allowed(&self, guild_id: Option<&str>) -> bool {
        if self.allowed_guilds.is_empty() {
            return true;
        }
        guild_id.is_some_and(|gid| self.allowed_guilds.iter().any(|g| g == gid))
    }

    /// Extract bot user ID from token.
    fn bot_user_id_from_token(token: &str) -> Option<String> {
        let part = token.split('.').next()?.trim_end_matches('=');
        let bytes = STANDARD_NO_PAD
            .decode(part)
            .or_else(|_| URL_SAFE_NO_PAD.decode(part))
            .ok()?;
        String::from_utf8(bytes).ok()
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    /// Verify the token and learn the bot's user ID.
    pub async fn init(&mut self) -> ChannelResult<()> {
        let resp = self
            .client
            .get(format!("{API_BASE}/users/@me"))
            .header("Authorization", self.authorization())
            .send()
            .await
            .map_err(|e| ChannelError::Auth(format!("Failed to verify Discord token: {e}")))?;

        if !resp.status().is_success() {
            return Err(ChannelError::Auth("Invalid Discord bot token".into()));
        }

        let me: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Internal(format!("Failed to parse response: {e}")))?;
        if let Some(id) = me.get("id").and_then(Value::as_str) {
            self.bot_user_id = Some(id.to_string());
        }

        *self.connected.write().await = true;
        tracing::info!(bot_user_id = ?self.bot_user_id, "Discord channel initialized");
        Ok(())
    }

    pub async fn shutdown(&self) {
        *self.connected.write().await = false;
        tracing::info!("Discord channel shutdown");
    }

    async fn post(&self, url: &str, body: &Value) -> ChannelResult<Value> {
        if !*self.connected.read().await {
            return Err(ChannelError::NotReady);
        }

        let resp = self
            .client
            .post(url)
            .header("Authorization", self.authorization())
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("Discord send error: {e}")))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body: Value = resp.json().await.unwrap_or_default();
            return Err(ChannelError::RateLimited {
                retry_after_secs: retry_after_secs(&body),
            });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let error = resp.text().await.unwrap_or_default();
            return Err(ChannelError::Auth(format!(
                "Discord refused the request ({status}): {error}"
            )));
        }
        if !status.is_success() {
            let error = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed(format!(
                "Discord API error ({status}): {error}"
            )));
        }

        resp.json()
            .await
            .map_err(|e| ChannelError::Internal(format!("Failed to parse response: {e}")))
    }

    /// Connect to the Gateway and forward events until the connection ends.
    ///
    /// Returns `Ok` when Discord closes the connection or asks for a
    /// reconnect; callers are expected to call `listen` again.
    pub async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(InboundEvent) + Send + Sync + 'static,
    {
        let gw_resp: Value = self
            .client
            .get(format!("{API_BASE}/gateway/bot"))
            .header("Authorization", self.authorization())
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Failed to get gateway: {e}")))?
            .json()
            .await
            .map_err(|e| ChannelError::Connection(format!("Invalid gateway response: {e}")))?;

        let gw_url = gw_resp
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or("wss://gateway.discord.gg");

        let ws_url = format!("{gw_url}/?v=10&encoding=json");
        tracing::info!("Discord: connecting to gateway...");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .map_err(|e| ChannelError::Connection(format!("WebSocket connection failed: {e}")))?;

        let (mut write, mut read) = ws_stream.split();

        // Hello (opcode 10)
        let hello = read
            .next()
            .await
            .ok_or_else(|| ChannelError::Connection("No hello from gateway".into()))?
            .map_err(|e| ChannelError::Connection(format!("WebSocket error: {e}")))?
            .into_text()
            .map_err(|e| ChannelError::Connection(format!("Invalid hello: {e}")))?;

        let hello_data: Value = serde_json::from_str(&hello)
            .map_err(|e| ChannelError::Connection(format!("Invalid hello: {e}")))?;

        let heartbeat_interval = hello_data
            .get("d")
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_HEARTBEAT_MS);

        // Identify (opcode 2)
        let identify = json!({
            "op": 2,
            "d": {
                "token": self.bot_token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": "linux",
                    "browser": "lectern",
                    "device": "lectern"
                }
            }
        });

        write
            .send(Message::Text(identify.to_string()))
            .await
            .map_err(|e| ChannelError::Connection(format!("Failed to identify: {e}")))?;

        tracing::info!("Discord: connected and identified");

        let (hb_tx, mut hb_rx) = tokio::sync::mpsc::channel::<()>(1);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(heartbeat_interval));
            loop {
                interval.tick().await;
                if hb_tx.send(()).await.is_err() {
                    break;
                }
            }
        });

        let mut sequence: Option<u64> = None;

        loop {
            tokio::select! {
                _ = hb_rx.recv() => {
                    let hb = json!({"op": 1, "d": sequence});
                    if write.send(Message::Text(hb.to_string())).await.is_err() {
                        break;
                    }
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(Message::Text(t))) => t,
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Discord: gateway closed the connection");
                            break;
                        }
                        None => break,
                        Some(Err(e)) => {
                            return Err(ChannelError::Connection(format!("WebSocket error: {e}")));
                        }
                        _ => continue,
                    };

                    let Ok(payload) = serde_json::from_str::<Value>(&msg) else {
                        continue;
                    };

                    if let Some(s) = payload.get("s").and_then(Value::as_u64) {
                        sequence = Some(s);
                    }

                    match payload.get("op").and_then(Value::as_u64).unwrap_or(0) {
                        1 => {
                            let hb = json!({"op": 1, "d": sequence});
                            if write.send(Message::Text(hb.to_string())).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        7 | 9 => {
                            tracing::info!("Discord: gateway requested a reconnect");
                            break;
                        }
                        0 => {}
                        _ => continue,
                    }

                    let event_type = payload.get("t").and_then(Value::as_str).unwrap_or("");
                    let Some(d) = payload.get("d") else {
                        continue;
                    };

                    if event_type == "READY" {
                        let (user, guilds) = ready_summary(d);
                        tracing::info!(user = %user, guilds, "Discord: ready");
                        continue;
                    }

                    if !self.is_guild_allowed(d.get("guild_id").and_then(Value::as_str)) {
                        continue;
                    }

                    let Some(event) = parse_dispatch(event_type, d) else {
                        continue;
                    };

                    if let InboundEvent::Message(message) = &event {
                        if self.bot_user_id.as_deref() == Some(message.user_id.as_str()) {
                            continue;
                        }
                        tracing::debug!(
                            channel = "discord",
                            user_id = %message.user_id,
                            chat_id = %message.channel_id,
                            "IM message received"
                        );
                    }

                    callback(event);
                }
            }
        }

        Ok(())
    }
}

fn retry_after_secs(body: &Value) -> u64 {
    body.get("retry_after")
        .and_then(Value::as_f64)
        .map_or(1, |secs| secs.ceil().max(1.0) as u64)
}

/// Bot username and guild count from a READY payload.
fn ready_summary(d: &Value) -> (&str, usize) {
    let user = d
        .get("user")
        .and_then(|u| u.get("username"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let guilds = d.get("guilds").and_then(Value::as_array).map_or(0, Vec::len);
    (user, guilds)
}

/// Turn a Gateway dispatch into a typed event.
///
/// Messages from bots and messages without text are dropped.
pub fn parse_dispatch(event_type: &str, d: &Value) -> Option<InboundEvent> {
    let str_field = |key: &str| d.get(key).and_then(Value::as_str).map(str::to_string);

    match event_type {
        "MESSAGE_CREATE" => {
            let author = d.get("author")?;
            if author.get("bot").and_then(Value::as_bool).unwrap_or(false) {
                return None;
            }
            let text = str_field("content").filter(|c| !c.is_empty())?;
            let timestamp = d
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
                .map_or_else(|| chrono::Utc::now().timestamp_millis(), |ts| ts.timestamp_millis());

            Some(InboundEvent::Message(ChannelMessage {
                id: str_field("id")?,
                channel_id: str_field("channel_id")?,
                guild_id: str_field("guild_id"),
                user_id: author.get("id").and_then(Value::as_str)?.to_string(),
                text,
                timestamp,
            }))
        }
        "MESSAGE_REACTION_ADD" => Some(InboundEvent::Reaction(ReactionEvent::new(
            str_field("user_id")?,
            str_field("message_id")?,
            str_field("channel_id")?,
        ))),
        _ => None,
    }
}

#[async_trait]
impl Destination for DiscordChannel {
    async fn send(&self, thread_id: &str, text: &str) -> ChannelResult<String> {
        let url = format!("{API_BASE}/channels/{thread_id}/messages");
        let msg_data = self.post(&url, &json!({ "content": text })).await?;
        msg_data
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ChannelError::Internal("Discord response had no message id".into()))
    }
}

#[async_trait]
impl ThreadOpener for DiscordChannel {
    async fn open_thread(&self, parent_id: &str, name: &str) -> ChannelResult<String> {
        let url = format!("{API_BASE}/channels/{parent_id}/threads");
        let name: String = name.chars().take(MAX_THREAD_NAME_CHARS).collect();
        let body = json!({
            "name": name,
            "type": PUBLIC_THREAD,
            "auto_archive_duration": AUTO_ARCHIVE_MINUTES,
        });
        let thread = self.post(&url, &body).await?;
        let thread_id = thread
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::Internal("Discord response had no thread id".into()))?;
        tracing::info!(parent_id = %parent_id, thread_id = %thread_id, name = %name, "Discord thread created");
        Ok(thread_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_user_id_extraction() {
        let id = DiscordChannel::bot_user_id_from_token("MTIzNDU2.fake.hmac");
        assert_eq!(id, Some("123456".to_string()));
        assert_eq!(DiscordChannel::bot_user_id_from_token("!!!.x.y"), None);
    }

    #[test]
    fn empty_guild_allowlist_admits_everything() {
        let ch = DiscordChannel::new("fake".into(), vec![]);
        assert!(ch.is_guild_allowed(Some("1")));
        assert!(ch.is_guild_allowed(None));
    }

    #[test]
    fn guild_allowlist_filters() {
        let ch = DiscordChannel::new("fake".into(), vec!["111".into()]);
        assert!(ch.is_guild_allowed(Some("111")));
        assert!(!ch.is_guild_allowed(Some("222")));
        assert!(!ch.is_guild_allowed(None));
    }

    #[test]
    fn intents_cover_messages_and_reactions() {
        assert_eq!(GATEWAY_INTENTS, 34305);
    }

    #[test]
    fn parse_message_create() {
        let d = json!({
            "id": "m1",
            "channel_id": "c1",
            "guild_id": "g1",
            "content": "!more",
            "timestamp": "2026-03-01T09:00:00.000000+00:00",
            "author": {"id": "u1", "username": "reader"}
        });
        let Some(InboundEvent::Message(msg)) = parse_dispatch("MESSAGE_CREATE", &d) else {
            panic!("expected a message");
        };
        assert_eq!(msg.user_id, "u1");
        assert_eq!(msg.guild_id.as_deref(), Some("g1"));
        assert_eq!(msg.text, "!more");
        assert_eq!(msg.timestamp, 1_772_355_600_000);
    }

    #[test]
    fn bot_and_empty_messages_are_dropped() {
        let from_bot = json!({
            "id": "m1", "channel_id": "c1", "content": "hi",
            "author": {"id": "b1", "bot": true}
        });
        assert!(parse_dispatch("MESSAGE_CREATE", &from_bot).is_none());

        let empty = json!({"id": "m1", "channel_id": "c1", "content": "", "author": {"id": "u1"}});
        assert!(parse_dispatch("MESSAGE_CREATE", &empty).is_none());
    }

    #[test]
    fn parse_reaction_add() {
        let d = json!({
            "user_id": "u1",
            "message_id": "m9",
            "channel_id": "t1",
            "emoji": {"name": "✅"}
        });
        assert_eq!(
            parse_dispatch("MESSAGE_REACTION_ADD", &d),
            Some(InboundEvent::Reaction(ReactionEvent::new("u1", "m9", "t1")))
        );
        assert!(parse_dispatch("TYPING_START", &d).is_none());
    }

    #[test]
    fn ready_summary_reads_user_and_guilds() {
        let d = json!({"user": {"username": "lectern"}, "guilds": [{"id": "g1"}, {"id": "g2"}]});
        assert_eq!(ready_summary(&d), ("lectern", 2));
        assert_eq!(ready_summary(&json!({})), ("", 0));
    }

    #[test]
    fn rate_limit_rounds_up() {
        assert_eq!(retry_after_secs(&json!({"retry_after": 1.2})), 2);
        assert_eq!(retry_after_secs(&json!({})), 1);
    }

    #[tokio::test]
    async fn send_before_init_is_not_ready() {
        let ch = DiscordChannel::new("fake".into(), vec![]);
        let err = ch.send("c1", "hello").await.unwrap_err();
        assert!(matches!(err, ChannelError::NotReady));
    }
}
