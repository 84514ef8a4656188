//! Text command parsing.
//!
//! Commands are messages starting with the configured prefix, e.g.
//! `!load Dune | It was a dark and stormy night...` or `!settime 09:00`.

use crate::schedule::PostTime;
use lectern_common::{Error, Result};

/// A parsed session command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Load text into a new reading thread.
    Load { title: String, text: String },
    /// Re-chunk with a new paragraphs-per-chunk value.
    SetChunkSize(usize),
    /// Arm daily delivery.
    Start,
    /// Disarm daily delivery.
    Stop,
    /// Set the daily delivery time.
    SetTime(PostTime),
    /// Opt into reaction-based advance.
    Join,
    /// Deliver the next `chunk_size` chunks now.
    More,
    /// Deliver chunk `n` (1-based) and continue from there.
    Jump(usize),
    /// Deliver the last chunk again.
    Resend,
    /// Show session status.
    Info,
    Help,
    Ping,
}

impl Command {
    /// Parse `text` as a command.
    ///
    /// Returns `None` when the text is not addressed to the bot at all and
    /// `Some(Err(..))` when it is, but is malformed.
    pub fn parse(prefix: &str, text: &str) -> Option<Result<Self>> {
        let body = text.trim_start().strip_prefix(prefix)?;
        let (name, args) = match body.find(char::is_whitespace) {
            Some(pos) => (&body[..pos], body[pos..].trim()),
            None => (body, ""),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self::from_parts(&name.to_ascii_lowercase(), args))
    }

    fn from_parts(name: &str, args: &str) -> Result<Self> {
        match name {
            "load" => {
                let (title, text) = args.split_once('|').unwrap_or((args, ""));
                let (title, text) = (title.trim(), text.trim());
                if title.is_empty() {
                    return Err(Error::validation("Title cannot be empty. Usage: load <title> | <text>"));
                }
                if text.is_empty() {
                    return Err(Error::validation("Text content is required. Usage: load <title> | <text>"));
                }
                Ok(Self::Load {
                    title: title.to_string(),
                    text: text.to_string(),
                })
            }
            "setchunksize" | "chunksize" => args
                .parse()
                .map(Self::SetChunkSize)
                .map_err(|_| Error::validation("Chunk size must be a number between 1 and 50.")),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "settime" | "time" => args.parse().map(Self::SetTime),
            "join" => Ok(Self::Join),
            "more" | "next" => Ok(Self::More),
            "jump" => args
                .parse()
                .map(Self::Jump)
                .map_err(|_| Error::validation("Jump needs a chunk number, e.g. jump 4.")),
            "resend" => Ok(Self::Resend),
            "info" | "status" => Ok(Self::Info),
            "help" => Ok(Self::Help),
            "ping" => Ok(Self::Ping),
            other => Err(Error::validation(format!(
                "Unknown command `{other}`. Try help."
            ))),
        }
    }
}

/// Usage text for the help command.
pub fn help_text(prefix: &str) -> String {
    format!(
        "📚 **Lectern Commands**\n\n\
         **Main Commands:**\n\
         • `{p}ping` - Test if the bot is responding\n\
         • `{p}load <title> | <text>` - Load text into a new thread\n\
         • `{p}setchunksize <1-50>` - Set paragraphs per chunk in this thread\n\
         • `{p}start` - Begin daily posts in this thread\n\
         • `{p}stop` - Pause daily posts\n\
         • `{p}settime HH:MM` - Set the daily post time (24-hour)\n\
         • `{p}more` - Send the next chunk-size number of chunks now\n\
         • `{p}jump <n>` - Send chunk n and continue from there\n\
         • `{p}resend` - Send the latest chunk again\n\
         • `{p}join` - Advance together: once every joined reader reacts to the latest chunk, the next ones are posted\n\
         • `{p}info` - Show progress and schedule\n\
         • `{p}help` - Show this help message\n\n\
         **Notes:**\n\
         • Each text gets its own dedicated thread\n\
         • Chunk size defaults to 3 paragraphs\n\
         • All commands except `{p}load` work only in reading threads",
        p = prefix
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Option<Result<Command>> {
        Command::parse("!", text)
    }

    #[test]
    fn not_a_command() {
        assert!(parse("hello there").is_none());
        assert!(parse("!").is_none());
        assert!(parse("! load").is_none());
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse("!start").unwrap().unwrap(), Command::Start);
        assert_eq!(parse("  !MORE ").unwrap().unwrap(), Command::More);
        assert_eq!(parse("!info").unwrap().unwrap(), Command::Info);
        assert_eq!(parse("!join").unwrap().unwrap(), Command::Join);
    }

    #[test]
    fn load_splits_title_and_text() {
        let cmd = parse("!load Dune | A beginning is the time.\n\nFor taking care.")
            .unwrap()
            .unwrap();
        assert_eq!(
            cmd,
            Command::Load {
                title: "Dune".into(),
                text: "A beginning is the time.\n\nFor taking care.".into(),
            }
        );
    }

    #[test]
    fn load_requires_title_and_text() {
        assert!(matches!(parse("!load | text").unwrap(), Err(Error::Validation(_))));
        assert!(matches!(parse("!load Dune").unwrap(), Err(Error::Validation(_))));
        assert!(matches!(parse("!load Dune |   ").unwrap(), Err(Error::Validation(_))));
    }

    #[test]
    fn numeric_arguments() {
        assert_eq!(parse("!setchunksize 5").unwrap().unwrap(), Command::SetChunkSize(5));
        assert_eq!(parse("!jump 12").unwrap().unwrap(), Command::Jump(12));
        assert!(parse("!setchunksize five").unwrap().is_err());
        assert!(parse("!jump").unwrap().is_err());
        assert!(parse("!jump -1").unwrap().is_err());
    }

    #[test]
    fn settime_validates() {
        assert_eq!(
            parse("!settime 09:30").unwrap().unwrap(),
            Command::SetTime(PostTime::new(9, 30).unwrap())
        );
        assert!(parse("!settime 9am").unwrap().is_err());
    }

    #[test]
    fn unknown_command() {
        let err = parse("!dance").unwrap().unwrap_err();
        assert!(err.to_string().contains("dance"));
    }

    #[test]
    fn custom_prefix() {
        assert_eq!(Command::parse("?", "?ping").unwrap().unwrap(), Command::Ping);
        assert!(Command::parse("?", "!ping").is_none());
    }

    #[test]
    fn help_mentions_prefix() {
        assert!(help_text("?").contains("`?load <title> | <text>`"));
    }
}
