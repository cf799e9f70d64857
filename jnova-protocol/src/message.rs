//! Command messages sent to the server.
//!
//! Every command travels as a single JSON object:
//!
//! ```text
//! {"type":"command","command":"PING","args":[]}
//! {"type":"command","command":"BROADCAST","message":{"type":"message","sender":"..","content":".."}}
//! ```

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known command names.
pub const PING: &str = "PING";
pub const BROADCAST: &str = "BROADCAST";

/// Sender used when a `BROADCAST` is built without one.
pub const DEFAULT_SENDER: &str = "jnova-harness";

const COMMAND_TYPE: &str = "command";
const MESSAGE_TYPE: &str = "message";

/// A command sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "CommandEnvelope", try_from = "CommandEnvelope")]
pub enum Command {
    /// Keep-alive ping.
    Ping,
    /// Broadcast a chat message to every connected client.
    Broadcast { sender: String, content: String },
    /// Any other command, sent with positional string arguments.
    Generic { name: String, args: Vec<String> },
}

impl Command {
    pub fn ping() -> Self {
        Command::Ping
    }

    pub fn broadcast(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Command::Broadcast {
            sender: sender.into(),
            content: content.into(),
        }
    }

    /// Builds a command by name.
    ///
    /// `PING` without arguments normalizes to [`Command::Ping`]. `BROADCAST`
    /// becomes [`Command::Broadcast`] from [`DEFAULT_SENDER`] with the
    /// arguments joined by spaces as content. Every other name is sent
    /// verbatim with its arguments.
    pub fn generic<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        match name.as_str() {
            PING if args.is_empty() => Command::Ping,
            BROADCAST => Command::broadcast(DEFAULT_SENDER, args.join(" ")),
            _ => Command::Generic { name, args },
        }
    }

    /// Returns the wire name of this command.
    pub fn name(&self) -> &str {
        match self {
            Command::Ping => PING,
            Command::Broadcast { .. } => BROADCAST,
            Command::Generic { name, .. } => name,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Ping => write!(f, "{}", PING),
            Command::Broadcast { sender, content } => {
                write!(f, "{} from {}: {}", BROADCAST, sender, content)
            }
            Command::Generic { name, args } if args.is_empty() => write!(f, "{}", name),
            Command::Generic { name, args } => write!(f, "{} {}", name, args.join(" ")),
        }
    }
}

/// Chat message carried by a `BROADCAST` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// Message type, always "message".
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Identity of the sending client.
    pub sender: String,

    /// Free-text content.
    pub content: String,
}

impl BroadcastMessage {
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            msg_type: MESSAGE_TYPE.to_string(),
            sender: sender.into(),
            content: content.into(),
        }
    }
}

/// Wire shape shared by every command.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommandEnvelope {
    #[serde(rename = "type")]
    msg_type: String,

    command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    args: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<BroadcastMessage>,
}

impl From<Command> for CommandEnvelope {
    fn from(command: Command) -> Self {
        let (name, args, message) = match command {
            Command::Ping => (PING.to_string(), Some(Vec::new()), None),
            Command::Broadcast { sender, content } => (
                BROADCAST.to_string(),
                None,
                Some(BroadcastMessage::new(sender, content)),
            ),
            // A BROADCAST always carries a message, never args
            Command::Generic { name, args } if name == BROADCAST => (
                name,
                None,
                Some(BroadcastMessage::new(DEFAULT_SENDER, args.join(" "))),
            ),
            Command::Generic { name, args } => (name, Some(args), None),
        };
        Self {
            msg_type: COMMAND_TYPE.to_string(),
            command: name,
            args,
            message,
        }
    }
}

impl TryFrom<CommandEnvelope> for Command {
    type Error = ProtocolError;

    fn try_from(envelope: CommandEnvelope) -> Result<Self, Self::Error> {
        if envelope.command == BROADCAST {
            let message = envelope
                .message
                .ok_or(ProtocolError::MissingField("message"))?;
            return Ok(Command::Broadcast {
                sender: message.sender,
                content: message.content,
            });
        }
        Ok(Command::generic(
            envelope.command,
            envelope.args.unwrap_or_default(),
        ))
    }
}
