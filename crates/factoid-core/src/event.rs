//! Inbound chat event types delivered by the host's event dispatcher.

use std::fmt;
use std::str::FromStr;

use crate::mask::irc_to_lower;

/// The kind of chat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A channel or private message.
    Msg,
    /// A CTCP ACTION (`/me`).
    Action,
    /// A user joined a channel.
    Join,
    /// A user parted a channel.
    Part,
    /// A user was kicked from a channel.
    Kick,
    /// A user quit the network.
    Quit,
    /// A user left a channel by any means (part, kick, or quit).
    Leave,
    /// A user changed nickname.
    Nick,
    /// The bot was invited to a channel.
    Invite,
}

impl EventKind {
    /// All event kinds, in tag order.
    pub const ALL: [EventKind; 9] = [
        EventKind::Msg,
        EventKind::Action,
        EventKind::Join,
        EventKind::Part,
        EventKind::Kick,
        EventKind::Quit,
        EventKind::Leave,
        EventKind::Nick,
        EventKind::Invite,
    ];

    /// The upper-case trigger tag for this kind.
    pub fn tag(self) -> &'static str {
        match self {
            EventKind::Msg => "MSG",
            EventKind::Action => "ACTION",
            EventKind::Join => "JOIN",
            EventKind::Part => "PART",
            EventKind::Kick => "KICK",
            EventKind::Quit => "QUIT",
            EventKind::Leave => "LEAVE",
            EventKind::Nick => "NICK",
            EventKind::Invite => "INVITE",
        }
    }

    /// Whether output fired by this kind goes privately when the factoid
    /// asks for notice-on-join.
    pub fn is_arrival(self) -> bool {
        matches!(self, EventKind::Join | EventKind::Invite)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Error returned when a string is not a known event tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

/// The user who caused an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    /// Nickname.
    pub nick: String,
    /// Username (ident).
    pub user: String,
    /// Hostname.
    pub host: String,
}

impl Sender {
    /// Create a sender from its parts.
    pub fn new(nick: &str, user: &str, host: &str) -> Self {
        Self {
            nick: nick.to_string(),
            user: user.to_string(),
            host: host.to_string(),
        }
    }

    /// Parse a `nick!user@host` string. Missing parts are left empty.
    pub fn parse(hostmask: &str) -> Self {
        let (nick, rest) = hostmask.split_once('!').unwrap_or((hostmask, ""));
        let (user, host) = rest.split_once('@').unwrap_or((rest, ""));
        Self::new(nick, user, host)
    }

    /// The full `nick!user@host` identity string.
    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.user, self.host)
    }
}

/// Case-insensitive `network/nickname` identity used to key per-user state.
pub fn user_identity(network: &str, nick: &str) -> String {
    format!("{}/{}", network.to_ascii_lowercase(), irc_to_lower(nick))
}

/// A typed chat event.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    /// What happened.
    pub kind: EventKind,
    /// Who caused it.
    pub sender: Sender,
    /// The channel it happened in, if any (QUIT and NICK have none).
    pub channel: Option<String>,
    /// Text parameter: message text, part/quit/kick reason, or new nickname.
    pub text: Option<String>,
    /// The user acted upon (the kicked user), if any.
    pub target: Option<String>,
}

impl ChatEvent {
    /// Create an event with no channel, text, or target.
    pub fn new(kind: EventKind, sender: Sender) -> Self {
        Self {
            kind,
            sender,
            channel: None,
            text: None,
            target: None,
        }
    }

    /// A channel message.
    pub fn message(sender: Sender, channel: &str, text: &str) -> Self {
        Self::new(EventKind::Msg, sender)
            .in_channel(channel)
            .with_text(text)
    }

    /// A channel join.
    pub fn join(sender: Sender, channel: &str) -> Self {
        Self::new(EventKind::Join, sender).in_channel(channel)
    }

    /// Set the channel.
    pub fn in_channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }

    /// Set the text parameter.
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    /// Set the acted-upon user.
    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    /// The nickname `$nickname` defaults to: the target if set, else the sender.
    pub fn default_recipient(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.sender.nick)
    }
}
