//! Channel masks, hostmask globs, and RFC 1459 case mapping.
//!
//! A channel mask has the form `network/channel`. Either side may be `*`,
//! and the channel side may be `#*` (or `*#`) to mean "any channel, but not
//! a private query". A mask without `/` applies to every network.
//!
//! The case-mapping and glob helpers mirror the ones exported by
//! `slirc-proto` (`irc_eq`, `irc_to_lower`, `wildcard_match`,
//! `matches_hostmask`), so masks fold the same way an IRC server does.

use crate::transport::ChatTransport;

/// Lower-case one character under RFC 1459 case mapping.
pub fn irc_lower_char(c: char) -> char {
    match c {
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        other => other.to_ascii_lowercase(),
    }
}

/// Lower-case a string under RFC 1459 case mapping.
pub fn irc_to_lower(s: &str) -> String {
    s.chars().map(irc_lower_char).collect()
}

/// Compare two strings under RFC 1459 case mapping.
pub fn irc_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .chars()
            .zip(b.chars())
            .all(|(x, y)| irc_lower_char(x) == irc_lower_char(y))
}

/// Match `text` against an IRC glob (`*` any run, `?` any one character),
/// case-insensitively under RFC 1459 case mapping.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().map(irc_lower_char).collect();
    let text: Vec<char> = text.chars().map(irc_lower_char).collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Match a `nick!user@host` identity against a hostmask glob.
pub fn matches_hostmask(mask: &str, hostmask: &str) -> bool {
    wildcard_match(mask, hostmask)
}

/// How a channel mask matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MaskMatch {
    /// No match.
    None,
    /// Matched through a wildcard channel part (`*`, `#*`, `*#`).
    Generic,
    /// Matched the channel by name.
    Specific,
}

impl MaskMatch {
    /// Whether this is any kind of match.
    pub fn is_match(self) -> bool {
        self != MaskMatch::None
    }
}

/// Split a mask into `(network, channel)`. Without `/` the network is `*`.
pub fn split_mask(pattern: &str) -> (&str, &str) {
    pattern.split_once('/').unwrap_or(("*", pattern))
}

/// Match one channel mask against the transport's network and `channel`.
///
/// `channel` is `None` for events that happen outside a channel; only a
/// `*` channel part matches those.
pub fn match_channel_mask(
    pattern: &str,
    transport: &dyn ChatTransport,
    channel: Option<&str>,
) -> MaskMatch {
    let (network, chan) = split_mask(pattern);

    let network_ok = network == "*"
        || network.eq_ignore_ascii_case(transport.network_name())
        || network.eq_ignore_ascii_case(transport.network_address());
    if !network_ok {
        return MaskMatch::None;
    }

    if chan == "*" {
        return MaskMatch::Generic;
    }
    let Some(channel) = channel else {
        return MaskMatch::None;
    };
    if chan == "#*" || chan == "*#" {
        return if transport.is_channel_name(channel) {
            MaskMatch::Generic
        } else {
            MaskMatch::None
        };
    }
    if transport.casefold_eq(chan, channel) {
        MaskMatch::Specific
    } else {
        MaskMatch::None
    }
}

/// Match a list of masks; the strongest match among them wins.
pub fn match_channel_list<S: AsRef<str>>(
    patterns: &[S],
    transport: &dyn ChatTransport,
    channel: Option<&str>,
) -> MaskMatch {
    patterns
        .iter()
        .map(|p| match_channel_mask(p.as_ref(), transport, channel))
        .max()
        .unwrap_or(MaskMatch::None)
}
