//! Display formatting: line splitting, placeholder substitution, labels.
//!
//! Placeholders are `$` followed by a word: `$nickname`, `$channel`, `$me`
//! and `$sender`. `$$` is a literal dollar sign. Any other `$` is copied
//! through unchanged.
//!
//! The whole word after `$` must name a placeholder; prefixes do not
//! count. `$nicknames` and `$mechanic` stay literal instead of expanding
//! `$nickname` and `$me`. Use `$nickname's` or similar punctuation to
//! attach text.

use factoid_config::DisplayConfig;

/// Split text into lines on `\r\n`, `\n`, or `\r`, dropping empty lines.
pub fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\r', '\n']).filter(|line| !line.is_empty())
}

/// Values substituted into factoid text.
#[derive(Debug, Clone, Copy)]
pub struct Placeholders<'a> {
    /// `$nickname`: the recipient.
    pub nickname: &'a str,
    /// `$channel`: the channel the display happens in (empty in private).
    pub channel: &'a str,
    /// `$me`: the bot's own nickname.
    pub me: &'a str,
    /// `$sender`: the user who invoked or triggered the display.
    pub sender: &'a str,
}

impl Placeholders<'_> {
    fn lookup(&self, word: &str) -> Option<&str> {
        match word {
            "nickname" => Some(self.nickname),
            "channel" => Some(self.channel),
            "me" => Some(self.me),
            "sender" => Some(self.sender),
            _ => None,
        }
    }
}

/// Substitute placeholders in one line.
pub fn substitute(line: &str, values: &Placeholders<'_>) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        }

        let word_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        match values.lookup(&after[..word_len]) {
            Some(value) => {
                out.push_str(value);
                rest = &after[word_len..];
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// What the label of a displayed line describes.
#[derive(Debug, Clone, Copy)]
pub struct Label<'a> {
    /// Whether the line goes out as a notice.
    pub notice: bool,
    /// Where the line is sent.
    pub destination: &'a str,
    /// Context name to show, or `None` to show only the local key.
    pub context: Option<&'a str>,
    /// Local key (the part after the context).
    pub key: &'a str,
}

/// Renders factoid text into the lines that are sent.
#[derive(Debug, Clone)]
pub struct Renderer {
    label_format: String,
    max_lines: usize,
}

impl Renderer {
    /// Create a renderer from display configuration.
    pub fn new(config: &DisplayConfig) -> Self {
        Self {
            label_format: config.label_format.clone(),
            max_lines: config.max_lines,
        }
    }

    /// Format a label with the configured template.
    pub fn format_label(&self, label: &Label<'_>) -> String {
        let mut out = String::new();
        let mut rest = self.label_format.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };
            match &after[..close] {
                "kind" => out.push_str(if label.notice { "NOTICE" } else { "PRIVMSG" }),
                "destination" => out.push_str(label.destination),
                "context" => {
                    if let Some(context) = label.context {
                        out.push_str(context);
                        out.push('/');
                    }
                }
                "key" => out.push_str(label.key),
                _ => out.push_str(&rest[open..open + close + 2]),
            }
            rest = &after[close + 1..];
        }

        out.push_str(rest);
        out
    }

    /// Render `text` into output lines: split, substitute, and label.
    pub fn render(
        &self,
        text: &str,
        values: &Placeholders<'_>,
        label: Option<&Label<'_>>,
    ) -> Vec<String> {
        let prefix = label.map(|l| self.format_label(l));
        let limit = if self.max_lines == 0 {
            usize::MAX
        } else {
            self.max_lines
        };

        split_lines(text)
            .take(limit)
            .map(|line| {
                let body = substitute(line, values);
                match &prefix {
                    Some(prefix) => format!("{prefix}{body}"),
                    None => body,
                }
            })
            .collect()
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(&DisplayConfig::default())
    }
}
