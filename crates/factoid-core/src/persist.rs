//! Snapshot loading and saving.
//!
//! The whole database is dumped to and loaded from one TOML document:
//!
//! ```toml
//! [[contexts]]
//! name = "help"
//! channels = ["Freenode/#general"]
//!
//! [[factoids]]
//! key = "help/intro"
//! lines = ["Hi $nickname, welcome to $channel"]
//! triggers = ["JOIN:.*"]
//!
//! [[aliases]]
//! key = "greeting"
//! target = "help/intro"
//! ```
//!
//! Loading builds a fresh [`FactoidDb`]; the caller swaps it in only when
//! loading succeeded.

use std::path::Path;

use factoid_config::TriggerConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::factoid::{Context, Factoid, RateLimit};
use crate::store::{Collision, FactoidDb};
use crate::trigger::TriggerRule;

/// Errors from reading or writing a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to access factoid database: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse factoid database: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize factoid database: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// The serialised form of a [`FactoidDb`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<ContextRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub factoids: Vec<FactoidRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<AliasRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub name: String,
    #[serde(default)]
    pub channels: Vec<String>,
}

/// A factoid as stored. Absent optional fields take the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoidRecord {
    pub key: String,
    pub lines: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hide_label: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice_on_join: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_window_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub key: String,
    pub target: String,
}

/// Problems found while loading. None of them abort the load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Names defined more than once; the first definition was kept.
    pub collisions: Vec<Collision>,
    /// Aliases dropped because their target is another alias.
    pub chained_aliases: Vec<String>,
    /// Factoids dropped because they had no non-empty lines.
    pub empty_factoids: Vec<String>,
    /// `(key, rule)` pairs of trigger rules that failed to parse.
    pub malformed_triggers: Vec<(String, String)>,
}

impl LoadReport {
    /// Whether the load found nothing to report.
    pub fn is_clean(&self) -> bool {
        self.collisions.is_empty()
            && self.chained_aliases.is_empty()
            && self.empty_factoids.is_empty()
            && self.malformed_triggers.is_empty()
    }
}

/// Parse a snapshot from TOML text.
pub fn parse_snapshot(s: &str) -> Result<Snapshot, PersistError> {
    Ok(toml::from_str(s)?)
}

/// Read a snapshot file.
pub async fn load_snapshot(path: &Path) -> Result<Snapshot, PersistError> {
    let content = tokio::fs::read_to_string(path).await?;
    let snapshot = parse_snapshot(&content)?;
    tracing::debug!(path = %path.display(), "Factoid snapshot read");
    Ok(snapshot)
}

/// Write a snapshot file, replacing it atomically.
pub async fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), PersistError> {
    let content = toml::to_string_pretty(snapshot)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    info!(
        path = %path.display(),
        factoids = snapshot.factoids.len(),
        "Factoid snapshot saved"
    );
    Ok(())
}

impl FactoidDb {
    /// Build a database from a snapshot.
    ///
    /// Contexts load first, then factoids, then aliases; a name already
    /// taken by an earlier entry is reported and the later one dropped.
    pub fn from_snapshot(snapshot: Snapshot, defaults: TriggerConfig) -> (Self, LoadReport) {
        let mut db = FactoidDb::new(defaults);
        let mut report = LoadReport::default();

        for record in snapshot.contexts {
            if let Err(c) = db.load_context(Context::new(&record.name, record.channels)) {
                report.collisions.push(c);
            }
        }

        for record in snapshot.factoids {
            let key = record.key.clone();
            match factoid_from_record(record, db.defaults()) {
                Some(factoid) => {
                    report.malformed_triggers.extend(
                        factoid
                            .triggers
                            .iter()
                            .filter(|t| t.is_malformed())
                            .map(|t| (factoid.key().to_string(), t.raw().to_string())),
                    );
                    if let Err(c) = db.load_factoid(factoid) {
                        report.collisions.push(c);
                    }
                }
                None => report.empty_factoids.push(key),
            }
        }

        for record in snapshot.aliases {
            if let Err(c) = db.load_alias(&record.key, &record.target) {
                report.collisions.push(c);
            }
        }
        report.chained_aliases = db.drop_chained_aliases();

        for c in &report.collisions {
            warn!(collision = %c, "Load collision");
        }
        for alias in &report.chained_aliases {
            warn!(alias = %alias, "Dropped alias that points at another alias");
        }
        for key in &report.empty_factoids {
            warn!(key = %key, "Dropped factoid with empty body");
        }
        info!(
            factoids = db.len(),
            contexts = db.contexts().count(),
            aliases = db.aliases().count(),
            "Factoid database loaded"
        );
        (db, report)
    }

    /// Dump the database into a snapshot.
    pub fn to_snapshot(&self) -> Snapshot {
        let defaults = self.defaults();
        let default_limit = RateLimit::new(
            defaults.default_rate_limit_count,
            defaults.default_rate_limit_window_secs,
        );
        let contexts = self
            .contexts()
            .map(|c| ContextRecord {
                name: c.name().to_string(),
                channels: c.channels.clone(),
            })
            .collect();
        let factoids = self
            .factoids()
            .map(|f| FactoidRecord {
                key: f.key().to_string(),
                lines: f.lines().to_vec(),
                triggers: f.triggers.iter().map(|t| t.raw().to_string()).collect(),
                hidden: f.hidden,
                hide_label: f.hide_label,
                notice_on_join: (f.notice_on_join != defaults.default_notice_on_join)
                    .then_some(f.notice_on_join),
                rate_limit_count: (f.rate_limit.count != default_limit.count)
                    .then_some(f.rate_limit.count),
                rate_limit_window_secs: (f.rate_limit.window != default_limit.window)
                    .then_some(f.rate_limit.window.as_secs()),
            })
            .collect();
        let aliases = self
            .aliases()
            .map(|(key, target)| AliasRecord {
                key: key.to_string(),
                target: target.to_string(),
            })
            .collect();
        Snapshot {
            contexts,
            factoids,
            aliases,
        }
    }
}

fn factoid_from_record(record: FactoidRecord, defaults: &TriggerConfig) -> Option<Factoid> {
    let mut factoid = Factoid::with_defaults(&record.key, &record.lines.join("\n"), defaults)?;
    factoid.triggers = record.triggers.iter().map(|t| TriggerRule::new(t)).collect();
    factoid.hidden = record.hidden;
    factoid.hide_label = record.hide_label;
    if let Some(notice) = record.notice_on_join {
        factoid.notice_on_join = notice;
    }
    factoid.rate_limit = RateLimit::new(
        record
            .rate_limit_count
            .unwrap_or(defaults.default_rate_limit_count),
        record
            .rate_limit_window_secs
            .unwrap_or(defaults.default_rate_limit_window_secs),
    );
    Some(factoid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
        [[contexts]]
        name = "help"
        channels = ["Freenode/#general"]

        [[factoids]]
        key = "help/intro"
        lines = ["Hi $nickname,", "welcome to $channel"]
        triggers = ["JOIN:.*", "MSG:*:(broken"]
        rate_limit_count = 2

        [[factoids]]
        key = "faq"
        lines = ["read the faq"]
        hidden = true
        notice_on_join = false

        [[factoids]]
        key = "help"
        lines = ["collides with the context"]

        [[factoids]]
        key = "empty"
        lines = ["", ""]

        [[aliases]]
        key = "greeting"
        target = "help/intro"

        [[aliases]]
        key = "hello"
        target = "greeting"

        [[aliases]]
        key = "faq"
        target = "help/intro"
    "#;

    #[test_log::test]
    fn test_load_sample() {
        let snapshot = parse_snapshot(SAMPLE).unwrap();
        let (db, report) = FactoidDb::from_snapshot(snapshot, TriggerConfig::default());

        assert_eq!(db.len(), 2);
        let intro = db.factoid("help/intro").unwrap();
        assert_eq!(intro.lines(), ["Hi $nickname,", "welcome to $channel"]);
        assert_eq!(intro.rate_limit, RateLimit::new(2, 120));
        assert!(intro.notice_on_join);
        assert_eq!(intro.triggers.len(), 2);

        let faq = db.factoid("faq").unwrap();
        assert!(faq.hidden);
        assert!(!faq.notice_on_join);

        assert_eq!(db.alias("greeting"), Some("help/intro"));
        assert_eq!(db.alias("hello"), None);
        assert_eq!(db.alias("faq"), None);

        assert_eq!(
            report.collisions,
            vec![
                Collision {
                    name: "help".to_string(),
                    dropped: "factoid",
                    existing: "context",
                },
                Collision {
                    name: "faq".to_string(),
                    dropped: "alias",
                    existing: "factoid",
                },
            ]
        );
        assert_eq!(report.chained_aliases, vec!["hello".to_string()]);
        assert_eq!(report.empty_factoids, vec!["empty".to_string()]);
        assert_eq!(
            report.malformed_triggers,
            vec![("help/intro".to_string(), "MSG:*:(broken".to_string())]
        );
        assert!(!report.is_clean());
    }

    #[test]
    fn test_empty_document() {
        let (db, report) =
            FactoidDb::from_snapshot(parse_snapshot("").unwrap(), TriggerConfig::default());
        assert!(db.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            parse_snapshot("[[factoids]]\nkey = 3"),
            Err(PersistError::Parse(_))
        ));
    }

    #[test]
    fn test_snapshot_omits_defaults() {
        let mut db = FactoidDb::default();
        db.set_factoid("plain", "text").unwrap();
        db.set_factoid("tuned", "text").unwrap();
        db.set_rate_limit("tuned", RateLimit::new(1, 30)).unwrap();
        db.set_notice_on_join("tuned", false).unwrap();

        let snapshot = db.to_snapshot();
        assert_eq!(
            snapshot.factoids[0],
            FactoidRecord {
                key: "plain".to_string(),
                lines: vec!["text".to_string()],
                ..FactoidRecord::default()
            }
        );
        assert_eq!(snapshot.factoids[1].rate_limit_count, None);
        assert_eq!(snapshot.factoids[1].rate_limit_window_secs, Some(30));
        assert_eq!(snapshot.factoids[1].notice_on_join, Some(false));
    }

    #[tokio::test]
    async fn test_save_and_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("factoids.toml");

        let (db, _) =
            FactoidDb::from_snapshot(parse_snapshot(SAMPLE).unwrap(), TriggerConfig::default());
        let snapshot = db.to_snapshot();
        save_snapshot(&path, &snapshot).await.unwrap();
        assert!(!dir.path().join("factoids.toml.tmp").exists());

        let reloaded = load_snapshot(&path).await.unwrap();
        assert_eq!(reloaded, snapshot);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load_snapshot(&dir.path().join("nope.toml")).await.unwrap_err();
        assert!(matches!(err, PersistError::Io(_)));
    }
}
