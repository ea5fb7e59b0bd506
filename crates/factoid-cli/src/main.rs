#![deny(unsafe_code)]

//! factoid CLI: inspect a factoid database and try out lookups and triggers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use factoid_config::AppConfig;
use factoid_core::mask::irc_eq;
use factoid_core::persist::load_snapshot;
use factoid_core::store::FactoidDb;
use factoid_core::{
    BoxFuture, CapabilityTable, ChatEvent, ChatTransport, EventKind, FactoidService, FactoidStore,
    LoadReport, Sender, TransportError,
};
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// factoid: canned responses and triggers for chat bots.
#[derive(Parser)]
#[command(name = "factoid", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "factoid.toml")]
    config: PathBuf,

    /// Factoid database (overrides `storage.path`).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the database and report collisions and malformed triggers.
    Check,

    /// List factoid keys.
    List {
        /// Include hidden factoids.
        #[arg(long)]
        hidden: bool,

        /// Only keys in this context.
        #[arg(long)]
        context: Option<String>,

        /// Only factoids whose text contains this string.
        #[arg(long)]
        search: Option<String>,

        /// Print as a JSON array.
        #[arg(long)]
        json: bool,
    },

    /// Look up a factoid and print it as the bot would send it.
    Show {
        /// Key to look up (full, local to the channel's context, or an alias).
        key: String,

        #[command(flatten)]
        network: NetworkArgs,

        /// Channel the command is issued in (omit for a private query).
        #[arg(long)]
        channel: Option<String>,

        /// Nickname of the requester.
        #[arg(long, default_value = "user")]
        nick: String,

        /// Nickname substituted for `$nickname` (defaults to the requester).
        #[arg(long)]
        to: Option<String>,
    },

    /// Feed one chat event to the trigger engine and print what fires.
    Simulate {
        /// Event kind (MSG, ACTION, JOIN, PART, KICK, QUIT, LEAVE, NICK, INVITE).
        #[arg(long)]
        kind: EventKind,

        /// Sender as nick!user@host.
        #[arg(long)]
        sender: String,

        #[command(flatten)]
        network: NetworkArgs,

        /// Channel the event happened in.
        #[arg(long)]
        channel: Option<String>,

        /// Text parameter (message, reason, new nickname).
        #[arg(long)]
        text: Option<String>,

        /// Nickname acted upon (e.g. the kicked user).
        #[arg(long)]
        target: Option<String>,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[derive(clap::Args)]
struct NetworkArgs {
    /// Network name.
    #[arg(long, default_value = "Freenode")]
    network: String,

    /// Network server address (defaults to the network name).
    #[arg(long)]
    address: Option<String>,

    /// The bot's nickname.
    #[arg(long, default_value = "factbot")]
    me: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    let filter = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.storage.path));

    match cli.command {
        Commands::Check => cmd_check(&config, &db_path).await?,
        Commands::List {
            hidden,
            context,
            search,
            json,
        } => cmd_list(&config, &db_path, hidden, context.as_deref(), search.as_deref(), json).await?,
        Commands::Show {
            key,
            network,
            channel,
            nick,
            to,
        } => {
            let service = load_service(config, &db_path).await?;
            let transport = StdoutTransport::new(&network);
            let requester = Sender::new(&nick, &nick, "cli");
            let fired = service
                .show(
                    &(transport.clone() as Arc<dyn ChatTransport>),
                    &key,
                    &requester,
                    channel.as_deref(),
                    to.as_deref(),
                )
                .map_err(|e| anyhow::anyhow!("{key}: {e}"))?;
            transport.wait_for(fired.lines.len(), service.config().line_delay()).await;
        }
        Commands::Simulate {
            kind,
            sender,
            network,
            channel,
            text,
            target,
        } => {
            let service = load_service(config, &db_path).await?;
            let transport = StdoutTransport::new(&network);
            let mut event = ChatEvent::new(kind, Sender::parse(&sender));
            event.channel = channel;
            event.text = text;
            event.target = target;

            let fired = service
                .on_event(&(transport.clone() as Arc<dyn ChatTransport>), &event)
                .await;
            if fired.is_empty() {
                eprintln!("No factoid fired.");
            }
            let total = fired.iter().map(|f| f.lines.len()).sum();
            transport.wait_for(total, service.config().line_delay()).await;
        }
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

async fn cmd_check(config: &AppConfig, db_path: &Path) -> Result<()> {
    let (db, report) = load_db(config, db_path).await?;
    print_report(&report);
    println!(
        "{}: {} factoids, {} aliases, {} contexts",
        db_path.display(),
        db.len(),
        db.aliases().count(),
        db.contexts().count()
    );
    if !report.is_clean() {
        anyhow::bail!("{} has load problems", db_path.display());
    }
    Ok(())
}

fn print_report(report: &LoadReport) {
    for collision in &report.collisions {
        println!("collision: {collision}");
    }
    for alias in &report.chained_aliases {
        println!("dropped alias {alias:?}: its target is another alias");
    }
    for key in &report.empty_factoids {
        println!("dropped factoid {key:?}: empty body");
    }
    for (key, rule) in &report.malformed_triggers {
        println!("malformed trigger on {key:?}: {rule}");
    }
}

async fn cmd_list(
    config: &AppConfig,
    db_path: &Path,
    hidden: bool,
    context: Option<&str>,
    search: Option<&str>,
    json: bool,
) -> Result<()> {
    let (db, _) = load_db(config, db_path).await?;
    let mut keys = db.list_keys(hidden, context);
    if let Some(needle) = search {
        let found = db.search(needle, hidden);
        keys.retain(|k| found.contains(k));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&keys)?);
    } else {
        for key in &keys {
            println!("{key}");
        }
    }
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path).await.map_err(|e| anyhow::anyhow!(e))
    } else {
        Ok(AppConfig::default())
    }
}

async fn load_db(config: &AppConfig, path: &Path) -> Result<(FactoidDb, LoadReport)> {
    let snapshot = load_snapshot(path)
        .await
        .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
    Ok(FactoidDb::from_snapshot(snapshot, config.triggers.clone()))
}

async fn load_service(config: AppConfig, db_path: &Path) -> Result<FactoidService> {
    let (db, report) = load_db(&config, db_path).await?;
    if !report.is_clean() {
        info!("Database loaded with problems, run `factoid check` for details");
    }
    let permissions = Arc::new(CapabilityTable::from_config(&config.permissions));
    Ok(FactoidService::with_store(
        config,
        FactoidStore::from_db(db),
        permissions,
    ))
}

/// Prints outbound lines in IRC wire form instead of sending them.
struct StdoutTransport {
    network: String,
    address: String,
    nickname: String,
    sent: AtomicUsize,
    notify: Notify,
}

impl StdoutTransport {
    fn new(args: &NetworkArgs) -> Arc<Self> {
        Arc::new(Self {
            network: args.network.clone(),
            address: args.address.clone().unwrap_or_else(|| args.network.clone()),
            nickname: args.me.clone(),
            sent: AtomicUsize::new(0),
            notify: Notify::new(),
        })
    }

    /// Wait until `n` lines were printed. Gives up once no line arrived for
    /// a few line delays.
    async fn wait_for(&self, n: usize, line_delay: Duration) {
        let patience = line_delay * 4 + Duration::from_secs(1);
        while self.sent.load(Ordering::SeqCst) < n {
            let notified = self.notify.notified();
            if self.sent.load(Ordering::SeqCst) >= n {
                break;
            }
            if tokio::time::timeout(patience, notified).await.is_err() {
                break;
            }
        }
    }
}

fn wire_line(notice: bool, destination: &str, text: &str) -> String {
    let command = if notice { "NOTICE" } else { "PRIVMSG" };
    format!("{command} {destination} :{text}")
}

impl ChatTransport for StdoutTransport {
    fn network_name(&self) -> &str {
        &self.network
    }

    fn network_address(&self) -> &str {
        &self.address
    }

    fn bot_nickname(&self) -> String {
        self.nickname.clone()
    }

    fn is_channel_name(&self, name: &str) -> bool {
        name.starts_with('#') || name.starts_with('&')
    }

    fn casefold_eq(&self, a: &str, b: &str) -> bool {
        irc_eq(a, b)
    }

    fn send(
        &self,
        destination: &str,
        notice: bool,
        text: &str,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        println!("{}", wire_line(notice, destination, text));
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "factoid",
            "--db",
            "db.toml",
            "simulate",
            "--kind",
            "join",
            "--sender",
            "Alice!a@host",
            "--channel",
            "#general",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("db.toml")));
        match cli.command {
            Commands::Simulate {
                kind,
                network,
                channel,
                text,
                ..
            } => {
                assert_eq!(kind, EventKind::Join);
                assert_eq!(network.network, "Freenode");
                assert_eq!(channel.as_deref(), Some("#general"));
                assert_eq!(text, None);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let result = Cli::try_parse_from([
            "factoid", "simulate", "--kind", "whois", "--sender", "a!b@c",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_wire_line() {
        assert_eq!(wire_line(true, "Alice", "hi"), "NOTICE Alice :hi");
        assert_eq!(wire_line(false, "#x", "hi"), "PRIVMSG #x :hi");
    }

    #[tokio::test]
    async fn test_load_db_reports_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = load_db(&AppConfig::default(), &dir.path().join("none.toml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("none.toml"));
    }

    #[tokio::test]
    async fn test_show_through_stdout_transport() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("factoids.toml");
        tokio::fs::write(
            &path,
            "[[factoids]]\nkey = \"hello\"\nlines = [\"hi $nickname\", \"from $me\"]\n",
        )
        .await
        .unwrap();

        let mut config = AppConfig::default();
        config.display.line_delay_ms = 0;
        let service = load_service(config, &path).await.unwrap();
        let transport = StdoutTransport::new(&NetworkArgs {
            network: "Freenode".to_string(),
            address: None,
            me: "factbot".to_string(),
        });
        let fired = service
            .show(
                &(transport.clone() as Arc<dyn ChatTransport>),
                "hello",
                &Sender::new("bob", "bob", "cli"),
                None,
                None,
            )
            .unwrap();
        assert_eq!(fired.lines[0].text, "[hello] hi bob");
        transport.wait_for(2, Duration::ZERO).await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 2);
    }
}
