//! Key resolution, command display and reload through the service.

use std::sync::Arc;

use factoid_core::{CapabilityTable, ChatTransport, Location, ResolveError, Sender};
use factoid_test_utils::MockTransport;
use factoid_test_utils::config::TestConfigBuilder;
use factoid_test_utils::service::TestService;
use pretty_assertions::assert_eq;

const DB: &str = r#"
    [[contexts]]
    name = "alpha"
    channels = ["net/#x"]

    [[contexts]]
    name = "beta"
    channels = ["net/#x", "irc.example.net/#beta"]

    [[contexts]]
    name = "help"
    channels = ["Freenode/#general"]

    [[factoids]]
    key = "alpha/faq1"
    lines = ["alpha's faq"]

    [[factoids]]
    key = "beta/faq1"
    lines = ["beta's faq"]

    [[factoids]]
    key = "beta/faq2"
    lines = ["only beta"]

    [[factoids]]
    key = "help/intro"
    lines = ["Hi $nickname, I am $me"]

    [[aliases]]
    key = "hello"
    target = "help/intro"

    [[aliases]]
    key = "dangling"
    target = "help/nothing"
"#;

async fn service() -> TestService {
    TestService::with_toml(
        TestConfigBuilder::new().build(),
        Arc::new(CapabilityTable::new()),
        DB,
    )
    .await
}

fn net() -> Arc<dyn ChatTransport> {
    Arc::new(MockTransport::new("net", "irc.example.net", "factbot"))
}

#[tokio::test]
async fn test_same_local_key_in_two_contexts_is_ambiguous() {
    let test = service().await;
    let transport = net();
    let resolver = test.service.resolver();
    let x = Location::channel(transport.as_ref(), "#x");

    assert_eq!(
        resolver.resolve("faq1", "net/alice", &x).unwrap_err(),
        ResolveError::Ambiguous(vec!["alpha/faq1".to_string(), "beta/faq1".to_string()])
    );
    assert_eq!(resolver.resolve("faq2", "net/alice", &x).unwrap().key, "beta/faq2");
    assert_eq!(
        resolver.resolve("FAQ2", "net/alice", &Location::channel(transport.as_ref(), "#beta"))
            .unwrap()
            .key,
        "beta/faq2"
    );
}

#[tokio::test]
async fn test_full_keys_resolve_everywhere() {
    let test = service().await;
    let resolver = test.service.resolver();
    let transports = [net(), MockTransport::freenode() as Arc<dyn ChatTransport>];

    for transport in &transports {
        for channel in [Some("#x"), Some("#general"), Some("#nowhere"), None] {
            let location = Location {
                transport: transport.as_ref(),
                channel,
            };
            for key in ["alpha/faq1", "beta/faq1", "beta/faq2", "help/intro"] {
                let resolved = resolver.resolve(key, "net/alice", &location).unwrap();
                assert_eq!(resolved.key, key);
                assert_eq!(resolved.factoid.key(), key);
            }
            assert_eq!(resolver.resolve("hello", "net/alice", &location).unwrap().key, "help/intro");
            assert_eq!(
                resolver.resolve("dangling", "net/alice", &location).unwrap_err(),
                ResolveError::BrokenAlias
            );
        }
    }
}

#[tokio::test]
async fn test_dot_targets_evict_oldest_user() {
    let test = TestService::with_toml(
        TestConfigBuilder::new().max_dot_targets(2).build(),
        Arc::new(CapabilityTable::new()),
        DB,
    )
    .await;
    let transport = net();
    let resolver = test.service.resolver();
    let here = Location::private(transport.as_ref());

    for user in ["net/alice", "net/bob", "net/carol"] {
        resolver.resolve("beta/faq2", user, &here).unwrap();
    }
    assert_eq!(resolver.dot_target("net/alice"), None);
    assert_eq!(
        resolver.resolve(".", "net/alice", &here).unwrap_err(),
        ResolveError::BrokenAlias
    );
    assert_eq!(resolver.resolve(".", "net/carol", &here).unwrap().key, "beta/faq2");
    assert_eq!(resolver.dot_target("net/bob").as_deref(), Some("beta/faq2"));
}

#[tokio::test]
async fn test_show_then_dot() {
    let test = service().await;
    let mock = MockTransport::freenode();
    let transport: Arc<dyn ChatTransport> = mock.clone();
    let alice = Sender::parse("Alice!a@host");

    let fired = test
        .service
        .show(&transport, "intro", &alice, Some("#general"), None)
        .unwrap();
    assert_eq!(fired.lines[0].text, "[intro] Hi Alice, I am factbot");

    let again = test
        .service
        .show(&transport, ".", &alice, Some("#general"), Some("Bob"))
        .unwrap();
    assert_eq!(again.key, "help/intro");
    assert_eq!(again.lines[0].text, "[help/intro] Hi Bob, I am factbot");

    // Dot targets are per user.
    let bob = Sender::parse("Bob!b@host");
    assert_eq!(
        test.service
            .show(&transport, ".", &bob, Some("#general"), None)
            .unwrap_err(),
        ResolveError::BrokenAlias
    );

    let sent = mock
        .wait_for_sent(2, std::time::Duration::from_secs(5))
        .await;
    assert_eq!(sent[0].destination, "#general");
}

#[tokio::test]
async fn test_context_lookup_by_channel() {
    let test = service().await;
    let transport = net();
    let resolver = test.service.resolver();

    assert_eq!(
        resolver.context_lookup(&Location::channel(transport.as_ref(), "#beta")),
        Ok("beta".to_string())
    );
    assert_eq!(
        resolver.context_lookup(&Location::channel(transport.as_ref(), "#x")),
        Err(ResolveError::Ambiguous(vec!["alpha".to_string(), "beta".to_string()]))
    );
    assert_eq!(
        resolver.context_lookup(&Location::private(transport.as_ref())),
        Err(ResolveError::NotFound)
    );
}

#[tokio::test]
async fn test_reload_replaces_database() {
    let test = service().await;
    test.write_db(
        r#"
        [[factoids]]
        key = "new"
        lines = ["brand new"]
        "#,
    )
    .await;

    let report = test.service.reload(&test.db_path).await.unwrap();
    assert!(report.is_clean());
    let db = test.service.store().snapshot();
    assert_eq!(db.len(), 1);
    assert!(db.factoid("new").is_some());
    assert!(db.context("help").is_none());
}

#[tokio::test]
async fn test_broken_reload_keeps_database() {
    let test = service().await;
    test.write_db("this is = = not toml").await;
    assert!(test.service.reload(&test.db_path).await.is_err());
    assert_eq!(test.service.store().snapshot().len(), 4);
}

#[tokio::test]
async fn test_save_round_trip() {
    let test = service().await;
    test.service
        .store()
        .edit(|db| {
            db.add_trigger("help/intro", "JOIN:.*")?;
            db.set_hidden("beta/faq2", true)
        })
        .unwrap();
    test.service.save(&test.db_path).await.unwrap();

    let before = test.service.store().snapshot().to_snapshot();
    test.service.reload(&test.db_path).await.unwrap();
    let after = test.service.store().snapshot().to_snapshot();
    assert_eq!(before, after);
    assert_eq!(after.aliases.len(), 2);
}
