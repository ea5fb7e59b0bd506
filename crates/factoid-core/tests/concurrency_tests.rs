//! Concurrent event handling: rate limits under bursts and independence of
//! slow permission checks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use factoid_core::factoid::RateLimit;
use factoid_core::{CapabilityTable, ChatEvent, ChatTransport, FactoidService, Sender};
use factoid_test_utils::config::TestConfigBuilder;
use factoid_test_utils::{MockTransport, ScriptedPermissions};
use tokio::task::JoinSet;

fn alice() -> Sender {
    Sender::parse("Alice!alice@home.example.net")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_burst_of_identical_events_fires_once() {
    let service = Arc::new(FactoidService::new(
        TestConfigBuilder::new().build(),
        Arc::new(CapabilityTable::new()),
    ));
    service
        .store()
        .edit(|db| {
            db.set_factoid("faq", "See the faq")?;
            db.add_trigger("faq", "faq")?;
            db.set_rate_limit("faq", RateLimit::new(1, 60))
        })
        .unwrap();
    let transport: Arc<dyn ChatTransport> = MockTransport::freenode();
    let now = Instant::now();

    let mut tasks = JoinSet::new();
    for _ in 0..64 {
        let service = Arc::clone(&service);
        let transport = Arc::clone(&transport);
        tasks.spawn(async move {
            let event = ChatEvent::message(alice(), "#general", "faq");
            service
                .engine()
                .handle_event_at(&transport, &event, now)
                .await
                .len()
        });
    }

    let mut total = 0;
    while let Some(fired) = tasks.join_next().await {
        total += fired.unwrap();
    }
    assert_eq!(total, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_permission_check_does_not_delay_other_factoids() {
    let permissions = Arc::new(ScriptedPermissions::with_delay(Duration::from_secs(2)));
    permissions.grant("Alice", "op");
    let service = Arc::new(FactoidService::new(
        TestConfigBuilder::new().build(),
        permissions.clone(),
    ));
    service
        .store()
        .edit(|db| {
            db.set_factoid("slow", "slow answer")?;
            db.add_trigger("slow", "MSG:op:hello")?;
            db.set_factoid("fast", "fast answer")?;
            db.add_trigger("fast", "hello").map(drop)
        })
        .unwrap();
    let mock = MockTransport::freenode();
    let transport: Arc<dyn ChatTransport> = mock.clone();

    let started = Instant::now();
    let handle = {
        let service = Arc::clone(&service);
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            let event = ChatEvent::message(alice(), "#general", "hello");
            service.on_event(&transport, &event).await
        })
    };

    let sent = mock.wait_for_sent(1, Duration::from_secs(1)).await;
    assert_eq!(sent[0].text, "[fast] fast answer");
    assert!(started.elapsed() < Duration::from_secs(2));

    let fired = handle.await.unwrap();
    let keys: Vec<&str> = fired.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(keys, ["fast", "slow"]);
    assert_eq!(permissions.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_edits_during_trigger_scans() {
    let service = Arc::new(FactoidService::new(
        TestConfigBuilder::new().rate_limit(0, 0).build(),
        Arc::new(CapabilityTable::new()),
    ));
    service
        .store()
        .edit(|db| {
            db.set_factoid("faq", "edit start a\nedit start b")?;
            db.add_trigger("faq", "faq").map(drop)
        })
        .unwrap();
    let transport: Arc<dyn ChatTransport> = MockTransport::freenode();

    let editor = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            for i in 0..200 {
                service
                    .store()
                    .edit(|db| db.set_factoid("faq", &format!("edit {i} a\nedit {i} b")))
                    .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    for _ in 0..200 {
        let event = ChatEvent::message(alice(), "#general", "faq");
        let fired = service.on_event(&transport, &event).await;
        let lines = &fired[0].lines;
        assert_eq!(lines.len(), 2);
        // Both lines always come from the same version of the factoid.
        let first = lines[0].text.trim_end_matches(" a").trim_start_matches("[faq] ");
        let second = lines[1].text.trim_end_matches(" b").trim_start_matches("[faq] ");
        assert_eq!(first, second);
    }
    editor.await.unwrap();
}
