//! Fuzz target for trigger rule parsing and placeholder substitution.
//!
//! Run with: cargo +nightly fuzz run fuzz_trigger_rule
//!
//! The first byte picks a split point: the bytes before it are the rule, the
//! rest is the event text, which is also rendered as a factoid body.

#![no_main]

use factoid_core::display::{Placeholders, Renderer};
use factoid_core::trigger::{CompiledRule, Predicate};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let split = (data[0] as usize % (data.len() - 1)) + 1;
    let (Ok(rule), Ok(text)) = (
        std::str::from_utf8(&data[1..split]),
        std::str::from_utf8(&data[split..]),
    ) else {
        return;
    };

    if let Ok(compiled) = CompiledRule::parse(rule) {
        assert!(compiled.predicates.len() <= factoid_core::trigger::MAX_PREDICATES);
        for predicate in &compiled.predicates {
            if let Predicate::Permission(name) = predicate {
                assert!(!name.contains('!') && !name.contains('#'));
            }
        }
        let _ = compiled.pattern.is_match(text);
    }

    let values = Placeholders {
        nickname: "alice",
        channel: "#general",
        me: "factbot",
        sender: "bob",
    };
    for line in Renderer::default().render(text, &values, None) {
        assert!(!line.contains('\n') && !line.contains('\r'));
    }
});
