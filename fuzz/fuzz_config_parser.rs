//! Fuzz target for the TOML parsers.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary text to `AppConfig::parse()` and to the factoid database
//! loader, which must report errors and collisions without panicking.

#![no_main]

use factoid_config::TriggerConfig;
use factoid_core::persist::parse_snapshot;
use factoid_core::store::FactoidDb;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = factoid_config::AppConfig::parse(s);
        if let Ok(snapshot) = parse_snapshot(s) {
            let (db, _report) = FactoidDb::from_snapshot(snapshot, TriggerConfig::default());
            let _ = db.to_snapshot();
        }
    }
});
