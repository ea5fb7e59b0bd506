//! Service test helpers.
//!
//! Helpers for constructing [`FactoidService`] instances in tests with a
//! temporary factoid database file.

use std::path::PathBuf;
use std::sync::Arc;

use factoid_config::AppConfig;
use factoid_core::{FactoidService, PermissionAuthority};
use tempfile::TempDir;

/// A test-scoped service with an owned temp directory for its database.
///
/// The temp directory is deleted automatically when this value is dropped,
/// guaranteeing cleanup even on panic.
pub struct TestService {
    pub service: FactoidService,
    pub db_path: PathBuf,
    _temp_dir: TempDir,
}

impl TestService {
    /// Create a service whose database was loaded from the given TOML string.
    pub async fn with_toml(
        config: AppConfig,
        permissions: Arc<dyn PermissionAuthority>,
        toml_content: &str,
    ) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("factoids.toml");
        tokio::fs::write(&db_path, toml_content)
            .await
            .expect("failed to write test database");

        let service = FactoidService::new(config, permissions);
        let report = service
            .reload(&db_path)
            .await
            .expect("failed to load test database");
        assert!(report.is_clean(), "test database has load problems: {report:?}");

        Self {
            service,
            db_path,
            _temp_dir: temp_dir,
        }
    }

    /// Overwrite the database file with new content (for reload testing).
    pub async fn write_db(&self, toml_content: &str) {
        tokio::fs::write(&self.db_path, toml_content)
            .await
            .expect("failed to write updated database");
    }
}
