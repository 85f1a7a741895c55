//! Metric name and label definitions.
//!
//! Keeping every name in one place keeps dashboards and alerts in sync with
//! the code that records them.

/// Bundle install and lifecycle metrics
pub mod bundles {
    /// Install attempts, labelled by requested kind
    pub const INSTALL_ATTEMPTS_TOTAL: &str = "plinth_bundles_install_attempts_total";
    /// Failed installs, labelled by error kind
    pub const INSTALL_ERRORS_TOTAL: &str = "plinth_bundles_install_errors_total";
    /// End-to-end install duration in seconds
    pub const INSTALL_DURATION_SECONDS: &str = "plinth_bundles_install_duration_seconds";
    /// Bytes written while extracting uploaded archives
    pub const EXTRACTED_BYTES_TOTAL: &str = "plinth_bundles_extracted_bytes_total";
    /// Successful activations, labelled by kind
    pub const ACTIVATIONS_TOTAL: &str = "plinth_bundles_activations_total";
    /// Activations rejected by a precondition, labelled by error kind
    pub const ACTIVATION_ERRORS_TOTAL: &str = "plinth_bundles_activation_errors_total";
    /// Deactivations, labelled by kind
    pub const DEACTIVATIONS_TOTAL: &str = "plinth_bundles_deactivations_total";
    /// Completed uninstalls, labelled by kind
    pub const UNINSTALLS_TOTAL: &str = "plinth_bundles_uninstalls_total";
    /// Plugin migration runs that failed (activation still succeeds)
    pub const MIGRATION_FAILURES_TOTAL: &str = "plinth_bundles_migration_failures_total";
    /// Theme asset publication duration in seconds
    pub const ASSET_PUBLISH_DURATION_SECONDS: &str =
        "plinth_bundles_asset_publish_duration_seconds";
}

/// Registry (database) metrics
pub mod registry {
    /// Unique-constraint violations caught on insert
    pub const UNIQUE_VIOLATIONS_TOTAL: &str = "plinth_registry_unique_violations_total";
    /// Theme activation transactions
    pub const THEME_SWITCHES_TOTAL: &str = "plinth_registry_theme_switches_total";
}

/// Common label keys
pub mod labels {
    pub const KIND: &str = "kind";
    pub const ERROR: &str = "error";
    pub const TARGET: &str = "target";
}

/// Histogram buckets
pub mod buckets {
    /// Install and publish durations (in seconds), 5ms to 2 minutes
    pub const FILESYSTEM_DURATION: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_metric_names_share_prefix() {
        for name in [
            bundles::INSTALL_ATTEMPTS_TOTAL,
            bundles::INSTALL_ERRORS_TOTAL,
            bundles::ACTIVATIONS_TOTAL,
            bundles::UNINSTALLS_TOTAL,
            bundles::MIGRATION_FAILURES_TOTAL,
        ] {
            assert!(name.starts_with("plinth_bundles_"), "{name}");
        }
    }

    #[test]
    fn duration_buckets_are_sorted() {
        assert!(
            buckets::FILESYSTEM_DURATION
                .windows(2)
                .all(|pair| pair[0] < pair[1])
        );
    }
}
