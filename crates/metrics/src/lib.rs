//! Metrics facade for plinth.
//!
//! Library crates record through the `metrics` crate macros re-exported here,
//! using the names in [`bundles`] and [`registry`]. Nothing is exported until
//! the embedding application installs a recorder (Prometheus, statsd, ...);
//! without one every call is a no-op.
//!
//! ```rust,ignore
//! use plinth_metrics::{bundles, counter};
//!
//! counter!(bundles::INSTALL_ATTEMPTS_TOTAL, "kind" => "plugin").increment(1);
//! ```

mod definitions;

pub use definitions::*;

pub use metrics::{counter, gauge, histogram};
