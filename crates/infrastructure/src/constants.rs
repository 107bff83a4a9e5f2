//! Shared defaults for the analyzer run.

/// Host-count threshold above which a CIDR is sampled even in expand
/// mode.
pub const DEFAULT_MAX_HOSTS: u64 = 65_536;

/// Advisory task ceiling; the estimator warns past this, never aborts.
pub const DEFAULT_MAX_TASKS: u64 = 100_000_000;

/// Default path of the all-results sink.
pub const DEFAULT_OUT_FILE: &str = "results.csv";

/// Default path of the accepted-only sink.
pub const DEFAULT_ACCEPTED_FILE: &str = "accepted.csv";
