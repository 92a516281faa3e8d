use rand::{rngs::StdRng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

const DEFAULT_SEED: u64 = 42;

/// Snapshot of the deterministic-execution controls.
///
/// Reductions whose summation order is otherwise scheduler-dependent (the
/// rank accumulation of the factorized contraction engine) consult this
/// configuration to decide whether they must run in a fixed order.
#[derive(Clone, Debug)]
pub struct DeterminismConfig {
    /// Whether deterministic execution is requested globally.
    pub enabled: bool,
    /// Base seed from which per-component seeds are derived.
    pub base_seed: u64,
    /// If true, order-sensitive reductions run sequentially.
    pub fix_reduction: bool,
}

fn truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "True" | "on" | "ON")
}

fn falsy(value: &str) -> bool {
    matches!(value, "0" | "false" | "False" | "off" | "OFF")
}

impl DeterminismConfig {
    /// Builds a configuration snapshot from `RANKTORCH_*` environment
    /// variables.
    fn from_env() -> Self {
        let enabled = std::env::var("RANKTORCH_DETERMINISTIC")
            .ok()
            .map(|v| !falsy(v.as_str()))
            .unwrap_or(false);

        let base_seed = std::env::var("RANKTORCH_DETERMINISTIC_SEED")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SEED);

        let fix_reduction = std::env::var("RANKTORCH_DETERMINISTIC_REDUCTION")
            .ok()
            .map(|v| truthy(v.as_str()))
            .unwrap_or(enabled);

        Self {
            enabled,
            base_seed,
            fix_reduction,
        }
    }

    /// Derives a stable seed for the given component label.
    pub fn seed_for<L: Hash>(&self, label: L) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.base_seed.hash(&mut hasher);
        label.hash(&mut hasher);
        hasher.finish()
    }
}

static CONFIG: OnceLock<DeterminismConfig> = OnceLock::new();

/// Returns the lazily initialised configuration snapshot.
pub fn config() -> &'static DeterminismConfig {
    CONFIG.get_or_init(|| {
        let cfg = DeterminismConfig::from_env();
        apply_process_hints(&cfg);
        cfg
    })
}

/// Installs an explicit configuration. Intended for tests; the first caller
/// wins, exactly like the environment-driven path.
pub fn configure(cfg: DeterminismConfig) -> &'static DeterminismConfig {
    CONFIG.get_or_init(|| {
        apply_process_hints(&cfg);
        cfg
    })
}

fn apply_process_hints(cfg: &DeterminismConfig) {
    if cfg.enabled && cfg.fix_reduction {
        // Hint rayon before any pool is built. Harmless if one already is.
        std::env::set_var("RAYON_NUM_THREADS", "1");
    }
}

/// Returns a RNG derived from the provided label. When determinism is
/// disabled this falls back to entropy from the operating system.
pub fn rng_from_label(label: &str) -> StdRng {
    let cfg = config();
    if cfg.enabled {
        StdRng::seed_from_u64(cfg.seed_for(label))
    } else {
        StdRng::from_entropy()
    }
}

/// Returns whether order-sensitive reductions must run sequentially.
pub fn lock_reduction_order() -> bool {
    config().enabled && config().fix_reduction
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
    use std::sync::{Mutex, OnceLock};

    fn with_env(vars: &[(&str, Option<&str>)], test: impl FnOnce()) {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        let _lock = GUARD.get_or_init(|| Mutex::new(())).lock().unwrap();

        let snapshot: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, value)| {
                let previous = std::env::var(key).ok();
                match value {
                    Some(val) => std::env::set_var(key, val),
                    None => std::env::remove_var(key),
                }
                ((*key).to_string(), previous)
            })
            .collect();

        let result = catch_unwind(AssertUnwindSafe(test));

        for (key, value) in snapshot {
            match value {
                Some(val) => std::env::set_var(&key, val),
                None => std::env::remove_var(&key),
            }
        }

        if let Err(err) = result {
            resume_unwind(err);
        }
    }

    #[test]
    fn defaults_leave_determinism_off() {
        with_env(
            &[
                ("RANKTORCH_DETERMINISTIC", None),
                ("RANKTORCH_DETERMINISTIC_SEED", None),
                ("RANKTORCH_DETERMINISTIC_REDUCTION", None),
            ],
            || {
                let cfg = DeterminismConfig::from_env();
                assert!(!cfg.enabled);
                assert_eq!(cfg.base_seed, DEFAULT_SEED);
                assert!(!cfg.fix_reduction);
            },
        );
    }

    #[test]
    fn enabling_determinism_fixes_reductions_by_default() {
        with_env(
            &[
                ("RANKTORCH_DETERMINISTIC", Some("1")),
                ("RANKTORCH_DETERMINISTIC_REDUCTION", None),
            ],
            || {
                let cfg = DeterminismConfig::from_env();
                assert!(cfg.enabled);
                assert!(cfg.fix_reduction);
            },
        );
    }

    #[test]
    fn reduction_lock_can_be_declined() {
        with_env(
            &[
                ("RANKTORCH_DETERMINISTIC", Some("1")),
                ("RANKTORCH_DETERMINISTIC_SEED", Some("7")),
                ("RANKTORCH_DETERMINISTIC_REDUCTION", Some("0")),
            ],
            || {
                let cfg = DeterminismConfig::from_env();
                assert!(cfg.enabled);
                assert_eq!(cfg.base_seed, 7);
                assert!(!cfg.fix_reduction);
            },
        );
    }

    #[test]
    fn textual_false_values_disable() {
        with_env(&[("RANKTORCH_DETERMINISTIC", Some("off"))], || {
            let cfg = DeterminismConfig::from_env();
            assert!(!cfg.enabled);
        });
    }

    #[test]
    fn seeds_are_stable_per_label_and_distinct_across_labels() {
        with_env(
            &[
                ("RANKTORCH_DETERMINISTIC", Some("1")),
                ("RANKTORCH_DETERMINISTIC_SEED", Some("99")),
            ],
            || {
                let cfg = DeterminismConfig::from_env();
                assert_eq!(cfg.seed_for("conv"), cfg.seed_for("conv"));
                assert_ne!(cfg.seed_for("conv"), cfg.seed_for("contract"));
            },
        );
    }
}
