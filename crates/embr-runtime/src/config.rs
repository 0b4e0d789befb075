//! Runtime tuning: the GC knobs from `embr_gc::GcConfig`, plus the
//! instruction-count limit and GC tracing toggle the runtime layer adds
//! on top.

use embr_gc::GcConfig;

/// Tunables for a [`crate::Runtime`]. `Default` matches `GcConfig`'s
/// defaults with no instruction limit and tracing off.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Bytes the young generation may hold before a minor collection
    /// triggers.
    pub young_threshold: usize,
    /// Initial ceiling on total heap bytes.
    pub initial_heap_size: usize,
    /// Hard ceiling the heap will never grow past. `None` is unbounded.
    pub max_heap_size: Option<usize>,
    /// The "external instruction-count limit" a host imposes to get a
    /// cancellation point, since the VM itself exposes none. Checked
    /// between instructions by [`embr_vm::Vm`].
    pub instruction_limit: Option<u64>,
    /// Mirrors the `gc_logging` feature's runtime filter: when true, GC
    /// cycle summaries are emitted at `debug` (requires `embr-gc`'s
    /// `gc_logging` feature to actually be compiled in).
    pub trace_gc: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let gc = GcConfig::default();
        Self {
            young_threshold: gc.young_threshold,
            initial_heap_size: gc.initial_heap_size,
            max_heap_size: gc.max_heap_size,
            instruction_limit: None,
            trace_gc: false,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn gc_config(&self) -> GcConfig {
        GcConfig {
            young_threshold: self.young_threshold,
            initial_heap_size: self.initial_heap_size,
            max_heap_size: self.max_heap_size,
        }
    }

    /// Overlay `EMBR_YOUNG_THRESHOLD`, `EMBR_MAX_HEAP_BYTES`,
    /// `EMBR_INSTRUCTION_LIMIT`, and `EMBR_TRACE_GC` onto the defaults —
    /// the pattern the CLI uses to let a host tune the engine without a
    /// config file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parsed::<usize>("EMBR_YOUNG_THRESHOLD") {
            config.young_threshold = v;
        }
        if let Some(v) = env_parsed::<usize>("EMBR_MAX_HEAP_BYTES") {
            config.max_heap_size = Some(v);
        }
        if let Some(v) = env_parsed::<u64>("EMBR_INSTRUCTION_LIMIT") {
            config.instruction_limit = Some(v);
        }
        config.trace_gc = std::env::var("EMBR_TRACE_GC")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        config
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_gc_config_default() {
        let config = RuntimeConfig::default();
        let gc = GcConfig::default();
        assert_eq!(config.young_threshold, gc.young_threshold);
        assert_eq!(config.initial_heap_size, gc.initial_heap_size);
        assert_eq!(config.instruction_limit, None);
        assert!(!config.trace_gc);
    }
}
