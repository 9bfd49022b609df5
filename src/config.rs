//! Runtime performance profile and environment options.
//!
//! The composer adapts its retry budgets and sweep widths to the machine
//! it runs on; hosts can override the detected profile.

/// Hardware hint driving quality bias, analysis sweep width, and the
/// holistic-loop pass budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimePerf {
    pub cores: usize,
    pub memory_gb: f64,
}

impl RuntimePerf {
    /// Detect from the current machine. Memory is not probed portably;
    /// assume a mid-tier 8 GB unless the host overrides it.
    pub fn detect() -> RuntimePerf {
        let cores = std::thread::available_parallelism().map_or(2, |n| n.get());
        RuntimePerf {
            cores,
            memory_gb: 8.0,
        }
    }

    pub fn is_low_tier(&self) -> bool {
        self.cores < 4 || self.memory_gb < 4.0
    }

    /// [0, 1] bias raising quality floors and retry budgets on beefier
    /// machines. 2 cores / 4 GB → 0.0, 8 cores / 20 GB → 1.0.
    pub fn quality_bias(&self) -> f64 {
        ((self.cores as f64 - 2.0) / 6.0 + (self.memory_gb - 4.0) / 16.0).clamp(0.0, 1.0)
    }

    /// Number of holistic rebalancing passes: 2 on low-tier runtimes,
    /// 3 otherwise.
    pub fn rebalance_passes(&self) -> usize {
        if self.is_low_tier() { 2 } else { 3 }
    }
}

/// Recognized environment options, read once per generate call.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenOptions {
    /// MAPGEN_MAX_ANALYSIS: widen onset sensitivity sweeps.
    pub max_analysis: bool,
    /// MAPGEN_DEBUG: per-stage timing logs at debug level.
    pub debug_timing: bool,
    /// MAPGEN_USE_WASM_ANALYZER: ask the host for its native analyzer
    /// (honored only on ≥4 cores / ≥4 GB).
    pub request_native_analyzer: bool,
}

impl GenOptions {
    pub fn from_env(perf: &RuntimePerf) -> GenOptions {
        let truthy = |k: &str| {
            std::env::var(k)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };
        GenOptions {
            max_analysis: truthy("MAPGEN_MAX_ANALYSIS"),
            debug_timing: truthy("MAPGEN_DEBUG"),
            request_native_analyzer: truthy("MAPGEN_USE_WASM_ANALYZER")
                && perf.cores >= 4
                && perf.memory_gb >= 4.0,
        }
    }

    /// Onset-detection sensitivities to sweep, widest first.
    pub fn sensitivity_sweep(&self) -> &'static [f64] {
        if self.max_analysis {
            &[0.85, 1.0, 1.15]
        } else {
            &[1.0]
        }
    }
}
