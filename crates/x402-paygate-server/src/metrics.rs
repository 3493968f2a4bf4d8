use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Request counters
pub static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("paygate_requests_total", "Total HTTP requests to priced routes"),
        &["endpoint", "status"],
    )
    .unwrap()
});

// Verification outcomes, labelled accepted / pending / <reject reason>
pub static VERIFICATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "paygate_verifications_total",
            "Payment verification results",
        ),
        &["result"],
    )
    .unwrap()
});

pub static VERIFICATION_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "paygate_verification_latency_seconds",
            "Time spent verifying a payment proof",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0]),
    )
    .unwrap()
});

// Confirmation checks against the facilitator, by answer
pub static CONFIRMATION_CHECKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "paygate_confirmation_checks_total",
            "Settlement confirmation checks by answer",
        ),
        &["answer"],
    )
    .unwrap()
});

pub static STORE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "paygate_store_failures_total",
        "Requests refused because the settlement store failed",
    )
    .unwrap()
});

static REGISTER: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: [Box<dyn prometheus::core::Collector>; 5] = [
            Box::new(REQUESTS_TOTAL.clone()),
            Box::new(VERIFICATIONS_TOTAL.clone()),
            Box::new(VERIFICATION_LATENCY.clone()),
            Box::new(CONFIRMATION_CHECKS.clone()),
            Box::new(STORE_FAILURES.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::error!("failed to register metric: {}", e);
            }
        }
    });
}

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_metrics_are_exported() {
        register_metrics();
        register_metrics();
        VERIFICATIONS_TOTAL.with_label_values(&["accepted"]).inc();

        let output = metrics_output();
        assert!(output.contains("paygate_verifications_total"));
        assert!(output.contains("result=\"accepted\""));
    }
}
