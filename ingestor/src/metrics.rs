use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref UPDATES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_updates_total",
        "Total tracker updates received"
    ))
    .unwrap();
    pub static ref ACCEPTED_UPDATES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_accepted_updates_total",
        "Total tracker updates accepted after validation"
    ))
    .unwrap();
    pub static ref REJECTED_UPDATES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_rejected_updates_total",
        "Total tracker updates rejected"
    ))
    .unwrap();
    pub static ref UPDATES_WITHOUT_FIX_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_updates_without_fix_total",
        "Accepted updates that carried no position fix"
    ))
    .unwrap();
    pub static ref TRACKERS_KNOWN: Gauge = Gauge::with_opts(Opts::new(
        "ingestor_trackers_known",
        "Number of distinct trackers seen"
    ))
    .unwrap();
    pub static ref BATTERY_LEVEL: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_reported_battery_level",
            "Battery level reported by trackers, in percent"
        )
        .buckets(vec![5.0, 10.0, 20.0, 40.0, 60.0, 80.0, 100.0])
    )
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY.register(Box::new(UPDATES_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(ACCEPTED_UPDATES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(REJECTED_UPDATES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(UPDATES_WITHOUT_FIX_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(TRACKERS_KNOWN.clone())).unwrap();
    REGISTRY.register(Box::new(BATTERY_LEVEL.clone())).unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# failed to encode metrics: {}\n", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
