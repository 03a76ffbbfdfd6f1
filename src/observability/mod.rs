// Observability: metrics catalog and exporter setup

pub mod metrics;
