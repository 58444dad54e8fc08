//! Rendering scrape results in the OpenMetrics text format.

use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric};
use prometheus_client::metrics::counter::ConstCounter;
use prometheus_client::metrics::gauge::ConstGauge;
use prometheus_client::registry::Registry;

use crate::collector::{CollectorStats, Sample};
use crate::schema::build_fq_name;

/// Content type of the rendered exposition.
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Encodes the samples of one scrape as constant gauges.
#[derive(Debug)]
struct SampleCollector {
    samples: Vec<Sample>,
}

impl Collector for SampleCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
        for sample in &self.samples {
            let gauge = ConstGauge::new(sample.value);
            let mut metric_encoder = encoder.encode_descriptor(
                &sample.desc.name,
                sample.desc.help,
                None,
                gauge.metric_type(),
            )?;
            gauge.encode(metric_encoder.encode_family(&sample.desc.const_labels)?)?;
        }
        Ok(())
    }
}

/// Encodes the exporter's own scrape statistics.
#[derive(Debug)]
struct StatsCollector {
    namespace: String,
    stats: CollectorStats,
}

impl StatsCollector {
    fn name(&self, name: &str) -> String {
        build_fq_name(&self.namespace, "exporter", name)
    }
}

impl Collector for StatsCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
        // Counter names get their `_total` suffix from the encoder.
        let scrapes = ConstCounter::new(self.stats.scrapes);
        let name = self.name("scrapes");
        let metric_encoder = encoder.encode_descriptor(
            &name,
            "Total number of scrapes served.",
            None,
            scrapes.metric_type(),
        )?;
        scrapes.encode(metric_encoder)?;

        let failures = ConstCounter::new(self.stats.failures);
        let name = self.name("scrape_failures");
        let metric_encoder = encoder.encode_descriptor(
            &name,
            "Total number of scrapes where the php-fpm status query failed.",
            None,
            failures.metric_type(),
        )?;
        failures.encode(metric_encoder)?;

        let duration = ConstGauge::new(self.stats.last_duration.as_secs_f64());
        let name = self.name("last_scrape_duration_seconds");
        let metric_encoder = encoder.encode_descriptor(
            &name,
            "Duration of the most recent scrape in seconds.",
            None,
            duration.metric_type(),
        )?;
        duration.encode(metric_encoder)?;

        Ok(())
    }
}

/// Render the samples of one scrape plus the exporter statistics.
pub fn render(
    namespace: &str,
    samples: Vec<Sample>,
    stats: CollectorStats,
) -> Result<String, std::fmt::Error> {
    let mut registry = Registry::default();
    registry.register_collector(Box::new(SampleCollector { samples }));
    registry.register_collector(Box::new(StatsCollector {
        namespace: namespace.to_string(),
        stats,
    }));

    let mut output = String::new();
    prometheus_client::encoding::text::encode(&mut output, &registry)?;
    Ok(output)
}
