//! Collector turning one status query into one metric snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{Instrument, Span, debug, error, info_span, warn};

use crate::schema::{MetricDesc, MetricSchema};
use crate::status::{FastCgiQuerier, StatusFields, StatusQuerier, StatusRequest};
use crate::target::Target;

/// State of the target as seen by the latest scrape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TargetHealth {
    Up,
    #[default]
    Down,
}

impl TargetHealth {
    /// Gauge value of the up indicator.
    pub fn value(&self) -> f64 {
        match self {
            TargetHealth::Up => 1.0,
            TargetHealth::Down => 0.0,
        }
    }
}

/// One metric value produced by a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub desc: Arc<MetricDesc>,
    pub value: f64,
}

impl Sample {
    pub fn name(&self) -> &str {
        &self.desc.name
    }
}

/// Map a status snapshot onto the schema.
///
/// Produces the up indicator at 1 followed by one sample per field, in
/// schema order.
pub fn map_fields(schema: &MetricSchema, fields: &StatusFields) -> Vec<Sample> {
    let mut samples = Vec::with_capacity(schema.descriptor_count());
    samples.push(Sample {
        desc: schema.up().clone(),
        value: TargetHealth::Up.value(),
    });
    for (metric, desc) in schema.fields() {
        samples.push(Sample {
            desc: desc.clone(),
            value: metric.value(fields) as f64,
        });
    }
    samples
}

/// Scrape bookkeeping exposed as exporter self-metrics.
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    /// Total scrapes served.
    pub scrapes: u64,
    /// Scrapes where the target was down.
    pub failures: u64,
    /// Wall time of the latest scrape.
    pub last_duration: Duration,
    /// Health observed by the latest scrape, `None` before the first one.
    pub last_health: Option<TargetHealth>,
}

/// Outcome of one scrape.
#[derive(Debug, Clone)]
pub struct Scrape {
    pub samples: Vec<Sample>,
    /// Statistics as recorded by this scrape.
    pub stats: CollectorStats,
}

/// Polls one php-fpm target on demand.
///
/// Scrapes are serialized: the up indicator lock is held for the whole
/// query, so at most one upstream request is in flight per collector.
pub struct MetricCollector<Q = FastCgiQuerier> {
    schema: MetricSchema,
    request: StatusRequest,
    querier: Q,
    up: Mutex<TargetHealth>,
    stats: RwLock<CollectorStats>,
    span: Span,
}

/// Create a shareable collector handle.
pub type SharedCollector<Q = FastCgiQuerier> = Arc<MetricCollector<Q>>;

impl MetricCollector<FastCgiQuerier> {
    /// Create a collector that queries `target` over FastCGI.
    pub fn new(namespace: &str, target: Target) -> Self {
        Self::with_querier(namespace, target, FastCgiQuerier::new())
    }
}

impl<Q: StatusQuerier> MetricCollector<Q> {
    /// Create a collector with a custom querier.
    pub fn with_querier(namespace: &str, target: Target, querier: Q) -> Self {
        let span = info_span!("fpm_collector", target = %target);
        Self {
            schema: MetricSchema::new(namespace),
            request: StatusRequest::new(target),
            querier,
            up: Mutex::new(TargetHealth::Down),
            stats: RwLock::new(CollectorStats::default()),
            span,
        }
    }

    /// Replace the span that query logs are recorded under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Every descriptor this collector can emit, regardless of target state.
    pub fn describe(&self) -> impl Iterator<Item = &MetricDesc> {
        self.schema.descriptors()
    }

    /// Query the target once and return the resulting samples.
    ///
    /// Never fails: an unreachable or misbehaving target yields the single
    /// sample `up = 0`. The query runs on its own task, so dropping the
    /// returned future does not abort an exchange already in progress; it
    /// finishes within the target timeout and is still recorded.
    pub async fn collect(self: &Arc<Self>) -> Scrape {
        let collector = Arc::clone(self);
        match tokio::spawn(async move { collector.scrape().await }).await {
            Ok(scrape) => scrape,
            Err(e) => {
                error!(parent: &self.span, error = %e, "Scrape task failed");
                Scrape {
                    samples: vec![self.down_sample()],
                    stats: self.stats(),
                }
            }
        }
    }

    async fn scrape(&self) -> Scrape {
        let mut up = self.up.lock().await;
        let started = Instant::now();

        let result = self
            .querier
            .query(&self.request)
            .instrument(self.span.clone())
            .await;

        let samples = match result {
            Ok(fields) => {
                *up = TargetHealth::Up;
                debug!(
                    parent: &self.span,
                    pool = %fields.pool,
                    process_manager = %fields.process_manager,
                    start_since = fields.start_since,
                    "Status query succeeded"
                );
                map_fields(&self.schema, &fields)
            }
            Err(e) => {
                *up = TargetHealth::Down;
                warn!(
                    parent: &self.span,
                    kind = e.kind().as_str(),
                    error = %e,
                    "Status query failed"
                );
                vec![self.down_sample()]
            }
        };

        let stats = self.record_scrape(*up, started.elapsed());
        Scrape { samples, stats }
    }

    fn down_sample(&self) -> Sample {
        Sample {
            desc: self.schema.up().clone(),
            value: TargetHealth::Down.value(),
        }
    }

    fn record_scrape(&self, health: TargetHealth, duration: Duration) -> CollectorStats {
        let mut stats = self.stats.write();
        stats.scrapes += 1;
        if health == TargetHealth::Down {
            stats.failures += 1;
        }
        stats.last_duration = duration;
        stats.last_health = Some(health);
        stats.clone()
    }

    pub fn schema(&self) -> &MetricSchema {
        &self.schema
    }

    pub fn target(&self) -> &Target {
        self.request.target()
    }

    /// Get collector statistics.
    pub fn stats(&self) -> CollectorStats {
        self.stats.read().clone()
    }
}
