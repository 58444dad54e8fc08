//! Fixed metric schema derived from the status page fields.

use std::sync::Arc;

use crate::status::StatusFields;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "phpfpm";

/// Name of the constant label attached to every metric.
pub const APP_LABEL: &str = "app";

/// Value of the constant [`APP_LABEL`] label.
pub const APP_NAME: &str = "php-fpm";

/// Whether `namespace` is a valid metric name prefix,
/// `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_namespace(namespace: &str) -> bool {
    let mut chars = namespace.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == ':' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        }
        _ => false,
    }
}

/// Map a namespace onto the metric name alphabet.
fn namespace_prefix(namespace: &str) -> String {
    let mut prefix: String = namespace
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == ':' { c } else { '_' })
        .collect();
    if prefix.starts_with(|c: char| c.is_ascii_digit()) {
        prefix.insert(0, '_');
    }
    prefix
}

/// Join non-empty name parts with underscores.
///
/// Format: `{namespace}_{subsystem}_{name}`
pub fn build_fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

/// A status page field exported as a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusMetric {
    AcceptedConn,
    ListenQueue,
    MaxListenQueue,
    ListenQueueLen,
    IdleProcesses,
    ActiveProcesses,
    TotalProcesses,
    MaxActiveProcesses,
    MaxChildrenReached,
    SlowRequests,
}

impl StatusMetric {
    /// All exported fields, in emission order.
    pub const ALL: [StatusMetric; 10] = [
        StatusMetric::AcceptedConn,
        StatusMetric::ListenQueue,
        StatusMetric::MaxListenQueue,
        StatusMetric::ListenQueueLen,
        StatusMetric::IdleProcesses,
        StatusMetric::ActiveProcesses,
        StatusMetric::TotalProcesses,
        StatusMetric::MaxActiveProcesses,
        StatusMetric::MaxChildrenReached,
        StatusMetric::SlowRequests,
    ];

    /// Metric name suffix appended to the namespace.
    pub fn suffix(&self) -> &'static str {
        match self {
            StatusMetric::AcceptedConn => "accepted_conn",
            StatusMetric::ListenQueue => "listen_queue",
            StatusMetric::MaxListenQueue => "max_listen_queue",
            StatusMetric::ListenQueueLen => "listen_queue_len",
            StatusMetric::IdleProcesses => "idle_processes",
            StatusMetric::ActiveProcesses => "active_processes",
            StatusMetric::TotalProcesses => "total_processes",
            StatusMetric::MaxActiveProcesses => "max_active_processes",
            StatusMetric::MaxChildrenReached => "max_children_reached",
            StatusMetric::SlowRequests => "slow_requests",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            StatusMetric::AcceptedConn => "The number of requests accepted by the pool.",
            StatusMetric::ListenQueue => {
                "The number of requests in the queue of pending connections."
            }
            StatusMetric::MaxListenQueue => {
                "The maximum number of requests in the queue of pending connections since FPM has started."
            }
            StatusMetric::ListenQueueLen => "The size of the socket queue of pending connections.",
            StatusMetric::IdleProcesses => "The number of idle processes.",
            StatusMetric::ActiveProcesses => "The number of active processes.",
            StatusMetric::TotalProcesses => "The number of idle + active processes.",
            StatusMetric::MaxActiveProcesses => {
                "The maximum number of active processes since FPM has started."
            }
            StatusMetric::MaxChildrenReached => {
                "The number of times the process limit has been reached when pm tries to start more children (works only for pm 'dynamic' and 'ondemand')."
            }
            StatusMetric::SlowRequests => {
                "The number of requests that exceeded the 'request_slowlog_timeout' value."
            }
        }
    }

    /// Read this field from a status snapshot.
    pub fn value(&self, fields: &StatusFields) -> i64 {
        match self {
            StatusMetric::AcceptedConn => fields.accepted_conn,
            StatusMetric::ListenQueue => fields.listen_queue,
            StatusMetric::MaxListenQueue => fields.max_listen_queue,
            StatusMetric::ListenQueueLen => fields.listen_queue_len,
            StatusMetric::IdleProcesses => fields.idle_processes,
            StatusMetric::ActiveProcesses => fields.active_processes,
            StatusMetric::TotalProcesses => fields.total_processes,
            StatusMetric::MaxActiveProcesses => fields.max_active_processes,
            StatusMetric::MaxChildrenReached => fields.max_children_reached,
            StatusMetric::SlowRequests => fields.slow_requests,
        }
    }
}

/// Descriptor of one metric: name, help text and constant labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDesc {
    pub name: String,
    pub help: &'static str,
    pub const_labels: Vec<(String, String)>,
}

impl MetricDesc {
    fn new(name: String, help: &'static str) -> Self {
        Self {
            name,
            help,
            const_labels: vec![(APP_LABEL.to_string(), APP_NAME.to_string())],
        }
    }

    /// Names of the labels carried by this metric.
    pub fn label_names(&self) -> impl Iterator<Item = &str> {
        self.const_labels.iter().map(|(k, _)| k.as_str())
    }
}

/// The ordered set of descriptors a collector can emit.
///
/// The `up` descriptor comes first, followed by one descriptor per
/// [`StatusMetric`] in [`StatusMetric::ALL`] order.
#[derive(Debug, Clone)]
pub struct MetricSchema {
    namespace: String,
    up: Arc<MetricDesc>,
    fields: Vec<(StatusMetric, Arc<MetricDesc>)>,
}

impl MetricSchema {
    /// Build the schema for a namespace.
    ///
    /// An empty namespace yields unprefixed names. Characters outside the
    /// metric name alphabet become `_`.
    pub fn new(namespace: &str) -> Self {
        let namespace = namespace_prefix(namespace);

        let up = Arc::new(MetricDesc::new(
            build_fq_name(&namespace, "", "up"),
            "php-fpm status (1 = up, 0 = down).",
        ));

        let fields = StatusMetric::ALL
            .iter()
            .map(|metric| {
                let desc = MetricDesc::new(
                    build_fq_name(&namespace, "", metric.suffix()),
                    metric.help(),
                );
                (*metric, Arc::new(desc))
            })
            .collect();

        Self {
            namespace,
            up,
            fields,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Descriptor of the up indicator.
    pub fn up(&self) -> &Arc<MetricDesc> {
        &self.up
    }

    /// Field descriptors in emission order.
    pub fn fields(&self) -> impl Iterator<Item = (StatusMetric, &Arc<MetricDesc>)> {
        self.fields.iter().map(|(metric, desc)| (*metric, desc))
    }

    /// All descriptors, `up` first.
    pub fn descriptors(&self) -> impl Iterator<Item = &MetricDesc> {
        std::iter::once(self.up.as_ref()).chain(self.fields.iter().map(|(_, desc)| desc.as_ref()))
    }

    /// Number of descriptors, including `up`.
    pub fn descriptor_count(&self) -> usize {
        self.fields.len() + 1
    }
}
