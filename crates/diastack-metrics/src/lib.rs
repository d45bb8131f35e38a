use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

/// Stack-wide counters, owned by one registry per stack instance
#[derive(Clone)]
pub struct StackMetrics {
    registry: Registry,
    pub messages_received: IntCounter,
    pub messages_sent: IntCounter,
    pub framing_errors: IntCounter,
    pub routing_failures: IntCounter,
    pub handshake_failures: IntCounter,
    pub transaction_timeouts: IntCounter,
    pub open_peers: IntGauge,
    pub transaction_seconds: Histogram,
}

impl StackMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new_custom(Some("diastack".to_string()), None)?)
    }

    /// Register into an existing registry (e.g. one shared with the process)
    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let metrics = Self {
            messages_received: IntCounter::with_opts(Opts::new(
                "messages_received_total",
                "Diameter messages decoded from peers",
            ))?,
            messages_sent: IntCounter::with_opts(Opts::new(
                "messages_sent_total",
                "Diameter messages written to peers",
            ))?,
            framing_errors: IntCounter::with_opts(Opts::new(
                "framing_errors_total",
                "Inbound frames that failed to decode",
            ))?,
            routing_failures: IntCounter::with_opts(Opts::new(
                "routing_failures_total",
                "Outbound messages with no eligible peer",
            ))?,
            handshake_failures: IntCounter::with_opts(Opts::new(
                "capability_exchange_failures_total",
                "Failed capabilities exchanges",
            ))?,
            transaction_timeouts: IntCounter::with_opts(Opts::new(
                "transaction_timeouts_total",
                "Requests that got no answer in time",
            ))?,
            open_peers: IntGauge::with_opts(Opts::new("open_peers", "Peers in the Open state"))?,
            transaction_seconds: Histogram::with_opts(
                HistogramOpts::new("transaction_seconds", "Request to answer latency in seconds")
                    .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            )?,
            registry,
        };

        metrics.registry.register(Box::new(metrics.messages_received.clone()))?;
        metrics.registry.register(Box::new(metrics.messages_sent.clone()))?;
        metrics.registry.register(Box::new(metrics.framing_errors.clone()))?;
        metrics.registry.register(Box::new(metrics.routing_failures.clone()))?;
        metrics.registry.register(Box::new(metrics.handshake_failures.clone()))?;
        metrics.registry.register(Box::new(metrics.transaction_timeouts.clone()))?;
        metrics.registry.register(Box::new(metrics.open_peers.clone()))?;
        metrics.registry.register(Box::new(metrics.transaction_seconds.clone()))?;

        Ok(metrics)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Gather metrics in Prometheus text format
    pub fn gather(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for StackMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackMetrics")
            .field("messages_received", &self.messages_received.get())
            .field("messages_sent", &self.messages_sent.get())
            .field("open_peers", &self.open_peers.get())
            .finish_non_exhaustive()
    }
}
