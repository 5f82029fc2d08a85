use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Counters updated by a [`ControlChannel`](crate::ControlChannel).
#[derive(Clone)]
pub struct ChannelMetrics {
    pub requests_sent: IntCounter,
    pub replies_received: IntCounter,
    pub protocol_errors: IntCounter,
    pub init_failures: IntCounter,
    pub open_channels: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub channel: ChannelMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let init = |e: prometheus::Error| format!("metrics init error: {e}");
        let channel = ChannelMetrics {
            requests_sent: IntCounter::new(
                "iwpan_nl_requests_sent",
                "Total nl802154 requests sent",
            )
            .map_err(init)?,
            replies_received: IntCounter::new(
                "iwpan_nl_replies_received",
                "Total nl802154 data replies received",
            )
            .map_err(init)?,
            protocol_errors: IntCounter::new(
                "iwpan_nl_protocol_errors",
                "Requests answered with a kernel error code",
            )
            .map_err(init)?,
            init_failures: IntCounter::new(
                "iwpan_channel_init_failures",
                "Failed attempts to open the control channel",
            )
            .map_err(init)?,
            open_channels: IntGauge::new("iwpan_channels_open", "Open control channels")
                .map_err(init)?,
        };
        let _ = registry.register(Box::new(channel.requests_sent.clone()));
        let _ = registry.register(Box::new(channel.replies_received.clone()));
        let _ = registry.register(Box::new(channel.protocol_errors.clone()));
        let _ = registry.register(Box::new(channel.init_failures.clone()));
        let _ = registry.register(Box::new(channel.open_channels.clone()));
        Ok(Self { registry, channel })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_lists_channel_counters() {
        let hub = MetricsHub::new().unwrap();
        hub.channel.requests_sent.inc_by(3);
        let text = hub.encode_text();
        assert!(text.contains("iwpan_nl_requests_sent 3"));
        assert!(text.contains("iwpan_channels_open 0"));
    }
}
