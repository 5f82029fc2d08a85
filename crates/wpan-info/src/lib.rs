//! wpan-info: query IEEE 802.15.4 interfaces and radios over nl802154
//!
//! A [`BackendRegistry`] holds the available [`WpanBackend`]s. The nl802154
//! backend ([`Nl802154`]) resolves device names with a [`Resolver`], talks to
//! the kernel through a [`ControlChannel`] and decodes replies with the
//! schemas in [`nl802154`]. With the `mock` feature, [`sim::SimKernel`]
//! stands in for the kernel.

mod error;
pub use error::{ChannelError, QueryError};

pub mod nl802154;

mod types;
pub use types::*;

pub mod freq;
pub use freq::channel_to_mhz;

mod config;
pub use config::{
    config_path, load_config_file, load_optional, RadioSection, WirelessConfig,
    CONFIG_ENV, DEFAULT_CONFIG_PATH, DEVICE_KIND,
};

mod resolver;
pub use resolver::{DeviceRef, HostLookup, Resolver, SystemHost, RADIO_TYPE};

mod metrics;
pub use metrics::{ChannelMetrics, MetricsHub};

pub mod channel;
pub use channel::{ControlChannel, Exchange, Reply, Terminal};

mod backend;
pub use backend::{BackendRegistry, WpanBackend};

mod query;
pub use query::{encode_device, Nl802154, BACKEND_NAME};

#[cfg(feature = "mock")]
pub mod sim;

#[cfg(feature = "socket")]
impl BackendRegistry {
    /// The backends available on this host: nl802154 over a netlink socket.
    pub fn discover(resolver: Resolver, metrics: Option<&MetricsHub>) -> Self {
        let mut channel = ControlChannel::<genl_transport::GenlSocket>::new();
        if let Some(m) = metrics {
            channel = channel.with_metrics(m.channel.clone());
        }
        let mut reg = Self::new();
        reg.register(Box::new(Nl802154::new(channel, resolver)));
        reg
    }
}
