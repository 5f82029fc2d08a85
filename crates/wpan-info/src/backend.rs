use crate::types::{
    CcaEdLevelEntry, CcaMode, CcaOpt, DeviceInfo, FreqEntry, OpMode, TxPowerEntry,
};
use crate::QueryError;
use time::OffsetDateTime;
use tracing::debug;

/// One way of querying 802.15.4 devices. Every accessor takes the device
/// identifier as given by the user and fails per property.
pub trait WpanBackend {
    fn name(&self) -> &'static str;

    /// Whether this backend can talk to `dev`.
    fn probe(&mut self, dev: &str) -> bool;

    fn mode(&mut self, dev: &str) -> Result<OpMode, QueryError>;
    fn channel(&mut self, dev: &str) -> Result<u8, QueryError>;
    /// Centre frequency in MHz.
    fn frequency(&mut self, dev: &str) -> Result<f32, QueryError>;
    /// Transmit power in dBm.
    fn txpower(&mut self, dev: &str) -> Result<i32, QueryError>;
    fn phyname(&mut self, dev: &str) -> Result<String, QueryError>;
    fn txpower_list(&mut self, dev: &str) -> Result<Vec<TxPowerEntry>, QueryError>;
    fn frequency_list(&mut self, dev: &str) -> Result<Vec<FreqEntry>, QueryError>;
    fn cca_ed_level_list(&mut self, dev: &str) -> Result<Vec<CcaEdLevelEntry>, QueryError>;
    /// Phy name (`phy<N>`) for a configuration section.
    fn lookup_phy(&mut self, section: &str) -> Result<String, QueryError> {
        let _ = section;
        Err(QueryError::Unsupported("phy lookup"))
    }
    fn pan_id(&mut self, dev: &str) -> Result<u16, QueryError>;
    fn short_address(&mut self, dev: &str) -> Result<u16, QueryError>;
    fn extended_address(&mut self, dev: &str) -> Result<u64, QueryError>;
    fn page(&mut self, dev: &str) -> Result<u8, QueryError>;
    fn min_be(&mut self, dev: &str) -> Result<u8, QueryError>;
    fn max_be(&mut self, dev: &str) -> Result<u8, QueryError>;
    fn csma_backoffs(&mut self, dev: &str) -> Result<u8, QueryError>;
    fn frame_retries(&mut self, dev: &str) -> Result<i8, QueryError>;
    fn lbt_mode(&mut self, dev: &str) -> Result<bool, QueryError>;
    fn cca_mode(&mut self, dev: &str) -> Result<CcaMode, QueryError>;
    fn cca_opt(&mut self, dev: &str) -> Result<CcaOpt, QueryError>;

    /// Release whatever the backend holds open.
    fn close(&mut self);

    /// Every scalar property; a failing property is left empty.
    fn info(&mut self, dev: &str) -> DeviceInfo {
        DeviceInfo {
            device: dev.to_owned(),
            backend: self.name().to_owned(),
            phy_name: self.phyname(dev).ok(),
            mode: self.mode(dev).unwrap_or(OpMode::Unknown),
            tx_power_dbm: self.txpower(dev).ok(),
            page: self.page(dev).ok(),
            channel: self.channel(dev).ok(),
            frequency_mhz: self.frequency(dev).ok(),
            pan_id: self.pan_id(dev).ok(),
            short_address: self.short_address(dev).ok(),
            extended_address: self.extended_address(dev).ok(),
            min_be: self.min_be(dev).ok(),
            max_be: self.max_be(dev).ok(),
            csma_backoffs: self.csma_backoffs(dev).ok(),
            frame_retries: self.frame_retries(dev).ok(),
            lbt_mode: self.lbt_mode(dev).ok(),
            cca_mode: self.cca_mode(dev).ok(),
            cca_opt: self.cca_opt(dev).ok(),
            queried_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Backends known to this process, tried in registration order.
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<Box<dyn WpanBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Box<dyn WpanBackend>) {
        debug!(backend = backend.name(), "backend registered");
        self.backends.push(backend);
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// The first backend that recognises `dev`.
    pub fn probe(&mut self, dev: &str) -> Option<&mut (dyn WpanBackend + 'static)> {
        for backend in self.backends.iter_mut() {
            if backend.probe(dev) {
                debug!(dev, backend = backend.name(), "backend selected");
                return Some(&mut **backend);
            }
        }
        None
    }

    /// Name of the backend that handles `dev`.
    pub fn type_of(&mut self, dev: &str) -> Option<&'static str> {
        self.probe(dev).map(|b| b.name())
    }

    pub fn by_name(&mut self, name: &str) -> Option<&mut (dyn WpanBackend + 'static)> {
        self.backends
            .iter_mut()
            .find(|b| b.name() == name)
            .map(|b| b.as_mut())
    }

    /// Close every backend.
    pub fn finish(&mut self) {
        for backend in self.backends.iter_mut() {
            backend.close();
        }
    }
}

impl Drop for BackendRegistry {
    fn drop(&mut self) {
        self.finish();
    }
}
