use crate::nl802154 as nl;
use crate::QueryError;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Budget for one list-valued result.
pub const LIST_BUFFER_BYTES: usize = 32 * 1024;

/// Maximum number of `T` entries a list result may hold.
pub const fn list_capacity<T>() -> usize {
    LIST_BUFFER_BYTES / std::mem::size_of::<T>()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpMode {
    Node,
    Monitor,
    Coordinator,
    Unknown,
}

impl OpMode {
    /// Missing, unspecified and unrecognised interface types are all unknown.
    pub fn from_iftype(iftype: Option<u32>) -> Self {
        match iftype {
            Some(nl::IFTYPE_NODE) => OpMode::Node,
            Some(nl::IFTYPE_MONITOR) => OpMode::Monitor,
            Some(nl::IFTYPE_COORD) => OpMode::Coordinator,
            _ => OpMode::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OpMode::Node => "Node",
            OpMode::Monitor => "Monitor",
            OpMode::Coordinator => "Coordinator",
            OpMode::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CcaMode {
    Energy,
    Carrier,
    EnergyCarrier,
    Aloha,
    UwbShr,
    UwbMultiplexed,
    Other(u32),
}

impl CcaMode {
    pub fn from_raw(v: u32) -> Self {
        match v {
            nl::CCA_ENERGY => CcaMode::Energy,
            nl::CCA_CARRIER => CcaMode::Carrier,
            nl::CCA_ENERGY_CARRIER => CcaMode::EnergyCarrier,
            nl::CCA_ALOHA => CcaMode::Aloha,
            nl::CCA_UWB_SHR => CcaMode::UwbShr,
            nl::CCA_UWB_MULTIPLEXED => CcaMode::UwbMultiplexed,
            other => CcaMode::Other(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            CcaMode::Energy => nl::CCA_ENERGY,
            CcaMode::Carrier => nl::CCA_CARRIER,
            CcaMode::EnergyCarrier => nl::CCA_ENERGY_CARRIER,
            CcaMode::Aloha => nl::CCA_ALOHA,
            CcaMode::UwbShr => nl::CCA_UWB_SHR,
            CcaMode::UwbMultiplexed => nl::CCA_UWB_MULTIPLEXED,
            CcaMode::Other(v) => v,
        }
    }

    pub fn description(self) -> Option<&'static str> {
        match self {
            CcaMode::Energy => Some("Energy above threshold"),
            CcaMode::Carrier => Some("Carrier sense only"),
            CcaMode::EnergyCarrier => Some("Carrier sense with energy above threshold"),
            CcaMode::Aloha => Some("ALOHA"),
            CcaMode::UwbShr => Some("UWB preamble sense based on SHR"),
            CcaMode::UwbMultiplexed => Some("UWB preamble sense based on packet with multiplexed preamble"),
            CcaMode::Other(_) => None,
        }
    }
}

/// How energy and carrier sense combine in `EnergyCarrier` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CcaOpt {
    And,
    Or,
    Other(u32),
}

impl CcaOpt {
    pub fn from_raw(v: u32) -> Self {
        match v {
            nl::CCA_OPT_ENERGY_CARRIER_AND => CcaOpt::And,
            nl::CCA_OPT_ENERGY_CARRIER_OR => CcaOpt::Or,
            other => CcaOpt::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPowerEntry {
    pub dbm: i32,
    pub mw: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CcaEdLevelEntry {
    pub dbm: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreqEntry {
    pub page: u8,
    pub channel: u8,
    /// 0.0 when the page / channel pair has no defined frequency.
    pub mhz: f32,
}

/// Every scalar property of one device; `None` where the query failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device: String,
    pub backend: String,
    pub phy_name: Option<String>,
    pub mode: OpMode,
    pub tx_power_dbm: Option<i32>,
    pub page: Option<u8>,
    pub channel: Option<u8>,
    pub frequency_mhz: Option<f32>,
    pub pan_id: Option<u16>,
    pub short_address: Option<u16>,
    pub extended_address: Option<u64>,
    pub min_be: Option<u8>,
    pub max_be: Option<u8>,
    pub csma_backoffs: Option<u8>,
    pub frame_retries: Option<i8>,
    pub lbt_mode: Option<bool>,
    pub cca_mode: Option<CcaMode>,
    pub cca_opt: Option<CcaOpt>,
    #[serde(with = "time::serde::rfc3339")]
    pub queried_at: OffsetDateTime,
}

/// Values a flattened accessor reports when the property is unavailable.
pub mod unavailable {
    pub const CHANNEL: i32 = 0;
    pub const FREQUENCY: i32 = 0;
    pub const TX_POWER: i32 = i32::MIN;
    pub const PAGE: i32 = -1;
    pub const BE: i32 = -1;
    pub const CSMA_BACKOFFS: i32 = -1;
    pub const FRAME_RETRIES: i32 = -1;
    pub const LBT_MODE: i32 = -1;
    pub const CCA: i32 = -1;
    pub const PAN_ID: u16 = 0;
    pub const SHORT_ADDR: u16 = 0;
    pub const EXTENDED_ADDR: u64 = 0;
}

/// Collapse a query result into a plain value, using `sentinel` on failure.
pub fn or_sentinel<T, U>(result: Result<T, QueryError>, sentinel: U) -> U
where
    T: Into<U>,
{
    result.map(Into::into).unwrap_or(sentinel)
}
