//! Text rendering for `iwpaninfo` output.

use std::fmt::Write as _;
use wpan_info::{CcaEdLevelEntry, CcaMode, CcaOpt, DeviceInfo, FreqEntry, TxPowerEntry};

const UNKNOWN: &str = "unknown";

pub fn channel(ch: Option<u8>) -> String {
    match ch {
        Some(ch) if ch > 0 => ch.to_string(),
        _ => UNKNOWN.to_owned(),
    }
}

/// MHz shown as GHz with three decimals.
pub fn frequency(mhz: Option<f32>) -> String {
    match mhz {
        Some(mhz) if mhz > 0.0 => format!("{:.3} GHz", mhz / 1000.0),
        _ => UNKNOWN.to_owned(),
    }
}

pub fn txpower(dbm: Option<i32>) -> String {
    match dbm {
        Some(dbm) if dbm >= -99 => format!("{dbm} dBm"),
        _ => UNKNOWN.to_owned(),
    }
}

fn number<N: ToString>(v: Option<N>) -> String {
    v.map_or_else(|| UNKNOWN.to_owned(), |v| v.to_string())
}

fn hex16(v: Option<u16>) -> String {
    v.map_or_else(|| UNKNOWN.to_owned(), |v| format!("0x{v:04x}"))
}

fn hex64(v: Option<u64>) -> String {
    v.map_or_else(|| UNKNOWN.to_owned(), |v| format!("0x{v:016x}"))
}

pub fn cca_mode(mode: Option<CcaMode>) -> String {
    match mode {
        None => UNKNOWN.to_owned(),
        Some(m) => match m.description() {
            Some(desc) => format!("{} ({desc})", m.raw()),
            None => m.raw().to_string(),
        },
    }
}

pub fn cca_opt(opt: Option<CcaOpt>) -> String {
    match opt {
        None => UNKNOWN.to_owned(),
        Some(CcaOpt::And) => "logical operator is 'and' ".to_owned(),
        Some(CcaOpt::Or) => "logical operator is 'or' ".to_owned(),
        Some(CcaOpt::Other(v)) => v.to_string(),
    }
}

/// Whole MHz unless the band plan has a fractional centre.
fn mhz(v: f32) -> String {
    if v.fract() == 0.0 {
        format!("{v:5.0}")
    } else {
        format!("{v:5.1}")
    }
}

pub fn info(info: &DeviceInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<9} ", info.device);
    let _ = writeln!(
        out,
        "\tPhy Name: {} ",
        info.phy_name.as_deref().unwrap_or("?")
    );
    let _ = writeln!(out, "\tMode: {} ", info.mode.name());
    let _ = writeln!(out, "\tTx-Power: {}  ", txpower(info.tx_power_dbm));
    let _ = writeln!(out, "\tPage: {}  ", number(info.page));
    let _ = writeln!(
        out,
        "\tChannel: {} ({}) ",
        channel(info.channel),
        frequency(info.frequency_mhz)
    );
    let _ = writeln!(out, "\tPAN ID: {}", hex16(info.pan_id));
    let _ = writeln!(out, "\tShort Address: {}", hex16(info.short_address));
    let _ = writeln!(out, "\tExtended Address: {}", hex64(info.extended_address));
    let _ = writeln!(out, "\tMin be: {}", number(info.min_be));
    let _ = writeln!(out, "\tMax be: {}", number(info.max_be));
    let _ = writeln!(out, "\tCSMA Backoff: {}", number(info.csma_backoffs));
    let _ = writeln!(out, "\tFrame Retry: {}", number(info.frame_retries));
    let _ = writeln!(out, "\tLBT Mode: {}", number(info.lbt_mode));
    let _ = writeln!(out, "\tCCA Mode: {}", cca_mode(info.cca_mode));
    let _ = writeln!(out, "\tCCA OPT: {}", cca_opt(info.cca_opt));
    out
}

pub fn txpower_list(list: &[TxPowerEntry]) -> String {
    if list.is_empty() {
        return "No TX power information available\n".to_owned();
    }
    list.iter().map(|e| format!("{} dBm \n", e.dbm)).collect()
}

pub fn cca_ed_level_list(list: &[CcaEdLevelEntry]) -> String {
    if list.is_empty() {
        return "No CCA ED level information available\n".to_owned();
    }
    list.iter().map(|e| format!("{} dBm \n", e.dbm)).collect()
}

/// One line per supported channel; the active one is starred.
pub fn freq_list(list: &[FreqEntry], page: Option<u8>, current: Option<u8>) -> String {
    if list.is_empty() {
        return "No frequency information available\n".to_owned();
    }
    list.iter()
        .map(|e| {
            let active = current == Some(e.channel) && page.map_or(true, |p| p == e.page);
            format!(
                "{} {} MHz (Channel {}) \n",
                if active { "*" } else { " " },
                mhz(e.mhz),
                channel(Some(e.channel))
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use wpan_info::OpMode;

    fn sample() -> DeviceInfo {
        DeviceInfo {
            device: "wpan0".into(),
            backend: "nl802154".into(),
            phy_name: Some("wpan-phy0".into()),
            mode: OpMode::Node,
            tx_power_dbm: Some(3),
            page: Some(0),
            channel: Some(11),
            frequency_mhz: Some(2405.0),
            pan_id: Some(0xbeef),
            short_address: Some(0x1),
            extended_address: Some(0x0011_2233_4455_6677),
            min_be: Some(3),
            max_be: Some(5),
            csma_backoffs: Some(4),
            frame_retries: Some(-1),
            lbt_mode: Some(false),
            cca_mode: Some(CcaMode::Energy),
            cca_opt: Some(CcaOpt::Or),
            queried_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn scalar_rules() {
        assert_eq!(channel(Some(0)), "unknown");
        assert_eq!(channel(Some(26)), "26");
        assert_eq!(frequency(Some(2405.0)), "2.405 GHz");
        assert_eq!(frequency(None), "unknown");
        assert_eq!(txpower(Some(-100)), "unknown");
        assert_eq!(txpower(Some(-99)), "-99 dBm");
        assert_eq!(cca_mode(Some(CcaMode::Carrier)), "2 (Carrier sense only)");
        assert_eq!(cca_mode(Some(CcaMode::Other(9))), "9");
    }

    #[test]
    fn info_block() {
        let text = info(&sample());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "wpan0     ");
        assert_eq!(lines[1], "\tPhy Name: wpan-phy0 ");
        assert_eq!(lines[5], "\tChannel: 11 (2.405 GHz) ");
        assert_eq!(lines[6], "\tPAN ID: 0xbeef");
        assert_eq!(lines[7], "\tShort Address: 0x0001");
        assert_eq!(lines[8], "\tExtended Address: 0x0011223344556677");
        assert_eq!(lines[12], "\tFrame Retry: -1");
        assert_eq!(lines[13], "\tLBT Mode: false");
        assert_eq!(lines[15], "\tCCA OPT: logical operator is 'or' ");
    }

    #[test]
    fn missing_values_print_unknown() {
        let mut i = sample();
        i.phy_name = None;
        i.pan_id = None;
        i.tx_power_dbm = None;
        let text = info(&i);
        assert!(text.contains("\tPhy Name: ? \n"));
        assert!(text.contains("\tPAN ID: unknown\n"));
        assert!(text.contains("\tTx-Power: unknown  \n"));
    }

    #[test]
    fn lists() {
        assert_eq!(txpower_list(&[]), "No TX power information available\n");
        assert_eq!(
            cca_ed_level_list(&[CcaEdLevelEntry { dbm: -91 }]),
            "-91 dBm \n"
        );
        let freqs = [
            FreqEntry { page: 0, channel: 0, mhz: 868.3 },
            FreqEntry { page: 0, channel: 11, mhz: 2405.0 },
        ];
        assert_eq!(
            freq_list(&freqs, Some(0), Some(11)),
            "  868.3 MHz (Channel unknown) \n*  2405 MHz (Channel 11) \n"
        );
    }
}
