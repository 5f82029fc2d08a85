//! Channel page / channel number to centre frequency, plus the power unit
//! conversions used by the reports.

/// Centre frequency in MHz of `channel` on `page`, or 0.0 when the pair is
/// not defined by IEEE 802.15.4.
pub fn channel_to_mhz(page: u8, channel: u8) -> f32 {
    let ch = f32::from(channel);
    match (page, channel) {
        (0..=2, 0) => 868.3,
        (0..=2, 1..=10) => 906.0 + 2.0 * (ch - 1.0),
        (0, 11..=26) => 2405.0 + 5.0 * (ch - 11.0),
        (3, 0..=12) => 2412.0 + 5.0 * ch,
        (3, 13) => 2484.0,
        (4, 0..=15) => UWB_MHZ[usize::from(channel)],
        (5, 0..=3) => 780.0 + 2.0 * ch,
        (5, 4..=7) => 780.0 + 2.0 * (ch - 4.0),
        (6, 0..=7) => 951.2 + 0.6 * ch,
        (6, 8..=9) => 954.4 + 0.2 * (ch - 8.0),
        (6, 10..=21) => 951.1 + 0.4 * (ch - 10.0),
        _ => 0.0,
    }
}

/// Page 4 (UWB) band plan.
const UWB_MHZ: [f32; 16] = [
    499.2, 3494.4, 3993.6, 4492.8, 3993.6, 6489.6, 6988.8, 6489.6, 7488.0, 7987.2, 8486.4,
    7987.2, 8985.6, 9484.8, 9984.0, 9484.8,
];

/// Hundredths of a dBm to whole dBm, truncating toward zero.
pub fn mbm_to_dbm(mbm: i32) -> i32 {
    mbm / 100
}

const LOG10_MAGIC: f64 = 1.258_925_41;

/// Approximate milliwatts for a dBm value, in the integer steps iwinfo uses.
pub fn dbm_to_mw(dbm: i32) -> i32 {
    let mut res = 1.0f64;
    for _ in 0..dbm / 10 {
        res *= 10.0;
    }
    for _ in 0..dbm % 10 {
        res *= LOG10_MAGIC;
    }
    res as i32
}

pub fn mw_to_dbm(mw: i32) -> i32 {
    let mut fin = f64::from(mw);
    let mut res = 0;
    while fin > 10.0 {
        res += 10;
        fin /= 10.0;
    }
    while fin > 1.000_001 {
        res += 1;
        fin /= LOG10_MAGIC;
    }
    res
}
