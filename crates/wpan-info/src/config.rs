use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/iwpaninfo/wireless.yaml";
pub const CONFIG_ENV: &str = "IWPANINFO_CONFIG";

/// Section kind holding one 802.15.4 radio.
pub const DEVICE_KIND: &str = "wpan-device";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WirelessConfig {
    #[serde(default)]
    pub sections: IndexMap<String, RadioSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioSection {
    pub kind: String,
    #[serde(rename = "type")]
    pub radio_type: Option<String>,
    pub phy: Option<String>,
    #[serde(flatten)]
    pub options: IndexMap<String, serde_yaml::Value>,
}

impl WirelessConfig {
    /// The section called `name` (or selected by `@wpan-device[N]`), only if
    /// it is a `wpan-device` whose declared type equals `expected_type`.
    pub fn radio(&self, name: &str, expected_type: &str) -> Option<&RadioSection> {
        let section = match name.strip_prefix('@') {
            Some(ext) => self.extended(ext)?,
            None => self.sections.get(name)?,
        };
        if section.kind != DEVICE_KIND {
            return None;
        }
        (section.radio_type.as_deref() == Some(expected_type)).then_some(section)
    }

    /// `<kind>[N]`; a negative N counts from the last section of that kind.
    fn extended(&self, ext: &str) -> Option<&RadioSection> {
        let (kind, idx) = ext.strip_suffix(']')?.split_once('[')?;
        let idx: i64 = idx.parse().ok()?;
        let of_kind: Vec<&RadioSection> =
            self.sections.values().filter(|s| s.kind == kind).collect();
        let pos = if idx < 0 {
            of_kind.len().checked_sub(usize::try_from(idx.unsigned_abs()).ok()?)?
        } else {
            usize::try_from(idx).ok()?
        };
        of_kind.get(pos).copied()
    }
}

impl RadioSection {
    pub fn option(&self, key: &str) -> Option<&str> {
        match key {
            "phy" => self.phy.as_deref(),
            "type" => self.radio_type.as_deref(),
            _ => self.options.get(key).and_then(serde_yaml::Value::as_str),
        }
    }
}

pub fn load_config_file(path: impl AsRef<Path>) -> anyhow::Result<WirelessConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading wireless config: {}", path.display()))?;
    let cfg: WirelessConfig =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?;
    debug!(path = %path.display(), sections = cfg.sections.len(), "wireless config loaded");
    Ok(cfg)
}

/// Explicit path, then `$IWPANINFO_CONFIG`, then the default location.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Like [`load_config_file`], but a missing file means "no config".
pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<WirelessConfig>> {
    match load_config_file(path.as_ref()) {
        Ok(cfg) => Ok(Some(cfg)),
        Err(e) => match e.downcast_ref::<std::io::Error>() {
            Some(io) if io.kind() == ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
sections:
  radio0:
    kind: wpan-device
    type: mac802154
    phy: wpan-phy0
  lan:
    kind: interface
    proto: static
  radio1:
    kind: wpan-device
    type: atusb
    phy: wpan-phy1
    channel: "11"
"#;

    fn sample() -> WirelessConfig {
        serde_yaml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn radio_requires_matching_type() {
        let cfg = sample();
        assert_eq!(
            cfg.radio("radio0", "mac802154").and_then(|s| s.option("phy")),
            Some("wpan-phy0")
        );
        assert!(cfg.radio("radio1", "mac802154").is_none());
        assert!(cfg.radio("lan", "mac802154").is_none());
        assert!(cfg.radio("radio9", "mac802154").is_none());
    }

    #[test]
    fn extended_lookup_counts_only_devices() {
        let cfg = sample();
        assert!(cfg.radio("@wpan-device[0]", "mac802154").is_some());
        let last = cfg.radio("@wpan-device[-1]", "atusb").unwrap();
        assert_eq!(last.option("channel"), Some("11"));
        assert!(cfg.radio("@wpan-device[2]", "atusb").is_none());
        assert!(cfg.radio("@wpan-device[-3]", "atusb").is_none());
        assert!(cfg.radio("@wpan-device", "atusb").is_none());
    }

    #[test]
    fn missing_file_is_no_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_optional(dir.path().join("absent.yaml")).unwrap();
        assert!(cfg.is_none());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sections: [unclosed").unwrap();
        assert!(load_optional(file.path()).is_err());
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = load_config_file(file.path()).unwrap();
        assert_eq!(cfg.sections.len(), 3);
    }
}
