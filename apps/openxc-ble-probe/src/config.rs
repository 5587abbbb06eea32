use config::{Config, ConfigError, Environment, File};
use openxc_ble::BleInterfaceConfig;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct ProbeConfig {
    /// Explicit vehicle interface address; automatic detection when unset.
    pub address: Option<String>,
    pub store_path: PathBuf,
    pub device_name_prefix: String,
    pub automatic_scan: bool,
    #[serde(with = "humantime_serde")]
    pub inter_write_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub scan_window: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub fast_poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    #[serde(default, with = "humantime_serde")]
    pub run_for: Option<Duration>,
    pub read_chunk: usize,
    /// Raw messages written once each time the link becomes ready.
    #[serde(deserialize_with = "deserialize_list")]
    pub commands: Vec<String>,
}

fn deserialize_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ListVisitor;

    impl<'de> Visitor<'de> for ListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value
                .split(';')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect())
        }

        fn visit_seq<S>(self, mut seq: S) -> Result<Self::Value, S::Error>
        where
            S: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(element) = seq.next_element()? {
                vec.push(element);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(ListVisitor)
}

impl ProbeConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("address", None::<String>)?
            .set_default("store_path", "data/openxc-ble-devices.cbor")?
            .set_default("device_name_prefix", "OpenXC")?
            .set_default("automatic_scan", true)?
            .set_default("inter_write_delay", "50ms")?
            .set_default("scan_window", "10s")?
            .set_default("poll_interval", "5s")?
            .set_default("fast_poll_interval", "1s")?
            .set_default("tick_interval", "100ms")?
            .set_default("read_chunk", 512)?
            .set_default(
                "commands",
                vec![r#"{"command":"version"}"#.to_string()],
            )?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(Environment::with_prefix("OPENXC_BLE").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    pub fn interface_config(&self) -> BleInterfaceConfig {
        BleInterfaceConfig {
            device_name_prefix: self.device_name_prefix.clone(),
            inter_write_delay: self.inter_write_delay,
            scan_window: self.scan_window,
            poll_interval: self.poll_interval,
            fast_poll_interval: self.fast_poll_interval,
            automatic_scan: self.automatic_scan,
            ..BleInterfaceConfig::default()
        }
    }
}
