//! Fixed topic names, from the device's perspective.

/// Maximum length of any topic string this crate builds.
pub const MAX_TOPIC_LEN: usize = 64;

pub const TOPIC_INFO: &str = "dev/info";
pub const TOPIC_DATA: &str = "dev/data";
pub const TOPIC_CFG: &str = "dev/cfg";
pub const TOPIC_RSC: &str = "dev/rsc";
pub const TOPIC_CMD_RES: &str = "dev/cmd/res";
pub const TOPIC_RSC_UPD_RES: &str = "dev/rsc/upd/res";

pub const TOPIC_CFG_UPD: &str = "dev/cfg/upd";
pub const TOPIC_CMD: &str = "dev/cmd";
pub const TOPIC_RSC_UPD: &str = "dev/rsc/upd";

/// Default plaintext broker port.
pub const DEFAULT_PORT_PLAIN: u16 = 1883;
/// Default TLS broker port.
pub const DEFAULT_PORT_TLS: u16 = 8883;
/// Default broker host.
pub const DEFAULT_HOST: &str = "mqtt.liveobjects.orange-business.com";
/// Literal MQTT username for every device.
pub const MQTT_USERNAME: &str = "json+device";
