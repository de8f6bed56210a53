use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What the C+ receive path does with a frame larger than the descriptor at the cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RxOversizePolicy {
    /// Drop the frame and raise `RXOVW`, leaving the descriptor device-owned. This is what the
    /// RTL8139C+ does.
    #[default]
    Drop,
    /// Spread the frame over consecutive device-owned descriptors (FS on the first, LS on the
    /// last). All-or-nothing: if the ring cannot hold the whole frame it is dropped untouched.
    Scatter,
}

/// Host-side configuration of one controller instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Rtl8139Config {
    /// Burned-in station address, restored on every hard reset.
    #[serde(with = "mac_string")]
    pub mac: [u8; 6],
    pub rx_oversize: RxOversizePolicy,
    /// Initial PHY link state.
    pub link_up: bool,
}

impl Default for Rtl8139Config {
    fn default() -> Self {
        Self {
            mac: [0x52, 0x54, 0x00, 0x12, 0x34, 0x56],
            rx_oversize: RxOversizePolicy::Drop,
            link_up: true,
        }
    }
}

impl Rtl8139Config {
    pub fn with_mac(mac: [u8; 6]) -> Self {
        Self {
            mac,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mac == [0u8; 6] {
            return Err(ConfigError::ZeroMac);
        }
        if self.mac[0] & 0x01 != 0 {
            return Err(ConfigError::GroupMac(self.mac));
        }
        Ok(())
    }
}

pub(crate) fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(|c| c == ':' || c == '-');
    for byte in mac.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

mod mac_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(mac: &[u8; 6], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_mac(mac))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 6], D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_mac(&s)
            .ok_or_else(|| de::Error::invalid_value(de::Unexpected::Str(&s), &"a MAC like 52:54:00:12:34:56"))
    }
}
