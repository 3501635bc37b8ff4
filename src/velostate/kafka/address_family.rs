//! IP family librdkafka uses when resolving broker addresses

use log::warn;

/// Overrides the broker address family of every client the sink creates
pub const BROKER_ADDRESS_FAMILY_ENV: &str = "VELOSTATE_BROKER_ADDRESS_FAMILY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerAddressFamily {
    /// Containerised brokers often advertise hostnames that only resolve over IPv4
    #[default]
    V4,
    V6,
    /// Leaves resolution to librdkafka
    Any,
}

impl BrokerAddressFamily {
    /// Accepts `v4`/`ipv4`, `v6`/`ipv6` and `any`/`both`, ignoring case and surrounding space
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "v4" | "ipv4" => Some(Self::V4),
            "v6" | "ipv6" => Some(Self::V6),
            "any" | "both" => Some(Self::Any),
            _ => None,
        }
    }

    /// Family named by `VELOSTATE_BROKER_ADDRESS_FAMILY`, `V4` when unset or unrecognised
    pub fn from_env() -> Self {
        let Ok(value) = std::env::var(BROKER_ADDRESS_FAMILY_ENV) else {
            return Self::default();
        };
        Self::parse(&value).unwrap_or_else(|| {
            warn!(
                "Ignoring {}='{}'; expected v4, v6 or any. Using v4",
                BROKER_ADDRESS_FAMILY_ENV, value
            );
            Self::default()
        })
    }

    /// Value for `broker.address.family`, `None` when librdkafka's default applies
    pub fn client_property(self) -> Option<&'static str> {
        match self {
            Self::V4 => Some("v4"),
            Self::V6 => Some("v6"),
            Self::Any => None,
        }
    }
}
