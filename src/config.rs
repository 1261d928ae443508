//! Engine configuration and operator overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PmtudError, PmtudResult};
use crate::mtu::WireMtu;
use crate::protocol::constants::*;

/// Environment variable holding an explicit tunnel MTU.
pub const ENV_DEBUG_MTU: &str = "MESH_DEBUG_MTU";
/// Environment variable enabling peer path MTU discovery.
pub const ENV_ENABLE_PMTUD: &str = "MESH_DEBUG_ENABLE_PMTUD";

/// Prober tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PmtudConfig {
    /// How long to wait for a probe acknowledgment
    #[serde(with = "duration_ms")]
    pub probe_timeout: Duration,

    /// How long a stable path waits before being re-validated
    #[serde(with = "duration_ms")]
    pub revalidation_interval: Duration,

    /// Timeouts tolerated at one probe size before it is declared too large
    pub attempts_per_size: u32,

    /// Failed probes in a row after which the search stops at the verified size
    pub max_consecutive_failures: u32,

    /// Search stops once the verified size is this close to the ceiling
    pub granularity: u16,

    /// Largest wire MTU ever probed for
    pub max_probed_wire_mtu: WireMtu,
}

impl Default for PmtudConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            revalidation_interval: Duration::from_millis(DEFAULT_REVALIDATION_INTERVAL_MS),
            attempts_per_size: DEFAULT_ATTEMPTS_PER_SIZE,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            granularity: DEFAULT_PROBE_GRANULARITY,
            max_probed_wire_mtu: WireMtu::MAX_PROBED,
        }
    }
}

impl PmtudConfig {
    /// Load from a JSON file; missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> PmtudResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PmtudError::Configuration(format!("{}: {}", path.display(), e)))?;
        let config: PmtudConfig = serde_json::from_str(&raw)
            .map_err(|e| PmtudError::Configuration(format!("{}: {}", path.display(), e)))?;
        Ok(config.validated())
    }

    /// Clamp every field into its usable range.
    ///
    /// Zero timers would let a path probe in a busy loop, so they are raised
    /// to the minimums instead of being rejected.
    pub fn validated(mut self) -> Self {
        let min_timeout = Duration::from_millis(MIN_PROBE_TIMEOUT_MS);
        if self.probe_timeout < min_timeout {
            tracing::warn!(
                "probe_timeout {:?} below minimum, using {:?}",
                self.probe_timeout,
                min_timeout
            );
            self.probe_timeout = min_timeout;
        }

        let min_interval = Duration::from_millis(MIN_REVALIDATION_INTERVAL_MS);
        if self.revalidation_interval < min_interval {
            tracing::warn!(
                "revalidation_interval {:?} below minimum, using {:?}",
                self.revalidation_interval,
                min_interval
            );
            self.revalidation_interval = min_interval;
        }

        self.attempts_per_size = self.attempts_per_size.max(1);
        self.max_consecutive_failures = self.max_consecutive_failures.max(1);
        self.granularity = self.granularity.max(1);
        self.max_probed_wire_mtu = self.max_probed_wire_mtu.max(WireMtu::SAFE);
        self
    }
}

/// Operator-supplied MTU settings, read once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MtuOverrides {
    /// Explicit tunnel MTU; wins over everything else
    pub forced_mtu: Option<i64>,
    /// Whether paths are probed at all
    pub pmtud_enabled: bool,
}

impl MtuOverrides {
    /// Read the overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the overrides through `lookup` instead of the environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let forced_mtu = lookup(ENV_DEBUG_MTU)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .and_then(|v| match v.parse::<i64>() {
                Ok(mtu) => Some(mtu),
                Err(e) => {
                    tracing::warn!("ignoring {}={:?}: {}", ENV_DEBUG_MTU, v, e);
                    None
                }
            });

        let pmtud_enabled = lookup(ENV_ENABLE_PMTUD)
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        Self {
            forced_mtu,
            pmtud_enabled,
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "t" | "true" | "y" | "yes" | "on"
    )
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
