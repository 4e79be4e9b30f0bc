use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::checker::Env;
use crate::error::ConfigError;
use crate::probe::MAX_PAYLOAD_SIZE;

/// Overrides the time to wait for an echo reply (duration string, e.g. "1s")
pub const ENV_READ_TIMEOUT: &str = "ICMP_READ_TIMEOUT";
/// Number of payload bytes carried by echo requests
pub const ENV_PAYLOAD_SIZE: &str = "ICMP_PAYLOAD_SIZE";
/// Reject IPv4 replies whose checksum does not verify
pub const ENV_STRICT_CHECKSUM: &str = "ICMP_STRICT_CHECKSUM";

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-checker ICMP settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcmpConfig {
    /// How long to wait for the echo reply
    #[serde(with = "duration_serde")]
    pub read_timeout: Duration,
    /// How long the request write may block
    #[serde(with = "duration_serde")]
    pub write_timeout: Duration,
    /// Echo payload bytes (0 = header only)
    pub payload_size: usize,
    /// Verify the reply checksum (IPv4 only)
    pub strict_checksum: bool,
}

impl Default for IcmpConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: Duration::from_secs(1),
            payload_size: 0,
            strict_checksum: false,
        }
    }
}

impl IcmpConfig {
    /// Build the config from the caller's write timeout plus environment overrides
    pub fn from_env(write_timeout: Duration, env: &dyn Env) -> Result<Self, ConfigError> {
        let mut config = Self {
            write_timeout,
            ..Self::default()
        };

        let read_timeout = env.get(ENV_READ_TIMEOUT);
        if !read_timeout.is_empty() {
            let timeout = parse_duration(&read_timeout)
                .map_err(|e| ConfigError::new(ENV_READ_TIMEOUT, e))?;
            if timeout.is_zero() {
                return Err(ConfigError::new(
                    ENV_READ_TIMEOUT,
                    format!("duration {read_timeout:?} is not positive"),
                ));
            }
            config.read_timeout = timeout;
        }

        let payload_size = env.get(ENV_PAYLOAD_SIZE);
        if !payload_size.is_empty() {
            config.payload_size = match payload_size.trim().parse::<usize>() {
                Ok(size) if size <= MAX_PAYLOAD_SIZE => size,
                _ => {
                    return Err(ConfigError::new(
                        ENV_PAYLOAD_SIZE,
                        format!("{payload_size:?} is not a size between 0 and {MAX_PAYLOAD_SIZE}"),
                    ));
                }
            };
        }

        let strict = env.get(ENV_STRICT_CHECKSUM);
        if !strict.is_empty() {
            config.strict_checksum = parse_bool(&strict).ok_or_else(|| {
                ConfigError::new(ENV_STRICT_CHECKSUM, format!("{strict:?} is not a boolean"))
            })?;
        }

        Ok(config)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("invalid duration {0:?}")]
    Invalid(String),
    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),
    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },
    #[error("negative duration {0:?}")]
    Negative(String),
}

/// Longest accepted duration: i64::MAX nanoseconds (about 292 years)
const MAX_DURATION_NANOS: u128 = i64::MAX as u128;

/// Parse a duration such as "300ms", "1.5s" or "2h45m"
///
/// Accepts an optional sign followed by one or more decimal numbers, each
/// with a unit: ns, us (or µs), ms, s, m, h. A bare "0" is zero. Totals
/// beyond `i64::MAX` nanoseconds are invalid.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let invalid = || DurationError::Invalid(input.to_string());

    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total_nanos: u128 = 0;
    while !rest.is_empty() {
        let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (int_part, after_int) = rest.split_at(int_len);

        let (frac_part, after_number) = match after_int.strip_prefix('.') {
            Some(after_dot) => {
                let frac_len = after_dot
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(after_dot.len());
                after_dot.split_at(frac_len)
            }
            None => ("", after_int),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = after_number
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(after_number.len());
        let (unit, remaining) = after_number.split_at(unit_len);
        if unit.is_empty() {
            return Err(DurationError::MissingUnit(input.to_string()));
        }

        let scale: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            _ => {
                return Err(DurationError::UnknownUnit {
                    unit: unit.to_string(),
                    input: input.to_string(),
                });
            }
        };

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        let mut value = whole.checked_mul(scale).ok_or_else(invalid)?;

        // Digits beyond nanosecond precision are dropped
        let mut place = scale;
        for digit in frac_part.bytes() {
            place /= 10;
            if place == 0 {
                break;
            }
            value = value
                .checked_add((digit - b'0') as u128 * place)
                .ok_or_else(invalid)?;
        }

        total_nanos = total_nanos
            .checked_add(value)
            .filter(|&total| total <= MAX_DURATION_NANOS)
            .ok_or_else(invalid)?;
        rest = remaining;
    }

    if negative && total_nanos > 0 {
        return Err(DurationError::Negative(input.to_string()));
    }

    let secs = u64::try_from(total_nanos / 1_000_000_000).map_err(|_| invalid())?;
    Ok(Duration::new(secs, (total_nanos % 1_000_000_000) as u32))
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
