use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub push_webhook_url: Option<String>,
    pub timing: TimingConfig,
}

/// Timer settings shared by the broadcaster, typing presence and the
/// geolocation source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    pub publish_floor: Duration,
    pub heartbeat_interval: Duration,
    pub typing_throttle: Duration,
    pub typing_timeout: Duration,
    pub gps_max_age: Duration,
    pub gps_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            publish_floor: Duration::from_millis(8_000),
            heartbeat_interval: Duration::from_millis(10_000),
            typing_throttle: Duration::from_millis(1_000),
            typing_timeout: Duration::from_millis(2_000),
            gps_max_age: Duration::from_millis(5_000),
            gps_timeout: Duration::from_millis(10_000),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let defaults = TimingConfig::default();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            push_webhook_url: env::var("PUSH_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            timing: TimingConfig {
                publish_floor: millis_or_default("PUBLISH_FLOOR_MS", defaults.publish_floor)?,
                heartbeat_interval: millis_or_default(
                    "HEARTBEAT_INTERVAL_MS",
                    defaults.heartbeat_interval,
                )?,
                typing_throttle: millis_or_default("TYPING_THROTTLE_MS", defaults.typing_throttle)?,
                typing_timeout: millis_or_default("TYPING_TIMEOUT_MS", defaults.typing_timeout)?,
                gps_max_age: millis_or_default("GPS_MAX_AGE_MS", defaults.gps_max_age)?,
                gps_timeout: millis_or_default("GPS_TIMEOUT_MS", defaults.gps_timeout)?,
            },
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn millis_or_default(key: &str, default: Duration) -> Result<Duration, AppError> {
    let millis = parse_or_default(key, default.as_millis() as u64)?;
    if millis == 0 {
        return Err(AppError::Internal(format!("invalid {key}: must be > 0")));
    }
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::TimingConfig;

    #[test]
    fn default_timings_match_protocol_constants() {
        let timing = TimingConfig::default();

        assert_eq!(timing.publish_floor, Duration::from_secs(8));
        assert_eq!(timing.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(timing.typing_throttle, Duration::from_secs(1));
        assert_eq!(timing.typing_timeout, Duration::from_secs(2));
    }
}
