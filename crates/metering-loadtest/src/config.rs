//! Load test configuration

use std::ops::Range;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::identity::HostId;
use crate::schedule::ArrivalSchedule;
use crate::sla::SlaThresholds;

/// Complete load test configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestConfig {
    /// Remote-write endpoint
    pub remote_write_url: String,

    /// Write requests per host per scrape interval
    pub write_request_rate: u64,

    /// Total duration in minutes, ramps included
    pub duration_minutes: u64,

    /// Ramp-up duration in minutes
    pub ramp_up_minutes: u64,

    /// Ramp-down duration in minutes
    pub ramp_down_minutes: u64,

    /// Simulated Prometheus scrape interval in seconds
    pub scrape_interval_secs: u64,

    /// First simulated host id (inclusive)
    pub host_id_min: HostId,

    /// Last simulated host id (exclusive)
    pub host_id_max: HostId,

    /// Shared secret sent to the gateway
    #[serde(skip_serializing, default)]
    pub proxy_secret: String,

    /// Number of simulated organizations
    pub org_count: usize,

    /// Cloud accounts per organization
    pub accounts_per_org: usize,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Minimum fraction of successful writes
    pub sla_min_check_rate: f64,

    /// Upper bound on p90 write latency in milliseconds
    pub sla_max_p90_latency_ms: u64,

    /// Interval between progress reports in seconds
    pub report_interval_secs: u64,

    /// Seed for a reproducible host to identity mapping
    pub seed: Option<u64>,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            remote_write_url: "http://localhost:9090/api/v1/write".to_string(),
            write_request_rate: 1,
            duration_minutes: 12 * 60,
            ramp_up_minutes: 0,
            ramp_down_minutes: 0,
            scrape_interval_secs: 30,
            host_id_min: 0,
            host_id_max: 100,
            proxy_secret: "abc".to_string(),
            org_count: 100,
            accounts_per_org: 5,
            request_timeout_secs: 70,
            sla_min_check_rate: 0.95,
            sla_max_p90_latency_ms: 5000,
            report_interval_secs: 60,
            seed: None,
        }
    }
}

impl LoadTestConfig {
    /// Reject configurations that must not start a run
    pub fn validate(&self) -> Result<()> {
        if self.host_id_max <= self.host_id_min {
            return Err(ConfigError::InvalidHostRange {
                min: self.host_id_min,
                max: self.host_id_max,
            });
        }

        if self.org_count == 0 || self.accounts_per_org == 0 {
            return Err(ConfigError::EmptyRegistry {
                organizations: self.org_count,
                accounts_per_org: self.accounts_per_org,
            });
        }

        if self.scrape_interval_secs == 0 {
            return Err(ConfigError::ZeroScrapeInterval);
        }

        if self.write_request_rate == 0 {
            return Err(ConfigError::ZeroWriteRate);
        }

        for (name, value) in [
            ("DURATION_MINUTES", self.duration_minutes),
            ("RAMP_UP_MINUTES", self.ramp_up_minutes),
            ("RAMP_DOWN_MINUTES", self.ramp_down_minutes),
        ] {
            if value.checked_mul(60).is_none() {
                return Err(ConfigError::Overflow(format!("{}={}", name, value)));
            }
        }

        if self
            .write_request_rate
            .checked_mul(self.host_count() as u64)
            .is_none()
        {
            return Err(ConfigError::Overflow(format!(
                "WRITE_REQUEST_RATE={} x {} hosts",
                self.write_request_rate,
                self.host_count()
            )));
        }

        let ramps = self
            .ramp_up_minutes
            .checked_add(self.ramp_down_minutes)
            .unwrap_or(u64::MAX);
        if ramps > self.duration_minutes {
            return Err(ConfigError::RampExceedsDuration {
                ramp_up: self.ramp_up_minutes,
                ramp_down: self.ramp_down_minutes,
                duration: self.duration_minutes,
            });
        }

        if !(0.0..=1.0).contains(&self.sla_min_check_rate) {
            return Err(ConfigError::InvalidCheckRate(
                self.sla_min_check_rate.to_string(),
            ));
        }

        reqwest::Url::parse(&self.remote_write_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", self.remote_write_url, e)))?;

        Ok(())
    }

    /// Simulated hosts, one worker each
    pub fn host_ids(&self) -> Range<HostId> {
        self.host_id_min..self.host_id_max
    }

    pub fn host_count(&self) -> usize {
        self.host_id_max.saturating_sub(self.host_id_min) as usize
    }

    /// Unit in which the write rate is expressed
    pub fn time_unit(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_secs)
    }

    /// Ramp-up / steady / ramp-down curve targeting `rate * hosts`
    pub fn schedule(&self) -> ArrivalSchedule {
        ArrivalSchedule::ramping(
            self.write_request_rate.saturating_mul(self.host_count() as u64) as f64,
            minutes(self.duration_minutes),
            minutes(self.ramp_up_minutes),
            minutes(self.ramp_down_minutes),
            self.time_unit(),
        )
    }

    pub fn sla_thresholds(&self) -> SlaThresholds {
        SlaThresholds {
            min_check_rate: self.sla_min_check_rate,
            max_p90_latency: Duration::from_millis(self.sla_max_p90_latency_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LoadTestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.host_count(), 100);
        assert_eq!(config.schedule().total_duration(), minutes(720));
    }

    #[test]
    fn test_schedule_targets_rate_times_hosts() {
        let config = LoadTestConfig {
            write_request_rate: 2,
            host_id_min: 10,
            host_id_max: 60,
            duration_minutes: 12,
            ramp_up_minutes: 2,
            ramp_down_minutes: 1,
            ..Default::default()
        };

        let schedule = config.schedule();
        assert_eq!(schedule.peak_rate(), 100.0);
        assert_eq!(schedule.time_unit(), Duration::from_secs(30));
        assert_eq!(schedule.stages()[1].duration, minutes(9));
    }

    #[test]
    fn test_rejects_bad_host_range() {
        let config = LoadTestConfig {
            host_id_min: 5,
            host_id_max: 5,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidHostRange { min: 5, max: 5 })
        );
    }

    #[test]
    fn test_rejects_ramps_longer_than_duration() {
        let config = LoadTestConfig {
            duration_minutes: 10,
            ramp_up_minutes: 8,
            ramp_down_minutes: 3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RampExceedsDuration { .. })
        ));

        // Ramps filling the whole run leave a zero-length steady stage.
        let config = LoadTestConfig {
            ramp_down_minutes: 2,
            ..config
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.schedule().stages()[1].duration, Duration::ZERO);
    }

    #[test]
    fn test_rejects_empty_registry_and_zero_rates() {
        let config = LoadTestConfig {
            org_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyRegistry { .. })
        ));

        let config = LoadTestConfig {
            scrape_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroScrapeInterval));

        let config = LoadTestConfig {
            write_request_rate: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroWriteRate));
    }

    #[test]
    fn test_rejects_invalid_url_and_ratio() {
        let config = LoadTestConfig {
            remote_write_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));

        let config = LoadTestConfig {
            sla_min_check_rate: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCheckRate(_))
        ));
    }

    #[test]
    fn test_rejects_overflowing_values() {
        let config = LoadTestConfig {
            duration_minutes: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Overflow(_))));

        let config = LoadTestConfig {
            write_request_rate: u64::MAX / 2,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Overflow(_))));

        // Ramps near the limit are still compared, not wrapped.
        let config = LoadTestConfig {
            duration_minutes: 60,
            ramp_up_minutes: u64::MAX / 60,
            ramp_down_minutes: u64::MAX / 60,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RampExceedsDuration { .. })
        ));
    }
}
