use crate::utils::time::{parse_time_string, reference_offset};
use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveTime};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub database_url: String,
    pub timezone_offset: FixedOffset,
    pub force_checkout_time: NaiveTime,
    pub daily_report_time: NaiveTime,
    pub check_in_points: i64,
    pub db_connect_retries: u32,
}

fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid ({}): {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}

fn time_var(name: &str, default: &str) -> Result<NaiveTime> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_time_string(&raw).with_context(|| format!("{} must be HH:MM", name))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let discord_token = env::var("DISCORD_TOKEN")
            .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN environment variable is required"))?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:attendance.db".to_string());

        let timezone_offset = reference_offset(var_or("TIMEZONE_OFFSET_HOURS", 9)?)?;
        let force_checkout_time = time_var("FORCE_CHECKOUT_TIME", "23:58")?;
        let daily_report_time = time_var("DAILY_REPORT_TIME", "23:59")?;
        let check_in_points = var_or("CHECK_IN_POINTS", 10)?;
        let db_connect_retries = var_or("DB_CONNECT_RETRIES", 5)?;

        let config = Config {
            discord_token,
            database_url,
            timezone_offset,
            force_checkout_time,
            daily_report_time,
            check_in_points,
            db_connect_retries,
        };
        config.validate()?;
        Ok(config)
    }

    /// The report reads closed sessions, so it has to run after the forced checkout.
    pub fn validate(&self) -> Result<()> {
        if self.daily_report_time <= self.force_checkout_time {
            anyhow::bail!(
                "DAILY_REPORT_TIME ({}) must be after FORCE_CHECKOUT_TIME ({})",
                self.daily_report_time.format("%H:%M"),
                self.force_checkout_time.format("%H:%M")
            );
        }
        if self.check_in_points < 0 {
            anyhow::bail!("CHECK_IN_POINTS must not be negative");
        }
        if self.db_connect_retries == 0 {
            anyhow::bail!("DB_CONNECT_RETRIES must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            discord_token: "token".into(),
            database_url: "sqlite::memory:".into(),
            timezone_offset: reference_offset(9).unwrap(),
            force_checkout_time: NaiveTime::from_hms_opt(23, 58, 0).unwrap(),
            daily_report_time: NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
            check_in_points: 10,
            db_connect_retries: 5,
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn report_must_follow_forced_checkout() {
        let mut config = config();
        config.daily_report_time = config.force_checkout_time;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_retries_rejected() {
        let mut config = config();
        config.db_connect_retries = 0;
        assert!(config.validate().is_err());
    }
}
