use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use tempo_core::time::parse_hhmm;
use tempo_core::SchedulerPreferences;

use crate::state::ensure_tempo_home;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub calendar: CalendarSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Local wall-clock `HH:MM`.
    pub working_hours_start: String,
    pub working_hours_end: String,
    pub horizon_days: u32,
    /// Unset means the engine default (480).
    pub max_daily_minutes: Option<u32>,
    /// IANA name, e.g. "America/Chicago".
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarSection {
    pub title_prefix: String,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            working_hours_start: "09:00".to_string(),
            working_hours_end: "17:00".to_string(),
            horizon_days: 7,
            max_daily_minutes: Some(480),
            timezone: "UTC".to_string(),
        }
    }
}

impl Default for CalendarSection {
    fn default() -> Self {
        Self {
            title_prefix: "[focus] ".to_string(),
        }
    }
}

impl Config {
    /// Engine preferences, validated.
    pub fn preferences(&self) -> Result<SchedulerPreferences> {
        let s = &self.scheduler;
        let start = parse_hhmm(&s.working_hours_start)
            .ok_or_else(|| anyhow!("invalid working_hours_start: {}", s.working_hours_start))?;
        let end = parse_hhmm(&s.working_hours_end)
            .ok_or_else(|| anyhow!("invalid working_hours_end: {}", s.working_hours_end))?;

        let mut prefs = SchedulerPreferences::default()
            .with_working_hours(start, end)
            .with_horizon_days(s.horizon_days)
            .with_timezone(s.timezone.clone());
        prefs.max_daily_minutes = s.max_daily_minutes;

        prefs.validate().map_err(|e| anyhow!("invalid [scheduler] config: {e}"))?;
        Ok(prefs)
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_tempo_home()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(p: &Path) -> Result<Config> {
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
    toml::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

pub fn save_config_to(p: &Path, cfg: &Config) -> Result<()> {
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_config_to(&p, &Config::default())?;
    println!("Wrote {}", p.display());
    Ok(())
}
