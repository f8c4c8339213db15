//! Configuration schema and loader, mirroring `camera_config.py`'s JSON
//! shape via `serde` the way the teacher's own config-adjacent types derive
//! `serde::{Serialize, Deserialize}` rather than hand-rolling a parser.
//! Startup-fatal validation follows `validate_config`'s required-key checks;
//! feature-toggle defaulting follows `get_default_features`/
//! `get_channel_features`'s merge-over-system-defaults behavior.

use crate::errors::Errors;
use crate::geometry::{CoordinateType, Direction, Side, Zone};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct FeatureToggle {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub always: bool,
}

/// System defaults matching `get_default_features`'s hardcoded fallback —
/// `body_detection` and `tracking` are always on, `reid`/`gender_classification`/
/// `counter` default on but overridable per channel, `staff_filter` is this
/// crate's own addition (`spec.md` §6 names it as a toggle the original
/// left implicit in `daily_person_counter.py`'s always-on staff filter).
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureToggles {
    #[serde(default = "FeatureToggles::default_body_detection")]
    pub body_detection: FeatureToggle,
    #[serde(default = "FeatureToggles::default_tracking")]
    pub tracking: FeatureToggle,
    #[serde(default = "FeatureToggles::default_reid")]
    pub reid: FeatureToggle,
    #[serde(default)]
    pub gender_classification: FeatureToggle,
    #[serde(default = "FeatureToggles::default_counter")]
    pub counter: FeatureToggle,
    #[serde(default = "FeatureToggles::default_staff_filter")]
    pub staff_filter: FeatureToggle,
}

impl FeatureToggles {
    fn default_body_detection() -> FeatureToggle {
        FeatureToggle { enabled: true, always: true }
    }
    fn default_tracking() -> FeatureToggle {
        FeatureToggle { enabled: true, always: true }
    }
    fn default_reid() -> FeatureToggle {
        FeatureToggle { enabled: true, always: false }
    }
    fn default_counter() -> FeatureToggle {
        FeatureToggle { enabled: true, always: false }
    }
    fn default_staff_filter() -> FeatureToggle {
        FeatureToggle { enabled: true, always: false }
    }
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            body_detection: Self::default_body_detection(),
            tracking: Self::default_tracking(),
            reid: Self::default_reid(),
            gender_classification: FeatureToggle::default(),
            counter: Self::default_counter(),
            staff_filter: Self::default_staff_filter(),
        }
    }
}

fn default_zone_direction() -> String {
    "bidirectional".to_string()
}

fn default_line_direction() -> String {
    "one_way".to_string()
}

fn default_side() -> String {
    "above".to_string()
}

fn default_threshold() -> f32 {
    0.5
}

/// Mirrors the polygon/line zone dict keys `zone_counter.py::_validate_and_parse_zones`
/// reads, before our own conversion to a typed [`Zone`].
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    pub zone_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub zone_type: String,
    #[serde(default)]
    pub coordinate_type: Option<String>,
    pub points: Option<Vec<(f32, f32)>>,
    pub start_point: Option<(f32, f32)>,
    pub end_point: Option<(f32, f32)>,
    #[serde(default = "default_zone_direction")]
    pub direction: String,
    #[serde(default = "default_side")]
    pub side: String,
    #[serde(default = "default_threshold")]
    pub enter_threshold: f32,
    #[serde(default = "default_threshold")]
    pub exit_threshold: f32,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

fn parse_coordinate_type(raw: Option<&str>) -> CoordinateType {
    match raw {
        Some("percentage") => CoordinateType::Percentage,
        _ => CoordinateType::Absolute,
    }
}

fn parse_side(raw: &str) -> Side {
    match raw {
        "below" => Side::Below,
        "left" => Side::Left,
        "right" => Side::Right,
        _ => Side::Above,
    }
}

fn parse_direction(raw: &str) -> Direction {
    match raw {
        "one_way" => Direction::OneWay,
        "left_to_right" => Direction::LeftToRight,
        "right_to_left" => Direction::RightToLeft,
        "top_to_bottom" => Direction::TopToBottom,
        "bottom_to_top" => Direction::BottomToTop,
        _ => Direction::Bidirectional,
    }
}

impl ZoneConfig {
    /// `spec.md` §3 zone validation, generalizing `_validate_and_parse_zones`'s
    /// `ValueError`s into typed `Errors::InvalidZone`.
    pub fn into_zone(self) -> Result<Zone, Errors> {
        let coordinate_type = parse_coordinate_type(self.coordinate_type.as_deref());
        // enter/exit thresholds in the source are fractional frame-ratios
        // (default 0.5) against an integer frame counter, which in practice
        // always means "the very first in/out frame already satisfies it" —
        // so this crate's integer-frame `Zone` rounds any threshold <= 1.0
        // up to 1 frame rather than carrying the float through.
        let enter_threshold = self.enter_threshold.max(1.0).round() as u32;
        let exit_threshold = self.exit_threshold.max(1.0).round() as u32;

        match self.zone_type.as_str() {
            "polygon" => {
                let points = self
                    .points
                    .ok_or_else(|| Errors::InvalidZone(self.zone_id.clone(), "polygon zone must have 'points'".into()))?;
                Zone::new_polygon(self.zone_id, self.name, coordinate_type, points, enter_threshold, exit_threshold, self.active)
            }
            "line" => {
                let start = self
                    .start_point
                    .ok_or_else(|| Errors::InvalidZone(self.zone_id.clone(), "line zone must have 'start_point'".into()))?;
                let end = self
                    .end_point
                    .ok_or_else(|| Errors::InvalidZone(self.zone_id.clone(), "line zone must have 'end_point'".into()))?;
                let side = parse_side(&self.side);
                let direction = if self.direction == default_zone_direction() {
                    parse_direction(&default_line_direction())
                } else {
                    parse_direction(&self.direction)
                };
                Ok(Zone::new_line(
                    self.zone_id,
                    self.name,
                    coordinate_type,
                    start,
                    end,
                    side,
                    direction,
                    enter_threshold,
                    exit_threshold,
                    self.active,
                ))
            }
            other => Err(Errors::InvalidZone(self.zone_id, format!("unknown zone type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub channel_id: u32,
    pub rtsp_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub features: HashMap<String, FeatureToggle>,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_redis_ttl")]
    pub redis_ttl_seconds: u64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_similarity_threshold() -> f32 {
    crate::identity::DEFAULT_SIMILARITY_THRESHOLD
}

fn default_redis_ttl() -> u64 {
    crate::identity::DEFAULT_REDIS_TTL_SECONDS
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: crate::identity::DEFAULT_SIMILARITY_THRESHOLD,
            redis_ttl_seconds: default_redis_ttl(),
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// `redis://...`; absent means run on the in-memory KV fallback from
    /// process start (`spec.md` §4.2).
    pub kv_url: Option<String>,
    /// Postgres DSN; absent means run on the in-memory event sink.
    pub event_sink_dsn: Option<String>,
    #[serde(default = "default_pool_size")]
    pub event_sink_pool_size: u32,
}

fn default_pool_size() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub address: String,
    pub server: ServerInfo,
    pub credentials: Credentials,
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub default_features: FeatureToggles,
    #[serde(default)]
    pub identity: IdentityConfig,
    pub storage: StorageConfig,
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, Errors> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Errors::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Errors::Config(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Mirrors `validate_config`'s required-key checks: a non-empty channel
    /// list, each with a `channel_id` and `rtsp_url`.
    pub fn validate(&self) -> Result<(), Errors> {
        if self.channels.is_empty() {
            return Err(Errors::Config("channels must be a non-empty list".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.channel_id) {
                return Err(Errors::Config(format!("duplicate channel_id {}", channel.channel_id)));
            }
            if channel.rtsp_url.is_empty() {
                return Err(Errors::Config(format!("channel {}: missing rtsp_url", channel.channel_id)));
            }
        }
        Ok(())
    }

    pub fn channel(&self, channel_id: u32) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.channel_id == channel_id)
    }

    /// `get_channel_features` — channel-specific toggles override the
    /// system/config defaults, merged key by key rather than wholesale.
    pub fn feature_enabled(&self, channel_id: u32, feature_name: &str) -> bool {
        self.channel(channel_id)
            .and_then(|c| c.features.get(feature_name))
            .map(|f| f.enabled)
            .unwrap_or_else(|| self.default_toggle(feature_name).enabled)
    }

    fn default_toggle(&self, feature_name: &str) -> FeatureToggle {
        match feature_name {
            "body_detection" => self.default_features.body_detection,
            "tracking" => self.default_features.tracking,
            "reid" => self.default_features.reid,
            "gender_classification" => self.default_features.gender_classification,
            "counter" => self.default_features.counter,
            "staff_filter" => self.default_features.staff_filter,
            _ => FeatureToggle::default(),
        }
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.identity.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "company": "Acme Retail",
            "server": {"host": "0.0.0.0", "port": 8080},
            "credentials": {"username": "admin", "password": "secret"},
            "channels": [
                {
                    "channel_id": 1,
                    "rtsp_url": "rtsp://cam1",
                    "zones": [
                        {
                            "zone_id": "entrance",
                            "name": "Entrance",
                            "type": "polygon",
                            "points": [[0,0],[100,0],[100,100],[0,100]]
                        }
                    ]
                }
            ],
            "storage": {"kv_url": null, "event_sink_dsn": null}
        }"#
    }

    #[test]
    fn parses_minimal_config_and_applies_defaults() {
        let config: Config = serde_json::from_str(sample_json()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.channels.len(), 1);
        assert!(config.feature_enabled(1, "counter"));
        assert!(config.feature_enabled(1, "body_detection"));
    }

    #[test]
    fn rejects_empty_channel_list() {
        let config = Config {
            company: String::new(),
            address: String::new(),
            server: ServerInfo { host: "h".into(), port: 1 },
            credentials: Credentials { username: "u".into(), password: "p".into() },
            channels: vec![],
            default_features: FeatureToggles::default(),
            identity: IdentityConfig::default(),
            storage: StorageConfig { kv_url: None, event_sink_dsn: None, event_sink_pool_size: 5 },
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zone_config_converts_polygon_to_zone() {
        let config: Config = serde_json::from_str(sample_json()).unwrap();
        let zone_config = config.channels[0].zones[0].clone();
        let zone = zone_config.into_zone().unwrap();
        assert_eq!(zone.zone_id, "entrance");
    }
}
