//! Settings management for camlinkd.
//!
//! Settings are a JSON document written by the camera's settings CGI. The
//! document is parsed once at startup into [`Settings`] and validated as a
//! whole: every problem found is reported in a single
//! [`ConfigError::Invalid`](crate::error::ConfigError::Invalid), so a broken
//! settings form fails fast instead of tripping over a missing field deep
//! inside a loop.

use std::{
    collections::HashSet,
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::format::{Item, StrftimeItems};
use log::info;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;

use crate::{
    error::ConfigError,
    sources::stream::StreamEndpoint,
    transforms::{
        condition::Operator,
        geo::Area,
        sheets::{CellRef, range_origin},
        units::{TemperatureUnit, UnitSystem},
    },
};

/// Name of the settings file inside the data directories.
pub const SETTINGS_FILE: &str = "settings.json";

/// Environment variable naming the persistent data directory.
pub const PERSISTENT_DATA_PATH: &str = "PERSISTENT_DATA_PATH";

/// Environment variable naming the bundled asset directory.
pub const INSTALL_PATH: &str = "INSTALL_PATH";

/// Root settings document.
///
/// # Example
///
/// ```json
/// {
///   "camera": { "protocol": "http", "ip": "127.0.0.1", "port": 80,
///               "user": "root", "pass": "pass" },
///   "package": {
///     "kind": "scale",
///     "source": { "type": "tcp", "ip": "10.0.0.20", "port": 4001 },
///     "service_id": 1
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Settings layout version.
    #[serde(default = "defaults::version")]
    pub version: u8,

    /// Camera running the overlay and event services.
    #[serde(default)]
    pub camera: CameraCfg,

    /// Camera whose VAPIX events are consumed. Defaults to `camera`.
    #[serde(default)]
    pub event_camera: Option<CameraCfg>,

    /// Upper bound for every HTTP request, in milliseconds.
    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// The package this process runs.
    pub package: PackageCfg,
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn event_camera(&self) -> &CameraCfg {
        self.event_camera.as_ref().unwrap_or(&self.camera)
    }

    /// Validates the whole document, collecting every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.version != 1 {
            problems.push(format!("unsupported settings version {}", self.version));
        }
        if self.request_timeout_ms == 0 {
            problems.push("request_timeout_ms must be greater than 0".to_string());
        }
        self.camera.check("camera", &mut problems);
        if let Some(cam) = &self.event_camera {
            cam.check("event_camera", &mut problems);
        }
        self.package.check(&mut problems);

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }
}

/// Transport used to reach the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    /// HTTPS without certificate verification (self-signed camera certs).
    HttpsInsecure,
}

/// Connection parameters of a camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraCfg {
    #[serde(default)]
    pub protocol: Protocol,

    #[serde(default = "defaults::camera_ip")]
    pub ip: String,

    /// Defaults to 80 for HTTP and 443 for HTTPS.
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub pass: String,
}

impl Default for CameraCfg {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            ip: defaults::camera_ip(),
            port: None,
            user: String::new(),
            pass: String::new(),
        }
    }
}

impl CameraCfg {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.protocol {
            Protocol::Http => 80,
            Protocol::Https | Protocol::HttpsInsecure => 443,
        })
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self.protocol, Protocol::Http)
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.is_tls() { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.ip, self.port())
    }

    pub fn ws_url(&self, path: &str) -> String {
        let scheme = if self.is_tls() { "wss" } else { "ws" };
        format!("{scheme}://{}:{}{path}", self.ip, self.port())
    }

    pub fn has_credentials(&self) -> bool {
        !self.user.is_empty()
    }

    fn check(&self, prefix: &str, problems: &mut Vec<String>) {
        if self.ip.trim().is_empty() {
            problems.push(format!("{prefix}.ip is empty"));
        }
        if self.port == Some(0) {
            problems.push(format!("{prefix}.port must not be 0"));
        }
    }
}

/// USB device selector by vendor/product id.
///
/// Ids are accepted as JSON numbers or hex strings (`"0x413d"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbSelector {
    #[serde(deserialize_with = "hex_id")]
    pub vid: u16,

    #[serde(deserialize_with = "hex_id")]
    pub pid: u16,

    /// Optional serial number to pick one of several identical devices.
    #[serde(default)]
    pub serial: Option<String>,
}

impl std::fmt::Display for UsbSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)?;
        if let Some(serial) = &self.serial {
            write!(f, " (serial {serial})")?;
        }
        Ok(())
    }
}

pub(crate) fn hex_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u16),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => {
            let trimmed = s.trim();
            let digits = trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
                .unwrap_or(trimmed);
            u16::from_str_radix(digits, 16).map_err(serde::de::Error::custom)
        }
    }
}

/// Package selected by the `kind` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PackageCfg {
    Scale(ScaleCfg),
    PositionImage(PositionImageCfg),
    Weather(WeatherCfg),
    AirQuality(AirQualityCfg),
    Sheets(SheetsCfg),
    Temper(TemperCfg),
    LuxMeter(LuxMeterCfg),
    EventGraphics(EventGraphicsCfg),
}

impl PackageCfg {
    pub fn kind(&self) -> &'static str {
        match self {
            PackageCfg::Scale(_) => "scale",
            PackageCfg::PositionImage(_) => "position-image",
            PackageCfg::Weather(_) => "weather",
            PackageCfg::AirQuality(_) => "air-quality",
            PackageCfg::Sheets(_) => "sheets",
            PackageCfg::Temper(_) => "temper",
            PackageCfg::LuxMeter(_) => "lux-meter",
            PackageCfg::EventGraphics(_) => "event-graphics",
        }
    }

    /// Every overlay service id the package may touch.
    pub fn service_ids(&self) -> Vec<u32> {
        let mut ids = match self {
            PackageCfg::Scale(c) => vec![c.service_id],
            PackageCfg::PositionImage(c) => c
                .areas
                .iter()
                .flat_map(|a| a.service_ids.iter().copied())
                .collect(),
            PackageCfg::Weather(c) => vec![c.service_id],
            PackageCfg::AirQuality(c) => vec![c.service_id],
            PackageCfg::Sheets(c) => vec![c.service_id],
            PackageCfg::Temper(c) => vec![c.service_id],
            PackageCfg::LuxMeter(c) => vec![c.service_id],
            PackageCfg::EventGraphics(c) => c.rules.iter().map(|r| r.service_id).collect(),
        };
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn check(&self, problems: &mut Vec<String>) {
        let mut p = Problems::new("package", problems);
        match self {
            PackageCfg::Scale(c) => {
                check_endpoint(&c.source, "package.source", p.list);
                p.service_id("service_id", c.service_id);
                p.non_empty("value_field", &c.value_field);
                p.non_empty("unit_field", &c.unit_field);
            }
            PackageCfg::PositionImage(c) => {
                check_endpoint(&c.source, "package.source", p.list);
                if c.areas.is_empty() {
                    p.push("areas must contain at least one area");
                }
                for (i, area) in c.areas.iter().enumerate() {
                    let name = format!("areas[{i}]");
                    if !(-90.0..=90.0).contains(&area.lat) {
                        p.push(format!("{name}.lat {} is out of range", area.lat));
                    }
                    if !(-180.0..=180.0).contains(&area.lon) {
                        p.push(format!("{name}.lon {} is out of range", area.lon));
                    }
                    if area.radius.is_nan() || area.radius <= 0.0 {
                        p.push(format!("{name}.radius must be positive"));
                    }
                    if area.service_ids.is_empty() {
                        p.push(format!("{name}.service_ids is empty"));
                    }
                    if area.service_ids.contains(&0) {
                        p.push(format!("{name}.service_ids contains 0"));
                    }
                }
            }
            PackageCfg::Weather(c) => {
                p.non_empty("api_key", &c.api_key);
                p.non_empty("location_key", &c.location_key);
                p.non_empty("api_url", &c.api_url);
                p.service_id("service_id", c.service_id);
                p.interval("interval_secs", c.interval_secs);
            }
            PackageCfg::AirQuality(c) => {
                p.non_empty("token", &c.token);
                p.non_empty("city", &c.city);
                p.non_empty("api_url", &c.api_url);
                p.service_id("service_id", c.service_id);
                p.interval("interval_secs", c.interval_secs);
                if StrftimeItems::new(&c.time_format).any(|item| matches!(item, Item::Error)) {
                    p.push(format!("time_format '{}' is not a valid format", c.time_format));
                }
            }
            PackageCfg::Sheets(c) => {
                p.non_empty("api_key", &c.api_key);
                p.non_empty("spreadsheet_id", &c.spreadsheet_id);
                p.non_empty("api_url", &c.api_url);
                p.service_id("service_id", c.service_id);
                p.interval("interval_secs", c.interval_secs);
                if range_origin(&c.range).is_none() {
                    p.push(format!("range '{}' is not valid A1 notation", c.range));
                }
                if c.cells.is_empty() {
                    p.push("cells must map at least one cell");
                }
                for (i, cell) in c.cells.iter().enumerate() {
                    if CellRef::parse(&cell.cell).is_none() {
                        p.push(format!("cells[{i}].cell '{}' is not a cell reference", cell.cell));
                    }
                    if cell.field.trim().is_empty() {
                        p.push(format!("cells[{i}].field is empty"));
                    }
                }
            }
            PackageCfg::Temper(c) => {
                if c.usb.vid == 0 || c.usb.pid == 0 {
                    p.push("usb vid/pid must not be 0");
                }
                p.service_id("service_id", c.service_id);
                p.non_empty("field", &c.field);
                p.interval("interval_secs", c.interval_secs);
                if c.precision > 6 {
                    p.push("precision must be at most 6");
                }
                let mut seen = HashSet::new();
                for (i, cond) in c.conditions.iter().enumerate() {
                    if cond.name.trim().is_empty() {
                        p.push(format!("conditions[{i}].name is empty"));
                    } else if !seen.insert(cond.name.as_str()) {
                        p.push(format!("conditions[{i}].name '{}' is duplicated", cond.name));
                    }
                    if !cond.value.is_finite() {
                        p.push(format!("conditions[{i}].value is not a number"));
                    }
                }
            }
            PackageCfg::LuxMeter(c) => {
                check_endpoint(&c.source, "package.source", p.list);
                p.service_id("service_id", c.service_id);
                p.non_empty("field", &c.field);
            }
            PackageCfg::EventGraphics(c) => {
                if c.rules.is_empty() {
                    p.push("rules must contain at least one rule");
                }
                for (i, rule) in c.rules.iter().enumerate() {
                    if rule.topic.trim().is_empty() {
                        p.push(format!("rules[{i}].topic is empty"));
                    }
                    if rule.service_id == 0 {
                        p.push(format!("rules[{i}].service_id must not be 0"));
                    }
                    if rule.value.is_some() && rule.key.is_none() {
                        p.push(format!("rules[{i}].value is set without key"));
                    }
                }
            }
        }
    }
}

struct Problems<'a> {
    prefix: &'static str,
    list: &'a mut Vec<String>,
}

impl<'a> Problems<'a> {
    fn new(prefix: &'static str, list: &'a mut Vec<String>) -> Self {
        Self { prefix, list }
    }

    fn push(&mut self, problem: impl Into<String>) {
        self.list.push(format!("{}.{}", self.prefix, problem.into()));
    }

    fn non_empty(&mut self, name: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(format!("{name} is empty"));
        }
    }

    fn service_id(&mut self, name: &str, value: u32) {
        if value == 0 {
            self.push(format!("{name} must not be 0"));
        }
    }

    fn interval(&mut self, name: &str, value: u64) {
        if value == 0 {
            self.push(format!("{name} must be greater than 0"));
        }
    }
}

fn check_endpoint(endpoint: &StreamEndpoint, prefix: &str, problems: &mut Vec<String>) {
    match endpoint {
        StreamEndpoint::Tcp { ip, port } => {
            if ip.trim().is_empty() {
                problems.push(format!("{prefix}.ip is empty"));
            }
            if *port == 0 {
                problems.push(format!("{prefix}.port must not be 0"));
            }
        }
        StreamEndpoint::Device { path } => {
            if path.as_os_str().is_empty() {
                problems.push(format!("{prefix}.path is empty"));
            }
        }
        StreamEndpoint::Usb(usb) => {
            if usb.vid == 0 || usb.pid == 0 {
                problems.push(format!("{prefix} usb vid/pid must not be 0"));
            }
        }
    }
}

/// Serial or TCP scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleCfg {
    pub source: StreamEndpoint,
    pub service_id: u32,
    #[serde(default = "defaults::value_field")]
    pub value_field: String,
    #[serde(default = "defaults::unit_field")]
    pub unit_field: String,
}

/// Shows overlay services depending on where a GPS receiver reports the
/// camera to be.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionImageCfg {
    /// NMEA sentence stream.
    pub source: StreamEndpoint,
    pub areas: Vec<Area>,
}

/// AccuWeather current conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherCfg {
    pub api_key: String,
    pub location_key: String,
    #[serde(default)]
    pub units: UnitSystem,
    pub service_id: u32,
    #[serde(default = "defaults::weather_interval")]
    pub interval_secs: u64,
    #[serde(default = "defaults::weather_api_url")]
    pub api_url: String,
}

/// waqi.info air quality feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirQualityCfg {
    pub token: String,
    pub city: String,
    pub service_id: u32,
    #[serde(default = "defaults::air_quality_interval")]
    pub interval_secs: u64,
    #[serde(default = "defaults::air_quality_api_url")]
    pub api_url: String,
    #[serde(default = "defaults::time_format")]
    pub time_format: String,
}

/// Google Sheets values mapped onto overlay fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsCfg {
    pub api_key: String,
    pub spreadsheet_id: String,
    pub range: String,
    pub service_id: u32,
    #[serde(default = "defaults::sheets_interval")]
    pub interval_secs: u64,
    #[serde(default = "defaults::sheets_api_url")]
    pub api_url: String,
    pub cells: Vec<CellFieldCfg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellFieldCfg {
    pub cell: String,
    pub field: String,
}

/// USB TEMPer thermometer with optional threshold events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperCfg {
    #[serde(default = "defaults::temper_usb")]
    pub usb: UsbSelector,
    #[serde(default)]
    pub unit: TemperatureUnit,
    #[serde(default = "defaults::precision")]
    pub precision: usize,
    pub service_id: u32,
    #[serde(default = "defaults::temperature_field")]
    pub field: String,
    #[serde(default = "defaults::temper_interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub conditions: Vec<ConditionCfg>,
}

/// Threshold condition reported as a camera event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionCfg {
    pub name: String,
    pub operator: Operator,
    /// Threshold in the package's display unit.
    pub value: f64,
    #[serde(default)]
    pub delay_secs: u64,
    #[serde(default)]
    pub repeat_after_secs: Option<u64>,
}

/// Lux meter streaming STX/LF frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LuxMeterCfg {
    pub source: StreamEndpoint,
    pub service_id: u32,
    #[serde(default = "defaults::lux_field")]
    pub field: String,
    #[serde(default)]
    pub precision: usize,
}

/// Shows overlay services while matching VAPIX events are active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventGraphicsCfg {
    pub rules: Vec<EventRuleCfg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRuleCfg {
    /// VAPIX topic filter, e.g. `tns1:Device/tnsaxis:IO/Port`.
    pub topic: String,
    pub service_id: u32,
    /// Hide after this many seconds; 0 follows the event state.
    #[serde(default)]
    pub duration_secs: u64,
    /// Source/data key that must equal `value` for the rule to match.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

mod defaults {
    use super::UsbSelector;

    pub fn version() -> u8 {
        1
    }

    pub fn request_timeout_ms() -> u64 {
        10_000
    }

    pub fn camera_ip() -> String {
        "127.0.0.1".to_string()
    }

    pub fn value_field() -> String {
        "value".to_string()
    }

    pub fn unit_field() -> String {
        "unit".to_string()
    }

    pub fn temperature_field() -> String {
        "temperature".to_string()
    }

    pub fn lux_field() -> String {
        "lux".to_string()
    }

    pub fn precision() -> usize {
        1
    }

    pub fn weather_interval() -> u64 {
        600
    }

    pub fn weather_api_url() -> String {
        "http://dataservice.accuweather.com".to_string()
    }

    pub fn air_quality_interval() -> u64 {
        900
    }

    pub fn air_quality_api_url() -> String {
        "https://api.waqi.info".to_string()
    }

    pub fn time_format() -> String {
        "%H:%M".to_string()
    }

    pub fn sheets_interval() -> u64 {
        60
    }

    pub fn sheets_api_url() -> String {
        "https://sheets.googleapis.com".to_string()
    }

    pub fn temper_interval() -> u64 {
        10
    }

    /// TEMPerGold.
    pub fn temper_usb() -> UsbSelector {
        UsbSelector {
            vid: 0x413d,
            pid: 0x2107,
            serial: None,
        }
    }
}

/// Candidate settings locations, most specific first.
fn candidate_paths(var: impl Fn(&str) -> Option<OsString>) -> Vec<PathBuf> {
    [PERSISTENT_DATA_PATH, INSTALL_PATH]
        .iter()
        .filter_map(|name| var(name))
        .filter(|dir| !dir.is_empty())
        .map(|dir| PathBuf::from(dir).join(SETTINGS_FILE))
        .collect()
}

fn locate_settings(var: impl Fn(&str) -> Option<OsString>) -> Result<PathBuf, ConfigError> {
    let searched = candidate_paths(var);
    searched
        .iter()
        .find(|p| p.exists())
        .cloned()
        .ok_or(ConfigError::NotFound { searched })
}

/// Owns the loaded settings and the file they came from.
///
/// # Example
///
/// ```no_run
/// use camlinkd::config::ConfigManager;
///
/// # async fn example() -> anyhow::Result<()> {
/// // $PERSISTENT_DATA_PATH/settings.json, then $INSTALL_PATH/settings.json
/// let config_manager = ConfigManager::load(None).await?;
/// println!("running {}", config_manager.get().await.package.kind());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    settings: Arc<RwLock<Settings>>,
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(settings: Settings, path: PathBuf) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings)),
            path,
        }
    }

    /// Loads settings from `path`, or from the standard locations:
    /// 1. `$PERSISTENT_DATA_PATH/settings.json`
    /// 2. `$INSTALL_PATH/settings.json`
    pub async fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let settings_path = match path {
            Some(p) => p,
            None => locate_settings(|name| env::var_os(name))?,
        };

        info!("Loading settings from: {}", settings_path.display());
        let settings = Self::load_settings_from_path(&settings_path)?;

        Ok(Self::new(settings, settings_path))
    }

    pub async fn get(&self) -> tokio::sync::RwLockReadGuard<'_, Settings> {
        self.settings.read().await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn clone_settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Re-reads the settings file. The current settings stay in place when
    /// the new file does not validate.
    pub async fn reload(&self) -> Result<(), ConfigError> {
        info!("Reloading settings from: {}", self.path.display());
        let new_settings = Self::load_settings_from_path(&self.path)?;
        *self.settings.write().await = new_settings;
        Ok(())
    }

    fn load_settings_from_path(path: &Path) -> Result<Settings, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let settings: Settings =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_settings(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    const SCALE: &str = r#"{
        "camera": { "ip": "192.168.0.90", "user": "root", "pass": "secret" },
        "package": {
            "kind": "scale",
            "source": { "type": "tcp", "ip": "10.0.0.20", "port": 4001 },
            "service_id": 3
        }
    }"#;

    #[tokio::test]
    async fn loads_valid_scale_settings() {
        let file = create_temp_settings(SCALE);
        let manager = ConfigManager::load(Some(file.path().to_path_buf()))
            .await
            .unwrap();
        let settings = manager.clone_settings().await;

        assert_eq!(settings.version, 1);
        assert_eq!(settings.request_timeout(), Duration::from_secs(10));
        assert_eq!(settings.camera.base_url(), "http://192.168.0.90:80");
        assert_eq!(settings.event_camera(), &settings.camera);
        match settings.package {
            PackageCfg::Scale(scale) => {
                assert_eq!(scale.service_id, 3);
                assert_eq!(scale.value_field, "value");
                assert_eq!(scale.unit_field, "unit");
                assert_eq!(
                    scale.source,
                    StreamEndpoint::Tcp {
                        ip: "10.0.0.20".into(),
                        port: 4001
                    }
                );
            }
            other => panic!("unexpected package {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error() {
        let file = create_temp_settings("{ \"package\": ");
        let err = ConfigManager::load(Some(file.path().to_path_buf()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let err = ConfigManager::load(Some(PathBuf::from("/nonexistent/settings.json")))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn validation_collects_every_problem() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "version": 2,
                "camera": { "ip": "", "port": 0 },
                "package": {
                    "kind": "position-image",
                    "source": { "type": "tcp", "ip": "gps", "port": 0 },
                    "areas": [ { "lat": 95.0, "lon": 14.0, "radius": -1, "service_ids": [] } ]
                }
            }"#,
        )
        .unwrap();

        let Err(ConfigError::Invalid { problems }) = settings.validate() else {
            panic!("expected aggregated validation error");
        };
        assert_eq!(
            problems,
            vec![
                "unsupported settings version 2",
                "camera.ip is empty",
                "camera.port must not be 0",
                "package.source.port must not be 0",
                "package.areas[0].lat 95 is out of range",
                "package.areas[0].radius must be positive",
                "package.areas[0].service_ids is empty",
            ]
        );
    }

    #[test]
    fn temper_defaults_and_hex_ids() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "package": {
                    "kind": "temper",
                    "usb": { "vid": "0x0c45", "pid": 29697 },
                    "service_id": 2,
                    "conditions": [ { "name": "hot", "operator": ">=", "value": 30 } ]
                }
            }"#,
        )
        .unwrap();
        settings.validate().unwrap();

        let PackageCfg::Temper(temper) = settings.package else {
            panic!("expected temper");
        };
        assert_eq!(temper.usb.vid, 0x0c45);
        assert_eq!(temper.usb.pid, 0x7401);
        assert_eq!(temper.unit, TemperatureUnit::Celsius);
        assert_eq!(temper.interval_secs, 10);
        assert_eq!(temper.conditions[0].operator, Operator::Ge);
    }

    #[test]
    fn duplicate_condition_names_are_rejected() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "package": {
                    "kind": "temper",
                    "service_id": 2,
                    "conditions": [
                        { "name": "hot", "operator": ">", "value": 30 },
                        { "name": "hot", "operator": "<", "value": 0 }
                    ]
                }
            }"#,
        )
        .unwrap();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("conditions[1].name 'hot' is duplicated"));
    }

    #[test]
    fn bad_sheet_refs_and_time_format() {
        let sheets: Settings = serde_json::from_str(
            r#"{
                "package": {
                    "kind": "sheets", "api_key": "k", "spreadsheet_id": "s",
                    "range": "Sheet1!A1:B2", "service_id": 1,
                    "cells": [ { "cell": "ZZ", "field": "score" } ]
                }
            }"#,
        )
        .unwrap();
        assert!(sheets.validate().unwrap_err().to_string().contains("'ZZ'"));

        let air: Settings = serde_json::from_str(
            r#"{
                "package": {
                    "kind": "air-quality", "token": "t", "city": "prague",
                    "service_id": 1, "time_format": "%Q"
                }
            }"#,
        )
        .unwrap();
        assert!(air.validate().unwrap_err().to_string().contains("time_format"));
    }

    #[test]
    fn unknown_kind_fails_to_parse() {
        let result = serde_json::from_str::<Settings>(r#"{ "package": { "kind": "toaster" } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn https_camera_urls() {
        let cam = CameraCfg {
            protocol: Protocol::HttpsInsecure,
            ip: "cam.local".into(),
            port: None,
            user: "root".into(),
            pass: "pass".into(),
        };
        assert_eq!(cam.base_url(), "https://cam.local:443");
        assert_eq!(cam.ws_url("/local/camscripter/ws"), "wss://cam.local:443/local/camscripter/ws");
    }

    #[test]
    fn locate_prefers_persistent_data() {
        let persistent = tempfile::tempdir().unwrap();
        let install = tempfile::tempdir().unwrap();
        fs::write(persistent.path().join(SETTINGS_FILE), SCALE).unwrap();
        fs::write(install.path().join(SETTINGS_FILE), SCALE).unwrap();

        let var = |name: &str| match name {
            PERSISTENT_DATA_PATH => Some(persistent.path().as_os_str().to_owned()),
            INSTALL_PATH => Some(install.path().as_os_str().to_owned()),
            _ => None,
        };
        assert_eq!(
            locate_settings(var).unwrap(),
            persistent.path().join(SETTINGS_FILE)
        );
    }

    #[test]
    fn locate_falls_back_to_install_path() {
        let persistent = tempfile::tempdir().unwrap();
        let install = tempfile::tempdir().unwrap();
        fs::write(install.path().join(SETTINGS_FILE), SCALE).unwrap();

        let var = |name: &str| match name {
            PERSISTENT_DATA_PATH => Some(persistent.path().as_os_str().to_owned()),
            INSTALL_PATH => Some(install.path().as_os_str().to_owned()),
            _ => None,
        };
        assert_eq!(locate_settings(var).unwrap(), install.path().join(SETTINGS_FILE));
    }

    #[tokio::test]
    #[serial]
    async fn load_without_any_location_is_not_found() {
        let empty = tempfile::tempdir().unwrap();
        // SAFETY: serialised with every other test touching the environment.
        unsafe {
            env::set_var(PERSISTENT_DATA_PATH, empty.path());
            env::remove_var(INSTALL_PATH);
        }

        let err = ConfigManager::load(None).await.unwrap_err();

        unsafe {
            env::remove_var(PERSISTENT_DATA_PATH);
        }
        match err {
            ConfigError::NotFound { searched } => {
                assert_eq!(searched, vec![empty.path().join(SETTINGS_FILE)]);
            }
            other => panic!("expected NotFound, got {other}"),
        }
    }

    #[tokio::test]
    async fn reload_keeps_old_settings_on_error() {
        let file = create_temp_settings(SCALE);
        let manager = ConfigManager::load(Some(file.path().to_path_buf()))
            .await
            .unwrap();

        fs::write(file.path(), "not json").unwrap();
        assert!(manager.reload().await.is_err());
        assert_eq!(manager.get().await.package.kind(), "scale");
    }
}
