//! Wire and domain types shared across the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `{facility, severity, timestamp, hostname, appname, procid, message}`.
///
/// Invariants: `facility = priority / 8`, `severity = priority % 8`,
/// `priority` in `[0, 191]`; `hostname` is `None` when the wire value is `-`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyslogMessage {
    pub facility: u8,
    pub severity: u8,
    pub timestamp: DateTime<Utc>,
    pub hostname: Option<String>,
    pub appname: String,
    pub procid: String,
    pub message: String,
}

impl SyslogMessage {
    /// Split a `[0, 191]` priority value into `(facility, severity)`.
    pub fn facility_severity(priority: u16) -> (u8, u8) {
        ((priority / 8) as u8, (priority % 8) as u8)
    }
}

/// The package archive types recognized in the `TYPE` field of the event grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageType {
    Sdist,
    BdistWheel,
    BdistDmg,
    BdistDumb,
    BdistEgg,
    BdistMsi,
    BdistRpm,
    BdistWininst,
}

impl PackageType {
    /// Parse the wire token used in the event grammar (e.g. `bdist_wheel`).
    pub fn from_wire(s: &str) -> Option<Self> {
        Some(match s {
            "sdist" => PackageType::Sdist,
            "bdist_wheel" => PackageType::BdistWheel,
            "bdist_dmg" => PackageType::BdistDmg,
            "bdist_dumb" => PackageType::BdistDumb,
            "bdist_egg" => PackageType::BdistEgg,
            "bdist_msi" => PackageType::BdistMsi,
            "bdist_rpm" => PackageType::BdistRpm,
            "bdist_wininst" => PackageType::BdistWininst,
            _ => return None,
        })
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            PackageType::Sdist => "sdist",
            PackageType::BdistWheel => "bdist_wheel",
            PackageType::BdistDmg => "bdist_dmg",
            PackageType::BdistDumb => "bdist_dumb",
            PackageType::BdistEgg => "bdist_egg",
            PackageType::BdistMsi => "bdist_msi",
            PackageType::BdistRpm => "bdist_rpm",
            PackageType::BdistWininst => "bdist_wininst",
        }
    }
}

/// `{filename, project, version, type}`. Invariant: `filename` is the
/// POSIX basename of the originating URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub filename: String,
    pub project: Option<String>,
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub package_type: Option<PackageType>,
}

/// One normalized package-file download event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Download {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub file: File,
    pub tls_protocol: Option<String>,
    pub tls_cipher: Option<String>,
    pub country_code: Option<String>,
    pub details: Option<UserAgent>,
}

/// A normalized package-index listing request — no file.
///
/// Simple requests are parsed but not forwarded to the sink (the sink's
/// schema is download-shaped); kept here so callers can observe/count them
/// without the assembler silently discarding information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleRequest {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub project: Option<String>,
    pub tls_protocol: Option<String>,
    pub tls_cipher: Option<String>,
    pub country_code: Option<String>,
    pub details: Option<UserAgent>,
}

/// Canonicalize a simple-request project name: lower-case, non-alphanumeric
/// runs collapsed to a single `-`.
pub fn canonicalize_simple_project(last_segment: &str) -> String {
    let mut out = String::with_capacity(last_segment.len());
    let mut last_was_dash = false;
    for c in last_segment.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadShape {
    pub timestamp: DateTime<Utc>,
    pub country_code: Option<String>,
    pub url: String,
    pub tls_protocol: Option<String>,
    pub tls_cipher: Option<String>,
    pub project: Option<String>,
    pub version: Option<String>,
    pub package_type: Option<PackageType>,
    pub ua_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleShape {
    pub timestamp: DateTime<Utc>,
    pub country_code: Option<String>,
    pub url: String,
    pub tls_protocol: Option<String>,
    pub tls_cipher: Option<String>,
    pub ua_text: String,
}

/// Nested, fully-optional user-agent classification result. At least one
/// field is set whenever a parser actually succeeds — an all-`None` value is
/// never constructed by the classifier (callers should treat it the same as
/// "no UA" if one is ever seen, e.g. from a fixture).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAgent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer: Option<NameVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation: Option<NameVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distro: Option<Distro>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openssl_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setuptools_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci: Option<bool>,
}

impl UserAgent {
    pub fn is_empty(&self) -> bool {
        self.installer.is_none()
            && self.python.is_none()
            && self.implementation.is_none()
            && self.distro.is_none()
            && self.system.is_none()
            && self.cpu.is_none()
            && self.openssl_version.is_none()
            && self.setuptools_version.is_none()
            && self.ci.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameVersion {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Distro {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub libc: Option<Libc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Libc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lib: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
}

/// One column of an analytics-table schema, as returned by
/// `AnalyticsSink::get_schema` / consumed by `AnalyticsSink::update_schema`
/// and walked by the migrator. Mirrors BigQuery's column
/// shape (`name`/`type`/`mode`/nested `fields` for `RECORD` columns), which
/// is what the sink this crate ships against actually speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<SchemaField>>,
}

/// Sink-ready row: `{insertId, json}`.
#[derive(Debug, Clone, Serialize)]
pub struct Row {
    #[serde(rename = "insertId")]
    pub insert_id: Uuid,
    pub json: serde_json::Value,
}

impl Row {
    /// Build a row from a `Download`, re-encoding `timestamp` as floating
    /// point Unix seconds. `insert_id` is supplied by the caller so
    /// retries of the same row can reuse it.
    pub fn from_download(download: &Download, insert_id: Uuid) -> serde_json::Result<Self> {
        let mut json = serde_json::to_value(download)?;
        if let serde_json::Value::Object(ref mut map) = json {
            let secs = download.timestamp.timestamp() as f64
                + download.timestamp.timestamp_subsec_nanos() as f64 / 1e9;
            map.insert(
                "timestamp".to_string(),
                serde_json::Number::from_f64(secs)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
            );
        }
        Ok(Row { insert_id, json })
    }
}

/// POSIX basename of a URL path (last `/`-separated, non-empty segment).
pub fn url_basename(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(path).to_string()
}

/// Last non-empty path segment of a URL, used as the raw project name for
/// simple-index requests before canonicalization.
pub fn url_last_segment(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.split('/').rev().find(|s| !s.is_empty()).map(|s| s.to_string())
}
