//! Event grammar parser.
//!
//! The message payload carried by the syslog `MESSAGE` field is one of three
//! pipe-delimited grammar versions, selected by an optional leading tag.
//! The highest-versioned tag found wins; an untagged payload is treated as v1.

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::EventError;
use crate::models::{DownloadShape, PackageType, SimpleShape};

/// `Day, DD MON YYYY HH:MM:SS GMT` — weekday and zone are skipped, not
/// validated, since a mismatched weekday is not a parse error.
static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[A-Za-z]{3}, )?(\d{1,2} [A-Za-z]{3} \d{4} \d{2}:\d{2}:\d{2}) GMT$").unwrap());

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, EventError> {
    let caps = TIMESTAMP_RE.captures(s.trim()).ok_or_else(|| EventError::UnparseableEvent {
        reason: format!("bad timestamp: {s:?}"),
    })?;
    let naive = NaiveDateTime::parse_from_str(&caps[1], "%d %b %Y %H:%M:%S").map_err(|e| {
        EventError::UnparseableEvent {
            reason: format!("bad timestamp body {:?}: {e}", &caps[1]),
        }
    })?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

/// `(null)` or empty ⇒ `None`; anything else passes through as-is (whitespace
/// inside the field is preserved verbatim).
fn null_field(s: &str) -> Option<String> {
    if s.is_empty() || s == "(null)" {
        None
    } else {
        Some(s.to_string())
    }
}

struct Request {
    timestamp: DateTime<Utc>,
    country_code: Option<String>,
    url: String,
}

fn parse_request(ts: &str, country: &str, url: &str) -> Result<Request, EventError> {
    Ok(Request {
        timestamp: parse_timestamp(ts)?,
        country_code: null_field(country),
        url: url.to_string(),
    })
}

struct Tls {
    protocol: Option<String>,
    cipher: Option<String>,
}

fn parse_tls(proto: &str, cipher: &str) -> Tls {
    Tls {
        protocol: null_field(proto),
        cipher: null_field(cipher),
    }
}

struct Project {
    name: Option<String>,
    version: Option<String>,
    package_type: Option<PackageType>,
}

fn parse_project(name: &str, version: &str, package_type: &str) -> Result<Project, EventError> {
    let package_type = match null_field(package_type) {
        None => None,
        Some(t) => Some(PackageType::from_wire(&t).ok_or_else(|| EventError::UnparseableEvent {
            reason: format!("unknown package type: {t:?}"),
        })?),
    };
    Ok(Project {
        name: null_field(name),
        version: null_field(version),
        package_type,
    })
}

/// The tentative parse result before the UA classifier runs: a shape plus
/// the raw UA text, which the caller (the assembler) hands to the classifier.
pub enum Tentative {
    Download(DownloadShape),
    Simple(SimpleShape),
}

/// Parse the event payload (the syslog `MESSAGE`, minus the version tag it
/// carries internally). Chooses the highest version whose tag matches.
pub fn parse(payload: &str) -> Result<Tentative, EventError> {
    if let Some(rest) = payload.strip_prefix("3@") {
        return parse_v3(rest);
    }
    if let Some(rest) = payload.strip_prefix("2@") {
        return parse_v2(rest);
    }
    let rest = payload.strip_prefix("1@").unwrap_or(payload);
    parse_v1(rest)
}

fn split_exact<'a>(s: &'a str, n: usize) -> Result<Vec<&'a str>, EventError> {
    let parts: Vec<&str> = s.splitn(n, '|').collect();
    if parts.len() != n {
        return Err(EventError::UnparseableEvent {
            reason: format!("expected {n} pipe-delimited fields, got {}", parts.len()),
        });
    }
    Ok(parts)
}

fn parse_v1(rest: &str) -> Result<Tentative, EventError> {
    // REQUEST(3) | PROJECT(3) | UA(1)
    let f = split_exact(rest, 7)?;
    let request = parse_request(f[0], f[1], f[2])?;
    let project = parse_project(f[3], f[4], f[5])?;
    Ok(Tentative::Download(DownloadShape {
        timestamp: request.timestamp,
        country_code: request.country_code,
        url: request.url,
        tls_protocol: None,
        tls_cipher: None,
        project: project.name,
        version: project.version,
        package_type: project.package_type,
        ua_text: f[6].to_string(),
    }))
}

fn parse_v2(rest: &str) -> Result<Tentative, EventError> {
    // REQUEST(3) | TLS(2) | PROJECT(3) | UA(1)
    let f = split_exact(rest, 9)?;
    let request = parse_request(f[0], f[1], f[2])?;
    let tls = parse_tls(f[3], f[4]);
    let project = parse_project(f[5], f[6], f[7])?;
    Ok(Tentative::Download(DownloadShape {
        timestamp: request.timestamp,
        country_code: request.country_code,
        url: request.url,
        tls_protocol: tls.protocol,
        tls_cipher: tls.cipher,
        project: project.name,
        version: project.version,
        package_type: project.package_type,
        ua_text: f[8].to_string(),
    }))
}

fn parse_v3(rest: &str) -> Result<Tentative, EventError> {
    let (sigil, rest) = rest.split_once('|').ok_or_else(|| EventError::UnparseableEvent {
        reason: "v3 payload missing sigil".to_string(),
    })?;
    match sigil {
        "simple" => {
            // REQUEST(3) | TLS(2) | UA(1)
            let f = split_exact(rest, 6)?;
            let request = parse_request(f[0], f[1], f[2])?;
            let tls = parse_tls(f[3], f[4]);
            Ok(Tentative::Simple(SimpleShape {
                timestamp: request.timestamp,
                country_code: request.country_code,
                url: request.url,
                tls_protocol: tls.protocol,
                tls_cipher: tls.cipher,
                ua_text: f[5].to_string(),
            }))
        }
        "download" => {
            // REQUEST(3) | TLS(2) | PROJECT(3) | UA(1)
            let f = split_exact(rest, 9)?;
            let request = parse_request(f[0], f[1], f[2])?;
            let tls = parse_tls(f[3], f[4]);
            let project = parse_project(f[5], f[6], f[7])?;
            Ok(Tentative::Download(DownloadShape {
                timestamp: request.timestamp,
                country_code: request.country_code,
                url: request.url,
                tls_protocol: tls.protocol,
                tls_cipher: tls.cipher,
                project: project.name,
                version: project.version,
                package_type: project.package_type,
                ua_text: f[8].to_string(),
            }))
        }
        other => Err(EventError::UnparseableEvent {
            reason: format!("unknown v3 sigil: {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_full_download_fields_parse() {
        let payload = "2@Fri, 20 Jul 2018 02:19:19 GMT|JP|/packages/ba/c8/a928/cfn_flip-1.0.3.tar.gz|TLSv1.2|ECDHE-RSA-AES128-GCM-SHA256|cfn-flip|1.0.3|sdist|bandersnatch/2.2.1 (cpython 3.7.0-final0, Darwin x86_64)";
        let parsed = parse(payload).unwrap();
        match parsed {
            Tentative::Download(d) => {
                assert_eq!(d.country_code.as_deref(), Some("JP"));
                assert_eq!(d.tls_protocol.as_deref(), Some("TLSv1.2"));
                assert_eq!(d.project.as_deref(), Some("cfn-flip"));
                assert_eq!(d.version.as_deref(), Some("1.0.3"));
                assert_eq!(d.package_type, Some(PackageType::Sdist));
                assert_eq!(d.ua_text, "bandersnatch/2.2.1 (cpython 3.7.0-final0, Darwin x86_64)");
                assert_eq!(d.timestamp.to_rfc3339(), "2018-07-20T02:19:19+00:00");
            }
            _ => panic!("expected download shape"),
        }
    }

    #[test]
    fn v1_null_project_fields_pass_through() {
        let payload = "1@Fri, 20 Jul 2018 02:19:19 GMT||/packages/x/y/z.tar.gz|(null)|(null)|(null)|pip/18.0 {\"installer\":{\"name\":\"pip\",\"version\":\"18.0\"}}";
        let parsed = parse(payload).unwrap();
        match parsed {
            Tentative::Download(d) => {
                assert_eq!(d.country_code, None);
                assert_eq!(d.project, None);
                assert_eq!(d.version, None);
                assert_eq!(d.package_type, None);
                assert!(d.ua_text.starts_with("pip/18.0"));
            }
            _ => panic!("expected download shape"),
        }
    }

    #[test]
    fn v3_simple_request() {
        let payload = "3@simple|Fri, 20 Jul 2018 02:19:19 GMT||/simple/Some_Package/|(null)|(null)|pip/18.0";
        let parsed = parse(payload).unwrap();
        match parsed {
            Tentative::Simple(s) => {
                assert_eq!(s.url, "/simple/Some_Package/");
                assert_eq!(s.ua_text, "pip/18.0");
            }
            _ => panic!("expected simple shape"),
        }
    }

    #[test]
    fn v3_download_request() {
        let payload = "3@download|Fri, 20 Jul 2018 02:19:19 GMT|US|/packages/x/y/z.whl|TLSv1.3|(null)|proj|2.0|bdist_wheel|pip/20.0";
        let parsed = parse(payload).unwrap();
        match parsed {
            Tentative::Download(d) => {
                assert_eq!(d.package_type, Some(PackageType::BdistWheel));
                assert_eq!(d.tls_protocol.as_deref(), Some("TLSv1.3"));
                assert_eq!(d.tls_cipher, None);
            }
            _ => panic!("expected download shape"),
        }
    }

    #[test]
    fn untagged_payload_is_v1() {
        let payload = "Fri, 20 Jul 2018 02:19:19 GMT||/packages/x/y/z.tar.gz|(null)|(null)|(null)|pip/1.5";
        assert!(matches!(parse(payload), Ok(Tentative::Download(_))));
    }

    #[test]
    fn unknown_package_type_is_rejected() {
        let payload = "2@Fri, 20 Jul 2018 02:19:19 GMT||/p/x.tar.gz|(null)|(null)|proj|1.0|bdist_unknown|pip/1.0";
        assert!(parse(payload).is_err());
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert!(parse("2@not|enough|fields").is_err());
    }

    #[test]
    fn unknown_v3_sigil_is_rejected() {
        let payload = "3@bogus|Fri, 20 Jul 2018 02:19:19 GMT||/x|(null)|(null)|pip/1.0";
        assert!(parse(payload).is_err());
    }
}
