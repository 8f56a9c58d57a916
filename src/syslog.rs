//! Syslog header parser.
//!
//! Grammar: `<PRI>TIMESTAMP SP HOSTNAME SP APPNAME "[" PROCID "]" ":" SP MESSAGE`.
//! Whitespace is significant only after the colon-space that precedes MESSAGE;
//! everything before that is split on single ASCII spaces.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::SyslogError;
use crate::models::SyslogMessage;

// `<PRI>` then the rest of the header up to `: ` (MESSAGE follows verbatim).
static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^<([0-9]{1,3})>(\S+) (\S+) ([^\[\]]+)\[([^\]]+)\]: (.*)$").unwrap()
});

/// Parse one syslog-framed line (without its trailing `\n`) into a `SyslogMessage`.
pub fn parse(line: &str) -> Result<SyslogMessage, SyslogError> {
    let caps = HEADER_RE.captures(line).ok_or_else(|| SyslogError::UnparseableSyslog {
        reason: "line does not match <PRI>TIMESTAMP HOSTNAME APPNAME[PROCID]: MESSAGE".to_string(),
    })?;

    let priority: u16 = caps[1].parse().map_err(|_| SyslogError::UnparseableSyslog {
        reason: "priority is not a number".to_string(),
    })?;
    if priority > 191 {
        return Err(SyslogError::UnparseableSyslog {
            reason: format!("priority {priority} out of range [0, 191]"),
        });
    }
    let (facility, severity) = SyslogMessage::facility_severity(priority);

    let timestamp: DateTime<Utc> = caps[2]
        .parse()
        .map_err(|e| SyslogError::UnparseableSyslog {
            reason: format!("invalid ISO-8601 timestamp: {e}"),
        })?;

    let hostname_raw = &caps[3];
    let hostname = if hostname_raw == "-" {
        None
    } else {
        Some(hostname_raw.to_string())
    };

    let appname = caps[4].to_string();
    let procid = caps[5].to_string();
    let message = caps[6].to_string();

    Ok(SyslogMessage {
        facility,
        severity,
        timestamp,
        hostname,
        appname,
        procid,
        message,
    })
}

/// Serialize a `SyslogMessage` back to its documented wire form (used by the
/// round-trip property test.
pub fn serialize(msg: &SyslogMessage) -> String {
    let priority = msg.facility as u16 * 8 + msg.severity as u16;
    let hostname = msg.hostname.as_deref().unwrap_or("-");
    let timestamp = msg.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    format!(
        "<{}>{} {} {}[{}]: {}",
        priority, timestamp, hostname, msg.appname, msg.procid, msg.message
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_line() {
        let line = "<134>2018-07-20T02:19:20Z cache-itm18828 linehaul[411617]: hello world";
        let msg = parse(line).unwrap();
        assert_eq!(msg.facility, 16);
        assert_eq!(msg.severity, 6);
        assert_eq!(msg.hostname.as_deref(), Some("cache-itm18828"));
        assert_eq!(msg.appname, "linehaul");
        assert_eq!(msg.procid, "411617");
        assert_eq!(msg.message, "hello world");
    }

    #[test]
    fn dash_hostname_is_null() {
        let line = "<0>2018-07-20T02:19:20Z - app[1]: msg";
        let msg = parse(line).unwrap();
        assert_eq!(msg.hostname, None);
    }

    #[test]
    fn priority_out_of_range_is_rejected() {
        let line = "<192>2018-07-20T02:19:20Z host app[1]: msg";
        assert!(parse(line).is_err());
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(parse("not a syslog line at all").is_err());
        assert!(parse("<134>2018-07-20T02:19:20Z host appNOBRACKETS: msg").is_err());
    }

    #[test]
    fn message_preserves_internal_whitespace() {
        let line = "<134>2018-07-20T02:19:20Z host app[1]:   leading  and  internal  spaces";
        let msg = parse(line).unwrap();
        assert_eq!(msg.message, "  leading  and  internal  spaces");
    }

    #[test]
    fn round_trips_through_wire_form() {
        let msg = SyslogMessage {
            facility: 16,
            severity: 6,
            timestamp: "2018-07-20T02:19:20Z".parse().unwrap(),
            hostname: Some("cache-itm18828".to_string()),
            appname: "linehaul".to_string(),
            procid: "411617".to_string(),
            message: "payload here".to_string(),
        };
        let wire = serialize(&msg);
        let parsed = parse(&wire).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn round_trips_null_hostname() {
        let msg = SyslogMessage {
            facility: 0,
            severity: 0,
            timestamp: "2018-07-20T02:19:20Z".parse().unwrap(),
            hostname: None,
            appname: "app".to_string(),
            procid: "1".to_string(),
            message: "m".to_string(),
        };
        let parsed = parse(&serialize(&msg)).unwrap();
        assert_eq!(parsed, msg);
    }
}
