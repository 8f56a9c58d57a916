//! Record assembler.
//!
//! Stitches the line framer's output through the syslog parser, the event
//! grammar parser, and the UA classifier into a `Download` (or a
//! `SimpleRequest`, tracked but never enqueued — see the comment on
//! `SimpleRequest` in `models.rs`).

use crate::errors::ClassifierError;
use crate::event::{self, Tentative};
use crate::models::{
    canonicalize_simple_project, url_basename, url_last_segment, Download, File, PackageType,
    SimpleRequest, UserAgent,
};
use crate::syslog;
use crate::ua::Classifier;

/// Outcome of assembling one frame: a download to enqueue, a simple-index
/// request (observed but not forwarded), or a silent/logged drop.
pub enum Assembled {
    Download(Download),
    Simple(SimpleRequest),
}

/// `parseLine(bytes, token?) → Download | null`.
///
/// The token check is the caller's responsibility — see
/// `connection.rs`, which strips the token prefix before frames ever reach
/// this function, so a missing/mismatched token never produces a log line
/// here (silent drop).
pub fn assemble(line: &[u8], classifier: &Classifier) -> Option<Assembled> {
    // Step 2: decode as UTF-8, substituting U+FFFD for invalid sequences.
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches(['\n', '\r']);

    // Step 3: syslog-parse.
    let syslog_msg = match syslog::parse(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "dropping line: unparseable syslog header");
            return None;
        }
    };

    // Step 4: event-parse the message.
    let tentative = match event::parse(&syslog_msg.message) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "dropping line: unparseable event payload");
            return None;
        }
    };

    // Classifier handles the UA. An explicit ignore-rule decline or an
    // `UnknownUserAgent` both drop the *entire* record, not just the UA
    // details — only a successfully classified UA attaches and lets the
    // record through.
    match tentative {
        Tentative::Download(shape) => {
            let details = classify(&shape.ua_text, classifier)?;
            let filename = url_basename(&shape.url);
            Some(Assembled::Download(Download {
                timestamp: shape.timestamp,
                url: shape.url,
                file: File {
                    filename,
                    project: shape.project,
                    version: shape.version,
                    package_type: shape.package_type,
                },
                tls_protocol: shape.tls_protocol,
                tls_cipher: shape.tls_cipher,
                country_code: shape.country_code,
                details: Some(details),
            }))
        }
        Tentative::Simple(shape) => {
            let details = classify(&shape.ua_text, classifier)?;
            let project = url_last_segment(&shape.url).map(|s| canonicalize_simple_project(&s));
            Some(Assembled::Simple(SimpleRequest {
                timestamp: shape.timestamp,
                url: shape.url,
                project,
                tls_protocol: shape.tls_protocol,
                tls_cipher: shape.tls_cipher,
                country_code: shape.country_code,
                details: Some(details),
            }))
        }
    }
}

/// Classify a UA string. `None` means "drop the whole record": either the
/// ignore rule explicitly declined it (no log) or it raised
/// `UnknownUserAgent` (logged at error with the UA text).
fn classify(ua_text: &str, classifier: &Classifier) -> Option<UserAgent> {
    match classifier.classify(ua_text) {
        Ok(Some(ua)) => Some(ua),
        Ok(None) => None,
        Err(ClassifierError::UnknownUserAgent { ua }) => {
            tracing::error!(ua = %ua, "dropping record: unrecognized user agent");
            None
        }
    }
}

/// True when `package_type` round-trips a recognized wire token; used by
/// callers that want to validate a `File` before forwarding it.
pub fn is_known_package_type(t: &PackageType) -> bool {
    PackageType::from_wire(t.as_wire()).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ua::default_classifier;

    #[test]
    fn assembles_full_download_from_framed_line() {
        let classifier = default_classifier();
        let line = b"<134>2018-07-20T02:19:19Z cache-itm18828 linehaul[411617]: 2@Fri, 20 Jul 2018 02:19:19 GMT|JP|/packages/ba/c8/a928/cfn_flip-1.0.3.tar.gz|TLSv1.2|ECDHE-RSA-AES128-GCM-SHA256|cfn-flip|1.0.3|sdist|bandersnatch/2.2.1 (cpython 3.7.0-final0, Darwin x86_64)\n";
        match assemble(line, &classifier) {
            Some(Assembled::Download(d)) => {
                assert_eq!(d.file.filename, "cfn_flip-1.0.3.tar.gz");
                assert_eq!(d.file.project.as_deref(), Some("cfn-flip"));
                assert_eq!(d.country_code.as_deref(), Some("JP"));
                let details = d.details.expect("bandersnatch UA should classify");
                assert_eq!(details.installer.unwrap().name, "bandersnatch");
            }
            _ => panic!("expected a download"),
        }
    }

    #[test]
    fn malformed_syslog_header_drops_silently() {
        let classifier = default_classifier();
        assert!(assemble(b"not a syslog line\n", &classifier).is_none());
    }

    #[test]
    fn malformed_event_payload_drops_silently() {
        let classifier = default_classifier();
        let line = b"<134>2018-07-20T02:19:19Z host linehaul[1]: 2@not|enough|fields\n";
        assert!(assemble(line, &classifier).is_none());
    }

    #[test]
    fn unknown_user_agent_drops_the_whole_record() {
        let classifier = default_classifier();
        let line = b"<134>2018-07-20T02:19:19Z host linehaul[1]: 2@Fri, 20 Jul 2018 02:19:19 GMT||/packages/x/y/z.tar.gz|(null)|(null)|proj|1.0|sdist|totally-unheard-of/0.1\n";
        assert!(assemble(line, &classifier).is_none());
    }

    #[test]
    fn ignored_user_agent_drops_the_whole_record() {
        let classifier = default_classifier();
        let line = b"<134>2018-07-20T02:19:19Z host linehaul[1]: 2@Fri, 20 Jul 2018 02:19:19 GMT||/packages/x/y/z.tar.gz|(null)|(null)|proj|1.0|sdist|Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)\n";
        assert!(assemble(line, &classifier).is_none());
    }

    #[test]
    fn simple_request_canonicalizes_project_from_url() {
        let classifier = default_classifier();
        let line = b"<134>2018-07-20T02:19:19Z host linehaul[1]: 3@simple|Fri, 20 Jul 2018 02:19:19 GMT||/simple/My_Cool--Package/|(null)|(null)|pip/18.0 {\"installer\":{\"name\":\"pip\",\"version\":\"18.0\"}}\n";
        match assemble(line, &classifier) {
            Some(Assembled::Simple(s)) => assert_eq!(s.project.as_deref(), Some("my-cool-package")),
            _ => panic!("expected a simple request"),
        }
    }
}
