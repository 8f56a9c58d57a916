//! The ignore rule: user-agents that are recognizably uninteresting —
//! crawlers, generic HTTP libraries, and monitoring probes — and should be
//! silently declined (`Ok(None)`) rather than raised as `UnknownUserAgent`.
//!
//! Combines a fixed list of named entries (specific known-uninteresting
//! clients PyPI has actually seen) with a broader case-insensitive catch-all
//! for generic crawler/bot/HTTP-library families ("browsers, spiders,
//! various HTTP clients") that the named list doesn't enumerate.

use once_cell::sync::Lazy;
use regex::Regex;

pub static IGNORE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)bot|spider|crawl|slurp|facebookexternalhit|pingdom|uptime|monitor|healthcheck|",
        r"libwww-perl|lwp-|go-http-client|apache-httpclient|okhttp|axios/|",
        r"node-fetch|postmanruntime|",
        r"^Datadog Agent/|^\(null\)$|^WordPress/|^Chef (?:Client|Knife)/|^Ruby$|",
        r"^Slackbot-LinkExpanding|^TextualInlineMedia/|^WeeChat/|^Download Master$|^Java/|",
        r"^Go \d\.\d package http$|^Go-http-client/|^GNU Guile$|^github-olee$|^YisouSpider$|",
        r"^Apache Ant/|^Salt/|^ansible-httpget$|^ltx71 - \(http://ltx71\.com/\)|^Scrapy/|",
        r"^spectool/|Nutch|^AWSBrewLinkChecker/|^Y!J-ASR/|^NSIS_Inetc \(Mozilla\)$|^Debian uscan"
    ))
    .unwrap()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_crawlers_and_generic_clients() {
        for ua in [
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
            "Mozilla/5.0 (compatible; bingbot/2.0; +http://www.bing.com/bingbot.htm)",
            "python-requests-wrapper java/1.8.0_191",
            "okhttp/3.12.0",
        ] {
            assert!(IGNORE_RE.is_match(ua), "expected ignore match for {ua:?}");
        }
    }

    #[test]
    fn does_not_match_package_tooling() {
        for ua in ["pip/18.0", "setuptools/36.2.0", "bandersnatch/2.2.1"] {
            assert!(!IGNORE_RE.is_match(ua), "unexpected ignore match for {ua:?}");
        }
    }

    #[test]
    fn does_not_match_curl_or_wget() {
        // curl/wget are claimed by the browser() parser, not the ignore rule,
        // so the two stay disjoint.
        for ua in ["curl/7.64.1", "Wget/1.20.3 (linux-gnu)"] {
            assert!(!IGNORE_RE.is_match(ua), "unexpected ignore match for {ua:?}");
        }
    }
}
