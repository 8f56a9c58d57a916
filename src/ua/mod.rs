//! User-agent classifier.
//!
//! A parser set is an unordered collection of named parsers, each either a
//! callback or a list of regexes + handler:
//! `Parser ::= Callback(fn) | Regex(list<regex>, fn)`. Registration order
//! must not affect the *result* of classifying a given UA — only
//! which parser happens to be tried first, which the self-optimization pass
//! deliberately perturbs over time.

pub mod ignore;
pub mod parsers;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use regex::Regex;

use crate::error_tracker::ConsecutiveErrorTracker;
use crate::errors::ClassifierError;
use crate::models::UserAgent;

/// A parser either runs a plain callback, or tries a list of regexes in
/// order and hands the first match's captures to a handler.
pub enum ParserKind {
    Callback(fn(&str) -> anyhow::Result<Option<UserAgent>>),
    Regex {
        patterns: Vec<Regex>,
        handler: fn(&regex::Captures) -> anyhow::Result<UserAgent>,
    },
}

pub struct NamedParser {
    pub name: &'static str,
    pub kind: ParserKind,
}

impl NamedParser {
    pub fn callback(name: &'static str, f: fn(&str) -> anyhow::Result<Option<UserAgent>>) -> Self {
        Self {
            name,
            kind: ParserKind::Callback(f),
        }
    }

    pub fn regex(
        name: &'static str,
        patterns: &[&str],
        handler: fn(&regex::Captures) -> anyhow::Result<UserAgent>,
    ) -> Self {
        let patterns = patterns.iter().map(|p| Regex::new(p).expect("static UA regex")).collect();
        Self {
            name,
            kind: ParserKind::Regex { patterns, handler },
        }
    }

    fn try_parse(&self, ua: &str) -> anyhow::Result<Option<UserAgent>> {
        match &self.kind {
            ParserKind::Callback(f) => f(ua),
            ParserKind::Regex { patterns, handler } => {
                for re in patterns {
                    if let Some(caps) = re.captures(ua) {
                        return Ok(Some(handler(&caps)?));
                    }
                }
                Ok(None)
            }
        }
    }
}

/// Default self-optimization interval (dispatches between reorder passes).
pub const DEFAULT_OPTIMIZE_EVERY: u64 = 1_000_000;

/// The classifier: an immutable set of parsers, an advisory hit-count-driven
/// order, and the ignore rule.
pub struct Classifier {
    parsers: Vec<NamedParser>,
    hits: Vec<AtomicU64>,
    dispatch_count: AtomicU64,
    next_threshold: AtomicU64,
    optimize_every: u64,
    /// Current dispatch order as parser indices. A plain `RwLock` stands in
    /// for a lock-free pointer swap — readers
    /// take a cheap read lock rather than observing a raw swapped pointer,
    /// but the same correctness property holds: any reader sees *some*
    /// consistent permutation of parsers, old or new, and every permutation
    /// yields the same classification result.
    order: RwLock<Vec<usize>>,
    /// Rate-limits the "parser raised an error" log so a parser that panics
    /// on every call (e.g. a bad regex handler) doesn't spam logs once per
    /// record — it still declines and dispatch continues either way.
    parser_error_tracker: ConsecutiveErrorTracker,
}

impl Classifier {
    pub fn builder() -> ClassifierBuilder {
        ClassifierBuilder { parsers: Vec::new() }
    }

    /// Try each registered parser in current order; on first success,
    /// structure the result and return it. A decline (`Ok(None)`) tries the
    /// next parser. An actual error is logged and also treated as a decline.
    /// If every parser declines, fall back to `IGNORE_RE`.
    pub fn classify(&self, ua: &str) -> Result<Option<UserAgent>, ClassifierError> {
        let count = self.dispatch_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.maybe_optimize(count);

        let order = self.order.read().expect("classifier order lock poisoned").clone();
        for idx in order {
            let parser = &self.parsers[idx];
            match parser.try_parse(ua) {
                Ok(Some(result)) => {
                    self.hits[idx].fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(result));
                }
                Ok(None) => continue,
                Err(e) => {
                    if self.parser_error_tracker.record_error() {
                        tracing::error!(parser = parser.name, error = %e, "UA parser raised an error, treating as decline");
                    }
                    continue;
                }
            }
        }

        if ignore::IGNORE_RE.is_match(ua) {
            Ok(None)
        } else {
            Err(ClassifierError::UnknownUserAgent { ua: ua.to_string() })
        }
    }

    fn maybe_optimize(&self, count: u64) {
        let threshold = self.next_threshold.load(Ordering::Relaxed);
        if count < threshold {
            return;
        }
        // Reorder descending by hit count, then halve all counts. Racing
        // with another thread here just means one of them redundantly
        // repeats the same reorder — both outcomes are valid since the
        // classifier only needs readers to see *some* consistent order.
        let mut idx: Vec<usize> = (0..self.parsers.len()).collect();
        idx.sort_by(|&a, &b| {
            self.hits[b]
                .load(Ordering::Relaxed)
                .cmp(&self.hits[a].load(Ordering::Relaxed))
        });
        *self.order.write().expect("classifier order lock poisoned") = idx;
        for h in &self.hits {
            h.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v / 2)).ok();
        }
        self.next_threshold.store(threshold + self.optimize_every, Ordering::Relaxed);
    }

    pub fn parser_names(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.name).collect()
    }
}

pub struct ClassifierBuilder {
    parsers: Vec<NamedParser>,
}

impl ClassifierBuilder {
    pub fn register(mut self, parser: NamedParser) -> Self {
        self.parsers.push(parser);
        self
    }

    pub fn with_optimize_every(self, optimize_every: u64) -> BuiltClassifierConfig {
        BuiltClassifierConfig {
            parsers: self.parsers,
            optimize_every,
        }
    }

    pub fn build(self) -> Classifier {
        self.with_optimize_every(DEFAULT_OPTIMIZE_EVERY).build()
    }
}

pub struct BuiltClassifierConfig {
    parsers: Vec<NamedParser>,
    optimize_every: u64,
}

impl BuiltClassifierConfig {
    pub fn build(self) -> Classifier {
        let n = self.parsers.len();
        Classifier {
            parsers: self.parsers,
            hits: (0..n).map(|_| AtomicU64::new(0)).collect(),
            dispatch_count: AtomicU64::new(0),
            // First optimization cycle fires at 25% of the interval to
            // amortize cold start.
            next_threshold: AtomicU64::new((self.optimize_every / 4).max(1)),
            optimize_every: self.optimize_every,
            order: RwLock::new((0..n).collect()),
            parser_error_tracker: ConsecutiveErrorTracker::new(),
        }
    }
}

/// Build the classifier with the full registered set of required parser
/// families, in their natural declaration order. Callers that want to
/// test order-invariance should shuffle the output of `parsers::all()` and
/// build their own `Classifier` from that instead of using this directly.
pub fn default_classifier() -> Classifier {
    let mut builder = Classifier::builder();
    for parser in parsers::all() {
        builder = builder.register(parser);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    fn build_from(mut list: Vec<NamedParser>) -> Classifier {
        let mut builder = Classifier::builder();
        for p in list.drain(..) {
            builder = builder.register(p);
        }
        builder.build()
    }

    const SAMPLE_UAS: &[&str] = &[
        "pip/18.0 {\"installer\":{\"name\":\"pip\",\"version\":\"18.0\"}}",
        "pip/5.0 CPython/2.7.9 Darwin/14.5.0",
        "Python-urllib/3.6 setuptools/36.2.0",
        "Python-urllib/2.7 distribute/0.6.10",
        "bandersnatch/2.2.1 (cpython 3.7.0-final0, Darwin x86_64)",
        "Python-urllib/3.6",
        "python-requests/2.19.1",
        "Homebrew/2.1.1 (Macintosh; Intel Mac OS X/macOS 10.14)",
        "Homebrew fetching a dependency tarball",
        "fetch libfetch/3.0",
        "curl/7.64.1",
    ];

    #[test]
    fn order_invariance_under_shuffle() {
        let baseline = default_classifier();
        let baseline_results: Vec<_> = SAMPLE_UAS
            .iter()
            .map(|ua| baseline.classify(ua).ok().flatten())
            .collect();

        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let mut shuffled = parsers::all();
            shuffled.shuffle(&mut rng);
            let classifier = build_from(shuffled);
            for (ua, expected) in SAMPLE_UAS.iter().zip(baseline_results.iter()) {
                let got = classifier.classify(ua).ok().flatten();
                assert_eq!(&got, expected, "mismatch for UA {ua:?} after shuffle");
            }
        }
    }

    #[test]
    fn ignore_rule_declines_without_error() {
        let classifier = default_classifier();
        let result = classifier
            .classify("Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)")
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn unknown_ua_raises_unknown_user_agent() {
        let classifier = default_classifier();
        let result = classifier.classify("totally-unheard-of/0.1");
        assert!(matches!(result, Err(ClassifierError::UnknownUserAgent { .. })));
    }

    #[test]
    fn self_optimization_reorders_without_changing_outcomes() {
        let classifier = Classifier::builder()
            .register(parsers::pip_ge6())
            .register(parsers::pip_legacy())
            .register(parsers::setuptools())
            .with_optimize_every(8)
            .build();

        let before = classifier.parser_names();
        for _ in 0..20 {
            let _ = classifier.classify("Python-urllib/3.6 setuptools/36.2.0");
        }
        // setuptools should have bubbled toward the front after reordering.
        let order = classifier.order.read().unwrap().clone();
        assert_eq!(order[0], 2, "most-hit parser should sort first: {before:?}");
    }
}
