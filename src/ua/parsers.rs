//! Required parser families. Each family gets its own small function rather
//! than one monolithic regex, since that mirrors how new clients are added
//! in practice: one function, one registration, done.

use crate::models::{Distro, NameVersion, SystemInfo, UserAgent};

use super::NamedParser;

/// All required parsers, in a fixed declaration order. Order only matters
/// for `default_classifier()`'s starting point — see the order-invariance
/// test in `mod.rs`, which explicitly shuffles this list.
pub fn all() -> Vec<NamedParser> {
    vec![
        pip_ge6(),
        pip_legacy(),
        distribute(),
        setuptools(),
        pex(),
        conda(),
        bazel(),
        bandersnatch(),
        devpi(),
        z3c_pypimirror(),
        artifactory(),
        nexus(),
        pep381client(),
        python_urllib(),
        python_requests(),
        homebrew(),
        os_package_manager(),
        browser(),
    ]
}

fn name_only(name: &str) -> UserAgent {
    UserAgent {
        installer: Some(NameVersion {
            name: name.to_string(),
            version: None,
        }),
        ..Default::default()
    }
}

fn name_version(name: &str, version: &str) -> UserAgent {
    UserAgent {
        installer: Some(NameVersion {
            name: name.to_string(),
            version: Some(version.to_string()),
        }),
        ..Default::default()
    }
}

/// Leading dotted-numeric components of a version string, e.g. `"18.0"` ->
/// `[18, 0]`, `"1.4.1"` -> `[1, 4, 1]`. Stops at the first non-numeric
/// component (pre-release suffixes like `"6.0.dev0"` still yield `[6, 0]`).
fn version_components(v: &str) -> Vec<u32> {
    v.split('.').map_while(|p| p.parse::<u32>().ok()).collect()
}

/// `version >= 6`, compared on the major component only.
fn is_ge_6(v: &str) -> bool {
    version_components(v).first().copied().unwrap_or(0) >= 6
}

/// `1.4 <= version < 6`, compared major.minor.
fn is_legacy_range(v: &str) -> bool {
    let parts = version_components(v);
    let major = parts.first().copied().unwrap_or(0);
    let minor = parts.get(1).copied().unwrap_or(0);
    if major >= 6 {
        return false;
    }
    major > 1 || (major == 1 && minor >= 4)
}

/// `pip >= 6`: the tail of the UA string is a JSON object describing the
/// full environment, which pip has emitted verbatim since 6.0. Passed
/// through by deserializing directly into `UserAgent` — the field names
/// already line up. Gated on the actual version number (not just JSON
/// presence) so this and `pip_legacy` never both claim the same input
/// regardless of dispatch order.
pub fn pip_ge6() -> NamedParser {
    NamedParser::callback("pip>=6 (json)", |ua| {
        let Some(rest) = ua.strip_prefix("pip/") else {
            return Ok(None);
        };
        let Some((version, json)) = rest.split_once(' ') else {
            return Ok(None);
        };
        if !is_ge_6(version) {
            return Ok(None);
        }
        let mut parsed: UserAgent = match serde_json::from_str(json.trim_start()) {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };
        parsed.installer = Some(NameVersion {
            name: "pip".to_string(),
            version: Some(version.to_string()),
        });
        Ok(Some(parsed))
    })
}

/// `pip < 6`: `pip/VERSION IMPLEMENTATION/IVERSION SYSTEM/SRELEASE`, with
/// any field literally spelled `Unknown` dropped rather than recorded. Gated
/// on `1.4 <= version < 6` so this never overlaps `pip_ge6`.
pub fn pip_legacy() -> NamedParser {
    NamedParser::callback("pip<6 (tokens)", |ua| {
        let Some(rest) = ua.strip_prefix("pip/") else {
            return Ok(None);
        };
        let mut parts = rest.split_whitespace();
        let Some(version) = parts.next() else { return Ok(None) };
        if !is_legacy_range(version) {
            return Ok(None);
        }
        let mut ua_out = UserAgent {
            installer: Some(NameVersion {
                name: "pip".to_string(),
                version: Some(version.to_string()),
            }),
            ..Default::default()
        };

        if let Some(impl_tok) = parts.next() {
            if let Some((name, ver)) = impl_tok.split_once('/') {
                if name != "Unknown" && ver != "Unknown" {
                    // CPython's version doubles as the interpreter version.
                    if name == "CPython" {
                        ua_out.python = Some(ver.to_string());
                    }
                    ua_out.implementation = Some(NameVersion {
                        name: name.to_string(),
                        version: Some(ver.to_string()),
                    });
                }
            }
        }
        if let Some(sys_tok) = parts.next() {
            if let Some((name, release)) = sys_tok.split_once('/') {
                if name != "Unknown" && release != "Unknown" {
                    ua_out.system = Some(SystemInfo {
                        name: Some(name.to_string()),
                        release: Some(release.to_string()),
                    });
                }
            }
        }
        Ok(Some(ua_out))
    })
}

/// `Python-urllib/X.Y distribute/VERSION` — distribute rode on urllib's
/// default UA rather than setting its own, so the Python version tags along.
pub fn distribute() -> NamedParser {
    NamedParser::regex(
        "distribute",
        &[r"^Python-urllib/(?P<python>\d\.\d) distribute/(?P<version>\S+)$"],
        |c| {
            let mut ua = name_version("distribute", &c["version"]);
            ua.python = Some(c["python"].to_string());
            Ok(ua)
        },
    )
}

/// `Python-urllib/X.Y setuptools/VERSION` — same urllib-riding shape as
/// `distribute` above.
pub fn setuptools() -> NamedParser {
    NamedParser::regex(
        "setuptools",
        &[r"^Python-urllib/(?P<python>\d\.\d) setuptools/(?P<version>\S+)$"],
        |c| {
            let mut ua = name_version("setuptools", &c["version"]);
            ua.python = Some(c["python"].to_string());
            Ok(ua)
        },
    )
}

pub fn pex() -> NamedParser {
    NamedParser::regex("pex", &[r"pex/(?P<version>\S+)$"], |c| Ok(name_version("pex", &c["version"])))
}

pub fn conda() -> NamedParser {
    NamedParser::regex("conda", &[r"^conda/(?P<version>\S+)(?: .+)?$"], |c| {
        Ok(name_version("conda", &c["version"]))
    })
}

pub fn bazel() -> NamedParser {
    NamedParser::regex("Bazel", &[r"^(?:release )?Bazel/(?P<version>\S+)$"], |c| {
        Ok(name_version("Bazel", &c["version"]))
    })
}

/// `bandersnatch/VERSION (...)` — a trailing parenthetical is mandatory (it's
/// always present on real bandersnatch UAs); the common `(cpython PYVER,
/// SYSTEM ARCH)` shape is parsed into `python`/`system`/`cpu`, with a bare
/// fallback that still claims the UA (and just the version) when the
/// parenthetical doesn't match that exact layout.
pub fn bandersnatch() -> NamedParser {
    NamedParser::regex(
        "bandersnatch",
        &[
            r"^bandersnatch/(?P<version>\S+) \(cpython (?P<pyver>[^,]+), (?P<sys>\S+) (?P<cpu>\S+)\)$",
            r"^bandersnatch/(?P<version>\S+) \(.+\)$",
        ],
        |c| {
            let mut ua = name_version("bandersnatch", &c["version"]);
            if let Some(pyver) = c.name("pyver") {
                ua.python = Some(pyver.as_str().to_string());
            }
            if let Some(sys) = c.name("sys") {
                ua.system = Some(SystemInfo {
                    name: Some(sys.as_str().to_string()),
                    release: None,
                });
            }
            if let Some(cpu) = c.name("cpu") {
                ua.cpu = Some(cpu.as_str().to_string());
            }
            Ok(ua)
        },
    )
}

/// `devpi-server/VERSION (...)` is the shape devpi actually ships; a bare
/// `devpi/VERSION` fallback is kept for older/alternate builds.
pub fn devpi() -> NamedParser {
    NamedParser::regex(
        "devpi",
        &[r"devpi-server/(?P<version>\S+) \(.+\)$", r"^devpi/(?P<version>\S+)$"],
        |c| Ok(name_version("devpi", &c["version"])),
    )
}

pub fn z3c_pypimirror() -> NamedParser {
    NamedParser::regex(r"z3c.pypimirror", &[r"^z3c\.pypimirror/(?P<version>\S+)$"], |c| {
        Ok(name_version("z3c.pypimirror", &c["version"]))
    })
}

pub fn artifactory() -> NamedParser {
    NamedParser::regex("Artifactory", &[r"^Artifactory/(?P<version>\S+)$"], |c| {
        Ok(name_version("Artifactory", &c["version"]))
    })
}

pub fn nexus() -> NamedParser {
    NamedParser::regex("Nexus", &[r"^Nexus/(?P<version>\S+)$"], |c| Ok(name_version("Nexus", &c["version"])))
}

/// `pep381client/VERSION`, optionally suffixed `-proxy` for mirrors run
/// behind a forwarding proxy.
pub fn pep381client() -> NamedParser {
    NamedParser::regex("pep381client", &[r"^pep381client/(?P<version>\S+?)(?:-proxy)?$"], |c| {
        Ok(name_version("pep381client", &c["version"]))
    })
}

/// Bare `Python-urllib/X.Y`, with nothing appended — pip before 1.4 never
/// touched urllib's default UA at all. Anything trailing (as `distribute`
/// and `setuptools` above append) means this parser must decline so those
/// more specific parsers get the match instead.
pub fn python_urllib() -> NamedParser {
    NamedParser::regex("Python-urllib", &[r"^Python-urllib/(?P<version>\S+)$"], |c| {
        Ok(UserAgent {
            python: Some(c["version"].to_string()),
            ..Default::default()
        })
    })
}

pub fn python_requests() -> NamedParser {
    NamedParser::regex("python-requests", &[r"^python-requests/(?P<version>\S+)(?: .+)?$"], |c| {
        Ok(name_version("requests", &c["version"]))
    })
}

/// `Homebrew/V (Macintosh; Intel Mac OS X/macOS VER)` — the required literal
/// shape. Anchored to that exact parenthetical so it never
/// collides with `os_package_manager`'s bare `Homebrew ` alternative below
/// (which covers a different UA: brew fetching a dependency tarball, with
/// no version and no parenthetical); order invariance requires the
/// two never claim the same literal input.
pub fn homebrew() -> NamedParser {
    NamedParser::regex(
        "Homebrew",
        &[r"^Homebrew/(?P<version>\S+) \(Macintosh; Intel Mac OS X/macOS (?P<osver>\S+)\)$"],
        |c| {
            Ok(UserAgent {
                installer: Some(NameVersion {
                    name: "Homebrew".to_string(),
                    version: Some(c["version"].to_string()),
                }),
                distro: Some(Distro {
                    name: Some("macOS".to_string()),
                    version: Some(c["osver"].to_string()),
                    id: None,
                    libc: None,
                }),
                ..Default::default()
            })
        },
    )
}

/// OS-level package managers and system fetch tools pulling a distribution
/// as a dependency of a distro package, rather than a Python-specific
/// installer — none of these embed a parseable version, so the single
/// multi-alternation regex just labels `installer.name = "OS"`.
pub fn os_package_manager() -> NamedParser {
    NamedParser::regex(
        "OS",
        &[concat!(
            r"^fetch libfetch/\S+$|",
            r"^libfetch/\S+$|",
            r"^OpenBSD ftp$|",
            r"^Homebrew |",
            r"^MacPorts/?|",
            r"^NetBSD-ftp/|",
            r"^slapt-get|",
            r"^pypi-install/|",
            r"^slackrepo$|",
            r"^PTXdist|",
            r"^GARstow/|",
            r"^xbps/"
        )],
        |_c| Ok(name_only("OS")),
    )
}

/// Ordinary web browsers, recorded as a bare `installer.name = "Browser"`
/// rather than silently dropped, so that someone pointing a browser at a
/// download URL by hand is distinguishable from the crawlers and scripted
/// clients `IGNORE_RE` declines outright. Deliberately excludes a
/// bare `Mozilla` alternative: every crawler that spoofs a desktop UA also
/// starts with `Mozilla/5.0`, so keeping it here would swallow those into
/// "Browser" instead of letting them fall through to the ignore rule.
pub fn browser() -> NamedParser {
    NamedParser::regex(
        "browser",
        &[r"(?i)^(?:Safari|wget|curl|Opera|aria2|AndroidDownloadManager|com\.apple\.WebKit\.Networking/|FDM \S+|URL/Emacs|Firefox/|UCWEB|Links)(?:/|$)"],
        |_c| Ok(name_only("Browser")),
    )
}
