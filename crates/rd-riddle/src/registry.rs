//! Riddle registry and path resolution.
//!
//! A visited URL is mapped to `(riddle, canonical path)` by matching it against every riddle's
//! root patterns. Literal roots match on normalized host equality; wildcard roots match the
//! URL's `host + path` against an anchored regex. All literal matches take precedence over
//! wildcard matches, and within each class riddles are tried in registry order.

use crate::data::BlacklistedPage;
use crate::data::RiddleData;
use rd_core::TrackerError;
use rd_core::TrackerResult;
use rd_net::VisitedUrl;
use rd_net::split_path;
use rd_net::strip_www_prefix;
use regex::Regex;
use std::collections::BTreeMap;

const PARENT_TOKEN: &str = "..";

/// One root URL of a riddle, optionally ending in a wildcard.
#[derive(Debug, Clone)]
pub struct RootPattern {
    raw: String,
    host: String,
    path_tokens: Vec<String>,
    wildcard: Option<Regex>,
}

impl RootPattern {
    pub fn parse(raw: &str) -> TrackerResult<Self> {
        let trimmed = raw.trim();
        let (_, rest) = trimmed.split_once("://").ok_or_else(|| {
            TrackerError::new(
                "riddle.root.scheme_missing",
                format!("root path `{raw}` has no scheme"),
            )
        })?;

        let (authority, path) = match rest.find('/') {
            Some(slash) => (&rest[..slash], &rest[slash..]),
            None => (rest, "/"),
        };
        let authority = authority.rsplit('@').next().unwrap_or(authority);
        let host = authority
            .split(':')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if host.is_empty() {
            return Err(TrackerError::new(
                "riddle.root.host_missing",
                format!("root path `{raw}` has no host"),
            ));
        }
        let host = strip_www_prefix(&host).to_owned();

        let wildcard = if host.contains('*') || path.contains('*') {
            Some(wildcard_regex(&host, path)?)
        } else {
            None
        };

        let path_tokens = split_path(path)
            .into_iter()
            .take_while(|token| !token.contains('*'))
            .map(str::to_owned)
            .collect();

        Ok(Self {
            raw: trimmed.to_owned(),
            host,
            path_tokens,
            wildcard,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Normalized host (no `www` prefix).
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard.is_some()
    }

    /// Root path tokens up to, but excluding, any wildcard segment.
    pub fn path_tokens(&self) -> &[String] {
        &self.path_tokens
    }

    /// The root URL with a trailing `/*` removed, used as a base for absolute riddle paths.
    pub fn base_url(&self) -> &str {
        self.raw.strip_suffix("/*").unwrap_or(&self.raw)
    }

    pub fn matches(&self, url: &VisitedUrl) -> bool {
        match &self.wildcard {
            Some(regex) => regex.is_match(&url.host_and_path()),
            None => self.host == url.normalized_host(),
        }
    }
}

fn wildcard_regex(host: &str, path: &str) -> TrackerResult<Regex> {
    let target = format!("{host}{path}");
    let body = target
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    Regex::new(&format!("^{body}")).map_err(|error| {
        TrackerError::new(
            "riddle.root.pattern_invalid",
            format!("wildcard root `{target}` is not a valid pattern: {error}"),
        )
    })
}

/// Path prefixes per riddle that must always use the browser's own authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensitivePathRules {
    rules: BTreeMap<String, Vec<String>>,
}

impl SensitivePathRules {
    pub fn with_rule(mut self, alias: &str, prefix: &str) -> Self {
        self.rules
            .entry(alias.to_owned())
            .or_default()
            .push(prefix.to_owned());
        self
    }

    pub fn prefixes_for(&self, alias: &str) -> Vec<String> {
        self.rules.get(alias).cloned().unwrap_or_default()
    }
}

/// A tracked riddle and its URL configuration.
#[derive(Debug, Clone)]
pub struct RiddleEntry {
    alias: String,
    roots: Vec<RootPattern>,
    blacklisted_pages: Vec<BlacklistedPage>,
    sensitive_prefixes: Vec<String>,
}

impl RiddleEntry {
    pub fn new(
        alias: &str,
        roots: Vec<RootPattern>,
        blacklisted_pages: Vec<BlacklistedPage>,
        sensitive_prefixes: Vec<String>,
    ) -> TrackerResult<Self> {
        if alias.is_empty() {
            return Err(TrackerError::new(
                "riddle.entry.alias_missing",
                "riddle entries need a non-empty alias",
            ));
        }
        if roots.is_empty() {
            return Err(TrackerError::new(
                "riddle.entry.roots_missing",
                format!("riddle `{alias}` has no root paths"),
            ));
        }

        Ok(Self {
            alias: alias.to_owned(),
            roots,
            blacklisted_pages,
            sensitive_prefixes,
        })
    }

    pub fn from_data(data: &RiddleData, sensitive: &SensitivePathRules) -> TrackerResult<Self> {
        let roots = data
            .root_paths()
            .iter()
            .map(|raw| RootPattern::parse(raw))
            .collect::<TrackerResult<Vec<_>>>()?;
        Self::new(
            &data.alias,
            roots,
            data.blacklisted_pages.clone(),
            sensitive.prefixes_for(&data.alias),
        )
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn roots(&self) -> &[RootPattern] {
        &self.roots
    }

    /// True for paths whose authentication is genuine and must never be intercepted.
    pub fn is_sensitive(&self, path: &str) -> bool {
        self.sensitive_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Blacklist entry for `path`, comparing paths without `.htm`/`.html` extensions.
    pub fn blacklisted(&self, path: &str) -> Option<&BlacklistedPage> {
        let wanted = strip_html_extension(path);
        self.blacklisted_pages
            .iter()
            .find(|entry| strip_html_extension(&entry.path) == wanted)
    }
}

fn strip_html_extension(path: &str) -> &str {
    path.strip_suffix(".html")
        .or_else(|| path.strip_suffix(".htm"))
        .unwrap_or(path)
}

/// Owned `(riddle alias, canonical path)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPath {
    pub riddle: String,
    pub path: String,
}

impl ResolvedPath {
    pub fn new(riddle: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            riddle: riddle.into(),
            path: path.into(),
        }
    }
}

/// Ordered set of riddle entries.
#[derive(Debug, Clone, Default)]
pub struct RiddleRegistry {
    entries: Vec<RiddleEntry>,
}

impl RiddleRegistry {
    pub fn new(entries: Vec<RiddleEntry>) -> TrackerResult<Self> {
        for (position, entry) in entries.iter().enumerate() {
            if entries[..position]
                .iter()
                .any(|earlier| earlier.alias == entry.alias)
            {
                return Err(TrackerError::new(
                    "riddle.registry.duplicate_alias",
                    format!("riddle `{}` is registered twice", entry.alias),
                ));
            }
        }

        Ok(Self { entries })
    }

    pub fn entry(&self, alias: &str) -> Option<&RiddleEntry> {
        self.entries.iter().find(|entry| entry.alias == alias)
    }

    pub fn entries(&self) -> &[RiddleEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registry with `entry` added, or replacing the entry with the same alias in place.
    pub fn with_entry(&self, entry: RiddleEntry) -> Self {
        let mut entries = self.entries.clone();
        match entries.iter_mut().find(|existing| existing.alias == entry.alias) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Self { entries }
    }

    /// Finds the riddle root owning `url`.
    pub fn match_root(&self, url: &VisitedUrl) -> Option<(&RiddleEntry, &RootPattern)> {
        let literal = self.entries.iter().find_map(|entry| {
            entry
                .roots
                .iter()
                .find(|root| !root.is_wildcard() && root.matches(url))
                .map(|root| (entry, root))
        });

        literal.or_else(|| {
            self.entries.iter().find_map(|entry| {
                entry
                    .roots
                    .iter()
                    .find(|root| root.is_wildcard() && root.matches(url))
                    .map(|root| (entry, root))
            })
        })
    }

    /// Resolves `url` to its riddle and canonical path, or `None` when no riddle owns it.
    pub fn resolve(&self, url: &VisitedUrl) -> Option<ResolvedPath> {
        let (entry, root) = self.match_root(url)?;
        let path = relative_path(root.path_tokens(), &url.path_segments());
        tracing::trace!(riddle = %entry.alias, %path, url = url.as_str(), "resolved url");
        Some(ResolvedPath::new(entry.alias.clone(), path))
    }

    /// Same as [`Self::resolve`], for raw URL text; unparseable URLs resolve to nothing.
    pub fn resolve_str(&self, raw: &str) -> Option<ResolvedPath> {
        let url = VisitedUrl::parse(raw).ok()?;
        self.resolve(&url)
    }

    /// URL to open instead of a blacklisted page, if `url` is one.
    pub fn blacklist_redirect(&self, url: &VisitedUrl) -> Option<String> {
        let (entry, root) = self.match_root(url)?;
        let path = relative_path(root.path_tokens(), &url.path_segments());
        let blacklisted = entry.blacklisted(&path)?;
        Some(format!("{}{}", root.base_url(), blacklisted.next_path))
    }
}

/// Token-diffs a visited path against a root path.
///
/// Every root token that the visited path does not repeat at the same position becomes a
/// leading `..`; every visited token that differs from the root token at its position is kept.
pub fn relative_path<R, V>(root_tokens: &[R], visited_tokens: &[V]) -> String
where
    R: AsRef<str>,
    V: AsRef<str>,
{
    let mut tokens: Vec<&str> = Vec::new();

    for (position, root) in root_tokens.iter().enumerate() {
        let visited = visited_tokens.get(position).map(AsRef::as_ref);
        if visited != Some(root.as_ref()) {
            tokens.push(PARENT_TOKEN);
        }
    }

    for (position, visited) in visited_tokens.iter().enumerate() {
        let root = root_tokens.get(position).map(AsRef::as_ref);
        if root != Some(visited.as_ref()) {
            tokens.push(visited.as_ref());
        }
    }

    let joined = format!("/{}", tokens.join("/"));
    match joined.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped.to_owned(),
        _ => joined,
    }
}
