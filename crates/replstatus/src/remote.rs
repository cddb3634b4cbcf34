//! Remote destination configuration and URL template resolution.
//!
//! A remote stanza names one or more URL templates. Resolving a template for a
//! project substitutes the (encoded, restyled) project name into the `${name}`
//! placeholder of the template path and reduces the resulting URI to the
//! destination identifier the replication worker reports: `host[:port]` for
//! remote URIs, the path for local ones.

use crate::error::StatusError;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;

/// Placeholder replaced by the project name in URL template paths.
pub const NAME_PLACEHOLDER: &str = "${name}";

/// How a project name is turned into a path component on the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingStyle {
    /// Keep `/` separators (`foo/bar`).
    #[default]
    Slash,
    /// Replace `/` with `-` (`foo-bar`).
    Dash,
    /// Replace `/` with `_` (`foo_bar`).
    Underscore,
    /// Keep only the base name (`bar`).
    BasenameOnly,
}

impl NamingStyle {
    /// Parse a configured style; unknown values fall back to [`NamingStyle::Slash`].
    pub fn from_config(style: &str) -> Self {
        match style {
            "slash" => Self::Slash,
            "dash" => Self::Dash,
            "underscore" => Self::Underscore,
            "basenameOnly" => Self::BasenameOnly,
            other => {
                tracing::warn!(style = other, "unknown remoteNameStyle, falling back to slash");
                Self::Slash
            }
        }
    }

    /// Apply the style to a (possibly already encoded) project name.
    pub fn apply(&self, name: &str) -> String {
        match self {
            Self::Slash => name.to_string(),
            Self::Dash => name.replace('/', "-"),
            Self::Underscore => name.replace('/', "_"),
            Self::BasenameOnly => base_name(name).to_string(),
        }
    }
}

/// Last path segment with its extension removed.
fn base_name(name: &str) -> &str {
    let segment = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match segment.rfind('.') {
        Some(dot) => &segment[..dot],
        None => segment,
    }
}

/// Schemes whose paths must be percent-encoded.
fn needs_url_encoding(scheme: Option<&str>) -> bool {
    matches!(scheme, Some(s) if s.eq_ignore_ascii_case("http")
        || s.eq_ignore_ascii_case("https")
        || s.eq_ignore_ascii_case("amazon-s3"))
}

/// Form-encode a project name, then keep `/` literal so the path structure
/// survives on the remote host.
fn encode_name(name: &str) -> String {
    urlencoding::encode(name)
        .replace("%2F", "/")
        .replace("%2A", "*")
        .replace('~', "%7E")
}

/// A parsed remote URI.
///
/// Accepts `scheme://[user@]host[:port]/path`, scp-like `[user@]host:path`,
/// `file://path` and bare local paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUri {
    scheme: Option<String>,
    user: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: String,
    scp_like: bool,
}

impl RemoteUri {
    /// Parse a URI or URI template.
    pub fn parse(uri: &str) -> Result<Self, StatusError> {
        let malformed = |reason: &str| StatusError::MalformedUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        if uri.trim().is_empty() {
            return Err(malformed("empty"));
        }
        if uri.chars().any(char::is_control) {
            return Err(malformed("control character"));
        }

        if let Some(idx) = uri.find("://") {
            let scheme = &uri[..idx];
            let valid_scheme = scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
            if !valid_scheme {
                return Err(malformed("invalid scheme"));
            }
            let rest = &uri[idx + 3..];

            if scheme.eq_ignore_ascii_case("file") {
                if rest.is_empty() {
                    return Err(malformed("missing path"));
                }
                return Ok(Self {
                    scheme: Some(scheme.to_string()),
                    user: None,
                    host: None,
                    port: None,
                    path: rest.to_string(),
                    scp_like: false,
                });
            }

            let (authority, path) = match rest.find('/') {
                Some(slash) => (&rest[..slash], &rest[slash..]),
                None => (rest, ""),
            };
            let (user, host, port) = split_authority(authority).map_err(|r| malformed(r))?;
            return Ok(Self {
                scheme: Some(scheme.to_string()),
                user,
                host: Some(host),
                port,
                path: path.to_string(),
                scp_like: false,
            });
        }

        if let Some(colon) = uri.find(':') {
            let authority = &uri[..colon];
            if colon > 0 && !authority.contains('/') {
                let (user, host) = match authority.rsplit_once('@') {
                    Some((u, h)) => (Some(u.to_string()), h),
                    None => (None, authority),
                };
                if host.is_empty() {
                    return Err(malformed("missing host"));
                }
                return Ok(Self {
                    scheme: None,
                    user,
                    host: Some(host.to_string()),
                    port: None,
                    path: uri[colon + 1..].to_string(),
                    scp_like: true,
                });
            }
        }

        Ok(Self {
            scheme: None,
            user: None,
            host: None,
            port: None,
            path: uri.to_string(),
            scp_like: false,
        })
    }

    /// URI scheme, if any.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Host, if the URI targets a remote machine.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Explicit port, if one was given.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Path component.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// True if the URI names a remote host.
    pub fn is_remote(&self) -> bool {
        self.host.as_deref().is_some_and(|h| !h.is_empty())
    }

    /// Copy of this URI with a different path.
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    /// Reduce to the identifier used as the cache destination:
    /// `host[:port]` for remote URIs, the path otherwise.
    pub fn destination_id(&self) -> String {
        match (&self.host, self.port) {
            (Some(host), Some(port)) if self.is_remote() => format!("{}:{}", host, port),
            (Some(host), None) if self.is_remote() => host.clone(),
            _ => self.path.clone(),
        }
    }
}

fn split_authority(
    authority: &str,
) -> Result<(Option<String>, String, Option<u16>), &'static str> {
    let (user, host_port) = match authority.rsplit_once('@') {
        Some((u, hp)) => (Some(u.to_string()), hp),
        None => (None, authority),
    };

    let (host, port) = if let Some(stripped) = host_port.strip_prefix('[') {
        let end = stripped.find(']').ok_or("unterminated IPv6 literal")?;
        let host = &host_port[..end + 2];
        let tail = &stripped[end + 1..];
        match tail.strip_prefix(':') {
            Some(p) => (host, Some(p)),
            None if tail.is_empty() => (host, None),
            None => return Err("unexpected characters after IPv6 literal"),
        }
    } else {
        match host_port.rsplit_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (host_port, None),
        }
    };

    if host.is_empty() {
        return Err("missing host");
    }
    let port = match port {
        Some("") | None => None,
        Some(p) => Some(p.parse::<u16>().map_err(|_| "invalid port")?),
    };
    Ok((user, host.to_string(), port))
}

impl fmt::Display for RemoteUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{}://", scheme)?;
        }
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        if let Some(host) = &self.host {
            f.write_str(host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        if self.scp_like {
            f.write_str(":")?;
        }
        f.write_str(&self.path)
    }
}

/// One entry of a remote's `projects` list.
#[derive(Debug, Clone)]
pub enum ProjectPattern {
    /// Matches exactly one name.
    Exact(String),
    /// Trailing `*`: matches names with this prefix.
    Wildcard(String),
    /// Leading `^`: regex that must match the whole name.
    Regex(Regex),
}

impl ProjectPattern {
    /// Classify and compile a configured pattern.
    pub fn parse(remote: &str, pattern: &str) -> Result<Self, StatusError> {
        if pattern.starts_with('^') {
            let re = Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| {
                StatusError::InvalidProjectPattern {
                    remote: remote.to_string(),
                    pattern: pattern.to_string(),
                    source,
                }
            })?;
            Ok(Self::Regex(re))
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            Ok(Self::Wildcard(prefix.to_string()))
        } else {
            Ok(Self::Exact(pattern.to_string()))
        }
    }

    /// Test a project name.
    pub fn matches(&self, project: &str) -> bool {
        match self {
            Self::Exact(name) => name == project,
            Self::Wildcard(prefix) => project.starts_with(prefix.as_str()),
            Self::Regex(re) => re.is_match(project),
        }
    }
}

/// The set of projects a remote replicates. Empty means all projects.
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    patterns: Vec<ProjectPattern>,
}

impl ProjectFilter {
    /// Compile the configured patterns for `remote`.
    pub fn parse(remote: &str, patterns: &[String]) -> Result<Self, StatusError> {
        let patterns = patterns
            .iter()
            .map(|p| ProjectPattern::parse(remote, p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// True if `project` is replicated by this remote.
    pub fn matches(&self, project: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(project))
    }

    /// True if the filter is a single exact name.
    ///
    /// Wildcards and regexes never count, even if they match one project today.
    pub fn is_single_project_match(&self) -> bool {
        matches!(self.patterns.as_slice(), [ProjectPattern::Exact(_)])
    }
}

/// One configured remote destination.
#[derive(Debug, Clone)]
pub struct RemoteDestinationConfig {
    name: String,
    url_templates: Vec<String>,
    projects: ProjectFilter,
    naming_style: NamingStyle,
}

impl RemoteDestinationConfig {
    /// Build and validate a remote.
    ///
    /// Every template of a remote that is not a single project match must carry
    /// the `${name}` placeholder in its path.
    pub fn new(
        name: impl Into<String>,
        url_templates: Vec<String>,
        projects: &[String],
        naming_style: NamingStyle,
    ) -> Result<Self, StatusError> {
        let name = name.into();
        let projects = ProjectFilter::parse(&name, projects)?;

        if !projects.is_single_project_match() {
            for url in &url_templates {
                let has_placeholder = match RemoteUri::parse(url) {
                    Ok(uri) => uri.path().contains(NAME_PLACEHOLDER),
                    Err(_) => url.contains(NAME_PLACEHOLDER),
                };
                if !has_placeholder {
                    return Err(StatusError::MissingPlaceholder {
                        remote: name,
                        url: url.clone(),
                    });
                }
            }
        }

        Ok(Self {
            name,
            url_templates,
            projects,
            naming_style,
        })
    }

    /// Remote stanza name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// URL templates in configuration order.
    pub fn url_templates(&self) -> &[String] {
        &self.url_templates
    }

    /// Naming style applied to project names.
    pub fn naming_style(&self) -> NamingStyle {
        self.naming_style
    }

    /// Project filter.
    pub fn projects(&self) -> &ProjectFilter {
        &self.projects
    }

    /// Substitute `project` into `template` and return the concrete URI.
    pub fn resolve_uri(&self, template: &str, project: &str) -> Result<RemoteUri, StatusError> {
        let uri = RemoteUri::parse(template)?;

        let mut name = if needs_url_encoding(uri.scheme()) {
            encode_name(project)
        } else {
            project.to_string()
        };
        name = self.naming_style.apply(&name);

        match uri.path().find(NAME_PLACEHOLDER) {
            Some(at) => {
                let path = uri.path();
                let replaced = format!(
                    "{}{}{}",
                    &path[..at],
                    name,
                    &path[at + NAME_PLACEHOLDER.len()..]
                );
                Ok(uri.with_path(replaced))
            }
            None => Ok(uri),
        }
    }

    /// Destination identifiers replication would target for `project`.
    ///
    /// Empty when the project is not replicated by this remote. A template that
    /// fails to resolve is logged and skipped.
    pub fn destinations(&self, project: &str) -> BTreeSet<String> {
        if self.url_templates.is_empty() || !self.projects.matches(project) {
            return BTreeSet::new();
        }

        self.url_templates
            .iter()
            .filter_map(|template| match self.resolve_uri(template, project) {
                Ok(uri) => Some(uri.destination_id()),
                Err(e) => {
                    tracing::error!(
                        remote = %self.name,
                        template = %template,
                        project,
                        error = %e,
                        "cannot resolve target URI"
                    );
                    None
                }
            })
            .collect()
    }
}

/// Which remotes a query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSelector {
    /// Every configured remote.
    All,
    /// A single remote by stanza name.
    Named(String),
}

impl RemoteSelector {
    /// `None` selects every remote.
    pub fn from_option(name: Option<String>) -> Self {
        name.map(Self::Named).unwrap_or(Self::All)
    }
}

/// Immutable set of remotes loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct RemoteRegistry {
    remotes: Vec<RemoteDestinationConfig>,
}

impl RemoteRegistry {
    /// Create a registry from validated remotes.
    pub fn new(remotes: Vec<RemoteDestinationConfig>) -> Self {
        Self { remotes }
    }

    /// Look up a remote by name.
    pub fn get(&self, name: &str) -> Option<&RemoteDestinationConfig> {
        self.remotes.iter().find(|r| r.name == name)
    }

    /// All remotes in configuration order.
    pub fn remotes(&self) -> &[RemoteDestinationConfig] {
        &self.remotes
    }

    /// Number of remotes.
    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    /// True if no remotes are configured.
    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }

    /// Destinations of `remote_name` for `project`; empty for unknown remotes.
    pub fn resolve(&self, remote_name: &str, project: &str) -> BTreeSet<String> {
        self.get(remote_name)
            .map(|r| r.destinations(project))
            .unwrap_or_default()
    }

    /// Listing mode: the raw templates of `remote_name`.
    pub fn templates(&self, remote_name: &str) -> BTreeSet<String> {
        self.get(remote_name)
            .map(|r| r.url_templates.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Destinations of every selected remote for `project`.
    pub fn resolve_selector(&self, selector: &RemoteSelector, project: &str) -> BTreeSet<String> {
        match selector {
            RemoteSelector::All => self
                .remotes
                .iter()
                .flat_map(|r| r.destinations(project))
                .collect(),
            RemoteSelector::Named(name) => self.resolve(name, project),
        }
    }
}
