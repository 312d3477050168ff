use url::Url;

/// Scheme + host + directory of the last seen page, the context relative links
/// are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BaseUrl {
    scheme: String,
    origin: String,
    dir: String,
}

impl BaseUrl {
    fn from_url(url: &Url) -> Self {
        let path = url.path();
        let dir = match path.rfind('/') {
            Some(idx) => &path[..=idx],
            None => "/",
        };
        Self {
            scheme: url.scheme().to_owned(),
            origin: url.origin().ascii_serialization(),
            dir: dir.to_owned(),
        }
    }

    fn parent_dir(dir: &str) -> Option<&str> {
        let trimmed = dir.strip_suffix('/')?;
        if trimmed.is_empty() {
            return None;
        }
        let idx = trimmed.rfind('/')?;
        Some(&trimmed[..=idx])
    }
}

/// Repairs relative, root-relative and scheme-less links into absolute URLs.
/// The default normalizer has no base and assumes scheme-less links start
/// with a host name.
#[derive(Debug, Clone, Default)]
pub struct UrlNormalizer {
    base: Option<BaseUrl>,
    adopt_absolute: bool,
}

impl UrlNormalizer {
    pub fn new(base: &Url) -> Self {
        Self {
            base: Some(BaseUrl::from_url(base)),
            adopt_absolute: false,
        }
    }

    /// When enabled, every absolute http(s) URL passed through `normalize`
    /// becomes the base for the links that follow it.
    pub fn adopt_absolute(mut self, adopt: bool) -> Self {
        self.adopt_absolute = adopt;
        self
    }

    /// Returns `None` only for blank input. A link that cannot be rebased
    /// (`../` above the root) comes back unchanged.
    pub fn normalize(&mut self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if has_scheme(raw) {
            if self.adopt_absolute
                && let Ok(url) = Url::parse(raw)
                && matches!(url.scheme(), "http" | "https")
            {
                self.base = Some(BaseUrl::from_url(&url));
            }
            return Some(raw.to_owned());
        }

        let Some(base) = self.base.as_ref() else {
            return Some(format!("http://{}", raw.trim_start_matches('/')));
        };

        if let Some(rest) = raw.strip_prefix("//") {
            return Some(format!("{}://{rest}", base.scheme));
        }

        if raw.starts_with('/') {
            return Some(format!("{}{raw}", base.origin));
        }

        let mut dir = base.dir.as_str();
        let mut rest = raw;
        while let Some(stripped) = rest.strip_prefix("../") {
            let Some(parent) = BaseUrl::parent_dir(dir) else {
                tracing::debug!(link = raw, base = %base.dir, "relative link escapes the site root");
                return Some(raw.to_owned());
            };
            dir = parent;
            rest = stripped;
        }
        while let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        }

        Some(format!("{}{dir}{rest}", base.origin))
    }
}

/// One-shot normalization against `base`.
pub fn normalize(raw: &str, base: &Url) -> String {
    UrlNormalizer::new(base)
        .normalize(raw)
        .unwrap_or_else(|| raw.to_owned())
}

fn has_scheme(raw: &str) -> bool {
    let Some(colon) = raw.find(':') else {
        return false;
    };
    let scheme = &raw[..colon];
    let mut chars = scheme.chars();
    let starts_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let valid = starts_alpha
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid {
        return false;
    }

    // `host:port/path` looks like a scheme to a naive parser.
    let after = &raw[colon + 1..];
    after.starts_with("//")
        || matches!(
            scheme.to_ascii_lowercase().as_str(),
            "mailto" | "data" | "javascript" | "about" | "blob"
        )
}
