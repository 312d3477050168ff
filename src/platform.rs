use anyhow::Context as _;
use url::Url;

pub const DEFAULT_CLASS_ROOT: &str = "https://class.coursera.org";
pub const DEFAULT_LOGIN_URL: &str = "https://accounts.coursera.org/api/v1/login";
pub const DEFAULT_ABOUT_URL: &str = "https://www.coursera.org/maestro/api/topic/information";

/// Where the pages of a course offering live on the remote platform.
#[derive(Debug, Clone)]
pub struct Platform {
    class_root: String,
    login_url: Url,
    about_url: Url,
}

impl Platform {
    pub fn new(class_root: &str, login_url: &str, about_url: &str) -> anyhow::Result<Self> {
        let class_root = Url::parse(class_root)
            .with_context(|| format!("parse class root url: {class_root}"))?;
        Ok(Self {
            class_root: class_root.as_str().trim_end_matches('/').to_owned(),
            login_url: Url::parse(login_url)
                .with_context(|| format!("parse login url: {login_url}"))?,
            about_url: Url::parse(about_url)
                .with_context(|| format!("parse about url: {about_url}"))?,
        })
    }

    pub fn hosted() -> anyhow::Result<Self> {
        Self::new(DEFAULT_CLASS_ROOT, DEFAULT_LOGIN_URL, DEFAULT_ABOUT_URL)
    }

    /// Serves every endpoint from one root, for mirrors and local stubs.
    pub fn with_root(root: &str) -> anyhow::Result<Self> {
        let root = root.trim_end_matches('/');
        Self::new(
            root,
            &format!("{root}/api/v1/login"),
            &format!("{root}/maestro/api/topic/information"),
        )
    }

    pub fn lecture_index_url(&self, course_id: &str) -> anyhow::Result<Url> {
        self.class_url(course_id, "lecture/index")
    }

    pub fn course_home_url(&self, course_id: &str) -> anyhow::Result<Url> {
        self.class_url(course_id, "class/index")
    }

    pub fn login_url(&self) -> &Url {
        &self.login_url
    }

    /// The public site the login form is posted from.
    pub fn referer(&self) -> String {
        self.about_url.origin().ascii_serialization()
    }

    pub fn about_url(&self, course_id: &str) -> Url {
        let mut url = self.about_url.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("topic-id", course_base_name(course_id));
        url
    }

    fn class_url(&self, course_id: &str, page: &str) -> anyhow::Result<Url> {
        let raw = format!("{}/{course_id}/{page}", self.class_root);
        Url::parse(&raw).with_context(|| format!("build course url: {raw}"))
    }
}

/// Course identifier without its run suffix: `comnets-2012-001` → `comnets`.
pub fn course_base_name(course_id: &str) -> &str {
    let bytes = course_id.as_bytes();
    for (idx, window) in bytes.windows(2).enumerate() {
        if window[0] == b'-' && window[1].is_ascii_digit() {
            return &course_id[..idx];
        }
    }
    course_id
}
