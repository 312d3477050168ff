use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use reqwest::StatusCode;
use reqwest::cookie::{CookieStore as _, Jar};
use reqwest::header::REFERER;
use url::Url;

use crate::platform::Platform;

const USER_AGENT: &str = concat!("course-harvest/", env!("CARGO_PKG_VERSION"));

/// Failures that stop a run before any course is downloaded.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("unknown course: {0}")]
    UnknownCourse(String),
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("failed to authenticate as {0}")]
    AuthenticationFailed(String),
    #[error("failed to find csrf cookie on the lecture index of {0}")]
    MissingCsrfToken(String),
    #[error("no credentials given (use --username/--password or COURSE_HARVEST_USERNAME/COURSE_HARVEST_PASSWORD)")]
    MissingCredentials,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// `host:port` or a full proxy URL.
    pub proxy: Option<String>,
    /// Bound for connecting, for the response headers, and for each body chunk.
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A cookie-carrying HTTP client. Clones share the same connection pool and
/// cookie jar, so one session can serve many workers.
#[derive(Debug, Clone)]
pub struct Session {
    client: reqwest::Client,
    jar: Arc<Jar>,
}

impl Session {
    /// A session with an empty cookie jar.
    pub fn anonymous(settings: &HttpSettings) -> anyhow::Result<Self> {
        let jar = Arc::new(Jar::default());
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_provider(jar.clone())
            .connect_timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(proxy) = settings.proxy.as_deref() {
            let proxy_url = if proxy.contains("://") {
                proxy.to_owned()
            } else {
                format!("http://{proxy}")
            };
            let proxy = reqwest::Proxy::all(&proxy_url)
                .with_context(|| format!("configure proxy: {proxy_url}"))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().context("build http client")?;
        Ok(Self { client, jar })
    }

    /// Logs in through the platform's form login. The course is needed because
    /// the csrf cookie is only handed out together with a course page.
    pub async fn login(
        settings: &HttpSettings,
        platform: &Platform,
        credentials: &Credentials,
        course_id: &str,
    ) -> anyhow::Result<Self> {
        let session = Self::anonymous(settings)?;

        let lecture_url = platform.lecture_index_url(course_id)?;
        let response = session
            .client
            .get(lecture_url.clone())
            .timeout(settings.timeout)
            .send()
            .await
            .with_context(|| format!("GET {lecture_url}"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SetupError::UnknownCourse(course_id.to_owned()).into());
        }
        drop(response);

        let csrf = session
            .cookie(&lecture_url, "csrf_token")
            .ok_or_else(|| SetupError::MissingCsrfToken(course_id.to_owned()))?;

        let login_url = platform.login_url();
        session
            .jar
            .add_cookie_str(&format!("csrftoken={csrf}"), login_url);

        let response = session
            .client
            .post(login_url.clone())
            .header(REFERER, platform.referer())
            .header("X-CSRFToken", &csrf)
            .form(&[
                ("email", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .timeout(settings.timeout)
            .send()
            .await
            .with_context(|| format!("POST {login_url}"))?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(SetupError::InvalidCredentials.into());
        }
        drop(response);

        if session.cookie(login_url, "CAUTH").is_none() {
            return Err(SetupError::AuthenticationFailed(credentials.username.clone()).into());
        }

        tracing::info!(username = %credentials.username, "logged in");
        Ok(session)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Value of the cookie `name` that would be sent to `url`.
    pub fn cookie(&self, url: &Url, name: &str) -> Option<String> {
        let header = self.jar.cookies(url)?;
        let header = header.to_str().ok()?;
        header.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.to_owned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> HttpSettings {
        HttpSettings {
            proxy: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn credentials_debug_hides_the_password() {
        let credentials = Credentials {
            username: "me@example.com".to_owned(),
            password: "hunter2".to_owned(),
        };
        let debug = format!("{credentials:?}");
        assert!(debug.contains("me@example.com"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn cookie_lookup_reads_the_jar() -> anyhow::Result<()> {
        let session = Session::anonymous(&settings())?;
        let url = Url::parse("http://host/course/lecture/index")?;
        session.jar.add_cookie_str("csrf_token=abc123; Path=/", &url);
        session.jar.add_cookie_str("other=1; Path=/", &url);

        assert_eq!(session.cookie(&url, "csrf_token").as_deref(), Some("abc123"));
        assert_eq!(session.cookie(&url, "CAUTH"), None);
        Ok(())
    }

    #[test]
    fn proxy_without_scheme_is_accepted() -> anyhow::Result<()> {
        let settings = HttpSettings {
            proxy: Some("proxy.local:3128".to_owned()),
            ..settings()
        };
        Session::anonymous(&settings)?;
        Ok(())
    }
}
