use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::cli::Cli;
use crate::extract::ExtractOptions;
use crate::platform::Platform;
use crate::sanitize::extension_of;
use crate::session::{Credentials, HttpSettings, SetupError};

pub const USERNAME_ENV: &str = "COURSE_HARVEST_USERNAME";
pub const PASSWORD_ENV: &str = "COURSE_HARVEST_PASSWORD";

/// Directory name limit used on Windows unless one is given.
pub const WINDOWS_MAX_PATH_PART_LEN: usize = 90;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a harvest run needs, validated once up front.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub courses: Vec<String>,
    pub dest_dir: PathBuf,
    /// Lowercase, without the leading dot.
    pub ignore_extensions: Vec<String>,
    /// 1-based positions of the weeks to keep, counted in the order the weeks
    /// are processed. `None` keeps every week.
    pub week_filter: Option<BTreeSet<usize>>,
    pub reverse_sections: bool,
    pub archive: bool,
    pub max_path_part_len: Option<usize>,
    pub concurrency: usize,
    pub http: HttpSettings,
    pub platform: Platform,
    pub credentials: Option<Credentials>,
}

impl HarvestConfig {
    /// Defaults for library callers that bring their own session.
    pub fn new(platform: Platform, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            courses: Vec::new(),
            dest_dir: dest_dir.into(),
            ignore_extensions: Vec::new(),
            week_filter: None,
            reverse_sections: false,
            archive: false,
            max_path_part_len: None,
            concurrency: 1,
            http: HttpSettings {
                proxy: None,
                timeout: DEFAULT_TIMEOUT,
            },
            platform,
            credentials: None,
        }
    }

    pub fn from_cli(cli: Cli) -> Result<Self, SetupError> {
        let username = cli
            .username
            .or_else(|| std::env::var(USERNAME_ENV).ok())
            .filter(|v| !v.trim().is_empty());
        let password = cli
            .password
            .or_else(|| std::env::var(PASSWORD_ENV).ok())
            .filter(|v| !v.is_empty());
        let (Some(username), Some(password)) = (username, password) else {
            return Err(SetupError::MissingCredentials);
        };

        for course in &cli.courses {
            validate_course_id(course)?;
        }

        if cli.weeks.contains(&0) {
            return Err(SetupError::InvalidConfig(
                "week numbers start at 1".to_owned(),
            ));
        }
        if cli.concurrency == 0 {
            return Err(SetupError::InvalidConfig(
                "--concurrency must be at least 1".to_owned(),
            ));
        }
        if cli.timeout_secs == 0 {
            return Err(SetupError::InvalidConfig(
                "--timeout-secs must be at least 1".to_owned(),
            ));
        }
        if let Some(len) = cli.max_path_part_len
            && len < 4
        {
            return Err(SetupError::InvalidConfig(
                "--max-path-part-len must be at least 4".to_owned(),
            ));
        }
        if let Some(proxy) = cli.proxy.as_deref() {
            validate_proxy(proxy)?;
        }

        let platform = match cli.platform_root.as_deref() {
            Some(root) => Platform::with_root(root),
            None => Platform::hosted(),
        }
        .map_err(|err| SetupError::InvalidConfig(format!("{err:#}")))?;

        let max_path_part_len = cli.max_path_part_len.or(if cfg!(windows) {
            Some(WINDOWS_MAX_PATH_PART_LEN)
        } else {
            None
        });

        Ok(Self {
            courses: cli.courses,
            dest_dir: PathBuf::from(cli.dest),
            ignore_extensions: parse_ignore_list(&cli.ignore),
            week_filter: (!cli.weeks.is_empty()).then(|| cli.weeks.into_iter().collect()),
            reverse_sections: cli.reverse_sections,
            archive: cli.archive,
            max_path_part_len,
            concurrency: cli.concurrency,
            http: HttpSettings {
                proxy: cli.proxy,
                timeout: Duration::from_secs(cli.timeout_secs),
            },
            platform,
            credentials: Some(Credentials { username, password }),
        })
    }

    pub fn includes_week(&self, index: usize) -> bool {
        self.week_filter
            .as_ref()
            .is_none_or(|weeks| weeks.contains(&index))
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            max_path_part_len: self.max_path_part_len,
            reverse_weeks: self.reverse_sections,
            week_filter: self.week_filter.clone(),
            ignore_extensions: self.ignore_extensions.clone(),
        }
    }
}

/// `"ppt, .SRT,,pdf"` → `["ppt", "srt", "pdf"]`.
pub fn parse_ignore_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

pub fn is_ignored(ignore_extensions: &[String], filename: &str) -> bool {
    extension_of(filename).is_some_and(|ext| ignore_extensions.contains(&ext))
}

fn validate_course_id(course: &str) -> Result<(), SetupError> {
    let valid = !course.is_empty()
        && course
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && course != "."
        && course != "..";
    if valid {
        Ok(())
    } else {
        Err(SetupError::InvalidConfig(format!(
            "invalid course identifier: {course:?}"
        )))
    }
}

fn validate_proxy(proxy: &str) -> Result<(), SetupError> {
    let candidate = if proxy.contains("://") {
        proxy.to_owned()
    } else {
        format!("http://{proxy}")
    };
    match Url::parse(&candidate) {
        Ok(url) if url.host_str().is_some() => Ok(()),
        _ => Err(SetupError::InvalidConfig(format!("invalid proxy: {proxy}"))),
    }
}
