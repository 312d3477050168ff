use anyhow::Context as _;

use crate::config::HarvestConfig;
use crate::download::{download_course, ensure_course_exists};
use crate::fetch::Fetcher;
use crate::session::{Session, SetupError};

/// Logs in once, checks that every course exists, then mirrors each in turn.
/// Only setup failures are returned, and an unknown course is one of them
/// wherever it appears in the list. A course failing later is logged and the
/// next one is started.
pub async fn run(config: HarvestConfig) -> anyhow::Result<()> {
    let credentials = config
        .credentials
        .as_ref()
        .ok_or(SetupError::MissingCredentials)?;
    let first_course = config
        .courses
        .first()
        .ok_or_else(|| SetupError::InvalidConfig("no course given".to_owned()))?;

    tracing::info!(username = %credentials.username, "logging in");
    let session = Session::login(&config.http, &config.platform, credentials, first_course)
        .await
        .context("login")?;
    let fetcher = Fetcher::new(session, config.http.timeout);

    // Login already read the first course's lecture index.
    for course_id in config.courses.iter().skip(1) {
        ensure_course_exists(&fetcher, &config, course_id)
            .await
            .with_context(|| format!("check course {course_id}"))?;
    }

    let total = config.courses.len();
    for (idx, course_id) in (1..).zip(&config.courses) {
        tracing::info!(course = %course_id, "course {idx} of {total}");
        if let Err(err) = download_course(&fetcher, &config, course_id).await {
            tracing::error!(course = %course_id, ?err, "course failed");
        }
    }

    Ok(())
}
