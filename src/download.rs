use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use reqwest::StatusCode;
use url::Url;

use crate::archive::archive_course;
use crate::config::{HarvestConfig, is_ignored};
use crate::course::{CourseTree, ResourceRef, numbered_dir_name};
use crate::extract::extract;
use crate::fetch::{FetchError, Fetcher};
use crate::reconcile::{self, Verdict};
use crate::sanitize::filename_from_url;
use crate::session::SetupError;

/// Raw lecture index as fetched, rewritten on every run.
pub const LECTURES_SNAPSHOT: &str = "lectures.html";
/// Course home page, rewritten on every run.
pub const HOME_SNAPSHOT: &str = "index.html";

/// Tally of one course run. Per-resource failures land in `failed`; they never
/// fail the course.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourseReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub renamed: usize,
    pub ignored: usize,
    pub failed: Vec<Url>,
    pub bytes_written: u64,
    pub archive: Option<PathBuf>,
}

impl CourseReport {
    fn record(&mut self, url: &Url, outcome: anyhow::Result<ResourceOutcome>) {
        match outcome {
            Ok(ResourceOutcome::Downloaded { bytes, .. }) => {
                self.downloaded += 1;
                self.bytes_written += bytes;
            }
            Ok(ResourceOutcome::Skipped { .. }) => self.skipped += 1,
            Ok(ResourceOutcome::Renamed { .. }) => self.renamed += 1,
            Ok(ResourceOutcome::Ignored { .. }) => self.ignored += 1,
            Err(err) => {
                tracing::warn!(%url, ?err, "failed to download resource");
                self.failed.push(url.clone());
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOutcome {
    Downloaded { path: PathBuf, bytes: u64 },
    Skipped { path: PathBuf },
    Renamed { from: PathBuf, to: PathBuf },
    Ignored { filename: String },
}

/// One resource and the lecture directory it belongs in.
#[derive(Debug, Clone)]
struct ResourceJob {
    dir: PathBuf,
    resource: ResourceRef,
    /// Names the lecture's resources are expected to land under. Files with
    /// these names are never taken for a renamed copy of another resource.
    siblings: Arc<[String]>,
}

/// Fails with [`SetupError::UnknownCourse`] when the platform answers 404 for
/// the course's lecture index. Any other error is left to the course run.
pub async fn ensure_course_exists(
    fetcher: &Fetcher,
    config: &HarvestConfig,
    course_id: &str,
) -> anyhow::Result<()> {
    let url = config.platform.lecture_index_url(course_id)?;
    match fetcher.fetch(&url).await {
        Ok(_) => Ok(()),
        Err(err) => match unknown_course(err, course_id) {
            Ok(err) => Err(err),
            Err(err) => {
                tracing::warn!(course = course_id, ?err, "could not check the course; trying it anyway");
                Ok(())
            }
        },
    }
}

/// Sorts a lecture index error: `Ok` carries it as an unknown course, `Err`
/// returns it untouched.
fn unknown_course(err: anyhow::Error, course_id: &str) -> Result<anyhow::Error, anyhow::Error> {
    if FetchError::status_of(&err) == Some(StatusCode::NOT_FOUND) {
        Ok(err.context(SetupError::UnknownCourse(course_id.to_owned())))
    } else {
        Err(err)
    }
}

/// Mirrors one course into `<dest_dir>/<course_id>/`.
///
/// Errors are course-level: the lecture index could not be fetched or parsed,
/// or the course directory could not be created.
pub async fn download_course(
    fetcher: &Fetcher,
    config: &HarvestConfig,
    course_id: &str,
) -> anyhow::Result<CourseReport> {
    let lecture_url = config.platform.lecture_index_url(course_id)?;
    tracing::info!(course = course_id, url = %lecture_url, "collecting downloadable content");

    let lecture_html = match fetcher.fetch_text(&lecture_url).await {
        Ok(html) => html,
        Err(err) => {
            return Err(match unknown_course(err, course_id) {
                Ok(err) => err,
                Err(err) => err.context("fetch lecture index"),
            });
        }
    };

    let tree = extract(
        &lecture_html,
        &lecture_url,
        fetcher,
        &config.extract_options(),
    )
    .await
    .context("extract course structure")?;

    if tree.is_empty() {
        tracing::warn!(
            course = course_id,
            "no downloadable content found; did you accept the honour code?"
        );
        return Ok(CourseReport::default());
    }
    tracing::info!(
        course = course_id,
        weeks = tree.weeks.len(),
        resources = tree.resource_count(),
        "got all downloadable content"
    );

    if config.reverse_sections {
        tracing::info!(course = course_id, "weekly sections reversed");
    }

    let course_dir = config.dest_dir.join(course_id);
    tokio::fs::create_dir_all(&course_dir)
        .await
        .with_context(|| format!("create course dir: {}", course_dir.display()))?;

    let lectures_path = course_dir.join(LECTURES_SNAPSHOT);
    tokio::fs::write(&lectures_path, &lecture_html)
        .await
        .with_context(|| format!("write {}", lectures_path.display()))?;

    if let Err(err) = save_home_page(fetcher, config, course_id, &course_dir).await {
        tracing::warn!(course = course_id, ?err, "failed to download course home page");
    }
    if let Err(err) = save_about(fetcher, config, course_id, &course_dir).await {
        tracing::warn!(course = course_id, ?err, "failed to download about file");
    }

    let mut report = CourseReport::default();
    let jobs = plan_jobs(&tree, config, &course_dir, &mut report).await;
    run_jobs(fetcher, config, jobs, &mut report).await?;

    tracing::info!(
        course = course_id,
        downloaded = report.downloaded,
        skipped = report.skipped,
        renamed = report.renamed,
        ignored = report.ignored,
        failed = report.failed.len(),
        bytes = report.bytes_written,
        "course done"
    );

    if config.archive {
        match archive_course(&config.dest_dir, course_id).await {
            Ok(path) => report.archive = Some(path),
            Err(err) => {
                tracing::error!(course = course_id, ?err, "archiving failed; keeping the directory");
            }
        }
    }

    Ok(report)
}

async fn save_home_page(
    fetcher: &Fetcher,
    config: &HarvestConfig,
    course_id: &str,
    course_dir: &Path,
) -> anyhow::Result<()> {
    let url = config.platform.course_home_url(course_id)?;
    let body = fetcher.fetch_bytes(&url).await?;
    let path = course_dir.join(HOME_SNAPSHOT);
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("write {}", path.display()))
}

async fn save_about(
    fetcher: &Fetcher,
    config: &HarvestConfig,
    course_id: &str,
    course_dir: &Path,
) -> anyhow::Result<()> {
    let url = config.platform.about_url(course_id);
    let about = fetcher.fetch_json(&url).await?;
    let pretty = serde_json::to_string_pretty(&about).context("serialize about json")?;
    let path = course_dir.join(about_file_name(course_id));
    tokio::fs::write(&path, pretty)
        .await
        .with_context(|| format!("write {}", path.display()))
}

pub fn about_file_name(course_id: &str) -> String {
    format!("{course_id}-about.json")
}

/// Creates the week and lecture directories and lists the resources in tree
/// order. Weeks are numbered by their position in `tree`, filtered or not.
async fn plan_jobs(
    tree: &CourseTree,
    config: &HarvestConfig,
    course_dir: &Path,
    report: &mut CourseReport,
) -> Vec<ResourceJob> {
    let mut jobs = Vec::new();

    for (week_idx, week) in (1..).zip(&tree.weeks) {
        if !config.includes_week(week_idx) {
            tracing::info!(week = %week.title, index = week_idx, "skipping week (not selected)");
            continue;
        }
        tracing::info!(week = %week.title, index = week_idx, "week");
        let week_dir = course_dir.join(numbered_dir_name(week_idx, &week.title));
        if let Err(err) = tokio::fs::create_dir_all(&week_dir).await {
            tracing::warn!(dir = %week_dir.display(), ?err, "failed to create week dir");
            report.failed.extend(
                week.lectures
                    .iter()
                    .flat_map(|lecture| &lecture.resources)
                    .map(|r| r.url.clone()),
            );
            continue;
        }

        for (lecture_idx, lecture) in (1..).zip(&week.lectures) {
            let lecture_dir = week_dir.join(numbered_dir_name(lecture_idx, &lecture.title));
            if let Err(err) = tokio::fs::create_dir_all(&lecture_dir).await {
                tracing::warn!(dir = %lecture_dir.display(), ?err, "failed to create lecture dir");
                report
                    .failed
                    .extend(lecture.resources.iter().map(|r| r.url.clone()));
                continue;
            }
            let siblings: Arc<[String]> = lecture.resources.iter().map(planned_name).collect();
            jobs.extend(lecture.resources.iter().map(|resource| ResourceJob {
                dir: lecture_dir.clone(),
                resource: resource.clone(),
                siblings: Arc::clone(&siblings),
            }));
        }
    }

    jobs
}

/// The name a resource is saved under unless its response headers name it.
fn planned_name(resource: &ResourceRef) -> String {
    resource
        .suggested_filename
        .clone()
        .unwrap_or_else(|| filename_from_url(&prefer_english_subtitles(&resource.url)))
}

/// French subtitle links are swapped for the English track.
pub fn prefer_english_subtitles(url: &Url) -> Url {
    const FRENCH: &str = "_fr&format=";
    if !url.as_str().contains(FRENCH) {
        return url.clone();
    }
    Url::parse(&url.as_str().replace(FRENCH, "_en&format=")).unwrap_or_else(|_| url.clone())
}

/// Sequential at concurrency 1. Otherwise jobs are started in tree order with
/// at most `concurrency` in flight.
async fn run_jobs(
    fetcher: &Fetcher,
    config: &HarvestConfig,
    jobs: Vec<ResourceJob>,
    report: &mut CourseReport,
) -> anyhow::Result<()> {
    if config.concurrency <= 1 {
        for job in jobs {
            let outcome = download_resource(fetcher, &config.ignore_extensions, &job).await;
            report.record(&job.resource.url, outcome);
        }
        return Ok(());
    }

    let ignore: Arc<[String]> = config.ignore_extensions.clone().into();
    let mut pending = jobs.into_iter();
    let mut join_set = tokio::task::JoinSet::new();

    loop {
        while join_set.len() < config.concurrency {
            let Some(job) = pending.next() else {
                break;
            };
            let fetcher = fetcher.clone();
            let ignore = Arc::clone(&ignore);
            let url = job.resource.url.clone();
            join_set.spawn(async move {
                let worker =
                    tokio::spawn(async move { download_resource(&fetcher, &ignore, &job).await });
                (url, task_outcome(worker.await))
            });
        }

        let Some(joined) = join_set.join_next().await else {
            break;
        };
        match joined {
            Ok((url, outcome)) => report.record(&url, outcome),
            Err(err) => tracing::error!(?err, "download task lost"),
        }
    }

    Ok(())
}

/// A download task that panicked or was cancelled counts as that resource's
/// failure.
fn task_outcome(
    joined: Result<anyhow::Result<ResourceOutcome>, tokio::task::JoinError>,
) -> anyhow::Result<ResourceOutcome> {
    match joined {
        Ok(outcome) => outcome,
        Err(err) => Err(anyhow::Error::new(err).context("download task failed")),
    }
}

/// Brings one resource up to date on disk.
///
/// The ignore list is checked before the request with the name known up
/// front, and again once the response headers may have named the file.
async fn download_resource(
    fetcher: &Fetcher,
    ignore_extensions: &[String],
    job: &ResourceJob,
) -> anyhow::Result<ResourceOutcome> {
    let url = &prefer_english_subtitles(&job.resource.url);

    let early_name = job
        .resource
        .suggested_filename
        .clone()
        .unwrap_or_else(|| filename_from_url(url));
    if is_ignored(ignore_extensions, &early_name) {
        tracing::info!(file = %early_name, "skipping (extension ignored)");
        return Ok(ResourceOutcome::Ignored {
            filename: early_name,
        });
    }

    let response = fetcher.fetch(url).await?;
    let expected_size = response.content_length();
    let filename = match &job.resource.suggested_filename {
        Some(name) => name.clone(),
        None => response.header_filename().unwrap_or(early_name),
    };
    if is_ignored(ignore_extensions, &filename) {
        tracing::info!(file = %filename, "skipping (extension ignored)");
        return Ok(ResourceOutcome::Ignored { filename });
    }

    let target = job.dir.join(&filename);
    let verdict = {
        let target = target.clone();
        let siblings = Arc::clone(&job.siblings);
        tokio::task::spawn_blocking(move || reconcile::decide(&target, expected_size, &siblings))
    }
    .await
    .context("join reconcile task")?
    .with_context(|| format!("inspect {}", target.display()))?;

    match verdict {
        Verdict::Skip => {
            tracing::info!(file = %filename, "already downloaded");
            Ok(ResourceOutcome::Skipped { path: target })
        }
        Verdict::RenameFrom(existing) => {
            tracing::info!(
                file = %filename,
                from = %existing.display(),
                "found under an older name; renaming"
            );
            tokio::fs::rename(&existing, &target)
                .await
                .with_context(|| {
                    format!("rename {} -> {}", existing.display(), target.display())
                })?;
            Ok(ResourceOutcome::Renamed {
                from: existing,
                to: target,
            })
        }
        Verdict::Download => {
            if target.exists() {
                tracing::info!(file = %filename, "incomplete; downloading again");
            } else {
                tracing::info!(file = %filename, "downloading");
            }
            let bytes = response.write_to(&target).await?;
            Ok(ResourceOutcome::Downloaded {
                path: target,
                bytes,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::{Lecture, WeekSection};
    use crate::platform::Platform;

    fn tree() -> anyhow::Result<CourseTree> {
        let lecture = |title: &str, link: &str| -> anyhow::Result<Lecture> {
            Ok(Lecture {
                title: title.to_owned(),
                resources: vec![ResourceRef::new(Url::parse(link)?)],
            })
        };
        Ok(CourseTree {
            weeks: vec![
                WeekSection {
                    title: "Intro".to_owned(),
                    lectures: vec![
                        lecture("Welcome", "http://host/a.pdf")?,
                        lecture("Setup", "http://host/b.pdf")?,
                    ],
                },
                WeekSection {
                    title: "Wrap up".to_owned(),
                    lectures: vec![lecture("Bye", "http://host/c.pdf")?],
                },
            ],
        })
    }

    #[tokio::test]
    async fn plan_numbers_by_position_and_creates_dirs() -> anyhow::Result<()> {
        let dest = tempfile::TempDir::new()?;
        let config = HarvestConfig::new(Platform::with_root("http://host")?, dest.path());
        let mut report = CourseReport::default();

        let jobs = plan_jobs(&tree()?, &config, dest.path(), &mut report).await;

        let dirs: Vec<PathBuf> = jobs.iter().map(|job| job.dir.clone()).collect();
        assert_eq!(
            dirs,
            vec![
                dest.path().join("01 - Intro/01 - Welcome"),
                dest.path().join("01 - Intro/02 - Setup"),
                dest.path().join("02 - Wrap up/01 - Bye"),
            ]
        );
        assert!(dirs.iter().all(|dir| dir.is_dir()));
        assert!(report.failed.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn filtered_weeks_keep_their_numbers() -> anyhow::Result<()> {
        let dest = tempfile::TempDir::new()?;
        let mut config = HarvestConfig::new(Platform::with_root("http://host")?, dest.path());
        config.week_filter = Some([2].into_iter().collect());
        let mut report = CourseReport::default();

        let jobs = plan_jobs(&tree()?, &config, dest.path(), &mut report).await;

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].dir, dest.path().join("02 - Wrap up/01 - Bye"));
        assert!(!dest.path().join("01 - Intro").exists());
        Ok(())
    }

    #[tokio::test]
    async fn week_without_lectures_still_gets_its_dir() -> anyhow::Result<()> {
        let dest = tempfile::TempDir::new()?;
        let config = HarvestConfig::new(Platform::with_root("http://host")?, dest.path());
        let mut report = CourseReport::default();
        let mut tree = tree()?;
        tree.weeks.push(WeekSection {
            title: "Extras".to_owned(),
            lectures: Vec::new(),
        });

        let jobs = plan_jobs(&tree, &config, dest.path(), &mut report).await;

        assert_eq!(jobs.len(), 3);
        assert!(dest.path().join("03 - Extras").is_dir());
        assert!(report.failed.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn jobs_know_their_lecture_siblings() -> anyhow::Result<()> {
        let dest = tempfile::TempDir::new()?;
        let config = HarvestConfig::new(Platform::with_root("http://host")?, dest.path());
        let mut report = CourseReport::default();
        let tree = CourseTree {
            weeks: vec![WeekSection {
                title: "Intro".to_owned(),
                lectures: vec![Lecture {
                    title: "Welcome".to_owned(),
                    resources: vec![
                        ResourceRef::new(Url::parse("http://host/week1.pdf")?),
                        ResourceRef::named(Url::parse("http://host/v")?, "Welcome.mp4"),
                    ],
                }],
            }],
        };

        let jobs = plan_jobs(&tree, &config, dest.path(), &mut report).await;

        assert_eq!(jobs.len(), 2);
        for job in &jobs {
            assert_eq!(&*job.siblings, ["week1.pdf", "Welcome.mp4"]);
        }
        Ok(())
    }

    #[tokio::test]
    async fn panicked_download_is_a_failed_resource() -> anyhow::Result<()> {
        fn explode() -> anyhow::Result<ResourceOutcome> {
            panic!("download task blew up")
        }
        let url = Url::parse("http://host/a.pdf")?;
        let joined = tokio::spawn(async { explode() }).await;

        let mut report = CourseReport::default();
        report.record(&url, task_outcome(joined));

        assert_eq!(report.failed, vec![url]);
        assert_eq!(report.downloaded, 0);
        Ok(())
    }

    #[test]
    fn french_subtitles_are_swapped_for_english() -> anyhow::Result<()> {
        let french = Url::parse("http://host/subtitles?q=7_fr&format=srt")?;
        assert_eq!(
            prefer_english_subtitles(&french).as_str(),
            "http://host/subtitles?q=7_en&format=srt"
        );

        let other = Url::parse("http://host/subtitles?q=7_de&format=srt")?;
        assert_eq!(prefer_english_subtitles(&other), other);
        Ok(())
    }

    #[test]
    fn about_file_is_named_after_the_course() {
        assert_eq!(about_file_name("ml-003"), "ml-003-about.json");
    }
}
