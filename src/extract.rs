use std::collections::BTreeSet;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::is_ignored;
use crate::course::{CourseTree, Lecture, ResourceRef, WeekSection};
use crate::fetch::Fetcher;
use crate::sanitize::{sanitize, trim_path_part};
use crate::url_norm::UrlNormalizer;

/// Links containing this token point at the uncompressed upload of a lecture
/// video. They are large and duplicate the compressed video, so they are
/// never collected.
pub const RAW_SOURCE_VIDEO_MARKER: &str = "source_videos";

const WEEK_HEADER_CLASS: &str = "course-item-list-header";

/// Anything that can hand out the text of a page.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_text(&self, url: &Url) -> anyhow::Result<String>;
}

#[async_trait]
impl PageSource for Fetcher {
    async fn fetch_text(&self, url: &Url) -> anyhow::Result<String> {
        Fetcher::fetch_text(self, url).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub max_path_part_len: Option<usize>,
    /// Number the weeks from the bottom of the page.
    pub reverse_weeks: bool,
    /// 1-based positions, counted after reversal, of the weeks whose lecture
    /// pages may be opened. `None` allows every week.
    pub week_filter: Option<BTreeSet<usize>>,
    /// A lecture video whose file name would carry one of these extensions is
    /// not looked up.
    pub ignore_extensions: Vec<String>,
}

impl ExtractOptions {
    fn includes_week(&self, index: usize) -> bool {
        self.week_filter
            .as_ref()
            .is_none_or(|weeks| weeks.contains(&index))
    }
}

/// A week as listed on the lecture index, before lecture videos are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedWeek {
    pub title: String,
    pub lectures: Vec<IndexedLecture>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedLecture {
    pub title: String,
    pub resources: Vec<ResourceRef>,
    /// None of the listed resources is a video.
    pub needs_video: bool,
    /// The lecture's own page, which embeds its video player.
    pub detail_url: Option<Url>,
}

struct Selectors {
    week_header: Selector,
    heading: Selector,
    item: Selector,
    lecture_link: Selector,
    anchor: Selector,
    resource_block: Selector,
    href: Selector,
    mp4_source: Selector,
    any_source: Selector,
}

impl Selectors {
    fn new() -> anyhow::Result<Self> {
        Ok(Self {
            week_header: selector(&format!("div.{WEEK_HEADER_CLASS}"))?,
            heading: selector("h3")?,
            item: selector("li")?,
            lecture_link: selector("a.lecture-link")?,
            anchor: selector("a")?,
            resource_block: selector("div.course-lecture-item-resource")?,
            href: selector("a[href]")?,
            mp4_source: selector(r#"source[type="video/mp4"][src]"#)?,
            any_source: selector("video[src], source[src]")?,
        })
    }
}

fn selector(css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow::anyhow!("parse selector {css:?}: {err}"))
}

/// Builds the course tree from the lecture index, in processing order.
///
/// Lectures whose resources include no video get one more request for their
/// detail page; when that fails the lecture is kept without a video. Weeks
/// outside the filter are returned as listed, without any request, and so are
/// videos whose extension is ignored.
///
/// An index without week sections yields an empty tree.
pub async fn extract(
    html: &str,
    base: &Url,
    source: &dyn PageSource,
    options: &ExtractOptions,
) -> anyhow::Result<CourseTree> {
    let mut indexed = parse_lecture_index(html, base, options)?;
    if options.reverse_weeks {
        indexed.reverse();
    }

    let mut weeks = Vec::with_capacity(indexed.len());
    for (week_idx, week) in (1..).zip(indexed) {
        let wanted = options.includes_week(week_idx);
        let mut lectures = Vec::with_capacity(week.lectures.len());
        for lecture in week.lectures {
            let mut resources = lecture.resources;
            if wanted && lecture.needs_video {
                let filename = video_file_name(&lecture.title);
                if is_ignored(&options.ignore_extensions, &filename) {
                    tracing::debug!(
                        lecture = %lecture.title,
                        "video extension ignored; not looking it up"
                    );
                } else if let Some(video) =
                    resolve_video(source, &lecture.title, lecture.detail_url).await
                {
                    resources.push(video);
                }
            }
            lectures.push(Lecture {
                title: lecture.title,
                resources,
            });
        }
        weeks.push(WeekSection {
            title: week.title,
            lectures,
        });
    }

    Ok(CourseTree { weeks })
}

async fn resolve_video(
    source: &dyn PageSource,
    title: &str,
    detail_url: Option<Url>,
) -> Option<ResourceRef> {
    let Some(detail_url) = detail_url else {
        tracing::warn!(lecture = title, "no video listed and no lecture page to look it up");
        return None;
    };

    let html = match source.fetch_text(&detail_url).await {
        Ok(html) => html,
        Err(err) => {
            tracing::warn!(lecture = title, url = %detail_url, ?err, "failed to open the lecture page");
            return None;
        }
    };

    match find_video_source(&html, &detail_url) {
        Ok(Some(url)) => Some(ResourceRef::named(url, video_file_name(title))),
        Ok(None) => {
            tracing::warn!(lecture = title, "failed to find video");
            None
        }
        Err(err) => {
            tracing::warn!(lecture = title, ?err, "failed to read the lecture page");
            None
        }
    }
}

/// Parses weeks, lectures and listed resources in document order.
pub fn parse_lecture_index(
    html: &str,
    base: &Url,
    options: &ExtractOptions,
) -> anyhow::Result<Vec<IndexedWeek>> {
    let sel = Selectors::new()?;
    let document = Html::parse_document(html);
    let mut normalizer = UrlNormalizer::new(base);

    let mut weeks = Vec::new();
    for header in document.select(&sel.week_header) {
        let heading = header.select(&sel.heading).next().unwrap_or(header);
        let title = trim_path_part(&sanitize(&element_text(heading)), options.max_path_part_len);

        let mut lectures = Vec::new();
        for sibling in header.next_siblings().filter_map(ElementRef::wrap) {
            if is_week_header(sibling) {
                break;
            }
            if sibling.value().name() == "li" {
                lectures.push(parse_lecture(sibling, &sel, &mut normalizer, options));
                continue;
            }
            for item in sibling.select(&sel.item) {
                lectures.push(parse_lecture(item, &sel, &mut normalizer, options));
            }
        }

        weeks.push(IndexedWeek { title, lectures });
    }

    Ok(weeks)
}

fn parse_lecture(
    item: ElementRef<'_>,
    sel: &Selectors,
    normalizer: &mut UrlNormalizer,
    options: &ExtractOptions,
) -> IndexedLecture {
    let link = item
        .select(&sel.lecture_link)
        .next()
        .or_else(|| item.select(&sel.anchor).next());
    let raw_title = link
        .and_then(|a| a.text().map(str::trim).find(|t| !t.is_empty()))
        .unwrap_or_default();
    let title = trim_path_part(
        &sanitize(&hyphenate_duration(raw_title)),
        options.max_path_part_len,
    );

    let mut resources = Vec::new();
    for block in item.select(&sel.resource_block) {
        for anchor in block.select(&sel.href) {
            let href = anchor.value().attr("href").unwrap_or_default();
            let Some(normalized) = normalizer.normalize(href) else {
                continue;
            };
            if normalized.contains(RAW_SOURCE_VIDEO_MARKER) {
                tracing::info!(url = %normalized, "skipping raw source video");
                continue;
            }
            match Url::parse(&normalized) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {
                    resources.push(ResourceRef::new(url));
                }
                _ => tracing::warn!(lecture = %title, link = href, "dropping unusable resource link"),
            }
        }
    }

    let needs_video = !resources.iter().any(|r| looks_like_video(&r.url));
    let detail_url = if needs_video {
        link.and_then(|a| a.value().attr("data-modal-iframe"))
            .and_then(|raw| normalizer.normalize(raw))
            .and_then(|raw| Url::parse(&raw).ok())
    } else {
        None
    };

    IndexedLecture {
        title,
        resources,
        needs_video,
        detail_url,
    }
}

/// First mp4 source embedded in a lecture page.
pub fn find_video_source(html: &str, page_url: &Url) -> anyhow::Result<Option<Url>> {
    let sel = Selectors::new()?;
    let document = Html::parse_document(html);

    let src = document
        .select(&sel.mp4_source)
        .chain(document.select(&sel.any_source))
        .filter_map(|el| el.value().attr("src"))
        .find(|src| !src.trim().is_empty());
    let Some(src) = src else {
        return Ok(None);
    };

    let normalized = crate::url_norm::normalize(src, page_url);
    Ok(Url::parse(&normalized).ok())
}

/// `"Intro (12:34)"` → `"Intro (12-34)"`, so the duration survives
/// sanitizing as something readable.
pub fn hyphenate_duration(title: &str) -> String {
    if let Some(open) = title.rfind('(')
        && open > 0
        && let Some(inner) = title[open + 1..].strip_suffix(')')
        && let Some((hours, minutes)) = inner.split_once(':')
        && (1..=2).contains(&hours.len())
        && minutes.len() == 2
        && hours.bytes().chain(minutes.bytes()).all(|b| b.is_ascii_digit())
    {
        return format!("{}({hours}-{minutes})", &title[..open]);
    }
    title.to_owned()
}

fn video_file_name(title: &str) -> String {
    format!("{title}.mp4")
}

fn looks_like_video(url: &Url) -> bool {
    url.as_str().to_ascii_lowercase().contains(".mp4")
}

fn is_week_header(element: ElementRef<'_>) -> bool {
    element.value().classes().any(|class| class == WEEK_HEADER_CLASS)
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}
