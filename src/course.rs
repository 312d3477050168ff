use url::Url;

/// Weeks in processing order: as the lecture index lists them, or bottom-up
/// when sections are reversed. That order, not the titles, decides the numeric
/// prefix of each directory on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourseTree {
    pub weeks: Vec<WeekSection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekSection {
    pub title: String,
    pub lectures: Vec<Lecture>,
}

/// Titles are not unique within a week; the position is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lecture {
    pub title: String,
    pub resources: Vec<ResourceRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub url: Url,
    /// Takes precedence over header- and URL-derived names.
    pub suggested_filename: Option<String>,
}

impl CourseTree {
    pub fn is_empty(&self) -> bool {
        self.weeks.is_empty()
    }

    pub fn resource_count(&self) -> usize {
        self.weeks
            .iter()
            .flat_map(|week| &week.lectures)
            .map(|lecture| lecture.resources.len())
            .sum()
    }
}

impl ResourceRef {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            suggested_filename: None,
        }
    }

    pub fn named(url: Url, filename: impl Into<String>) -> Self {
        Self {
            url,
            suggested_filename: Some(filename.into()),
        }
    }
}

/// `NN - title`, the directory name for the 1-based `index`-th entry.
pub fn numbered_dir_name(index: usize, title: &str) -> String {
    format!("{index:02} - {title}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_dir_names_are_zero_padded() {
        assert_eq!(numbered_dir_name(1, "Intro"), "01 - Intro");
        assert_eq!(numbered_dir_name(12, "Wrap up"), "12 - Wrap up");
    }

    #[test]
    fn resource_count_spans_all_lectures() -> anyhow::Result<()> {
        let url = Url::parse("http://host/a.pdf")?;
        let tree = CourseTree {
            weeks: vec![
                WeekSection {
                    title: "One".to_owned(),
                    lectures: vec![Lecture {
                        title: "A".to_owned(),
                        resources: vec![ResourceRef::new(url.clone()), ResourceRef::new(url.clone())],
                    }],
                },
                WeekSection {
                    title: "Two".to_owned(),
                    lectures: vec![Lecture {
                        title: "B".to_owned(),
                        resources: vec![ResourceRef::named(url, "B.mp4")],
                    }],
                },
            ],
        };
        assert_eq!(tree.resource_count(), 3);
        Ok(())
    }
}
