use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Mirror the videos, slides and notes of online courses for offline use."
)]
pub struct Cli {
    /// Course identifiers as they appear in the course URL (e.g. `ml-003`).
    #[arg(value_name = "COURSE", required = true)]
    pub courses: Vec<String>,

    /// Account name (default: `COURSE_HARVEST_USERNAME`).
    #[arg(short, long)]
    pub username: Option<String>,

    /// Account password (default: `COURSE_HARVEST_PASSWORD`).
    #[arg(short, long)]
    pub password: Option<String>,

    /// Directory the courses are mirrored into.
    #[arg(short, long, default_value = ".")]
    pub dest: String,

    /// Comma-separated file extensions to skip (e.g. "ppt,srt,pdf").
    #[arg(short = 'n', long, default_value = "")]
    pub ignore: String,

    /// Comma-separated 1-based week numbers to download (e.g. "1,3,8").
    #[arg(short, long, value_delimiter = ',')]
    pub weeks: Vec<usize>,

    /// Number the weeks in reverse page order.
    #[arg(long)]
    pub reverse_sections: bool,

    /// Zip each finished course and remove its directory.
    #[arg(long)]
    pub archive: bool,

    /// Maximum length of a week or lecture directory name
    /// (default: 90 on Windows, unlimited elsewhere).
    #[arg(long)]
    pub max_path_part_len: Option<usize>,

    /// HTTP proxy, e.g. `proxy.local:3128`.
    #[arg(short = 'x', long)]
    pub proxy: Option<String>,

    /// Maximum resource downloads in flight per course.
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// Network timeout per attempt, in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Serve every platform endpoint from this root URL.
    #[arg(long, hide = true)]
    pub platform_root: Option<String>,
}
