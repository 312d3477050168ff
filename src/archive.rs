use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

/// Packs `<dest_dir>/<course_id>/` into `<dest_dir>/<course_id>.zip` and
/// removes the directory. The directory is only removed once the archive is
/// complete on disk.
pub async fn archive_course(dest_dir: &Path, course_id: &str) -> anyhow::Result<PathBuf> {
    let course_dir = dest_dir.join(course_id);
    let archive_path = dest_dir.join(format!("{course_id}.zip"));

    let course_dir_for_blocking = course_dir.clone();
    let archive_path_for_blocking = archive_path.clone();
    let prefix = course_id.to_owned();
    tokio::task::spawn_blocking(move || {
        write_archive(
            &course_dir_for_blocking,
            &archive_path_for_blocking,
            &prefix,
        )
    })
    .await
    .context("join archive task")??;

    tokio::fs::remove_dir_all(&course_dir)
        .await
        .with_context(|| format!("remove archived dir: {}", course_dir.display()))?;

    tracing::info!(archive = %archive_path.display(), "course archived");
    Ok(archive_path)
}

fn write_archive(course_dir: &Path, archive_path: &Path, prefix: &str) -> anyhow::Result<()> {
    if !course_dir.is_dir() {
        anyhow::bail!("missing course dir: {}", course_dir.display());
    }
    let parent = archive_path
        .parent()
        .with_context(|| format!("archive has no parent dir: {}", archive_path.display()))?;

    let temp = tempfile::Builder::new()
        .prefix(".course-harvest-")
        .suffix(".zip.part")
        .tempfile_in(parent)
        .with_context(|| format!("create temp archive in {}", parent.display()))?;
    let mut zip = zip::ZipWriter::new(temp);

    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    zip.add_directory(prefix, options)
        .with_context(|| format!("zip add_directory: {prefix}"))?;
    add_dir_recursive(&mut zip, course_dir, prefix, options)?;

    let temp = zip.finish().context("zip finish")?;
    temp.as_file().sync_all().context("sync archive")?;
    temp.persist(archive_path)
        .map_err(|err| err.error)
        .with_context(|| format!("persist archive: {}", archive_path.display()))?;
    Ok(())
}

fn add_dir_recursive<W: io::Write + io::Seek>(
    zip: &mut zip::ZipWriter<W>,
    dir: &Path,
    zip_prefix: &str,
    options: zip::write::SimpleFileOptions,
) -> anyhow::Result<()> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("read dir: {}", dir.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("list dir: {}", dir.display()))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let zip_path = format!("{zip_prefix}/{}", entry.file_name().to_string_lossy());

        let file_type = entry.file_type().context("read file type")?;
        if file_type.is_dir() {
            zip.add_directory(zip_path.as_str(), options)
                .with_context(|| format!("zip add_directory: {zip_path}"))?;
            add_dir_recursive(zip, &path, &zip_path, options)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let mut file = File::open(&path).with_context(|| format!("open: {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("stat: {}", path.display()))?
            .len();
        zip.start_file(
            zip_path.as_str(),
            options.large_file(len >= u64::from(u32::MAX)),
        )
        .with_context(|| format!("zip start_file: {zip_path}"))?;
        io::copy(&mut file, zip).with_context(|| format!("zip write: {zip_path}"))?;
    }

    Ok(())
}
