//! Archive file naming: `<prefix>_<YYYYMMDD-HHMMSS>.tar.gz` plus a
//! `<archive>.sha256` digest sidecar.

use chrono::{NaiveDateTime, Timelike};
use std::fmt;
use std::path::{Path, PathBuf};

pub const ARCHIVE_EXTENSION: &str = ".tar.gz";
pub const DIGEST_EXTENSION: &str = ".sha256";
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub prefix: String,
    pub created: NaiveDateTime,
}

impl ArchiveName {
    pub fn new(prefix: &str, created: NaiveDateTime) -> Self {
        Self {
            prefix: prefix.to_string(),
            // sub-second precision is not representable in the name
            created: created.with_nanosecond(0).unwrap_or(created),
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}{}",
            self.prefix,
            self.created.format(TIMESTAMP_FORMAT),
            ARCHIVE_EXTENSION
        )
    }

    /// Parse a file name produced by [`ArchiveName::file_name`] for `prefix`.
    pub fn parse(file_name: &str, prefix: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(ARCHIVE_EXTENSION)?;
        let stamp = stem.strip_prefix(prefix)?.strip_prefix('_')?;
        let created = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            prefix: prefix.to_string(),
            created,
        })
    }
}

impl fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Sidecar path for an archive: `<archive>.sha256`.
pub fn digest_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(DIGEST_EXTENSION);
    PathBuf::from(name)
}

/// Archives in `dir` for `prefix`, newest first by the timestamp in the name.
///
/// Names that do not parse are ignored; a missing directory yields nothing.
pub fn list_archives(dir: &Path, prefix: &str) -> std::io::Result<Vec<(PathBuf, ArchiveName)>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut archives = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if let Some(name) = ArchiveName::parse(&file_name, prefix) {
            archives.push((entry.path(), name));
        }
    }

    sort_newest_first(&mut archives);
    Ok(archives)
}

/// Pick the newest of a set of candidate file names (e.g. a remote listing).
pub fn newest<'a, I>(file_names: I, prefix: &str) -> Option<ArchiveName>
where
    I: IntoIterator<Item = &'a str>,
{
    file_names
        .into_iter()
        .filter_map(|name| ArchiveName::parse(name.trim(), prefix))
        .max_by_key(|name| name.created)
}

fn sort_newest_first(archives: &mut [(PathBuf, ArchiveName)]) {
    archives.sort_by(|a, b| b.1.created.cmp(&a.1.created));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_file_name_format() {
        let name = ArchiveName::new("panel_migrate", at(14, 5, 9));
        assert_eq!(name.file_name(), "panel_migrate_20240309-140509.tar.gz");
    }

    #[test]
    fn test_parse_rejects_other_prefixes_and_sidecars() {
        assert!(ArchiveName::parse("other_20240309-140509.tar.gz", "panel_migrate").is_none());
        assert!(ArchiveName::parse("panel_migrate_20240309-140509.tar.gz.sha256", "panel_migrate").is_none());
        assert!(ArchiveName::parse("panel_migrate_garbage.tar.gz", "panel_migrate").is_none());
        assert_eq!(
            ArchiveName::parse("panel_migrate_20240309-140509.tar.gz", "panel_migrate")
                .unwrap()
                .created,
            at(14, 5, 9)
        );
    }

    #[test]
    fn test_digest_path_appends_extension() {
        let archive = Path::new("/backup/panel_migrate_20240309-140509.tar.gz");
        assert_eq!(
            digest_path(archive),
            PathBuf::from("/backup/panel_migrate_20240309-140509.tar.gz.sha256")
        );
    }

    #[test]
    fn test_newest_uses_embedded_timestamp() {
        let listing = "panel_migrate_20240309-140509.tar.gz\n\
                       panel_migrate_20240310-010000.tar.gz\n\
                       panel_migrate_20240309-235959.tar.gz\n\
                       unrelated.txt\n";
        let newest = newest(listing.lines(), "panel_migrate").unwrap();
        assert_eq!(newest.file_name(), "panel_migrate_20240310-010000.tar.gz");
    }

    #[test]
    fn test_newest_of_nothing() {
        assert!(newest(std::iter::empty(), "panel_migrate").is_none());
    }

    #[test]
    fn test_list_archives_sorted() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in [
            "panel_migrate_20240101-000000.tar.gz",
            "panel_migrate_20240301-000000.tar.gz",
            "panel_migrate_20240201-000000.tar.gz",
            "panel_migrate_20240301-000000.tar.gz.sha256",
            "manifest.json",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let listed = list_archives(dir.path(), "panel_migrate").unwrap();
        let names: Vec<String> = listed.iter().map(|(_, n)| n.file_name()).collect();
        assert_eq!(
            names,
            vec![
                "panel_migrate_20240301-000000.tar.gz",
                "panel_migrate_20240201-000000.tar.gz",
                "panel_migrate_20240101-000000.tar.gz",
            ]
        );
    }

    #[test]
    fn test_list_archives_missing_dir() {
        let listed = list_archives(Path::new("/nonexistent/backup/dir"), "panel_migrate").unwrap();
        assert!(listed.is_empty());
    }
}
