use crate::analysis::names;
use crate::error::ScanError;
use crate::types::{Category, FileRecord, FolderSnapshot, RawFileMeta};
use ahash::AHashSet;
use std::path::Path;
use tracing::warn;

const EXTENSION_SCORE: u32 = 50;
const KEYWORD_SCORE: u32 = 20;

struct CategoryProfile {
    category: Category,
    extensions: &'static [&'static str],
    keywords: &'static [&'static str],
}

// Order matters: on equal scores the earlier entry wins.
const TAXONOMY: &[CategoryProfile] = &[
    CategoryProfile {
        category: Category::Images,
        extensions: &["jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "ico", "tiff", "heic"],
        keywords: &["photo", "image", "img", "pic", "screenshot", "wallpaper", "avatar", "icon"],
    },
    CategoryProfile {
        category: Category::Documents,
        extensions: &["pdf", "doc", "docx", "txt", "rtf", "odt", "pages", "md", "rst"],
        keywords: &["report", "doc", "letter", "resume", "cv", "notes", "invoice", "receipt"],
    },
    CategoryProfile {
        category: Category::Spreadsheets,
        extensions: &["xls", "xlsx", "csv", "ods", "numbers"],
        keywords: &["sheet", "budget", "finance", "expense", "tracking"],
    },
    CategoryProfile {
        category: Category::Presentations,
        extensions: &["ppt", "pptx", "key", "odp"],
        keywords: &["presentation", "slides", "deck"],
    },
    CategoryProfile {
        category: Category::Video,
        extensions: &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v"],
        keywords: &["video", "movie", "clip", "recording"],
    },
    CategoryProfile {
        category: Category::Audio,
        extensions: &["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma"],
        keywords: &["audio", "music", "song", "sound", "podcast", "voice"],
    },
    CategoryProfile {
        category: Category::Archives,
        extensions: &["zip", "rar", "7z", "tar", "gz", "bz2", "xz", "tgz"],
        keywords: &["archive", "compressed"],
    },
    CategoryProfile {
        category: Category::Code,
        extensions: &[
            "py", "js", "jsx", "ts", "tsx", "java", "cpp", "c", "h", "hpp", "cs", "go", "rs",
            "php", "rb", "swift", "kt",
        ],
        keywords: &["src", "source", "code", "script"],
    },
    CategoryProfile {
        category: Category::Web,
        extensions: &["html", "htm", "css", "scss", "sass", "less"],
        keywords: &["web", "site", "page", "index", "style"],
    },
    CategoryProfile {
        category: Category::Config,
        extensions: &["json", "yaml", "yml", "toml", "ini", "cfg", "conf", "xml"],
        keywords: &["config", "settings", "manifest"],
    },
    CategoryProfile {
        category: Category::Temporary,
        extensions: &["tmp", "temp", "cache", "swp", "swo", "log", "crdownload", "part"],
        keywords: &["temp", "cache"],
    },
    CategoryProfile {
        category: Category::Executables,
        extensions: &["exe", "msi", "dmg", "pkg", "deb", "rpm", "appimage"],
        keywords: &["setup", "install", "installer"],
    },
    CategoryProfile {
        category: Category::Databases,
        extensions: &["db", "sqlite", "sqlite3", "sql", "mdb", "accdb"],
        keywords: &["database"],
    },
    CategoryProfile {
        category: Category::Backups,
        extensions: &["bak", "old", "backup", "orig"],
        keywords: &[],
    },
];

/// Assign a category from the extension and filename keywords. Names carrying
/// a backup marker ("backup", "old", "copy", "(1)") are backups regardless of
/// extension. Anything unrecognized is [`Category::Other`].
pub fn classify(name: &str, extension: &str) -> Category {
    let (stem, _) = names::split_name(name);
    if names::has_backup_marker(stem) {
        return Category::Backups;
    }
    if name.ends_with('~') {
        return Category::Temporary;
    }

    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    let lower = stem.to_lowercase();
    let mut best = Category::Other;
    let mut best_score = 0;

    for profile in TAXONOMY {
        let mut score = 0;
        if !ext.is_empty() && profile.extensions.contains(&ext.as_str()) {
            score += EXTENSION_SCORE;
        }
        if profile
            .keywords
            .iter()
            .any(|keyword| names::contains_word(&lower, keyword) || lower.starts_with(keyword))
        {
            score += KEYWORD_SCORE;
        }
        if score > best_score {
            best_score = score;
            best = profile.category;
        }
    }

    best
}

pub fn classify_path(path: &Path) -> Category {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (_, ext) = names::split_name(&name);
    classify(&name, ext)
}

/// Build a [`FileRecord`] from watcher metadata. Relationship tags start empty
/// and are filled in by the detector.
pub fn extract_record(raw: &RawFileMeta) -> Result<FileRecord, ScanError> {
    let name = match raw.path.file_name().and_then(|n| n.to_str()) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return Err(ScanError {
                path: raw.path.clone(),
                reason: "path has no readable file name".to_string(),
            })
        }
    };

    let extension = match &raw.extension {
        Some(ext) => ext.trim_start_matches('.').to_ascii_lowercase(),
        None => names::split_name(&name).1.to_ascii_lowercase(),
    };

    Ok(FileRecord {
        category: classify(&name, &extension),
        path: raw.path.clone(),
        name,
        size: raw.size,
        modified: raw.modified,
        extension,
        tags: Vec::new(),
    })
}

/// Extract every file in the snapshot, in snapshot order. Files that cannot
/// be turned into a record are reported and skipped.
pub fn extract_snapshot(snapshot: &FolderSnapshot) -> (Vec<FileRecord>, Vec<ScanError>) {
    let mut records = Vec::with_capacity(snapshot.files.len());
    let mut errors = Vec::new();
    let mut seen: AHashSet<&Path> = AHashSet::with_capacity(snapshot.files.len());

    for raw in &snapshot.files {
        if !seen.insert(raw.path.as_path()) {
            warn!("Duplicate path in snapshot, keeping first: {}", raw.path.display());
            errors.push(ScanError {
                path: raw.path.clone(),
                reason: "path appears more than once in snapshot".to_string(),
            });
            continue;
        }
        match extract_record(raw) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!("Skipping file: {}", err);
                errors.push(err);
            }
        }
    }

    (records, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    #[test]
    fn test_classify_by_extension() {
        assert_eq!(classify("holiday.jpg", "jpg"), Category::Images);
        assert_eq!(classify("song.FLAC", "FLAC"), Category::Audio);
        assert_eq!(classify("budget.xlsx", "xlsx"), Category::Spreadsheets);
        assert_eq!(classify("deck.pptx", "pptx"), Category::Presentations);
        assert_eq!(classify("setup.exe", "exe"), Category::Executables);
        assert_eq!(classify("main.rs", "rs"), Category::Code);
        assert_eq!(classify("cache.tmp", "tmp"), Category::Temporary);
        assert_eq!(classify("bundle.zip", "zip"), Category::Archives);
    }

    #[test]
    fn test_keyword_breaks_extension_ties() {
        // Both documents and spreadsheets could claim a csv named "report";
        // the extension wins because it scores higher than a keyword.
        assert_eq!(classify("report.csv", "csv"), Category::Spreadsheets);
        assert_eq!(classify("screenshot", ""), Category::Images);
    }

    #[test]
    fn test_backup_marker_overrides_extension() {
        assert_eq!(classify("photo - copy.jpg", "jpg"), Category::Backups);
        assert_eq!(classify("thesis (1).docx", "docx"), Category::Backups);
        assert_eq!(classify("old_invoice.pdf", "pdf"), Category::Backups);
        assert_eq!(classify("notes.txt~", ""), Category::Temporary);
    }

    #[test]
    fn test_unknown_extension_is_other() {
        assert_eq!(classify("blob.qqq", "qqq"), Category::Other);
        assert_eq!(classify("Makefile", ""), Category::Other);
    }

    #[test]
    fn test_extract_snapshot_skips_bad_and_duplicate_paths() {
        let now = Utc::now();
        let snapshot = FolderSnapshot {
            folder: PathBuf::from("/data"),
            files: vec![
                RawFileMeta::new("/data/a.png", 10, now),
                RawFileMeta::new("/data/a.png", 10, now),
                RawFileMeta::new("/", 0, now),
            ],
            taken_at: now,
        };
        let (records, errors) = extract_snapshot(&snapshot);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].extension, "png");
        assert_eq!(records[0].category, Category::Images);
        assert_eq!(errors.len(), 2);
    }
}
