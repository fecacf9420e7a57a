//! Document collection and concatenation.
//!
//! Turns user-supplied paths into the opaque document text the session is
//! grounded in. Directories are walked recursively with hidden entries
//! skipped; each file becomes a `[File: <name>]` section.

#[cfg(feature = "pdf")]
pub mod pdf;

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{FilechatError, Result};

/// Extensions collected when none are requested.
pub const DEFAULT_EXTENSIONS: &[&str] = &["txt"];

// ============================================================================
// ExtensionFilter
// ============================================================================

/// Which file extensions to collect.
///
/// `allowed == None` means any extension. Exclusions always win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFilter {
    allowed: Option<BTreeSet<String>>,
    excluded: BTreeSet<String>,
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self {
            allowed: Some(DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()),
            excluded: BTreeSet::new(),
        }
    }
}

impl ExtensionFilter {
    /// Accept every extension.
    pub fn any() -> Self {
        Self {
            allowed: None,
            excluded: BTreeSet::new(),
        }
    }

    /// Build a filter from raw include/exclude values.
    ///
    /// Each value may be a comma-separated list; entries are trimmed,
    /// lowercased and stripped of a leading `.`. `*` or `all` accepts any
    /// extension. No include values means [`DEFAULT_EXTENSIONS`].
    pub fn from_lists<I, J, S, T>(include: I, exclude: J) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let mut filter = Self::default();
        let mut explicit = false;
        let mut wildcard = false;
        let mut allowed = BTreeSet::new();

        for raw in include {
            for ext in split_list(raw.as_ref())? {
                explicit = true;
                if ext == "*" || ext == "all" {
                    wildcard = true;
                } else {
                    allowed.insert(ext);
                }
            }
        }
        for raw in exclude {
            filter.excluded.extend(split_list(raw.as_ref())?);
        }

        if wildcard {
            filter.allowed = None;
        } else if explicit {
            filter.allowed = Some(allowed);
        }

        if let Some(allowed) = filter.allowed.as_mut() {
            allowed.retain(|ext| !filter.excluded.contains(ext));
            if allowed.is_empty() {
                return Err(FilechatError::Config(
                    "No extensions remain after applying exclusions.".into(),
                ));
            }
        }
        Ok(filter)
    }

    pub fn allowed(&self) -> Option<&BTreeSet<String>> {
        self.allowed.as_ref()
    }

    pub fn excluded(&self) -> &BTreeSet<String> {
        &self.excluded
    }

    /// Whether `path`'s extension passes the filter (case-insensitive).
    pub fn allows(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(&ext) {
                return false;
            }
        }
        !self.excluded.contains(&ext)
    }

    /// Human-readable description, e.g. `.md, .txt (excluding .log)`.
    pub fn describe(&self) -> String {
        let include = match &self.allowed {
            Some(allowed) => dotted(allowed),
            None => "requested".to_string(),
        };
        if self.excluded.is_empty() {
            include
        } else {
            format!("{include} (excluding {})", dotted(&self.excluded))
        }
    }
}

/// Normalize one extension value. Returns `None` if nothing is left.
pub fn normalize_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let without_dot = trimmed.strip_prefix('.').unwrap_or(trimmed);
    let lowered = without_dot.to_lowercase();
    (!lowered.is_empty()).then_some(lowered)
}

// ============================================================================
// Collection
// ============================================================================

/// Files under `path` that pass `filter`, sorted by path.
///
/// A file path is returned as-is if it passes; a directory is walked
/// recursively, skipping hidden entries. A missing path yields nothing.
pub fn collect_files(path: &Path, filter: &ExtensionFilter) -> Result<Vec<PathBuf>> {
    let root = match std::fs::canonicalize(path) {
        Ok(root) => root,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Input path does not exist");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    if !root.is_dir() {
        return Ok(if filter.allows(&root) { vec![root] } else { Vec::new() });
    }

    let mut collected = Vec::new();
    let walker = WalkDir::new(&root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));
    for entry in walker {
        let entry = entry.map_err(|e| {
            FilechatError::Documents(format!("Failed to walk {}: {e}", root.display()))
        })?;
        if entry.file_type().is_dir() || !filter.allows(entry.path()) {
            continue;
        }
        collected.push(entry.into_path());
    }
    collected.sort();
    Ok(collected)
}

/// Collect from every path in order, keeping the first occurrence of each file.
pub fn collect_files_from<P: AsRef<Path>>(
    paths: &[P],
    filter: &ExtensionFilter,
) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut aggregated = Vec::new();
    for path in paths {
        for file in collect_files(path.as_ref(), filter)? {
            if seen.insert(file.clone()) {
                aggregated.push(file);
            }
        }
    }
    debug!(files = aggregated.len(), "Collected documents");
    Ok(aggregated)
}

// ============================================================================
// Reading
// ============================================================================

/// Read every file and join them into one labelled document block.
///
/// Each section is `[File: <name>]\n<body>\n`; sections are separated by a
/// blank line.
pub async fn read_and_concatenate(files: &[PathBuf]) -> Result<String> {
    let mut sections = Vec::with_capacity(files.len());
    for file in files {
        let body = read_body(file).await?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        sections.push(format!("[File: {name}]\n{body}\n"));
    }
    Ok(sections.join("\n"))
}

// -- private helpers --

async fn read_body(path: &Path) -> Result<String> {
    let is_pdf = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        return read_pdf(path).await;
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| FilechatError::Documents(format!("Failed to read {}: {e}", path.display())))
}

#[cfg(feature = "pdf")]
async fn read_pdf(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || pdf::extract_text(&path))
        .await
        .map_err(|e| FilechatError::Documents(format!("PDF task panicked: {e}")))?
}

#[cfg(not(feature = "pdf"))]
async fn read_pdf(path: &Path) -> Result<String> {
    Err(FilechatError::Documents(format!(
        "Cannot read {}: PDF support requires the `pdf` feature",
        path.display()
    )))
}

fn split_list(raw: &str) -> Result<Vec<String>> {
    if raw.trim().is_empty() {
        return Err(FilechatError::Config("Missing extension value.".into()));
    }
    raw.split(',')
        .map(|candidate| {
            normalize_extension(candidate).ok_or_else(|| {
                FilechatError::Config(format!("Invalid extension value '{candidate}'."))
            })
        })
        .collect()
}

fn dotted(set: &BTreeSet<String>) -> String {
    set.iter()
        .map(|ext| format!(".{ext}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, body: &str) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, body).unwrap();
        path
    }

    fn names(files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_default_filter_collects_txt_only() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.txt", "hello");
        write(tmp.path(), "b.md", "nope");

        let files = collect_files(tmp.path(), &ExtensionFilter::default()).unwrap();
        assert_eq!(names(&files), vec!["a.txt"]);
    }

    #[test]
    fn test_recurses_case_insensitively() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "root.txt", "root");
        write(tmp.path(), "nested/child.TXT", "child");

        let files = collect_files(tmp.path(), &ExtensionFilter::default()).unwrap();
        let mut got = names(&files);
        got.sort();
        assert_eq!(got, vec!["child.TXT", "root.txt"]);
    }

    #[test]
    fn test_skips_hidden_entries() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "visible.txt", "v");
        write(tmp.path(), ".secret.txt", "s");
        write(tmp.path(), ".git/config.txt", "g");

        let files = collect_files(tmp.path(), &ExtensionFilter::default()).unwrap();
        assert_eq!(names(&files), vec!["visible.txt"]);
    }

    #[test]
    fn test_aggregates_and_dedups_in_argument_order() {
        let tmp = TempDir::new().unwrap();
        let direct = write(tmp.path(), "direct.txt", "direct");
        write(tmp.path(), "nested/nested.txt", "nested");
        let nested = tmp.path().join("nested");

        let files = collect_files_from(
            &[direct, nested, tmp.path().to_path_buf()],
            &ExtensionFilter::default(),
        )
        .unwrap();
        assert_eq!(names(&files), vec!["direct.txt", "nested.txt"]);
    }

    #[test]
    fn test_missing_path_yields_nothing() {
        let tmp = TempDir::new().unwrap();
        let files = collect_files(&tmp.path().join("gone"), &ExtensionFilter::default()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_custom_extensions() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "doc.md", "markdown");
        write(tmp.path(), "note.txt", "text");

        let md_only = ExtensionFilter::from_lists(["md"], Vec::<String>::new()).unwrap();
        assert_eq!(
            names(&collect_files(tmp.path(), &md_only).unwrap()),
            vec!["doc.md"]
        );

        let both = ExtensionFilter::from_lists([".MD, txt"], Vec::<String>::new()).unwrap();
        assert_eq!(
            names(&collect_files(tmp.path(), &both).unwrap()),
            vec!["doc.md", "note.txt"]
        );
    }

    #[test]
    fn test_wildcard_with_exclusions() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "doc.md", "markdown");
        write(tmp.path(), "code.rs", "fn main() {}");

        let filter = ExtensionFilter::from_lists(["*"], ["md"]).unwrap();
        assert!(filter.allowed().is_none());
        assert_eq!(
            names(&collect_files(tmp.path(), &filter).unwrap()),
            vec!["code.rs"]
        );
        assert_eq!(filter.describe(), "requested (excluding .md)");
    }

    #[test]
    fn test_exclusions_emptying_allow_list_is_an_error() {
        let err = ExtensionFilter::from_lists(["txt"], ["TXT"]).unwrap_err();
        assert!(matches!(err, FilechatError::Config(_)));

        let err = ExtensionFilter::from_lists(Vec::<String>::new(), ["txt"]).unwrap_err();
        assert!(err.to_string().contains("No extensions remain"));
    }

    #[test]
    fn test_invalid_extension_values() {
        assert!(ExtensionFilter::from_lists([" . "], Vec::<String>::new()).is_err());
        assert!(ExtensionFilter::from_lists(["md,"], Vec::<String>::new()).is_err());
        assert!(ExtensionFilter::from_lists([""], Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension(" .PDF "), Some("pdf".into()));
        assert_eq!(normalize_extension("md"), Some("md".into()));
        assert_eq!(normalize_extension("."), None);
    }

    #[test]
    fn test_describe_lists_sorted() {
        let filter = ExtensionFilter::from_lists(["txt,md"], ["log"]).unwrap();
        assert_eq!(filter.describe(), ".md, .txt (excluding .log)");
    }

    #[tokio::test]
    async fn test_read_and_concatenate_labels_sections() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "a.txt", "alpha");
        let b = write(tmp.path(), "b.txt", "beta");

        let combined = read_and_concatenate(&[a, b]).await.unwrap();
        assert_eq!(combined, "[File: a.txt]\nalpha\n\n[File: b.txt]\nbeta\n");
    }

    #[tokio::test]
    async fn test_read_and_concatenate_reports_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = read_and_concatenate(&[tmp.path().join("nope.txt")])
            .await
            .unwrap_err();
        assert!(matches!(err, FilechatError::Documents(_)));
    }

    #[cfg(not(feature = "pdf"))]
    #[tokio::test]
    async fn test_pdf_requires_feature() {
        let tmp = TempDir::new().unwrap();
        let pdf = write(tmp.path(), "doc.pdf", "%PDF-1.4");
        let err = read_and_concatenate(&[pdf]).await.unwrap_err();
        assert!(err.to_string().contains("pdf"));
    }
}
