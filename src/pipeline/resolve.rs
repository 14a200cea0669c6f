//! Locate the PDF the engine produced.
//!
//! The engine chooses the output name itself, usually `<input-stem>.pdf`
//! but not always: some builds mangle non-ASCII stems and some append
//! suffixes. The resolver compares a snapshot of the output directory taken
//! before the invocation with its contents afterwards and picks, in order:
//!
//! 1. the exact `<stem>.pdf`, if it is new;
//! 2. a new `.pdf` whose name contains the stem (case-insensitive), best
//!    [`similarity`] first;
//! 3. any new `.pdf`;
//! 4. nothing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The file names present in a directory at one instant.
///
/// Names keep the order the directory listed them in; duplicates after the
/// first occurrence are dropped. The fallback steps rely on that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    names: Vec<String>,
}

impl DirectorySnapshot {
    /// Read `dir`. A missing directory is an empty snapshot.
    pub async fn capture(dir: &Path) -> std::io::Result<Self> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(Self::from_names(names))
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let names = names
            .into_iter()
            .map(Into::into)
            .filter(|n: &String| seen.insert(n.clone()))
            .collect();
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Pick the produced PDF out of `after \ before`.
///
/// `input_stem` is the input file name without its extension. Returns the
/// full path under `output_dir`, or `None` when nothing new looks like a PDF.
pub fn resolve(
    output_dir: &Path,
    input_stem: &str,
    before: &DirectorySnapshot,
    after: &DirectorySnapshot,
) -> Option<PathBuf> {
    let old: HashSet<&str> = before.names().iter().map(String::as_str).collect();
    let new_pdfs: Vec<&str> = after
        .names()
        .iter()
        .map(String::as_str)
        .filter(|n| !old.contains(n) && is_pdf(n))
        .collect();

    debug!(
        "Resolving artifact for stem '{}': {} new PDF(s) among {} entries",
        input_stem,
        new_pdfs.len(),
        after.len()
    );

    let expected = format!("{input_stem}.pdf");
    if new_pdfs.contains(&expected.as_str()) {
        info!("Found expected artifact {}", expected);
        return Some(output_dir.join(expected));
    }

    let stem_lower = input_stem.to_lowercase();
    let mut similar: Vec<&str> = new_pdfs
        .iter()
        .copied()
        .filter(|n| n.to_lowercase().contains(&stem_lower))
        .collect();
    if !similar.is_empty() {
        // Stable sort keeps enumeration order among equal scores.
        similar.sort_by(|a, b| {
            similarity(b, input_stem)
                .partial_cmp(&similarity(a, input_stem))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        info!("Using similarly named artifact {}", similar[0]);
        return Some(output_dir.join(similar[0]));
    }

    if let Some(first) = new_pdfs.first() {
        info!("Using first new PDF {}", first);
        return Some(output_dir.join(first));
    }

    None
}

fn is_pdf(name: &str) -> bool {
    name.to_lowercase().ends_with(".pdf")
}

/// Coarse name similarity in `[0, 1]`, symmetric in its arguments.
///
/// The longer string is compared against the shorter one (ties broken
/// lexicographically): both empty scores 1.0, containment 0.9, shared prefix
/// 0.7, anything else 0.1. Identical non-empty strings count as containment.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (longer, shorter) = match a.len().cmp(&b.len()) {
        std::cmp::Ordering::Greater => (a, b),
        std::cmp::Ordering::Less => (b, a),
        std::cmp::Ordering::Equal if a >= b => (a, b),
        std::cmp::Ordering::Equal => (b, a),
    };
    if longer.is_empty() {
        return 1.0;
    }
    if longer.contains(shorter) {
        return 0.9;
    }
    if longer.starts_with(shorter) || shorter.starts_with(longer) {
        return 0.7;
    }
    0.1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(names: &[&str]) -> DirectorySnapshot {
        DirectorySnapshot::from_names(names.iter().copied())
    }

    #[test]
    fn exact_stem_wins() {
        let before = snap(&["a.txt"]);
        let after = snap(&["a.txt", "report.pdf", "report (1).pdf"]);
        let got = resolve(Path::new("/out"), "report", &before, &after);
        assert_eq!(got, Some(PathBuf::from("/out/report.pdf")));
    }

    #[test]
    fn preexisting_exact_name_is_ignored() {
        let before = snap(&["report.pdf"]);
        let after = snap(&["report.pdf", "report_1.pdf"]);
        let got = resolve(Path::new("/out"), "report", &before, &after);
        assert_eq!(got, Some(PathBuf::from("/out/report_1.pdf")));
    }

    #[test]
    fn similar_name_beats_unrelated() {
        let before = snap(&[]);
        let after = snap(&["x.pdf", "quarterly_report_v2.pdf"]);
        let got = resolve(Path::new("/out"), "report", &before, &after);
        assert_eq!(got, Some(PathBuf::from("/out/quarterly_report_v2.pdf")));
    }

    #[test]
    fn similar_match_is_case_insensitive() {
        let after = snap(&["a.pdf", "MyDoc-export.PDF"]);
        let got = resolve(Path::new("/out"), "mydoc", &snap(&[]), &after);
        assert_eq!(got, Some(PathBuf::from("/out/MyDoc-export.PDF")));
    }

    #[test]
    fn falls_back_to_any_new_pdf() {
        let before = snap(&["keep.pdf"]);
        let after = snap(&["keep.pdf", "notes.txt", "zzz.pdf", "aaa.pdf"]);
        let got = resolve(Path::new("/out"), "report", &before, &after);
        assert_eq!(got, Some(PathBuf::from("/out/zzz.pdf")));
    }

    #[test]
    fn similar_ties_keep_enumeration_order() {
        let after = snap(&["report-b.pdf", "report-a.pdf"]);
        let got = resolve(Path::new("/out"), "report", &snap(&[]), &after);
        assert_eq!(got, Some(PathBuf::from("/out/report-b.pdf")));
    }

    #[test]
    fn nothing_new_resolves_to_none() {
        let before = snap(&["a.pdf", "b.pdf"]);
        let after = snap(&["a.pdf", "b.pdf", "c.log"]);
        assert_eq!(resolve(Path::new("/out"), "a", &before, &after), None);
    }

    #[test]
    fn similarity_scores() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "abc"), 0.9);
        assert_eq!(similarity("", "abc"), 0.9);
        assert_eq!(similarity("report_v2.pdf", "report"), 0.9);
        assert_eq!(similarity("abc", "xyz"), 0.1);
    }

    #[test]
    fn similarity_is_symmetric() {
        let pairs = [
            ("report.pdf", "report"),
            ("abc", "abd"),
            ("", "x"),
            ("quarterly_report_v2.pdf", "quarterly_report"),
            ("zeta", "alpha"),
        ];
        for (a, b) in pairs {
            assert_eq!(similarity(a, b), similarity(b, a), "{a} vs {b}");
        }
    }

    #[test]
    fn snapshot_keeps_order_and_drops_duplicates() {
        let s = snap(&["b.pdf", "a.pdf", "b.pdf"]);
        assert_eq!(s.names(), &["b.pdf".to_string(), "a.pdf".to_string()]);
        assert!(s.contains("a.pdf"));
        assert!(!s.contains("c.pdf"));
    }

    #[tokio::test]
    async fn capture_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let s = DirectorySnapshot::capture(&dir.path().join("absent"))
            .await
            .unwrap();
        assert!(s.is_empty());
    }

    #[tokio::test]
    async fn capture_lists_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("two.txt"), b"y").unwrap();
        let s = DirectorySnapshot::capture(dir.path()).await.unwrap();
        assert_eq!(s.len(), 2);
        assert!(s.contains("one.pdf"));
        assert!(s.contains("two.txt"));
    }
}
