//! Sample ID extraction and log path resolution
//!
//! Device responses carry a line such as `Sample ID<TAB>LOT123G`. The value is
//! used to name the log file and to sort it into a category directory.

use chrono::{DateTime, Local};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// Label patterns, tried in order. The first pattern that matches any line
/// wins; later patterns are not consulted.
static SAMPLE_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // "Sample ID: value" / "Sample ID = value"
        r"(?m)^[ \t]*Sample[ \t]+ID[ \t]*[:=][ \t]*(\S[^\r\n]*?)[ \t]*\r?$",
        // "Sample ID<TAB>value"
        r"(?m)^[ \t]*Sample[ \t]+ID\t[ \t]*(\S[^\r\n]*?)[ \t]*\r?$",
        // "Sample ID   value"
        r"(?m)^[ \t]*Sample[ \t]+ID[ \t]+(\S[^\r\n]*?)[ \t]*\r?$",
        // Label somewhere inside the line
        r"(?m)Sample[ \t]*ID[ \t:=]+(\S[^\r\n]*?)[ \t]*\r?$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("sample ID pattern is valid"))
    .collect()
});

static ILLEGAL_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/*?:"<>|]"#).expect("filename pattern is valid"));

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

static CATEGORY_SUFFIXES: LazyLock<[(Regex, SampleCategory); 3]> = LazyLock::new(|| {
    let suffix = |pattern: &str| Regex::new(pattern).expect("category pattern is valid");
    [
        (suffix(r"G\d*$"), SampleCategory::G),
        (suffix(r"IP\d*$"), SampleCategory::Ip),
        (suffix(r"BP\d*$"), SampleCategory::Bp),
    ]
});

/// Destination category of a sample log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SampleCategory {
    /// Identifier ends in `G` + digits
    G,
    /// Identifier ends in `IP` + digits
    Ip,
    /// Identifier ends in `BP` + digits
    Bp,
    /// Anything else, and logs without an identifier
    Others,
}

impl SampleCategory {
    /// Directory name under the log root
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::G => "G",
            Self::Ip => "IP",
            Self::Bp => "BP",
            Self::Others => "others",
        }
    }

    /// Classify a sanitized identifier by its suffix
    pub fn classify(sanitized: &str) -> Self {
        CATEGORY_SUFFIXES
            .iter()
            .find(|(pattern, _)| pattern.is_match(sanitized))
            .map_or(Self::Others, |(_, category)| *category)
    }
}

impl fmt::Display for SampleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Identifier found in a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleId {
    /// Value as captured from the (normalized) text
    pub raw: String,
    /// Value safe for use in a file name
    pub sanitized: String,
    /// Destination category
    pub category: SampleCategory,
}

impl SampleId {
    /// File name without collision suffix
    pub fn file_name(&self) -> String {
        format!("sample_ID_{}.log", self.sanitized)
    }
}

/// Identifier together with the free log path it resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleClassification {
    /// Identifier
    pub id: SampleId,
    /// Log path that did not exist at resolution time
    pub path: PathBuf,
}

/// Replace characters that are illegal in file names, and whitespace runs,
/// with underscores
pub fn sanitize(value: &str) -> String {
    let replaced = ILLEGAL_FILENAME_CHARS.replace_all(value.trim(), "_");
    WHITESPACE_RUN.replace_all(&replaced, "_").into_owned()
}

/// Find the sample identifier in decoded response text
pub fn identify(text: &str) -> Option<SampleId> {
    let normalized: String = text.nfkc().collect();

    let raw = SAMPLE_ID_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(&normalized)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    })?;

    let sanitized = sanitize(&raw);
    let category = SampleCategory::classify(&sanitized);

    Some(SampleId {
        raw,
        sanitized,
        category,
    })
}

/// First path `base.ext`, `base(1).ext`, `base(2).ext`, ... that does not exist.
///
/// This is a check-then-create sequence and is only safe with a single writer.
pub fn unique_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = dir.join(format!("{}.{}", stem, extension));
    if !candidate.exists() {
        return candidate;
    }

    (1u32..)
        .map(|n| dir.join(format!("{}({}).{}", stem, n, extension)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Resolve `<root>/<category>/sample_ID_<sanitized>.log`, avoiding existing files
pub fn resolve_log_path(root: &Path, id: &SampleId) -> PathBuf {
    let dir = root.join(id.category.dir_name());
    unique_path(&dir, &format!("sample_ID_{}", id.sanitized), "log")
}

/// Timestamp-named path under `others` for responses without an identifier
pub fn fallback_log_path(root: &Path, now: DateTime<Local>) -> PathBuf {
    let dir = root.join(SampleCategory::Others.dir_name());
    unique_path(&dir, &format!("log_{}", now.format("%Y%m%d_%H%M%S")), "log")
}

/// Identify the sample in `text` and resolve its log path under `root`
pub fn classify(text: &str, root: &Path) -> Option<SampleClassification> {
    let id = identify(text)?;
    let path = resolve_log_path(root, &id);
    Some(SampleClassification { id, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tab_separated_label() {
        let id = identify("Sample ID\tLOT123G").unwrap();
        assert_eq!(id.raw, "LOT123G");
        assert_eq!(id.sanitized, "LOT123G");
        assert_eq!(id.category, SampleCategory::G);
        assert_eq!(
            resolve_log_path(Path::new("logs"), &id),
            Path::new("logs/G/sample_ID_LOT123G.log")
        );
    }

    #[test]
    fn test_space_separated_label() {
        let id = identify("Sample ID   X1IP2").unwrap();
        assert_eq!(id.category, SampleCategory::Ip);
        assert_eq!(id.sanitized, "X1IP2");
    }

    #[test]
    fn test_missing_label() {
        assert!(identify("Result OK\r\nTemperature 21.5").is_none());
        assert!(identify("").is_none());
        assert!(identify("Sample ID\t\r\n").is_none());
    }

    #[test]
    fn test_label_inside_multiline_response() {
        let text = "== Report ==\r\nOperator\tJD\r\nSample  ID\t\tA-7 BP3\r\nDone\r\n";
        let id = identify(text).unwrap();
        assert_eq!(id.raw, "A-7 BP3");
        assert_eq!(id.sanitized, "A-7_BP3");
        assert_eq!(id.category, SampleCategory::Bp);
    }

    #[test]
    fn test_pattern_priority_beats_line_order() {
        // The colon form is tried first even though it appears on a later line
        let text = "Sample ID\tFIRSTLINE\nSample ID: SECOND";
        assert_eq!(identify(text).unwrap().raw, "SECOND");
    }

    #[test]
    fn test_first_matching_line_wins() {
        let text = "Sample ID\tONE\nSample ID\tTWO";
        assert_eq!(identify(text).unwrap().raw, "ONE");
    }

    #[test]
    fn test_fullwidth_text_is_normalized() {
        // Fullwidth letters and colon as sent by some instrument firmwares
        let text = "Ｓａｍｐｌｅ ＩＤ：ＬＯＴ９Ｇ";
        let id = identify(text).unwrap();
        assert_eq!(id.raw, "LOT9G");
        assert_eq!(id.category, SampleCategory::G);
    }

    #[test]
    fn test_sanitize_replaces_illegal_characters() {
        assert_eq!(sanitize(r#"a\b/c*d?e:f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize(" lot  12 \t G "), "lot_12_G");
    }

    #[test]
    fn test_classification_suffixes() {
        assert_eq!(SampleCategory::classify("S1G"), SampleCategory::G);
        assert_eq!(SampleCategory::classify("S1G12"), SampleCategory::G);
        assert_eq!(SampleCategory::classify("S1IP"), SampleCategory::Ip);
        assert_eq!(SampleCategory::classify("S1BP07"), SampleCategory::Bp);
        assert_eq!(SampleCategory::classify("S1GX"), SampleCategory::Others);
        assert_eq!(SampleCategory::classify("ip2"), SampleCategory::Others);
    }

    #[test]
    fn test_collision_appends_counter() {
        let root = tempfile::tempdir().unwrap();
        let id = identify("Sample ID\tLOT123G").unwrap();
        let dir = root.path().join("G");
        std::fs::create_dir_all(&dir).unwrap();

        let first = resolve_log_path(root.path(), &id);
        assert_eq!(first, dir.join("sample_ID_LOT123G.log"));
        std::fs::write(&first, "x").unwrap();

        let second = resolve_log_path(root.path(), &id);
        assert_eq!(second, dir.join("sample_ID_LOT123G(1).log"));
        std::fs::write(&second, "x").unwrap();

        let third = classify("Sample ID\tLOT123G", root.path()).unwrap();
        assert_eq!(third.path, dir.join("sample_ID_LOT123G(2).log"));
    }

    #[test]
    fn test_fallback_path() {
        let root = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let path = fallback_log_path(root.path(), now);
        assert_eq!(path, root.path().join("others/log_20240309_140507.log"));
    }
}
