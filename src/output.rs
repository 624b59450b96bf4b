use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use tracing::info;

use crate::error::Result;

/// Join collected fragments in their (file path, line) key order, one
/// blank line between fragments.
pub fn join_fragments(fragments: &BTreeMap<(PathBuf, usize), String>) -> String {
    fragments
        .values()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render the complete bundle text: a banner, then the fragments. An empty
/// result renders as a single explanatory comment so the output file is
/// never silently empty.
pub fn render_bundle(target: &str, fragments: &BTreeMap<(PathBuf, usize), String>) -> String {
    let utc = Utc::now().to_rfc3339();

    if fragments.is_empty() {
        return format!(
            "# No Python source dependencies found for {} at {}\n",
            target, utc
        );
    }

    let local = Local::now().to_rfc3339();
    let mut out = String::new();
    out.push_str(&format!("# Bundled Python source for target: {}\n", target));
    out.push_str(&format!("# Generated: {} UTC ({} local)\n", utc, local));
    out.push_str("# Fragments are ordered by source file path and line number.\n\n");
    out.push_str(&join_fragments(fragments));
    out.push('\n');
    out
}

/// Write the rendered bundle to disk. IO failures here are fatal.
pub fn write_bundle(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content)?;
    info!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment_map(entries: &[(&str, usize, &str)]) -> BTreeMap<(PathBuf, usize), String> {
        entries
            .iter()
            .map(|(path, line, text)| ((PathBuf::from(path), *line), text.to_string()))
            .collect()
    }

    #[test]
    fn fragments_join_in_path_then_line_order() {
        let fragments = fragment_map(&[
            ("b.py", 1, "# b1"),
            ("a.py", 10, "# a10"),
            ("a.py", 2, "# a2"),
        ]);
        assert_eq!(join_fragments(&fragments), "# a2\n\n# a10\n\n# b1");
    }

    #[test]
    fn empty_bundle_renders_a_marker_comment() {
        let rendered = render_bundle("m.py:main", &BTreeMap::new());
        assert!(rendered.starts_with("# No Python source dependencies found for m.py:main"));
        assert_eq!(rendered.lines().count(), 1);
    }

    #[test]
    fn bundle_carries_banner_and_fragments() {
        let fragments = fragment_map(&[("a.py", 1, "def f():\n    pass")]);
        let rendered = render_bundle("a.py:f", &fragments);
        assert!(rendered.starts_with("# Bundled Python source for target: a.py:f\n"));
        assert!(rendered.contains("# Fragments are ordered by source file path and line number."));
        assert!(rendered.ends_with("def f():\n    pass\n"));
    }

    #[test]
    fn write_bundle_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.py");
        write_bundle(&path, "# content\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# content\n");
    }
}
