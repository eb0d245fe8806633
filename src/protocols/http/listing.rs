//! Directory listing pages.
//!
//! Entries are re-read on every request. Only names matching
//! `[A-Za-z0-9][-_A-Za-z0-9.]*` that are neither hidden nor unreadable
//! are listed, so names never need HTML escaping.

use std::io;
use std::path::Path;

/// Whether `name` matches `[A-Za-z0-9][-_A-Za-z0-9.]*`.
pub fn is_allowed_file_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Hidden means a leading dot.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Whether this process can open the entry for reading.
async fn is_readable(path: &Path, is_dir: bool) -> bool {
    if is_dir {
        tokio::fs::read_dir(path).await.is_ok()
    } else {
        tokio::fs::File::open(path).await.is_ok()
    }
}

/// Sorted names of the visible entries of `dir`.
pub async fn visible_entries(dir: &Path) -> io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if name.starts_with('.') || !is_allowed_file_name(&name) {
            continue;
        }
        let is_dir = match entry.file_type().await {
            Ok(file_type) => file_type.is_dir(),
            Err(_) => continue,
        };
        if is_readable(&entry.path(), is_dir).await {
            names.push(name);
        }
    }

    names.sort();
    Ok(names)
}

/// Render the listing page for the directory served at `uri_path`.
pub fn render(uri_path: &str, names: &[String]) -> String {
    let mut html = String::with_capacity(256 + names.len() * 64);
    html.push_str("<!DOCTYPE html>\r\n");
    html.push_str("<html><head><title>Index of ");
    html.push_str(uri_path);
    html.push_str("</title></head><body>");
    html.push_str("<h3>Index of ");
    html.push_str(uri_path);
    html.push_str("</h3>\r\n");
    html.push_str("<ul>");
    html.push_str("<li><a href=\"../\">..</a></li>\r\n");
    for name in names {
        html.push_str("<li><a href=\"");
        html.push_str(name);
        html.push_str("\">");
        html.push_str(name);
        html.push_str("</a></li>\r\n");
    }
    html.push_str("</ul></body></html>\r\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_file_names() {
        for name in ["a", "readme.md", "Cargo.toml", "x-y_z.tar.gz", "9lives"] {
            assert!(is_allowed_file_name(name), "{name}");
        }
        for name in ["", ".hidden", "-dash", "_under", "with space", "<b>", "caf\u{e9}"] {
            assert!(!is_allowed_file_name(name), "{name}");
        }
    }

    #[test]
    fn test_hidden() {
        assert!(is_hidden(Path::new("/srv/.git")));
        assert!(!is_hidden(Path::new("/srv/git")));
    }

    #[test]
    fn test_empty_listing_has_only_parent_link() {
        let html = render("/empty/", &[]);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert_eq!(html.matches("<a ").count(), 1);
        assert!(html.contains("<a href=\"../\">..</a>"));
        assert!(html.ends_with("</ul></body></html>\r\n"));
    }

    #[test]
    fn test_listing_links_each_entry() {
        let html = render("/docs/", &["a.txt".to_string(), "b".to_string()]);
        assert_eq!(html.matches("<a ").count(), 3);
        assert!(html.contains("<li><a href=\"a.txt\">a.txt</a></li>"));
        assert!(html.contains("<title>Index of /docs/</title>"));
    }

    #[tokio::test]
    async fn test_visible_entries_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zeta.txt", "alpha.txt", ".secret", "bad name.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let names = visible_entries(dir.path()).await.unwrap();
        assert_eq!(names, vec!["alpha.txt", "sub", "zeta.txt"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_visible_entries_follow_open_permission() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let open = dir.path().join("open.txt");
        let locked = dir.path().join("locked.txt");
        std::fs::write(&open, b"x").unwrap();
        std::fs::write(&locked, b"x").unwrap();
        // Group and other may read, the owner may not.
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o044)).unwrap();

        // Root opens anything, so expect whatever an open attempt says.
        let locked_opens = std::fs::File::open(&locked).is_ok();
        let names = visible_entries(dir.path()).await.unwrap();

        assert!(names.contains(&"open.txt".to_string()));
        assert_eq!(names.contains(&"locked.txt".to_string()), locked_opens);
    }

    #[tokio::test]
    async fn test_visible_entries_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(visible_entries(dir.path()).await.unwrap().is_empty());
    }
}
