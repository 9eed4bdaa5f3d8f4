//! `index.html` listing of every package with extracted manifests.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;

use crate::mirror::MirrorPaths;
use crate::mirror::atomic::write_atomic;
use crate::types::PackageName;
use crate::version::Version;

/// The manifest fields the listing cares about.
#[derive(Debug, Deserialize)]
struct ManifestSummary {
    name: String,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Default)]
struct Listing {
    summary: String,
    versions: Vec<String>,
}

/// Regenerate `<root>/index.html`. Returns the number of packages listed.
pub fn write_index_html(paths: &MirrorPaths) -> io::Result<usize> {
    let listings = gather(paths.root())?;
    write_atomic(&paths.index_html(), render(&listings).as_bytes())?;
    Ok(listings.len())
}

/// Walk `<root>/*/*/descriptions/*`, keyed by the package name each manifest
/// declares.
fn gather(root: &Path) -> io::Result<BTreeMap<PackageName, Listing>> {
    let mut listings: BTreeMap<PackageName, Listing> = BTreeMap::new();

    for owner in visible_dirs(root)? {
        for repo in visible_dirs(&owner)? {
            let descriptions = repo.join("descriptions");
            if !descriptions.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&descriptions)? {
                let entry = entry?;
                let version = entry.file_name().to_string_lossy().into_owned();
                if version.starts_with('.') {
                    continue;
                }
                let Some(manifest) = read_summary(&entry.path()) else {
                    continue;
                };
                let Ok(name) = manifest.name.parse::<PackageName>() else {
                    log::debug!("Not listing {}: bad name", entry.path().display());
                    continue;
                };

                let listing = listings.entry(name).or_default();
                if listing.versions.is_empty() {
                    listing.summary = manifest.summary;
                }
                listing.versions.push(version);
            }
        }
    }

    for listing in listings.values_mut() {
        listing
            .versions
            .sort_by(|a, b| match (Version::parse(a), Version::parse(b)) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => a.cmp(b),
            });
    }
    Ok(listings)
}

fn visible_dirs(dir: &Path) -> io::Result<Vec<std::path::PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn read_summary(path: &Path) -> Option<ManifestSummary> {
    let bytes = fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(summary) => Some(summary),
        Err(e) => {
            log::warn!("Unable to parse {}: {}", path.display(), e);
            None
        }
    }
}

fn render(listings: &BTreeMap<PackageName, Listing>) -> String {
    let mut html = String::from(
        "<!doctype html>\n<html><head><meta charset=\"UTF-8\"><title>Elm packages</title></head><body><h1>Elm package mirror</h1>\n",
    );

    let packages: Vec<String> = listings
        .iter()
        .map(|(name, listing)| {
            let links: Vec<String> = listing
                .versions
                .iter()
                .map(|v| {
                    let v = escape(v);
                    format!(
                        "<a href=\"{name}/zipball/{v}\" download=\"{repo}-{v}.zip\">{v}</a>",
                        repo = name.repo
                    )
                })
                .collect();
            format!(
                "<dl><dt><strong>{name}</strong> (<a href=\"{name}\">Git</a>)</dt><dd>{}<br><strong>Releases:</strong> {}</dd></dl>",
                escape(&listing.summary),
                links.join(", ")
            )
        })
        .collect();

    html.push_str(&packages.join("\n"));
    html.push_str("</body></html>");
    html
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manifest(paths: &MirrorPaths, name: &str, version: &str, body: &str) {
        let name: PackageName = name.parse().unwrap();
        write_atomic(&paths.description(&name, version), body.as_bytes()).unwrap();
    }

    #[test]
    fn escape_html_specials() {
        assert_eq!(
            escape(r#"<b>"Fish" & 'chips'</b>"#),
            "&lt;b&gt;&quot;Fish&quot; &amp; &#x27;chips&#x27;&lt;/b&gt;"
        );
    }

    #[test]
    fn lists_packages_sorted_with_versions_in_order() {
        let dir = tempdir().unwrap();
        let paths = MirrorPaths::new(dir.path());
        let widget = r#"{"name":"acme/widget","summary":"Widgets <3"}"#;
        manifest(&paths, "acme/widget", "1.10.0", widget);
        manifest(&paths, "acme/widget", "1.2.0", widget);
        manifest(&paths, "acme/alpha", "1.0.0", r#"{"name":"acme/alpha","summary":"A"}"#);

        let count = write_index_html(&paths).unwrap();
        let html = fs::read_to_string(paths.index_html()).unwrap();

        assert_eq!(count, 2);
        assert!(html.starts_with("<!doctype html>"));
        assert!(html.find("acme/alpha").unwrap() < html.find("acme/widget").unwrap());
        assert!(html.contains("Widgets &lt;3"));
        assert!(html.find(">1.2.0<").unwrap() < html.find(">1.10.0<").unwrap());
        assert!(html.contains(
            r#"<a href="acme/widget/zipball/1.2.0" download="widget-1.2.0.zip">1.2.0</a>"#
        ));
    }

    #[test]
    fn skips_unusable_manifests() {
        let dir = tempdir().unwrap();
        let paths = MirrorPaths::new(dir.path());
        manifest(&paths, "acme/broken", "1.0.0", "{not json");
        manifest(&paths, "acme/noname", "1.0.0", r#"{"summary":"x"}"#);
        manifest(&paths, "acme/slashes", "1.0.0", r#"{"name":"a/b/c"}"#);
        manifest(&paths, "acme/markup", "1.0.0", r#"{"name":"acme/<b>"}"#);
        manifest(&paths, "acme/array", "1.0.0", "[]");

        assert_eq!(write_index_html(&paths).unwrap(), 0);
    }

    #[test]
    fn ignores_hidden_entries() {
        let dir = tempdir().unwrap();
        let paths = MirrorPaths::new(dir.path());
        fs::create_dir_all(paths.locks_dir()).unwrap();
        manifest(&paths, "acme/widget", "1.0.0", r#"{"name":"acme/widget"}"#);
        let name: PackageName = "acme/widget".parse().unwrap();
        fs::write(paths.descriptions_dir(&name).join(".1.1.0.tmp.1.0"), "{}").unwrap();

        write_index_html(&paths).unwrap();
        let html = fs::read_to_string(paths.index_html()).unwrap();

        assert!(html.contains(">1.0.0<"));
        assert!(!html.contains("tmp"));
    }

    #[test]
    fn empty_root_still_produces_page() {
        let dir = tempdir().unwrap();
        let paths = MirrorPaths::new(dir.path());

        assert_eq!(write_index_html(&paths).unwrap(), 0);
        assert!(paths.index_html().exists());
    }
}
