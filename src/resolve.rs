//! Document resolution: turn a location into raw PDF bytes.
//!
//! A location may be a local PDF file, a directory tree of PDFs, a ZIP
//! archive of PDFs, a direct PDF URL, or a bucket/listing URL. Resolution
//! never extracts text; it only gathers `(bytes, file_name, location)`
//! tuples for the ingestion pipeline. Per-item failures inside a batch are
//! recorded and skipped so one bad file cannot sink a whole directory.

use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::errors::EngineError;
use crate::models::{file_name_of, SourceKind};

/// One resolved document, not yet checksummed or extracted.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub location: String,
}

/// All documents discovered at a location, plus any that failed to load.
#[derive(Debug)]
pub struct ResolvedBatch {
    pub kind: SourceKind,
    pub origin: String,
    pub documents: Vec<RawDocument>,
    /// `(location, reason)` for items that could not be loaded.
    pub skipped: Vec<(String, String)>,
}

/// Resolve a location into a batch of raw documents.
pub async fn resolve_location(location: &str) -> Result<ResolvedBatch, EngineError> {
    if location.trim().is_empty() {
        return Err(EngineError::InvalidInput("location is empty".into()));
    }

    if location.starts_with("http://") || location.starts_with("https://") {
        return resolve_url(location).await;
    }

    let path = Path::new(location);
    if !path.exists() {
        return Err(EngineError::InvalidInput(format!(
            "path does not exist: {}",
            location
        )));
    }

    let mut batch = ResolvedBatch {
        kind: SourceKind::File,
        origin: location.to_string(),
        documents: Vec::new(),
        skipped: Vec::new(),
    };

    if path.is_dir() {
        resolve_directory(path, &mut batch);
    } else if has_extension(location, "zip") {
        let bytes = std::fs::read(path)
            .map_err(|e| EngineError::InvalidInput(format!("cannot read {}: {}", location, e)))?;
        resolve_zip(&bytes, location, &mut batch);
    } else {
        let bytes = std::fs::read(path)
            .map_err(|e| EngineError::InvalidInput(format!("cannot read {}: {}", location, e)))?;
        batch.documents.push(RawDocument {
            bytes,
            file_name: file_name_of(location),
            location: location.to_string(),
        });
    }

    Ok(batch)
}

fn resolve_directory(root: &Path, batch: &mut ResolvedBatch) {
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let location = entry.path().display().to_string();
        if !has_extension(&location, "pdf") {
            continue;
        }
        match std::fs::read(entry.path()) {
            Ok(bytes) => batch.documents.push(RawDocument {
                bytes,
                file_name: file_name_of(&location),
                location,
            }),
            Err(e) => {
                warn!(path = %location, error = %e, "skipping unreadable file");
                batch.skipped.push((location, e.to_string()));
            }
        }
    }
}

/// Every `.pdf` entry in the archive becomes a document whose location is
/// `"{zip}/{entry}"`, so a ZIP rescan dedups per entry.
fn resolve_zip(bytes: &[u8], origin: &str, batch: &mut ResolvedBatch) {
    let mut archive = match zip::ZipArchive::new(std::io::Cursor::new(bytes)) {
        Ok(a) => a,
        Err(e) => {
            batch.skipped.push((origin.to_string(), e.to_string()));
            return;
        }
    };

    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(e) => e,
            Err(e) => {
                batch.skipped.push((origin.to_string(), e.to_string()));
                continue;
            }
        };
        if entry.is_dir() || !has_extension(entry.name(), "pdf") {
            continue;
        }
        let location = format!("{}/{}", origin, entry.name());
        let mut entry_bytes = Vec::new();
        match entry.read_to_end(&mut entry_bytes) {
            Ok(_) => batch.documents.push(RawDocument {
                bytes: entry_bytes,
                file_name: file_name_of(entry.name()),
                location,
            }),
            Err(e) => batch.skipped.push((location, e.to_string())),
        }
    }
}

async fn resolve_url(url: &str) -> Result<ResolvedBatch, EngineError> {
    let mut batch = ResolvedBatch {
        kind: SourceKind::Url,
        origin: url.to_string(),
        documents: Vec::new(),
        skipped: Vec::new(),
    };

    let targets = if has_extension(url, "pdf") {
        vec![url.to_string()]
    } else {
        let found = crawl_listing(url).await?;
        if found.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "no PDFs discovered at {}",
                url
            )));
        }
        found
    };

    for target in targets {
        match fetch_bytes(&target).await {
            Ok(bytes) => batch.documents.push(RawDocument {
                bytes,
                file_name: file_name_of(&target),
                location: target,
            }),
            Err(e) => {
                warn!(url = %target, error = %e, "skipping unfetchable URL");
                batch.skipped.push((target, e.to_string()));
            }
        }
    }

    Ok(batch)
}

async fn fetch_bytes(url: &str) -> Result<Vec<u8>, EngineError> {
    let resp = reqwest::get(url)
        .await
        .map_err(|e| EngineError::InvalidInput(format!("fetch failed for {}: {}", url, e)))?;
    if !resp.status().is_success() {
        return Err(EngineError::InvalidInput(format!(
            "fetch failed for {}: HTTP {}",
            url,
            resp.status()
        )));
    }
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Discover PDF links at a bucket or listing URL. Understands S3-style
/// `ListBucketResult` XML and plain HTML `href` links; falls back to the
/// URL itself when it points straight at a PDF.
async fn crawl_listing(url: &str) -> Result<Vec<String>, EngineError> {
    let resp = reqwest::get(url)
        .await
        .map_err(|e| EngineError::InvalidInput(format!("crawl failed for {}: {}", url, e)))?;
    if !resp.status().is_success() {
        // Listing disabled (common on S3/Supabase): nothing to discover.
        return Err(EngineError::InvalidInput(format!(
            "bucket listing failed for {}: HTTP {} (provide a direct file link or a ZIP)",
            url,
            resp.status()
        )));
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let body = resp
        .text()
        .await
        .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

    if content_type.contains("application/pdf") {
        return Ok(vec![url.to_string()]);
    }

    let mut found: Vec<String> = Vec::new();

    if content_type.contains("xml") || body.trim_start().starts_with("<?xml") {
        found.extend(parse_bucket_xml(&body, url));
    }
    found.extend(scrape_pdf_hrefs(&body, url));

    found.sort();
    found.dedup();
    debug!(url, count = found.len(), "crawl discovered PDFs");
    Ok(found)
}

/// Pull `<Key>` values out of an S3 `ListBucketResult` document.
fn parse_bucket_xml(xml: &str, base: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_key = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                in_key = e.local_name().as_ref() == b"Key";
            }
            Ok(quick_xml::events::Event::Text(t)) if in_key => {
                let key = t.unescape().unwrap_or_default().into_owned();
                if has_extension(&key, "pdf") {
                    keys.push(join_url(base, &key));
                }
            }
            Ok(quick_xml::events::Event::End(_)) => in_key = false,
            Ok(quick_xml::events::Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    keys
}

/// Scan HTML for `href="…pdf"` links.
fn scrape_pdf_hrefs(html: &str, base: &str) -> Vec<String> {
    let mut links = Vec::new();
    let mut rest = html;
    while let Some(pos) = rest.find("href=") {
        rest = &rest[pos + 5..];
        let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            continue;
        };
        rest = &rest[1..];
        let Some(end) = rest.find(quote) else { break };
        let href = &rest[..end];
        if has_extension(href, "pdf") {
            links.push(join_url(base, href));
        }
        rest = &rest[end..];
    }
    links
}

fn join_url(base: &str, rel: &str) -> String {
    if rel.starts_with("http://") || rel.starts_with("https://") {
        return rel.to_string();
    }
    let trimmed = base.trim_end_matches('/');
    if rel.starts_with('/') {
        // Join against the origin only.
        if let Some(scheme_end) = trimmed.find("://") {
            if let Some(slash) = trimmed[scheme_end + 3..].find('/') {
                return format!("{}{}", &trimmed[..scheme_end + 3 + slash], rel);
            }
        }
        return format!("{}{}", trimmed, rel);
    }
    format!("{}/{}", trimmed, rel)
}

fn has_extension(name: &str, ext: &str) -> bool {
    let name = name.split(['?', '#']).next().unwrap_or(name);
    name.rsplit('.')
        .next()
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_check_ignores_case_and_query() {
        assert!(has_extension("cv.PDF", "pdf"));
        assert!(has_extension("https://x/cv.pdf?token=1", "pdf"));
        assert!(!has_extension("cv.docx", "pdf"));
    }

    #[test]
    fn bucket_xml_keys_are_joined_to_base() {
        let xml = r#"<?xml version="1.0"?>
<ListBucketResult>
  <Contents><Key>cvs/alice.pdf</Key></Contents>
  <Contents><Key>cvs/notes.txt</Key></Contents>
  <Contents><Key>cvs/bob.pdf</Key></Contents>
</ListBucketResult>"#;
        let urls = parse_bucket_xml(xml, "https://bucket.example.com/");
        assert_eq!(
            urls,
            vec![
                "https://bucket.example.com/cvs/alice.pdf",
                "https://bucket.example.com/cvs/bob.pdf"
            ]
        );
    }

    #[test]
    fn href_scrape_finds_only_pdfs() {
        let html = r#"<a href="a.pdf">a</a> <a href='sub/b.pdf'>b</a> <a href="c.txt">c</a>"#;
        let links = scrape_pdf_hrefs(html, "https://h.example.com/list");
        assert_eq!(
            links,
            vec![
                "https://h.example.com/list/a.pdf",
                "https://h.example.com/list/sub/b.pdf"
            ]
        );
    }

    #[test]
    fn absolute_and_rooted_urls_join_correctly() {
        assert_eq!(
            join_url("https://h.example.com/deep/list", "https://other/x.pdf"),
            "https://other/x.pdf"
        );
        assert_eq!(
            join_url("https://h.example.com/deep/list", "/files/x.pdf"),
            "https://h.example.com/files/x.pdf"
        );
    }

    #[tokio::test]
    async fn missing_path_is_invalid_input() {
        let err = resolve_location("/definitely/not/here.pdf").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn directory_resolution_collects_pdfs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.pdf"), b"%PDF-fake-a").unwrap();
        std::fs::write(tmp.path().join("b.txt"), b"ignored").unwrap();
        let nested = tmp.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("c.pdf"), b"%PDF-fake-c").unwrap();

        let batch = resolve_location(tmp.path().to_str().unwrap()).await.unwrap();
        assert_eq!(batch.kind, SourceKind::File);
        assert_eq!(batch.documents.len(), 2);
        let mut names: Vec<_> = batch.documents.iter().map(|d| d.file_name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a.pdf", "c.pdf"]);
    }
}
