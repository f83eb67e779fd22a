//! Conditional database download with atomic replacement.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;
use url::Url;

use super::extract::{unpack, Packing};
use crate::config::DOWNLOAD_TIMEOUT_SECS;
use crate::error_handling::DownloadError;

/// Result of one conditional fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Download {
    /// The source answered 304.
    NotModified,
    /// A new database was written to the target path.
    Fetched {
        /// Last-Modified reported by the source, if any
        last_modified: Option<DateTime<Utc>>,
        /// Size of the written database
        bytes: usize,
    },
}

/// Formats a timestamp as an HTTP date (RFC 7231 IMF-fixdate).
pub(crate) fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an HTTP date header value.
pub(crate) fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Fetches `url` unless it is unchanged since `since`, then atomically
/// replaces `target` with the decoded database.
///
/// The body is streamed and refused as soon as it exceeds `max_size`.
pub(crate) async fn download_database(
    client: &reqwest::Client,
    url: &Url,
    since: Option<DateTime<Utc>>,
    target: &Path,
    max_size: usize,
) -> Result<Download, DownloadError> {
    let mut request = client
        .get(url.clone())
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS));
    if let Some(since) = since {
        request = request.header(IF_MODIFIED_SINCE, http_date(since));
    }

    let mut response = request.send().await?;
    let status = response.status();
    if status == StatusCode::NOT_MODIFIED {
        log::debug!("{} not modified since {:?}", url, since);
        return Ok(Download::NotModified);
    }
    if !status.is_success() {
        return Err(DownloadError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
        });
    }

    if let Some(length) = response.content_length() {
        if length > max_size as u64 {
            return Err(DownloadError::TooLarge {
                size: length,
                max: max_size,
            });
        }
    }

    let last_modified = response
        .headers()
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date);

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > max_size {
            return Err(DownloadError::TooLarge {
                size: (body.len() + chunk.len()) as u64,
                max: max_size,
            });
        }
        body.extend_from_slice(&chunk);
    }

    let packing = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(Packing::of)
        .unwrap_or(Packing::Plain);
    let database = unpack(&body, packing)?;
    let bytes = database.len();

    replace_file(target.to_path_buf(), database).await?;
    log::info!("Downloaded {} into {} ({} bytes)", url, target.display(), bytes);

    Ok(Download::Fetched {
        last_modified,
        bytes,
    })
}

/// Writes to a temporary file next to `target`, then renames it over `target`.
async fn replace_file(target: PathBuf, contents: Vec<u8>) -> Result<(), DownloadError> {
    tokio::task::spawn_blocking(move || {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&contents)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok::<_, std::io::Error>(())
    })
    .await
    .map_err(|e| DownloadError::Io(std::io::Error::other(e)))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn source(server: &MockServer, name: &str) -> Url {
        Url::parse(&format!("{}/free/{}", server.uri(), name)).unwrap()
    }

    #[test]
    fn test_http_date_round_trip() {
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 8, 5, 0).unwrap();
        assert_eq!(http_date(time), "Fri, 01 Mar 2024 08:05:00 GMT");
        assert_eq!(parse_http_date("Fri, 01 Mar 2024 08:05:00 GMT"), Some(time));
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[tokio::test]
    async fn test_fetch_writes_decoded_database() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/free/country.mmdb.gz"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Last-Modified", "Fri, 01 Mar 2024 08:05:00 GMT")
                    .set_body_bytes(gzip(b"fresh database")),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("country.mmdb");
        tokio::fs::write(&target, b"stale").await.unwrap();

        let outcome = download_database(
            &reqwest::Client::new(),
            &source(&server, "country.mmdb.gz"),
            None,
            &target,
            1024,
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            Download::Fetched {
                last_modified: Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 5, 0).unwrap()),
                bytes: 14,
            }
        );
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"fresh database");
    }

    #[tokio::test]
    async fn test_not_modified_leaves_file_alone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-Modified-Since", "Fri, 01 Mar 2024 08:05:00 GMT"))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("country.mmdb");
        tokio::fs::write(&target, b"current").await.unwrap();

        let since = Utc.with_ymd_and_hms(2024, 3, 1, 8, 5, 0).unwrap();
        let outcome = download_database(
            &reqwest::Client::new(),
            &source(&server, "country.mmdb.gz"),
            Some(since),
            &target,
            1024,
        )
        .await
        .unwrap();

        assert_eq!(outcome, Download::NotModified);
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"current");
    }

    #[tokio::test]
    async fn test_server_error_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("country.mmdb");
        let err = download_database(
            &reqwest::Client::new(),
            &source(&server, "country.mmdb.gz"),
            None,
            &target,
            1024,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DownloadError::Status { status: 503, .. }));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_oversized_body_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("country.mmdb");
        let err = download_database(
            &reqwest::Client::new(),
            &source(&server, "country.mmdb"),
            None,
            &target,
            1024,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DownloadError::TooLarge { max: 1024, .. }));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_html_error_page_is_not_written() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>moved</html>"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("country.mmdb");
        let err = download_database(
            &reqwest::Client::new(),
            &source(&server, "country.mmdb.gz"),
            None,
            &target,
            1024,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DownloadError::Archive(_)));
        assert!(!target.exists());
    }
}
