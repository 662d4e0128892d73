//! End-to-end ingestion over HTTP
//!
//! A mock server publishes a manifest and zipped export files; the real
//! fetcher, parser and JSON-lines uploader load them.

use gdelt_common::checksum::compute_md5;
use gdelt_ingest::extract::WorkingDirectory;
use gdelt_ingest::fetcher::{ArchiveFetcher, HttpArchiveFetcher};
use gdelt_ingest::manifest::{ArtifactKind, ManifestEntry, ManifestSource};
use gdelt_ingest::models::EventRecord;
use gdelt_ingest::upload::JsonLinesUploader;
use gdelt_ingest::{Orchestrator, Phase};
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

fn export_row(id: i64) -> String {
    let mut fields = vec![String::new(); 61];
    fields[0] = id.to_string();
    fields[40] = "39.828175".to_string();
    fields[41] = "-98.5795".to_string();
    fields[59] = "20150218230000".to_string();
    fields[60] = format!("http://example.com/{}", id);
    fields.join("\t")
}

fn zip_archive(entries: &[(&str, String)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn fetcher() -> HttpArchiveFetcher {
    HttpArchiveFetcher::new(reqwest::Client::new())
        .with_max_retries(2)
        .with_retry_delay(Duration::from_millis(10))
}

fn entry(server: &MockServer, name: &str, data: &[u8]) -> ManifestEntry {
    ManifestEntry {
        kind: ArtifactKind::Export,
        url: format!("{}/gdeltv2/{}", server.uri(), name),
        size: Some(data.len() as u64),
        md5: Some(compute_md5(data)),
        line_number: 1,
    }
}

async fn serve(server: &MockServer, name: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/gdeltv2/{}", name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_run_from_http_manifest() {
    let server = MockServer::start().await;

    let stamps = ["20150218230000", "20150218231500", "20150218233000"];
    let mut manifest = String::new();
    for (i, stamp) in stamps.iter().enumerate() {
        let name = format!("{}.export.CSV.zip", stamp);
        let inner = format!("{}.export.CSV", stamp);
        let archive = zip_archive(&[(
            inner.as_str(),
            format!("{}\n{}\n", export_row(i as i64 * 10), export_row(i as i64 * 10 + 1)),
        )]);
        manifest.push_str(&format!(
            "{} {} {}/gdeltv2/{}\n",
            archive.len(),
            compute_md5(&archive),
            server.uri(),
            name
        ));
        manifest.push_str(&format!("1 x {}/gdeltv2/{}.mentions.CSV.zip\n", server.uri(), stamp));
        manifest.push_str(&format!("1 x {}/gdeltv2/{}.gkg.csv.zip\n", server.uri(), stamp));
        serve(&server, &name, archive).await;
    }

    Mock::given(method("GET"))
        .and(path("/gdeltv2/masterfilelist.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(manifest))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let uploader = Arc::new(JsonLinesUploader::new(dir.path().join("out"), "events").unwrap());
    let orchestrator = Orchestrator::new(
        Arc::new(fetcher()),
        uploader.clone(),
        WorkingDirectory::new(dir.path().join("work")),
        2,
        5,
    )
    .unwrap();

    let client = reqwest::Client::new();
    let source = ManifestSource::parse(&format!("{}/gdeltv2/masterfilelist.txt", server.uri()));
    let summary = orchestrator.run_source(&source, &client).await.unwrap();

    assert_eq!(summary.batches, 2);
    assert_eq!(summary.entries_consumed, 3);
    assert_eq!(summary.records_uploaded, 6);

    let stored: Vec<EventRecord> = serde_jsonlines::json_lines(uploader.path())
        .unwrap()
        .collect::<std::io::Result<_>>()
        .unwrap();
    let ids: Vec<_> = stored.iter().filter_map(|r| r.global_event_id).collect();
    assert_eq!(ids, vec![0, 1, 10, 11, 20, 21]);

    let location = stored[0].actor1_geo.as_ref().unwrap().location.unwrap();
    assert_eq!(location.coordinates, [-98.5795, 39.828175]);

    // Companion archives are never requested
    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|r| !r.url.path().contains("mentions") && !r.url.path().contains("gkg")));
}

#[tokio::test]
async fn test_fetch_retries_server_errors() {
    let server = MockServer::start().await;
    let archive = zip_archive(&[("a.export.CSV", export_row(1))]);

    Mock::given(method("GET"))
        .and(path("/gdeltv2/a.export.CSV.zip"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    serve(&server, "a.export.CSV.zip", archive.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let files = fetcher()
        .fetch(&entry(&server, "a.export.CSV.zip", &archive), dir.path())
        .await
        .unwrap();

    assert_eq!(files, vec![dir.path().join("a.export.CSV")]);
}

#[tokio::test]
async fn test_fetch_gives_up_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = fetcher()
        .fetch(&entry(&server, "missing.export.CSV.zip", b""), dir.path())
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).contains("missing.export.CSV.zip"));
}

#[tokio::test]
async fn test_checksum_mismatch_is_fatal() {
    let server = MockServer::start().await;
    let archive = zip_archive(&[("a.export.CSV", export_row(1))]);
    serve(&server, "a.export.CSV.zip", archive.clone()).await;

    let mut bad = entry(&server, "a.export.CSV.zip", &archive);
    bad.md5 = Some("00000000000000000000000000000000".to_string());

    let dir = tempfile::tempdir().unwrap();
    let err = fetcher().fetch(&bad, dir.path()).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<gdelt_common::GdeltError>(),
        Some(gdelt_common::GdeltError::ChecksumMismatch { .. })
    ));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_zip_slip_archive_fails_run_without_escaping() {
    let server = MockServer::start().await;
    let archive = zip_archive(&[
        ("ok.export.CSV", export_row(1)),
        ("../../escaped.export.CSV", export_row(2)),
    ]);
    let name = "20150218230000.export.CSV.zip";
    serve(&server, name, archive.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("a").join("b");
    let uploader = Arc::new(JsonLinesUploader::new(dir.path().join("out"), "events").unwrap());
    let orchestrator = Orchestrator::new(
        Arc::new(fetcher()),
        uploader.clone(),
        WorkingDirectory::new(&work),
        1,
        1,
    )
    .unwrap();

    let manifest = vec![Ok(entry(&server, name, &archive))];
    let err = orchestrator.run(manifest.into_iter()).await.unwrap_err();

    assert_eq!(err.phase, Phase::Fetch);
    assert!(!dir.path().join("escaped.export.CSV").exists());
    assert!(!work.join("ok.export.CSV").exists());
    assert!(!uploader.path().exists());
}

/// Answers every connection with `response` verbatim, then closes it
async fn raw_server(response: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket.write_all(response).await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{}", addr)
}

fn raw_entry(base: &str, size: Option<u64>) -> ManifestEntry {
    ManifestEntry {
        kind: ArtifactKind::Export,
        url: format!("{}/gdeltv2/20150218230000.export.CSV.zip", base),
        size,
        md5: None,
        line_number: 1,
    }
}

#[tokio::test]
async fn test_huge_content_length_is_an_error_not_an_abort() {
    let base =
        raw_server(b"HTTP/1.1 200 OK\r\nContent-Length: 1125899906842624\r\n\r\nPK").await;
    let entry = raw_entry(&base, None);

    let dir = tempfile::tempdir().unwrap();
    let err = fetcher().fetch(&entry, dir.path()).await.unwrap_err();

    assert!(format!("{:#}", err).contains(&entry.url));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_content_length_above_listed_size_is_rejected() {
    let base =
        raw_server(b"HTTP/1.1 200 OK\r\nContent-Length: 1125899906842624\r\n\r\nPK").await;
    let entry = raw_entry(&base, Some(2));

    let dir = tempfile::tempdir().unwrap();
    let err = fetcher().fetch(&entry, dir.path()).await.unwrap_err();

    let message = format!("{:#}", err);
    assert!(message.contains(&entry.url));
    assert!(message.contains("manifest lists 2"));
}

#[tokio::test]
async fn test_body_above_listed_size_is_rejected_while_streaming() {
    // Chunked, so no length is announced up front
    let base = raw_server(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n10\r\n0123456789abcdef\r\n0\r\n\r\n",
    )
    .await;
    let entry = raw_entry(&base, Some(4));

    let dir = tempfile::tempdir().unwrap();
    let err = fetcher().fetch(&entry, dir.path()).await.unwrap_err();

    assert!(format!("{:#}", err).contains("exceeds the listed 4 bytes"));
}

#[tokio::test]
async fn test_manifest_entries_arrive_before_body_completes() {
    let first = "150383 297a16b493de7cf6ca809a7cc31d0b93 http://host/gdeltv2/20150218230000.export.CSV.zip\n\
                 318084 bb27f78ba45f69a17ea6ed7755e9f8ff http://host/gdeltv2/20150218230000.mentions.CSV.zip\n\
                 10768507 ea8dde0beb0ba98810a92db068c0ce99 http://host/gdeltv2/20150218230000.gkg.csv.zip\n";
    let rest = "149211 2a91041d7e72b0fc6a629e2ff867b240 http://host/gdeltv2/20150218231500.export.CSV.zip\n";

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (release, released) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await;

        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
            first.len() + rest.len()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(first.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();

        // Hold the rest of the body back until the first entry was read
        let _ = released.await;
        socket.write_all(rest.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
    });

    let source = ManifestSource::parse(&format!("http://{}/gdeltv2/masterfilelist.txt", addr));
    let mut reader = source.open(&reqwest::Client::new()).await.unwrap();

    let entry = tokio::time::timeout(Duration::from_secs(5), reader.next_entry())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(entry.url.ends_with("20150218230000.export.CSV.zip"));

    release.send(()).unwrap();
    let second = reader.next_entry().await.unwrap().unwrap();
    assert_eq!(second.line_number, 4);
    assert!(reader.next_entry().await.is_none());
}
