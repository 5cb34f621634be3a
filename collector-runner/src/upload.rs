// Copyright (c) The wpt-collector Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transmitting a consolidated report to the results receiver.
//!
//! One POST per run: the compressed document travels as a multipart
//! `result_file` attachment alongside a comma-joined `labels` field, with
//! HTTP basic authentication. Any non-2xx response or transport error is
//! fatal for the invocation; there is no partial upload and no automatic
//! retry at this layer.

use crate::errors::UploadError;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use camino::Utf8Path;
use debug_ignore::DebugIgnore;
use std::fs;

/// The receiving endpoint and its credentials.
#[derive(Clone, Debug)]
pub struct UploadTarget {
    /// The results-receiver URL.
    pub url: String,
    /// The basic-auth user name.
    pub user_name: String,
    /// The basic-auth secret.
    pub secret: DebugIgnore<String>,
}

impl UploadTarget {
    /// Creates a target.
    pub fn new(
        url: impl Into<String>,
        user_name: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            user_name: user_name.into(),
            secret: DebugIgnore(secret.into()),
        }
    }
}

/// Uploads consolidated reports to one [`UploadTarget`].
#[derive(Debug)]
pub struct Uploader {
    target: UploadTarget,
    agent: DebugIgnore<ureq::Agent>,
}

impl Uploader {
    /// Creates an uploader for `target`.
    pub fn new(target: UploadTarget) -> Self {
        // Status handling is done here, not via ureq's error channel, so
        // the response body can be surfaced on rejection.
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build();
        Self {
            target,
            agent: DebugIgnore(ureq::Agent::new_with_config(config)),
        }
    }

    /// POSTs the compressed report at `result_file` with the given label
    /// set. Returns the response status code on success (2xx).
    pub fn upload(&self, result_file: &Utf8Path, labels: &[String]) -> Result<u16, UploadError> {
        let file_bytes = fs::read(result_file).map_err(|error| UploadError::FileRead {
            path: result_file.to_owned(),
            error,
        })?;

        let boundary = format!(
            "----wpt-collector-{:016x}{:016x}",
            rand::random::<u64>(),
            rand::random::<u64>(),
        );
        let body = multipart_body(&boundary, &labels.join(","), &file_bytes);
        let credentials = STANDARD.encode(format!(
            "{}:{}",
            self.target.user_name, *self.target.secret
        ));

        tracing::info!(url = %self.target.url, bytes = body.len(), "uploading consolidated report");
        let mut response = self
            .agent
            .post(&self.target.url)
            .header(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .header("Authorization", &format!("Basic {credentials}"))
            .send(&body[..])
            .map_err(|error| UploadError::Transport {
                url: self.target.url.clone(),
                error: Box::new(error),
            })?;

        let status = response.status();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|error| UploadError::ResponseRead(Box::new(error)))?;
        tracing::info!(status = status.as_u16(), body = %text, "results receiver responded");

        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(UploadError::Status {
                status: status.as_u16(),
                body: text,
            })
        }
    }
}

fn multipart_body(boundary: &str, labels: &str, file_bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(file_bytes.len() + 512);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"labels\"\r\n\r\n");
    body.extend_from_slice(labels.as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"result_file\"; \
          filename=\"wpt-report.json.zst\"\r\n\
          Content-Type: application/octet-stream\r\n\r\n",
    );
    body.extend_from_slice(file_bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use std::{
        io::{Read, Write},
        net::TcpListener,
        sync::mpsc,
        thread,
        time::Duration,
    };

    fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
    }

    /// Serves exactly one request, returning the captured request bytes
    /// through the channel.
    fn one_shot_server(
        status_line: &'static str,
        response_body: &'static str,
    ) -> (String, mpsc::Receiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];

            let header_end = loop {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
                if let Some(pos) = find_subsequence(&request, b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let headers = String::from_utf8_lossy(&request[..header_end]).to_string();
            let content_length: usize = headers
                .lines()
                .find_map(|line| {
                    line.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .map(|value| value.trim().parse().unwrap())
                })
                .unwrap();
            while request.len() < header_end + content_length {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{response_body}",
                response_body.len(),
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            tx.send(request).unwrap();
        });

        (format!("http://{addr}/api/results/upload"), rx)
    }

    fn write_result_file(dir: &Utf8TempDir) -> camino::Utf8PathBuf {
        let path = dir.path().join("wpt-report.json.zst");
        std::fs::write(&path, b"fake compressed payload").unwrap();
        path
    }

    #[test]
    fn upload_sends_multipart_request() {
        let dir = Utf8TempDir::new().unwrap();
        let file = write_result_file(&dir);
        let (url, rx) = one_shot_server("201 Created", "ok");

        let uploader = Uploader::new(UploadTarget::new(url, "wpt-user", "hunter2"));
        let labels = vec!["master".to_owned(), "experimental".to_owned()];
        let status = uploader.upload(&file, &labels).unwrap();
        assert_eq!(status, 201);

        let request = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let expected_auth = format!("Basic {}", STANDARD.encode("wpt-user:hunter2"));
        let text = String::from_utf8_lossy(&request);
        assert!(text.contains(&expected_auth), "missing auth header: {text}");
        assert!(text.contains("name=\"labels\""));
        assert!(text.contains("master,experimental"));
        assert!(text.contains("name=\"result_file\""));
        assert!(
            find_subsequence(&request, b"fake compressed payload").is_some(),
            "missing file payload",
        );
    }

    #[test]
    fn non_2xx_response_is_an_error() {
        let dir = Utf8TempDir::new().unwrap();
        let file = write_result_file(&dir);
        let (url, _rx) = one_shot_server("500 Internal Server Error", "boom");

        let uploader = Uploader::new(UploadTarget::new(url, "wpt-user", "hunter2"));
        match uploader.upload(&file, &["master".to_owned()]).unwrap_err() {
            UploadError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[test]
    fn missing_result_file_is_an_error() {
        let dir = Utf8TempDir::new().unwrap();
        let uploader = Uploader::new(UploadTarget::new(
            "http://127.0.0.1:9/unreachable",
            "user",
            "secret",
        ));
        match uploader
            .upload(&dir.path().join("absent.json.zst"), &[])
            .unwrap_err()
        {
            UploadError::FileRead { .. } => {}
            other => panic!("expected FileRead, got {other:?}"),
        }
    }

    #[test]
    fn secret_is_redacted_in_debug_output() {
        let target = UploadTarget::new("http://example.test", "user", "hunter2");
        let debug = format!("{target:?}");
        assert!(!debug.contains("hunter2"), "secret leaked: {debug}");
    }
}
