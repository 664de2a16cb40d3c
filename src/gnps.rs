use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::domain::TaskId;
use crate::error::MergeError;

pub const GNPS2_BASE_URL: &str = "https://gnps2.org";

/// Remote side of the pipeline: packaged task output and single result files.
pub trait Gnps2Client: Send + Sync {
    fn download_task_archive(&self, task: &TaskId, destination: &Path) -> Result<(), MergeError>;
    fn download_result_file(
        &self,
        task: &TaskId,
        member: &str,
        destination: &Path,
    ) -> Result<(), MergeError>;
    fn archive_url(&self, task: &TaskId) -> String;
}

#[derive(Clone)]
pub struct Gnps2HttpClient {
    client: Client,
    base_url: String,
}

impl Gnps2HttpClient {
    pub fn new(timeout: Duration) -> Result<Self, MergeError> {
        Self::with_base_url(GNPS2_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, MergeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("massql-merge/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MergeError::Gnps2Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| MergeError::Gnps2Http(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn write_response_to_file(
        &self,
        mut response: reqwest::blocking::Response,
        destination: &Path,
    ) -> Result<(), MergeError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "GNPS2 request failed".to_string());
            return Err(MergeError::Gnps2Status { status, message });
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        }
        let mut file =
            File::create(destination).map_err(|err| MergeError::Filesystem(err.to_string()))?;
        let written = std::io::copy(&mut response, &mut file)
            .map_err(|err| MergeError::Gnps2Http(err.to_string()))?;
        debug!(bytes = written, path = %destination.display(), "response written");
        Ok(())
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, MergeError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        warn!(status, attempt, "GNPS2 busy, retrying");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        warn!(error = %err, attempt, "GNPS2 request failed, retrying");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(MergeError::Gnps2Http(err.to_string()));
                }
            }
        }
    }
}

impl Gnps2Client for Gnps2HttpClient {
    fn download_task_archive(&self, task: &TaskId, destination: &Path) -> Result<(), MergeError> {
        let url = format!("{}/taskzip", self.base_url);
        let response =
            self.send_with_retries(|| self.client.get(&url).query(&[("task", task.as_str())]))?;
        self.write_response_to_file(response, destination)
    }

    fn download_result_file(
        &self,
        task: &TaskId,
        member: &str,
        destination: &Path,
    ) -> Result<(), MergeError> {
        let url = format!("{}/resultfile", self.base_url);
        let response = self.send_with_retries(|| {
            self.client
                .get(&url)
                .query(&[("task", task.as_str()), ("file", member)])
        })?;
        self.write_response_to_file(response, destination)
    }

    fn archive_url(&self, task: &TaskId) -> String {
        format!("{}/taskzip?task={}", self.base_url, task.as_str())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_url_uses_base() {
        let client =
            Gnps2HttpClient::with_base_url("https://example.org/", Duration::from_secs(5)).unwrap();
        let task: TaskId = "2e50af7f1cfc42c391a5fe2eb7b06de7".parse().unwrap();
        assert_eq!(
            client.archive_url(&task),
            "https://example.org/taskzip?task=2e50af7f1cfc42c391a5fe2eb7b06de7"
        );
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(404));
    }
}
