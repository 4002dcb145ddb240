use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use anyhow::Context;
use percent_encoding::percent_decode_str;
use reqwest::blocking::{Client, RequestBuilder, Response};

use crate::archives::unique_destination;
use crate::config::Config;
use crate::progress::StageProgress;
use crate::types::{FetchFailure, FileInfo};

/// The two calls the batch fetcher makes against SMW Central.
pub trait FileApi {
    /// Look up a file's metadata by numeric ID.
    fn file_info(&self, id: &str) -> anyhow::Result<FileInfo>;
    /// Fetch the raw bytes at an already-decoded download URL.
    fn download(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

pub struct SmwcApi {
    client: Client,
    endpoint: String,
    api_timeout: Duration,
    max_retries: usize,
    throttle_ms: Option<u64>,
    verbose: u8,
}

impl SmwcApi {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        // Lookups carry their own timeout; archive downloads may run long.
        let client = Client::builder()
            .user_agent(concat!("smwc-fetch/", env!("CARGO_PKG_VERSION")))
            .timeout(None::<Duration>)
            .build()
            .context("building HTTP client")?;
        Ok(Self::with_client(client, config))
    }

    /// Use a caller-supplied client so tests can inject their own timeouts.
    pub fn with_client(client: Client, config: &Config) -> Self {
        Self {
            client,
            endpoint: config.api.clone(),
            api_timeout: Duration::from_secs(config.api_timeout_secs),
            max_retries: config.max_retries,
            throttle_ms: config.throttle_ms,
            verbose: config.effective_verbose(),
        }
    }

    fn send_with_retry(
        &self,
        what: &str,
        request: impl Fn() -> RequestBuilder,
    ) -> anyhow::Result<Response> {
        let max_attempts = std::cmp::max(1, self.max_retries);
        let mut last_err = None;
        for attempt in 0..max_attempts {
            match request().send() {
                Ok(resp) => {
                    vprintln!(self.verbose, 3, "{}: status={}", what, resp.status());
                    if !resp.status().is_success() {
                        anyhow::bail!("{} returned HTTP {}", what, resp.status());
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    vprintln!(
                        self.verbose,
                        1,
                        "request error for {} (attempt {}): {}",
                        what,
                        attempt + 1,
                        e
                    );
                    last_err = Some(e);
                    if attempt + 1 < max_attempts {
                        match self.throttle_ms {
                            Some(ms) => sleep(Duration::from_millis(ms)),
                            None => sleep(Duration::from_millis(250 * (1 << attempt))),
                        }
                    }
                }
            }
        }
        match last_err {
            Some(e) => Err(anyhow::Error::new(e).context(format!("{what} failed"))),
            None => anyhow::bail!("{what} failed"),
        }
    }
}

impl FileApi for SmwcApi {
    fn file_info(&self, id: &str) -> anyhow::Result<FileInfo> {
        let what = format!("file info request for {id}");
        let resp = self.send_with_retry(&what, || {
            self.client
                .get(&self.endpoint)
                .query(&[("a", "getfile"), ("v", "2"), ("id", id)])
                .timeout(self.api_timeout)
        })?;
        let body = resp.text().with_context(|| format!("reading {what}"))?;
        vprintln!(self.verbose, 3, "getfile {}: {}", id, body);
        serde_json::from_str(&body).with_context(|| format!("malformed response to {what}"))
    }

    fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let what = format!("download of {url}");
        let resp = self.send_with_retry(&what, || self.client.get(url))?;
        let bytes = resp.bytes().with_context(|| format!("reading {what}"))?;
        Ok(bytes.to_vec())
    }
}

/// Accept either a bare ID or a pasted file URL such as
/// `https://www.smwcentral.net/?p=section&a=details&id=12345`.
pub fn normalize_identifier(raw: &str) -> String {
    let raw = raw.trim();
    raw.split('&')
        .find(|chunk| chunk.contains("id"))
        .and_then(|chunk| chunk.rsplit('=').next())
        .map(|id| id.trim().to_string())
        .unwrap_or_else(|| raw.to_string())
}

pub fn read_identifier_list(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading identifier list {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Undo the API's percent-encoding. Protocol-relative URLs get `https:`.
pub fn decode_download_url(encoded: &str) -> anyhow::Result<String> {
    let decoded = percent_decode_str(encoded.trim())
        .decode_utf8()
        .with_context(|| format!("download url is not valid UTF-8: {encoded}"))?
        .into_owned();
    if decoded.starts_with("//") {
        return Ok(format!("https:{decoded}"));
    }
    Ok(decoded)
}

/// Archive name is the URL's final path segment.
pub fn file_name_from_url(url: &str) -> anyhow::Result<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        anyhow::bail!("cannot derive a file name from download url {url}");
    }
    Ok(name.to_string())
}

/// Resolve one identifier, download its archive into `config.work_dir` and return
/// the written path.
pub fn download_file<A: FileApi + ?Sized>(
    api: &A,
    raw_id: &str,
    config: &Config,
) -> anyhow::Result<PathBuf> {
    let verbose = config.effective_verbose();
    let id = normalize_identifier(raw_id);
    if id.is_empty() {
        anyhow::bail!("no file id found in {raw_id:?}");
    }

    let info = api
        .file_info(&id)
        .with_context(|| format!("network error resolving file {id}"))?;
    vprintln!(verbose, 1, "Downloading \"{}\" ({})", info.name, id);

    let url = decode_download_url(&info.download_url)?;
    let file_name = file_name_from_url(&url)?;
    let bytes = api
        .download(&url)
        .with_context(|| format!("network error downloading file {id} from {url}"))?;

    fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("creating work dir {}", config.work_dir.display()))?;
    let dest = unique_destination(&config.work_dir, &file_name);
    if dest.file_name().and_then(|n| n.to_str()) != Some(file_name.as_str()) {
        wprintln!(
            config.quiet,
            "{} already exists, saving file {} as {}",
            file_name,
            id,
            dest.display()
        );
    }
    let mut tmp = tempfile::NamedTempFile::new_in(&config.work_dir)
        .with_context(|| format!("creating temp file for {file_name}"))?;
    tmp.write_all(&bytes)
        .with_context(|| format!("writing {file_name}"))?;
    tmp.persist(&dest)
        .map_err(|e| e.error)
        .with_context(|| format!("writing {}", dest.display()))?;

    vprintln!(verbose, 1, "Wrote {} ({} bytes)", dest.display(), bytes.len());
    Ok(dest)
}

#[derive(Debug, Default)]
pub struct FetchReport {
    pub identifiers: usize,
    pub archives: Vec<PathBuf>,
    pub failures: Vec<FetchFailure>,
}

/// Download every identifier listed in `list_path`, in order.
///
/// The first failure aborts the batch unless `config.keep_going` is set, in which
/// case failures are collected and the remaining identifiers still run.
pub fn download_files_from_list<A: FileApi + ?Sized>(
    api: &A,
    list_path: &Path,
    config: &Config,
) -> anyhow::Result<FetchReport> {
    let identifiers = read_identifier_list(list_path)?;
    let progress = StageProgress::new(config, "FETCH", identifiers.len());
    let mut report = FetchReport {
        identifiers: identifiers.len(),
        ..Default::default()
    };

    for raw in &identifiers {
        progress.working_on(raw);
        match download_file(api, raw, config) {
            Ok(path) => report.archives.push(path),
            Err(e) if config.keep_going => {
                progress.warn(&format!("skipping {raw}: {e:#}"));
                report.failures.push(FetchFailure {
                    identifier: raw.clone(),
                    error: format!("{e:#}"),
                });
            }
            Err(e) => {
                progress.finish();
                return Err(e);
            }
        }
        progress.inc();
    }
    progress.finish();

    vprintln!(config.effective_verbose(), 1, "File list downloaded");
    Ok(report)
}
