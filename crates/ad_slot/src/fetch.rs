use anyhow::{Error, Result, anyhow};
use bytes::Bytes;
use futures::FutureExt as _;
use futures::future::LocalBoxFuture;
use reqwest::get as reqwest_get;
use tokio::fs::read as tokio_fs_read;
use tokio_stream::{Stream, StreamExt as _, once};
use url::Url;

/// Source of external script text.
pub trait ScriptFetcher {
    /// Fetch the script at `url` as text.
    ///
    /// The returned future must not borrow the fetcher; it is polled from a
    /// spawned task that may outlive the call.
    fn fetch(&self, url: &Url) -> LocalBoxFuture<'static, Result<String>>;
}

/// Fetches scripts over the network or from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkFetcher;

impl ScriptFetcher for NetworkFetcher {
    fn fetch(&self, url: &Url) -> LocalBoxFuture<'static, Result<String>> {
        let url = url.clone();
        async move {
            let mut stream = stream_url(&url).await?;
            let mut body = Vec::new();
            while let Some(chunk) = stream.next().await {
                body.extend_from_slice(&chunk?);
            }
            String::from_utf8(body).map_err(|err| anyhow!("Script at {url} is not valid UTF-8: {err}"))
        }
        .boxed_local()
    }
}

/// Creates a byte stream from a URL.
///
/// Supported URL schemes:
/// - `http`, `https`: Fetched via `reqwest` as a streaming response
/// - `file`: Read from the local filesystem (emitted as a single chunk)
///
/// # Errors
///
/// - Returns `Err` if the URL scheme is unsupported
/// - Returns `Err` if HTTP fetch fails or returns a non-success status
/// - Returns `Err` if the file path is invalid or the file cannot be read
pub async fn stream_url(url: &Url) -> Result<Box<dyn Stream<Item = Result<Bytes, Error>> + Send + Unpin>, Error> {
    Ok(match url.scheme() {
        "http" | "https" => {
            let response = reqwest_get(url.clone())
                .await
                .map_err(|err| anyhow!("Failed to fetch URL {url}: {err}"))?;

            if !response.status().is_success() {
                return Err(anyhow!(
                    "Failed to fetch URL: {} (Status: {})",
                    url,
                    response.status()
                ));
            }
            let stream = response.bytes_stream().map(|res| res.map_err(Error::from));
            Box::new(stream)
        }
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|()| anyhow!("Invalid file path for file url: {url}"))?;
            let data = tokio_fs_read(path).await.map(Bytes::from)?;
            Box::new(once(Ok::<Bytes, Error>(data)))
        }
        _ => return Err(anyhow!("Unsupported url scheme {}", url.scheme())),
    })
}
