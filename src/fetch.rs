//! Downloads URI-addressed resources into the temporary space.

use crate::{
    digest::Digest,
    error::{PmpError, Result},
    tempspace::TempSpace,
};
use once_cell::sync::OnceCell;
use reqwest::{blocking::Client, redirect::Policy, StatusCode};
use sha1::{Digest as _, Sha1};
use std::{fs, path::PathBuf, time::Duration};
use url::Url;

/// Sent with every request so that mirrors can identify the tool.
const USER_AGENT: &str = concat!("pmp-core/", env!("CARGO_PKG_VERSION"));

const TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: usize = 5;

/// Resolves `file://` and `http(s)://` URIs into local paths, caching
/// downloads under `<temp>/uri/<scheme>/`.
pub struct UriFetcher<'a> {
    space: &'a TempSpace,
    client: OnceCell<Client>,
}

impl<'a> UriFetcher<'a> {
    pub fn new(space: &'a TempSpace) -> Self {
        Self { space, client: OnceCell::new() }
    }

    /// Fetches `uri` and returns the local path holding its content, or
    /// `None` when the remote reports the resource as absent.
    ///
    /// `file://` URIs are validated and returned directly without copying.
    /// When `digest` is given the fetched content is verified before the
    /// path is handed out.
    pub fn fetch(
        &self,
        uri: &Url,
        extension: &str,
        digest: Option<&Digest>,
    ) -> Result<Option<PathBuf>> {
        let path = match uri.scheme() {
            "file" => {
                let path = uri
                    .to_file_path()
                    .map_err(|()| PmpError::Fetch {
                        uri: uri.to_string(),
                        reason: "not a local file path".to_string(),
                    })?;
                if !path.exists() {
                    debug!(uri = %uri, "local resource does not exist");
                    return Ok(None);
                }
                path
            }
            "http" | "https" => match self.download(uri, extension)? {
                Some(path) => path,
                None => return Ok(None),
            },
            other => return Err(PmpError::UnsupportedScheme(other.to_string())),
        };

        if let Some(digest) = digest {
            digest.verify(&path)?;
        }
        Ok(Some(path))
    }

    fn download(&self, uri: &Url, extension: &str) -> Result<Option<PathBuf>> {
        let target = self.space.dir(format!("uri/{}", uri.scheme()))?.join(local_name(uri, extension));
        if target.is_file() {
            trace!(uri = %uri, path = %target.display(), "reusing previously fetched resource");
            return Ok(Some(target));
        }

        let fetch_err = |reason: String| PmpError::Fetch { uri: uri.to_string(), reason };

        debug!(uri = %uri, "fetching resource");
        let client = self.client.get_or_try_init(|| {
            Client::builder()
                .user_agent(USER_AGENT)
                .connect_timeout(TIMEOUT)
                .timeout(TIMEOUT)
                .redirect(Policy::limited(MAX_REDIRECTS))
                .build()
                .map_err(|err| fetch_err(err.to_string()))
        })?;

        let mut response =
            client.get(uri.clone()).send().map_err(|err| fetch_err(err.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(uri = %uri, "resource not found");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(fetch_err(format!("status code {}", response.status())));
        }

        let mut file = fs::File::create(&target).map_err(|err| PmpError::io(err, &target))?;
        let bytes =
            response.copy_to(&mut file).map_err(|err| fetch_err(err.to_string()))?;
        debug!(uri = %uri, bytes, path = %target.display(), "fetched resource");
        Ok(Some(target))
    }
}

/// File name for the local copy: `<basename>-<sha1(uri)>.<extension>`, so
/// distinct URIs with the same basename never collide.
fn local_name(uri: &Url, extension: &str) -> String {
    let basename = uri
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("resource");
    let stem = basename.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(basename);
    let hash = hex::encode(Sha1::digest(uri.as_str().as_bytes()));
    format!("{stem}-{hash}.{extension}")
}
