//! HTTP retrieval of remote JWKS documents.

use std::{path::Path, time::Duration};

use reqwest::{Client, StatusCode, header};

use crate::{
    error::{BundleError, BundleResult},
    key::Jwks,
};

/// Default timeout for a single JWKS fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a conditional JWKS fetch.
#[derive(Debug)]
pub(crate) enum Fetched {
    /// The server confirmed the cached copy is current (HTTP 304).
    NotModified,
    /// A new document, with the validator to send on the next request.
    Jwks { jwks: Jwks, etag: Option<String> },
}

/// Builds the HTTP client used for one remote source.
///
/// `verify_ssl = false` disables certificate validation entirely; a
/// `ca_certs` file adds a PEM root certificate (or bundle) on top of the
/// built-in roots.
pub(crate) fn build_client(
    verify_ssl: bool,
    ca_certs: Option<&Path>,
    timeout: Duration,
) -> BundleResult<Client> {
    let mut builder = Client::builder().timeout(timeout);

    if !verify_ssl {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(path) = ca_certs {
        let pem =
            std::fs::read(path).map_err(|e| BundleError::io(path.display().to_string(), e))?;
        let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
            BundleError::configuration(format!("invalid CA bundle '{}': {e}", path.display()))
        })?;
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }

    builder
        .build()
        .map_err(|e| BundleError::configuration(format!("failed to create HTTP client: {e}")))
}

/// Fetches a JWKS document, revalidating against `etag` when one is known.
///
/// # Errors
///
/// - [`BundleError::Http`] if the request could not be completed
/// - [`BundleError::RemoteUpdate`] on any status other than 200 or 304
/// - [`BundleError::MalformedJwks`] if the body is not a JWKS
#[tracing::instrument(skip(client, etag))]
pub(crate) async fn fetch_jwks(
    client: &Client,
    url: &str,
    etag: Option<&str>,
) -> BundleResult<Fetched> {
    let mut request = client.get(url).header(header::ACCEPT, "application/json");
    if let Some(etag) = etag {
        request = request.header(header::IF_NONE_MATCH, etag);
    }

    let response = request.send().await.map_err(|e| BundleError::http(url, e))?;
    let status = response.status();

    if status == StatusCode::NOT_MODIFIED {
        tracing::debug!(url = %url, "JWKS not modified");
        return Ok(Fetched::NotModified);
    }
    if status != StatusCode::OK {
        tracing::warn!(url = %url, status = status.as_u16(), "JWKS fetch failed");
        return Err(BundleError::remote_update(url, status.as_u16()));
    }

    let etag = response
        .headers()
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let body = response.bytes().await.map_err(|e| BundleError::http(url, e))?;
    let value: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(url = %url, error = %e, "JWKS response is not JSON");
        BundleError::malformed_jwks(url)
    })?;
    let jwks = Jwks::from_value(&value).map_err(|e| {
        tracing::warn!(url = %url, error = %e, "JWKS response is not a key set");
        BundleError::malformed_jwks(url)
    })?;

    tracing::debug!(url = %url, keys = jwks.len(), "Fetched JWKS");
    Ok(Fetched::Jwks { jwks, etag })
}
