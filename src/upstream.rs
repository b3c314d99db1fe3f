//! The upstream radio service, as consumed by the bridge.
//!
//! Talking to the radio service itself is left to an implementation of
//! [`StationSource`]; the bridge only relies on the four operations below.
//! Every call is made with a deadline, see [`with_deadline`].

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use url::Url;

use crate::{
    config::{BandFilter, Credentials},
    error::{Error, Result},
    tokens::SessionToken,
    track::{Station, StationId, Track},
};

#[async_trait]
pub trait StationSource: Send + Sync {
    /// Logs in and returns a session token, replacing any previous one.
    async fn authenticate(&self, credentials: &Credentials) -> Result<SessionToken>;

    /// Lists the user's stations. Station ids are stable for the lifetime of
    /// the returned catalog.
    async fn list_stations(&self) -> Result<Vec<Station>>;

    /// Fetches up to `max_count` new playable tracks for a station, leaving
    /// out artists excluded by `band_filter`.
    async fn fetch_tracks(
        &self,
        station_id: StationId,
        max_count: usize,
        band_filter: &BandFilter,
    ) -> Result<Vec<Track>>;

    /// Rates a track. `thumbs_down` is negative feedback.
    async fn send_feedback(&self, track_token: &str, thumbs_down: bool) -> Result<()>;
}

/// Runs an upstream call, reporting a timeout as `DeadlineExceeded` instead
/// of waiting forever.
///
/// # Errors
///
/// Returns the call's own error, or `DeadlineExceeded` when `timeout`
/// elapsed first.
pub async fn with_deadline<T, F>(timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, call).await?
}

/// Rewrites the host of a stream address to one of its IP addresses.
///
/// Some proxies answer stream requests with a redirect that the playback
/// daemon does not follow; asking for the address by IP avoids that.
///
/// # Errors
///
/// Returns an error when the address has no host or the host does not
/// resolve.
pub async fn resolve_stream_host(url: &Url) -> Result<Url> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::invalid_argument(format!("{url} has no host")))?;
    let port = url.port_or_known_default().unwrap_or(80);

    let address = tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| Error::not_found(format!("{host} does not resolve")))?;

    let mut resolved = url.clone();
    resolved
        .set_ip_host(address.ip())
        .map_err(|()| Error::invalid_argument(format!("cannot address {url} by ip")))?;

    Ok(resolved)
}
