//! Remote metadata source: the contract and a Spotify Web API client.
//!
//! Callers never hold a global token. [`MetadataSource::authenticate`] hands
//! out an [`AccessToken`] and every lookup takes that token explicitly; the
//! [`FeatureProvider`](crate::features::FeatureProvider) owns the session.
//!
//! Rate limited to one request per [`MIN_REQUEST_INTERVAL`].

use log::{debug, trace};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::RemoteError;
use crate::features::AudioFeatures;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);

/// Bearer token issued by [`MetadataSource::authenticate`].
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keep the secret out of logs.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Best search hit for a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMatch {
    pub title: String,
    pub artist: String,
    pub provider_track_id: String,
    pub album_art_url: Option<String>,
}

/// Where audio features and track metadata come from.
///
/// Implementations may block on network I/O. Every failure is reported as a
/// [`RemoteError`]; authorization problems must be reported as
/// [`RemoteError::Unauthorized`] so the caller knows to re-authenticate.
pub trait MetadataSource: Send + Sync {
    /// Obtain a fresh access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials are rejected or the service is unreachable.
    fn authenticate(&self) -> Result<AccessToken, RemoteError>;

    /// Top-1 track search. `Ok(None)` means the query ran but nothing matched.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the token is rejected.
    fn search_best_match(&self, token: &AccessToken, display_name: &str) -> Result<Option<TrackMatch>, RemoteError>;

    /// The provider's own feature set for a track it returned from a search.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the token is rejected.
    fn features_by_track_id(&self, token: &AccessToken, provider_track_id: &str) -> Result<AudioFeatures, RemoteError>;
}

/// Client credentials for the Spotify Web API.
#[derive(Clone, PartialEq, Eq)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for SpotifyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpotifyCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

/// Blocking Spotify Web API client using the client-credentials flow.
pub struct SpotifyClient {
    client: Client,
    credentials: SpotifyCredentials,
    last_request: Mutex<Instant>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    tracks: Option<TrackPage>,
}

#[derive(Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<SpotifyTrack>,
}

#[derive(Deserialize)]
struct SpotifyTrack {
    id: String,
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    album: Option<SpotifyAlbum>,
}

#[derive(Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Deserialize)]
struct SpotifyAlbum {
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

#[derive(Deserialize)]
struct SpotifyImage {
    url: String,
}

#[derive(Deserialize)]
struct AudioFeaturesResponse {
    energy: f64,
    valence: f64,
    danceability: f64,
    tempo: f64,
    acousticness: f64,
    instrumentalness: f64,
}

impl From<SpotifyTrack> for TrackMatch {
    fn from(track: SpotifyTrack) -> Self {
        let artist = track
            .artists
            .into_iter()
            .next()
            .map_or_else(|| "Unknown Artist".to_string(), |a| a.name);
        let album_art_url = track
            .album
            .and_then(|album| album.images.into_iter().next())
            .map(|image| image.url);

        Self {
            title: track.name,
            artist,
            provider_track_id: track.id,
            album_art_url,
        }
    }
}

impl SpotifyClient {
    /// Build a client. No network traffic happens until the first call.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(credentials: SpotifyCredentials) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            credentials,
            last_request: Mutex::new(Instant::now().checked_sub(MIN_REQUEST_INTERVAL).unwrap_or_else(Instant::now)),
        })
    }

    fn rate_limit(&self) {
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let elapsed = last.elapsed();
        if elapsed < MIN_REQUEST_INTERVAL {
            std::thread::sleep(MIN_REQUEST_INTERVAL - elapsed);
        }
        *last = Instant::now();
    }

    /// Map a non-success HTTP status onto the error taxonomy.
    fn check_status(response: Response) -> Result<Response, RemoteError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteError::Unauthorized),
            status => Err(RemoteError::Unavailable(format!("HTTP {status}"))),
        }
    }
}

impl MetadataSource for SpotifyClient {
    fn authenticate(&self) -> Result<AccessToken, RemoteError> {
        self.rate_limit();
        debug!("Requesting Spotify access token");

        let response = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()?;

        let body: TokenResponse = Self::check_status(response)?.json()?;
        Ok(AccessToken::new(body.access_token))
    }

    fn search_best_match(&self, token: &AccessToken, display_name: &str) -> Result<Option<TrackMatch>, RemoteError> {
        self.rate_limit();
        trace!("Searching Spotify for `{display_name}'");

        let response = self
            .client
            .get(format!("{API_BASE}/search"))
            .bearer_auth(token.as_str())
            .query(&[("q", display_name), ("type", "track"), ("limit", "1")])
            .send()?;

        let body: SearchResponse = Self::check_status(response)?.json()?;
        Ok(body
            .tracks
            .and_then(|page| page.items.into_iter().next())
            .map(TrackMatch::from))
    }

    fn features_by_track_id(&self, token: &AccessToken, provider_track_id: &str) -> Result<AudioFeatures, RemoteError> {
        self.rate_limit();
        trace!("Fetching Spotify audio features for {provider_track_id}");

        let response = self
            .client
            .get(format!("{API_BASE}/audio-features/{provider_track_id}"))
            .bearer_auth(token.as_str())
            .send()?;

        let f: AudioFeaturesResponse = Self::check_status(response)?.json()?;
        Ok(AudioFeatures {
            energy: f.energy,
            valence: f.valence,
            danceability: f.danceability,
            tempo: f.tempo,
            acousticness: f.acousticness,
            instrumentalness: f.instrumentalness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_match_from_search_item() {
        let body = r#"{
            "tracks": {
                "items": [{
                    "id": "4uLU6hMCjMI75M1A2tKUQC",
                    "name": "Never Gonna Give You Up",
                    "artists": [{"name": "Rick Astley"}, {"name": "Someone Else"}],
                    "album": {"images": [{"url": "https://i.scdn.co/image/a"}, {"url": "https://i.scdn.co/image/b"}]}
                }]
            }
        }"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        let track = parsed.tracks.and_then(|p| p.items.into_iter().next()).map(TrackMatch::from).unwrap();

        assert_eq!(track.title, "Never Gonna Give You Up");
        assert_eq!(track.artist, "Rick Astley");
        assert_eq!(track.provider_track_id, "4uLU6hMCjMI75M1A2tKUQC");
        assert_eq!(track.album_art_url.as_deref(), Some("https://i.scdn.co/image/a"));
    }

    #[test]
    fn test_track_without_artist_or_art() {
        let body = r#"{"tracks": {"items": [{"id": "x", "name": "Loose Track", "artists": []}]}}"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        let track = TrackMatch::from(parsed.tracks.unwrap().items.remove(0));

        assert_eq!(track.artist, "Unknown Artist");
        assert!(track.album_art_url.is_none());
    }

    #[test]
    fn test_empty_search_page() {
        let parsed: SearchResponse = serde_json::from_str(r#"{"tracks": {"items": []}}"#).unwrap();
        assert!(parsed.tracks.and_then(|p| p.items.into_iter().next()).is_none());
    }

    #[test]
    fn test_secrets_are_not_printed() {
        let token = AccessToken::new("very-secret");
        assert!(!format!("{token:?}").contains("very-secret"));

        let credentials = SpotifyCredentials {
            client_id: "id".to_string(),
            client_secret: "hunter2".to_string(),
        };
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }
}
