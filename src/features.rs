//! Audio features for songs, fetched remotely or estimated.
//!
//! [`FeatureProvider::fetch`] is total: it makes one remote attempt per call
//! (plus a single retry after re-authenticating) and otherwise falls back to
//! [`estimate_features`], which derives a seed from a SHA-256 of the song
//! identifier. The same identifier always estimates to the same vector, in any
//! process.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Mutex, PoisonError};

use crate::cluster::FeaturePoint;
use crate::error::RemoteError;
use crate::remote::{AccessToken, MetadataSource, TrackMatch};

/// File extensions stripped from identifiers before a remote search.
pub const AUDIO_EXTENSIONS: [&str; 5] = ["mp3", "wav", "ogg", "flac", "m4a"];

/// Numeric descriptors of one track.
///
/// Only `energy`, `valence` and `danceability` drive clustering; the rest is
/// carried along for callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub energy: f64,
    pub valence: f64,
    pub danceability: f64,
    /// Beats per minute.
    pub tempo: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
}

impl AudioFeatures {
    /// Projection used by the clusterer.
    #[must_use]
    pub const fn point(&self) -> FeaturePoint {
        [self.energy, self.valence, self.danceability]
    }
}

/// Why a song fell back to estimation.
#[derive(Debug, Clone, PartialEq)]
pub enum EstimateReason {
    /// No remote source was configured.
    NotConfigured,
    /// Authentication failed, so no lookup was attempted.
    Unauthenticated,
    /// The search ran but found nothing.
    NoMatch,
    /// The lookup itself failed.
    Remote(RemoteError),
}

/// Where a feature vector came from.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureOrigin {
    Remote(TrackMatch),
    Estimated(EstimateReason),
}

/// A feature vector plus its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureOutcome {
    pub features: AudioFeatures,
    pub origin: FeatureOrigin,
}

impl FeatureOutcome {
    #[must_use]
    pub const fn is_estimated(&self) -> bool {
        matches!(self.origin, FeatureOrigin::Estimated(_))
    }
}

/// Title and artist for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
    pub album_art_url: Option<String>,
}

impl TrackInfo {
    /// Parse `Artist - Title` out of a file name.
    ///
    /// # Examples
    ///
    /// ```
    /// use moodlist::features::TrackInfo;
    ///
    /// let info = TrackInfo::from_file_name("/music/Daft Punk - One More Time.mp3");
    /// assert_eq!(info.artist, "Daft Punk");
    /// assert_eq!(info.title, "One More Time");
    /// ```
    #[must_use]
    pub fn from_file_name(song: &str) -> Self {
        let name = display_name(song);
        match name.split_once(" - ") {
            Some((artist, title)) => Self {
                title: title.trim().to_string(),
                artist: artist.trim().to_string(),
                album_art_url: None,
            },
            None => Self {
                title: name.to_string(),
                artist: "Unknown Artist".to_string(),
                album_art_url: None,
            },
        }
    }
}

impl From<TrackMatch> for TrackInfo {
    fn from(track: TrackMatch) -> Self {
        Self {
            title: track.title,
            artist: track.artist,
            album_art_url: track.album_art_url,
        }
    }
}

/// Bare display name: everything after the last `/` or `\`, minus a known
/// audio extension.
///
/// # Examples
///
/// ```
/// use moodlist::features::display_name;
///
/// assert_eq!(display_name("/home/me/Music/Artist - Song.flac"), "Artist - Song");
/// assert_eq!(display_name(r"C:\Music\track.MP3"), "track");
/// assert_eq!(display_name("notes.txt"), "notes.txt");
/// ```
#[must_use]
pub fn display_name(song: &str) -> &str {
    let name = song.rsplit(&['/', '\\'][..]).next().unwrap_or(song);
    match name.rsplit_once('.') {
        Some((stem, ext)) if AUDIO_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)) => stem,
        _ => name,
    }
}

/// Stable 32-bit seed: the first four bytes of SHA-256(song), big-endian.
#[must_use]
pub fn estimation_seed(song: &str) -> u32 {
    let digest = Sha256::digest(song.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Deterministic synthetic features for a song.
///
/// Ranges: energy `[0.3, 1.0)`, valence `[0.2, 1.0)`, danceability `[0.3, 0.9)`,
/// tempo `[80, 180)`, acousticness `[0, 1)`, instrumentalness `[0, 0.5)`.
#[must_use]
pub fn estimate_features(song: &str) -> AudioFeatures {
    let mut rng = StdRng::seed_from_u64(u64::from(estimation_seed(song)));

    AudioFeatures {
        energy: rng.gen_range(0.3..1.0),
        valence: rng.gen_range(0.2..1.0),
        danceability: rng.gen_range(0.3..0.9),
        tempo: rng.gen_range(80.0..180.0),
        acousticness: rng.gen_range(0.0..1.0),
        instrumentalness: rng.gen_range(0.0..0.5),
    }
}

/// Current token plus a counter bumped on every refresh attempt.
/// Generation 0 means authentication was never tried.
#[derive(Debug, Default)]
struct Session {
    token: Option<AccessToken>,
    generation: u64,
}

/// Supplies a feature vector for any song identifier.
///
/// Holds an optional [`MetadataSource`] and the session for it. Safe to share
/// across threads: re-authentication is serialized on the session lock, and a
/// caller whose token went stale while someone else refreshed reuses the new
/// token instead of authenticating again.
pub struct FeatureProvider {
    source: Option<Box<dyn MetadataSource>>,
    session: Mutex<Session>,
}

impl FeatureProvider {
    #[must_use]
    pub fn new(source: Box<dyn MetadataSource>) -> Self {
        Self {
            source: Some(source),
            session: Mutex::new(Session::default()),
        }
    }

    /// A provider with no remote source: every song is estimated.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            source: None,
            session: Mutex::new(Session::default()),
        }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.source.is_some()
    }

    /// Authenticate now, replacing any existing token.
    ///
    /// Returns whether a token is available afterwards.
    pub fn refresh_authentication(&self) -> bool {
        let seen = self.session_snapshot().1;
        self.reauthenticate(seen).is_some()
    }

    fn session_snapshot(&self) -> (Option<AccessToken>, u64) {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        (session.token.clone(), session.generation)
    }

    /// Single-flight refresh. If the generation moved past `seen` while we
    /// waited for the lock, another caller already refreshed.
    fn reauthenticate(&self, seen: u64) -> Option<AccessToken> {
        let source = self.source.as_ref()?;
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);

        if session.generation != seen {
            debug!("Session already refreshed by another caller");
            return session.token.clone();
        }

        match source.authenticate() {
            Ok(token) => {
                info!("Authenticated with remote metadata source");
                session.token = Some(token);
                session.generation += 1;
                session.token.clone()
            }
            Err(err) => {
                warn!("Remote authentication failed: {err}");
                session.token = None;
                session.generation += 1;
                None
            }
        }
    }

    /// Token to use right now. Authenticates lazily only if no attempt has
    /// been made yet; after a failed attempt the provider stays
    /// unauthenticated until [`refresh_authentication`](Self::refresh_authentication)
    /// or an `Unauthorized` answer triggers another.
    fn current_token(&self) -> Option<(AccessToken, u64)> {
        match self.session_snapshot() {
            (Some(token), generation) => Some((token, generation)),
            (None, 0) => {
                let token = self.reauthenticate(0)?;
                Some((token, self.session_snapshot().1))
            }
            (None, _) => None,
        }
    }

    fn lookup(&self, source: &dyn MetadataSource, token: &AccessToken, song: &str) -> Result<Option<(TrackMatch, AudioFeatures)>, RemoteError> {
        let Some(track) = source.search_best_match(token, display_name(song))? else {
            return Ok(None);
        };
        let features = source.features_by_track_id(token, &track.provider_track_id)?;
        Ok(Some((track, features)))
    }

    /// Run `lookup`, re-authenticating and retrying once on `Unauthorized`.
    fn remote_lookup(&self, song: &str) -> Result<Option<(TrackMatch, AudioFeatures)>, EstimateReason> {
        let Some(source) = self.source.as_deref() else {
            return Err(EstimateReason::NotConfigured);
        };
        let Some((token, generation)) = self.current_token() else {
            return Err(EstimateReason::Unauthenticated);
        };

        match self.lookup(source, &token, song) {
            Err(RemoteError::Unauthorized) => {
                debug!("Token rejected, re-authenticating");
                let token = self
                    .reauthenticate(generation)
                    .ok_or(EstimateReason::Unauthenticated)?;
                self.lookup(source, &token, song).map_err(EstimateReason::Remote)
            }
            other => other.map_err(EstimateReason::Remote),
        }
    }

    /// Features for `song`, with provenance. Never fails.
    pub fn fetch(&self, song: &str) -> FeatureOutcome {
        let reason = match self.remote_lookup(song) {
            Ok(Some((track, features))) => {
                debug!("Found features for: {}", track.title);
                return FeatureOutcome {
                    features,
                    origin: FeatureOrigin::Remote(track),
                };
            }
            Ok(None) => EstimateReason::NoMatch,
            Err(reason) => reason,
        };

        match &reason {
            EstimateReason::Remote(err) => warn!("Error fetching audio features ({err}), estimating: {song}"),
            other => debug!("Estimating features for {song} ({other:?})"),
        }

        FeatureOutcome {
            features: estimate_features(song),
            origin: FeatureOrigin::Estimated(reason),
        }
    }

    /// Features for `song`, discarding provenance.
    pub fn get_features(&self, song: &str) -> AudioFeatures {
        self.fetch(song).features
    }

    /// Title/artist for display, from the remote best match when possible,
    /// otherwise parsed from the file name.
    pub fn track_info(&self, song: &str) -> TrackInfo {
        let Some(source) = self.source.as_deref() else {
            return TrackInfo::from_file_name(song);
        };
        let Some((token, _)) = self.current_token() else {
            return TrackInfo::from_file_name(song);
        };

        match source.search_best_match(&token, display_name(song)) {
            Ok(Some(track)) => track.into(),
            Ok(None) => TrackInfo::from_file_name(song),
            Err(err) => {
                debug!("Track search failed ({err}), using file name for {song}");
                TrackInfo::from_file_name(song)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    /// Source whose first `reject` searches answer `Unauthorized`.
    struct FlakySource {
        auth_calls: Arc<AtomicUsize>,
        search_calls: AtomicUsize,
        reject: usize,
        auth_ok: bool,
    }

    impl FlakySource {
        fn new(reject: usize, auth_ok: bool) -> (Self, Arc<AtomicUsize>) {
            let auth_calls = Arc::new(AtomicUsize::new(0));
            let source = Self {
                auth_calls: Arc::clone(&auth_calls),
                search_calls: AtomicUsize::new(0),
                reject,
                auth_ok,
            };
            (source, auth_calls)
        }
    }

    impl MetadataSource for FlakySource {
        fn authenticate(&self) -> Result<AccessToken, RemoteError> {
            let n = self.auth_calls.fetch_add(1, Ordering::SeqCst);
            if self.auth_ok {
                Ok(AccessToken::new(format!("token-{n}")))
            } else {
                Err(RemoteError::Unavailable("down".to_string()))
            }
        }

        fn search_best_match(&self, _token: &AccessToken, display_name: &str) -> Result<Option<TrackMatch>, RemoteError> {
            if self.search_calls.fetch_add(1, Ordering::SeqCst) < self.reject {
                return Err(RemoteError::Unauthorized);
            }
            if display_name.starts_with("unknown") {
                return Ok(None);
            }
            Ok(Some(TrackMatch {
                title: display_name.to_string(),
                artist: "Remote Artist".to_string(),
                provider_track_id: format!("id-{display_name}"),
                album_art_url: None,
            }))
        }

        fn features_by_track_id(&self, _token: &AccessToken, _id: &str) -> Result<AudioFeatures, RemoteError> {
            Ok(AudioFeatures {
                energy: 0.11,
                valence: 0.22,
                danceability: 0.33,
                tempo: 120.0,
                acousticness: 0.44,
                instrumentalness: 0.55,
            })
        }
    }

    #[test]
    fn test_estimation_is_deterministic() {
        let a = estimate_features("/music/Artist - Song.mp3");
        let b = estimate_features("/music/Artist - Song.mp3");
        assert_eq!(a, b);
        assert_eq!(a.energy.to_bits(), b.energy.to_bits());

        let other = estimate_features("/music/Artist - Other Song.mp3");
        assert_ne!(a, other);
    }

    #[test]
    fn test_estimation_ranges() {
        for i in 0..500 {
            let f = estimate_features(&format!("/library/track-{i}.ogg"));
            assert!((0.3..1.0).contains(&f.energy), "energy {}", f.energy);
            assert!((0.2..1.0).contains(&f.valence), "valence {}", f.valence);
            assert!((0.3..0.9).contains(&f.danceability), "danceability {}", f.danceability);
            assert!((80.0..180.0).contains(&f.tempo), "tempo {}", f.tempo);
            assert!((0.0..1.0).contains(&f.acousticness), "acousticness {}", f.acousticness);
            assert!((0.0..0.5).contains(&f.instrumentalness), "instrumentalness {}", f.instrumentalness);
        }
    }

    #[test]
    fn test_seed_is_stable() {
        // SHA-256("abc") starts with ba7816bf.
        assert_eq!(estimation_seed("abc"), 0xba78_16bf);
    }

    #[test]
    fn test_display_name_variants() {
        assert_eq!(display_name("song.mp3"), "song");
        assert_eq!(display_name("/a/b/c/Song Name.ogg"), "Song Name");
        assert_eq!(display_name(r"D:\tunes\Mixed/Path.wav"), "Path");
        assert_eq!(display_name("/a/b/dotted.name.m4a"), "dotted.name");
        assert_eq!(display_name("/a/b/no_extension"), "no_extension");
    }

    #[test]
    fn test_track_info_from_file_name() {
        let info = TrackInfo::from_file_name("Boards of Canada - Roygbiv.flac");
        assert_eq!(info.title, "Roygbiv");
        assert_eq!(info.artist, "Boards of Canada");

        let info = TrackInfo::from_file_name("/x/untitled.mp3");
        assert_eq!(info.title, "untitled");
        assert_eq!(info.artist, "Unknown Artist");
    }

    #[test]
    fn test_offline_provider_estimates() {
        let provider = FeatureProvider::offline();
        let outcome = provider.fetch("/music/a.mp3");
        assert_eq!(outcome.origin, FeatureOrigin::Estimated(EstimateReason::NotConfigured));
        assert_eq!(outcome.features, estimate_features("/music/a.mp3"));
        assert!(!provider.refresh_authentication());
    }

    #[test]
    fn test_remote_features_returned_verbatim() {
        let (source, auth_calls) = FlakySource::new(0, true);
        let provider = FeatureProvider::new(Box::new(source));
        let outcome = provider.fetch("/music/Known Song.mp3");

        assert!(!outcome.is_estimated());
        assert_eq!(outcome.features.energy, 0.11);
        assert_eq!(outcome.features.instrumentalness, 0.55);
        match outcome.origin {
            FeatureOrigin::Remote(track) => assert_eq!(track.provider_track_id, "id-Known Song"),
            other => panic!("unexpected origin {other:?}"),
        }
        assert_eq!(auth_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_match_falls_back() {
        let (source, _) = FlakySource::new(0, true);
        let provider = FeatureProvider::new(Box::new(source));
        let outcome = provider.fetch("/music/unknown thing.mp3");
        assert_eq!(outcome.origin, FeatureOrigin::Estimated(EstimateReason::NoMatch));
        assert_eq!(outcome.features, estimate_features("/music/unknown thing.mp3"));
    }

    #[test]
    fn test_unauthorized_reauthenticates_once_and_retries() {
        let (source, auth_calls) = FlakySource::new(1, true);
        let provider = FeatureProvider::new(Box::new(source));
        let outcome = provider.fetch("/music/Song.mp3");

        assert!(!outcome.is_estimated());
        assert_eq!(auth_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_repeated_unauthorized_estimates() {
        let (source, auth_calls) = FlakySource::new(usize::MAX, true);
        let provider = FeatureProvider::new(Box::new(source));
        let outcome = provider.fetch("/music/Song.mp3");

        assert_eq!(
            outcome.origin,
            FeatureOrigin::Estimated(EstimateReason::Remote(RemoteError::Unauthorized))
        );
        assert_eq!(auth_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_authentication_estimates() {
        let (source, _) = FlakySource::new(0, false);
        let provider = FeatureProvider::new(Box::new(source));
        let outcome = provider.fetch("/music/Song.mp3");
        assert_eq!(outcome.origin, FeatureOrigin::Estimated(EstimateReason::Unauthenticated));
        assert_eq!(provider.get_features("/music/Song.mp3"), estimate_features("/music/Song.mp3"));
    }

    #[test]
    fn test_failed_authentication_is_not_retried_per_song() {
        let (source, auth_calls) = FlakySource::new(0, false);
        let provider = FeatureProvider::new(Box::new(source));

        for i in 0..50 {
            let outcome = provider.fetch(&format!("/music/Song {i}.mp3"));
            assert_eq!(outcome.origin, FeatureOrigin::Estimated(EstimateReason::Unauthenticated));
        }
        assert_eq!(auth_calls.load(Ordering::SeqCst), 1);

        // An explicit refresh still tries again.
        assert!(!provider.refresh_authentication());
        assert_eq!(auth_calls.load(Ordering::SeqCst), 2);
    }

    /// Rejects the first two searches, holding each at a barrier so both
    /// callers see the same stale token before either re-authenticates.
    struct ContendedSource {
        auth_calls: AtomicUsize,
        rejected: AtomicUsize,
        barrier: Barrier,
    }

    impl MetadataSource for ContendedSource {
        fn authenticate(&self) -> Result<AccessToken, RemoteError> {
            let n = self.auth_calls.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken::new(format!("token-{n}")))
        }

        fn search_best_match(&self, _token: &AccessToken, display_name: &str) -> Result<Option<TrackMatch>, RemoteError> {
            if self.rejected.fetch_add(1, Ordering::SeqCst) < 2 {
                self.barrier.wait();
                return Err(RemoteError::Unauthorized);
            }
            Ok(Some(TrackMatch {
                title: display_name.to_string(),
                artist: "Remote Artist".to_string(),
                provider_track_id: format!("id-{display_name}"),
                album_art_url: None,
            }))
        }

        fn features_by_track_id(&self, _token: &AccessToken, _id: &str) -> Result<AudioFeatures, RemoteError> {
            Ok(estimate_features("remote"))
        }
    }

    #[test]
    fn test_concurrent_unauthorized_refreshes_once() {
        let provider = FeatureProvider::new(Box::new(ContendedSource {
            auth_calls: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            barrier: Barrier::new(2),
        }));
        assert!(provider.refresh_authentication());

        let outcomes: Vec<FeatureOutcome> = thread::scope(|scope| {
            let handles: Vec<_> = ["/music/Left.mp3", "/music/Right.mp3"]
                .into_iter()
                .map(|song| {
                    let provider = &provider;
                    scope.spawn(move || provider.fetch(song))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(outcomes.iter().all(|o| !o.is_estimated()));
        let session = provider.session.lock().unwrap();
        assert_eq!(session.generation, 2);
        assert_eq!(session.token, Some(AccessToken::new("token-1")));
    }

    #[test]
    fn test_stale_generation_skips_second_refresh() {
        let (source, auth_calls) = FlakySource::new(0, true);
        let provider = FeatureProvider::new(Box::new(source));

        assert!(provider.refresh_authentication());
        let stale = 0;
        let token = provider.reauthenticate(stale);
        assert_eq!(token, Some(AccessToken::new("token-0")));
        assert_eq!(auth_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_track_info_prefers_remote() {
        let (source, _) = FlakySource::new(0, true);
        let provider = FeatureProvider::new(Box::new(source));
        let info = provider.track_info("/music/Some Title.mp3");
        assert_eq!(info.artist, "Remote Artist");

        let offline = FeatureProvider::offline().track_info("/music/Band - Tune.mp3");
        assert_eq!(offline.artist, "Band");
    }
}
