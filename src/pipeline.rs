//! # Classification Pipeline
//!
//! Turns a batch of song identifiers into a [`MoodGrouping`]:
//!
//! 1. Optionally refresh remote authentication once.
//! 2. Fetch features for every song, sequentially, in input order.
//! 3. Cluster the `(energy, valence, danceability)` projection with `k = min(4, n)`.
//! 4. Map each centroid to a mood.
//! 5. Append every song to its cluster's mood bucket, preserving input order.
//!
//! Per-song fetch problems never abort a batch; they degrade to estimation.
//! A clustering failure aborts the whole batch with
//! [`ClassifyError::ClassificationFailed`].
//!
//! ## Progress
//!
//! Lifecycle events go to a [`ProgressObserver`]. Closures and
//! `std::sync::mpsc::Sender<ProgressEvent>` both implement it, so the caller
//! decides which thread sees the updates:
//!
//! ```no_run
//! use moodlist::pipeline::{spawn_classification, ClassificationPipeline, ProgressEvent};
//! use std::sync::{mpsc, Arc};
//!
//! let pipeline = Arc::new(ClassificationPipeline::offline());
//! let (tx, rx) = mpsc::channel();
//! let worker = spawn_classification(pipeline, vec!["/music/a.mp3".into()], tx, None);
//!
//! for event in rx {
//!     if let ProgressEvent::Completed(grouping) = event {
//!         println!("{} songs classified", grouping.total());
//!     }
//! }
//! let _ = worker.join();
//! ```

use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::cluster::{cluster_count, Clusterer, FeaturePoint, KMeans, KMeansConfig};
use crate::error::ClassifyError;
use crate::features::{FeatureOutcome, FeatureProvider};
use crate::mood::{assign_moods, MoodGrouping};

/// Lifecycle notifications, emitted in order:
/// `Started`, one `FetchingFeatures` per song, `Clustering`, then exactly one
/// of `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started { total: usize },
    FetchingFeatures { index: usize, total: usize, song: String },
    Clustering { k: usize },
    Completed(MoodGrouping),
    Failed { reason: String },
}

/// Receives [`ProgressEvent`]s.
pub trait ProgressObserver {
    fn notify(&self, event: ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(ProgressEvent),
{
    fn notify(&self, event: ProgressEvent) {
        self(event);
    }
}

impl ProgressObserver for Sender<ProgressEvent> {
    fn notify(&self, event: ProgressEvent) {
        // A receiver that hung up just stops listening.
        let _ = self.send(event);
    }
}

/// Observer that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl ProgressObserver for Silent {
    fn notify(&self, _event: ProgressEvent) {}
}

/// Shared flag checked between songs and before clustering.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Diagnostics from one run, alongside the grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub grouping: MoodGrouping,
    /// Songs whose features were estimated rather than fetched.
    pub estimated: usize,
    /// Cluster count actually used.
    pub k: usize,
}

/// Feature provider + clusterer, ready to classify batches.
///
/// Holds no per-run state; each call to [`classify`](Self::classify) is
/// independent and the pipeline can be shared behind an `Arc`.
pub struct ClassificationPipeline {
    provider: FeatureProvider,
    clusterer: Box<dyn Clusterer>,
    refresh_auth_at_start: bool,
}

impl ClassificationPipeline {
    #[must_use]
    pub fn new(provider: FeatureProvider, clusterer: Box<dyn Clusterer>) -> Self {
        Self {
            provider,
            clusterer,
            refresh_auth_at_start: true,
        }
    }

    /// Estimation-only pipeline with default k-means.
    #[must_use]
    pub fn offline() -> Self {
        Self::new(FeatureProvider::offline(), Box::new(KMeans::new(KMeansConfig::default())))
    }

    /// Whether to re-authenticate once before fetching features. On by default.
    #[must_use]
    pub fn with_refresh_auth_at_start(mut self, refresh: bool) -> Self {
        self.refresh_auth_at_start = refresh;
        self
    }

    #[must_use]
    pub fn provider(&self) -> &FeatureProvider {
        &self.provider
    }

    /// Classify without progress reporting or cancellation.
    ///
    /// # Errors
    ///
    /// [`ClassifyError::EmptyBatch`] for an empty input,
    /// [`ClassifyError::ClassificationFailed`] if clustering fails.
    pub fn classify<S: AsRef<str>>(&self, songs: &[S]) -> Result<MoodGrouping, ClassifyError> {
        self.classify_with(songs, &Silent, None).map(|report| report.grouping)
    }

    /// Classify, reporting progress to `observer` and honouring `cancel`.
    ///
    /// `Failed` is emitted for every error, including cancellation.
    ///
    /// # Errors
    ///
    /// See [`classify`](Self::classify); additionally
    /// [`ClassifyError::Cancelled`] if `cancel` fires.
    pub fn classify_with<S: AsRef<str>>(
        &self,
        songs: &[S],
        observer: &dyn ProgressObserver,
        cancel: Option<&CancelToken>,
    ) -> Result<ClassificationReport, ClassifyError> {
        if songs.is_empty() {
            return Err(ClassifyError::EmptyBatch);
        }

        let result = self.run(songs, observer, cancel);
        match &result {
            Ok(report) => observer.notify(ProgressEvent::Completed(report.grouping.clone())),
            Err(err) => observer.notify(ProgressEvent::Failed { reason: err.to_string() }),
        }
        result
    }

    fn run<S: AsRef<str>>(
        &self,
        songs: &[S],
        observer: &dyn ProgressObserver,
        cancel: Option<&CancelToken>,
    ) -> Result<ClassificationReport, ClassifyError> {
        let total = songs.len();
        let cancelled = || cancel.is_some_and(CancelToken::is_cancelled);

        observer.notify(ProgressEvent::Started { total });
        info!("Classifying {total} songs");

        if self.refresh_auth_at_start && self.provider.is_configured() {
            self.provider.refresh_authentication();
        }

        let mut outcomes: Vec<FeatureOutcome> = Vec::with_capacity(total);
        for (index, song) in songs.iter().enumerate() {
            if cancelled() {
                return Err(ClassifyError::Cancelled);
            }
            let song = song.as_ref();
            observer.notify(ProgressEvent::FetchingFeatures {
                index,
                total,
                song: song.to_string(),
            });
            outcomes.push(self.provider.fetch(song));
        }

        let estimated = outcomes.iter().filter(|o| o.is_estimated()).count();
        debug!("{estimated} of {total} feature vectors were estimated");

        if cancelled() {
            return Err(ClassifyError::Cancelled);
        }

        let k = cluster_count(total);
        observer.notify(ProgressEvent::Clustering { k });
        let points: Vec<FeaturePoint> = outcomes.iter().map(|o| o.features.point()).collect();
        let clustering = self.clusterer.cluster(&points, k)?;
        clustering.validate(total, k)?;

        let moods = assign_moods(&clustering.centroids);
        let mut grouping = MoodGrouping::new();
        for (song, &cluster) in songs.iter().zip(&clustering.assignments) {
            grouping.push(moods[cluster], song.as_ref());
        }

        for (mood, bucket) in grouping.iter() {
            info!("  {mood}: {} songs", bucket.len());
        }

        Ok(ClassificationReport { grouping, estimated, k })
    }
}

/// Run a classification on a worker thread, streaming progress through `tx`.
///
/// The returned handle yields the same result the pipeline produced; the
/// channel also receives it as `Completed` or `Failed`. An empty batch is
/// reported as `Failed` too.
pub fn spawn_classification(
    pipeline: Arc<ClassificationPipeline>,
    songs: Vec<String>,
    tx: Sender<ProgressEvent>,
    cancel: Option<CancelToken>,
) -> JoinHandle<Result<ClassificationReport, ClassifyError>> {
    thread::spawn(move || {
        let result = pipeline.classify_with(&songs, &tx, cancel.as_ref());
        if let Err(ClassifyError::EmptyBatch) = &result {
            tx.notify(ProgressEvent::Failed {
                reason: ClassifyError::EmptyBatch.to_string(),
            });
        }
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterError;
    use crate::mood::Mood;
    use std::sync::mpsc;
    use std::sync::Mutex;

    struct BrokenClusterer;

    impl Clusterer for BrokenClusterer {
        fn cluster(&self, _points: &[FeaturePoint], _k: usize) -> Result<crate::cluster::Clustering, ClusterError> {
            Err(ClusterError::Other("injected fault".to_string()))
        }
    }

    /// Records the `k` it was called with, then delegates to seeded k-means.
    struct RecordingClusterer {
        seen_k: Arc<Mutex<Vec<usize>>>,
    }

    impl Clusterer for RecordingClusterer {
        fn cluster(&self, points: &[FeaturePoint], k: usize) -> Result<crate::cluster::Clustering, ClusterError> {
            self.seen_k.lock().unwrap().push(k);
            KMeans::new(KMeansConfig::default().with_seed(11)).cluster(points, k)
        }
    }

    /// Returns a fixed, deliberately inconsistent clustering.
    struct CannedClusterer {
        assignments: fn(usize, usize) -> Vec<usize>,
        centroids: fn(usize) -> usize,
    }

    impl Clusterer for CannedClusterer {
        fn cluster(&self, points: &[FeaturePoint], k: usize) -> Result<crate::cluster::Clustering, ClusterError> {
            Ok(crate::cluster::Clustering {
                assignments: (self.assignments)(points.len(), k),
                centroids: vec![[0.5; 3]; (self.centroids)(k)],
                iterations: 1,
            })
        }
    }

    fn classify_canned(clusterer: CannedClusterer) -> Result<MoodGrouping, ClassifyError> {
        let pipeline = ClassificationPipeline::new(FeatureProvider::offline(), Box::new(clusterer));
        pipeline.classify(&songs(5))
    }

    fn songs(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("/music/artist {}/track {i}.mp3", i % 3)).collect()
    }

    #[test]
    fn test_empty_batch_is_an_error() {
        let pipeline = ClassificationPipeline::offline();
        let empty: Vec<String> = Vec::new();
        assert!(matches!(pipeline.classify(&empty), Err(ClassifyError::EmptyBatch)));
    }

    #[test]
    fn test_every_song_lands_in_exactly_one_bucket() {
        let pipeline = ClassificationPipeline::offline();
        let input = songs(23);
        let grouping = pipeline.classify(&input).unwrap();

        assert_eq!(grouping.total(), input.len());
        for song in &input {
            let hits = grouping.iter().filter(|(_, bucket)| bucket.contains(song)).count();
            assert_eq!(hits, 1, "{song} should be in exactly one bucket");
        }

        // Order inside each bucket follows input order.
        for (_, bucket) in grouping.iter() {
            let positions: Vec<usize> = bucket
                .iter()
                .map(|s| input.iter().position(|i| i == s).unwrap())
                .collect();
            assert!(positions.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_all_moods_present_in_output() {
        let grouping = ClassificationPipeline::offline().classify(&songs(1)).unwrap();
        assert_eq!(grouping.iter().count(), Mood::ALL.len());
        assert_eq!(grouping.non_empty().count(), 1);
    }

    #[test]
    fn test_k_is_min_of_four_and_batch_size() {
        let seen_k = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ClassificationPipeline::new(
            FeatureProvider::offline(),
            Box::new(RecordingClusterer { seen_k: Arc::clone(&seen_k) }),
        );

        pipeline.classify(&songs(2)).unwrap();
        pipeline.classify(&songs(4)).unwrap();
        pipeline.classify(&songs(9)).unwrap();

        assert_eq!(*seen_k.lock().unwrap(), vec![2, 4, 4]);
    }

    #[test]
    fn test_clustering_fault_aborts_batch() {
        let pipeline = ClassificationPipeline::new(FeatureProvider::offline(), Box::new(BrokenClusterer));
        let err = pipeline.classify(&songs(5)).unwrap_err();

        match err {
            ClassifyError::ClassificationFailed { source } => {
                assert_eq!(source, ClusterError::Other("injected fault".to_string()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_progress_events_in_order() {
        let events = Mutex::new(Vec::new());
        let observer = |event: ProgressEvent| events.lock().unwrap().push(event);

        let pipeline = ClassificationPipeline::offline();
        let report = pipeline.classify_with(&songs(3), &observer, None).unwrap();
        assert_eq!(report.estimated, 3);
        assert_eq!(report.k, 3);

        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 6);
        assert_eq!(events[0], ProgressEvent::Started { total: 3 });
        assert!(matches!(events[1], ProgressEvent::FetchingFeatures { index: 0, total: 3, .. }));
        assert!(matches!(events[3], ProgressEvent::FetchingFeatures { index: 2, .. }));
        assert_eq!(events[4], ProgressEvent::Clustering { k: 3 });
        assert_eq!(events[5], ProgressEvent::Completed(report.grouping));
    }

    #[test]
    fn test_failure_event_reported() {
        let (tx, rx) = mpsc::channel();
        let pipeline = ClassificationPipeline::new(FeatureProvider::offline(), Box::new(BrokenClusterer));
        assert!(pipeline.classify_with(&songs(2), &tx, None).is_err());
        drop(tx);

        let last = rx.iter().last().unwrap();
        assert!(matches!(last, ProgressEvent::Failed { ref reason } if reason.contains("injected fault")));
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let pipeline = ClassificationPipeline::offline();
        let result = pipeline.classify_with(&songs(4), &Silent, Some(&cancel));
        assert!(matches!(result, Err(ClassifyError::Cancelled)));
    }

    #[test]
    fn test_cancel_mid_batch() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let observer = move |event: ProgressEvent| {
            if let ProgressEvent::FetchingFeatures { index: 1, .. } = event {
                trigger.cancel();
            }
        };

        let pipeline = ClassificationPipeline::offline();
        let result = pipeline.classify_with(&songs(6), &observer, Some(&cancel));
        assert!(matches!(result, Err(ClassifyError::Cancelled)));
    }

    #[test]
    fn test_spawned_worker_streams_events() {
        let pipeline = Arc::new(ClassificationPipeline::offline());
        let (tx, rx) = mpsc::channel();
        let handle = spawn_classification(pipeline, songs(5), tx, None);

        let events: Vec<ProgressEvent> = rx.iter().collect();
        let report = handle.join().unwrap().unwrap();

        assert_eq!(events.first(), Some(&ProgressEvent::Started { total: 5 }));
        assert_eq!(events.last(), Some(&ProgressEvent::Completed(report.grouping)));
    }

    #[test]
    fn test_spawned_empty_batch_reports_failure() {
        let pipeline = Arc::new(ClassificationPipeline::offline());
        let (tx, rx) = mpsc::channel();
        let handle = spawn_classification(pipeline, Vec::new(), tx, None);

        let events: Vec<ProgressEvent> = rx.iter().collect();
        assert!(matches!(handle.join().unwrap(), Err(ClassifyError::EmptyBatch)));
        assert_eq!(
            events,
            vec![ProgressEvent::Failed { reason: "no songs to classify".to_string() }]
        );
    }

    #[test]
    fn test_short_assignments_fail_instead_of_dropping_songs() {
        let result = classify_canned(CannedClusterer {
            assignments: |n, _| vec![0; n - 1],
            centroids: |k| k,
        });
        assert!(matches!(
            result,
            Err(ClassifyError::ClassificationFailed { source: ClusterError::MalformedOutput(_) })
        ));
    }

    #[test]
    fn test_out_of_range_assignment_fails_without_panic() {
        let result = classify_canned(CannedClusterer {
            assignments: |n, k| vec![k; n],
            centroids: |k| k,
        });
        assert!(matches!(
            result,
            Err(ClassifyError::ClassificationFailed { source: ClusterError::MalformedOutput(_) })
        ));
    }

    #[test]
    fn test_wrong_centroid_count_fails() {
        let result = classify_canned(CannedClusterer {
            assignments: |n, _| vec![0; n],
            centroids: |k| k - 1,
        });
        assert!(matches!(
            result,
            Err(ClassifyError::ClassificationFailed { source: ClusterError::MalformedOutput(_) })
        ));
    }
}
