//! Mood categories and the centroid-to-mood scoring heuristic.
//!
//! Each cluster centroid is an `(energy, valence, danceability)` triple. Four
//! linear scores are computed for it and the highest one wins:
//!
//! ```text
//! energetic   = 0.6·e + 0.4·d
//! calm        = 0.7·(1−e) + 0.3·(1−d)
//! happy       = 0.7·v + 0.3·e
//! melancholic = 0.8·(1−v) + 0.2·(1−e)
//! ```
//!
//! Candidates are evaluated in [`Mood::ALL`] order and only a strictly greater
//! score replaces the current best, so exact ties keep the earlier mood.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::cluster::Centroid;

/// One of the four fixed output categories.
///
/// The declaration order is the tie-break order and also the `Ord` order, so a
/// `BTreeMap<Mood, _>` iterates moods the same way the assigner evaluates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mood {
    Energetic,
    Calm,
    Happy,
    Melancholic,
}

impl Mood {
    /// Every mood, in tie-break order.
    pub const ALL: [Mood; 4] = [Mood::Energetic, Mood::Calm, Mood::Happy, Mood::Melancholic];

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Mood::Energetic => "Energetic",
            Mood::Calm => "Calm",
            Mood::Happy => "Happy",
            Mood::Melancholic => "Melancholic",
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Mood::Energetic => "High energy, upbeat songs",
            Mood::Calm => "Relaxing, peaceful songs",
            Mood::Happy => "Cheerful, positive songs",
            Mood::Melancholic => "Sad, emotional songs",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// The four scores computed for a single centroid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoodScores {
    pub energetic: f64,
    pub calm: f64,
    pub happy: f64,
    pub melancholic: f64,
}

impl MoodScores {
    /// Score a centroid.
    #[must_use]
    pub fn from_centroid(centroid: &Centroid) -> Self {
        let [energy, valence, danceability] = *centroid;
        Self {
            energetic: 0.6 * energy + 0.4 * danceability,
            calm: 0.7 * (1.0 - energy) + 0.3 * (1.0 - danceability),
            happy: 0.7 * valence + 0.3 * energy,
            melancholic: 0.8 * (1.0 - valence) + 0.2 * (1.0 - energy),
        }
    }

    #[must_use]
    pub const fn score(&self, mood: Mood) -> f64 {
        match mood {
            Mood::Energetic => self.energetic,
            Mood::Calm => self.calm,
            Mood::Happy => self.happy,
            Mood::Melancholic => self.melancholic,
        }
    }

    /// The winning mood: first strict maximum in [`Mood::ALL`] order.
    #[must_use]
    pub fn best(&self) -> Mood {
        let mut best = Mood::ALL[0];
        let mut best_score = self.score(best);
        for mood in &Mood::ALL[1..] {
            let score = self.score(*mood);
            if score > best_score {
                best = *mood;
                best_score = score;
            }
        }
        best
    }
}

/// Map every centroid (by cluster index) to its mood.
///
/// Pure apart from debug logging. Several clusters may land on the same mood.
///
/// # Examples
///
/// ```
/// use moodlist::mood::{assign_moods, Mood};
///
/// let mapping = assign_moods(&[[0.9, 0.2, 0.8], [0.1, 0.9, 0.2]]);
/// assert_eq!(mapping, vec![Mood::Energetic, Mood::Calm]);
/// ```
#[must_use]
pub fn assign_moods(centroids: &[Centroid]) -> Vec<Mood> {
    centroids
        .iter()
        .enumerate()
        .map(|(cluster, centroid)| {
            let mood = MoodScores::from_centroid(centroid).best();
            debug!(
                "Cluster {cluster} -> {mood} (energy={:.2}, valence={:.2}, dance={:.2})",
                centroid[0], centroid[1], centroid[2]
            );
            mood
        })
        .collect()
}

/// Songs grouped by mood.
///
/// Always holds all four moods; a mood no cluster mapped to has an empty list.
/// Within a mood, songs keep the order they were given to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodGrouping {
    buckets: BTreeMap<Mood, Vec<String>>,
}

impl Default for MoodGrouping {
    fn default() -> Self {
        Self {
            buckets: Mood::ALL.iter().map(|mood| (*mood, Vec::new())).collect(),
        }
    }
}

impl MoodGrouping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a song to the end of a mood's list.
    pub fn push(&mut self, mood: Mood, song: impl Into<String>) {
        self.buckets.entry(mood).or_default().push(song.into());
    }

    #[must_use]
    pub fn songs(&self, mood: Mood) -> &[String] {
        self.buckets.get(&mood).map_or(&[], Vec::as_slice)
    }

    /// All moods with their songs, in [`Mood::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (Mood, &[String])> + '_ {
        self.buckets.iter().map(|(mood, songs)| (*mood, songs.as_slice()))
    }

    /// Only the moods that received at least one song.
    pub fn non_empty(&self) -> impl Iterator<Item = (Mood, &[String])> + '_ {
        self.iter().filter(|(_, songs)| !songs.is_empty())
    }

    /// Total number of songs across every bucket.
    #[must_use]
    pub fn total(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn mood_of(&self, song: &str) -> Option<Mood> {
        self.buckets
            .iter()
            .find(|(_, songs)| songs.iter().any(|s| s == song))
            .map(|(mood, _)| *mood)
    }
}
