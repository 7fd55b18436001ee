//! Cluster a music library into mood playlists.
//!
//! Core modules:
//! - [`features`] - Audio features per song, fetched remotely or estimated
//! - [`remote`] - Spotify metadata client behind the [`remote::MetadataSource`] trait
//! - [`cluster`] - K-means over (energy, valence, danceability)
//! - [`mood`] - Centroid to mood scoring and the [`mood::MoodGrouping`] result
//! - [`pipeline`] - Batch classification with progress events and cancellation
//!
//! ### Supporting Modules
//!
//! - [`db`] - SQLite library and playlist storage
//! - [`config`] - Data directory and config file handling
//! - [`error`] - Engine error types
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```
//! use moodlist::pipeline::ClassificationPipeline;
//! use moodlist::mood::Mood;
//!
//! let pipeline = ClassificationPipeline::offline();
//! let grouping = pipeline.classify(&["/music/a.mp3", "/music/b.mp3", "/music/c.mp3"])?;
//!
//! assert_eq!(grouping.total(), 3);
//! let placed: usize = Mood::ALL.iter().map(|&m| grouping.songs(m).len()).sum();
//! assert_eq!(placed, 3);
//! # Ok::<(), moodlist::error::ClassifyError>(())
//! ```
//!
//! ## How Classification Works
//!
//! Each song gets a feature vector. With credentials, the provider searches
//! Spotify for the file's display name and uses the best match's audio
//! features; on any failure it falls back to a deterministic estimate seeded
//! from the song identifier. The vectors are clustered into `min(4, n)` groups
//! and each centroid is scored against four moods:
//!
//! | Mood        | Score                                        |
//! |-------------|----------------------------------------------|
//! | Energetic   | `0.6 * energy + 0.4 * danceability`          |
//! | Calm        | `0.7 * (1 - energy) + 0.3 * (1 - dance)`     |
//! | Happy       | `0.7 * valence + 0.3 * energy`               |
//! | Melancholic | `0.8 * (1 - valence) + 0.2 * (1 - energy)`   |
//!
//! The highest score wins; ties go to the mood listed first.

pub mod cli;
pub mod cluster;
pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod mood;
pub mod pipeline;
pub mod remote;
