//! # Library Database
//!
//! SQLite storage for the song library and playlists. The classification
//! engine never touches this module; the CLI feeds it the engine's
//! [`MoodGrouping`] to create one playlist per non-empty mood.
//!
//! ## Schema
//!
//! - `songs`: one row per song path in the library
//! - `playlists`: named playlists
//! - `playlist_songs`: ordered membership, cascading on playlist delete

use anyhow::{ensure, Context, Result};
use log::{debug, info, trace};
use path_absolutize::Absolutize;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::features::AUDIO_EXTENSIONS;
use crate::mood::{Mood, MoodGrouping};

/// Prefix for playlists generated from a classification run.
pub const MOOD_PLAYLIST_PREFIX: &str = "🤖 ";

/// Name of the generated playlist for `mood`.
#[must_use]
pub fn mood_playlist_name(mood: Mood) -> String {
    format!("{MOOD_PLAYLIST_PREFIX}{}", mood.display_name())
}

/// A playlist row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
    pub song_count: usize,
}

/// A playlist created by [`Library::save_mood_playlists`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedMoodPlaylist {
    pub mood: Mood,
    pub playlist_id: i64,
    pub songs: usize,
}

/// Handle to the library database.
#[derive(Debug)]
pub struct Library {
    conn: Connection,
}

impl Library {
    /// Open (or create) the database at `path` and make sure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open library database at {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// In-memory library, mostly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot create the schema.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS songs (
                id       INTEGER PRIMARY KEY,
                path     TEXT    NOT NULL UNIQUE,
                added_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS playlists (
                id         INTEGER PRIMARY KEY,
                name       TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS playlist_songs (
                id          INTEGER PRIMARY KEY,
                playlist_id INTEGER NOT NULL,
                song_path   TEXT    NOT NULL,
                position    INTEGER NOT NULL,
                FOREIGN KEY (playlist_id) REFERENCES playlists(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_playlist_songs_playlist ON playlist_songs(playlist_id);",
        )
        .context("Failed to create library schema")?;

        Ok(Self { conn })
    }

    /// Add songs to the library, skipping ones already present.
    /// Returns how many were new.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn add_songs<S: AsRef<str>>(&mut self, paths: &[S]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut added = 0;

        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO songs (path) VALUES (?1)")?;
            for path in paths {
                let path = path.as_ref();
                added += stmt
                    .execute([path])
                    .with_context(|| format!("Failed to add song `{path}' to library"))?;
            }
        }

        tx.commit().context("Committing song insert failed")?;
        debug!("Added {added} of {} songs to library", paths.len());
        Ok(added)
    }

    /// Remove a song from the library. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_song(&self, path: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM songs WHERE path = ?1", [path])
            .with_context(|| format!("Failed to remove song `{path}'"))?;
        Ok(removed > 0)
    }

    /// All song paths, in the order they were added.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn songs(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT path FROM songs ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .context("Cannot query songs.")
    }

    /// Create an empty playlist and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn create_playlist(&self, name: &str) -> Result<i64> {
        self.conn
            .execute("INSERT INTO playlists (name) VALUES (?1)", [name])
            .with_context(|| format!("Failed to create playlist `{name}'"))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Append a song at the next free position.
    ///
    /// # Errors
    ///
    /// Returns an error if the playlist does not exist or the insert fails.
    pub fn add_song_to_playlist(&self, playlist_id: i64, song: &str) -> Result<()> {
        append_to_playlist(&self.conn, playlist_id, song)
    }

    /// Every playlist, newest first, with song counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn playlists(&self) -> Result<Vec<Playlist>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, COUNT(ps.id)
             FROM playlists p LEFT JOIN playlist_songs ps ON ps.playlist_id = p.id
             GROUP BY p.id ORDER BY p.id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Playlist {
                id: row.get(0)?,
                name: row.get(1)?,
                song_count: row.get::<_, i64>(2)?.try_into().unwrap_or_default(),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Cannot query playlists.")
    }

    /// Look up a playlist by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn playlist(&self, playlist_id: i64) -> Result<Option<Playlist>> {
        self.conn
            .query_row(
                "SELECT p.id, p.name, COUNT(ps.id)
                 FROM playlists p LEFT JOIN playlist_songs ps ON ps.playlist_id = p.id
                 WHERE p.id = ?1
                 GROUP BY p.id",
                [playlist_id],
                |row| {
                    Ok(Playlist {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        song_count: row.get::<_, i64>(2)?.try_into().unwrap_or_default(),
                    })
                },
            )
            .optional()
            .with_context(|| format!("Cannot query playlist {playlist_id}."))
    }

    /// Songs in a playlist by position.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn playlist_songs(&self, playlist_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT song_path FROM playlist_songs WHERE playlist_id = ?1 ORDER BY position")?;
        let rows = stmt.query_map([playlist_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .with_context(|| format!("Cannot query songs of playlist {playlist_id}."))
    }

    /// Delete a playlist and its entries. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_playlist(&self, playlist_id: i64) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM playlists WHERE id = ?1", [playlist_id])
            .with_context(|| format!("Failed to delete playlist {playlist_id}"))?;
        Ok(removed > 0)
    }

    /// Create one playlist per non-empty mood, in a single transaction.
    ///
    /// With `replace`, earlier playlists carrying the same generated names are
    /// deleted first. Nothing is written if any step fails.
    ///
    /// # Errors
    ///
    /// Returns an error if any insert or delete fails; the transaction is rolled back.
    pub fn save_mood_playlists(&mut self, grouping: &MoodGrouping, replace: bool) -> Result<Vec<SavedMoodPlaylist>> {
        let tx = self.conn.transaction()?;
        let mut saved = Vec::new();

        for (mood, songs) in grouping.non_empty() {
            let name = mood_playlist_name(mood);

            if replace {
                let removed = tx
                    .execute("DELETE FROM playlists WHERE name = ?1", [&name])
                    .with_context(|| format!("Failed to replace playlist `{name}'"))?;
                trace!("Removed {removed} earlier `{name}' playlists");
            }

            tx.execute("INSERT INTO playlists (name) VALUES (?1)", [&name])
                .with_context(|| format!("Failed to create playlist `{name}'"))?;
            let playlist_id = tx.last_insert_rowid();

            for song in songs {
                append_to_playlist(&tx, playlist_id, song)?;
            }

            saved.push(SavedMoodPlaylist {
                mood,
                playlist_id,
                songs: songs.len(),
            });
        }

        tx.commit().context("Committing mood playlists failed")?;
        info!("Saved {} mood playlists", saved.len());
        Ok(saved)
    }
}

/// Shared by plain connections and transactions (which deref to `Connection`).
fn append_to_playlist(conn: &Connection, playlist_id: i64, song: &str) -> Result<()> {
    let exists: Option<i64> = conn
        .query_row("SELECT id FROM playlists WHERE id = ?1", [playlist_id], |row| row.get(0))
        .optional()?;
    if exists.is_none() {
        anyhow::bail!("Playlist {playlist_id} does not exist");
    }

    let next_position: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position), -1) + 1 FROM playlist_songs WHERE playlist_id = ?1",
        [playlist_id],
        |row| row.get(0),
    )?;

    conn.execute(
        "INSERT INTO playlist_songs (playlist_id, song_path, position) VALUES (?1, ?2, ?3)",
        params![playlist_id, song, next_position],
    )
    .with_context(|| format!("Failed to add `{song}' to playlist {playlist_id}"))?;
    Ok(())
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| AUDIO_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

fn scan_dir(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            scan_dir(&path, found)?;
        } else if is_audio_file(&path) {
            found.push(path);
        }
    }
    Ok(())
}

/// Resolve command-line paths into absolute song paths.
///
/// Files are taken as given, whatever their extension. Directories are
/// scanned recursively for audio files. The result is sorted and deduplicated.
///
/// # Errors
///
/// Returns an error if a path does not exist or a directory cannot be read.
pub fn collect_song_paths(inputs: &[PathBuf]) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for input in inputs {
        let absolute = input
            .absolutize()
            .with_context(|| format!("Failed to resolve path {}", input.display()))?
            .into_owned();
        ensure!(absolute.exists(), "Path `{}` does not exist!", absolute.display());

        if absolute.is_dir() {
            let before = found.len();
            scan_dir(&absolute, &mut found)?;
            debug!("Found {} audio files under {}", found.len() - before, absolute.display());
        } else {
            found.push(absolute);
        }
    }

    let mut songs: Vec<String> = found.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    songs.sort();
    songs.dedup();
    Ok(songs)
}
