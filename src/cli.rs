//! # Command-Line Interface Module
//!
//! This module defines the command-line interface for Moodlist using Clap
//! derive macros.
//!
//! ## Commands
//!
//! - `add`: Add songs (files or directories) to the library
//! - `remove`: Remove a song from the library
//! - `list`: Display all songs in the library
//! - `info`: Show track info and audio features for one song
//! - `classify`: Sort the library into mood playlists
//! - `playlists` / `show` / `delete`: Manage saved playlists
//!
//! ## Examples
//!
//! ```bash
//! moodlist add ~/Music/Favourites
//! moodlist classify --replace
//! moodlist playlists
//! ```

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "moodlist")]
#[command(about = "Moodlist: cluster your music library into mood playlists")]
#[command(version)]
pub struct Args {
    /// Use this database file instead of the one in the data directory
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(flatten)]
    pub spotify: SpotifyArgs,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Remote metadata credentials. Without both, features are estimated.
#[derive(ClapArgs, Debug, Default)]
pub struct SpotifyArgs {
    /// Spotify client id
    #[arg(long, global = true, env = "MOODLIST_SPOTIFY_CLIENT_ID", hide_env_values = true)]
    pub spotify_client_id: Option<String>,

    /// Spotify client secret
    #[arg(long, global = true, env = "MOODLIST_SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    pub spotify_client_secret: Option<String>,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add songs to the library
    ///
    /// Files are added as given; directories are scanned recursively for
    /// audio files. Paths are stored as absolute paths.
    ///
    /// Supported formats: MP3, WAV, OGG, FLAC, M4A
    Add {
        /// Files or directories to add
        #[arg(required = true, value_hint = clap::ValueHint::AnyPath)]
        paths: Vec<PathBuf>,
    },

    /// Remove a song from the library
    Remove {
        /// Path of the song as stored in the library
        #[arg(value_hint = clap::ValueHint::FilePath)]
        path: String,
    },

    /// List all songs in the library
    List,

    /// Show track info and audio features for a song
    ///
    /// Reports whether the features came from the remote source or were
    /// estimated, and why.
    Info {
        /// Song path
        #[arg(value_hint = clap::ValueHint::FilePath)]
        path: String,
    },

    /// Classify every library song by mood and save mood playlists
    ///
    /// Fetches audio features for each song, clusters them into at most four
    /// groups and maps each group to Energetic, Calm, Happy or Melancholic.
    /// One playlist is created per non-empty mood.
    Classify {
        /// Classify and print the result without saving playlists
        #[arg(long)]
        dry_run: bool,

        /// Delete earlier mood playlists before saving new ones
        #[arg(long)]
        replace: bool,

        /// Print the grouping as JSON
        #[arg(long)]
        json: bool,

        /// Seed for cluster initialization, for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
    },

    /// List saved playlists
    Playlists,

    /// Show the songs in a playlist
    Show {
        /// Playlist id (see `playlists`)
        id: i64,
    },

    /// Delete a playlist
    Delete {
        /// Playlist id (see `playlists`)
        id: i64,
    },

    /// Generate shell completions
    ///
    /// Usage: moodlist completion bash > ~/.local/share/bash-completion/completions/moodlist
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}
