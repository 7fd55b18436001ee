//! # Moodlist
//!
//! Sorts a music library into mood playlists. Audio features come from Spotify
//! when credentials are configured and are estimated otherwise.
//!
//! ## Usage
//!
//! ```bash
//! # Build the library
//! moodlist add ~/Music
//!
//! # Classify and save one playlist per mood
//! moodlist classify
//!
//! # Preview without saving
//! moodlist classify --dry-run --json
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info};
use std::sync::{mpsc, Arc};

use moodlist::cli::{self, Command};
use moodlist::cluster::KMeans;
use moodlist::completion;
use moodlist::config::{Overrides, RuntimeConfig};
use moodlist::db::{self, Library};
use moodlist::features::{FeatureOrigin, FeatureProvider};
use moodlist::pipeline::{spawn_classification, ClassificationPipeline, ClassificationReport, ProgressEvent};
use moodlist::remote::SpotifyClient;

fn build_provider(config: &RuntimeConfig) -> Result<FeatureProvider> {
    match &config.spotify {
        Some(credentials) => {
            let client = SpotifyClient::new(credentials.clone()).context("Failed to set up Spotify client")?;
            Ok(FeatureProvider::new(Box::new(client)))
        }
        None => {
            info!("No Spotify credentials configured, features will be estimated");
            Ok(FeatureProvider::offline())
        }
    }
}

fn build_pipeline(config: &RuntimeConfig) -> Result<ClassificationPipeline> {
    let provider = build_provider(config)?;
    let clusterer = KMeans::new(config.kmeans.clone());
    Ok(ClassificationPipeline::new(provider, Box::new(clusterer))
        .with_refresh_auth_at_start(config.refresh_auth_at_start))
}

/// Run the classification on a worker thread and print progress here.
fn run_classification(config: &RuntimeConfig, songs: Vec<String>, quiet: bool) -> Result<ClassificationReport> {
    let pipeline = Arc::new(build_pipeline(config)?);
    let (tx, rx) = mpsc::channel();
    let worker = spawn_classification(pipeline, songs, tx, None);

    for event in rx {
        if quiet {
            continue;
        }
        match event {
            ProgressEvent::Started { total } => eprintln!("Classifying {total} songs..."),
            ProgressEvent::FetchingFeatures { index, total, song } => {
                eprintln!("  [{}/{total}] {}", index + 1, moodlist::features::display_name(&song));
            }
            ProgressEvent::Clustering { k } => eprintln!("Clustering into {k} groups..."),
            ProgressEvent::Completed(_) => debug!("Classification finished"),
            ProgressEvent::Failed { reason } => debug!("Worker reported failure: {reason}"),
        }
    }

    let report = worker
        .join()
        .map_err(|_| anyhow!("Classification worker panicked"))??;
    Ok(report)
}

fn classify(config: &RuntimeConfig, dry_run: bool, replace: bool, json: bool) -> Result<()> {
    let mut library = Library::open(&config.db_path)?;
    let songs = library.songs()?;
    if songs.is_empty() {
        println!("No songs to classify. Add some with `moodlist add <path>`.");
        return Ok(());
    }

    let report = run_classification(config, songs, json)?;
    let saved = if dry_run {
        Vec::new()
    } else {
        library.save_mood_playlists(&report.grouping, replace)?
    };

    if json {
        let playlists: Vec<_> = saved
            .iter()
            .map(|p| serde_json::json!({ "mood": p.mood, "playlist_id": p.playlist_id, "songs": p.songs }))
            .collect();
        let output = serde_json::json!({
            "clusters": report.k,
            "estimated": report.estimated,
            "moods": report.grouping,
            "playlists": playlists,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let moods = report.grouping.non_empty().count();
    println!(
        "Classified {} songs into {moods} mood{} ({} estimated)",
        report.grouping.total(),
        if moods == 1 { "" } else { "s" },
        report.estimated
    );
    for (mood, bucket) in report.grouping.non_empty() {
        println!("  {}: {} songs ({})", db::mood_playlist_name(mood), bucket.len(), mood.description());
    }
    if moods == 1 {
        println!("Every song landed in the same mood.");
    }

    if dry_run {
        println!("Dry run: no playlists saved.");
    } else {
        println!("Saved {} playlist{}.", saved.len(), if saved.len() == 1 { "" } else { "s" });
    }
    Ok(())
}

fn info(config: &RuntimeConfig, path: &str) -> Result<()> {
    let provider = build_provider(config)?;
    let track = provider.track_info(path);
    let outcome = provider.fetch(path);
    let features = outcome.features;

    println!("Title:  {}", track.title);
    println!("Artist: {}", track.artist);
    if let Some(url) = &track.album_art_url {
        println!("Art:    {url}");
    }
    match &outcome.origin {
        FeatureOrigin::Remote(found) => println!("Source: remote ({})", found.provider_track_id),
        FeatureOrigin::Estimated(reason) => println!("Source: estimated ({reason:?})"),
    }
    println!("  energy           {:.3}", features.energy);
    println!("  valence          {:.3}", features.valence);
    println!("  danceability     {:.3}", features.danceability);
    println!("  tempo            {:.1}", features.tempo);
    println!("  acousticness     {:.3}", features.acousticness);
    println!("  instrumentalness {:.3}", features.instrumentalness);
    Ok(())
}

/// Main entry point.
///
/// Logging is controlled through `RUST_LOG`:
/// - `RUST_LOG=debug moodlist classify` - Enable debug logging
/// - `RUST_LOG=moodlist::features=debug moodlist classify` - Module-specific logging
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    if let Command::Completion { shell } = args.command {
        let mut cmd = cli::Args::command();
        completion::generate_completions(
            completion::shell_to_completion_shell(shell),
            &mut cmd,
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let seed = match &args.command {
        Command::Classify { seed, .. } => *seed,
        _ => None,
    };
    let config = RuntimeConfig::load(Overrides {
        db_path: args.db,
        spotify_client_id: args.spotify.spotify_client_id,
        spotify_client_secret: args.spotify.spotify_client_secret,
        seed,
    })?;
    debug!("Using database at {}", config.db_path.display());

    match args.command {
        Command::Add { paths } => {
            let songs = db::collect_song_paths(&paths)?;
            let mut library = Library::open(&config.db_path)?;
            let added = library.add_songs(&songs)?;
            println!("Added {added} new song(s) ({} already in library).", songs.len() - added);
        }
        Command::Remove { path } => {
            let library = Library::open(&config.db_path)?;
            if library.remove_song(&path)? {
                println!("Removed {path}");
            } else {
                println!("Not in library: {path}");
            }
        }
        Command::List => {
            let songs = Library::open(&config.db_path)?.songs()?;
            if songs.is_empty() {
                println!("Library is empty.");
            }
            for song in songs {
                println!("{song}");
            }
        }
        Command::Info { path } => info(&config, &path)?,
        Command::Classify { dry_run, replace, json, .. } => classify(&config, dry_run, replace, json)?,
        Command::Playlists => {
            let playlists = Library::open(&config.db_path)?.playlists()?;
            if playlists.is_empty() {
                println!("No playlists yet.");
            }
            for playlist in playlists {
                println!("{:>4}  {} ({} songs)", playlist.id, playlist.name, playlist.song_count);
            }
        }
        Command::Show { id } => {
            let library = Library::open(&config.db_path)?;
            let playlist = library
                .playlist(id)?
                .ok_or_else(|| anyhow!("No playlist with id {id}"))?;
            println!("{} ({} songs)", playlist.name, playlist.song_count);
            for song in library.playlist_songs(id)? {
                println!("  {song}");
            }
        }
        Command::Delete { id } => {
            let library = Library::open(&config.db_path)?;
            if library.delete_playlist(id)? {
                println!("Deleted playlist {id}");
            } else {
                return Err(anyhow!("No playlist with id {id}"));
            }
        }
        Command::Completion { .. } => {}
    }

    Ok(())
}
