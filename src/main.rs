use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use brainwaves_lib::correlation::LoopMode;
use brainwaves_lib::db::Database;
use brainwaves_lib::device::{
    DeviceReadingCache, DeviceSource, DeviceState, DeviceStatus, ReadingError, SimulatedDevice,
    SimulatorConfig,
};
use brainwaves_lib::spotify::{SpotifyAuth, SpotifyClient, SpotifyCredentials};
use brainwaves_lib::{run_capture, CaptureSettings};

#[derive(Parser, Debug)]
#[command(name = "brainwaves", version, about = "Records EEG summaries per song")]
struct Cli {
    /// SQLite database file.
    #[arg(long, env = "BRAINWAVES_DB", default_value = "brainwaves.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pairs headband readings with the songs playing and stores one EEG
    /// summary per song.
    Capture(CaptureArgs),

    /// Prints flattened headband vectors as JSON lines.
    Sample {
        /// Number of vectors to print.
        #[arg(long, default_value_t = 10)]
        count: usize,
        /// Vectors per second.
        #[arg(long, default_value_t = 4.0)]
        rate: f64,
    },

    /// Prints a track and its stored EEG summaries as JSON.
    Report { track_id: String },

    /// Creates any missing tables.
    InitDb,

    /// Deletes every stored track, artist and EEG summary.
    ClearDb,
}

#[derive(Args, Debug)]
struct CaptureArgs {
    /// JSON file with capture settings; defaults are used when it is missing.
    #[arg(long, env = "BRAINWAVES_SETTINGS", default_value = "brainwaves.json")]
    settings: PathBuf,

    /// Stop after the first song change.
    #[arg(long)]
    single_shot: bool,

    /// Empty the database before capturing.
    #[arg(long)]
    clear: bool,

    #[arg(long)]
    tick_interval_ms: Option<u64>,

    /// Electrodes allowed to have bad contact before capture starts.
    #[arg(long)]
    max_fails: Option<usize>,

    /// Give up waiting for signal quality after this many seconds.
    #[arg(long)]
    quality_timeout_secs: Option<u64>,

    /// Report the simulated headband as charging.
    #[arg(long)]
    simulate_charging: bool,

    /// Report the simulated headband as offline.
    #[arg(long)]
    simulate_offline: bool,

    #[arg(long, env = "SPOTIFY_CLIENT_ID", hide_env_values = true)]
    client_id: Option<String>,

    #[arg(long, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    #[arg(long, env = "SPOTIFY_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    /// Pre-issued access token, used when no refresh credentials are given.
    #[arg(long, env = "SPOTIFY_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
}

impl CaptureArgs {
    fn settings(&self) -> Result<CaptureSettings> {
        let mut settings = CaptureSettings::load(&self.settings)?;
        if self.single_shot {
            settings.mode = LoopMode::SingleShot;
        }
        if let Some(tick_interval_ms) = self.tick_interval_ms {
            settings.tick_interval_ms = tick_interval_ms;
        }
        if let Some(max_fails) = self.max_fails {
            settings.max_fails = max_fails;
        }
        if self.quality_timeout_secs.is_some() {
            settings.quality_timeout_secs = self.quality_timeout_secs;
        }
        Ok(settings)
    }

    fn spotify_auth(&self) -> Result<SpotifyAuth> {
        match (&self.client_id, &self.client_secret, &self.refresh_token) {
            (Some(client_id), Some(client_secret), Some(refresh_token)) => {
                Ok(SpotifyAuth::Refresh(SpotifyCredentials {
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    refresh_token: refresh_token.clone(),
                }))
            }
            _ => match &self.access_token {
                Some(token) => Ok(SpotifyAuth::Static(token.clone())),
                None => bail!(
                    "set SPOTIFY_CLIENT_ID, SPOTIFY_CLIENT_SECRET and SPOTIFY_REFRESH_TOKEN \
                     (or SPOTIFY_ACCESS_TOKEN)"
                ),
            },
        }
    }

    fn device_status(&self) -> DeviceStatus {
        DeviceStatus {
            state: if self.simulate_offline {
                DeviceState::Offline
            } else {
                DeviceState::Online
            },
            charging: self.simulate_charging,
        }
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_token.cancel();
        }
    });
    token
}

async fn capture(db: Database, args: CaptureArgs) -> Result<()> {
    let settings = args.settings()?;
    if args.clear {
        db.clear().await?;
    }

    let tracks = SpotifyClient::new(args.spotify_auth()?, settings.api_timeout_secs)
        .context("failed to build streaming API client")?;
    let device = SimulatedDevice::new(SimulatorConfig {
        status: args.device_status(),
        ..SimulatorConfig::default()
    });

    let report = run_capture(
        db,
        Arc::new(device),
        Arc::new(tracks),
        &settings,
        cancel_on_ctrl_c(),
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Time between two samples at `rate` per second.
fn sample_interval(rate: f64) -> Result<Duration> {
    if !(rate > 0.0 && rate.is_finite()) {
        bail!("rate must be a positive number, got {rate}");
    }
    let interval = Duration::try_from_secs_f64(1.0 / rate)
        .with_context(|| format!("rate {rate} gives no usable sample interval"))?;
    if interval.is_zero() {
        bail!("rate {rate} is too high to sample");
    }
    Ok(interval)
}

async fn sample(count: usize, rate: f64) -> Result<()> {

    let device = SimulatedDevice::new(SimulatorConfig::default());
    let (feed, cache) = DeviceReadingCache::new(None);
    let _subscription = device.subscribe(feed).await?;
    let cancel_token = cancel_on_ctrl_c();

    let mut ticker = tokio::time::interval(sample_interval(rate)?);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut emitted = 0;
    while emitted < count {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel_token.cancelled() => break,
        }
        match cache.export_vector() {
            Ok(vector) => {
                println!("{}", serde_json::to_string(&vector)?);
                emitted += 1;
            }
            Err(ReadingError::Missing(channel)) => {
                warn!("Waiting for the first {channel} reading");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

async fn report(db: Database, track_id: String) -> Result<()> {
    let Some(track) = db.get_track(&track_id).await? else {
        bail!("track {track_id} is not in {}", db.path().display());
    };
    let summaries = db.get_eeg_summaries_for_track(&track_id).await?;

    let report = serde_json::json!({
        "track": track,
        "summaries": summaries,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Reads RUST_LOG, defaults to info
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Sample { count, rate } => sample(count, rate).await,
        Command::Capture(args) => capture(Database::new(cli.db)?, args).await,
        Command::Report { track_id } => report(Database::new(cli.db)?, track_id).await,
        Command::InitDb => {
            let db = Database::new(cli.db)?;
            db.initialize_schema().await?;
            info!("Schema ready at {}", db.path().display());
            Ok(())
        }
        Command::ClearDb => Database::new(cli.db)?.clear().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_interval() {
        assert_eq!(sample_interval(4.0).unwrap(), Duration::from_millis(250));
        assert_eq!(sample_interval(0.5).unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_sample_interval_rejects_unusable_rates() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e-300, 1e300] {
            assert!(sample_interval(rate).is_err(), "rate {rate} was accepted");
        }
    }
}
