//! SongForge CLI: serve the web page or generate a clip from the terminal.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use songforge_core::config::{config_path, load_config};
use songforge_core::model::ModelSource;
use songforge_core::{AppConfig, CachedMusicGen, Genre, MusicGenerator, Result, SongRequest};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "songforge", about = "Turn lyrics and a genre into music", version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the generator web page
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// Model directory or hf://owner/name[@revision]
        #[arg(short, long)]
        model: Option<ModelSource>,

        /// Directory generated clips are written to
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Only use model files already in the local cache
        #[arg(long)]
        offline: bool,

        /// Load the model before accepting requests
        #[arg(long)]
        preload: bool,
    },

    /// Generate one clip and write it to a WAV file
    Generate {
        /// Song lyrics
        #[arg(short, long, conflicts_with = "lyrics_file", required_unless_present = "lyrics_file")]
        lyrics: Option<String>,

        /// Read lyrics from a text file
        #[arg(long)]
        lyrics_file: Option<PathBuf>,

        /// Genre name, e.g. Rock or Hip-Hop
        #[arg(short, long, default_value = "Pop")]
        genre: Genre,

        /// Duration in seconds (30-180, multiple of 30)
        #[arg(short, long, default_value = "60")]
        duration: u32,

        /// Output WAV path
        #[arg(short, long, default_value = "output.wav")]
        output: PathBuf,

        /// Seed for reproducible sampling
        #[arg(long)]
        seed: Option<u64>,

        #[arg(short, long)]
        model: Option<ModelSource>,

        #[arg(long)]
        offline: bool,
    },

    /// Write the default configuration file
    InitConfig {
        /// Output path (defaults to the user config directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List available genres
    Genres,

    /// Show version and runtime information
    Info,
}

fn load(config: Option<&PathBuf>) -> Result<AppConfig> {
    let mut cfg = load_config(config.map(PathBuf::as_path))?;
    cfg.apply_env()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            model,
            output_dir,
            offline,
            preload,
        } => {
            let mut cfg = load(cli.config.as_ref())?;
            if let Some(host) = host {
                cfg.host = host;
            }
            if let Some(port) = port {
                cfg.port = port;
            }
            if let Some(model) = model {
                cfg.model = model;
            }
            if let Some(dir) = output_dir {
                cfg.output_dir = dir;
            }
            cfg.offline |= offline;
            cfg.preload_model |= preload;
            songforge_web::serve(cfg).await?;
        }

        Commands::Generate {
            lyrics,
            lyrics_file,
            genre,
            duration,
            output,
            seed,
            model,
            offline,
        } => {
            let cfg = load(cli.config.as_ref())?;
            let lyrics = match (lyrics, lyrics_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (None, None) => String::new(),
            };
            let request = SongRequest::new(&lyrics, genre, duration)?;
            let mut params = cfg.generation.clone();
            params.duration_secs = request.duration_secs() as f32;
            params.seed = seed.or(params.seed);

            println!("{}", request.preview_json());
            let source = model.unwrap_or(cfg.model);
            let prompt = request.prompt();
            let clip = tokio::task::spawn_blocking(move || {
                let mut generator = CachedMusicGen::new(source, cfg.offline || offline, cfg.intra_threads);
                let mut last_pct = u32::MAX;
                generator.generate(&prompt, &params, &mut |progress| {
                    let pct = (progress * 100.0) as u32;
                    if pct != last_pct {
                        last_pct = pct;
                        eprint!("\rGenerating... {pct}%");
                        let _ = std::io::stderr().flush();
                    }
                })
            })
            .await
            .map_err(|e| songforge_core::Error::Inference(e.to_string()))??;
            eprintln!("\rGenerating... done!    ");

            songforge_core::wav::write_wav(&clip.samples, clip.sample_rate, &output)?;
            println!(
                "✓ Wrote {} ({:.1}s at {} Hz)",
                output.display(),
                clip.duration_secs(),
                clip.sample_rate
            );
        }

        Commands::InitConfig { output } => {
            let path = output.unwrap_or_else(config_path);
            AppConfig::default().save(&path)?;
            println!("✓ Configuration saved to: {}", path.display());
        }

        Commands::Genres => {
            for genre in Genre::ALL {
                println!("{}", genre.label());
            }
        }

        Commands::Info => {
            let cfg = load(cli.config.as_ref())?;
            println!("SongForge {}", songforge_core::VERSION);
            println!("Platform: {} / {}", std::env::consts::OS, std::env::consts::ARCH);
            println!(
                "CPU threads: {}",
                std::thread::available_parallelism().map_or(1, |n| n.get())
            );
            println!("Config file: {}", cli.config.unwrap_or_else(config_path).display());
            println!("Model: {}", cfg.model);
            println!("Offline: {}", cfg.offline);
            println!("Output directory: {}", cfg.output_dir.display());
            println!("Sample rate: {} Hz", songforge_core::musicgen::SAMPLE_RATE);
        }
    }

    Ok(())
}
