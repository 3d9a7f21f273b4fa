use std::{
    path::{Path, PathBuf},
    process,
    time::Duration,
};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use stem_splitter_core::{
    core::mix::{stem_name, unique_path},
    job::run_worker,
    model::registry::registry,
    read_audio, remix, resample, write_audio, BuiltinModels, InferenceSettings, JobMessage,
    JobSupervisor, MixSettings, ModelFamily, ModelSelection, SupervisorConfig, WorkerCommand,
};
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "stem-splitter")]
#[command(about = "Chunked overlap-add audio stem separation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Family {
    Chunked,
    FixedSegment,
}

impl From<Family> for ModelFamily {
    fn from(f: Family) -> Self {
        match f {
            Family::Chunked => ModelFamily::Chunked,
            Family::FixedSegment => ModelFamily::FixedSegment,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Separate an audio file into stems
    Split {
        #[arg(short, long)]
        input: PathBuf,

        /// Defaults to `separated/` next to the input
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long, default_value = "")]
        model: String,

        /// JSON file with inference settings
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum)]
        family: Option<Family>,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        overlap: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long, value_delimiter = ',')]
        stems: Option<Vec<String>>,

        /// Artificial per-batch model latency, for testing cancellation
        #[arg(long, hide = true)]
        latency_ms: Option<u64>,

        #[arg(long)]
        timeout_secs: Option<u64>,

        #[arg(short, long)]
        quiet: bool,
    },

    /// Recombine separated stems into one file
    Mix {
        /// Stem files named `<song>_<stem>.wav`
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, default_value = "mix.wav")]
        output: PathBuf,

        /// `stem=gain`, repeatable
        #[arg(long, value_parser = parse_gain)]
        gain: Vec<(String, f32)>,

        #[arg(long)]
        mute: Vec<String>,

        #[arg(long)]
        solo: Vec<String>,
    },

    /// List available models
    List,

    #[command(hide = true)]
    Worker {
        #[arg(long)]
        job: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Split {
            input,
            output,
            model,
            config,
            family,
            chunk_size,
            overlap,
            batch_size,
            stems,
            latency_ms,
            timeout_secs,
            quiet,
        } => {
            init_logging(if quiet { "warn" } else { "stem_splitter_core=info" });
            let overrides = Overrides {
                family,
                chunk_size,
                overlap,
                batch_size,
                stems,
            };
            let mut selection = ModelSelection::new(model);
            if let Some(ms) = latency_ms {
                selection = selection.with_option("latency_ms", ms);
            }
            handle_split(
                &input,
                output,
                selection,
                config,
                overrides,
                timeout_secs.map(Duration::from_secs),
                quiet,
            )
        }
        Commands::Mix {
            inputs,
            output,
            gain,
            mute,
            solo,
        } => {
            init_logging("stem_splitter_core=info");
            handle_mix(&inputs, &output, &gain, &mute, &solo)
        }
        Commands::List => handle_list(),
        Commands::Worker { job } => {
            // stderr is forwarded into the supervisor's log.
            init_logging("stem_splitter_core=debug");
            run_worker(&job, &BuiltinModels).map_err(Into::into)
        }
    };

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

fn init_logging(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

struct Overrides {
    family: Option<Family>,
    chunk_size: Option<usize>,
    overlap: Option<usize>,
    batch_size: Option<usize>,
    stems: Option<Vec<String>>,
}

impl Overrides {
    fn apply(self, settings: &mut InferenceSettings) {
        if let Some(f) = self.family {
            settings.family = f.into();
        }
        if let Some(c) = self.chunk_size {
            settings.chunk_size = c;
        }
        if let Some(n) = self.overlap {
            settings.num_overlap = n;
        }
        if let Some(b) = self.batch_size {
            settings.batch_size = b;
        }
        if let Some(s) = self.stems {
            settings.stem_names = s;
            settings.target_instrument = None;
        }
    }
}

fn handle_split(
    input: &Path,
    output: Option<PathBuf>,
    model: ModelSelection,
    config: Option<PathBuf>,
    overrides: Overrides,
    timeout: Option<Duration>,
    quiet: bool,
) -> anyhow::Result<()> {
    if !input.exists() {
        bail!("Input file not found: {}", input.display());
    }

    let mut settings = match &config {
        Some(path) => InferenceSettings::from_json_file(path)
            .with_context(|| format!("reading settings from {}", path.display()))?,
        None => InferenceSettings::default(),
    };
    overrides.apply(&mut settings);
    settings.validate()?;

    let output = output.unwrap_or_else(|| {
        input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("separated")
    });

    if !quiet {
        eprintln!("🎵 Stem Splitter");
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("Input:  {}", input.display());
        eprintln!("Output: {}", output.display());
        eprintln!("Model:  {}", if model.name.is_empty() { "(default)" } else { model.name.as_str() });
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!();
    }

    let mut audio = read_audio(input)?;
    if audio.sample_rate != settings.sample_rate {
        info!(from = audio.sample_rate, to = settings.sample_rate, "resampling input");
        audio = resample(&audio, settings.sample_rate)?;
    }

    let mut config = SupervisorConfig::new(WorkerCommand::current_exe()?);
    config.job_timeout = timeout;
    let supervisor = JobSupervisor::new(config);
    let job = supervisor.submit(&audio, &model, &settings)?;

    let stems = loop {
        let Some(message) = job.recv() else {
            bail!("worker channel closed without a result");
        };
        match message {
            JobMessage::Progress { percent } => {
                if !quiet {
                    eprint!("\r🔄 Processing: {percent:>3}%");
                    if percent >= 100 {
                        eprintln!();
                    }
                }
            }
            JobMessage::Status { text } => {
                if !quiet {
                    eprintln!("⏳ {text}");
                }
            }
            JobMessage::Success { stems } => break stems,
            JobMessage::Error { message } => return Err(anyhow!(message)),
            JobMessage::Cancelled => bail!("separation cancelled"),
        }
    };

    std::fs::create_dir_all(&output)?;
    let base = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");

    let mut written = Vec::with_capacity(stems.len());
    for (i, (name, buffer)) in stems.iter().enumerate() {
        let name = name.map(str::to_string).unwrap_or_else(|| format!("stem{i}"));
        let path = unique_path(&output.join(format!("{base}_{name}.wav")));
        write_audio(&path, buffer)?;
        written.push((name, path));
    }

    if !quiet {
        eprintln!();
        eprintln!("✅ Split completed successfully!");
        eprintln!();
        eprintln!("Output files:");
        for (name, path) in &written {
            eprintln!("  {name}: {}", path.display());
        }
    } else {
        for (_, path) in &written {
            println!("{}", path.display());
        }
    }

    Ok(())
}

fn handle_mix(
    inputs: &[PathBuf],
    output: &Path,
    gains: &[(String, f32)],
    mute: &[String],
    solo: &[String],
) -> anyhow::Result<()> {
    let stems = inputs
        .iter()
        .map(|path| {
            let audio = read_audio(path)?;
            Ok((stem_name(path), audio))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut settings = MixSettings::new();
    for (name, gain) in gains {
        settings.set_gain(name, *gain);
    }
    for name in mute {
        settings.set_muted(name, true);
    }
    for name in solo {
        settings.set_solo(name, true);
    }

    let mix = remix(&stems, &settings)?;
    let path = unique_path(output);
    write_audio(&path, &mix)?;
    eprintln!("✅ Mix written to {}", path.display());
    Ok(())
}

fn parse_gain(s: &str) -> Result<(String, f32), String> {
    let (name, gain) = s
        .split_once('=')
        .ok_or_else(|| format!("expected `stem=gain`, got `{s}`"))?;
    let gain = gain
        .parse::<f32>()
        .map_err(|e| format!("invalid gain `{gain}`: {e}"))?;
    Ok((name.to_string(), gain))
}

fn handle_list() -> anyhow::Result<()> {
    let registry = registry()?;

    eprintln!("📋 Available Models");
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for model in &registry.models {
        let marker = if model.name == registry.default { " (default)" } else { "" };
        eprintln!("  • {}{} - {}", model.name, marker, model.description);
    }
    eprintln!();
    eprintln!("Use --model <name> to specify a model");

    Ok(())
}
