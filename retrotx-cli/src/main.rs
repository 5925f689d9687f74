mod config;
mod wav;

use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use retrotx_core::config::{Features, OutputModulation};
use retrotx_core::mux::{run_channels, ChannelSpec, MuxStats};
use retrotx_core::rf::{FileFormat, FileSink, RadioSink};
use retrotx_core::source::TestPatternSource;
use retrotx_core::video::presets;
use retrotx_core::{SystemClock, TxError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Analogue television transmitter", long_about = None)]
struct Cli {
    /// Transmission standard preset (pal-i, pal-bg, ntsc-m, secam-l,
    /// 405, 819, d2mac, ...)
    #[arg(short, long, default_value = "pal-i")]
    mode: String,

    /// Output file path, or '-' for stdout
    #[arg(short, long, default_value = "-")]
    output: String,

    /// Output sample format: uint8, int8, uint16, int16, int32, float
    #[arg(short = 't', long, default_value = "int16")]
    format: String,

    /// Output sample rate in Hz
    #[arg(short, long, default_value_t = 16_000_000)]
    sample_rate: u32,

    /// Seconds of output to generate (runs until interrupted if unset)
    #[arg(short = 'd', long)]
    duration: Option<f64>,

    /// Multi-channel TOML preset file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Teletext source: TTI file, directory, or raw:<path>
    #[arg(long)]
    teletext: Option<String>,

    /// WSS mode: 4:3, 16:9, 14:9-letterbox, 16:9-letterbox, auto
    #[arg(long)]
    wss: Option<String>,

    /// Videocrypt I mode (free, conditional, sky07, sky09, tac1,
    /// tac2, xtea, ppv)
    #[arg(long)]
    videocrypt: Option<String>,

    /// Videocrypt II mode (free, conditional)
    #[arg(long)]
    videocrypt2: Option<String>,

    /// Videocrypt S mode (free)
    #[arg(long)]
    videocrypts: Option<String>,

    /// Nagravision Syster provider id
    #[arg(long)]
    syster: Option<String>,

    /// Syster cut-and-rotate provider id
    #[arg(long)]
    systercnr: Option<String>,

    /// Invert the audio spectrum for Syster decoders
    #[arg(long)]
    systeraudio: bool,

    /// Discret 11 provider id
    #[arg(long)]
    d11: Option<String>,

    /// Eurocrypt provider id (MAC modes)
    #[arg(long)]
    eurocrypt: Option<String>,

    /// Enable analogue copy protection
    #[arg(long)]
    acp: bool,

    /// Insertion test signals
    #[arg(long)]
    vits: bool,

    /// Vertical interval timecode
    #[arg(long)]
    vitc: bool,

    /// EIA-608 closed captions
    #[arg(long)]
    cc608: bool,

    /// Sound-in-Syncs mode (dcsis)
    #[arg(long)]
    sis: Option<String>,

    /// Log ECM/EMM contents
    #[arg(long)]
    show_ecm: bool,

    /// WAV file for the test source audio
    #[arg(long)]
    audio: Option<PathBuf>,

    /// Test pattern: bars or grey
    #[arg(long, default_value = "bars")]
    pattern: String,

    /// Overall output level
    #[arg(long)]
    level: Option<f64>,
}

fn features_from_cli(cli: &Cli) -> Features {
    Features {
        teletext: cli.teletext.clone(),
        wss: cli.wss.clone(),
        videocrypt: cli.videocrypt.clone(),
        videocrypt2: cli.videocrypt2.clone(),
        videocrypts: cli.videocrypts.clone(),
        syster: cli.syster.clone(),
        systercnr: cli.systercnr.clone(),
        systeraudio: cli.systeraudio,
        d11: cli.d11.clone(),
        eurocrypt: cli.eurocrypt.clone(),
        acp: cli.acp,
        vits: cli.vits,
        vitc: cli.vitc,
        cc608: cli.cc608,
        sis: cli.sis.clone(),
        scramble_video: cli.eurocrypt.is_some(),
        scramble_audio: false,
        show_ecm: cli.show_ecm,
    }
}

fn make_source(cli: &Cli, audio_rate: u32) -> Result<Box<TestPatternSource>> {
    let mut src = match cli.pattern.as_str() {
        "grey" | "gray" => TestPatternSource::grey(704, 576, audio_rate),
        "bars" => TestPatternSource::new(704, 576, audio_rate).with_tone(1000.0, 0.5),
        other => return Err(eyre!("unknown test pattern '{other}'")),
    };

    if let Some(path) = &cli.audio {
        src = wav::attach_wav_tone(src, path)
            .wrap_err_with(|| format!("loading {}", path.display()))?;
    }

    Ok(Box::new(src))
}

fn build_channels(cli: &Cli) -> Result<(Vec<ChannelSpec>, u32)> {
    let mut channels = Vec::new();
    let mut sample_rate = cli.sample_rate;

    if let Some(path) = &cli.config {
        let preset = config::PresetFile::load(path)?;
        if let Some(rate) = preset.sample_rate {
            sample_rate = rate;
        }

        for ch in preset.channels {
            let mut conf = presets::preset(&ch.mode)
                .map_err(|e| eyre!("channel mode: {e}"))?;
            conf.features = Features {
                teletext: ch.teletext,
                wss: ch.wss,
                videocrypt: ch.videocrypt,
                videocrypt2: ch.videocrypt2,
                videocrypts: ch.videocrypts,
                syster: ch.syster,
                systercnr: ch.systercnr,
                systeraudio: ch.systeraudio,
                d11: ch.d11,
                eurocrypt: ch.eurocrypt,
                acp: ch.acp,
                vits: ch.vits,
                vitc: ch.vitc,
                cc608: ch.cc608,
                sis: ch.sis,
                scramble_video: false,
                scramble_audio: false,
                show_ecm: cli.show_ecm,
            };
            if let Some(level) = ch.level {
                conf.level = level;
            }
            let audio_rate = conf.audio_sample_rate;
            channels.push(ChannelSpec {
                config: conf,
                source: make_source(cli, audio_rate)?,
                offset_hz: ch.offset,
            });
        }
    } else {
        let mut conf = presets::preset(&cli.mode).map_err(|e| eyre!("{e}"))?;
        conf.features = features_from_cli(cli);
        if let Some(level) = cli.level {
            conf.level = level;
        }
        let audio_rate = conf.audio_sample_rate;
        channels.push(ChannelSpec {
            config: conf,
            source: make_source(cli, audio_rate)?,
            offset_hz: 0,
        });
    }

    Ok((channels, sample_rate))
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    let Some(format) = FileFormat::from_id(&cli.format) else {
        eprintln!("argument error: unknown output format '{}'", cli.format);
        std::process::exit(2);
    };

    let (channels, sample_rate) = match build_channels(&cli) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("argument error: {e}");
            std::process::exit(2);
        }
    };

    // Real output only makes sense for a single unmodulated channel.
    let complex = channels.len() > 1
        || !matches!(channels[0].config.modulation, OutputModulation::None);

    let sink: Box<dyn RadioSink> =
        Box::new(FileSink::create(&cli.output, format, complex).map_err(|e| eyre!("{e}"))?);

    let abort = Arc::new(AtomicBool::new(false));
    {
        let abort = abort.clone();
        ctrlc::set_handler(move || {
            log::info!("interrupt: draining");
            abort.store(true, Ordering::Relaxed);
        })
        .wrap_err("installing signal handler")?;
    }

    let sample_limit = cli
        .duration
        .map(|secs| (secs * sample_rate as f64) as u64);

    // Progress display for bounded file output.
    let stats = Arc::new(MuxStats::default());
    let progress = match (sample_limit, cli.output.as_str()) {
        (Some(limit), out) if out != "-" => {
            let bar = indicatif::ProgressBar::new(limit);
            bar.set_style(
                indicatif::ProgressStyle::with_template(
                    "{bar:40} {percent}% {msg}",
                )
                .unwrap(),
            );
            let stats = stats.clone();
            let abort = abort.clone();
            let b = bar.clone();
            std::thread::spawn(move || {
                while !abort.load(Ordering::Relaxed) && !b.is_finished() {
                    let n = stats.samples.load(Ordering::Relaxed);
                    b.set_position(n.min(limit));
                    if n >= limit {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(200));
                }
            });
            Some(bar)
        }
        _ => None,
    };

    let result = run_channels(
        channels,
        sample_rate,
        sink,
        Arc::new(SystemClock),
        abort,
        sample_limit,
        stats,
    );

    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    match result {
        Ok(()) => Ok(()),
        Err(TxError::Config(e)) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("synthesis error: {e}");
            std::process::exit(1);
        }
    }
}
