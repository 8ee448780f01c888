use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use std::{panic, process};

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command, value_parser};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use depthcast::capture::{CaptureHandle, SensorSession, SyntheticConfig, SyntheticSession};
use depthcast::config::{AppConfig, app_name, version};
use depthcast::decoder::JpegDecoderFactory;
use depthcast::depth::{DepthCodec, DepthFrame};
use depthcast::encoder::JpegEncoder;
use depthcast::net::{TransportSender, serve};
use depthcast::pipeline::receiver::FrameSink;
use depthcast::pipeline::receiver::coordinator::ReceiverOptions;
use depthcast::pipeline::sender::SenderCoordinator;
use depthcast::pipeline::{CaptureClock, ColorFrame, Timestamp};
use depthcast::protocol::FramePacketCodec;
use depthcast::recording::{FfmpegWriterFactory, Synchronizer};

fn cli() -> Command {
    let duration = Arg::new("duration")
        .long("duration")
        .value_name("SECS")
        .help("Stop after this many seconds.")
        .value_parser(value_parser!(f64));

    Command::new(app_name())
        .version(version())
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file.")
                .global(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .subcommand(
            Command::new("serve")
                .about("Accept streams and decode both channels.")
                .arg(
                    Arg::new("listen")
                        .short('l')
                        .long("listen")
                        .value_name("ADDR")
                        .help("Address to listen on."),
                )
                .arg(
                    Arg::new("record")
                        .long("record")
                        .value_name("DIR")
                        .help("Record decoded frames into DIR.")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("stream")
                .about("Stream the synthetic sensor to a consumer.")
                .arg(
                    Arg::new("connect")
                        .long("connect")
                        .value_name("ADDR")
                        .help("Consumer address."),
                )
                .arg(
                    Arg::new("fps")
                        .long("fps")
                        .value_name("N")
                        .help("Color frame rate.")
                        .value_parser(value_parser!(u32).range(1..=120)),
                )
                .arg(duration.clone()),
        )
        .subcommand(
            Command::new("record")
                .about("Record the synthetic sensor into two local files.")
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("DIR")
                        .help("Output directory.")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(duration),
        )
}

fn main() {
    tracing_subscriber::fmt::init();

    // kill the process as soon as a worker thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    if let Err(e) = run(cli().get_matches()) {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn run(matches: ArgMatches) -> Result<()> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    // first Ctrl-C stops gracefully, the second one exits
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        if token.is_cancelled() {
            process::exit(130);
        }
        info!("Interrupted, stopping");
        token.cancel();
    })
    .context("Error setting Ctrl-C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    info!("{} {}", app_name(), version());
    match matches.subcommand() {
        Some(("serve", sub)) => runtime.block_on(run_serve(config, sub, cancel)),
        Some(("stream", sub)) => runtime.block_on(run_stream(config, sub, cancel)),
        Some(("record", sub)) => runtime.block_on(run_record(config, sub, cancel)),
        _ => anyhow::bail!("no command given"),
    }
}

/// Logs the first frame of each stream and counts the rest
#[derive(Default)]
struct LoggingSink {
    color: AtomicU64,
    depth: AtomicU64,
}

impl FrameSink for LoggingSink {
    fn on_color(&self, frame: ColorFrame, timestamp: Timestamp, frame_number: u32) {
        if self.color.fetch_add(1, Ordering::Relaxed) == 0 {
            info!(
                "First RGB frame #{} at {}: {}x{}",
                frame_number, timestamp, frame.width, frame.height
            );
        }
    }

    fn on_depth(&self, frame: DepthFrame, timestamp: Timestamp, frame_number: u32) {
        if self.depth.fetch_add(1, Ordering::Relaxed) == 0 {
            info!(
                "First depth frame #{} at {}: {}x{}, {} valid",
                frame_number,
                timestamp,
                frame.width,
                frame.height,
                frame.valid_count()
            );
        }
    }
}

fn cancel_after(cancel: &CancellationToken, secs: Option<f64>) {
    if let Some(secs) = secs {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
            info!("Duration of {}s reached", secs);
            token.cancel();
        });
    }
}

async fn run_serve(config: AppConfig, args: &ArgMatches, cancel: CancellationToken) -> Result<()> {
    let addr = args
        .get_one::<String>("listen")
        .cloned()
        .unwrap_or_else(|| config.network.addr.clone());

    let recorder = match args.get_one::<PathBuf>("record") {
        Some(dir) => {
            let mut recording = config.recording.clone();
            recording.output_dir = dir.clone();
            let sync = Arc::new(Synchronizer::new(
                Arc::new(FfmpegWriterFactory::default()),
                config.depth,
            ));
            sync.start(&recording)?;
            Some(sync)
        }
        None => None,
    };
    let sink: Arc<dyn FrameSink> = match &recorder {
        Some(sync) => sync.clone(),
        None => Arc::new(LoggingSink::default()),
    };

    let served = serve(
        addr,
        ReceiverOptions::from(&config),
        Arc::new(JpegDecoderFactory),
        sink,
        cancel,
    )
    .await;

    if let Some(sync) = recorder {
        let files = sync.stop().await?;
        for file in files {
            info!("Recorded {}", file.display());
        }
    }
    served
}

async fn run_stream(config: AppConfig, args: &ArgMatches, cancel: CancellationToken) -> Result<()> {
    let addr = args
        .get_one::<String>("connect")
        .cloned()
        .unwrap_or_else(|| config.network.addr.clone());
    let mut synthetic = SyntheticConfig {
        range: config.depth,
        ..SyntheticConfig::default()
    };
    if let Some(fps) = args.get_one::<u32>("fps") {
        synthetic.fps = *fps;
    }

    let transport = TransportSender::connect(
        addr.as_str(),
        FramePacketCodec::new(config.network.max_payload_size),
    )
    .await
    .with_context(|| format!("cannot reach {}", addr))?;

    let mut sender =
        SenderCoordinator::new(CaptureClock::new()).with_log_interval(config.log_interval());
    sender
        .start(
            Box::new(SyntheticSession::new(synthetic)),
            Box::new(JpegEncoder::default()),
            DepthCodec::new(config.depth),
            transport,
        )
        .await?;

    cancel_after(&cancel, args.get_one::<f64>("duration").copied());
    sender.run(cancel).await
}

async fn run_record(config: AppConfig, args: &ArgMatches, cancel: CancellationToken) -> Result<()> {
    let mut recording = config.recording.clone();
    if let Some(dir) = args.get_one::<PathBuf>("output") {
        recording.output_dir = dir.clone();
    }

    let sync = Synchronizer::new(Arc::new(FfmpegWriterFactory::default()), config.depth);
    sync.start(&recording)?;

    let (handle, streams) = CaptureHandle::new(CaptureClock::new());
    let mut session = SyntheticSession::new(SyntheticConfig {
        range: config.depth,
        ..SyntheticConfig::default()
    });
    session.start(handle.with_health(sync.health().clone())).await?;

    cancel_after(&cancel, args.get_one::<f64>("duration").copied());
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = sync.record_from(streams) => {}
    }

    session.stop().await?;
    let files = sync.stop().await?;
    for file in files {
        info!("Recorded {}", file.display());
    }
    Ok(())
}
