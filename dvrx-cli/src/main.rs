mod config;
mod logging;
mod stats;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{eyre, Context, Result};

use dvrx_core::config::{KeystreamSpec, ProtocolSet, SinkSelector};
use dvrx_core::modulation::Modulation;
use dvrx_core::receiver::Receiver;
use dvrx_core::sinks::{AudioSink, DeviceSink, NullSink, StdoutSink, UdpSink, WavSink};
use dvrx_core::source::{
    DibitFileSource, FileSource, RigctlClient, SampleSource, TcpPcmSource, UdpPcmSource,
};
use dvrx_core::sync::Protocol;
use dvrx_core::tables::{GroupList, Keyring, LcnMap, SharedGroups};
use dvrx_core::vocoder::{SilenceVocoder, ToneVocoder, Vocoder};

use config::CliConfig;
use logging::{LogEvent, StructuredLogger};
use stats::StatsAggregator;

#[derive(Parser, Debug)]
#[command(author, version, about = "dvrx digital voice receiver", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input selector: wav:<path>, dibits:<path>, tcp:<host:port>, udp:<addr>
    #[arg(short, long)]
    input: Option<String>,

    /// Output selector: device, stdout, udp:<addr>, wav:<dir>, null
    #[arg(short, long)]
    output: Option<String>,

    /// Hamlib-style rigctl endpoint for retunes (host:port)
    #[arg(long)]
    rigctl: Option<String>,

    /// Declared sample rate for network PCM inputs
    #[arg(long)]
    input_rate: Option<u32>,

    /// Frequency the source starts on, in Hz (control channel)
    #[arg(short = 'f', long)]
    freq: Option<u32>,

    /// Force the C4FM slicer
    #[arg(long = "c4fm", alias = "mc")]
    force_c4fm: bool,

    /// Force the GFSK slicer
    #[arg(long = "gfsk", alias = "mg")]
    force_gfsk: bool,

    /// Force the CQPSK slicer
    #[arg(long = "qpsk", alias = "mq", visible_alias = "m2")]
    force_qpsk: bool,

    /// Comma-separated protocol enables (p25p1,p25p2,dmr,nxdn,dpmr,ysf,dstar,m17,provoice,edacs,x2tdma)
    #[arg(long, value_delimiter = ',')]
    protocols: Vec<String>,

    /// Enable every protocol family
    #[arg(long)]
    all_protocols: bool,

    /// Voice-channel hangtime in seconds
    #[arg(long)]
    hangtime: Option<f64>,

    /// Tune private calls
    #[arg(long)]
    tune_private: bool,

    /// Tune data calls
    #[arg(long)]
    tune_data: bool,

    /// Tune encrypted calls
    #[arg(long)]
    tune_enc: bool,

    /// Disable group-call tuning
    #[arg(long)]
    no_tune_group: bool,

    /// Only tune talkgroups present in the group list
    #[arg(long)]
    allow_list: bool,

    /// Hold on one talkgroup, muting and rejecting everything else
    #[arg(long)]
    tg_hold: Option<u32>,

    /// Static keystream spec bits:hexbytes[:offset[:step]] (repeatable)
    #[arg(short = 'S', long = "keystream")]
    keystreams: Vec<String>,

    /// Talkgroup table CSV (tg,mode,name,alg)
    #[arg(long)]
    groups: Option<PathBuf>,

    /// LCN frequency map CSV (lcn,freq_hz)
    #[arg(long)]
    lcn: Option<PathBuf>,

    /// Keyring CSV (key_id,algid,hexkey)
    #[arg(long)]
    keys: Option<PathBuf>,

    /// Event log file
    #[arg(long)]
    event_log: Option<PathBuf>,

    /// Mono output instead of stereo
    #[arg(long)]
    mono: bool,

    /// Use the audible tone vocoder double instead of silence
    #[arg(long)]
    tone_vocoder: bool,

    /// Verbose status output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_protocol(name: &str) -> Result<Protocol> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "p25p1" => Protocol::P25p1,
        "p25p2" => Protocol::P25p2,
        "x2tdma" => Protocol::X2Tdma,
        "dmr" => Protocol::Dmr,
        "nxdn" => Protocol::Nxdn,
        "dpmr" => Protocol::Dpmr,
        "ysf" => Protocol::Ysf,
        "dstar" => Protocol::Dstar,
        "m17" => Protocol::M17,
        "provoice" => Protocol::ProVoice,
        "edacs" => Protocol::Edacs,
        other => return Err(eyre!("unknown protocol {:?}", other)),
    })
}

fn apply_overrides(config: &mut CliConfig, args: &Cli) -> Result<()> {
    if args.input.is_some() {
        config.input = args.input.clone();
    }
    if args.output.is_some() {
        config.output = args.output.clone();
    }
    if args.rigctl.is_some() {
        config.rigctl = args.rigctl.clone();
    }
    if args.input_rate.is_some() {
        config.input_rate = args.input_rate;
    }
    if let Some(freq) = args.freq {
        config.receiver.initial_freq_hz = freq;
    }

    if args.force_c4fm {
        config.receiver.modulation_lock = Some(Modulation::C4fm);
    }
    if args.force_gfsk {
        config.receiver.modulation_lock = Some(Modulation::Gfsk);
    }
    if args.force_qpsk {
        config.receiver.modulation_lock = Some(Modulation::Cqpsk);
    }

    if args.all_protocols {
        config.receiver.protocols = ProtocolSet::all();
    } else if !args.protocols.is_empty() {
        let mut set = ProtocolSet::only(parse_protocol(&args.protocols[0])?);
        for name in &args.protocols[1..] {
            set.set_enabled(parse_protocol(name)?, true);
        }
        config.receiver.protocols = set;
    }

    let trunk = &mut config.receiver.trunk;
    if let Some(hangtime) = args.hangtime {
        trunk.hangtime_secs = hangtime;
    }
    if args.tune_private {
        trunk.tune_private_calls = true;
    }
    if args.tune_data {
        trunk.tune_data_calls = true;
    }
    if args.tune_enc {
        trunk.tune_enc_calls = true;
    }
    if args.no_tune_group {
        trunk.tune_group_calls = false;
    }
    if args.allow_list {
        trunk.use_allow_list = true;
    }
    if let Some(tg) = args.tg_hold {
        trunk.tg_hold = tg;
    }

    if args.mono {
        config.receiver.audio.stereo = false;
    }
    if let Some(path) = &args.groups {
        config.groups_csv = Some(path.clone());
    }
    if let Some(path) = &args.lcn {
        config.lcn_csv = Some(path.clone());
    }
    if let Some(path) = &args.keys {
        config.keys_csv = Some(path.clone());
    }
    if let Some(path) = &args.event_log {
        config.event_log = Some(path.clone());
    }
    config.keystreams.extend(args.keystreams.iter().cloned());

    // Output selector also shapes the receiver's sink config so WAV
    // suffix handling stays in one place.
    if let Some(output) = &config.output {
        let (kind, rest) = CliConfig::split_selector(output)?;
        config.receiver.audio.sink = match kind {
            "device" => SinkSelector::Device,
            "stdout" => SinkSelector::Stdout,
            "udp" => SinkSelector::Udp { addr: rest.into() },
            "wav" => SinkSelector::Wav { dir: rest.into() },
            "null" => SinkSelector::Null,
            other => return Err(eyre!("unknown output {:?}", other)),
        };
    }
    Ok(())
}

fn build_sink(config: &CliConfig) -> Result<Box<dyn AudioSink>> {
    Ok(match &config.receiver.audio.sink {
        SinkSelector::Device => Box::new(DeviceSink::open()?),
        SinkSelector::Stdout => Box::new(StdoutSink::new(config.receiver.audio.float_output)),
        SinkSelector::Udp { addr } => Box::new(UdpSink::connect(addr)?),
        SinkSelector::Wav { dir } => Box::new(WavSink::create(
            std::path::Path::new(dir),
            &config.receiver.audio.wav_suffix,
            config.receiver.audio.stereo,
        )?),
        SinkSelector::Null => Box::new(NullSink),
    })
}

enum Input {
    Samples(Box<dyn SampleSource>),
    Dibits(DibitFileSource),
}

fn build_input(config: &CliConfig) -> Result<Input> {
    let selector = config
        .input
        .as_deref()
        .ok_or_else(|| eyre!("no input configured; pass --input or set it in the config"))?;
    let (kind, rest) = CliConfig::split_selector(selector)?;
    let rate = config.input_rate.unwrap_or(48_000);

    let rigctl = match &config.rigctl {
        Some(endpoint) => {
            let (host, port) = endpoint
                .rsplit_once(':')
                .ok_or_else(|| eyre!("rigctl endpoint must be host:port"))?;
            Some(RigctlClient::connect(host, port.parse()?)?)
        }
        None => None,
    };

    Ok(match kind {
        "wav" => Input::Samples(Box::new(FileSource::open(
            std::path::Path::new(rest),
            rate,
        )?)),
        "dibits" => Input::Dibits(DibitFileSource::open(std::path::Path::new(rest))?),
        "tcp" => Input::Samples(Box::new(TcpPcmSource::connect(rest, rate, rigctl)?)),
        "udp" => Input::Samples(Box::new(UdpPcmSource::bind(rest, rate)?)),
        other => return Err(eyre!("unknown input {:?}", other)),
    })
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    let mut config = match &args.config {
        Some(path) => CliConfig::from_file(path)
            .wrap_err_with(|| format!("loading config {}", path.display()))?,
        None => CliConfig::default(),
    };
    apply_overrides(&mut config, &args)?;
    config.receiver.trunk.validate()?;

    // Keystream specs are validated up front; a bad spec is a startup
    // error, not a runtime surprise.
    let mut keystreams = Vec::new();
    for spec in &config.keystreams {
        keystreams.push(KeystreamSpec::parse(spec)?);
    }

    let mut logger = StructuredLogger::new(config.event_log.as_deref())?;
    logger.log(LogEvent::Info {
        message: format!(
            "dvrx starting: protocols {:?}, hangtime {:.2}s",
            config
                .receiver
                .protocols
                .enabled()
                .iter()
                .map(|p| p.ftype())
                .collect::<Vec<_>>(),
            config.receiver.trunk.hangtime_secs,
        ),
    })?;

    let groups = match &config.groups_csv {
        Some(path) => GroupList::from_csv(path)?,
        None => GroupList::default(),
    };
    let shared_groups = SharedGroups::new(groups);

    let sink = build_sink(&config)?;
    let vocoder: Box<dyn Vocoder> = if args.tone_vocoder {
        Box::new(ToneVocoder::new())
    } else {
        Box::new(SilenceVocoder)
    };

    let input = build_input(&config)?;
    let receiver_config = config.receiver.clone();

    match input {
        Input::Samples(source) => {
            let mut receiver = Receiver::new(
                source,
                receiver_config,
                sink,
                vocoder,
                shared_groups,
            );
            configure_receiver(&mut receiver, &config, keystreams)?;
            spawn_status_thread(&receiver, args.verbose);
            receiver.run()?;
        }
        Input::Dibits(mut dibit_source) => {
            let mut receiver = Receiver::new(
                dvrx_core::source::SyntheticSource::new(Vec::new(), 48_000, false),
                receiver_config,
                sink,
                vocoder,
                shared_groups,
            );
            configure_receiver(&mut receiver, &config, keystreams)?;
            spawn_status_thread(&receiver, args.verbose);
            if args.verbose {
                receiver
                    .logger_mut()
                    .set_min_level(dvrx_core::logging::LogLevel::Debug);
            }

            let runtime = receiver.runtime();
            let start = std::time::Instant::now();
            let mut buf = [0u8; 4096];
            loop {
                if runtime.exit_requested() {
                    break;
                }
                let n = match dibit_source.read_dibits(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(_) => break,
                };
                let now = start.elapsed().as_secs_f64();
                for &d in &buf[..n] {
                    receiver.process_dibit(d, 200, now);
                }
                receiver.pump()?;
                if args.verbose {
                    for entry in receiver.logger_mut().drain() {
                        eprintln!("[{}] {}: {}", entry.level, entry.subsystem, entry.message);
                    }
                }
            }
        }
    }

    logger.log(LogEvent::Info {
        message: "dvrx exiting".into(),
    })?;
    Ok(())
}

fn configure_receiver<S: SampleSource>(
    receiver: &mut Receiver<S>,
    config: &CliConfig,
    keystreams: Vec<KeystreamSpec>,
) -> Result<()> {
    if let Some(path) = &config.lcn_csv {
        receiver.set_lcn_map(LcnMap::from_csv(path)?);
    }
    if let Some(path) = &config.keys_csv {
        receiver.set_keyring(Keyring::from_csv(path)?);
    }
    receiver.set_keystreams(keystreams);
    Ok(())
}

/// Background status printer: reads UI snapshots, never touches core
/// state. Exits with the process.
fn spawn_status_thread<S: SampleSource>(receiver: &Receiver<S>, verbose: bool) {
    if !verbose {
        return;
    }
    let runtime = receiver.runtime();
    std::thread::spawn(move || {
        let mut stats = StatsAggregator::new();
        loop {
            if runtime.exit_requested() {
                break;
            }
            let snapshot = runtime.snapshots.latest();
            if stats.update(&snapshot) {
                eprintln!(
                    "[status] {} carrier={} trunk={} cc={} tg={}/{} ({} calls, {:.0}% carrier)",
                    snapshot.ftype,
                    snapshot.carrier,
                    snapshot.trunk_state,
                    snapshot.cc_freq,
                    snapshot.slots[0].tg,
                    snapshot.slots[1].tg,
                    stats.calls_observed(),
                    stats.carrier_ratio() * 100.0,
                );
            }
            std::thread::sleep(Duration::from_millis(500));
        }
    });
}
