use anyhow::Result;
use crossbeam_channel::Sender;
use murmur::billing::{BillingProvider, LocalBilling};
use murmur::engine::curation::{CurationClient, HttpCurator};
use murmur::engine::playback::PlaybackQueue;
use murmur::engine::{EngineConfig, EngineHandle, EngineReport};
use murmur::link::loopback::LoopbackConnector;
use murmur::{
    Coordinator, EngineLauncher, MurmurConfig, PresentationClient, SessionEngine, SessionStore,
};
use std::io::{self, BufRead, Write};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Offline curator used when no API key is configured; keeps the
/// lore pipeline exercisable without network access.
struct LocalCurator;

impl CurationClient for LocalCurator {
    fn distill(&self, user_text: &str, _model_text: &str) -> murmur::Result<String> {
        let fact = user_text.split(['.', '!', '?']).next().unwrap_or("").trim();
        Ok(format!("The user said: {fact}"))
    }
}

/// Builds the engine host in-process
struct LocalEngineLauncher {
    config: MurmurConfig,
    store: SessionStore,
}

impl EngineLauncher for LocalEngineLauncher {
    fn launch(&mut self, report_tx: Sender<EngineReport>) -> murmur::Result<EngineHandle> {
        let engine_config = EngineConfig {
            daily_limit: self.config.daily_limit,
            output_sample_rate: self.config.output_sample_rate,
            frame_size: self.config.frame_size,
            spectrum_bins: self.config.spectrum_bins,
            voice: self.config.voice.clone(),
            ..EngineConfig::default()
        };

        let curator: Box<dyn CurationClient> = match &self.config.api_key {
            Some(key) => Box::new(HttpCurator::new(key, &self.config.curation_model)),
            None => Box::new(LocalCurator),
        };

        let (capture, playback) = build_audio(&engine_config)?;
        let connector = Box::new(LoopbackConnector::new().with_echo());

        let (engine, handle) = SessionEngine::new(
            engine_config,
            &self.store,
            connector,
            curator,
            capture,
            playback,
            report_tx,
        )?;
        engine.start();
        Ok(handle)
    }
}

#[cfg(feature = "audio-io")]
fn build_audio(
    config: &EngineConfig,
) -> murmur::Result<(Box<dyn murmur::engine::CaptureSource>, PlaybackQueue)> {
    use murmur::engine::capture::MicCapture;
    use murmur::engine::sink::AudioSink;

    let mut sink = AudioSink::new()?;
    let (sink_tx, sink_rx) = crossbeam_channel::bounded(256);
    let clock = sink.clock();
    sink.start(sink_rx)?;
    // The output stream must outlive the session
    std::mem::forget(sink);

    let playback = PlaybackQueue::new(Box::new(clock), sink_tx);
    Ok((Box::new(MicCapture::new(config.frame_size)), playback))
}

#[cfg(not(feature = "audio-io"))]
fn build_audio(
    _config: &EngineConfig,
) -> murmur::Result<(Box<dyn murmur::engine::CaptureSource>, PlaybackQueue)> {
    use murmur::engine::playback::SystemClock;
    use murmur::engine::NullCapture;

    let (sink_tx, _sink_rx) = crossbeam_channel::bounded(256);
    let playback = PlaybackQueue::new(Box::new(SystemClock::new()), sink_tx);
    Ok((Box::new(NullCapture::new()), playback))
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Murmur voice session host");

    let config = MurmurConfig::load(&MurmurConfig::default_path())?;
    let store = SessionStore::open(&config.data_dir)?;

    let launcher = LocalEngineLauncher { config, store };
    let (coordinator, coordinator_handle) = Coordinator::new(Box::new(launcher));
    let worker = coordinator.start();

    let mut client = PresentationClient::connect(coordinator_handle.clone())?;

    let mut billing = LocalBilling::new();
    billing.initialize(&format!("install-{}", uuid::Uuid::new_v4()))?;
    client.sync_entitlement(&billing)?;

    println!("murmur ready. commands: start | stop | reset | buy | sub on | sub off | state | quit");
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        client.pump();

        match line.trim() {
            "start" => client.start_recording()?,
            "stop" => client.stop_recording()?,
            "reset" => client.reset_session()?,
            "buy" => {
                let offerings = billing.offerings()?;
                let offering = &offerings[0];
                println!("purchasing {} ({})", offering.identifier, offering.price_label);
                client.purchase(&mut billing, offering)?;
            }
            "sub on" => client.set_subscribed(true)?,
            "sub off" => client.set_subscribed(false)?,
            "state" => {
                client.request_state()?;
                client.pump_blocking();
                let state = client.state();
                println!(
                    "recording={} subscribed={} usage={} persona={} status={:?}",
                    state.recording,
                    state.subscribed,
                    state.usage_count,
                    state.persona,
                    state.status
                );
                if !state.error.is_empty() {
                    println!("error: {}", state.error);
                }
                continue;
            }
            "quit" | "exit" => break,
            "" => continue,
            other => {
                println!("unknown command: {other}");
                continue;
            }
        }

        // Give the engine a moment, then show the resulting status
        std::thread::sleep(std::time::Duration::from_millis(100));
        if client.pump() {
            println!("status: {}", client.state().status);
        }
    }

    coordinator_handle.shutdown();
    let _ = worker.join();
    Ok(())
}
