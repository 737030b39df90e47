use anyhow::{bail, Context};
use clap::Parser;
use realtime_transcriber::{RealtimeTranscriber, TranscriberConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Stream a WAV file to the real-time transcription service
#[derive(Parser, Debug)]
#[command(name = "realtime-transcribe", version, about)]
struct Args {
    /// 16-bit PCM WAV file to transcribe
    #[arg(short, long)]
    file: PathBuf,

    /// Words or phrases to boost, comma separated
    #[arg(short, long, value_delimiter = ',')]
    word_boost: Vec<String>,

    /// Audio sent per frame, in milliseconds
    #[arg(long, default_value_t = 250)]
    chunk_ms: u64,

    /// Do not pace audio in real time
    #[arg(long)]
    no_pacing: bool,
}

fn load_pcm(path: &PathBuf) -> anyhow::Result<(u32, u16, Vec<u8>)> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let format = reader.spec();
    if format.bits_per_sample != 16 || format.sample_format != hound::SampleFormat::Int {
        bail!(
            "Expected 16-bit integer PCM, got {} bits ({:?})",
            format.bits_per_sample,
            format.sample_format
        );
    }

    let mut pcm = Vec::with_capacity(reader.len() as usize * 2);
    for sample in reader.samples::<i16>() {
        pcm.extend_from_slice(&sample?.to_le_bytes());
    }
    Ok((format.sample_rate, format.channels, pcm))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let (sample_rate, channels, pcm) = load_pcm(&args.file)?;
    if channels != 1 {
        log::warn!("{} channels in input; the service expects mono audio", channels);
    }
    log::info!(
        "🎵 Loaded {} bytes of audio at {} Hz from {}",
        pcm.len(),
        sample_rate,
        args.file.display()
    );

    let config = TranscriberConfig::from_env()
        .context("Set ASSEMBLYAI_API_KEY or ASSEMBLYAI_TOKEN (a .env file works too)")?
        .with_sample_rate(sample_rate)
        .with_word_boost(args.word_boost.iter().map(|w| w.trim().to_string()));

    let transcriber = RealtimeTranscriber::new(config);

    let observers = transcriber.observers();
    observers.on_session_begins(|info| {
        println!("Session begins:");
        println!("  - Session ID: {}", info.session_id);
        println!("  - Expires at: {}", info.expires_at);
    });
    observers.on_partial_transcript(|t| {
        if !t.text().is_empty() {
            println!("Partial transcript: {}", t.text());
        }
    });
    observers.on_final_transcript(|t| println!("Final transcript: {}", t.text()));
    observers.on_error(|e| eprintln!("❌ Error: {}", e.message));
    observers.on_closed(|c| println!("Closed ({}) {}", c.code, c.reason));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("🛑 Interrupted");
            ctrl_c.cancel();
        }
    });

    transcriber.connect_with_cancel(&cancel).await?;

    let bytes_per_ms = (sample_rate as u64 * channels as u64 * 2) / 1000;
    let chunk_len = (bytes_per_ms * args.chunk_ms).max(2) as usize;
    let pacing = Duration::from_millis(args.chunk_ms);

    for chunk in pcm.chunks(chunk_len) {
        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = transcriber.send_audio_with_cancel(chunk, &cancel).await {
            if cancel.is_cancelled() {
                break;
            }
            return Err(e.into());
        }
        if !args.no_pacing {
            tokio::time::sleep(pacing).await;
        }
    }

    if cancel.is_cancelled() {
        // The listener already stopped on the same signal
        if let Err(e) = transcriber.close_abrupt().await {
            log::warn!("Session ended early: {}", e);
        }
    } else {
        transcriber.close().await?;
    }

    let finals = transcriber.final_transcripts();
    let full_text: Vec<String> = std::iter::from_fn(|| finals.try_recv())
        .map(|t| t.text().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    println!("\n{}", full_text.join(" "));

    Ok(())
}
