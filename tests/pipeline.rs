//! End-to-end pipeline runs over mock collaborators and the loopback
//! transport.

use std::sync::Arc;
use std::time::Duration;

use vidflow::bot::{BotContext, BotDescriptor, BotHandler, BotMessageKind};
use vidflow::clock::ManualTimer;
use vidflow::config::{Configuration, InputConfig};
use vidflow::media::{MediaBackend, MediaOptions, MediaPacket, MediaReader, VideoDecoder};
use vidflow::packets::{
    EncodedFrame, EncodedMetadata, ImageFrame, ImageMetadata, ImagePacket, ImagePlane,
    PixelFormat,
};
use vidflow::PipelineError;
use vidflow::pipeline::{BotEnvironment, PipelineServices};
use vidflow::pubsub::{MemoryPubSub, PubSubClient};
use vidflow::signals::{ManualSignals, Signal};
use vidflow::sinks::PubSubFrameSink;
use vidflow::sources::file_source;
use vidflow::Result;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

// --- mock collaborators ----------------------------------------------------

struct ScriptedReader {
    packets: Vec<MediaPacket>,
    cursor: usize,
}

impl MediaReader for ScriptedReader {
    fn video_stream(&self) -> usize {
        0
    }

    fn codec(&self) -> EncodedMetadata {
        EncodedMetadata { codec_name: "h264".into(), codec_data: vec![0x42, 0x00] }
    }

    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        let packet = self.packets.get(self.cursor).cloned();
        if packet.is_some() {
            self.cursor += 1;
        }
        Ok(packet)
    }

    fn seek_to_start(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }
}

struct ScriptedBackend {
    packets: Vec<MediaPacket>,
}

impl ScriptedBackend {
    fn with_frames(count: usize) -> Arc<Self> {
        let packets = (0..count)
            .map(|n| MediaPacket {
                stream_index: 0,
                data: vec![n as u8; 8],
                pos: (n as i64 + 1) * 100,
                key_frame: n == 0,
            })
            .collect();
        Arc::new(Self { packets })
    }
}

impl MediaBackend for ScriptedBackend {
    fn open_uri(&self, _uri: &str, _options: &MediaOptions) -> Result<Box<dyn MediaReader>> {
        Ok(Box::new(ScriptedReader { packets: self.packets.clone(), cursor: 0 }))
    }

    fn open_camera(&self, _dimensions: &str) -> Result<Box<dyn MediaReader>> {
        Ok(Box::new(ScriptedReader { packets: self.packets.clone(), cursor: 0 }))
    }
}

struct GrayDecoder;

impl VideoDecoder for GrayDecoder {
    fn configure(&mut self, _metadata: &EncodedMetadata) -> Result<ImageMetadata> {
        Ok(ImageMetadata { pixel_format: PixelFormat::Rgb0, width: 2, height: 2 })
    }

    fn decode(&mut self, frame: &EncodedFrame) -> Result<Vec<ImageFrame>> {
        Ok(vec![ImageFrame {
            id: frame.id,
            pixel_format: PixelFormat::Rgb0,
            width: 2,
            height: 2,
            planes: vec![ImagePlane { data: vec![0x80; 16], stride: 8 }],
        }])
    }
}

struct AnalysisBot;

impl BotHandler for AnalysisBot {
    fn on_frames(&mut self, ctx: &mut BotContext, frames: &[ImagePacket]) {
        for packet in frames {
            if let ImagePacket::Frame(frame) = packet {
                ctx.emit(
                    BotMessageKind::Analysis,
                    serde_json::json!({"id": [frame.id.i1, frame.id.i2]}),
                );
            }
        }
    }

    fn on_control(&mut self, ctx: &mut BotContext, command: serde_json::Value) {
        // the control channel is shared; only acknowledge actual commands,
        // never other bots' acks
        if command.get("cmd").is_some() {
            ctx.emit(BotMessageKind::Control, serde_json::json!({"ack": command}));
        }
    }
}

fn config(input: InputConfig, channel: Option<&str>) -> Configuration {
    serde_json::from_value(serde_json::json!({
        "input": serde_json::to_value(&input).unwrap(),
        "channel": channel,
        "bot_id": "it-bot",
    }))
    .unwrap()
}

fn services(
    backend: Arc<dyn MediaBackend>,
    client: Option<Arc<dyn PubSubClient>>,
    signals: Arc<ManualSignals>,
) -> PipelineServices {
    PipelineServices {
        backend,
        decoder: Box::new(GrayDecoder),
        timer: Arc::new(ManualTimer::new()),
        signals,
        client,
    }
}

// --- scenarios -------------------------------------------------------------

#[tokio::test]
async fn batch_file_run_writes_analysis_to_a_file() {
    init_tracing();
    let analysis_file = tempfile::NamedTempFile::new().unwrap();
    let mut cfg = config(
        InputConfig::File { path: "clip.mp4".into(), looped: false, batch: true },
        None,
    );
    cfg.analysis_file = Some(analysis_file.path().to_path_buf());

    let descriptor = BotDescriptor::new(PixelFormat::Rgb0, Box::new(AnalysisBot));
    let environment = BotEnvironment::new(
        descriptor,
        cfg,
        services(ScriptedBackend::with_frames(3), None, Arc::new(ManualSignals::new())),
    )
    .unwrap();

    environment.run().await.unwrap();

    let contents = std::fs::read_to_string(analysis_file.path()).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 3, "one analysis line per frame: {contents}");
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["id"], serde_json::json!([0, 100]));
}

#[tokio::test]
async fn frames_round_trip_through_the_loopback_transport() {
    init_tracing();
    let bus = Arc::new(MemoryPubSub::new());
    let signals = Arc::new(ManualSignals::new());

    // start a live bot consuming the pub/sub channel
    let descriptor = BotDescriptor::new(PixelFormat::Rgb0, Box::new(AnalysisBot));
    let environment = BotEnvironment::new(
        descriptor,
        config(InputConfig::PubSub, Some("cam")),
        services(
            ScriptedBackend::with_frames(0),
            Some(bus.clone() as Arc<dyn PubSubClient>),
            signals.clone(),
        ),
    )
    .unwrap();
    let run = tokio::spawn(environment.run());

    // wait for the frames + metadata + control subscriptions
    for _ in 0..100 {
        if bus.subscriber_count() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(bus.subscriber_count() >= 3, "pipeline never subscribed");

    // feed the channel from a file source through the frame sink
    let publisher_timer = Arc::new(ManualTimer::new());
    let feed = file_source(
        ScriptedBackend::with_frames(2),
        "clip.mp4",
        false,
        true,
        publisher_timer,
        None,
    );
    feed.subscribe(PubSubFrameSink::new(bus.clone(), "cam"));

    // frames cross the worker boundary asynchronously
    let mut analysis_len = 0;
    for _ in 0..100 {
        analysis_len = bus.published("cam/analysis").len();
        if analysis_len >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(analysis_len, 2, "one analysis message per frame");

    // a control document gets acknowledged onto the control channel
    bus.publish("control", serde_json::json!({"cmd": "status"}));
    let mut control_len = 0;
    for _ in 0..100 {
        control_len = bus
            .published("control")
            .iter()
            .filter(|doc| doc.get("ack").is_some())
            .count();
        if control_len >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(control_len, 1, "control input must be acknowledged");

    // orderly signal shutdown: completion, not error
    signals.raise(Signal::Terminate);
    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run must end after the signal")
        .unwrap();
    assert!(result.is_ok(), "expected clean shutdown, got {result:?}");
    assert_eq!(bus.subscriber_count(), 0, "all subscriptions released");
}

#[tokio::test]
async fn decoder_failure_surfaces_from_the_run() {
    struct FailingDecoder;
    impl VideoDecoder for FailingDecoder {
        fn configure(&mut self, _metadata: &EncodedMetadata) -> Result<ImageMetadata> {
            Err(PipelineError::stream_init("unsupported codec"))
        }
        fn decode(&mut self, _frame: &EncodedFrame) -> Result<Vec<ImageFrame>> {
            unreachable!("configure already failed")
        }
    }

    let descriptor = BotDescriptor::new(PixelFormat::Rgb0, Box::new(AnalysisBot));
    let mut services = services(
        ScriptedBackend::with_frames(1),
        None,
        Arc::new(ManualSignals::new()),
    );
    services.decoder = Box::new(FailingDecoder);

    let environment = BotEnvironment::new(
        descriptor,
        config(InputConfig::File { path: "clip.mp4".into(), looped: false, batch: true }, None),
        services,
    )
    .unwrap();

    match environment.run().await {
        Err(PipelineError::StreamInitialization { .. }) => {}
        other => panic!("expected StreamInitialization, got {other:?}"),
    }
}
