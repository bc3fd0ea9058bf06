//! Bot pipeline assembly and execution.
//!
//! [`BotEnvironment`] wires the configured frame source through decode, the
//! worker boundary, the signal breaker, and the bot into the configured
//! sinks:
//!
//! ```text
//! merge(control >> map(BotInput::Control),
//!       frames  >> [threaded_worker when live]
//!               >> signal_breaker({INT,TERM,QUIT})
//!               >> map(count) >> do_finally(stop) >> map(BotInput::Frames))
//!   >> bot.run() >> process(route by message kind)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bot::{BotDescriptor, BotInput, BotInstanceBuilder, BotMessage, BotMessageKind, ExecutionMode};
use crate::clock::TimerService;
use crate::config::{Configuration, InputConfig};
use crate::decode::{decode_image_frames, decode_network_stream};
use crate::error::{PipelineError, Result};
use crate::media::{MediaBackend, VideoDecoder};
use crate::packets::ImagePacket;
use crate::pubsub::{Document, PubSubClient, CONTROL_CHANNEL};
use crate::signals::{Signal, SignalService};
use crate::sinks::DocumentPubSubSink;
use crate::sources::{
    camera_source, document_source, file_source, pubsub_source, url_source,
};
use crate::streams::{
    publishers, signal_breaker, threaded_worker, Observer, Publisher, WriteSink,
};

/// Name of the thread live pipelines process frames on.
const PROCESSING_WORKER: &str = "processing_worker";
/// Log cadence for the frame counter.
const FRAME_LOG_PERIOD: u64 = 100;

/// External collaborators a pipeline runs against.
pub struct PipelineServices {
    pub backend: Arc<dyn MediaBackend>,
    pub decoder: Box<dyn VideoDecoder>,
    pub timer: Arc<dyn TimerService>,
    pub signals: Arc<dyn SignalService>,
    pub client: Option<Arc<dyn PubSubClient>>,
}

/// One bot run: configuration, collaborators, and the bot itself.
pub struct BotEnvironment {
    config: Configuration,
    services: PipelineServices,
    builder: BotInstanceBuilder,
    shutdown: CancellationToken,
}

/// Where each class of bot message goes.
type DocSink = Box<dyn Observer<Document> + Send>;

impl BotEnvironment {
    pub fn new(
        descriptor: BotDescriptor,
        config: Configuration,
        services: PipelineServices,
    ) -> Result<Self> {
        config.validate()?;
        let builder = BotInstanceBuilder::new(descriptor)
            .bot_id(config.bot_id.clone())
            .config(config.bot_config.clone())
            .execution_mode(config.execution_mode());
        Ok(Self { config, services, builder, shutdown: CancellationToken::new() })
    }

    /// Token cancelled when the pipeline begins tearing down, whatever the
    /// reason: end of stream, error, or signal.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the pipeline to its terminal event.
    pub async fn run(self) -> Result<()> {
        let Self { config, services, builder, shutdown } = self;
        let PipelineServices { backend, decoder, timer, signals, client } = services;

        if let Some(client) = &client {
            client.start().await?;
        }

        let mode = config.execution_mode();
        let instance = builder.build();

        // --- sinks -----------------------------------------------------
        let analysis_sink = Self::document_sink(
            config.analysis_file.as_deref(),
            client.as_ref(),
            config.channel.as_deref().map(|c| format!("{c}{}", crate::pubsub::ANALYSIS_SUFFIX)),
            SinkFallback::Stdout,
        )?;
        let debug_sink = Self::document_sink(
            config.debug_file.as_deref(),
            client.as_ref(),
            config.channel.as_deref().map(|c| format!("{c}{}", crate::pubsub::DEBUG_SUFFIX)),
            SinkFallback::Stderr,
        )?;
        let control_sink = Self::document_sink(
            None,
            client.as_ref(),
            Some(CONTROL_CHANNEL.to_string()),
            SinkFallback::Stdout,
        )?;

        // --- frame source ----------------------------------------------
        let encoded = match &config.input {
            InputConfig::File { path, looped, batch } => file_source(
                backend,
                path.display().to_string(),
                *looped,
                *batch,
                timer.clone(),
                config.fps,
            ),
            InputConfig::Url { url, options } => url_source(backend, url.clone(), options),
            InputConfig::Camera { dimensions } => camera_source(backend, dimensions.clone()),
            InputConfig::PubSub => {
                let client = client
                    .clone()
                    .ok_or_else(|| PipelineError::config("pub/sub input requires a client"))?;
                let channel = config.channel.clone().expect("validated");
                pubsub_source(client, channel).lift(decode_network_stream())
            }
        };

        let mut frames: Publisher<ImagePacket> = encoded.lift(decode_image_frames(decoder));
        if mode == ExecutionMode::Live {
            frames = frames.lift(threaded_worker(PROCESSING_WORKER));
        }

        let frames_count = Arc::new(AtomicU64::new(0));
        let counter = frames_count.clone();
        let finally_shutdown = shutdown.clone();
        let frame_inputs = frames
            .lift(signal_breaker(
                signals,
                vec![Signal::Interrupt, Signal::Terminate, Signal::Quit],
            ))
            .map(move |packet| {
                if matches!(packet, ImagePacket::Frame(_)) {
                    let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                    if n % FRAME_LOG_PERIOD == 0 {
                        info!(frames = n, "processed frames");
                    }
                }
                packet
            })
            .do_finally(move || {
                debug!("frame stream finished; stopping services");
                finally_shutdown.cancel();
            })
            .map(|packet| BotInput::Frames(vec![packet]));

        // --- control source --------------------------------------------
        let control_inputs = match &client {
            Some(client) => document_source(client.clone(), CONTROL_CHANNEL),
            None => publishers::empty(),
        }
        .map(BotInput::Control);

        // --- bot and routing -------------------------------------------
        // the control channel never completes on its own, so the two input
        // streams are interleaved with the frame side driving termination
        // rather than concatenated
        let outputs = combine_inputs(frame_inputs, control_inputs).lift(instance.run());

        let mut analysis_sink = analysis_sink;
        let mut debug_sink = debug_sink;
        let mut control_sink = control_sink;
        let deferred = outputs.process(move |message: BotMessage| match message.kind {
            BotMessageKind::Analysis => analysis_sink.on_next(message.payload),
            BotMessageKind::Debug => debug_sink.on_next(message.payload),
            BotMessageKind::Control => control_sink.on_next(message.payload),
        });

        let result = deferred.await;
        shutdown.cancel();

        let processed = frames_count.load(Ordering::Relaxed);
        match &result {
            Ok(()) => info!(frames = processed, "pipeline complete"),
            Err(error) => warn!(frames = processed, %error, "pipeline failed"),
        }

        if let Some(client) = &client {
            if let Err(error) = client.stop().await {
                warn!(%error, "error stopping pub/sub client");
            } else {
                debug!("pub/sub client stopped");
            }
        }

        result
    }

    fn document_sink(
        file: Option<&std::path::Path>,
        client: Option<&Arc<dyn PubSubClient>>,
        channel: Option<String>,
        fallback: SinkFallback,
    ) -> Result<DocSink> {
        if let Some(path) = file {
            info!(file = %path.display(), "saving messages to file");
            return Ok(Box::new(WriteSink::<Document, _>::create(path)?));
        }
        if let (Some(client), Some(channel)) = (client, channel) {
            return Ok(Box::new(DocumentPubSubSink::new(client.clone(), channel)));
        }
        Ok(match fallback {
            SinkFallback::Stdout => Box::new(WriteSink::<Document, _>::stdout()),
            SinkFallback::Stderr => Box::new(WriteSink::<Document, _>::stderr()),
        })
    }
}

enum SinkFallback {
    Stdout,
    Stderr,
}

// ---------------------------------------------------------------------------
// Input interleaving
// ---------------------------------------------------------------------------

use crate::error::Result as StreamResult;
use crate::streams::{Subscribe, Subscriber, Subscription, SubscriptionRef};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Interleave two streams, terminating with the primary.
///
/// Items from either side forward as they arrive; the secondary completing
/// is ignored, while a primary terminal (or a secondary error) ends the
/// whole stream and cancels the other side. Downstream demand is granted
/// to both sides; emissions beyond the shared budget queue until demand
/// covers them, so the subscriber contract holds even under finite demand.
fn combine_inputs(
    primary: Publisher<BotInput>,
    secondary: Publisher<BotInput>,
) -> Publisher<BotInput> {
    Publisher::from_subscribe(CombineSubscribe { primary, secondary })
}

struct CombineSubscribe {
    primary: Publisher<BotInput>,
    secondary: Publisher<BotInput>,
}

struct CombineShared {
    downstream: Option<Box<dyn Subscriber<BotInput>>>,
    primary: Option<SubscriptionRef>,
    secondary: Option<SubscriptionRef>,
    demand: u64,
    overflow: VecDeque<BotInput>,
    terminal: Option<StreamResult<()>>,
    draining: bool,
    done: bool,
}

type CombineRef = Arc<Mutex<CombineShared>>;

impl Subscribe<BotInput> for CombineSubscribe {
    fn subscribe(self: Box<Self>, mut downstream: Box<dyn Subscriber<BotInput>>) {
        let shared: CombineRef = Arc::new(Mutex::new(CombineShared {
            downstream: None,
            primary: None,
            secondary: None,
            demand: 0,
            overflow: VecDeque::new(),
            terminal: None,
            draining: false,
            done: false,
        }));
        downstream.on_subscribe(Arc::new(CombineSubscription { shared: shared.clone() }));
        {
            let mut s = shared.lock().unwrap();
            if s.done {
                return;
            }
            s.downstream = Some(downstream);
        }
        self.secondary
            .subscribe_boxed(Box::new(CombineChild { shared: shared.clone(), is_primary: false }));
        self.primary
            .subscribe_boxed(Box::new(CombineChild { shared, is_primary: true }));
    }
}

struct CombineChild {
    shared: CombineRef,
    is_primary: bool,
}

impl CombineChild {
    fn terminate(&self, result: StreamResult<()>) {
        let other = {
            let mut s = self.shared.lock().unwrap();
            if s.done || s.terminal.is_some() {
                return;
            }
            s.terminal = Some(result);
            if self.is_primary {
                s.secondary.take()
            } else {
                s.primary.take()
            }
        };
        if let Some(other) = other {
            other.cancel();
        }
        combine_drain(&self.shared);
    }
}

impl Observer<BotInput> for CombineChild {
    fn on_next(&mut self, item: BotInput) {
        {
            let mut s = self.shared.lock().unwrap();
            if s.done || s.terminal.is_some() {
                return;
            }
            s.overflow.push_back(item);
        }
        combine_drain(&self.shared);
    }

    fn on_error(&mut self, error: PipelineError) {
        self.terminate(Err(error));
    }

    fn on_complete(&mut self) {
        if self.is_primary {
            self.terminate(Ok(()));
        } else {
            // auxiliary input ending is not a pipeline event
            let mut s = self.shared.lock().unwrap();
            s.secondary = None;
        }
    }
}

impl Subscriber<BotInput> for CombineChild {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        let pending = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                drop(s);
                subscription.cancel();
                return;
            }
            if self.is_primary {
                s.primary = Some(subscription.clone());
            } else {
                s.secondary = Some(subscription.clone());
            }
            s.demand
        };
        if pending > 0 {
            subscription.request(pending);
        }
    }
}

/// Deliver queued items under demand, then any pending terminal.
fn combine_drain(shared: &CombineRef) {
    loop {
        enum Step {
            Item(Box<dyn Subscriber<BotInput>>, BotInput),
            Terminal(Box<dyn Subscriber<BotInput>>, StreamResult<()>),
        }

        let step = {
            let mut s = shared.lock().unwrap();
            if s.done || s.draining {
                return;
            }
            if !s.overflow.is_empty() && s.demand > 0 {
                let Some(downstream) = s.downstream.take() else { return };
                let item = s.overflow.pop_front().expect("checked non-empty");
                s.demand -= 1;
                s.draining = true;
                Step::Item(downstream, item)
            } else if s.overflow.is_empty() && s.terminal.is_some() {
                let Some(downstream) = s.downstream.take() else { return };
                let terminal = s.terminal.take().expect("checked above");
                s.done = true;
                s.draining = true;
                Step::Terminal(downstream, terminal)
            } else {
                return;
            }
        };

        match step {
            Step::Item(mut downstream, item) => {
                downstream.on_next(item);
                let mut s = shared.lock().unwrap();
                s.draining = false;
                if !s.done {
                    s.downstream = Some(downstream);
                } else {
                    return;
                }
            }
            Step::Terminal(mut downstream, terminal) => {
                match terminal {
                    Ok(()) => downstream.on_complete(),
                    Err(error) => downstream.on_error(error),
                }
                shared.lock().unwrap().draining = false;
                return;
            }
        }
    }
}

struct CombineSubscription {
    shared: CombineRef,
}

impl Subscription for CombineSubscription {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let (primary, secondary) = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.demand = s.demand.saturating_add(n);
            (s.primary.clone(), s.secondary.clone())
        };
        combine_drain(&self.shared);
        if let Some(primary) = primary {
            primary.request(n);
        }
        if let Some(secondary) = secondary {
            secondary.request(n);
        }
    }

    fn cancel(&self) {
        let (primary, secondary, dropped) = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.done = true;
            (s.primary.take(), s.secondary.take(), s.downstream.take())
        };
        if let Some(primary) = primary {
            primary.cancel();
        }
        if let Some(secondary) = secondary {
            secondary.cancel();
        }
        drop(dropped);
    }
}

/// Synchronous entry point: builds a tokio runtime and runs the pipeline
/// to completion. Intended for bot `main` functions.
pub fn run_bot(
    descriptor: BotDescriptor,
    config: Configuration,
    services: PipelineServices,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| PipelineError::transport(format!("can't build runtime: {e}")))?;
    let environment = BotEnvironment::new(descriptor, config, services)?;
    runtime.block_on(environment.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{BotContext, BotHandler};
    use crate::clock::ManualTimer;
    use crate::decode::test_support::MockDecoder;
    use crate::packets::PixelFormat;
    use crate::pubsub::MemoryPubSub;
    use crate::signals::ManualSignals;
    use crate::sources::test_support::{video_packet, MockBackend};

    struct CountingBot;

    impl BotHandler for CountingBot {
        fn on_frames(&mut self, ctx: &mut BotContext, frames: &[ImagePacket]) {
            let images = frames.iter().filter(|p| matches!(p, ImagePacket::Frame(_))).count();
            if images > 0 {
                ctx.emit(
                    BotMessageKind::Analysis,
                    serde_json::json!({"bot": ctx.id(), "images": images}),
                );
            }
        }
    }

    fn services(
        backend: Arc<MockBackend>,
        bus: Arc<MemoryPubSub>,
        signals: Arc<ManualSignals>,
    ) -> PipelineServices {
        PipelineServices {
            backend,
            decoder: MockDecoder::new(),
            timer: Arc::new(ManualTimer::new()),
            signals,
            client: Some(bus),
        }
    }

    fn config(input: InputConfig) -> Configuration {
        Configuration {
            input,
            channel: Some("cam".into()),
            analysis_file: None,
            debug_file: None,
            bot_id: "counter".into(),
            bot_config: None,
            pixel_format: None,
            bounding: None,
            fps: None,
        }
    }

    #[test]
    fn combine_ends_with_the_primary_even_while_the_secondary_lives() {
        // secondary: a control channel that never completes
        let secondary = crate::streams::generators::async_source(
            |_obs: crate::streams::AsyncObserver<BotInput>| (),
            |_state: ()| {},
        );
        let primary = publishers::of(vec![
            BotInput::Control(serde_json::json!({"n": 1})),
            BotInput::Control(serde_json::json!({"n": 2})),
        ]);

        let seen = Arc::new(Mutex::new(0usize));
        let counter = seen.clone();
        let deferred =
            combine_inputs(primary, secondary).process(move |_| *counter.lock().unwrap() += 1);

        assert!(matches!(deferred.try_result(), Some(Ok(()))));
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn combine_forwards_secondary_items_and_ignores_its_completion() {
        let secondary = publishers::of(vec![BotInput::Control(serde_json::json!({"ctl": true}))]);
        let primary_handle: Arc<Mutex<Option<crate::streams::AsyncObserver<BotInput>>>> =
            Arc::new(Mutex::new(None));
        let slot = primary_handle.clone();
        let primary = crate::streams::generators::async_source(
            move |obs: crate::streams::AsyncObserver<BotInput>| {
                *slot.lock().unwrap() = Some(obs);
            },
            |_state: ()| {},
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let deferred = combine_inputs(primary, secondary).process(move |input| {
            sink.lock().unwrap().push(match input {
                BotInput::Control(_) => "control",
                BotInput::Frames(_) => "frames",
            });
        });

        // secondary completed already; the stream stays open for primary
        assert!(!deferred.is_resolved());
        assert_eq!(*seen.lock().unwrap(), vec!["control"]);

        let producer = primary_handle.lock().unwrap().clone().unwrap();
        producer.on_next(BotInput::Frames(Vec::new()));
        producer.on_complete();
        assert_eq!(*seen.lock().unwrap(), vec!["control", "frames"]);
        assert!(matches!(deferred.try_result(), Some(Ok(()))));
    }

    #[tokio::test]
    async fn batch_file_run_routes_analysis_to_the_channel() {
        let backend =
            MockBackend::with_packets(vec![video_packet(4, true), video_packet(9, false)]);
        let bus = Arc::new(MemoryPubSub::new());
        let signals = Arc::new(ManualSignals::new());

        let descriptor = BotDescriptor::new(PixelFormat::Rgb0, Box::new(CountingBot));
        let environment = BotEnvironment::new(
            descriptor,
            config(InputConfig::File {
                path: "clip.mp4".into(),
                looped: false,
                batch: true,
            }),
            services(backend, bus.clone(), signals),
        )
        .unwrap();
        let shutdown = environment.shutdown_token();

        environment.run().await.unwrap();

        let analysis = bus.published("cam/analysis");
        assert_eq!(analysis.len(), 2, "one analysis message per decoded frame");
        assert_eq!(analysis[0]["bot"], "counter");
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn signal_ends_a_live_run_cleanly() {
        let backend = MockBackend::with_packets(vec![video_packet(4, true)]);
        let bus = Arc::new(MemoryPubSub::new());
        let signals = Arc::new(ManualSignals::new());

        let descriptor = BotDescriptor::new(PixelFormat::Rgb0, Box::new(CountingBot));
        // a pub/sub input with no publisher never completes on its own, so
        // only the signal can end this run
        let environment = BotEnvironment::new(
            descriptor,
            config(InputConfig::PubSub),
            services(backend, bus.clone(), signals.clone()),
        )
        .unwrap();

        let handle = tokio::spawn(environment.run());
        // let the worker wire up, then break
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        signals.raise(Signal::Terminate);

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("run must end after the signal")
            .unwrap();
        assert!(result.is_ok(), "signal shutdown is completion, not error: {result:?}");
    }
}
