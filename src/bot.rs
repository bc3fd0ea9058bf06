//! Pluggable analysis bot layer.
//!
//! A bot links against the pipeline by handing a [`BotDescriptor`] to the
//! runner: an explicit argument, not a process-wide registry, so nothing
//! mutates global state before `main`. The descriptor carries the pixel
//! format the bot wants and the handler that consumes decoded frames and
//! control documents, emitting analysis/debug/control messages back.

use crate::packets::{ImagePacket, PixelFormat};
use crate::pubsub::Document;
use crate::streams::{publishers, StreamOp};

/// Routing class of a bot output message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotMessageKind {
    Analysis,
    Debug,
    Control,
}

/// One message produced by a bot.
#[derive(Debug, Clone)]
pub struct BotMessage {
    pub kind: BotMessageKind,
    pub payload: Document,
}

/// What flows into a bot: decoded frames or a control document.
#[derive(Debug, Clone)]
pub enum BotInput {
    Control(Document),
    Frames(Vec<ImagePacket>),
}

/// Whether the pipeline paces against wall time or drains as fast as the
/// bot consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Live,
    Batch,
}

/// Per-instance state handed to every handler invocation.
pub struct BotContext {
    id: String,
    config: Option<Document>,
    mode: ExecutionMode,
    outbox: Vec<BotMessage>,
}

impl BotContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> Option<&Document> {
        self.config.as_ref()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Queue a message for routing after the current handler returns.
    pub fn emit(&mut self, kind: BotMessageKind, payload: Document) {
        self.outbox.push(BotMessage { kind, payload });
    }

    fn drain(&mut self) -> Vec<BotMessage> {
        std::mem::take(&mut self.outbox)
    }
}

/// User-supplied bot logic.
pub trait BotHandler: Send {
    /// Consume a batch of decoded image packets.
    fn on_frames(&mut self, ctx: &mut BotContext, frames: &[ImagePacket]);

    /// Consume a control document. The default ignores it.
    ///
    /// The control channel is global and shared, so handlers must filter
    /// for traffic addressed to them (including skipping their own
    /// emitted control responses).
    fn on_control(&mut self, ctx: &mut BotContext, command: Document) {
        let _ = (ctx, command);
    }
}

/// Everything the pipeline needs to know about a bot.
pub struct BotDescriptor {
    /// Pixel format the bot expects decoded frames in.
    pub pixel_format: PixelFormat,
    pub handler: Box<dyn BotHandler>,
}

impl BotDescriptor {
    pub fn new(pixel_format: PixelFormat, handler: Box<dyn BotHandler>) -> Self {
        Self { pixel_format, handler }
    }
}

/// Builder for a runnable bot instance.
pub struct BotInstanceBuilder {
    descriptor: BotDescriptor,
    id: String,
    config: Option<Document>,
    mode: ExecutionMode,
}

impl BotInstanceBuilder {
    pub fn new(descriptor: BotDescriptor) -> Self {
        Self { descriptor, id: String::new(), config: None, mode: ExecutionMode::Live }
    }

    pub fn bot_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn config(mut self, config: Option<Document>) -> Self {
        self.config = config;
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn build(self) -> BotInstance {
        BotInstance {
            pixel_format: self.descriptor.pixel_format,
            handler: self.descriptor.handler,
            context: BotContext {
                id: self.id,
                config: self.config,
                mode: self.mode,
                outbox: Vec::new(),
            },
        }
    }
}

/// A configured bot ready to be spliced into a pipeline.
pub struct BotInstance {
    pixel_format: PixelFormat,
    handler: Box<dyn BotHandler>,
    context: BotContext,
}

impl BotInstance {
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// The bot as a stream operator: inputs in, messages out.
    ///
    /// Each input runs through the handler and the queued messages flow
    /// downstream before the next input is pulled.
    pub fn run(self) -> StreamOp<BotInput, BotMessage> {
        let mut handler = self.handler;
        let mut context = self.context;
        Box::new(move |inputs| {
            inputs.flat_map(move |input| {
                match input {
                    BotInput::Frames(frames) => handler.on_frames(&mut context, &frames),
                    BotInput::Control(command) => handler.on_control(&mut context, command),
                }
                publishers::of(context.drain())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{ImageMetadata, PixelFormat};
    use std::sync::{Arc, Mutex};

    struct CountingBot;

    impl BotHandler for CountingBot {
        fn on_frames(&mut self, ctx: &mut BotContext, frames: &[ImagePacket]) {
            let images =
                frames.iter().filter(|p| matches!(p, ImagePacket::Frame(_))).count();
            if images > 0 {
                ctx.emit(
                    BotMessageKind::Analysis,
                    serde_json::json!({"bot": ctx.id(), "images": images}),
                );
            }
        }

        fn on_control(&mut self, ctx: &mut BotContext, command: Document) {
            ctx.emit(BotMessageKind::Control, serde_json::json!({"ack": command}));
            ctx.emit(BotMessageKind::Debug, serde_json::json!({"got_control": true}));
        }
    }

    fn metadata_packet() -> ImagePacket {
        ImagePacket::Metadata(ImageMetadata {
            pixel_format: PixelFormat::Rgb0,
            width: 4,
            height: 4,
        })
    }

    #[test]
    fn frames_produce_analysis_messages() {
        let descriptor = BotDescriptor::new(PixelFormat::Rgb0, Box::new(CountingBot));
        let instance = BotInstanceBuilder::new(descriptor)
            .bot_id("counter")
            .execution_mode(ExecutionMode::Batch)
            .build();

        let inputs = vec![
            BotInput::Frames(vec![metadata_packet()]),
            BotInput::Control(serde_json::json!({"cmd": "ping"})),
        ];

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let deferred = publishers::of(inputs)
            .lift(instance.run())
            .process(move |msg| sink.lock().unwrap().push(msg.kind));

        assert!(matches!(deferred.try_result(), Some(Ok(()))));
        // metadata-only input emits nothing; the control input emits two
        assert_eq!(
            *seen.lock().unwrap(),
            vec![BotMessageKind::Control, BotMessageKind::Debug]
        );
    }

    #[test]
    fn context_carries_id_and_config() {
        struct AssertingBot;
        impl BotHandler for AssertingBot {
            fn on_frames(&mut self, ctx: &mut BotContext, _frames: &[ImagePacket]) {
                assert_eq!(ctx.id(), "asserting");
                assert_eq!(ctx.config().unwrap()["threshold"], 3);
                ctx.emit(BotMessageKind::Analysis, serde_json::json!({"ok": true}));
            }
        }

        let descriptor = BotDescriptor::new(PixelFormat::Bgr, Box::new(AssertingBot));
        let instance = BotInstanceBuilder::new(descriptor)
            .bot_id("asserting")
            .config(Some(serde_json::json!({"threshold": 3})))
            .build();

        let seen = Arc::new(Mutex::new(0usize));
        let counter = seen.clone();
        let deferred = publishers::of(vec![BotInput::Frames(vec![metadata_packet()])])
            .lift(instance.run())
            .process(move |_| *counter.lock().unwrap() += 1);

        assert!(matches!(deferred.try_result(), Some(Ok(()))));
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
