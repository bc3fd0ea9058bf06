//! File-backed encoded packet source.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::TimerService;
use crate::media::{MediaBackend, MediaOptions};
use crate::packets::EncodedPacket;
use crate::streams::{generators, interval, Publisher};

use super::{MediaSourceState, MediaTarget, DEFAULT_FPS};

/// Stream encoded packets out of a media file.
///
/// `looped` seeks back to the start at EOF instead of completing. Batch
/// mode emits as fast as downstream demand pulls; otherwise emission is
/// paced through an interval at `fps` (falling back to [`DEFAULT_FPS`]).
pub fn file_source(
    backend: Arc<dyn MediaBackend>,
    filename: impl Into<String>,
    looped: bool,
    batch: bool,
    timer: Arc<dyn TimerService>,
    fps: Option<f64>,
) -> Publisher<EncodedPacket> {
    let uri = filename.into();
    let source = generators::stateful(
        move || {
            MediaSourceState::new(
                backend,
                MediaTarget::Uri { uri, options: MediaOptions::default() },
                looped,
            )
        },
        |state: &mut MediaSourceState, n, observer: &mut dyn crate::streams::Observer<EncodedPacket>| {
            state.generate(n, observer)
        },
    );

    if batch {
        source
    } else {
        let fps = fps.unwrap_or(DEFAULT_FPS).max(1.0);
        source.lift(interval(timer, Duration::from_secs_f64(1.0 / fps)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimer;
    use crate::packets::EncodedPacket;
    use crate::sources::test_support::{audio_packet, video_packet, MockBackend};
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    fn label(packet: &EncodedPacket) -> String {
        match packet {
            EncodedPacket::Metadata(m) => format!("meta:{}", m.codec_name),
            EncodedPacket::Frame(f) => format!("frame:{}", f.id),
        }
    }

    #[test]
    fn batch_mode_emits_metadata_then_every_video_packet() {
        let backend = MockBackend::with_packets(vec![
            video_packet(10, true),
            audio_packet(11),
            video_packet(20, false),
        ]);
        let timer = Arc::new(ManualTimer::new());
        let source =
            file_source(backend.clone(), "clip.mp4", false, true, timer, None);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let deferred = source.process(move |p| sink.lock().unwrap().push(label(&p)));

        assert!(matches!(deferred.try_result(), Some(Ok(()))));
        // 1 metadata + 2 video packets; the audio packet is skipped
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["meta:h264", "frame:[0, 10)", "frame:[11, 20)"]
        );
        assert_eq!(backend.opens.load(Ordering::SeqCst), 1, "context opens lazily, once");
    }

    #[test]
    fn looped_source_is_periodic_and_unbounded() {
        let backend = MockBackend::with_packets(vec![video_packet(5, true)]);
        let timer = Arc::new(ManualTimer::new());
        let source = file_source(backend.clone(), "clip.mp4", true, true, timer, None);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let deferred = source.take(4).process(move |p| sink.lock().unwrap().push(label(&p)));

        assert!(matches!(deferred.try_result(), Some(Ok(()))));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["meta:h264", "frame:[0, 5)", "frame:[0, 5)", "frame:[0, 5)"]
        );
        assert!(backend.seeks.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn open_failure_surfaces_as_initialization_error() {
        let backend = MockBackend::with_packets(vec![video_packet(1, true)]);
        backend.fail_open.store(true, Ordering::SeqCst);
        let timer = Arc::new(ManualTimer::new());
        let source = file_source(backend, "missing.mp4", false, true, timer, None);

        match source.process(|_| {}).try_result() {
            Some(Err(crate::error::PipelineError::StreamInitialization { .. })) => {}
            other => panic!("expected StreamInitialization, got {other:?}"),
        }
    }

    #[test]
    fn read_fault_surfaces_as_frame_generation_error() {
        let backend =
            MockBackend::failing_at(vec![video_packet(1, true), video_packet(2, false)], 1);
        let timer = Arc::new(ManualTimer::new());
        let source = file_source(backend, "clip.mp4", false, true, timer, None);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let deferred = source.process(move |p| sink.lock().unwrap().push(label(&p)));
        match deferred.try_result() {
            Some(Err(crate::error::PipelineError::FrameGeneration { .. })) => {}
            other => panic!("expected FrameGeneration, got {other:?}"),
        }
        assert_eq!(*seen.lock().unwrap(), vec!["meta:h264", "frame:[0, 1)"]);
    }

    #[test]
    fn live_mode_paces_one_packet_per_tick() {
        let backend = MockBackend::with_packets(vec![video_packet(1, true), video_packet(2, false)]);
        let timer = Arc::new(ManualTimer::new());
        let service: Arc<dyn TimerService> = timer.clone();
        let source = file_source(backend, "clip.mp4", false, false, service, Some(25.0));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let deferred = source.process(move |p| sink.lock().unwrap().push(label(&p)));

        assert!(seen.lock().unwrap().is_empty(), "nothing before the first tick");
        timer.advance(Duration::from_millis(40));
        assert_eq!(seen.lock().unwrap().len(), 1);
        timer.advance(Duration::from_millis(120));
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert!(matches!(deferred.try_result(), Some(Ok(()))));
    }
}
