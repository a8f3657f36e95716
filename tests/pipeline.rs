use anyhow::Result;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use thermal_classifier::classify::{Classification, Classifier, ClassifierMemory, Sample};
use thermal_classifier::ingest::{SyntheticCamera, SyntheticScene};
use thermal_classifier::{
    run_connection, ConnectionEnd, DeltaMotionDetector, Frame, FrameDecoder, HotspotTrackExtractor,
    InMemorySessionStore, MessageSource, MotionDetector, MotionSettings, RecorderSettings,
    RecordingStateMachine, Rect, Region, ReplaySource, SqliteSessionStore, StopReason, StubClassifier,
    Telemetry, TrackExtractor, TrackSet, TrackingSettings,
};

const TELEMETRY_BYTES: usize = 640;

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn small_scene() -> SyntheticScene {
    SyntheticScene {
        width: 32,
        height: 24,
        object_size: 4,
        warmth: 900,
        quiet_frames: 10,
        active_frames: 40,
        ..SyntheticScene::default()
    }
}

fn synthetic_settings() -> RecorderSettings {
    RecorderSettings {
        width: 32,
        height: 24,
        preview_frames: 3,
        min_frames: 5,
        max_frames: 200,
        identify_every: 1,
        uniform_prior: false,
        per_track_detail: true,
    }
}

fn synthetic_messages(decoder: &FrameDecoder, count: usize) -> ReplaySource {
    let frames: Vec<Frame> = SyntheticCamera::new(small_scene()).take(count).collect();
    ReplaySource::from_frames(decoder, &frames)
}

#[test]
fn synthetic_crossing_is_recorded_classified_and_stored() -> Result<()> {
    let decoder = FrameDecoder::new(TELEMETRY_BYTES, 32, 24);
    let classifier = Arc::new(StubClassifier::new(labels(&[
        "bird", "cat", "hedgehog", "possum", "rat", "rodent",
    ]))?);
    let store = SqliteSessionStore::open(&thermal_classifier::shared_memory_uri())?;
    let mut recorder = RecordingStateMachine::new(
        synthetic_settings(),
        DeltaMotionDetector::new(MotionSettings {
            window_frames: 3,
            ..MotionSettings::default()
        }),
        HotspotTrackExtractor::new(TrackingSettings::default()),
        classifier,
        store,
    );

    let mut source = synthetic_messages(&decoder, 60);
    let stats = run_connection(&mut source, &decoder, &mut recorder, &AtomicBool::new(false))?;

    assert_eq!(stats.end, ConnectionEnd::PeerClosed);
    assert_eq!(stats.frames, 60);
    assert_eq!(stats.partial_frames, 0);
    assert_eq!(stats.sessions_started, 1);
    assert_eq!(stats.sessions_finished, 1);
    assert_eq!(stats.sessions_abandoned, 0);

    let sessions = recorder.store().load_sessions(10)?;
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.stop_reason, StopReason::MotionStopped);
    assert_eq!(session.runway_frames, 3);
    assert_eq!(session.frames_processed, 45);
    assert_eq!(session.tracks.len(), 1);

    let track = &session.tracks[0];
    let result = track.result.as_ref().expect("track was identified");
    assert_eq!(result.label.as_deref(), Some("rat"));
    assert!(result.confidence > 0.5);
    let history = track.history.as_ref().expect("per-track detail kept");
    assert_eq!(history.predictions.len(), history.novelties.len());
    assert_eq!(session.ranked_labels.len(), 6);
    assert_eq!(session.top_label().map(|l| l.label.as_str()), Some("rat"));
    Ok(())
}

#[test]
fn disconnect_mid_session_abandons_it() -> Result<()> {
    let decoder = FrameDecoder::new(TELEMETRY_BYTES, 32, 24);
    let classifier = Arc::new(StubClassifier::new(labels(&["possum", "rat"]))?);
    let mut recorder = RecordingStateMachine::new(
        synthetic_settings(),
        DeltaMotionDetector::new(MotionSettings {
            window_frames: 3,
            ..MotionSettings::default()
        }),
        HotspotTrackExtractor::new(TrackingSettings::default()),
        classifier,
        InMemorySessionStore::new(),
    );

    let mut source = synthetic_messages(&decoder, 30);
    let stats = run_connection(&mut source, &decoder, &mut recorder, &AtomicBool::new(false))?;

    assert_eq!(stats.sessions_started, 1);
    assert_eq!(stats.sessions_finished, 0);
    assert_eq!(stats.sessions_abandoned, 1);
    assert!(!recorder.is_recording());
    assert!(recorder.store().sessions().is_empty());
    Ok(())
}

#[test]
fn short_message_drops_the_connection() -> Result<()> {
    let decoder = FrameDecoder::new(TELEMETRY_BYTES, 32, 24);
    let frame = Frame::filled(Telemetry::default(), 32, 24, 3000);
    let mut source = ReplaySource::new(vec![
        decoder.encode(&frame),
        vec![0u8; 100],
        decoder.encode(&frame),
    ]);
    let mut recorder = RecordingStateMachine::new(
        synthetic_settings(),
        DeltaMotionDetector::new(MotionSettings::default()),
        HotspotTrackExtractor::new(TrackingSettings::default()),
        Arc::new(StubClassifier::new(labels(&["rat"]))?),
        InMemorySessionStore::new(),
    );

    let stats = run_connection(&mut source, &decoder, &mut recorder, &AtomicBool::new(false))?;
    assert_eq!(stats.end, ConnectionEnd::ShortRead);
    assert_eq!(stats.messages, 2);
    assert_eq!(stats.frames, 1);
    assert_eq!(source.remaining(), 1);
    Ok(())
}

#[test]
fn truncated_payload_is_processed_as_partial_frame() -> Result<()> {
    let decoder = FrameDecoder::new(TELEMETRY_BYTES, 32, 24);
    let frame = Frame::filled(Telemetry::default(), 32, 24, 3000);
    let mut truncated = decoder.encode(&frame);
    truncated.truncate(TELEMETRY_BYTES + 100);
    let mut source = ReplaySource::new(vec![decoder.encode(&frame), truncated]);
    let mut recorder = RecordingStateMachine::new(
        synthetic_settings(),
        DeltaMotionDetector::new(MotionSettings::default()),
        HotspotTrackExtractor::new(TrackingSettings::default()),
        Arc::new(StubClassifier::new(labels(&["rat"]))?),
        InMemorySessionStore::new(),
    );

    let stats = run_connection(&mut source, &decoder, &mut recorder, &AtomicBool::new(false))?;
    assert_eq!(stats.end, ConnectionEnd::PeerClosed);
    assert_eq!(stats.frames, 2);
    assert_eq!(stats.partial_frames, 1);
    assert_eq!(recorder.frames_seen(), 2);
    Ok(())
}

fn delta_recorder() -> Result<
    RecordingStateMachine<DeltaMotionDetector, HotspotTrackExtractor, StubClassifier, InMemorySessionStore>,
> {
    Ok(RecordingStateMachine::new(
        synthetic_settings(),
        DeltaMotionDetector::new(MotionSettings {
            window_frames: 3,
            ..MotionSettings::default()
        }),
        HotspotTrackExtractor::new(TrackingSettings::default()),
        Arc::new(StubClassifier::new(labels(&["possum", "rat"]))?),
        InMemorySessionStore::new(),
    ))
}

/// Uniform 3000 background with an optional warm 4x4 block at (10, 8).
fn still_frame(with_object: bool) -> Frame {
    let mut samples = vec![3000u16; 32 * 24];
    if with_object {
        for y in 8..12 {
            for x in 10..14 {
                samples[y * 32 + x] = 3900;
            }
        }
    }
    Frame::new(Telemetry::default(), 32, 24, samples).expect("frame")
}

#[test]
fn truncated_frame_in_static_scene_starts_no_session() -> Result<()> {
    let decoder = FrameDecoder::new(TELEMETRY_BYTES, 32, 24);
    let still = decoder.encode(&still_frame(false));
    let mut truncated = still.clone();
    truncated.truncate(TELEMETRY_BYTES + 100);

    let mut messages = vec![still.clone(); 10];
    messages.push(truncated);
    messages.extend(std::iter::repeat(still).take(12));
    let mut source = ReplaySource::new(messages);
    let mut recorder = delta_recorder()?;

    let stats = run_connection(&mut source, &decoder, &mut recorder, &AtomicBool::new(false))?;
    assert_eq!(stats.frames, 23);
    assert_eq!(stats.partial_frames, 1);
    assert_eq!(stats.sessions_started, 0);
    assert_eq!(stats.sessions_finished, 0);
    assert!(recorder.store().sessions().is_empty());
    Ok(())
}

#[test]
fn each_connection_starts_with_an_empty_motion_window() -> Result<()> {
    let decoder = FrameDecoder::new(TELEMETRY_BYTES, 32, 24);
    let mut recorder = delta_recorder()?;

    let occupied = decoder.encode(&still_frame(true));
    let mut first = ReplaySource::new(vec![occupied; 5]);
    let stats = run_connection(&mut first, &decoder, &mut recorder, &AtomicBool::new(false))?;
    assert_eq!(stats.sessions_started, 0);

    let empty = decoder.encode(&still_frame(false));
    let mut second = ReplaySource::new(vec![empty; 3]);
    let stats = run_connection(&mut second, &decoder, &mut recorder, &AtomicBool::new(false))?;
    assert_eq!(stats.sessions_started, 0);
    assert_eq!(stats.sessions_abandoned, 0);
    assert!(!recorder.is_recording());
    assert_eq!(recorder.motion().preroll().len(), 0);
    Ok(())
}

/// Replays its messages, then fails the way a reset socket does.
struct ResetAfterReplay {
    inner: ReplaySource,
}

impl MessageSource for ResetAfterReplay {
    fn recv_message(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inner.remaining() == 0 {
            return Err(io::Error::from(io::ErrorKind::ConnectionReset));
        }
        self.inner.recv_message(buf)
    }
}

#[test]
fn receive_error_ends_connection_with_stats() -> Result<()> {
    let decoder = FrameDecoder::new(TELEMETRY_BYTES, 32, 24);
    let mut recorder = delta_recorder()?;
    let mut source = ResetAfterReplay {
        inner: synthetic_messages(&decoder, 30),
    };

    let stats = run_connection(&mut source, &decoder, &mut recorder, &AtomicBool::new(false))?;
    assert_eq!(stats.end, ConnectionEnd::RecvError);
    assert_eq!(stats.frames, 30);
    assert_eq!(stats.sessions_started, 1);
    assert_eq!(stats.sessions_abandoned, 1);
    assert!(!recorder.is_recording());
    assert!(recorder.store().sessions().is_empty());
    Ok(())
}

#[test]
fn shutdown_flag_stops_before_reading() -> Result<()> {
    let decoder = FrameDecoder::new(TELEMETRY_BYTES, 32, 24);
    let mut source = synthetic_messages(&decoder, 5);
    let mut recorder = RecordingStateMachine::new(
        synthetic_settings(),
        DeltaMotionDetector::new(MotionSettings::default()),
        HotspotTrackExtractor::new(TrackingSettings::default()),
        Arc::new(StubClassifier::new(labels(&["rat"]))?),
        InMemorySessionStore::new(),
    );

    let stats = run_connection(&mut source, &decoder, &mut recorder, &AtomicBool::new(true))?;
    assert_eq!(stats.end, ConnectionEnd::Shutdown);
    assert_eq!(stats.messages, 0);
    assert_eq!(source.remaining(), 5);
    Ok(())
}

// ----------------------------------------------------------------------------
// Ten-label scenario with scripted collaborators
// ----------------------------------------------------------------------------

/// Reports movement once it has seen two frames; keeps the last two.
#[derive(Default)]
struct TwoFrameMotion {
    window: VecDeque<Arc<Frame>>,
}

impl MotionDetector for TwoFrameMotion {
    fn name(&self) -> &'static str {
        "two-frame"
    }

    fn process_frame(&mut self, frame: Arc<Frame>) {
        if self.window.len() == 2 {
            self.window.pop_front();
        }
        self.window.push_back(frame);
    }

    fn movement_detected(&self) -> bool {
        self.window.len() == 2
    }

    fn preroll(&self) -> Vec<Arc<Frame>> {
        self.window.iter().cloned().collect()
    }
}

/// A single uncropped track of mass 25 on every frame.
struct SteadyTrack;

impl TrackExtractor for SteadyTrack {
    fn name(&self) -> &'static str {
        "steady"
    }

    fn process_frame(&mut self, tracks: &mut TrackSet, _frame: &Frame, frame_number: u32) -> Result<()> {
        if tracks.is_empty() {
            tracks.begin();
        }
        for track in tracks.iter_mut() {
            track.add_region(Region {
                rect: Rect::new(4, 4, 6, 6),
                frame_number,
                mass: 25.0,
                was_cropped: false,
            });
        }
        Ok(())
    }
}

struct ConstantClassifier {
    labels: Vec<String>,
    probabilities: Vec<f32>,
    novelty: f32,
}

impl Classifier for ConstantClassifier {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn classify(&self, _sample: &Sample, _memory: &ClassifierMemory) -> Result<Classification> {
        Ok(Classification {
            probabilities: self.probabilities.clone(),
            novelty: self.novelty,
            memory: ClassifierMemory::from_values(vec![1.0]),
        })
    }
}

#[test]
fn ten_label_track_settles_on_its_dominant_label() -> Result<()> {
    let names = labels(&[
        "false-positive",
        "bird",
        "cat",
        "possum",
        "hedgehog",
        "human",
        "leporidae",
        "mustelid",
        "rat",
        "rodent",
    ]);
    let mut probabilities = vec![0.03f32; 10];
    probabilities[0] = 0.05;
    probabilities[3] = 0.7;
    let classifier = Arc::new(ConstantClassifier {
        labels: names,
        probabilities,
        novelty: 0.3,
    });

    let settings = RecorderSettings {
        width: 16,
        height: 16,
        preview_frames: 2,
        min_frames: 100,
        max_frames: 7,
        identify_every: 1,
        uniform_prior: false,
        per_track_detail: true,
    };
    let mut recorder = RecordingStateMachine::new(
        settings,
        TwoFrameMotion::default(),
        SteadyTrack,
        classifier,
        InMemorySessionStore::new(),
    );

    let decoder = FrameDecoder::new(TELEMETRY_BYTES, 16, 16);
    let frames: Vec<Frame> = (0..7)
        .map(|_| Frame::filled(Telemetry::default(), 16, 16, 3000))
        .collect();
    let mut source = ReplaySource::from_frames(&decoder, &frames);
    let stats = run_connection(&mut source, &decoder, &mut recorder, &AtomicBool::new(false))?;
    assert_eq!(stats.sessions_finished, 1);

    let sessions = recorder.store().sessions();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.stop_reason, StopReason::MaxFrames);
    assert_eq!(session.frames_processed, 7);

    let track = &session.tracks[0];
    let history = track.history.as_ref().expect("per-track detail kept");
    assert_eq!(history.novelties.len(), 5);

    let result = track.result.as_ref().expect("track was identified");
    assert_eq!(result.label.as_deref(), Some("possum"));
    assert!((result.confidence - 0.7).abs() < 1e-6);
    // false-positive damped by 0.8
    assert!((result.class_best_score[0] - 0.04).abs() < 1e-6);

    let expected = [0.5f32, 0.48, 0.462, 0.4458, 0.43122];
    for (got, want) in history.novelties.iter().zip(expected) {
        assert!((got - want).abs() < 1e-5, "novelty {} != {}", got, want);
    }
    let mean = expected.iter().sum::<f32>() / 5.0;
    assert!((result.avg_novelty - mean).abs() < 1e-5);
    assert!((result.max_novelty - 0.5).abs() < 1e-6);

    assert_eq!(session.ranked_labels[0].label, "possum");
    assert_eq!(session.ranked_labels[1].label, "false-positive");
    Ok(())
}
