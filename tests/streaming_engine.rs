//! StreamingEngine integration tests.
//!
//! These run the engine against an in-memory repository and a step clock,
//! so no network access or media fixtures are needed.

use std::{
    cell::Cell,
    io::{Error as IoError, ErrorKind, Write},
    rc::Rc,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use kinesis_pipe::{
    ClosingIterator, Decoded, DecodedFrame, FrameReader, PipeError, PixelFormat, ProgressCallback,
    ProgressInfo, StartSelector, StopReason, StreamIdentity, StreamRepository, StreamingEngine,
    pipeline_fn,
};

#[derive(Default)]
struct Counters {
    lists: Cell<u32>,
    opens: Cell<u32>,
    polls: Cell<u32>,
    closes: Cell<u32>,
}

fn bump(cell: &Cell<u32>) {
    cell.set(cell.get() + 1);
}

#[derive(Default)]
struct MockRepository {
    streams: Vec<StreamIdentity>,
    elements: Vec<u32>,
    counters: Rc<Counters>,
    fail_open: bool,
    fail_close: bool,
}

impl MockRepository {
    fn with_elements(elements: Vec<u32>) -> Self {
        Self {
            elements,
            ..Self::default()
        }
    }

    fn with_streams(streams: Vec<StreamIdentity>) -> Self {
        Self {
            streams,
            ..Self::default()
        }
    }
}

impl StreamRepository for MockRepository {
    type Element = u32;

    fn list_streams(&self) -> Result<Vec<StreamIdentity>, PipeError> {
        bump(&self.counters.lists);
        Ok(self.streams.clone())
    }

    fn open_media(
        &self,
        _selector: &StartSelector,
        identity: &StreamIdentity,
    ) -> Result<ClosingIterator<u32>, PipeError> {
        bump(&self.counters.opens);
        if self.fail_open {
            return Err(PipeError::Connection {
                stream: identity.to_string(),
                reason: "endpoint unavailable".to_string(),
            });
        }

        let mut elements = self.elements.clone().into_iter();
        let poll_counters = Rc::clone(&self.counters);
        let close_counters = Rc::clone(&self.counters);
        let fail_close = self.fail_close;
        Ok(ClosingIterator::from_fn(
            move || {
                bump(&poll_counters.polls);
                Ok(elements.next())
            },
            move || {
                bump(&close_counters.closes);
                if fail_close {
                    Err(PipeError::Connection {
                        stream: "mock".to_string(),
                        reason: "close failed".to_string(),
                    })
                } else {
                    Ok(())
                }
            },
        ))
    }
}

/// A clock that advances by `step` every time it is read.
fn step_clock(step: Duration) -> impl Fn() -> Instant + 'static {
    let base = Instant::now();
    let reads = Cell::new(0_u32);
    move || {
        let read = reads.get();
        reads.set(read + 1);
        base + step * read
    }
}

fn frame_for(element: u32) -> DecodedFrame {
    DecodedFrame {
        width: 2,
        height: 1,
        pixel_format: PixelFormat::Gray8,
        timestamp: Some(Duration::from_millis(u64::from(element) * 40)),
        data: vec![element as u8; 2],
    }
}

fn one_frame_per_element() -> impl kinesis_pipe::DecodePipeline<Element = u32> {
    pipeline_fn(|element: u32| Ok(Decoded::frames(vec![frame_for(element)])))
}

fn stream() -> StreamIdentity {
    StreamIdentity::new("front-door", "arn:aws:kinesisvideo:eu-west-1:1:stream/front-door/1")
}

// ── Duration bound ───────────────────────────────────────────────

#[test]
fn zero_duration_processes_exactly_one_element() {
    let repository = MockRepository::with_elements(vec![1, 2, 3, 4]);
    let counters = Rc::clone(&repository.counters);
    let engine = StreamingEngine::new(repository).with_clock(step_clock(Duration::ZERO));

    let mut sink = Vec::new();
    let report = engine
        .pipe(
            Duration::ZERO,
            &stream(),
            &StartSelector::Now,
            &mut one_frame_per_element(),
            &mut sink,
        )
        .expect("pipe");

    assert_eq!(report.elements, 1);
    assert_eq!(report.frames, 1);
    assert_eq!(report.stop_reason, StopReason::DurationReached);
    assert_eq!(counters.polls.get(), 1);
    assert_eq!(counters.closes.get(), 1);
    assert_eq!(sink.len(), 8 + 2);
}

#[test]
fn stops_at_first_element_boundary_past_duration() {
    let repository = MockRepository::with_elements((1..=10).collect());
    let counters = Rc::clone(&repository.counters);
    let engine = StreamingEngine::new(repository).with_clock(step_clock(Duration::from_secs(1)));

    let report = engine
        .pipe(
            Duration::from_secs(3),
            &stream(),
            &StartSelector::Earliest,
            &mut one_frame_per_element(),
            std::io::sink(),
        )
        .expect("pipe");

    assert_eq!(report.elements, 3);
    assert_eq!(report.stop_reason, StopReason::DurationReached);
    assert_eq!(counters.polls.get(), 3);
    assert_eq!(counters.closes.get(), 1);
}

// ── Exhaustion ───────────────────────────────────────────────────

#[test]
fn exhaustion_ends_normally_and_closes_once() {
    let repository = MockRepository::with_elements(vec![1, 2, 3]);
    let counters = Rc::clone(&repository.counters);
    let engine = StreamingEngine::new(repository).with_clock(step_clock(Duration::from_secs(1)));

    let mut sink = Vec::new();
    let report = engine
        .pipe(
            Duration::from_secs(3600),
            &stream(),
            &StartSelector::Now,
            &mut one_frame_per_element(),
            &mut sink,
        )
        .expect("pipe");

    assert_eq!(report.elements, 3);
    assert_eq!(report.frames, 3);
    assert_eq!(report.bytes_written, 3 * (8 + 2));
    assert_eq!(report.stop_reason, StopReason::Exhausted);
    assert_eq!(counters.opens.get(), 1);
    assert_eq!(counters.polls.get(), 4);
    assert_eq!(counters.closes.get(), 1);

    let payloads: Vec<Vec<u8>> = FrameReader::new(sink.as_slice())
        .collect::<Result<_, _>>()
        .expect("read back");
    assert_eq!(payloads, vec![vec![1, 1], vec![2, 2], vec![3, 3]]);
}

#[test]
fn empty_stream_writes_nothing() {
    let repository = MockRepository::with_elements(Vec::new());
    let counters = Rc::clone(&repository.counters);
    let engine = StreamingEngine::new(repository);

    let mut sink = Vec::new();
    let report = engine
        .pipe(
            Duration::ZERO,
            &stream(),
            &StartSelector::Now,
            &mut one_frame_per_element(),
            &mut sink,
        )
        .expect("pipe");

    assert_eq!(report.elements, 0);
    assert_eq!(report.stop_reason, StopReason::Exhausted);
    assert!(sink.is_empty());
    assert_eq!(counters.closes.get(), 1);
}

// ── Framing ──────────────────────────────────────────────────────

#[test]
fn frames_are_length_prefixed_big_endian() {
    let repository = MockRepository::with_elements(vec![1]);
    let engine = StreamingEngine::new(repository);

    let mut sink = Vec::new();
    let mut pipeline = pipeline_fn(|_element: u32| {
        Ok(Decoded::frames(vec![DecodedFrame {
            data: vec![0xAA, 0xBB, 0xCC],
            ..frame_for(0)
        }]))
    });
    engine
        .pipe(
            Duration::from_secs(60),
            &stream(),
            &StartSelector::Now,
            &mut pipeline,
            &mut sink,
        )
        .expect("pipe");

    assert_eq!(sink, vec![0, 0, 0, 0, 0, 0, 0, 3, 0xAA, 0xBB, 0xCC]);
}

#[test]
fn elements_without_frames_write_nothing_but_count() {
    let repository = MockRepository::with_elements(vec![1, 2, 3]);
    let engine = StreamingEngine::new(repository);

    let mut sink = Vec::new();
    let mut pipeline = pipeline_fn(|element: u32| {
        Ok(if element == 2 {
            Decoded::frames(vec![frame_for(element), frame_for(element)])
        } else {
            Decoded::none()
        })
    });
    let report = engine
        .pipe(
            Duration::from_secs(60),
            &stream(),
            &StartSelector::Now,
            &mut pipeline,
            &mut sink,
        )
        .expect("pipe");

    assert_eq!(report.elements, 3);
    assert_eq!(report.frames, 2);
    assert_eq!(sink.len(), 2 * (8 + 2));
}

// ── Failures ─────────────────────────────────────────────────────

#[test]
fn decode_failure_aborts_after_earlier_frames_were_written() {
    let repository = MockRepository::with_elements(vec![1, 2, 3]);
    let counters = Rc::clone(&repository.counters);
    let engine = StreamingEngine::new(repository);

    let mut sink = Vec::new();
    let mut pipeline = pipeline_fn(|element: u32| {
        if element == 2 {
            Err(PipeError::Decode("corrupt block".to_string()))
        } else {
            Ok(Decoded::frames(vec![frame_for(element)]))
        }
    });
    let result = engine.pipe(
        Duration::from_secs(60),
        &stream(),
        &StartSelector::Now,
        &mut pipeline,
        &mut sink,
    );

    assert!(matches!(result, Err(PipeError::Decode(_))));
    assert_eq!(counters.polls.get(), 2);
    assert_eq!(counters.closes.get(), 1);
    assert_eq!(sink, vec![0, 0, 0, 0, 0, 0, 0, 2, 1, 1]);
}

struct BrokenSink;

impl Write for BrokenSink {
    fn write(&mut self, _buffer: &[u8]) -> std::io::Result<usize> {
        Err(IoError::new(ErrorKind::BrokenPipe, "reader went away"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn sink_failure_still_closes_the_session() {
    let repository = MockRepository::with_elements(vec![1, 2, 3]);
    let counters = Rc::clone(&repository.counters);
    let engine = StreamingEngine::new(repository);

    let result = engine.pipe(
        Duration::from_secs(60),
        &stream(),
        &StartSelector::Now,
        &mut one_frame_per_element(),
        BrokenSink,
    );

    match result {
        Err(PipeError::Io(error)) => assert_eq!(error.kind(), ErrorKind::BrokenPipe),
        other => panic!("expected I/O error, got {other:?}"),
    }
    assert_eq!(counters.polls.get(), 1);
    assert_eq!(counters.closes.get(), 1);
}

#[test]
fn open_failure_is_returned() {
    let repository = MockRepository {
        fail_open: true,
        ..MockRepository::with_elements(vec![1])
    };
    let counters = Rc::clone(&repository.counters);
    let engine = StreamingEngine::new(repository);

    let result = engine.pipe(
        Duration::from_secs(60),
        &stream(),
        &StartSelector::Now,
        &mut one_frame_per_element(),
        std::io::sink(),
    );

    assert!(matches!(result, Err(PipeError::Connection { .. })));
    assert_eq!(counters.polls.get(), 0);
}

#[test]
fn close_failure_after_success_is_reported() {
    let repository = MockRepository {
        fail_close: true,
        ..MockRepository::with_elements(vec![1, 2])
    };
    let counters = Rc::clone(&repository.counters);
    let engine = StreamingEngine::new(repository);

    let result = engine.pipe(
        Duration::ZERO,
        &stream(),
        &StartSelector::Now,
        &mut one_frame_per_element(),
        std::io::sink(),
    );

    assert!(matches!(result, Err(PipeError::Connection { .. })));
    assert_eq!(counters.closes.get(), 1);
}

#[test]
fn unresolved_identity_is_rejected_before_opening() {
    let repository = MockRepository::with_elements(vec![1]);
    let counters = Rc::clone(&repository.counters);
    let engine = StreamingEngine::new(repository);

    let result = engine.pipe(
        Duration::from_secs(60),
        &StreamIdentity::default(),
        &StartSelector::Now,
        &mut one_frame_per_element(),
        std::io::sink(),
    );

    assert!(matches!(result, Err(PipeError::UnresolvedStream)));
    assert_eq!(counters.opens.get(), 0);
}

// ── Progress ─────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingProgress {
    seen: Mutex<Vec<ProgressInfo>>,
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.seen.lock().expect("lock").push(info.clone());
    }
}

#[test]
fn progress_is_reported_after_every_element() {
    let progress = Arc::new(RecordingProgress::default());
    let engine = StreamingEngine::new(MockRepository::with_elements(vec![1, 2, 3]))
        .with_clock(step_clock(Duration::from_secs(1)))
        .with_progress(progress.clone());

    let report = engine
        .pipe(
            Duration::from_secs(10),
            &stream(),
            &StartSelector::Now,
            &mut one_frame_per_element(),
            std::io::sink(),
        )
        .expect("pipe");

    let seen = progress.seen.lock().expect("lock");
    assert_eq!(seen.len(), 3);
    assert_eq!(seen.iter().map(|info| info.elements).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(seen[2].frames, report.frames);
    assert_eq!(seen[0].elapsed, Duration::from_secs(1));
    assert_eq!(seen[0].remaining(), Duration::from_secs(9));
}

// ── find_stream_info ─────────────────────────────────────────────

fn catalog() -> MockRepository {
    MockRepository::with_streams(vec![StreamIdentity::new("a", "x"), StreamIdentity::new("b", "y")])
}

#[test]
fn find_by_name() {
    let engine = StreamingEngine::new(catalog());
    let found = engine.find_stream_info(Some("b"), None).expect("lookup");
    assert_eq!(found, Some(StreamIdentity::new("b", "y")));
}

#[test]
fn find_by_arn() {
    let engine = StreamingEngine::new(catalog());
    let found = engine.find_stream_info(None, Some("x")).expect("lookup");
    assert_eq!(found, Some(StreamIdentity::new("a", "x")));
}

#[test]
fn find_returns_first_entry_matching_either_key() {
    let engine = StreamingEngine::new(catalog());
    let found = engine.find_stream_info(Some("b"), Some("x")).expect("lookup");
    assert_eq!(found, Some(StreamIdentity::new("a", "x")));
}

#[test]
fn find_ignores_ascii_case() {
    let engine = StreamingEngine::new(catalog());
    let found = engine.find_stream_info(Some("B"), None).expect("lookup");
    assert_eq!(found, Some(StreamIdentity::new("b", "y")));
}

#[test]
fn find_without_match_is_none() {
    let engine = StreamingEngine::new(catalog());
    assert_eq!(engine.find_stream_info(Some("c"), Some("z")).expect("lookup"), None);
}

#[test]
fn find_without_keys_does_not_list() {
    let repository = catalog();
    let counters = Rc::clone(&repository.counters);
    let engine = StreamingEngine::new(repository);

    assert_eq!(engine.find_stream_info(None, None).expect("lookup"), None);
    assert_eq!(counters.lists.get(), 0);
}
