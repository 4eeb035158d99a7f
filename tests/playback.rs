use chalkline::{LessonDoc, LessonSession, Millis, PlayerStatus, SilentBackend};

fn session_with(backend: SilentBackend) -> LessonSession<SilentBackend> {
    let doc = LessonDoc::from_json(include_str!("data/derivative_lesson.json")).unwrap();
    LessonSession::from_doc(&doc, backend)
}

fn session() -> LessonSession<SilentBackend> {
    session_with(SilentBackend::new())
}

/// Drive the synthetic clock until the lesson completes, returning the
/// number of ticks it took.
fn run_to_completion(s: &mut LessonSession<SilentBackend>, tick_ms: f64) -> usize {
    s.play(Millis(0.0));
    for i in 0..10_000 {
        let frame = s.tick(Millis(i as f64 * tick_ms));
        if frame.playback.status == PlayerStatus::Complete {
            return i;
        }
    }
    panic!("lesson never completed");
}

#[test]
fn lesson_plays_to_completion_with_monotonic_progress() {
    let mut s = session();
    s.play(Millis(0.0));

    let mut prev_elapsed = -1.0;
    let mut prev_progress = -1.0;
    let mut last = None;
    for i in 0..10_000 {
        let frame = s.tick(Millis(i as f64 * 120.0));
        assert!(frame.playback.elapsed.0 >= prev_elapsed);
        assert!(frame.playback.total_progress >= prev_progress);
        assert!(frame.playback.current_step <= frame.playback.total_steps);
        prev_elapsed = frame.playback.elapsed.0;
        prev_progress = frame.playback.total_progress;
        let done = frame.playback.status == PlayerStatus::Complete;
        last = Some(frame);
        if done {
            break;
        }
    }

    let last = last.unwrap();
    assert_eq!(last.playback.status, PlayerStatus::Complete);
    assert_eq!(last.playback.total_progress, 1.0);
    assert_eq!(last.playback.total_steps, 3);
    assert_eq!(last.playback.current_step, 3);

    let visuals = s.events().iter().filter(|e| e.is_visual()).count();
    assert_eq!(last.completed.len(), visuals);
}

#[test]
fn pause_freezes_the_clock_until_resume() {
    let mut s = session();
    s.play(Millis(0.0));
    s.tick(Millis(2000.0));
    s.pause(Millis(2500.0));

    let a = s.tick(Millis(9_000.0));
    let b = s.tick(Millis(90_000.0));
    assert_eq!(a.playback.status, PlayerStatus::Paused);
    assert_eq!(a.playback.elapsed, b.playback.elapsed);

    s.resume(Millis(100_000.0));
    let c = s.tick(Millis(100_000.0));
    assert_eq!(c.playback.status, PlayerStatus::Playing);
    assert_eq!(c.playback.elapsed, b.playback.elapsed);
}

#[test]
fn double_speed_roughly_halves_wall_time() {
    let mut normal = session();
    let slow_ticks = run_to_completion(&mut normal, 50.0);

    let mut fast = session();
    fast.play(Millis(0.0));
    fast.set_speed(Millis(0.0), 2.0);
    let mut fast_ticks = 0;
    for i in 0..10_000 {
        let frame = fast.tick(Millis(i as f64 * 50.0));
        if frame.playback.status == PlayerStatus::Complete {
            fast_ticks = i;
            break;
        }
    }

    assert!(fast_ticks > 0);
    // One tick of slack either side of the exact halving.
    assert!(fast_ticks <= slow_ticks / 2 + 1);
    assert!(fast_ticks >= slow_ticks / 2 - 1);
}

#[test]
fn seek_backward_resets_completed_history() {
    let mut s = session();
    s.play(Millis(0.0));

    let last = s.player().segments().len() - 1;
    s.seek_to_segment(Millis(0.0), last);
    let mid = s.tick(Millis(0.0));
    assert!(!mid.completed.is_empty());

    s.seek_to_segment(Millis(1.0), 0);
    let start = s.tick(Millis(1.0));
    assert!(start.completed.is_empty());
    assert_eq!(start.playback.segment_index, 0);
}

#[test]
fn seek_past_the_end_is_ignored() {
    let mut s = session();
    s.play(Millis(0.0));
    let before = s.tick(Millis(100.0)).playback;
    s.seek_to_segment(Millis(100.0), 9_999);
    let after = s.tick(Millis(100.0)).playback;
    assert_eq!(before.segment_index, after.segment_index);
    assert_eq!(before.status, after.status);
}

#[test]
fn broken_narration_audio_never_stalls_the_lesson() {
    let mut backend = SilentBackend::new();
    backend
        .fail_urls
        .insert("https://cdn.example/lesson/step1.mp3".to_string());
    let mut s = session_with(backend);
    run_to_completion(&mut s, 120.0);
}
