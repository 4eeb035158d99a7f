use std::{fs, path::Path, path::PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use chalkline::{LessonDoc, LessonSession, Millis, PageIndex, PlayerStatus, SilentBackend};

#[derive(Parser, Debug)]
#[command(name = "chalkline", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the segment timeline built from a lesson.
    Timeline(TimelineArgs),
    /// Print the final board layout after all visuals have played.
    Board(BoardArgs),
    /// Simulate playback on a synthetic clock and print state transitions.
    Play(PlayArgs),
}

#[derive(Parser, Debug)]
struct TimelineArgs {
    /// Input lesson JSON (object with `steps` or a bare `events` array).
    #[arg(long = "in")]
    in_path: PathBuf,
}

#[derive(Parser, Debug)]
struct BoardArgs {
    /// Input lesson JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Page to print (defaults to the last active page).
    #[arg(long)]
    page: Option<u32>,
}

#[derive(Parser, Debug)]
struct PlayArgs {
    /// Input lesson JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Speed multiplier.
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Synthetic tick interval in milliseconds.
    #[arg(long, default_value_t = 250.0)]
    tick_ms: f64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Timeline(args) => cmd_timeline(args),
        Command::Board(args) => cmd_board(args),
        Command::Play(args) => cmd_play(args),
    }
}

fn read_session(path: &Path) -> anyhow::Result<LessonSession<SilentBackend>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("open lesson '{}'", path.display()))?;
    let doc = LessonDoc::from_json(&raw)
        .with_context(|| format!("parse lesson '{}'", path.display()))?;
    Ok(LessonSession::from_doc(&doc, SilentBackend::new()))
}

fn cmd_timeline(args: TimelineArgs) -> anyhow::Result<()> {
    let session = read_session(&args.in_path)?;
    let segments = session.player().segments();
    println!("{} segment(s)", segments.len());
    for (i, seg) in segments.iter().enumerate() {
        let step = seg
            .step
            .as_ref()
            .map(|s| format!(" [step {} {:?}]", s.number, s.title))
            .unwrap_or_default();
        let narration = seg
            .audio
            .as_ref()
            .map(|a| format!(" narration={}", a.id))
            .unwrap_or_else(|| " silent".to_string());
        println!(
            "#{i}{step}{narration} duration={:.0}ms visuals={:.0}ms",
            seg.duration.0, seg.visual_duration.0
        );
        for slot in &seg.slots {
            let v = &seg.visuals[slot.visual];
            println!(
                "    {:>7.0}..{:<7.0} {:?} {}",
                slot.start.0, slot.end.0, v.kind, v.id
            );
        }
    }
    Ok(())
}

fn cmd_board(args: BoardArgs) -> anyhow::Result<()> {
    let mut session = read_session(&args.in_path)?;
    session.play(Millis(0.0));

    // Run the clock far past the lesson end so every visual is placed.
    let mut now = Millis(0.0);
    let mut frame = session.tick(now);
    while frame.playback.status != PlayerStatus::Complete {
        now += Millis(250.0);
        frame = session.tick(now);
    }

    let page = args.page.map(PageIndex).unwrap_or(frame.board.page);
    let snap = session.board(page);
    println!("page {}/{}", page.0 + 1, snap.page_count);
    for status in &snap.regions {
        println!(
            "  {:<8} used={} cursor={:.0}",
            status.region.as_str(),
            status.used,
            status.cursor
        );
    }
    for o in &snap.objects {
        println!(
            "  {:<8} ({:>5.0},{:>5.0}) {:>4.0}x{:<4.0} {:?} {} {}",
            o.region.as_str(),
            o.rect.x0,
            o.rect.y0,
            o.rect.width(),
            o.rect.height(),
            o.kind,
            o.id,
            o.content.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn cmd_play(args: PlayArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.tick_ms > 0.0, "tick-ms must be > 0");
    let mut session = read_session(&args.in_path)?;
    session.play(Millis(0.0));
    session.set_speed(Millis(0.0), args.speed);

    let mut now = Millis(0.0);
    let mut last_segment = usize::MAX;
    loop {
        let frame = session.tick(now);
        if frame.playback.segment_index != last_segment || frame.started_segment.is_some() {
            last_segment = frame.playback.segment_index;
            println!(
                "[{:>8.0}ms] segment {} step {}/{} progress {:.0}%",
                frame.playback.elapsed.0,
                frame.playback.segment_index,
                frame.playback.current_step,
                frame.playback.total_steps,
                frame.playback.total_progress * 100.0
            );
        }
        if frame.page_turned {
            println!("[{:>8.0}ms] page turn -> {}", frame.playback.elapsed.0, frame.board.page.0 + 1);
        }
        if frame.playback.status == PlayerStatus::Complete {
            println!(
                "complete: {} visual(s), {:.0}ms total",
                frame.completed.len(),
                frame.playback.total_duration.0
            );
            return Ok(());
        }
        now += Millis(args.tick_ms);
    }
}
