//! Terminal output: live progress, termination summary, reports and listings.

use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use parley_core::{QualityReport, SchedulerEvent, SessionMeta, SessionOutcome, Severity};
use parley_proto::{ConvergenceReading, RoundPhase, SessionStatus};
use std::io::{IsTerminal, stdout};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    /// Returns true if colors should be used based on mode and terminal detection.
    pub fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// ANSI color codes for terminal output.
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const RED: &str = "\x1b[31m";
    pub const CYAN: &str = "\x1b[36m";
}

/// A palette that collapses to empty strings when colors are off.
#[derive(Debug, Clone, Copy)]
struct Palette {
    on: bool,
}

impl Palette {
    fn pick(self, code: &'static str) -> &'static str {
        if self.on { code } else { "" }
    }
    fn reset(self) -> &'static str {
        self.pick(colors::RESET)
    }
    fn bold(self) -> &'static str {
        self.pick(colors::BOLD)
    }
    fn dim(self) -> &'static str {
        self.pick(colors::DIM)
    }
    fn status(self, status: SessionStatus) -> &'static str {
        self.pick(match status {
            SessionStatus::Converged => colors::GREEN,
            SessionStatus::Exhausted | SessionStatus::Interrupted => colors::YELLOW,
            SessionStatus::Failed => colors::RED,
            SessionStatus::Running => colors::CYAN,
        })
    }
}

/// Live progress for a running debate, fed by scheduler events.
pub struct ProgressView {
    palette: Palette,
    spinner: Mutex<Option<ProgressBar>>,
    started: Instant,
}

impl ProgressView {
    pub fn new(use_colors: bool) -> Arc<Self> {
        Arc::new(Self {
            palette: Palette { on: use_colors },
            spinner: Mutex::new(None),
            started: Instant::now(),
        })
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {prefix:.bold} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    /// Clears any active spinner.
    pub fn finish(&self) {
        if let Ok(mut slot) = self.spinner.lock()
            && let Some(pb) = slot.take()
        {
            pb.finish_and_clear();
        }
    }

    /// Handles one scheduler event.
    pub fn on_event(&self, event: &SchedulerEvent) {
        let p = self.palette;
        match event {
            SchedulerEvent::RoundStarted { round, max_rounds } => {
                self.finish();
                let content = format!(
                    " ROUND {round}/{max_rounds} │ {} elapsed",
                    format_elapsed(self.elapsed())
                );
                let separator = "═".repeat(60);
                println!("\n{}{separator}", p.pick(colors::CYAN));
                println!("{}{content}", p.bold());
                println!("{separator}{}", p.reset());
            }
            SchedulerEvent::TurnStarted {
                round,
                role,
                attempt,
            } => {
                self.finish();
                let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
                pb.set_style(Self::spinner_style());
                pb.set_prefix(format!("Round {round}"));
                if *attempt > 1 {
                    pb.set_message(format!("{} is thinking (attempt {attempt})", role.label()));
                } else {
                    pb.set_message(format!("{} is thinking", role.label()));
                }
                pb.enable_steady_tick(Duration::from_millis(120));
                if let Ok(mut slot) = self.spinner.lock() {
                    *slot = Some(pb);
                }
            }
            SchedulerEvent::TurnFailed {
                role,
                attempt,
                error,
                will_retry,
                ..
            } => {
                self.finish();
                let next = if *will_retry { "retrying" } else { "giving up" };
                println!(
                    "  {}⚠{} {} attempt {attempt} failed: {error} ({next})",
                    p.pick(colors::YELLOW),
                    p.reset(),
                    role.label()
                );
            }
            SchedulerEvent::TurnCompleted {
                role,
                reading,
                duration_ms,
                ..
            } => {
                self.finish();
                let note = match reading {
                    ConvergenceReading::Ambiguous { reason } => {
                        format!(" {}({}){}", p.dim(), reason.describe(), p.reset())
                    }
                    _ => String::new(),
                };
                println!(
                    "  {}✓{} {}: {}{}{} in {:.1}s{note}",
                    p.pick(colors::GREEN),
                    p.reset(),
                    role.label(),
                    p.bold(),
                    reading.effective(),
                    p.reset(),
                    *duration_ms as f64 / 1000.0
                );
            }
            SchedulerEvent::RoundPersisted { round, phase } => {
                let label = match phase {
                    RoundPhase::Debating => "still debating",
                    RoundPhase::Converging => "one side proposes final",
                    RoundPhase::Consensus => "consensus",
                };
                println!("  {}Round {round} saved: {label}{}", p.dim(), p.reset());
            }
        }
    }
}

/// Prints the summary box shown when a run stops.
pub fn print_termination(outcome: &SessionOutcome, elapsed: Duration, use_colors: bool) {
    let p = Palette { on: use_colors };
    let color = p.status(outcome.status);
    let (icon, label) = match outcome.status {
        SessionStatus::Converged => ("✓", "Consensus reached"),
        SessionStatus::Exhausted => ("⚠", "Round limit reached"),
        SessionStatus::Interrupted => ("⚡", "Interrupted"),
        SessionStatus::Failed => ("✗", "Debate failed"),
        SessionStatus::Running => ("■", "Stopped"),
    };
    let (bold, reset) = (p.bold(), p.reset());
    let separator = "─".repeat(58);

    println!("\n{bold}┌{separator}┐{reset}");
    println!("{bold}│{reset} {color}{bold}{icon}{reset} Debate finished: {color}{label}{reset}");
    println!("{bold}├{separator}┤{reset}");
    println!("{bold}│{reset}   Session:  {}", outcome.session_id);
    println!("{bold}│{reset}   Status:   {color}{}{reset}", outcome.status);
    println!("{bold}│{reset}   Rounds:   {}", outcome.rounds);
    println!("{bold}│{reset}   Elapsed:  {}", format_elapsed(elapsed));
    println!("{bold}│{reset}   Output:   {}", outcome.dir.display());
    if let Some(report) = &outcome.quality {
        println!(
            "{bold}│{reset}   Quality:  {} ({} positive, {} warnings)",
            report.rating,
            report.positives(),
            report.warnings()
        );
    }
    println!("{bold}├{separator}┤{reset}");
    println!("{bold}│{reset}   {}", outcome.explanation);
    if let Some(next) = &outcome.next_step {
        println!("{bold}│{reset}   Next: {}{next}{reset}", p.pick(colors::CYAN));
    }
    println!("{bold}└{separator}┘{reset}");
}

/// Prints a quality report as terminal text.
pub fn print_report(report: &QualityReport, use_colors: bool) {
    let p = Palette { on: use_colors };
    println!(
        "{}Quality report for {}{} ({} rounds)",
        p.bold(),
        report.session_id,
        p.reset(),
        report.rounds
    );
    println!("Rating: {}{}{} (score {})\n", p.bold(), report.rating, p.reset(), report.score);
    for finding in &report.findings {
        let (icon, color) = match finding.severity {
            Severity::Positive => ("✓", colors::GREEN),
            Severity::Info => ("·", colors::DIM),
            Severity::Warning => ("⚠", colors::YELLOW),
        };
        println!("  {}{icon}{} {}", p.pick(color), p.reset(), finding.message);
        if let Some(remedy) = &finding.remedy {
            println!("      {}try: {remedy}{}", p.dim(), p.reset());
        }
    }
}

/// Prints one line per stored session, oldest first.
pub fn print_session_list(sessions: &[SessionMeta], use_colors: bool) {
    let p = Palette { on: use_colors };
    if sessions.is_empty() {
        println!("{}No sessions found.{} Start one with `parley run \"<task>\"`.", p.dim(), p.reset());
        return;
    }
    for meta in sessions {
        println!(
            "{}  {}{:<11}{}  {:>2}/{:<2}  {}",
            meta.id,
            p.status(meta.status),
            meta.status.as_str(),
            p.reset(),
            meta.round_count,
            meta.config.max_rounds,
            truncate(meta.task.lines().next().unwrap_or_default(), 60)
        );
    }
}

/// Formats elapsed duration as human-readable string.
pub fn format_elapsed(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars - 1).collect();
        format!("{kept}…")
    }
}
