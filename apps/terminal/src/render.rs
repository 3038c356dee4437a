//! Text rendering for the terminal player.

use quiz_core::{Celebration, CompletionNotifier};
use shared::protocol::{CompletionNotice, RoundEvent, UserIntent};

pub const HELP: &str = "commands: s = start, n = next flag, r = reveal answer, x = restart, h = help, q = quit";

const CONFETTI: &str = "*  .  o  *  .  *  o  .  *  .  o  *  .  *";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Intent(UserIntent),
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Option<Command> {
    let command = match line.trim().to_ascii_lowercase().as_str() {
        "s" | "start" => Command::Intent(UserIntent::Start),
        "n" | "next" => Command::Intent(UserIntent::Advance),
        "r" | "reveal" => Command::Intent(UserIntent::Reveal),
        "x" | "restart" => Command::Intent(UserIntent::Restart),
        "h" | "help" | "?" => Command::Help,
        "q" | "quit" | "exit" => Command::Quit,
        _ => return None,
    };
    Some(command)
}

pub fn render_event(event: &RoundEvent) -> String {
    match event {
        RoundEvent::Snapshot { view } | RoundEvent::Restarted { view } => {
            format!("[{}] press s to start", view.progress_label())
        }
        RoundEvent::Presented { view } => format!(
            "[{}] flag: {}",
            view.progress_label(),
            view.image.as_deref().unwrap_or("-")
        ),
        RoundEvent::Revealed { view } => {
            format!("answer: {}", view.label.as_deref().unwrap_or("?"))
        }
        RoundEvent::Completed { view, .. } => format!(
            "game over! time: {} seconds",
            view.elapsed_label().unwrap_or_else(|| "?".into())
        ),
        RoundEvent::FetchFailed { country, .. } => {
            format!("could not load the flag for {country}; try again")
        }
        RoundEvent::Error(err) => format!("error: {}", err.message),
    }
}

pub struct TerminalNotifier;

impl CompletionNotifier for TerminalNotifier {
    fn notify(&self, notice: &CompletionNotice) {
        println!("\n    {}\n", notice.message);
    }
}

pub struct TerminalCelebration;

impl Celebration for TerminalCelebration {
    fn activate(&self) {
        println!("{CONFETTI}");
    }

    fn deactivate(&self) {
        tracing::debug!("celebration cleared");
    }
}
