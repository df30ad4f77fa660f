//! Interactive operator keys on stdin.

use std::io::BufRead;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use warden_api::ControlCommand;

pub const HELP: &str = "commands: p=pause r=resume b=backup s=status q=quit";

/// Map one input line to a command. Unknown input yields `None`.
pub fn parse_command(line: &str) -> Option<ControlCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "p" | "pause" => Some(ControlCommand::Pause),
        "r" | "resume" => Some(ControlCommand::Resume),
        "b" | "backup" => Some(ControlCommand::Backup),
        "s" | "status" => Some(ControlCommand::Status),
        "q" | "quit" | "exit" => Some(ControlCommand::Quit),
        _ => None,
    }
}

/// Forward stdin commands into the control loop until stdin closes or the
/// loop goes away. Runs on a plain thread so a pending read never holds up
/// runtime shutdown.
pub fn spawn_stdin_reader(commands: mpsc::Sender<ControlCommand>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("wardend-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "stdin read failed; interactive control off");
                        return;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Some(command) => {
                        if commands.blocking_send(command).is_err() {
                            return;
                        }
                    }
                    None => warn!(input = %line.trim(), "{HELP}"),
                }
            }
            debug!("stdin closed; interactive control off");
        })
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_map_to_commands() {
        assert_eq!(parse_command("p"), Some(ControlCommand::Pause));
        assert_eq!(parse_command(" R \n"), Some(ControlCommand::Resume));
        assert_eq!(parse_command("backup"), Some(ControlCommand::Backup));
        assert_eq!(parse_command("s"), Some(ControlCommand::Status));
        assert_eq!(parse_command("q"), Some(ControlCommand::Quit));
        assert_eq!(parse_command("x"), None);
    }
}
