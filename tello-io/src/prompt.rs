//! Operator prompt: reads commands line by line and forwards them to the session

use crate::core::types::ShutdownReason;
use crate::error::Result;
use crate::session::SessionController;
use std::io::{BufRead, Write};

const PROMPT: &str = "Command: ";

/// Read commands from `input` until the session ends.
///
/// Blank lines are skipped. End of input is treated like the quit command.
/// Returns the number of commands sent to the vehicle.
pub fn run_prompt<R: BufRead, W: Write>(
    session: &SessionController,
    mut input: R,
    mut output: W,
) -> Result<u64> {
    let mut forwarded = 0u64;
    let mut line = String::new();

    loop {
        if session.is_shutting_down() {
            break;
        }

        write!(output, "{}", PROMPT)?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            log::info!("Operator input closed");
            session.shutdown(ShutdownReason::UserRequested("end of input".to_string()));
            break;
        }

        let command = line.trim();
        if command.is_empty() {
            continue;
        }

        // A failed send has already shut the session down
        if session.send_user_command(command).is_err() {
            break;
        }
        if !session.is_quit_command(command) {
            forwarded += 1;
        }
    }

    Ok(forwarded)
}
