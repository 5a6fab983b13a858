use std::io::{self, BufRead};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::common::{OperatorStatus, Phase};

/// Override keys, in the order of [`Phase::SELECTABLE`].
const OVERRIDE_KEYS: [char; 4] = ['a', 's', 'd', 'f'];

const STATUS_KEYS: [(char, OperatorStatus); 3] = [
    ('i', OperatorStatus::Independent),
    ('h', OperatorStatus::Help),
    ('t', OperatorStatus::TakeOver),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKey {
    Override(Phase),
    Status(OperatorStatus),
    Quit,
}

/// Maps one line of operator input to a command. Accepts the single-letter
/// keys or a selectable phase name.
pub fn parse_key(line: &str) -> Option<OperatorKey> {
    let input = line.trim().to_ascii_lowercase();
    let mut chars = input.chars();
    if let (Some(key), None) = (chars.next(), chars.next()) {
        if key == 'q' {
            return Some(OperatorKey::Quit);
        }
        if let Some(position) = OVERRIDE_KEYS.iter().position(|k| *k == key) {
            return Some(OperatorKey::Override(Phase::SELECTABLE[position]));
        }
        return STATUS_KEYS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, status)| OperatorKey::Status(*status));
    }

    input
        .parse::<Phase>()
        .ok()
        .filter(|phase| Phase::SELECTABLE.contains(phase))
        .map(OperatorKey::Override)
}

pub fn override_help() -> String {
    let keys: Vec<String> = OVERRIDE_KEYS
        .iter()
        .zip(Phase::SELECTABLE)
        .map(|(key, phase)| format!("{key}={phase}"))
        .collect();
    format!("Override: {}", keys.join(" "))
}

/// The status keys still on offer while `current` is active.
pub fn status_help(current: OperatorStatus) -> String {
    let keys: Vec<String> = current
        .available_transitions()
        .into_iter()
        .filter_map(|status| {
            STATUS_KEYS
                .iter()
                .find(|(_, s)| *s == status)
                .map(|(key, _)| format!("{key}={}", status.label()))
        })
        .collect();
    format!("Status ({current}): {}", keys.join(" "))
}

/// Forwards lines from `reader` on a detached thread. The receiver yields
/// `None` at end of input.
///
/// A blocking read cannot be cancelled, so the thread is never joined: it
/// exits on its next line once the receiver is gone, or with the process.
pub fn spawn_line_reader<R>(reader: R, buffer: usize) -> io::Result<mpsc::Receiver<io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    thread::Builder::new()
        .name("operator-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() {
                    debug!("Operator input receiver closed");
                    return;
                }
                if failed {
                    warn!("Stopped reading operator input after an error");
                    return;
                }
            }
            debug!("Operator input reached end of file");
        })?;
    Ok(rx)
}
