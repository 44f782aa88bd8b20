use crate::common::ManualCommand;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 16;

/// Reads operator keys (w/a/d/s, one line at a time) from stdin and
/// forwards them as manual commands. The control loop polls the receiver.
pub fn spawn_keyboard_reader(cancel: CancellationToken) -> Receiver<ManualCommand> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(read_keys(tx, cancel));
    rx
}

async fn read_keys(tx: Sender<ManualCommand>, cancel: CancellationToken) {
    info!("Manual control: w=forward a=left d=right s=stop, then Enter");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed, manual control disabled");
                break;
            }
            Err(e) => {
                warn!("Failed to read operator input: {}", e);
                break;
            }
        };

        for command in parse_keys(&line) {
            if tx.try_send(command).is_err() {
                debug!("Manual input backlog full, dropping {:?}", command);
            }
        }
    }
}

/// Every recognized key in a line becomes a command; other characters are ignored.
pub fn parse_keys(line: &str) -> Vec<ManualCommand> {
    line.chars().filter_map(ManualCommand::from_key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_unknown_keys() {
        assert_eq!(
            parse_keys(" a x D\n"),
            vec![ManualCommand::Left, ManualCommand::Right]
        );
        assert!(parse_keys("hello").is_empty());
    }
}
