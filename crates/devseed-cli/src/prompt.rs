use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use devseed_transfer::Confirm;

/// Asks on stderr and reads the answer from stdin; only `y` confirms.
#[derive(Debug, Default)]
pub struct TerminalConfirm;

#[async_trait]
impl Confirm for TerminalConfirm {
    async fn confirm(&self, prompt: &str) -> bool {
        let mut stderr = tokio::io::stderr();
        if stderr.write_all(prompt.as_bytes()).await.is_err() || stderr.flush().await.is_err() {
            return false;
        }

        let mut answer = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut answer).await {
            Ok(_) => is_yes(&answer),
            Err(_) => false,
        }
    }
}

fn is_yes(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("y")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_y_confirms() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" Y "));
        assert!(!is_yes("yes"));
        assert!(!is_yes(""));
        assert!(!is_yes("n\n"));
    }
}
