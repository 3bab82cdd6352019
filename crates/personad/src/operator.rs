use crate::controller::Operator;
use image::RgbImage;
use std::io::BufRead;
use tokio::sync::mpsc;

/// Operator prompts on the daemon's terminal.
///
/// Input is read on its own OS thread and forwarded line by line, so a
/// pending prompt never holds up runtime shutdown.
pub struct StdinOperator {
    lines: mpsc::Receiver<String>,
}

impl StdinOperator {
    pub fn new() -> std::io::Result<Self> {
        Self::from_reader(std::io::BufReader::new(std::io::stdin()))
    }

    /// Forward lines from `reader` until EOF, a read error, or the operator
    /// is dropped.
    pub fn from_reader<R>(reader: R) -> std::io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(8);
        std::thread::Builder::new()
            .name("persona-operator".into())
            .spawn(move || {
                for line in reader.lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to read operator input");
                            break;
                        }
                    };
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                tracing::debug!("operator input closed");
            })?;
        Ok(Self { lines: rx })
    }

    async fn read_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }
}

impl Operator for StdinOperator {
    async fn ask_name(&mut self, face: &RgbImage) -> Option<String> {
        println!(
            "Unknown face ({}x{}). Enter a name to save it, or leave empty to skip:",
            face.width(),
            face.height()
        );
        let line = self.read_line().await?;
        let name = line.trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    async fn greet(&mut self, name: &str) {
        println!("Hello, {name}!");
    }

    async fn enrollment_failed(&mut self, error: &str) {
        println!("Could not save face: {error}");
    }

    async fn acknowledge_error(&mut self, message: &str) {
        println!("Recognition failed: {message}");
        println!("Press Enter to resume.");
        // EOF resumes as well; there is nobody left to wait for.
        let _ = self.read_line().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Read};
    use std::sync::mpsc as std_mpsc;
    use std::time::{Duration, Instant};

    /// Reader that blocks until its sender is dropped, then reports EOF.
    struct Blocked(std_mpsc::Receiver<()>);

    impl Read for Blocked {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_ask_name_trims_and_skips_empty() {
        let input = Cursor::new("  Ada \n\n");
        let mut operator = StdinOperator::from_reader(input).unwrap();
        let face = RgbImage::new(4, 4);
        assert_eq!(operator.ask_name(&face).await.as_deref(), Some("Ada"));
        assert_eq!(operator.ask_name(&face).await, None);
    }

    #[tokio::test]
    async fn test_eof_cancels_prompt() {
        let mut operator = StdinOperator::from_reader(Cursor::new("")).unwrap();
        assert_eq!(operator.ask_name(&RgbImage::new(4, 4)).await, None);
        operator.acknowledge_error("boom").await;
    }

    #[test]
    fn test_pending_prompt_does_not_block_shutdown() {
        let (hold, rx) = std_mpsc::channel::<()>();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let reader = BufReader::new(Blocked(rx));
            let mut operator = StdinOperator::from_reader(reader).unwrap();
            let face = RgbImage::new(4, 4);
            let asked =
                tokio::time::timeout(Duration::from_millis(50), operator.ask_name(&face)).await;
            assert!(asked.is_err());
        });

        let started = Instant::now();
        drop(runtime);
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(hold);
    }
}
