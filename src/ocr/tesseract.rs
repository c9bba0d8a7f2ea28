//! Local OCR through the `tesseract` command-line tool, bounded by a wall-clock timeout.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{ImageInput, OcrEngine, OcrError};

/// Time a single recognition may take before the process is killed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Local OCR through the `tesseract` command-line tool.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: String,
    timeout: Duration,
}

impl TesseractEngine {
    /// Use the executable at `binary` (a path or a name resolved through `PATH`).
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Kill the process when recognition takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, image: &ImageInput) -> Result<String, OcrError> {
        let mut command = Command::new(&self.binary);
        let stdin_bytes = match image {
            ImageInput::Path(path) => {
                command.arg(path);
                None
            }
            ImageInput::Bytes(bytes) => {
                command.arg("stdin");
                Some(bytes.clone())
            }
            ImageInput::Base64(_) => {
                return Err(OcrError::InvalidInput(
                    "tesseract accepts a file path or image bytes, not base64".into(),
                ));
            }
        };
        command
            .arg("stdout")
            .stdin(if stdin_bytes.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|error| {
            OcrError::Engine(format!("failed to start '{}': {error}", self.binary))
        })?;

        // Pipes are drained on helper threads so a chatty or stalled child cannot block the
        // deadline check.
        if let (Some(bytes), Some(mut stdin)) = (stdin_bytes, child.stdin.take()) {
            thread::spawn(move || {
                if let Err(error) = stdin.write_all(&bytes) {
                    tracing::debug!(error = %error, "tesseract closed stdin early");
                }
            });
        }
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait_with_deadline(&mut child)?;
        let stdout = stdout.join().unwrap_or_default();
        if !status.success() {
            let stderr = stderr.join().unwrap_or_default();
            return Err(OcrError::Engine(format!(
                "tesseract exited with {status}: {}",
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    fn wait_with_deadline(&self, child: &mut Child) -> Result<std::process::ExitStatus, OcrError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    if let Err(error) = child.kill() {
                        tracing::warn!(error = %error, "Failed to kill tesseract");
                    }
                    let _ = child.wait();
                    return Err(OcrError::Engine(format!(
                        "tesseract timed out after {:.1}s",
                        self.timeout.as_secs_f64()
                    )));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(error) => return Err(OcrError::Engine(error.to_string())),
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        buffer
    })
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn supports_async(&self) -> bool {
        false
    }

    fn extract_text(&self, image: &ImageInput, _anchor: bool) -> Result<String, OcrError> {
        self.run(image).inspect_err(|error| {
            tracing::error!(engine = "tesseract", input = %image.describe(), error = %error, "Error extracting text from image");
        })
    }

    async fn extract_text_async(
        &self,
        _image: &ImageInput,
        _anchor: bool,
    ) -> Result<String, OcrError> {
        Err(OcrError::Unsupported(
            "async extraction is not implemented for Tesseract",
        ))
    }
}
