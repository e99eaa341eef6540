//! Camera capture
//!
//! The camera driver itself is an external program (by default
//! `libcamera-vid`) writing MJPEG to stdout, or whatever is piped into our
//! own stdin. A dedicated reader thread splits that byte stream into whole
//! JPEG images and appends each one to the shared [`FrameBuffer`].
//!
//! Because every append starts with a complete image, the frame buffer's
//! start-marker detection never sees a marker split across chunks. A frame
//! is published when the next image begins, so viewers run one frame behind
//! the camera.
//!
//! [`FrameBuffer`]: crate::video::FrameBuffer

pub mod splitter;

pub use splitter::JpegSplitter;

use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::AppConfig;
use crate::constants::CAPTURE_READ_SIZE;
use crate::error::CaptureError;
use crate::video::SharedFrameBuffer;

/// Where MJPEG bytes come from
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// Spawn a program and read its stdout
    Command { program: String, args: Vec<String> },
    /// Read our own stdin
    Stdin,
}

impl CaptureSource {
    pub fn from_config(config: &AppConfig) -> Self {
        if config.capture.stdin {
            Self::Stdin
        } else {
            Self::Command {
                program: config.capture.program.clone(),
                args: config.capture.command_args(&config.camera),
            }
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Command { program, .. } => program.clone(),
            Self::Stdin => "stdin".to_string(),
        }
    }
}

/// A running capture: source process (if any) plus its reader thread
pub struct CaptureDevice {
    name: String,

    /// Whether capture is running
    running: Arc<AtomicBool>,

    /// Spawned camera process
    child: Option<Child>,

    /// Reader thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Fatal errors reported by the reader thread
    error_rx: Receiver<CaptureError>,

    /// Images handed to the frame buffer
    images_captured: Arc<AtomicU64>,
}

impl CaptureDevice {
    /// Start capturing from `source` into `buffer`
    pub fn start(
        source: CaptureSource,
        buffer: SharedFrameBuffer,
        max_image_bytes: usize,
    ) -> Result<Self, CaptureError> {
        match source {
            CaptureSource::Command { program, args } => {
                tracing::info!("Starting capture: {} {}", program, args.join(" "));
                let mut child = Command::new(&program)
                    .args(&args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .spawn()
                    .map_err(|e| CaptureError::SpawnFailed {
                        program: program.clone(),
                        reason: e.to_string(),
                    })?;

                let Some(stdout) = child.stdout.take() else {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(CaptureError::NoOutput);
                };

                let mut device = match Self::from_reader(program, stdout, buffer, max_image_bytes) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(e);
                    }
                };
                device.child = Some(child);
                Ok(device)
            }
            CaptureSource::Stdin => {
                tracing::info!("Starting capture from stdin");
                let mut device =
                    Self::from_reader("stdin".to_string(), std::io::stdin(), buffer, max_image_bytes)?;
                // A thread blocked on stdin cannot be woken; never join it
                device.thread_handle = None;
                Ok(device)
            }
        }
    }

    /// Capture from any byte source
    pub fn from_reader<R>(
        name: String,
        reader: R,
        buffer: SharedFrameBuffer,
        max_image_bytes: usize,
    ) -> Result<Self, CaptureError>
    where
        R: Read + Send + 'static,
    {
        let (error_tx, error_rx) = bounded::<CaptureError>(4);
        let running = Arc::new(AtomicBool::new(true));
        let images_captured = Arc::new(AtomicU64::new(0));

        let pump = Pump {
            running: running.clone(),
            images_captured: images_captured.clone(),
            buffer,
            error_tx,
            splitter: JpegSplitter::with_max_image_bytes(max_image_bytes),
        };

        let handle = thread::Builder::new()
            .name(format!("capture-{}", name))
            .spawn(move || pump.run(reader))
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        Ok(Self {
            name,
            running,
            child: None,
            thread_handle: Some(handle),
            error_rx,
            images_captured,
        })
    }

    /// Stop capturing: kill the source process and join the reader
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        tracing::info!(
            "Capture '{}' stopped after {} images",
            self.name,
            self.images_captured()
        );
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total images handed to the frame buffer
    pub fn images_captured(&self) -> u64 {
        self.images_captured.load(Ordering::Relaxed)
    }

    /// Check for errors
    pub fn check_errors(&self) -> Option<CaptureError> {
        self.error_rx.try_recv().ok()
    }

    /// Channel that yields the first fatal capture error
    pub fn errors(&self) -> Receiver<CaptureError> {
        self.error_rx.clone()
    }
}

impl Drop for CaptureDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reader thread state
struct Pump {
    running: Arc<AtomicBool>,
    images_captured: Arc<AtomicU64>,
    buffer: SharedFrameBuffer,
    error_tx: Sender<CaptureError>,
    splitter: JpegSplitter,
}

impl Pump {
    fn run<R: Read>(mut self, mut reader: R) {
        let mut chunk = vec![0u8; CAPTURE_READ_SIZE];

        while self.running.load(Ordering::Relaxed) {
            match reader.read(&mut chunk) {
                Ok(0) => {
                    self.fail(CaptureError::StreamEnded);
                    break;
                }
                Ok(n) => {
                    self.splitter.extend(&chunk[..n]);
                    while let Some(image) = self.splitter.next_image() {
                        self.buffer.append(&image);
                        self.images_captured.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.fail(CaptureError::Read(e.to_string()));
                    break;
                }
            }
        }
    }

    /// Report a failure unless we are shutting down on purpose
    fn fail(&self, error: CaptureError) {
        if self.running.load(Ordering::SeqCst) {
            tracing::error!("Capture failed: {}", error);
            let _ = self.error_tx.try_send(error);
        }
    }
}
