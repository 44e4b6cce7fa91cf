// src/output/pipe.rs
//
// Newline-framed text stream: one "12.34\n" line per reading. Written to
// stdout ("-") or a named FIFO, created on demand. A reader that goes away
// ends publishing; measurement carries on.

use super::{format_speed, SpeedSink};
use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

const READER_POLL: Duration = Duration::from_millis(100);

pub struct PipeSink {
    writer: Option<Box<dyn Write + Send>>,
    target: String,
}

impl PipeSink {
    /// Open stdout ("-") or a FIFO. Waiting for a FIFO reader gives up once
    /// `stop` is raised.
    pub fn open(path: &str, stop: &AtomicBool) -> Result<Self> {
        if path == "-" {
            return Ok(Self::from_writer(Box::new(io::stdout()), "stdout"));
        }

        #[cfg(unix)]
        let file = {
            if !Path::new(path).exists() {
                make_fifo(path)?;
            }
            open_for_reader(path, stop)?
        };

        #[cfg(not(unix))]
        let file = {
            let _ = stop;
            std::fs::OpenOptions::new()
                .write(true)
                .open(path)
                .with_context(|| format!("Failed to open pipe {}", path))?
        };

        Ok(Self::from_writer(Box::new(file), path))
    }

    pub fn from_writer(writer: Box<dyn Write + Send>, target: &str) -> Self {
        Self {
            writer: Some(writer),
            target: target.to_string(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }
}

#[cfg(unix)]
fn make_fifo(path: &str) -> Result<()> {
    let c_path = std::ffi::CString::new(path).context("pipe path contains NUL")?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) };
    if rc != 0 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("mkfifo {} failed", path));
    }
    info!("Created FIFO {}", path);
    Ok(())
}

/// Non-blocking write opens of a FIFO fail with ENXIO until a reader is
/// attached; poll so the wait can be abandoned.
#[cfg(unix)]
fn open_for_reader(path: &str, stop: &AtomicBool) -> Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let mut announced = false;
    loop {
        if stop.load(Ordering::Relaxed) {
            anyhow::bail!("Stopped while waiting for a reader on {}", path);
        }

        match std::fs::OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
        {
            Ok(file) => {
                // Back to blocking writes
                // SAFETY: fd is owned by `file` and open for the whole call
                unsafe {
                    let fd = file.as_raw_fd();
                    let flags = libc::fcntl(fd, libc::F_GETFL);
                    if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) < 0 {
                        return Err(io::Error::last_os_error())
                            .with_context(|| format!("fcntl on {} failed", path));
                    }
                }
                info!("Reader attached to {}", path);
                return Ok(file);
            }
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                if !announced {
                    info!("Waiting for a reader on {}", path);
                    announced = true;
                }
                std::thread::sleep(READER_POLL);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open pipe {}", path));
            }
        }
    }
}

impl SpeedSink for PipeSink {
    fn publish(&mut self, speed_kmh: f64) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        let line = format_speed(speed_kmh);
        let result = writeln!(writer, "{}", line).and_then(|_| writer.flush());

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                info!("Reader on {} disconnected, speed output stopped", self.target);
                self.writer = None;
                Ok(())
            }
            Err(e) => {
                warn!("Write to {} failed: {}", self.target, e);
                Err(e).with_context(|| format!("Failed to write to {}", self.target))
            }
        }
    }

    fn name(&self) -> &'static str {
        "pipe"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_lines_are_two_decimal_text() {
        let buf = SharedBuf::default();
        let mut sink = PipeSink::from_writer(Box::new(buf.clone()), "test");

        sink.publish(7.2).unwrap();
        sink.publish(0.0).unwrap();
        sink.publish(12.345).unwrap();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "7.20\n0.00\n12.35\n");
    }

    #[cfg(unix)]
    fn fifo_in_temp(tag: &str) -> String {
        let path = std::env::temp_dir().join(format!("slitscan_fifo_{}_{}", tag, std::process::id()));
        let _ = std::fs::remove_file(&path);
        path.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_abandons_reader_wait() {
        let path = fifo_in_temp("stop");
        let stop = AtomicBool::new(true);

        let result = PipeSink::open(&path, &stop);
        assert!(result.is_err());
        // the FIFO itself was still created
        assert!(Path::new(&path).exists());

        let _ = std::fs::remove_file(&path);
    }

    #[cfg(unix)]
    #[test]
    fn test_fifo_delivers_lines_to_reader() {
        use std::io::Read;
        use std::os::unix::fs::OpenOptionsExt;

        let path = fifo_in_temp("lines");
        make_fifo(&path).unwrap();

        let mut reader = std::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .unwrap();

        let stop = AtomicBool::new(false);
        let mut sink = PipeSink::open(&path, &stop).unwrap();
        sink.publish(7.2).unwrap();
        drop(sink);

        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "7.20\n");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_disconnect_is_not_an_error() {
        let mut sink = PipeSink::from_writer(Box::new(ClosedPipe), "test");
        assert!(sink.publish(1.0).is_ok());
        assert!(!sink.is_connected());
        assert!(sink.publish(2.0).is_ok());
    }
}
