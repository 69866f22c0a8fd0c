use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{mpsc::Sender, Arc, Mutex},
};

pub enum LogMessage {
    Info(String),
    Error(String),
    Warn(String),
    Success(String),
    CustomError(String),
    Done,
}

struct LogFile {
    path: PathBuf,
    file: File,
}

pub struct LogManager {
    sender: Sender<LogMessage>,
}

impl LogManager {
    pub fn new(sender: Sender<LogMessage>) -> Self {
        Self { sender }
    }

    /// Creates a logger for a single task. When `log_path` is set, every
    /// message is mirrored (uncolored) into that file.
    pub fn create_logger(&self, log_path: Option<PathBuf>) -> TaskLogger {
        let log_file = log_path.and_then(|path| {
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .ok()
                .map(|file| LogFile { path, file })
        });

        TaskLogger {
            sender: self.sender.clone(),
            log_file: Arc::new(Mutex::new(log_file)),
        }
    }

    pub fn done(&self) {
        let _ = self.sender.send(LogMessage::Done);
    }
}

#[derive(Clone)]
pub struct TaskLogger {
    sender: Sender<LogMessage>,
    log_file: Arc<Mutex<Option<LogFile>>>,
}

impl TaskLogger {
    pub fn info(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        self.write_to_file(msg);
        let _ = self.sender.send(LogMessage::Info(msg.to_string()));
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        self.write_to_file(format!("WARN: {}", msg));
        let _ = self.sender.send(LogMessage::Warn(msg.to_string()));
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        self.write_to_file(format!("ERROR: {}", msg));
        let _ = self.sender.send(LogMessage::Error(msg.to_string()));
    }

    pub fn success(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        self.write_to_file(msg);
        let _ = self.sender.send(LogMessage::Success(msg.to_string()));
    }

    pub fn custom_error(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        self.write_to_file(msg);
        let _ = self.sender.send(LogMessage::CustomError(msg.to_string()));
    }

    pub fn write_to_file(&self, msg: impl AsRef<str>) {
        if let Ok(mut guard) = self.log_file.lock() {
            if let Some(log) = guard.as_mut() {
                let _ = writeln!(log.file, "{}", strip_ansi(msg.as_ref()));
            }
        }
    }

    /// Moves the backing log file, keeping what was written so far.
    pub fn move_log_file<P: AsRef<Path>>(&self, new_path: P) -> io::Result<()> {
        let new_path = new_path.as_ref();
        let mut guard = self
            .log_file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))?;

        let Some(log) = guard.take() else {
            return Ok(());
        };

        if let Some(parent) = new_path.parent() {
            fs::create_dir_all(parent)?;
        }
        drop(log.file);
        if fs::rename(&log.path, new_path).is_err() {
            fs::copy(&log.path, new_path)?;
            let _ = fs::remove_file(&log.path);
        }

        let file = OpenOptions::new().append(true).open(new_path)?;
        *guard = Some(LogFile {
            path: new_path.to_path_buf(),
            file,
        });
        Ok(())
    }
}

fn strip_ansi(msg: &str) -> String {
    let mut out = String::with_capacity(msg.len());
    let mut chars = msg.chars();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn test_messages_reach_channel() {
        let (tx, rx) = mpsc::channel();
        let manager = LogManager::new(tx);
        let logger = manager.create_logger(None);

        logger.info("hello");
        logger.error(String::from("boom"));
        manager.done();

        assert!(matches!(rx.recv().unwrap(), LogMessage::Info(m) if m == "hello"));
        assert!(matches!(rx.recv().unwrap(), LogMessage::Error(m) if m == "boom"));
        assert!(matches!(rx.recv().unwrap(), LogMessage::Done));
    }

    #[test]
    fn test_file_mirror_and_move() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.log");
        let second = dir.path().join("logs/second.log");

        let (tx, _rx) = mpsc::channel();
        let logger = LogManager::new(tx).create_logger(Some(first.clone()));
        logger.info("\u{1b}[31mred\u{1b}[0m line");
        logger.move_log_file(&second).unwrap();
        logger.warn("after move");

        assert!(!first.exists());
        let content = fs::read_to_string(second).unwrap();
        assert_eq!(content, "red line\nWARN: after move\n");
    }
}
