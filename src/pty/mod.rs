// src/pty/mod.rs
// Process-under-pseudo-terminal hosting (spec §4.3), generalized from
// the teacher's `terminal::session::TerminalSession::start_shell` (which
// spawns an interactive shell) to "spawn an arbitrary agent CLI argv".
// The blocking-task-per-PTY-fd shape, the bridging to async mpsc
// channels, and the EOF-means-closed convention are all carried over
// unchanged; only the argv/env/signal surface is new.

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum PtyEvent {
    Output(Vec<u8>),
    Closed { exit_code: Option<i32> },
    Error(String),
}

#[derive(Debug, Clone, Copy)]
pub struct PtyDims {
    pub cols: u16,
    pub rows: u16,
}

impl Default for PtyDims {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

pub struct PtyHandle {
    pub input_tx: mpsc::Sender<Vec<u8>>,
    pub output_rx: mpsc::Receiver<PtyEvent>,
    master: Box<dyn portable_pty::MasterPty + Send>,
    pid: Option<u32>,
}

impl PtyHandle {
    /// Non-blocking write; a full channel is reported as backpressure
    /// rather than panicking or blocking the caller (spec §4.3).
    pub fn write_stdin(&self, bytes: Vec<u8>) -> Result<(), crate::error::AppError> {
        self.input_tx
            .try_send(bytes)
            .map_err(|_| crate::error::AppError::IOError("stdin channel backpressure".into()))
    }

    pub fn resize(&self, dims: PtyDims) -> Result<(), crate::error::AppError> {
        self.master
            .resize(PtySize {
                rows: dims.rows,
                cols: dims.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| crate::error::AppError::IOError(e.to_string()))
    }

    /// Send a signal to the child. SIGINT is used for turn cancellation,
    /// SIGTERM for a graceful end (spec §4.3, §4.5). The teacher's
    /// terminal layer never needed this because its shells are
    /// interactively Ctrl-C'd by the user; agent CLIs need
    /// server-initiated signals for cancellation.
    #[cfg(unix)]
    pub fn kill(&self, signal: i32) -> Result<(), crate::error::AppError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
        if rc != 0 && std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH) {
            return Err(crate::error::AppError::IOError(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(())
    }
}

pub struct PtyHost;

impl PtyHost {
    /// Spawn `argv[0]` with the remaining args under a fresh PTY, in
    /// `cwd`, with `env` merged over the server's own environment.
    pub fn spawn(
        argv: &[String],
        env: &[(String, String)],
        cwd: &str,
        dims: PtyDims,
    ) -> Result<PtyHandle, crate::error::AppError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: dims.rows,
                cols: dims.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| crate::error::AppError::IOError(e.to_string()))?;

        let Some((program, rest)) = argv.split_first() else {
            return Err(crate::error::AppError::IOError("empty argv".into()));
        };
        let mut cmd = CommandBuilder::new(program);
        cmd.args(rest);
        cmd.cwd(cwd);
        for (k, v) in env {
            cmd.env(k, v);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| crate::error::AppError::ChildFailed(e.to_string()))?;
        let pid = child.process_id();
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| crate::error::AppError::IOError(e.to_string()))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| crate::error::AppError::IOError(e.to_string()))?;

        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(256);
        let (output_tx, output_rx) = mpsc::channel::<PtyEvent>(256);

        tokio::task::spawn_blocking(move || {
            while let Some(bytes) = input_rx.blocking_recv() {
                if std::io::Write::write_all(&mut writer, &bytes).is_err() {
                    break;
                }
                let _ = std::io::Write::flush(&mut writer);
            }
        });

        let reader_tx = output_tx.clone();
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            loop {
                match std::io::Read::read(&mut reader, &mut buf) {
                    Ok(0) => {
                        let _ = reader_tx.blocking_send(PtyEvent::Closed { exit_code: None });
                        break;
                    }
                    Ok(n) => {
                        if reader_tx
                            .blocking_send(PtyEvent::Output(buf[..n].to_vec()))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = reader_tx.blocking_send(PtyEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
        });

        let wait_tx = output_tx;
        tokio::task::spawn_blocking(move || {
            let status = child.wait();
            let exit_code = status.ok().map(|s| if s.success() { 0 } else { 1 });
            let _ = wait_tx.blocking_send(PtyEvent::Closed { exit_code });
        });

        Ok(PtyHandle {
            input_tx,
            output_rx,
            master: pair.master,
            pid,
        })
    }
}
