//! Worker process supervision.
//!
//! `worker start` spawns detached `jobctl worker run` children and records
//! their PIDs in `.workers.pid`; `worker stop` signals every recorded PID
//! with SIGTERM so each worker finishes its in-flight job and exits. The
//! PID file is owned by the supervisor, never by the core.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};

const PID_FILE: &str = ".workers.pid";

/// Spawn `count` worker processes against `db`, appending their PIDs to
/// the PID file. Returns the new PIDs.
pub fn start_workers(db: &Path, count: usize) -> Result<Vec<u32>> {
    let exe = std::env::current_exe().context("cannot locate the jobctl binary")?;
    let mut pids = Vec::with_capacity(count);

    for _ in 0..count {
        let child = Command::new(&exe)
            .arg("--db")
            .arg(db)
            .arg("worker")
            .arg("run")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to spawn worker process")?;
        tracing::info!(pid = child.id(), "worker started");
        pids.push(child.id());
    }

    let mut recorded = fs::read_to_string(PID_FILE).unwrap_or_default();
    for pid in &pids {
        recorded.push_str(&format!("{pid}\n"));
    }
    fs::write(PID_FILE, recorded).context("failed to write .workers.pid")?;

    Ok(pids)
}

/// SIGTERM every recorded worker and remove the PID file.
///
/// Workers handle the signal themselves: each finishes its current job
/// before exiting, so this never interrupts a running command.
#[cfg(unix)]
pub fn stop_workers() -> Result<usize> {
    let recorded = match fs::read_to_string(PID_FILE) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            bail!("no {PID_FILE} file; are any workers running?")
        }
        Err(e) => return Err(e).context("failed to read .workers.pid"),
    };

    let mut stopped = 0;
    for line in recorded.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let pid: i32 = line
            .parse()
            .with_context(|| format!("bad pid in {PID_FILE}: '{line}'"))?;
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc == 0 {
            tracing::info!(pid, "sent SIGTERM");
            stopped += 1;
        } else {
            tracing::warn!(pid, "worker already gone");
        }
    }

    fs::remove_file(PID_FILE).context("failed to remove .workers.pid")?;
    Ok(stopped)
}

#[cfg(not(unix))]
pub fn stop_workers() -> Result<usize> {
    bail!("worker stop is only supported on unix; terminate worker processes manually")
}
