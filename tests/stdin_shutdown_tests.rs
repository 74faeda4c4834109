// SPDX-License-Identifier: Apache-2.0

//! The agent binary must exit on SIGTERM while stdin is still open and idle.

#![cfg(unix)]

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

fn wait_for_exit(child: &mut Child) -> Option<std::process::ExitStatus> {
    let start = Instant::now();
    while start.elapsed() < WAIT_TIMEOUT {
        if let Some(status) = child.try_wait().unwrap() {
            return Some(status);
        }
        thread::sleep(Duration::from_millis(50));
    }
    None
}

#[test]
fn test_sigterm_exits_with_stdin_open() {
    let dir = TempDir::new().unwrap();
    let registry_file = dir.path().join("registry.json");

    let mut child = Command::new(env!("CARGO_BIN_EXE_logship"))
        .arg("start")
        .arg("--stdin")
        .args(["--idle-timeout", "100ms"])
        .arg("--registry-file")
        .arg(&registry_file)
        .env_remove("LOGSHIP_CONFIG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // Held open for the whole test so stdin never reaches its end
    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(b"hello from stdin\n").unwrap();
    stdin.flush().unwrap();

    let stdout = child.stdout.take().unwrap();
    let (found_tx, found_rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else { break };
            if line.contains("hello from stdin") {
                let _ = found_tx.send(());
            }
        }
    });

    if found_rx.recv_timeout(WAIT_TIMEOUT).is_err() {
        let _ = child.kill();
        panic!("line from stdin was never shipped");
    }

    let status = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let exit = wait_for_exit(&mut child);
    if exit.is_none() {
        let _ = child.kill();
    }
    drop(stdin);

    let exit = exit.expect("agent kept running after SIGTERM");
    assert!(exit.success(), "agent exited with {}", exit);
}
