//! Shared helpers for integration tests

#![allow(dead_code)]

pub mod ftps_server;
pub mod memory;

use std::path::Path;

use wavpull_common::ServerConfig;

/// Capture name used throughout the scenarios
pub const CAPTURE: &str = "7_2024-03-05_10_30_00.wav";

/// `CAPTURE` renamed with prefix `STUDIO`
pub const CAPTURE_NORMALIZED: &str = "STUDIO_7-05_03_2024-10_30_00.wav";

/// Server entry pointing at `local_dir` with prefix `STUDIO`
pub fn server(host: &str, local_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: host.to_string(),
        port: 21,
        username: "capture".to_string(),
        password: "secret".to_string(),
        remote_dir: "/records".to_string(),
        local_dir: Some(local_dir.display().to_string()),
        z_prefix: "STUDIO".to_string(),
    }
}

/// Fake audio of the given length
pub fn audio(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Sorted names of the entries in a directory
pub fn dir_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
