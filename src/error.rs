// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

//! Error kinds surfaced by the locker.
//!
//! Fatal kinds end the process with a single line on stderr. Per-screen kinds
//! (`GrabFailed`, `ColorFailed`) only skip that screen, and `AuthRejected` is
//! recovered inside the authentication loop.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("cannot open display: {0}")]
    NoDisplay(String),

    #[error("no passwd entry for you")]
    NoUser,

    #[error("not enough memory")]
    Alloc,

    #[error("unable to grab {device} for screen {screen}")]
    GrabFailed { screen: usize, device: &'static str },

    #[error("cannot allocate color '{name}' on screen {screen}")]
    ColorFailed { screen: usize, name: String },

    #[error("PAM not available: {0}")]
    AuthUnavailable(String),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("cannot disable the out-of-memory killer for this process: {0}")]
    OomProtectFailed(#[source] nix::Error),

    #[error("fork {command} failed: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: nix::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
}
