// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

use std::{thread, time::Duration};

use anyhow::Result;
use tracing::{debug, warn};

use crate::{
    config::XLockConfigGrab,
    server::{GrabStatus, Server},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GrabPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl GrabPolicy {
    pub fn new(config: &XLockConfigGrab) -> Self {
        Self {
            attempts: config.attempts.max(1),
            interval: Duration::from_millis(config.interval_ms),
        }
    }
}

impl Default for GrabPolicy {
    fn default() -> Self {
        Self {
            attempts: 6,
            interval: Duration::from_millis(100),
        }
    }
}

/// Which grabs ended up held after `acquire_grabs`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct GrabState {
    pub pointer: bool,
    pub keyboard: bool,
}

impl GrabState {
    pub fn complete(&self) -> bool {
        self.pointer && self.keyboard
    }
}

fn retryable(status: Option<GrabStatus>) -> bool {
    matches!(
        status,
        None | Some(GrabStatus::Success) | Some(GrabStatus::AlreadyGrabbed)
    )
}

/// Grabs pointer and keyboard on `root`, retrying while another client
/// transiently holds either one.
///
/// Progress is recorded in `state` as each grab is granted, so whatever is
/// held is known to the caller even when a request fails. A grab already held
/// is not requested again. Any reply other than `AlreadyGrabbed` ends the
/// attempt.
pub fn acquire_grabs<S: Server>(
    server: &mut S,
    root: S::Window,
    cursor: S::Cursor,
    policy: &GrabPolicy,
    state: &mut GrabState,
) -> Result<()> {
    for round in 0..policy.attempts {
        let mut pointer = None;
        let mut keyboard = None;

        if !state.pointer {
            let status = server.grab_pointer(root, cursor)?;
            state.pointer = status == GrabStatus::Success;
            pointer = Some(status);
        }
        if !state.keyboard {
            let status = server.grab_keyboard(root)?;
            state.keyboard = status == GrabStatus::Success;
            keyboard = Some(status);
        }

        if state.complete() {
            debug!("Grabbed input on {root:?} after {} round(s)", round + 1);
            return Ok(());
        }

        if !retryable(pointer) || !retryable(keyboard) {
            warn!("Grab on {root:?} refused: pointer {pointer:?}, keyboard {keyboard:?}");
            break;
        }

        if round + 1 < policy.attempts {
            thread::sleep(policy.interval);
        }
    }

    Ok(())
}
