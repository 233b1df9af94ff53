// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

use std::{
    ffi::{CStr, CString},
    time::Duration,
};

use anyhow::Result;
use pam_client::{ConversationHandler, ErrorCode, Flag};
use tracing::{debug, info, warn};

use crate::{config::XLockConfig, error::LockError, passphrase::Passphrase};

/// What the authenticator needs from the locked display.
pub trait Conversation {
    /// Reads one passphrase from the keyboard.
    fn read_secret(&mut self) -> Result<Passphrase>;

    /// Signals a failed attempt to the user.
    fn reject(&mut self) -> Result<()>;

    /// Waits out a lockout, dropping whatever was typed meanwhile.
    fn pause(&mut self, duration: Duration) -> Result<()>;
}

pub enum Verdict {
    Accepted,
    Rejected(LockError),
}

pub trait Authenticator {
    type Conv: Conversation;

    /// Runs one authentication attempt. `Err` is reserved for failures that
    /// make retrying pointless.
    fn authenticate(&mut self) -> Result<Verdict>;

    fn conversation_mut(&mut self) -> &mut Self::Conv;
}

pub struct AuthConfig {
    pub service: String,
    pub allow_empty: bool,
    pub retry: RetryPolicy,
}

impl AuthConfig {
    pub fn new(config: &XLockConfig) -> Self {
        Self {
            service: config.auth.service.clone(),
            allow_empty: config.auth.allow_empty,
            retry: RetryPolicy {
                max_attempts: config.auth.max_attempts,
                lockout: Duration::from_secs(config.auth.lockout_secs),
            },
        }
    }
}

/// Bound on consecutive rejections. Reaching it pauses input; it never
/// releases the lock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Zero means unlimited.
    pub max_attempts: u32,
    pub lockout: Duration,
}

/// Bridges PAM prompts to a `Conversation`.
pub struct PamConversation<C> {
    inner: C,
    failure: Option<anyhow::Error>,
}

impl<C: Conversation> PamConversation<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            failure: None,
        }
    }

    pub fn take_failure(&mut self) -> Option<anyhow::Error> {
        self.failure.take()
    }
}

impl<C: Conversation> ConversationHandler for PamConversation<C> {
    fn prompt_echo_on(&mut self, prompt: &CStr) -> Result<CString, ErrorCode> {
        debug!("Answering visible prompt {prompt:?} with an empty response");
        Ok(CString::default())
    }

    fn prompt_echo_off(&mut self, prompt: &CStr) -> Result<CString, ErrorCode> {
        debug!("Secret prompt {prompt:?}");

        match self.inner.read_secret() {
            Ok(passphrase) => passphrase.to_cstring().ok_or(ErrorCode::CONV_ERR),
            Err(e) => {
                self.failure = Some(e);
                Err(ErrorCode::CONV_ERR)
            }
        }
    }

    fn text_info(&mut self, msg: &CStr) {
        debug!("PAM: {}", msg.to_string_lossy());
    }

    fn error_msg(&mut self, msg: &CStr) {
        warn!("PAM: {}", msg.to_string_lossy());
    }
}

pub struct PamAuthenticator<C: Conversation> {
    context: pam_client::Context<PamConversation<C>>,
    flags: Flag,
}

impl<C: Conversation> PamAuthenticator<C> {
    pub fn new(config: &AuthConfig, username: &str, conversation: C) -> Result<Self> {
        let context = pam_client::Context::new(
            &config.service,
            Some(username),
            PamConversation::new(conversation),
        )
        .map_err(|e| LockError::AuthUnavailable(e.to_string()))?;

        let mut flags = Flag::NONE;
        if !config.allow_empty {
            flags = Flag::DISALLOW_NULL_AUTHTOK;
        }

        debug!("Started PAM service '{}' for '{username}'", config.service);

        Ok(Self { context, flags })
    }
}

impl<C: Conversation> Authenticator for PamAuthenticator<C> {
    type Conv = C;

    fn authenticate(&mut self) -> Result<Verdict> {
        match self.context.authenticate(self.flags) {
            Ok(()) => Ok(Verdict::Accepted),
            Err(e) => match self.context.conversation_mut().take_failure() {
                Some(failure) => Err(failure),
                None => Ok(Verdict::Rejected(LockError::AuthRejected(e.to_string()))),
            },
        }
    }

    fn conversation_mut(&mut self) -> &mut C {
        &mut self.context.conversation_mut().inner
    }
}

/// Authenticates until the user gets it right.
///
/// Each rejection repaints the screens and rings the bell. With a retry cap
/// set, every `max_attempts` consecutive rejections are followed by the
/// lockout pause.
pub fn run_auth_loop<A: Authenticator>(auth: &mut A, retry: &RetryPolicy) -> Result<()> {
    let mut failures = 0u32;

    loop {
        match auth.authenticate()? {
            Verdict::Accepted => {
                info!("Authentication succeeded");
                return Ok(());
            }
            Verdict::Rejected(e) => {
                debug!("{e}");
                auth.conversation_mut().reject()?;

                failures = failures.saturating_add(1);
                if retry.max_attempts != 0 && failures >= retry.max_attempts {
                    warn!(
                        "{failures} failed attempt(s), pausing input for {:?}",
                        retry.lockout
                    );
                    auth.conversation_mut().pause(retry.lockout)?;
                    failures = 0;
                }
            }
        }
    }
}
