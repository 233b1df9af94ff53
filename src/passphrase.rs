// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

use std::ffi::CString;

use zeroize::{Zeroize, Zeroizing};

use crate::{
    keys::{KeyAction, classify},
    palette::PaletteIndex,
    server::KeyInput,
};

/// Size of the passphrase buffer handed to the authenticator, terminator
/// included.
pub const PASSPHRASE_CAPACITY: usize = 256;

/// Fixed-capacity passphrase, NUL-terminated at `len` and wiped on drop.
pub struct Passphrase {
    bytes: Box<[u8; PASSPHRASE_CAPACITY]>,
    len: usize,
}

impl Passphrase {
    pub fn new() -> Self {
        Self {
            bytes: Box::new([0u8; PASSPHRASE_CAPACITY]),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Appends `text` if it leaves room for the terminator.
    pub fn push(&mut self, text: &[u8]) -> bool {
        // len < PASSPHRASE_CAPACITY and text is a handful of bytes, so the sum
        // cannot wrap in usize
        if text.is_empty() || self.len + text.len() >= PASSPHRASE_CAPACITY {
            return false;
        }

        self.bytes[self.len..self.len + text.len()].copy_from_slice(text);
        self.len += text.len();
        self.bytes[self.len] = 0;

        true
    }

    /// Removes the last byte, if any.
    pub fn pop(&mut self) {
        if self.len > 0 {
            self.len -= 1;
            self.bytes[self.len] = 0;
        }
    }

    pub fn clear(&mut self) {
        self.bytes.zeroize();
        self.len = 0;
    }

    /// Copies the passphrase into the NUL-terminated form the authenticator
    /// takes ownership of.
    ///
    /// The returned `CString` is not wiped on drop, and PAM keeps a further
    /// `strdup`'d copy that it frees unwiped.
    pub fn to_cstring(&self) -> Option<CString> {
        let bytes = Zeroizing::new(self.as_bytes().to_vec());
        CString::new(bytes.as_slice()).ok()
    }

    #[cfg(test)]
    pub fn raw(&self) -> &[u8; PASSPHRASE_CAPACITY] {
        &self.bytes
    }
}

impl Default for Passphrase {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Passphrase {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Passphrase").field("len", &self.len).finish()
    }
}

/// What the reader should do after a keypress has been applied.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// The passphrase is complete.
    Submit,
    /// The buffer may have changed; repaint when the index is set.
    Continue(Option<PaletteIndex>),
}

/// The passphrase state machine driven by raw keypresses.
///
/// Tracks the length before each keypress so that only the empty/non-empty
/// transitions trigger a repaint.
#[derive(Debug, Default)]
pub struct PassphraseInput {
    buffer: Passphrase,
    last_len: usize,
}

impl PassphraseInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &Passphrase {
        &self.buffer
    }

    pub fn into_passphrase(self) -> Passphrase {
        self.buffer
    }

    pub fn handle_key(&mut self, key: &KeyInput) -> KeyOutcome {
        match classify(key.keysym) {
            KeyAction::Ignore => return KeyOutcome::Continue(None),
            KeyAction::Submit => return KeyOutcome::Submit,
            KeyAction::Clear => self.buffer.clear(),
            KeyAction::Erase => self.buffer.pop(),
            KeyAction::Text => {
                let text = key.text();
                if let Some(&lead) = text.first()
                    && !lead.is_ascii_control()
                {
                    self.buffer.push(text);
                }
            }
        }

        let len = self.buffer.len();
        let paint = match (self.last_len, len) {
            (0, l) if l != 0 => Some(PaletteIndex::Input),
            (l, 0) if l != 0 => Some(PaletteIndex::Empty),
            _ => None,
        };
        self.last_len = len;

        KeyOutcome::Continue(paint)
    }
}
