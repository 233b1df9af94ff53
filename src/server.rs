// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

//! The window-server operations the lock engine relies on.
//!
//! `x11::XcbServer` implements this over a live X connection. Keeping the
//! engine generic over it lets the grab, reader and feedback logic run
//! against a scripted server in tests.

use std::{fmt::Debug, os::fd::RawFd};

use anyhow::Result;
use zeroize::Zeroize;

use crate::palette::ColorSpec;

/// Longest text a single keypress may translate to.
pub const KEY_TEXT_MAX: usize = 32;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScreenGeometry<W> {
    pub root: W,
    pub width: u16,
    pub height: u16,
}

/// Outcome of a pointer or keyboard grab request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GrabStatus {
    Success,
    AlreadyGrabbed,
    InvalidTime,
    NotViewable,
    Frozen,
}

/// A translated keypress: the keysym plus whatever text it produced.
pub struct KeyInput {
    pub keysym: u32,
    text: [u8; KEY_TEXT_MAX],
    len: usize,
}

impl KeyInput {
    /// Text beyond `KEY_TEXT_MAX` bytes is dropped.
    pub fn new(keysym: u32, text: &[u8]) -> Self {
        let len = text.len().min(KEY_TEXT_MAX);
        let mut buf = [0u8; KEY_TEXT_MAX];
        buf[..len].copy_from_slice(&text[..len]);

        Self {
            keysym,
            text: buf,
            len,
        }
    }

    pub fn text(&self) -> &[u8] {
        &self.text[..self.len]
    }
}

impl Drop for KeyInput {
    fn drop(&mut self) {
        self.text.zeroize();
    }
}

impl Debug for KeyInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyInput")
            .field("keysym", &format_args!("{:#x}", self.keysym))
            .field("len", &self.len)
            .finish()
    }
}

#[derive(Debug)]
pub enum ServerEvent<W> {
    KeyPress(KeyInput),
    ScreenChange { window: W, width: u16, height: u16 },
    Other,
}

pub trait Server {
    type Window: Copy + Eq + Debug;
    type Pixmap: Copy + Debug;
    type Cursor: Copy + Debug;

    fn screen_count(&self) -> usize;
    fn screen(&self, screen: usize) -> Option<ScreenGeometry<Self::Window>>;

    /// Whether the screen-resize notification extension is present.
    fn has_screen_change(&self) -> bool;

    fn alloc_color(&mut self, screen: usize, color: &ColorSpec) -> Result<u32>;
    fn free_colors(&mut self, screen: usize, pixels: &[u32]);

    /// Creates an unmapped override-redirect window covering the screen.
    fn create_window(&mut self, screen: usize, background: u32) -> Result<Self::Window>;
    fn destroy_window(&mut self, window: Self::Window);

    /// Creates an 8x8 depth-1 pixmap with every bit cleared.
    fn create_blank_bitmap(&mut self, window: Self::Window) -> Result<Self::Pixmap>;
    fn free_pixmap(&mut self, pixmap: Self::Pixmap);

    /// Creates a cursor whose source and mask are both `bitmap`.
    fn create_cursor(&mut self, bitmap: Self::Pixmap) -> Result<Self::Cursor>;
    fn free_cursor(&mut self, cursor: Self::Cursor);
    fn define_cursor(&mut self, window: Self::Window, cursor: Self::Cursor);

    fn grab_pointer(&mut self, root: Self::Window, cursor: Self::Cursor) -> Result<GrabStatus>;
    fn grab_keyboard(&mut self, root: Self::Window) -> Result<GrabStatus>;
    fn ungrab_pointer(&mut self);
    fn ungrab_keyboard(&mut self);

    fn map_raised(&mut self, window: Self::Window);
    fn raise_window(&mut self, window: Self::Window);
    fn resize_window(&mut self, window: Self::Window, width: u16, height: u16);
    fn set_background(&mut self, window: Self::Window, pixel: u32);
    fn clear_window(&mut self, window: Self::Window);

    fn select_screen_change(&mut self, window: Self::Window);
    fn select_substructure(&mut self, root: Self::Window);

    fn bell(&mut self, percent: i8);

    /// Blocks until the server delivers the next event.
    fn next_event(&mut self) -> Result<ServerEvent<Self::Window>>;

    /// Drops every event already queued without blocking.
    fn discard_pending_events(&mut self) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
    fn sync(&mut self) -> Result<()>;

    /// File descriptor of the server connection, closed by spawned children.
    fn connection_fd(&self) -> RawFd;
}
