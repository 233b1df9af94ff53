// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

use anyhow::Result;
use tracing::{debug, error};

use crate::{
    error::LockError,
    grab::{GrabPolicy, GrabState, acquire_grabs},
    palette::{ColorSpec, Palette, PaletteIndex},
    server::{ScreenGeometry, Server},
};

/// One locked screen: its window, invisible cursor and allocated palette.
///
/// Only produced by `lock_screen` once both grabs are held and the window is
/// mapped. Released through `unlock_screen`.
pub struct ScreenLock<S: Server> {
    pub screen: usize,
    pub root: S::Window,
    pub window: S::Window,
    bitmap: S::Pixmap,
    cursor: S::Cursor,
    pub palette: Palette,
}

impl<S: Server> std::fmt::Debug for ScreenLock<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenLock")
            .field("screen", &self.screen)
            .field("window", &self.window)
            .field("palette", &self.palette)
            .finish()
    }
}

/// Everything acquired so far while building a lock.
struct PartialLock<S: Server> {
    screen: usize,
    pixels: Vec<u32>,
    window: Option<S::Window>,
    bitmap: Option<S::Pixmap>,
    cursor: Option<S::Cursor>,
    grabs: GrabState,
}

impl<S: Server> PartialLock<S> {
    fn new(screen: usize) -> Self {
        Self {
            screen,
            pixels: Vec::with_capacity(PaletteIndex::ALL.len()),
            window: None,
            bitmap: None,
            cursor: None,
            grabs: GrabState::default(),
        }
    }

    /// Releases grabs, colors, cursor, bitmap and window, in that order.
    fn release(self, server: &mut S) {
        if self.grabs.pointer {
            server.ungrab_pointer();
        }
        if self.grabs.keyboard {
            server.ungrab_keyboard();
        }
        if !self.pixels.is_empty() {
            server.free_colors(self.screen, &self.pixels);
        }
        if let Some(cursor) = self.cursor {
            server.free_cursor(cursor);
        }
        if let Some(bitmap) = self.bitmap {
            server.free_pixmap(bitmap);
        }
        if let Some(window) = self.window {
            server.destroy_window(window);
        }
    }
}

impl<S: Server> From<ScreenLock<S>> for PartialLock<S> {
    fn from(lock: ScreenLock<S>) -> Self {
        Self {
            screen: lock.screen,
            pixels: lock.palette.0.to_vec(),
            window: Some(lock.window),
            bitmap: Some(lock.bitmap),
            cursor: Some(lock.cursor),
            grabs: GrabState {
                pointer: true,
                keyboard: true,
            },
        }
    }
}

fn build_lock<S: Server>(
    server: &mut S,
    geometry: &ScreenGeometry<S::Window>,
    colors: [&ColorSpec; 3],
    policy: &GrabPolicy,
    partial: &mut PartialLock<S>,
) -> Result<ScreenLock<S>> {
    let screen = partial.screen;

    let mut palette = Palette([0; 3]);
    for (index, color) in PaletteIndex::ALL.into_iter().zip(colors) {
        let pixel = server.alloc_color(screen, color).map_err(|e| {
            debug!("Color allocation failed: {e:#}");
            LockError::ColorFailed {
                screen,
                name: color.to_string(),
            }
        })?;
        partial.pixels.push(pixel);
        palette.0[index.as_usize()] = pixel;
    }

    let window = server.create_window(screen, palette[PaletteIndex::Init])?;
    partial.window = Some(window);

    let bitmap = server.create_blank_bitmap(window)?;
    partial.bitmap = Some(bitmap);

    let cursor = server.create_cursor(bitmap)?;
    partial.cursor = Some(cursor);
    server.define_cursor(window, cursor);

    acquire_grabs(server, geometry.root, cursor, policy, &mut partial.grabs)?;

    if !partial.grabs.pointer {
        return Err(LockError::GrabFailed {
            screen,
            device: "mouse pointer",
        }
        .into());
    }
    if !partial.grabs.keyboard {
        return Err(LockError::GrabFailed {
            screen,
            device: "keyboard",
        }
        .into());
    }

    server.map_raised(window);
    if server.has_screen_change() {
        server.select_screen_change(window);
    }
    server.select_substructure(geometry.root);

    Ok(ScreenLock {
        screen,
        root: geometry.root,
        window,
        bitmap,
        cursor,
        palette,
    })
}

/// Locks `screen`: allocates the palette, covers the screen with an
/// override-redirect window and grabs pointer and keyboard on its root.
///
/// Returns `None` when any step fails, after releasing whatever had been
/// acquired.
pub fn lock_screen<S: Server>(
    server: &mut S,
    screen: usize,
    colors: [&ColorSpec; 3],
    policy: &GrabPolicy,
) -> Option<ScreenLock<S>> {
    let geometry = server.screen(screen)?;
    let mut partial = PartialLock::new(screen);

    match build_lock(server, &geometry, colors, policy, &mut partial) {
        Ok(lock) => {
            debug!(
                "Locked screen {screen} ({}x{}) with {:?}",
                geometry.width, geometry.height, lock.window
            );
            Some(lock)
        }
        Err(e) => {
            error!("{e:#}");
            partial.release(server);
            None
        }
    }
}

/// Releases every resource held by `lock`. Does nothing for `None`.
pub fn unlock_screen<S: Server>(server: &mut S, lock: Option<ScreenLock<S>>) {
    let Some(lock) = lock else {
        return;
    };

    debug!("Unlocking screen {}", lock.screen);
    PartialLock::from(lock).release(server);
}
