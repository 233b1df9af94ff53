// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

use std::os::fd::{AsRawFd, RawFd};

use anyhow::{Result, anyhow, bail};
use tracing::{debug, trace, warn};
use xcb::{Xid, randr, x};
use xkbcommon::xkb;
use zeroize::Zeroizing;

use crate::{
    error::LockError,
    palette::ColorSpec,
    server::{GrabStatus, KeyInput, ScreenGeometry, Server, ServerEvent},
};

const CURSOR_SIZE: u16 = 8;

struct ScreenInfo {
    root: x::Window,
    width: u16,
    height: u16,
    colormap: x::Colormap,
    depth: u8,
    visual: x::Visualid,
}

/// libxkbcommon reports a failed device load as a null object.
fn loaded<T>(ptr: *mut T, what: &str, device_id: i32) -> Result<()> {
    if ptr.is_null() {
        bail!("Failed to load {what} for keyboard device {device_id}");
    }
    Ok(())
}

/// Keyboard state tracked from the server's core keyboard map.
struct Keyboard {
    state: xkb::State,
}

impl Keyboard {
    fn new(conn: &xcb::Connection) -> Result<Self> {
        let reply = conn.wait_for_reply(conn.send_request(&xcb::xkb::UseExtension {
            wanted_major: xkb::x11::MIN_MAJOR_XKB_VERSION,
            wanted_minor: xkb::x11::MIN_MINOR_XKB_VERSION,
        }))?;
        if !reply.supported() {
            bail!(
                "X server does not support XKB {}.{}",
                xkb::x11::MIN_MAJOR_XKB_VERSION,
                xkb::x11::MIN_MINOR_XKB_VERSION
            );
        }

        let device_id = xkb::x11::get_core_keyboard_device_id(conn);
        if device_id < 0 {
            bail!("No core keyboard device");
        }

        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
        let keymap =
            xkb::x11::keymap_new_from_device(&context, conn, device_id, xkb::KEYMAP_COMPILE_NO_FLAGS);
        loaded(keymap.get_raw_ptr(), "keymap", device_id)?;

        let state = xkb::x11::state_new_from_device(&keymap, conn, device_id);
        loaded(state.get_raw_ptr(), "keyboard state", device_id)?;

        debug!("Using core keyboard device {device_id}");

        Ok(Self { state })
    }

    fn press(&mut self, code: x::Keycode) -> KeyInput {
        let keycode = xkb::Keycode::from(code);
        let keysym = self.state.key_get_one_sym(keycode).raw();
        let text = Zeroizing::new(self.state.key_get_utf8(keycode));
        self.state.update_key(keycode, xkb::KeyDirection::Down);

        KeyInput::new(keysym, text.as_bytes())
    }

    fn release(&mut self, code: x::Keycode) {
        self.state
            .update_key(xkb::Keycode::from(code), xkb::KeyDirection::Up);
    }
}

fn grab_status(status: x::GrabStatus) -> GrabStatus {
    match status {
        x::GrabStatus::Success => GrabStatus::Success,
        x::GrabStatus::AlreadyGrabbed => GrabStatus::AlreadyGrabbed,
        x::GrabStatus::InvalidTime => GrabStatus::InvalidTime,
        x::GrabStatus::NotViewable => GrabStatus::NotViewable,
        x::GrabStatus::Frozen => GrabStatus::Frozen,
    }
}

/// A live connection to the X server named by `DISPLAY`.
pub struct XcbServer {
    conn: xcb::Connection,
    screens: Vec<ScreenInfo>,
    randr: bool,
    keyboard: Keyboard,
}

impl XcbServer {
    pub fn connect() -> Result<Self> {
        let (conn, _) = xcb::Connection::connect_with_extensions(
            None,
            &[xcb::Extension::Xkb],
            &[xcb::Extension::RandR],
        )
        .map_err(|e| {
            debug!("Connection failed: {e}");
            LockError::NoDisplay(std::env::var("DISPLAY").unwrap_or_default())
        })?;

        let randr = conn
            .active_extensions()
            .any(|ext| ext == xcb::Extension::RandR);
        if !randr {
            debug!("RandR not available, screen resizes will be ignored");
        }

        let screens = conn
            .get_setup()
            .roots()
            .map(|screen| ScreenInfo {
                root: screen.root(),
                width: screen.width_in_pixels(),
                height: screen.height_in_pixels(),
                colormap: screen.default_colormap(),
                depth: screen.root_depth(),
                visual: screen.root_visual(),
            })
            .collect::<Vec<_>>();

        let keyboard = Keyboard::new(&conn)?;

        debug!("Connected to X server with {} screen(s)", screens.len());

        Ok(Self {
            conn,
            screens,
            randr,
            keyboard,
        })
    }

    fn info(&self, screen: usize) -> Result<&ScreenInfo> {
        self.screens
            .get(screen)
            .ok_or(anyhow!("No screen {screen}"))
    }

    fn translate(&mut self, event: xcb::Event) -> ServerEvent<x::Window> {
        match event {
            xcb::Event::X(x::Event::KeyPress(ev)) => {
                ServerEvent::KeyPress(self.keyboard.press(ev.detail()))
            }
            xcb::Event::X(x::Event::KeyRelease(ev)) => {
                self.keyboard.release(ev.detail());
                ServerEvent::Other
            }
            xcb::Event::RandR(randr::Event::ScreenChangeNotify(ev)) => ServerEvent::ScreenChange {
                window: ev.request_window(),
                width: ev.width(),
                height: ev.height(),
            },
            other => {
                trace!("Unhandled event {other:?}");
                ServerEvent::Other
            }
        }
    }
}

impl Server for XcbServer {
    type Window = x::Window;
    type Pixmap = x::Pixmap;
    type Cursor = x::Cursor;

    fn screen_count(&self) -> usize {
        self.screens.len()
    }

    fn screen(&self, screen: usize) -> Option<ScreenGeometry<x::Window>> {
        self.screens.get(screen).map(|info| ScreenGeometry {
            root: info.root,
            width: info.width,
            height: info.height,
        })
    }

    fn has_screen_change(&self) -> bool {
        self.randr
    }

    fn alloc_color(&mut self, screen: usize, color: &ColorSpec) -> Result<u32> {
        let cmap = self.info(screen)?.colormap;

        let pixel = match color {
            ColorSpec::Named(name) => {
                let cookie = self.conn.send_request(&x::AllocNamedColor {
                    cmap,
                    name: name.as_bytes(),
                });
                self.conn.wait_for_reply(cookie)?.pixel()
            }
            ColorSpec::Rgb { red, green, blue } => {
                let cookie = self.conn.send_request(&x::AllocColor {
                    cmap,
                    red: *red,
                    green: *green,
                    blue: *blue,
                });
                self.conn.wait_for_reply(cookie)?.pixel()
            }
        };

        trace!("Allocated {color} as pixel {pixel:#x} on screen {screen}");

        Ok(pixel)
    }

    fn free_colors(&mut self, screen: usize, pixels: &[u32]) {
        let Some(info) = self.screens.get(screen) else {
            return;
        };

        self.conn.send_request(&x::FreeColors {
            cmap: info.colormap,
            plane_mask: 0,
            pixels,
        });
    }

    fn create_window(&mut self, screen: usize, background: u32) -> Result<x::Window> {
        let info = self.info(screen)?;
        let (root, width, height, depth, visual) =
            (info.root, info.width, info.height, info.depth, info.visual);

        let window: x::Window = self.conn.generate_id();
        self.conn.send_and_check_request(&x::CreateWindow {
            depth,
            wid: window,
            parent: root,
            x: 0,
            y: 0,
            width,
            height,
            border_width: 0,
            class: x::WindowClass::InputOutput,
            visual,
            value_list: &[
                x::Cw::BackPixel(background),
                x::Cw::OverrideRedirect(true),
            ],
        })?;

        Ok(window)
    }

    fn destroy_window(&mut self, window: x::Window) {
        self.conn.send_request(&x::DestroyWindow { window });
    }

    fn create_blank_bitmap(&mut self, window: x::Window) -> Result<x::Pixmap> {
        let pixmap: x::Pixmap = self.conn.generate_id();
        self.conn.send_and_check_request(&x::CreatePixmap {
            depth: 1,
            pid: pixmap,
            drawable: x::Drawable::Window(window),
            width: CURSOR_SIZE,
            height: CURSOR_SIZE,
        })?;

        // Pixmap contents start undefined
        let gc: x::Gcontext = self.conn.generate_id();
        self.conn.send_and_check_request(&x::CreateGc {
            cid: gc,
            drawable: x::Drawable::Pixmap(pixmap),
            value_list: &[x::Gc::Foreground(0)],
        })?;
        self.conn.send_request(&x::PolyFillRectangle {
            drawable: x::Drawable::Pixmap(pixmap),
            gc,
            rectangles: &[x::Rectangle {
                x: 0,
                y: 0,
                width: CURSOR_SIZE,
                height: CURSOR_SIZE,
            }],
        });
        self.conn.send_request(&x::FreeGc { gc });

        Ok(pixmap)
    }

    fn free_pixmap(&mut self, pixmap: x::Pixmap) {
        self.conn.send_request(&x::FreePixmap { pixmap });
    }

    fn create_cursor(&mut self, bitmap: x::Pixmap) -> Result<x::Cursor> {
        let cursor: x::Cursor = self.conn.generate_id();
        self.conn.send_and_check_request(&x::CreateCursor {
            cid: cursor,
            source: bitmap,
            mask: bitmap,
            fore_red: 0,
            fore_green: 0,
            fore_blue: 0,
            back_red: 0,
            back_green: 0,
            back_blue: 0,
            x: 0,
            y: 0,
        })?;

        Ok(cursor)
    }

    fn free_cursor(&mut self, cursor: x::Cursor) {
        self.conn.send_request(&x::FreeCursor { cursor });
    }

    fn define_cursor(&mut self, window: x::Window, cursor: x::Cursor) {
        self.conn.send_request(&x::ChangeWindowAttributes {
            window,
            value_list: &[x::Cw::Cursor(cursor)],
        });
    }

    fn grab_pointer(&mut self, root: x::Window, cursor: x::Cursor) -> Result<GrabStatus> {
        let cookie = self.conn.send_request(&x::GrabPointer {
            owner_events: false,
            grab_window: root,
            event_mask: x::EventMask::BUTTON_PRESS
                | x::EventMask::BUTTON_RELEASE
                | x::EventMask::POINTER_MOTION,
            pointer_mode: x::GrabMode::Async,
            keyboard_mode: x::GrabMode::Async,
            confine_to: x::Window::none(),
            cursor,
            time: x::CURRENT_TIME,
        });

        Ok(grab_status(self.conn.wait_for_reply(cookie)?.status()))
    }

    fn grab_keyboard(&mut self, root: x::Window) -> Result<GrabStatus> {
        let cookie = self.conn.send_request(&x::GrabKeyboard {
            owner_events: true,
            grab_window: root,
            time: x::CURRENT_TIME,
            pointer_mode: x::GrabMode::Async,
            keyboard_mode: x::GrabMode::Async,
        });

        Ok(grab_status(self.conn.wait_for_reply(cookie)?.status()))
    }

    fn ungrab_pointer(&mut self) {
        self.conn.send_request(&x::UngrabPointer {
            time: x::CURRENT_TIME,
        });
    }

    fn ungrab_keyboard(&mut self) {
        self.conn.send_request(&x::UngrabKeyboard {
            time: x::CURRENT_TIME,
        });
    }

    fn map_raised(&mut self, window: x::Window) {
        self.raise_window(window);
        self.conn.send_request(&x::MapWindow { window });
    }

    fn raise_window(&mut self, window: x::Window) {
        self.conn.send_request(&x::ConfigureWindow {
            window,
            value_list: &[x::ConfigWindow::StackMode(x::StackMode::Above)],
        });
    }

    fn resize_window(&mut self, window: x::Window, width: u16, height: u16) {
        self.conn.send_request(&x::ConfigureWindow {
            window,
            value_list: &[
                x::ConfigWindow::Width(width.into()),
                x::ConfigWindow::Height(height.into()),
            ],
        });
    }

    fn set_background(&mut self, window: x::Window, pixel: u32) {
        self.conn.send_request(&x::ChangeWindowAttributes {
            window,
            value_list: &[x::Cw::BackPixel(pixel)],
        });
    }

    fn clear_window(&mut self, window: x::Window) {
        self.conn.send_request(&x::ClearArea {
            exposures: false,
            window,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
        });
    }

    fn select_screen_change(&mut self, window: x::Window) {
        self.conn.send_request(&randr::SelectInput {
            window,
            enable: randr::NotifyMask::SCREEN_CHANGE,
        });
    }

    fn select_substructure(&mut self, root: x::Window) {
        self.conn.send_request(&x::ChangeWindowAttributes {
            window: root,
            value_list: &[x::Cw::EventMask(x::EventMask::SUBSTRUCTURE_NOTIFY)],
        });
    }

    fn bell(&mut self, percent: i8) {
        self.conn.send_request(&x::Bell { percent });
    }

    fn next_event(&mut self) -> Result<ServerEvent<x::Window>> {
        self.conn.flush()?;

        loop {
            match self.conn.wait_for_event() {
                Ok(event) => return Ok(self.translate(event)),
                Err(xcb::Error::Protocol(e)) => warn!("Ignoring X protocol error: {e:?}"),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn discard_pending_events(&mut self) -> Result<()> {
        let mut dropped = 0usize;

        loop {
            match self.conn.poll_for_event() {
                // Keys still update modifier state so it matches the hardware
                Ok(Some(event)) => {
                    self.translate(event);
                    dropped += 1;
                }
                Ok(None) => break,
                Err(xcb::Error::Protocol(e)) => warn!("Ignoring X protocol error: {e:?}"),
                Err(e) => return Err(e.into()),
            }
        }

        debug!("Discarded {dropped} queued event(s)");

        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.conn.flush()?)
    }

    fn sync(&mut self) -> Result<()> {
        let cookie = self.conn.send_request(&x::GetInputFocus {});
        self.conn.wait_for_reply(cookie)?;
        Ok(())
    }

    fn connection_fd(&self) -> RawFd {
        self.conn.as_raw_fd()
    }
}
