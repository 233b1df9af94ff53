// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

//! A scripted, recording stand-in for the X server.

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    os::fd::RawFd,
    rc::Rc,
};

use anyhow::{Result, anyhow};

use crate::{
    palette::ColorSpec,
    server::{GrabStatus, KeyInput, ScreenGeometry, Server, ServerEvent},
};

pub const ROOT_BASE: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    AllocColor { screen: usize, pixel: u32 },
    FreeColors { screen: usize, pixels: Vec<u32> },
    CreateWindow { screen: usize, window: u32, background: u32 },
    DestroyWindow(u32),
    CreateBitmap(u32),
    FreePixmap(u32),
    CreateCursor(u32),
    FreeCursor(u32),
    DefineCursor { window: u32, cursor: u32 },
    GrabPointer { root: u32, status: GrabStatus },
    GrabKeyboard { root: u32, status: GrabStatus },
    UngrabPointer,
    UngrabKeyboard,
    MapRaised(u32),
    Raise(u32),
    Resize { window: u32, width: u16, height: u16 },
    SetBackground { window: u32, pixel: u32 },
    Clear(u32),
    SelectScreenChange(u32),
    SelectSubstructure(u32),
    Bell(i8),
    DiscardPending,
}

pub struct FakeServer {
    pub screens: Vec<(u16, u16)>,
    pub screen_change: bool,
    pub events: VecDeque<ServerEvent<u32>>,
    /// Scripted grab replies per root; `Success` once the script runs out.
    pub pointer_replies: HashMap<u32, VecDeque<GrabStatus>>,
    pub keyboard_replies: HashMap<u32, VecDeque<GrabStatus>>,
    /// Color names the server does not know.
    pub unknown_colors: Vec<String>,
    /// Pointer grab requests answered before the connection "drops".
    pub pointer_grab_fails_after: Option<usize>,
    pub requests: Vec<Request>,
    /// Receives `requests` when the server is dropped.
    pub journal: Option<Rc<RefCell<Vec<Request>>>>,
    next_id: u32,
}

impl FakeServer {
    pub fn new(screens: &[(u16, u16)]) -> Self {
        Self {
            screens: screens.to_vec(),
            screen_change: false,
            events: VecDeque::new(),
            pointer_replies: HashMap::new(),
            keyboard_replies: HashMap::new(),
            unknown_colors: Vec::new(),
            pointer_grab_fails_after: None,
            requests: Vec::new(),
            journal: None,
            next_id: 1,
        }
    }

    pub fn root(screen: usize) -> u32 {
        ROOT_BASE + screen as u32
    }

    pub fn push_key(&mut self, keysym: u32, text: &[u8]) {
        self.events
            .push_back(ServerEvent::KeyPress(KeyInput::new(keysym, text)));
    }

    pub fn type_text(&mut self, text: &str) {
        for b in text.bytes() {
            self.push_key(b as u32, &[b]);
        }
    }

    pub fn push_return(&mut self) {
        self.push_key(xkbcommon::xkb::keysyms::KEY_Return, b"\r");
    }

    pub fn script_pointer(&mut self, screen: usize, replies: &[GrabStatus]) {
        self.pointer_replies
            .insert(Self::root(screen), replies.iter().copied().collect());
    }

    pub fn script_keyboard(&mut self, screen: usize, replies: &[GrabStatus]) {
        self.keyboard_replies
            .insert(Self::root(screen), replies.iter().copied().collect());
    }

    pub fn count(&self, pred: impl Fn(&Request) -> bool) -> usize {
        self.requests.iter().filter(|&r| pred(r)).count()
    }

    /// Background pixels set on `window`, in order.
    pub fn backgrounds(&self, window: u32) -> Vec<u32> {
        self.requests
            .iter()
            .filter_map(|r| match r {
                Request::SetBackground { window: w, pixel } if *w == window => Some(*pixel),
                _ => None,
            })
            .collect()
    }

    pub fn bells(&self) -> usize {
        self.count(|r| matches!(r, Request::Bell(_)))
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn grab_reply(replies: &mut HashMap<u32, VecDeque<GrabStatus>>, root: u32) -> GrabStatus {
        replies
            .get_mut(&root)
            .and_then(|q| if q.len() > 1 { q.pop_front() } else { q.front().copied() })
            .unwrap_or(GrabStatus::Success)
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        if let Some(journal) = &self.journal {
            journal.borrow_mut().append(&mut self.requests);
        }
    }
}

/// Asserts every created resource in `requests` has exactly one matching
/// release, and every allocated color was freed.
pub fn assert_all_released(requests: &[Request]) {
    let count = |pred: &dyn Fn(&Request) -> bool| {
        requests.iter().filter(|&r| pred(r)).count()
    };

    for request in requests {
        let released = match request {
            Request::CreateWindow { window, .. } => {
                count(&|r| *r == Request::DestroyWindow(*window))
            }
            Request::CreateBitmap(p) => count(&|r| *r == Request::FreePixmap(*p)),
            Request::CreateCursor(c) => count(&|r| *r == Request::FreeCursor(*c)),
            _ => continue,
        };
        assert_eq!(released, 1, "{request:?} not released exactly once");
    }

    let allocated = count(&|r| matches!(r, Request::AllocColor { .. }));
    let freed: usize = requests
        .iter()
        .filter_map(|r| match r {
            Request::FreeColors { pixels, .. } => Some(pixels.len()),
            _ => None,
        })
        .sum();
    assert_eq!(allocated, freed);
}

/// Pixel values handed out for each palette color, distinct per screen.
pub fn pixel_for(screen: usize, color: &ColorSpec) -> u32 {
    let base = match color {
        ColorSpec::Named(name) if name == "black" => 1,
        ColorSpec::Rgb { red: 0, .. } => 2,
        _ => 3,
    };
    (screen as u32 + 1) * 100 + base
}

impl Server for FakeServer {
    type Window = u32;
    type Pixmap = u32;
    type Cursor = u32;

    fn screen_count(&self) -> usize {
        self.screens.len()
    }

    fn screen(&self, screen: usize) -> Option<ScreenGeometry<u32>> {
        self.screens
            .get(screen)
            .map(|&(width, height)| ScreenGeometry {
                root: Self::root(screen),
                width,
                height,
            })
    }

    fn has_screen_change(&self) -> bool {
        self.screen_change
    }

    fn alloc_color(&mut self, screen: usize, color: &ColorSpec) -> Result<u32> {
        if self.unknown_colors.contains(&color.to_string()) {
            return Err(anyhow!("unknown color {color}"));
        }
        let pixel = pixel_for(screen, color);
        self.requests.push(Request::AllocColor { screen, pixel });
        Ok(pixel)
    }

    fn free_colors(&mut self, screen: usize, pixels: &[u32]) {
        self.requests.push(Request::FreeColors {
            screen,
            pixels: pixels.to_vec(),
        });
    }

    fn create_window(&mut self, screen: usize, background: u32) -> Result<u32> {
        let window = self.alloc_id();
        self.requests.push(Request::CreateWindow {
            screen,
            window,
            background,
        });
        Ok(window)
    }

    fn destroy_window(&mut self, window: u32) {
        self.requests.push(Request::DestroyWindow(window));
    }

    fn create_blank_bitmap(&mut self, _window: u32) -> Result<u32> {
        let pixmap = self.alloc_id();
        self.requests.push(Request::CreateBitmap(pixmap));
        Ok(pixmap)
    }

    fn free_pixmap(&mut self, pixmap: u32) {
        self.requests.push(Request::FreePixmap(pixmap));
    }

    fn create_cursor(&mut self, _bitmap: u32) -> Result<u32> {
        let cursor = self.alloc_id();
        self.requests.push(Request::CreateCursor(cursor));
        Ok(cursor)
    }

    fn free_cursor(&mut self, cursor: u32) {
        self.requests.push(Request::FreeCursor(cursor));
    }

    fn define_cursor(&mut self, window: u32, cursor: u32) {
        self.requests.push(Request::DefineCursor { window, cursor });
    }

    fn grab_pointer(&mut self, root: u32, _cursor: u32) -> Result<GrabStatus> {
        let sent = self.count(|r| matches!(r, Request::GrabPointer { .. }));
        if self.pointer_grab_fails_after.is_some_and(|limit| sent >= limit) {
            return Err(anyhow!("connection lost"));
        }
        let status = Self::grab_reply(&mut self.pointer_replies, root);
        self.requests.push(Request::GrabPointer { root, status });
        Ok(status)
    }

    fn grab_keyboard(&mut self, root: u32) -> Result<GrabStatus> {
        let status = Self::grab_reply(&mut self.keyboard_replies, root);
        self.requests.push(Request::GrabKeyboard { root, status });
        Ok(status)
    }

    fn ungrab_pointer(&mut self) {
        self.requests.push(Request::UngrabPointer);
    }

    fn ungrab_keyboard(&mut self) {
        self.requests.push(Request::UngrabKeyboard);
    }

    fn map_raised(&mut self, window: u32) {
        self.requests.push(Request::MapRaised(window));
    }

    fn raise_window(&mut self, window: u32) {
        self.requests.push(Request::Raise(window));
    }

    fn resize_window(&mut self, window: u32, width: u16, height: u16) {
        self.requests.push(Request::Resize {
            window,
            width,
            height,
        });
    }

    fn set_background(&mut self, window: u32, pixel: u32) {
        self.requests.push(Request::SetBackground { window, pixel });
    }

    fn clear_window(&mut self, window: u32) {
        self.requests.push(Request::Clear(window));
    }

    fn select_screen_change(&mut self, window: u32) {
        self.requests.push(Request::SelectScreenChange(window));
    }

    fn select_substructure(&mut self, root: u32) {
        self.requests.push(Request::SelectSubstructure(root));
    }

    fn bell(&mut self, percent: i8) {
        self.requests.push(Request::Bell(percent));
    }

    fn next_event(&mut self) -> Result<ServerEvent<u32>> {
        self.events
            .pop_front()
            .ok_or_else(|| anyhow!("event script exhausted"))
    }

    fn discard_pending_events(&mut self) -> Result<()> {
        self.requests.push(Request::DiscardPending);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn connection_fd(&self) -> RawFd {
        -1
    }
}
