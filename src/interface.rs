// src/interface.rs
//
// Operator controls. Preview mode reads keys from the highgui windows;
// headless mode only knows how to quit (Ctrl-C).

use anyhow::Result;
use opencv::{core::Mat, highgui};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub const LIVE_WINDOW: &str = "Slit-scan speedometer";
pub const COMPOSITE_WINDOW: &str = "Slit-scan result";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ToggleScan,
    ClearResult,
    SaveResult,
    Quit,
}

/// `s` toggle, `c` clear, `w` save, `q`/Esc quit
pub fn command_for_key(key: i32) -> Option<Command> {
    if key < 0 {
        return None;
    }
    match key & 0xFF {
        k if k == b's' as i32 || k == b'S' as i32 => Some(Command::ToggleScan),
        k if k == b'c' as i32 || k == b'C' as i32 => Some(Command::ClearResult),
        k if k == b'w' as i32 || k == b'W' as i32 => Some(Command::SaveResult),
        k if k == b'q' as i32 || k == b'Q' as i32 || k == 27 => Some(Command::Quit),
        _ => None,
    }
}

pub trait ControlSource {
    /// Commands entered since the last poll
    fn poll(&mut self) -> Result<Vec<Command>>;

    /// Show the annotated frame and composite, if this source has a display
    fn present(&mut self, _live: &Mat, _composite: &Mat) -> Result<()> {
        Ok(())
    }
}

/// highgui windows plus keyboard
pub struct PreviewControls {
    stop: Arc<AtomicBool>,
}

impl PreviewControls {
    pub fn new(stop: Arc<AtomicBool>) -> Result<Self> {
        highgui::named_window(LIVE_WINDOW, highgui::WINDOW_AUTOSIZE)?;
        highgui::named_window(COMPOSITE_WINDOW, highgui::WINDOW_NORMAL)?;
        info!("Controls: s = scan on/off, c = clear, w = save, q/Esc = quit");
        Ok(Self { stop })
    }
}

impl ControlSource for PreviewControls {
    fn poll(&mut self) -> Result<Vec<Command>> {
        let mut commands = Vec::new();
        if self.stop.load(Ordering::Relaxed) {
            commands.push(Command::Quit);
        }
        if let Some(cmd) = command_for_key(highgui::wait_key(1)?) {
            commands.push(cmd);
        }
        Ok(commands)
    }

    fn present(&mut self, live: &Mat, composite: &Mat) -> Result<()> {
        highgui::imshow(LIVE_WINDOW, live)?;
        highgui::imshow(COMPOSITE_WINDOW, composite)?;
        Ok(())
    }
}

impl Drop for PreviewControls {
    fn drop(&mut self) {
        let _ = highgui::destroy_all_windows();
    }
}

/// No display; quits when the stop flag is raised
pub struct HeadlessControls {
    stop: Arc<AtomicBool>,
}

impl HeadlessControls {
    pub fn new(stop: Arc<AtomicBool>) -> Self {
        Self { stop }
    }
}

impl ControlSource for HeadlessControls {
    fn poll(&mut self) -> Result<Vec<Command>> {
        if self.stop.load(Ordering::Relaxed) {
            Ok(vec![Command::Quit])
        } else {
            Ok(Vec::new())
        }
    }
}
