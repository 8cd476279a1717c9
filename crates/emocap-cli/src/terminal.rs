//! Terminal preview and keyboard input.
//!
//! The frame is drawn with half-block cells (two pixels per cell, foreground
//! on top, background below) under a one-line status bar. Raw mode swallows
//! SIGINT, so Ctrl-C is delivered as ESC.

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{self, ClearType};
use crossterm::{cursor, execute, queue};
use emocap_core::session::{KeySource, Overlay, Renderer};
use emocap_core::{LandmarkVector, RawKey};
use emocap_hw::Frame;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};
use std::io::{self, Stdout, Write};
use std::time::Duration;

const MESH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const KEY_HINT: &str = "a/h/s/n/u/f/d: label   =: save   ESC: quit";

pub struct TerminalUi {
    out: Stdout,
    status: String,
    face: bool,
    notice: Option<String>,
    active: bool,
}

impl TerminalUi {
    /// Switch the terminal to raw mode on the alternate screen.
    pub fn open() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut out = io::stdout();
        if let Err(e) = execute!(out, terminal::EnterAlternateScreen, cursor::Hide) {
            let _ = terminal::disable_raw_mode();
            return Err(e);
        }
        Ok(Self {
            out,
            status: String::new(),
            face: false,
            notice: None,
            active: true,
        })
    }

    fn draw_frame(&mut self, frame: &Frame, cols: u16, rows: u16) -> io::Result<()> {
        let Some(view) =
            ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(frame.width, frame.height, &frame.data[..])
        else {
            return Ok(());
        };
        let (tw, th) = fit(frame.width, frame.height, cols as u32, rows as u32 * 2);
        if tw == 0 || th == 0 {
            return Ok(());
        }
        let small = imageops::resize(&view, tw, th, FilterType::Triangle);

        for row in 0..th.div_ceil(2) {
            queue!(self.out, cursor::MoveTo(0, row as u16))?;
            for x in 0..tw {
                let top = small.get_pixel(x, row * 2);
                let bottom = if row * 2 + 1 < th {
                    small.get_pixel(x, row * 2 + 1)
                } else {
                    top
                };
                queue!(
                    self.out,
                    SetForegroundColor(rgb(top)),
                    SetBackgroundColor(rgb(bottom)),
                    Print('▀')
                )?;
            }
            queue!(
                self.out,
                ResetColor,
                terminal::Clear(ClearType::UntilNewLine)
            )?;
        }
        Ok(())
    }
}

impl KeySource for TerminalUi {
    fn poll_key(&mut self, timeout: Duration) -> RawKey {
        match event::poll(timeout) {
            Ok(true) => match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                    map_key(key.code, key.modifiers)
                }
                Ok(_) => RawKey::None,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read terminal event");
                    RawKey::None
                }
            },
            Ok(false) => RawKey::None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to poll terminal events");
                RawKey::None
            }
        }
    }
}

impl Renderer for TerminalUi {
    type Error = io::Error;

    fn draw_overlay(&mut self, frame: &mut Frame, overlay: &Overlay<'_>) {
        if let Some(mesh) = overlay.landmarks {
            paint_mesh(frame, mesh);
        }
        self.status = overlay.status_text();
        self.face = overlay.landmarks.is_some();
        self.notice = overlay.notice.map(str::to_string);
    }

    fn display(&mut self, frame: &Frame) -> io::Result<()> {
        if !self.active {
            return Ok(());
        }
        let (cols, rows) = terminal::size()?;
        let image_rows = rows.saturating_sub(2);
        self.draw_frame(frame, cols, image_rows)?;

        let status_color = if self.face { Color::Green } else { Color::Red };
        queue!(
            self.out,
            cursor::MoveTo(0, image_rows),
            terminal::Clear(ClearType::CurrentLine),
            SetForegroundColor(status_color),
            Print(&self.status),
            ResetColor,
            cursor::MoveTo(0, image_rows + 1),
            terminal::Clear(ClearType::CurrentLine),
            SetForegroundColor(Color::DarkGrey),
            Print(self.notice.as_deref().unwrap_or(KEY_HINT)),
            ResetColor,
        )?;
        self.out.flush()
    }

    fn close(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = execute!(self.out, ResetColor, cursor::Show, terminal::LeaveAlternateScreen)
        {
            tracing::warn!(error = %e, "failed to restore terminal screen");
        }
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::warn!(error = %e, "failed to leave raw mode");
        }
    }
}

impl Drop for TerminalUi {
    fn drop(&mut self) {
        self.close();
    }
}

fn map_key(code: KeyCode, modifiers: KeyModifiers) -> RawKey {
    match code {
        KeyCode::Esc => RawKey::Esc,
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => RawKey::Esc,
        KeyCode::Char(c) => RawKey::Char(c),
        _ => RawKey::None,
    }
}

/// Paint each landmark as one pixel. Points outside the frame are skipped.
fn paint_mesh(frame: &mut Frame, mesh: &LandmarkVector) {
    let (w, h) = (frame.width, frame.height);
    let Some(mut canvas) = ImageBuffer::<Rgb<u8>, &mut [u8]>::from_raw(w, h, &mut frame.data[..])
    else {
        return;
    };
    for p in mesh {
        let x = (p.x * w as f32).floor();
        let y = (p.y * h as f32).floor();
        if x >= 0.0 && y >= 0.0 && (x as u32) < w && (y as u32) < h {
            canvas.put_pixel(x as u32, y as u32, MESH_COLOR);
        }
    }
}

/// Largest size with the frame's aspect ratio that fits in `max_w`×`max_h`.
fn fit(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (0, 0);
    }
    let scale = (max_w as f32 / width as f32).min(max_h as f32 / height as f32);
    (
        ((width as f32 * scale) as u32).min(max_w),
        ((height as f32 * scale) as u32).min(max_h),
    )
}

fn rgb(p: &Rgb<u8>) -> Color {
    Color::Rgb {
        r: p[0],
        g: p[1],
        b: p[2],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emocap_core::{Landmark, LANDMARK_COUNT};

    #[test]
    fn test_map_key() {
        assert_eq!(map_key(KeyCode::Esc, KeyModifiers::NONE), RawKey::Esc);
        assert_eq!(map_key(KeyCode::Char('c'), KeyModifiers::CONTROL), RawKey::Esc);
        assert_eq!(map_key(KeyCode::Char('c'), KeyModifiers::NONE), RawKey::Char('c'));
        assert_eq!(map_key(KeyCode::Char('='), KeyModifiers::NONE), RawKey::Char('='));
        assert_eq!(map_key(KeyCode::Enter, KeyModifiers::NONE), RawKey::None);
    }

    #[test]
    fn test_paint_mesh_marks_points_in_bounds() {
        let mut frame = Frame::solid(10, 10, [0, 0, 0]);
        let mut points = vec![Landmark { x: 0.55, y: 0.25, z: 0.0 }; LANDMARK_COUNT];
        points[1] = Landmark { x: 1.5, y: -0.2, z: 0.0 };
        paint_mesh(&mut frame, &LandmarkVector::new(points).unwrap());

        assert_eq!(frame.pixel(5, 2), Some([0, 255, 0]));
        let lit = frame.data.chunks_exact(3).filter(|p| p[1] == 255).count();
        assert_eq!(lit, 1);
    }

    #[test]
    fn test_fit_keeps_aspect() {
        assert_eq!(fit(640, 480, 80, 100), (80, 60));
        assert_eq!(fit(640, 480, 200, 60), (80, 60));
        assert_eq!(fit(0, 480, 80, 60), (0, 0));
    }
}
