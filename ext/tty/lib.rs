// Copyright 2018-2026 the jsrt authors. MIT license.

//! The terminal boundary: `isatty`, raw mode, window size, cursor and
//! clear escapes, and color-depth inference from the environment.

use std::io;
use std::os::fd::RawFd;

pub fn isatty(fd: RawFd) -> bool {
  unsafe { libc::isatty(fd) == 1 }
}

/// Clear direction for [`WriteStream::clear_line`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearDirection {
  /// From the cursor to the start of the line.
  Left,
  /// From the cursor to the end of the line.
  Right,
  /// The whole line.
  Whole,
}

/// A readable terminal fd; `set_raw_mode` flips the termios flags and
/// restores them on drop.
pub struct ReadStream {
  fd: RawFd,
  saved: Option<libc::termios>,
}

impl ReadStream {
  pub fn new(fd: RawFd) -> Self {
    Self { fd, saved: None }
  }

  pub fn is_tty(&self) -> bool {
    isatty(self.fd)
  }

  pub fn is_raw(&self) -> bool {
    self.saved.is_some()
  }

  pub fn set_raw_mode(&mut self, enable: bool) -> io::Result<()> {
    if enable == self.saved.is_some() {
      return Ok(());
    }
    unsafe {
      if enable {
        let mut attrs = std::mem::zeroed::<libc::termios>();
        if libc::tcgetattr(self.fd, &mut attrs) != 0 {
          return Err(io::Error::last_os_error());
        }
        let saved = attrs;
        libc::cfmakeraw(&mut attrs);
        if libc::tcsetattr(self.fd, libc::TCSANOW, &attrs) != 0 {
          return Err(io::Error::last_os_error());
        }
        self.saved = Some(saved);
      } else if let Some(saved) = self.saved.take() {
        if libc::tcsetattr(self.fd, libc::TCSANOW, &saved) != 0 {
          return Err(io::Error::last_os_error());
        }
      }
    }
    Ok(())
  }
}

impl Drop for ReadStream {
  fn drop(&mut self) {
    if self.saved.is_some() {
      let _ = self.set_raw_mode(false);
    }
  }
}

/// A writable terminal fd with the ANSI helpers.
pub struct WriteStream {
  fd: RawFd,
}

impl WriteStream {
  pub fn new(fd: RawFd) -> Self {
    Self { fd }
  }

  pub fn is_tty(&self) -> bool {
    isatty(self.fd)
  }

  /// `(columns, rows)` of the underlying terminal, if it is one.
  pub fn window_size(&self) -> Option<(u16, u16)> {
    let mut size: libc::winsize = unsafe { std::mem::zeroed() };
    let status = unsafe { libc::ioctl(self.fd, libc::TIOCGWINSZ, &mut size) };
    if status == 0 && size.ws_col > 0 {
      Some((size.ws_col, size.ws_row))
    } else {
      None
    }
  }

  pub fn columns(&self) -> u16 {
    self.window_size().map(|(columns, _)| columns).unwrap_or(80)
  }

  pub fn rows(&self) -> u16 {
    self.window_size().map(|(_, rows)| rows).unwrap_or(24)
  }

  fn write_escape(&self, sequence: &str) -> io::Result<()> {
    let bytes = sequence.as_bytes();
    let written = unsafe {
      libc::write(self.fd, bytes.as_ptr() as *const libc::c_void, bytes.len())
    };
    if written < 0 {
      return Err(io::Error::last_os_error());
    }
    Ok(())
  }

  pub fn clear_line(&self, direction: ClearDirection) -> io::Result<()> {
    let sequence = match direction {
      ClearDirection::Left => "\x1b[1K",
      ClearDirection::Right => "\x1b[0K",
      ClearDirection::Whole => "\x1b[2K",
    };
    self.write_escape(sequence)
  }

  pub fn cursor_to(&self, x: u16, y: Option<u16>) -> io::Result<()> {
    match y {
      Some(y) => self.write_escape(&format!("\x1b[{};{}H", y + 1, x + 1)),
      None => self.write_escape(&format!("\x1b[{}G", x + 1)),
    }
  }

  pub fn move_cursor(&self, dx: i16, dy: i16) -> io::Result<()> {
    let mut sequence = String::new();
    if dx > 0 {
      sequence.push_str(&format!("\x1b[{dx}C"));
    } else if dx < 0 {
      sequence.push_str(&format!("\x1b[{}D", -dx));
    }
    if dy > 0 {
      sequence.push_str(&format!("\x1b[{dy}B"));
    } else if dy < 0 {
      sequence.push_str(&format!("\x1b[{}A", -dy));
    }
    if sequence.is_empty() {
      return Ok(());
    }
    self.write_escape(&sequence)
  }

  pub fn clear_screen_down(&self) -> io::Result<()> {
    self.write_escape("\x1b[0J")
  }

  pub fn get_color_depth(&self) -> u8 {
    color_depth_from_lookup(|name| std::env::var(name).ok())
  }

  pub fn has_colors(&self, count: u32) -> bool {
    let depth = self.get_color_depth();
    count <= 1u32.checked_shl(depth as u32).unwrap_or(u32::MAX)
  }
}

/// Color depth in bits per pixel, from environment variables in
/// precedence order: explicit disables first, then `FORCE_COLOR`,
/// `COLORTERM`, and finally `TERM` heuristics.
pub fn color_depth_from_lookup<F>(lookup: F) -> u8
where
  F: Fn(&str) -> Option<String>,
{
  if lookup("NO_COLOR").is_some() || lookup("NODE_DISABLE_COLORS").is_some() {
    return 1;
  }

  if let Some(force) = lookup("FORCE_COLOR") {
    return match force.as_str() {
      "0" => 1,
      "1" | "" | "true" => 4,
      "2" => 8,
      "3" => 24,
      _ => 4,
    };
  }

  if let Some(colorterm) = lookup("COLORTERM") {
    let colorterm = colorterm.to_ascii_lowercase();
    if ["truecolor", "24bit", "direct", "rgb"]
      .iter()
      .any(|needle| colorterm.contains(needle))
    {
      return 24;
    }
  }

  if let Some(term) = lookup("TERM") {
    let term = term.to_ascii_lowercase();
    if term.contains("256color") {
      return 8;
    }
    if term.starts_with("xterm")
      || term.starts_with("screen")
      || term.starts_with("vt100")
      || term.starts_with("rxvt")
      || term.starts_with("linux")
    {
      return 4;
    }
  }

  1
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  fn depth(vars: &[(&str, &str)]) -> u8 {
    let map: HashMap<String, String> = vars
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    color_depth_from_lookup(|name| map.get(name).cloned())
  }

  #[test]
  fn no_color_wins_over_everything() {
    let vars = [
      ("NO_COLOR", "1"),
      ("FORCE_COLOR", "3"),
      ("COLORTERM", "truecolor"),
      ("TERM", "xterm-256color"),
    ];
    assert_eq!(depth(&vars), 1);
    assert_eq!(depth(&[("NODE_DISABLE_COLORS", "1"), ("TERM", "xterm")]), 1);
  }

  #[test]
  fn force_color_levels() {
    assert_eq!(depth(&[("FORCE_COLOR", "0")]), 1);
    assert_eq!(depth(&[("FORCE_COLOR", "1")]), 4);
    assert_eq!(depth(&[("FORCE_COLOR", "2")]), 8);
    assert_eq!(depth(&[("FORCE_COLOR", "3")]), 24);
  }

  #[test]
  fn colorterm_beats_term() {
    assert_eq!(
      depth(&[("COLORTERM", "truecolor"), ("TERM", "xterm")]),
      24
    );
    assert_eq!(depth(&[("COLORTERM", "rgb")]), 24);
  }

  #[test]
  fn term_heuristics() {
    assert_eq!(depth(&[("TERM", "xterm-256color")]), 8);
    assert_eq!(depth(&[("TERM", "screen-256color")]), 8);
    assert_eq!(depth(&[("TERM", "xterm")]), 4);
    assert_eq!(depth(&[("TERM", "dumb")]), 1);
    assert_eq!(depth(&[]), 1);
  }

  #[test]
  fn non_tty_fd_reports_false() {
    // /dev/null is not a terminal.
    let file = std::fs::File::open("/dev/null").unwrap();
    use std::os::fd::AsRawFd;
    assert!(!isatty(file.as_raw_fd()));
    let stream = WriteStream::new(file.as_raw_fd());
    assert!(!stream.is_tty());
    assert!(stream.window_size().is_none());
    assert_eq!(stream.columns(), 80);
    assert_eq!(stream.rows(), 24);
  }

  #[test]
  fn has_colors_uses_the_depth() {
    let file = std::fs::File::open("/dev/null").unwrap();
    use std::os::fd::AsRawFd;
    let stream = WriteStream::new(file.as_raw_fd());
    // Depth depends on the ambient env; 2 colors always fit.
    assert!(stream.has_colors(2));
  }
}
