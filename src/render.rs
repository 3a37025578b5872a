//! Turns one raw RGB frame into an escape-coded text block for a client
//! terminal, in either of two color models.
//!
//! Both renderers are pure: frame plus fit in, bytes out. Output starts
//! with a cursor-home (no clear, redraw stays flicker-free), carries one
//! `\r\n` terminator per line, and letterboxes with spaces so every line
//! is exactly as wide as the destination.

use std::fmt::Write as _;

use clap::ValueEnum;

use crate::geometry::FitRect;
use crate::telnet::CURSOR_HOME;

// Integer approximation of 0.21R + 0.72G + 0.07B.
const LUMA_R_WEIGHT: u32 = 54;
const LUMA_G_WEIGHT: u32 = 183;
const LUMA_B_WEIGHT: u32 = 19;

/// Glyph ramp ordered dark to bright.
const ASCII_RAMP: [u8; 10] = *b" .:-=+*#%@";

const RAMP_LUT: [u8; 256] = build_ramp_lut();

const fn build_ramp_lut() -> [u8; 256] {
    let mut lut = [0u8; 256];
    let mut luma = 0;
    while luma < 256 {
        lut[luma] = ASCII_RAMP[luma * (ASCII_RAMP.len() - 1) / 255];
        luma += 1;
    }
    lut
}

/// Per-session choice of color model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RenderMode {
    /// Grayscale glyph ramp, plain text.
    Ascii,
    /// 24-bit background-color cells.
    Truecolor,
}

impl RenderMode {
    pub fn toggled(self) -> Self {
        match self {
            RenderMode::Ascii => RenderMode::Truecolor,
            RenderMode::Truecolor => RenderMode::Ascii,
        }
    }
}

pub fn render(mode: RenderMode, frame: &[u8], base_w: u32, base_h: u32, fit: &FitRect) -> Vec<u8> {
    match mode {
        RenderMode::Ascii => render_ascii(frame, base_w, base_h, fit),
        RenderMode::Truecolor => render_truecolor(frame, base_w, base_h, fit),
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((LUMA_R_WEIGHT * u32::from(r) + LUMA_G_WEIGHT * u32::from(g) + LUMA_B_WEIGHT * u32::from(b))
        >> 8) as u8
}

/// Nearest source index for an output index; no blending.
fn nearest(out_index: u32, base_dim: u32, out_dim: u32) -> u32 {
    out_index * base_dim / out_dim
}

fn pixel_at(frame: &[u8], base_w: u32, x: u32, y: u32) -> (u8, u8, u8) {
    let offset = ((y * base_w + x) * 3) as usize;
    (frame[offset], frame[offset + 1], frame[offset + 2])
}

fn push_spaces(out: &mut String, count: u16) {
    for _ in 0..count {
        out.push(' ');
    }
}

/// Grayscale renderer: luma through the precomputed ramp lookup, one
/// glyph per cell.
pub fn render_ascii(frame: &[u8], base_w: u32, base_h: u32, fit: &FitRect) -> Vec<u8> {
    debug_assert_eq!(frame.len(), (base_w * base_h * 3) as usize);

    let lines = fit.lines();
    let mut out = String::with_capacity(CURSOR_HOME.len() + usize::from(lines) * (usize::from(fit.cols) + 2));
    out.push_str(CURSOR_HOME);

    for line in 0..lines {
        if line < fit.pad_y || line >= fit.pad_y + fit.out_h {
            push_spaces(&mut out, fit.cols);
            out.push_str("\r\n");
            continue;
        }
        let row = u32::from(line - fit.pad_y);
        let src_y = nearest(row, base_h, u32::from(fit.out_h));

        push_spaces(&mut out, fit.pad_x);
        for col in 0..u32::from(fit.out_w) {
            let src_x = nearest(col, base_w, u32::from(fit.out_w));
            let (r, g, b) = pixel_at(frame, base_w, src_x, src_y);
            out.push(char::from(RAMP_LUT[usize::from(luma(r, g, b))]));
        }
        push_spaces(&mut out, fit.cols - fit.pad_x - fit.out_w);
        out.push_str("\r\n");
    }
    out.into_bytes()
}

/// Truecolor renderer: one space per cell with a 24-bit background
/// escape, emitted only when the color changes between neighboring
/// columns. The elision keeps per-frame output bounded on large
/// terminals and must stay.
pub fn render_truecolor(frame: &[u8], base_w: u32, base_h: u32, fit: &FitRect) -> Vec<u8> {
    debug_assert_eq!(frame.len(), (base_w * base_h * 3) as usize);

    let lines = fit.lines();
    let mut out = String::with_capacity(CURSOR_HOME.len() + usize::from(lines) * (usize::from(fit.cols) * 4 + 8));
    out.push_str(CURSOR_HOME);

    for line in 0..lines {
        if line < fit.pad_y || line >= fit.pad_y + fit.out_h {
            push_spaces(&mut out, fit.cols);
            out.push_str("\r\n");
            continue;
        }
        let row = u32::from(line - fit.pad_y);
        let src_y = nearest(row, base_h, u32::from(fit.out_h));

        push_spaces(&mut out, fit.pad_x);
        let mut previous: Option<(u8, u8, u8)> = None;
        for col in 0..u32::from(fit.out_w) {
            let src_x = nearest(col, base_w, u32::from(fit.out_w));
            let rgb = pixel_at(frame, base_w, src_x, src_y);
            if previous != Some(rgb) {
                let (r, g, b) = rgb;
                let _ = write!(out, "\x1b[48;2;{};{};{}m", r, g, b);
                previous = Some(rgb);
            }
            out.push(' ');
        }
        out.push_str("\x1b[0m");
        push_spaces(&mut out, fit.cols - fit.pad_x - fit.out_w);
        out.push_str("\r\n");
    }
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::{luma, render_ascii, render_truecolor, RAMP_LUT};
    use crate::geometry::fit;

    fn solid_frame(w: u32, h: u32, rgb: (u8, u8, u8)) -> Vec<u8> {
        let mut frame = Vec::with_capacity((w * h * 3) as usize);
        for _ in 0..w * h {
            frame.extend_from_slice(&[rgb.0, rgb.1, rgb.2]);
        }
        frame
    }

    #[test]
    fn ramp_lookup_is_monotonic_in_luma() {
        for value in 1..256 {
            assert!(RAMP_LUT[value] >= RAMP_LUT[value - 1], "luma {value}");
        }
        assert_eq!(RAMP_LUT[0], b' ');
        assert_eq!(RAMP_LUT[255], b'@');
    }

    #[test]
    fn luma_matches_integer_weights() {
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 255, 255), 255);
        // Green dominates the approximation.
        assert!(luma(0, 255, 0) > luma(255, 0, 0));
        assert!(luma(255, 0, 0) > luma(0, 0, 255));
    }

    #[test]
    fn ascii_block_has_exact_line_grid() {
        let rect = fit(30, 12, 8, 8, 2.0);
        let frame = solid_frame(8, 8, (128, 128, 128));
        let block = render_ascii(&frame, 8, 8, &rect);
        let text = String::from_utf8(block).unwrap();
        let body = text.strip_prefix("\x1b[H").unwrap();

        let lines: Vec<&str> = body.split_terminator("\r\n").collect();
        assert_eq!(lines.len(), usize::from(rect.rows - 1));
        for line in &lines {
            assert_eq!(line.len(), usize::from(rect.cols));
        }
    }

    #[test]
    fn ascii_letterbox_is_blank_and_content_is_ramped() {
        let rect = fit(30, 12, 8, 8, 2.0);
        let frame = solid_frame(8, 8, (255, 255, 255));
        let text = String::from_utf8(render_ascii(&frame, 8, 8, &rect)).unwrap();
        let body = text.strip_prefix("\x1b[H").unwrap();
        let lines: Vec<&str> = body.split_terminator("\r\n").collect();

        for (index, line) in lines.iter().enumerate() {
            let index = index as u16;
            if index < rect.pad_y || index >= rect.pad_y + rect.out_h {
                assert!(line.chars().all(|c| c == ' '), "line {index} not blank");
            } else {
                let content =
                    &line[usize::from(rect.pad_x)..usize::from(rect.pad_x + rect.out_w)];
                assert!(content.chars().all(|c| c == '@'), "line {index}: {content:?}");
            }
        }
    }

    #[test]
    fn truecolor_elides_repeated_colors() {
        let rect = fit(20, 6, 4, 4, 2.0);
        let frame = solid_frame(4, 4, (10, 20, 30));
        let text = String::from_utf8(render_truecolor(&frame, 4, 4, &rect)).unwrap();

        // One background escape per content line, not per column.
        let escapes = text.matches("\x1b[48;2;10;20;30m").count();
        assert_eq!(escapes, usize::from(rect.out_h));
        let resets = text.matches("\x1b[0m").count();
        assert_eq!(resets, usize::from(rect.out_h));
    }

    #[test]
    fn truecolor_emits_escape_on_every_color_change() {
        // Two-column frame, alternating colors on each row.
        let mut frame = Vec::new();
        for _ in 0..2 {
            frame.extend_from_slice(&[255, 0, 0]);
            frame.extend_from_slice(&[0, 0, 255]);
        }
        let rect = fit(2, 3, 2, 2, 1.0);
        assert_eq!((rect.out_w, rect.out_h), (2, 2));
        let text = String::from_utf8(render_truecolor(&frame, 2, 2, &rect)).unwrap();
        assert_eq!(text.matches("\x1b[48;2;255;0;0m").count(), 2);
        assert_eq!(text.matches("\x1b[48;2;0;0;255m").count(), 2);
    }

    #[test]
    fn output_homes_cursor_instead_of_clearing() {
        let rect = fit(10, 4, 4, 4, 2.0);
        let frame = solid_frame(4, 4, (0, 0, 0));
        for block in [
            render_ascii(&frame, 4, 4, &rect),
            render_truecolor(&frame, 4, 4, &rect),
        ] {
            assert!(block.starts_with(b"\x1b[H"));
            assert!(!block.windows(4).any(|w| w == b"\x1b[2J"));
        }
    }
}
