//! Fits the fixed-resolution source frame onto an arbitrary terminal.
//!
//! Pure arithmetic; recomputed on every render because the client may
//! renegotiate its window size between frames.

/// Upper bound on negotiated terminal dimensions. Anything larger is a
/// hostile or broken client and gets clamped rather than trusted.
pub const MAX_TERM_DIM: u16 = 500;

/// Placement of the rendered block inside a destination terminal.
///
/// `rows` keeps the full destination height; renderers emit `rows - 1`
/// lines, leaving one spare row so exact-fit terminals never wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitRect {
    pub cols: u16,
    pub rows: u16,
    pub out_w: u16,
    pub out_h: u16,
    pub pad_x: u16,
    pub pad_y: u16,
}

impl FitRect {
    /// Number of text lines a renderer emits for this fit.
    pub fn lines(&self) -> u16 {
        self.rows - 1
    }
}

/// Compute the render rectangle for a `base_w` x `base_h` frame on a
/// `cols` x `rows` terminal whose cells are `char_aspect` times taller
/// than they are wide.
///
/// The block is as wide as the terminal allows while its height still
/// fits the usable rows, centered with integer padding; any odd padding
/// cell lands on the trailing side. Degenerates to 1x1 on pathological
/// terminals, never errors.
pub fn fit(cols: u16, rows: u16, base_w: u32, base_h: u32, char_aspect: f64) -> FitRect {
    let cols = cols.clamp(1, MAX_TERM_DIM);
    let rows = rows.clamp(2, MAX_TERM_DIM);
    let avail = u32::from(rows) - 1;

    // Rows of output produced per column of output.
    let target = (f64::from(base_h) / f64::from(base_w)) / char_aspect;

    let max_w = if target > 0.0 {
        (f64::from(avail) / target).floor() as u32
    } else {
        u32::from(cols)
    };
    let out_w = u32::from(cols).min(max_w.max(1));
    let out_h = ((out_w as f64 * target).floor() as u32).clamp(1, avail);

    let pad_x = (u32::from(cols) - out_w) / 2;
    let pad_y = (avail - out_h) / 2;

    FitRect {
        cols,
        rows,
        out_w: out_w as u16,
        out_h: out_h as u16,
        pad_x: pad_x as u16,
        pad_y: pad_y as u16,
    }
}
