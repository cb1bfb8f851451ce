//! Pure calculation functions for letterbox dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Calculate "contain" dimensions: shrink `source` to fit inside `target`.
///
/// Shrink-only thumbnail semantics. An original that already fits is kept
/// at its own size. Otherwise the width is fitted first, then the height,
/// with integer truncation and a 1px floor on each axis.
///
/// # Examples
/// ```
/// # use thumbcache::imaging::calculate_contain_dimensions;
/// // 400x300 into a 200x200 box → 200x150
/// assert_eq!(calculate_contain_dimensions((400, 300), (200, 200)), (200, 150));
///
/// // Already fits → untouched
/// assert_eq!(calculate_contain_dimensions((100, 50), (200, 200)), (100, 50));
/// ```
pub fn calculate_contain_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (max_w, max_h) = target;

    if max_w >= src_w && max_h >= src_h {
        return source;
    }

    let (mut w, mut h) = (src_w as u64, src_h as u64);

    if w > max_w as u64 {
        h = (h * max_w as u64 / w).max(1);
        w = max_w as u64;
    }
    if h > max_h as u64 {
        w = (w * max_h as u64 / h).max(1);
        h = max_h as u64;
    }

    (w as u32, h as u32)
}

/// Whether a resize is a genuine downscale whose aspect ratio already matches the box.
///
/// Both target edges must be strictly smaller than the original's, and
/// scaling the original height by `target_w / src_w` must land within half a
/// pixel of `target_h`. When true, the resized raster is returned without
/// padding even if truncation left it a pixel short.
pub fn is_scaled_downsize(source: (u32, u32), target: (u32, u32)) -> bool {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    if tgt_w >= src_w || tgt_h >= src_h {
        return false;
    }

    let scaled_height = src_h as f64 * tgt_w as f64 / src_w as f64;
    (scaled_height + 0.5).floor() as u64 == tgt_h as u64
}

/// Top-left position of the resized raster on a `target` canvas.
///
/// Centered on both axes with integer division. An axis where the raster is
/// larger than the canvas gets offset 0 (clipped flush, never pushed off-canvas).
pub fn calculate_center_offset(resized: (u32, u32), target: (u32, u32)) -> (i64, i64) {
    let x = ((target.0 as i64 - resized.0 as i64) / 2).max(0);
    let y = ((target.1 as i64 - resized.1 as i64) / 2).max(0);
    (x, y)
}
