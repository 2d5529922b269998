//! 2D raster surface backed by an RGBA image.

use image::{Rgba, RgbaImage};

/// Affine transform restricted to translation and scaling. Rotation is
/// applied at draw time on the GPU, never during rasterization.
#[derive(Debug, Clone, Copy)]
struct Transform2 {
    tx: f32,
    ty: f32,
    sx: f32,
    sy: f32,
}

impl Transform2 {
    const IDENTITY: Transform2 = Transform2 {
        tx: 0.0,
        ty: 0.0,
        sx: 1.0,
        sy: 1.0,
    };

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (self.tx + self.sx * x, self.ty + self.sy * y)
    }
}

/// CPU raster canvas with a canvas-style transform stack.
///
/// Paint callbacks draw in their element's coordinate space; the atlas sets
/// up the transform so pixels land in the entry's destination region.
pub struct Surface {
    image: RgbaImage,
    current: Transform2,
    stack: Vec<Transform2>,
    scratch: bool,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            current: Transform2::IDENTITY,
            stack: Vec::new(),
            scratch: false,
        }
    }

    /// Create a scratch surface. Scratch surfaces are borrowed transiently
    /// and must be cleared by the borrower before painting.
    pub fn scratch(width: u32, height: u32) -> Self {
        Self {
            scratch: true,
            ..Self::new(width, height)
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_scratch(&self) -> bool {
        self.scratch
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Push the current transform state
    pub fn save(&mut self) {
        self.stack.push(self.current);
    }

    /// Pop back to the previously saved transform state
    pub fn restore(&mut self) {
        if let Some(prev) = self.stack.pop() {
            self.current = prev;
        } else {
            self.current = Transform2::IDENTITY;
        }
    }

    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.current.tx += self.current.sx * dx;
        self.current.ty += self.current.sy * dy;
    }

    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.current.sx *= sx;
        self.current.sy *= sy;
    }

    /// Reset every pixel to transparent black
    pub fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    /// Fill an axis-aligned rectangle, given in the current transform's
    /// coordinate space, with source-over compositing.
    pub fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: [u8; 4]) {
        let (x0, y0) = self.current.apply(x, y);
        let (x1, y1) = self.current.apply(x + w, y + h);

        let px0 = x0.min(x1).round().max(0.0) as u32;
        let py0 = y0.min(y1).round().max(0.0) as u32;
        let px1 = (x0.max(x1).round() as i64).clamp(0, self.image.width() as i64) as u32;
        let py1 = (y0.max(y1).round() as i64).clamp(0, self.image.height() as i64) as u32;

        for py in py0..py1 {
            for px in px0..px1 {
                let dst = *self.image.get_pixel(px, py);
                self.image.put_pixel(px, py, blend_over(Rgba(color), dst));
            }
        }
    }

    /// Copy a source sub-rectangle into a destination rectangle given in the
    /// current transform's coordinate space, scaling with nearest-neighbor
    /// sampling and source-over compositing.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_image(
        &mut self,
        source: &RgbaImage,
        sx: u32,
        sy: u32,
        sw: u32,
        sh: u32,
        dx: f32,
        dy: f32,
        dw: f32,
        dh: f32,
    ) {
        if sw == 0 || sh == 0 || dw <= 0.0 || dh <= 0.0 {
            return;
        }

        let (x0, y0) = self.current.apply(dx, dy);
        let (x1, y1) = self.current.apply(dx + dw, dy + dh);

        let dev_w = x1 - x0;
        let dev_h = y1 - y0;
        if dev_w <= 0.0 || dev_h <= 0.0 {
            return;
        }

        let px0 = x0.round().max(0.0) as u32;
        let py0 = y0.round().max(0.0) as u32;
        let px1 = (x1.round() as i64).clamp(0, self.image.width() as i64) as u32;
        let py1 = (y1.round() as i64).clamp(0, self.image.height() as i64) as u32;

        for py in py0..py1 {
            // Map the destination pixel center back into source space
            let v = ((py as f32 + 0.5 - y0) / dev_h).clamp(0.0, 1.0);
            let src_y = (sy + (v * sh as f32) as u32).min(sy + sh - 1);
            for px in px0..px1 {
                let u = ((px as f32 + 0.5 - x0) / dev_w).clamp(0.0, 1.0);
                let src_x = (sx + (u * sw as f32) as u32).min(sx + sw - 1);
                if src_x >= source.width() || src_y >= source.height() {
                    continue;
                }
                let src = *source.get_pixel(src_x, src_y);
                let dst = *self.image.get_pixel(px, py);
                self.image.put_pixel(px, py, blend_over(src, dst));
            }
        }
    }
}

/// Source-over compositing with straight alpha. Copies exactly when the
/// destination is fully transparent, so fresh canvases receive bit-identical
/// pixels.
fn blend_over(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    if dst[3] == 0 || src[3] == 255 {
        return src;
    }
    if src[3] == 0 {
        return dst;
    }

    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);

    let mut out = [0u8; 4];
    for i in 0..3 {
        let sc = src[i] as f32 / 255.0;
        let dc = dst[i] as f32 / 255.0;
        out[i] = (((sc * sa + dc * da * (1.0 - sa)) / out_a) * 255.0).round() as u8;
    }
    out[3] = (out_a * 255.0).round() as u8;
    Rgba(out)
}
