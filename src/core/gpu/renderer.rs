// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Renderer back-end
//!
//! The GPU front-end decodes primitives and hands them to a back-end
//! through this trait. Fill and blit semantics (wrapping, zero-size
//! meaning full extent, mask bits) are owned by the front-end; the
//! back-end gets clean rectangles. A back-end may batch draws, so the
//! front-end calls [`Renderer::sync`] before any VRAM read.
//!
//! The software back-end keeps a plain 1024x512 16-bit VRAM and a scanline
//! rasterizer for untextured primitives; how faithful a back-end is to the
//! shading/texturing details is its own business.

pub const VRAM_WIDTH: u32 = 1024;
pub const VRAM_HEIGHT: u32 = 512;

/// Decoded vertex with a 24-bit color
#[derive(Debug, Clone, Copy, Default)]
pub struct Vertex {
    pub x: i32,
    pub y: i32,
    pub color: u32,
    pub u: u8,
    pub v: u8,
}

/// A VRAM rectangle, already wrapped/normalized by the front-end
#[derive(Debug, Clone, Copy)]
pub struct VramRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Mask-bit behavior for writes
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskSettings {
    /// Force bit 15 on every written pixel
    pub set_mask: bool,
    /// Skip destination pixels whose bit 15 is set
    pub check_mask: bool,
}

/// Per-draw state the front-end resolved from the ENV registers
#[derive(Debug, Clone, Copy, Default)]
pub struct DrawOptions {
    pub gouraud: bool,
    pub textured: bool,
    pub semi_transparent: bool,
    pub mask: MaskSettings,
    /// Signed draw offset added to every vertex
    pub offset_x: i32,
    pub offset_y: i32,
    /// Inclusive draw-area clip
    pub clip_left: u32,
    pub clip_top: u32,
    pub clip_right: u32,
    pub clip_bottom: u32,
}

/// The command interface every renderer back-end implements
pub trait Renderer {
    fn draw_triangle(&mut self, vertices: &[Vertex; 3], opts: &DrawOptions);
    fn draw_line(&mut self, a: Vertex, b: Vertex, opts: &DrawOptions);
    /// Quick fill: ignores mask bits and the draw area
    fn fill_rect(&mut self, rect: VramRect, color: u32);
    fn cpu_vram_blit(&mut self, rect: VramRect, pixels: &[u16], mask: MaskSettings);
    fn vram_cpu_blit(&mut self, rect: VramRect) -> Vec<u16>;
    fn vram_vram_blit(&mut self, src: VramRect, dst: VramRect, mask: MaskSettings);
    /// Complete all in-flight draws before the next VRAM read
    fn sync(&mut self);
    /// The front-end changed scissor/offset/texpage state
    fn request_uniform_update(&mut self);
    /// Texture cache invalidation
    fn flush_textures(&mut self);
}

/// Convert a 24-bit BGR color to the 15-bit VRAM format
#[inline(always)]
fn color_to_15(color: u32) -> u16 {
    let r = (color & 0xFF) >> 3;
    let g = ((color >> 8) & 0xFF) >> 3;
    let b = ((color >> 16) & 0xFF) >> 3;
    (r | (g << 5) | (b << 10)) as u16
}

/// CPU-side software back-end over a plain VRAM array
pub struct SoftwareRenderer {
    vram: Vec<u16>,
}

impl SoftwareRenderer {
    pub fn new() -> Self {
        Self {
            vram: vec![0u16; (VRAM_WIDTH * VRAM_HEIGHT) as usize],
        }
    }

    #[inline(always)]
    fn index(x: u32, y: u32) -> usize {
        ((y & (VRAM_HEIGHT - 1)) * VRAM_WIDTH + (x & (VRAM_WIDTH - 1))) as usize
    }

    pub fn vram(&self) -> &[u16] {
        &self.vram
    }

    #[inline(always)]
    fn put(&mut self, x: u32, y: u32, pixel: u16, mask: MaskSettings) {
        let idx = Self::index(x, y);
        if mask.check_mask && self.vram[idx] & 0x8000 != 0 {
            return;
        }
        self.vram[idx] = if mask.set_mask { pixel | 0x8000 } else { pixel };
    }

    fn put_clipped(&mut self, x: i32, y: i32, pixel: u16, opts: &DrawOptions) {
        if x < opts.clip_left as i32
            || x > opts.clip_right as i32
            || y < opts.clip_top as i32
            || y > opts.clip_bottom as i32
        {
            return;
        }
        self.put(x as u32, y as u32, pixel, opts.mask);
    }
}

impl Default for SoftwareRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[inline(always)]
fn edge(a: (i32, i32), b: (i32, i32), p: (i32, i32)) -> i64 {
    (b.0 - a.0) as i64 * (p.1 - a.1) as i64 - (b.1 - a.1) as i64 * (p.0 - a.0) as i64
}

impl Renderer for SoftwareRenderer {
    fn draw_triangle(&mut self, vertices: &[Vertex; 3], opts: &DrawOptions) {
        let mut pts = [
            (vertices[0].x + opts.offset_x, vertices[0].y + opts.offset_y),
            (vertices[1].x + opts.offset_x, vertices[1].y + opts.offset_y),
            (vertices[2].x + opts.offset_x, vertices[2].y + opts.offset_y),
        ];
        let mut colors = [vertices[0].color, vertices[1].color, vertices[2].color];

        let mut area = edge(pts[0], pts[1], pts[2]);
        if area < 0 {
            pts.swap(1, 2);
            colors.swap(1, 2);
            area = -area;
        }
        if area == 0 {
            return;
        }
        let [a, b, c] = pts;

        let min_x = a.0.min(b.0).min(c.0).max(opts.clip_left as i32);
        let max_x = a.0.max(b.0).max(c.0).min(opts.clip_right as i32);
        let min_y = a.1.min(b.1).min(c.1).max(opts.clip_top as i32);
        let max_y = a.1.max(b.1).max(c.1).min(opts.clip_bottom as i32);

        // Gouraud interpolates the vertex colors across the barycentric
        // weights; flat shading (and the textured fallback) takes the
        // first vertex color
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let p = (x, y);
                let w0 = edge(b, c, p);
                let w1 = edge(c, a, p);
                let w2 = edge(a, b, p);
                if w0 < 0 || w1 < 0 || w2 < 0 {
                    continue;
                }

                let color = if opts.gouraud {
                    let blend = |shift: u32| {
                        let c0 = ((colors[0] >> shift) & 0xFF) as i64;
                        let c1 = ((colors[1] >> shift) & 0xFF) as i64;
                        let c2 = ((colors[2] >> shift) & 0xFF) as i64;
                        ((c0 * w0 + c1 * w1 + c2 * w2) / area) as u32 & 0xFF
                    };
                    blend(0) | (blend(8) << 8) | (blend(16) << 16)
                } else {
                    colors[0]
                };

                self.put(x as u32, y as u32, color_to_15(color), opts.mask);
            }
        }
    }

    fn draw_line(&mut self, a: Vertex, b: Vertex, opts: &DrawOptions) {
        let (x0, y0) = (a.x + opts.offset_x, a.y + opts.offset_y);
        let (x1, y1) = (b.x + opts.offset_x, b.y + opts.offset_y);

        let steps = (x1 - x0).abs().max((y1 - y0).abs()).max(1);
        for i in 0..=steps {
            let x = x0 + (x1 - x0) * i / steps;
            let y = y0 + (y1 - y0) * i / steps;
            let color = if opts.gouraud {
                let blend = |shift: u32| {
                    let ca = ((a.color >> shift) & 0xFF) as i32;
                    let cb = ((b.color >> shift) & 0xFF) as i32;
                    ((ca + (cb - ca) * i / steps) as u32) & 0xFF
                };
                blend(0) | (blend(8) << 8) | (blend(16) << 16)
            } else {
                a.color
            };
            self.put_clipped(x, y, color_to_15(color), opts);
        }
    }

    fn fill_rect(&mut self, rect: VramRect, color: u32) {
        let pixel = color_to_15(color);
        for y in 0..rect.height {
            for x in 0..rect.width {
                let idx = Self::index(rect.x + x, rect.y + y);
                self.vram[idx] = pixel;
            }
        }
    }

    fn cpu_vram_blit(&mut self, rect: VramRect, pixels: &[u16], mask: MaskSettings) {
        let mut iter = pixels.iter();
        for y in 0..rect.height {
            for x in 0..rect.width {
                let Some(&pixel) = iter.next() else { return };
                self.put(rect.x + x, rect.y + y, pixel, mask);
            }
        }
    }

    fn vram_cpu_blit(&mut self, rect: VramRect) -> Vec<u16> {
        let mut out = Vec::with_capacity((rect.width * rect.height) as usize);
        for y in 0..rect.height {
            for x in 0..rect.width {
                out.push(self.vram[Self::index(rect.x + x, rect.y + y)]);
            }
        }
        out
    }

    fn vram_vram_blit(&mut self, src: VramRect, dst: VramRect, mask: MaskSettings) {
        for y in 0..dst.height.min(src.height) {
            for x in 0..dst.width.min(src.width) {
                let pixel = self.vram[Self::index(src.x + x, src.y + y)];
                self.put(dst.x + x, dst.y + y, pixel, mask);
            }
        }
    }

    fn sync(&mut self) {
        // Draws complete synchronously in this back-end
    }

    fn request_uniform_update(&mut self) {}

    fn flush_textures(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_clip() -> DrawOptions {
        DrawOptions {
            clip_right: VRAM_WIDTH - 1,
            clip_bottom: VRAM_HEIGHT - 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_fill_and_read_back() {
        let mut r = SoftwareRenderer::new();
        r.fill_rect(
            VramRect {
                x: 10,
                y: 20,
                width: 4,
                height: 2,
            },
            0x0000_00FF, // pure red
        );
        let data = r.vram_cpu_blit(VramRect {
            x: 10,
            y: 20,
            width: 4,
            height: 2,
        });
        assert_eq!(data.len(), 8);
        assert!(data.iter().all(|&p| p == 0x1F));
    }

    #[test]
    fn test_cpu_blit_respects_check_mask() {
        let mut r = SoftwareRenderer::new();
        let rect = VramRect {
            x: 0,
            y: 0,
            width: 2,
            height: 1,
        };
        r.cpu_vram_blit(rect, &[0x8001, 0x0002], MaskSettings::default());
        // Second pass may only overwrite the unmasked pixel
        r.cpu_vram_blit(
            rect,
            &[0x0003, 0x0004],
            MaskSettings {
                set_mask: false,
                check_mask: true,
            },
        );
        let data = r.vram_cpu_blit(rect);
        assert_eq!(data, vec![0x8001, 0x0004]);
    }

    #[test]
    fn test_set_mask_forces_bit15() {
        let mut r = SoftwareRenderer::new();
        let rect = VramRect {
            x: 5,
            y: 5,
            width: 1,
            height: 1,
        };
        r.cpu_vram_blit(
            rect,
            &[0x0001],
            MaskSettings {
                set_mask: true,
                check_mask: false,
            },
        );
        assert_eq!(r.vram_cpu_blit(rect), vec![0x8001]);
    }

    #[test]
    fn test_vram_vram_blit_copies() {
        let mut r = SoftwareRenderer::new();
        let src = VramRect {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
        };
        r.cpu_vram_blit(src, &[1, 2, 3, 4], MaskSettings::default());
        let dst = VramRect {
            x: 100,
            y: 200,
            width: 2,
            height: 2,
        };
        r.vram_vram_blit(src, dst, MaskSettings::default());
        assert_eq!(r.vram_cpu_blit(dst), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_flat_triangle_fills_interior() {
        let mut r = SoftwareRenderer::new();
        let verts = [
            Vertex {
                x: 0,
                y: 0,
                color: 0xFF,
                ..Default::default()
            },
            Vertex {
                x: 8,
                y: 0,
                color: 0xFF,
                ..Default::default()
            },
            Vertex {
                x: 0,
                y: 8,
                color: 0xFF,
                ..Default::default()
            },
        ];
        r.draw_triangle(&verts, &full_clip());
        // A point well inside the triangle is painted
        let inside = r.vram_cpu_blit(VramRect {
            x: 1,
            y: 1,
            width: 1,
            height: 1,
        });
        assert_eq!(inside[0], 0x1F);
        // A point outside stays black
        let outside = r.vram_cpu_blit(VramRect {
            x: 9,
            y: 9,
            width: 1,
            height: 1,
        });
        assert_eq!(outside[0], 0);
    }

    #[test]
    fn test_line_endpoints_painted() {
        let mut r = SoftwareRenderer::new();
        let a = Vertex {
            x: 3,
            y: 3,
            color: 0xFF,
            ..Default::default()
        };
        let b = Vertex {
            x: 7,
            y: 7,
            color: 0xFF,
            ..Default::default()
        };
        r.draw_line(a, b, &full_clip());
        for p in [(3, 3), (5, 5), (7, 7)] {
            let data = r.vram_cpu_blit(VramRect {
                x: p.0,
                y: p.1,
                width: 1,
                height: 1,
            });
            assert_eq!(data[0], 0x1F, "pixel {p:?}");
        }
    }
}
