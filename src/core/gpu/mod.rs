// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! GPU front-end
//!
//! A 16-word FIFO buffers GP0 commands behind a small state machine:
//! IDLE, accumulating a known-length command, consuming a CPU-to-VRAM
//! pixel stream, or serving a VRAM-to-CPU read through GPUREAD. GP1
//! carries the display control commands. Decoded primitives go to the
//! renderer back-end.
//!
//! Display timing: an HBlank event 1812 GPU clocks into each scanline and
//! a line-end event every 2560 clocks. Crossing the visible-to-blank
//! boundary fires the VBLANK interrupt and the frame flag the outer loop
//! watches. Timer 0 (dotclock) and timer 1 (HBlank) are driven from here.

pub mod renderer;

use std::collections::VecDeque;

use renderer::{
    DrawOptions, MaskSettings, Renderer, SoftwareRenderer, Vertex, VramRect, VRAM_HEIGHT,
    VRAM_WIDTH,
};

use crate::core::dma::{channel, DmaController};
use crate::core::interrupt::{Interrupt, InterruptController};
use crate::core::scheduler::{EventTarget, Scheduler};
use crate::core::timers::RootCounters;

/// GPU clocks from scanline start to horizontal blanking
pub const ACTIVE_CLOCKS: u64 = 1812;
/// GPU clocks per full scanline
pub const CLOCKS_SCANLINE: u64 = 2560;
/// NTSC frame height in scanlines
pub const SCANLINES_FRAME: u32 = 263;

const VISIBLE_LINE_START: u32 = 16;
const VISIBLE_LINE_END: u32 = 256;

/// Clocks per dot for the 256/320/368/512/640 horizontal modes
pub const DOT_CYCLES: [u16; 5] = [10, 8, 7, 5, 4];

const FIFO_DEPTH: usize = 16;

/// GP1(04h) DMA direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DmaDirection {
    #[default]
    Off,
    Fifo,
    CpuToGp0,
    GpureadToCpu,
}

impl DmaDirection {
    fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Self::Off,
            1 => Self::Fifo,
            2 => Self::CpuToGp0,
            _ => Self::GpureadToCpu,
        }
    }
}

/// What GPUREAD currently returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    None,
    Register,
    Vram,
}

/// GP0 pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandState {
    Idle,
    WaitingParams { remaining: u32 },
    Polyline { gouraud: bool },
    CpuVramBlit,
    VramCpuBlit,
}

/// GPUSTAT as named fields; `read_stat` packs the word
#[derive(Debug, Clone, Copy, Default)]
struct GpuStat {
    texture_page_x_base: u8,
    texture_page_y_base: bool,
    semi_transparency: u8,
    tex_page_colors: u8,
    dither: bool,
    draw_to_display: bool,
    set_mask: bool,
    check_mask: bool,
    interlace_field: bool,
    flip_screen_hoz: bool,
    texture_page_y_base2: bool,
    hoz_res_2: bool,
    hoz_res_1: u8,
    vertical_res: bool,
    video_mode_pal: bool,
    color_depth_24: bool,
    vertical_interlace: bool,
    display_disabled: bool,
    irq1: bool,
    dreq: bool,
    recv_cmd_word: bool,
    send_vram_cpu: bool,
    recv_dma: bool,
    dma_dir: DmaDirection,
    drawing_odd: bool,
}

/// GPUREAD latch sources written back verbatim by GP1(10h)
#[derive(Debug, Clone, Copy, Default)]
struct RawConfig {
    texpage: u32,
    tex_window: u32,
    draw_top_left: u32,
    draw_bottom_right: u32,
    draw_offset: u32,
}

/// An in-progress CPU to VRAM pixel stream
struct CpuBlit {
    rect: VramRect,
    pixels: Vec<u16>,
    total: usize,
}

/// The GPU front-end
pub struct Gpu {
    cmd_fifo: VecDeque<u32>,
    state: CommandState,
    stat: GpuStat,

    read_state: ReadState,
    read_latch: u32,
    vram_read: VecDeque<u16>,

    cpu_blit: Option<CpuBlit>,
    polyline_words: Vec<u32>,

    raw_conf: RawConfig,
    tex_x_flip: bool,
    tex_y_flip: bool,

    draw_left: u32,
    draw_top: u32,
    draw_right: u32,
    draw_bottom: u32,
    draw_x_off: i32,
    draw_y_off: i32,
    tex_window_mask_x: u32,
    tex_window_mask_y: u32,
    tex_window_off_x: u32,
    tex_window_off_y: u32,

    disp_x_start: u32,
    disp_y_start: u32,
    hoz_disp_start: u32,
    hoz_disp_end: u32,
    vert_disp_start: u32,
    vert_disp_end: u32,

    scanline: u32,
    vblank: bool,
    frame_flag: bool,

    renderer: Box<dyn Renderer>,
}

#[inline(always)]
fn sign11(value: u32) -> i32 {
    ((value & 0x7FF) as i32) << 21 >> 21
}

impl Gpu {
    pub fn new() -> Self {
        Self::with_renderer(Box::new(SoftwareRenderer::new()))
    }

    pub fn with_renderer(renderer: Box<dyn Renderer>) -> Self {
        Self {
            cmd_fifo: VecDeque::with_capacity(FIFO_DEPTH),
            state: CommandState::Idle,
            stat: GpuStat {
                dma_dir: DmaDirection::Off,
                display_disabled: true,
                ..Default::default()
            },
            read_state: ReadState::None,
            read_latch: 0,
            vram_read: VecDeque::new(),
            cpu_blit: None,
            polyline_words: Vec::new(),
            raw_conf: RawConfig::default(),
            tex_x_flip: false,
            tex_y_flip: false,
            draw_left: 0,
            draw_top: 0,
            draw_right: VRAM_WIDTH - 1,
            draw_bottom: VRAM_HEIGHT - 1,
            draw_x_off: 0,
            draw_y_off: 0,
            tex_window_mask_x: 0,
            tex_window_mask_y: 0,
            tex_window_off_x: 0,
            tex_window_off_y: 0,
            disp_x_start: 0,
            disp_y_start: 0,
            hoz_disp_start: 0,
            hoz_disp_end: 0,
            vert_disp_start: 0,
            vert_disp_end: 0,
            scanline: 0,
            vblank: false,
            frame_flag: false,
            renderer,
        }
    }

    /// Register the scanline events; called once at system construction
    pub fn init_events(&mut self, scheduler: &mut Scheduler) {
        scheduler.schedule(ACTIVE_CLOCKS, EventTarget::GpuHBlank);
        scheduler.schedule(CLOCKS_SCANLINE, EventTarget::GpuLineEnd);
    }

    /// Outer-loop VBlank flag, cleared on read
    pub fn take_vblank(&mut self) -> bool {
        std::mem::take(&mut self.frame_flag)
    }

    /// Display origin in VRAM (frontends blit the visible area from here)
    pub fn display_area(&self) -> (u32, u32) {
        (self.disp_x_start, self.disp_y_start)
    }

    /// Horizontal and vertical display ranges in GPU clocks/scanlines
    pub fn display_ranges(&self) -> ((u32, u32), (u32, u32)) {
        (
            (self.hoz_disp_start, self.hoz_disp_end),
            (self.vert_disp_start, self.vert_disp_end),
        )
    }

    /// Texture window (mask x/y, offset x/y) in 8-pixel units
    pub fn texture_window(&self) -> (u32, u32, u32, u32) {
        (
            self.tex_window_mask_x,
            self.tex_window_mask_y,
            self.tex_window_off_x,
            self.tex_window_off_y,
        )
    }

    /// Textured-rectangle flip bits from the texpage register
    pub fn texture_flip(&self) -> (bool, bool) {
        (self.tex_x_flip, self.tex_y_flip)
    }

    /// Read VRAM through the back-end (debug/tests)
    pub fn debug_read_vram(&mut self, x: u32, y: u32, width: u32, height: u32) -> Vec<u16> {
        self.renderer.sync();
        self.renderer.vram_cpu_blit(VramRect {
            x,
            y,
            width,
            height,
        })
    }

    // ------------------------------------------------------------------
    // GP0
    // ------------------------------------------------------------------

    pub fn write_gp0(&mut self, value: u32, dma: &mut DmaController) {
        match self.state {
            CommandState::Idle => self.command_start(value),
            CommandState::WaitingParams { remaining } => {
                if self.cmd_fifo.len() == FIFO_DEPTH {
                    log::warn!("[GPU] Command FIFO full!");
                    return;
                }
                self.cmd_fifo.push_back(value);
                if remaining == 1 {
                    self.command_end();
                } else {
                    self.state = CommandState::WaitingParams {
                        remaining: remaining - 1,
                    };
                }
            }
            CommandState::Polyline { gouraud } => {
                if value & 0xF000_F000 == 0x5000_5000 {
                    self.finish_polyline(gouraud);
                } else {
                    self.polyline_words.push(value);
                }
            }
            CommandState::CpuVramBlit => self.consume_blit_word(value),
            CommandState::VramCpuBlit => {
                log::error!("[GPU] GP0 write during VRAM-CPU read");
            }
        }

        self.update_dreq(dma);
    }

    /// GP0 word arriving over DMA channel 2
    pub fn dma_write_gp0(&mut self, value: u32, dma: &mut DmaController) {
        self.write_gp0(value, dma);
    }

    fn command_start(&mut self, cmd: u32) {
        self.stat.recv_cmd_word = false;
        self.stat.recv_dma = false;

        match (cmd >> 29) & 0x7 {
            0 => self.misc_command(cmd),
            1 => {
                // Polygon: 3/4 vertices, optional texture and shading
                let quad = (cmd >> 27) & 1 != 0;
                let textured = (cmd >> 26) & 1 != 0;
                let gouraud = (cmd >> 28) & 1 != 0;

                let vertices = if quad { 4 } else { 3 };
                let per_vertex = 1 + textured as u32 + gouraud as u32;
                // The first color rides in the command word
                let params = vertices * per_vertex - gouraud as u32;

                self.cmd_fifo.push_back(cmd);
                self.state = CommandState::WaitingParams { remaining: params };
            }
            2 => {
                let gouraud = (cmd >> 28) & 1 != 0;
                let polyline = (cmd >> 27) & 1 != 0;

                self.cmd_fifo.push_back(cmd);
                if polyline {
                    self.polyline_words.clear();
                    self.state = CommandState::Polyline { gouraud };
                } else {
                    let words_per_vertex = if gouraud { 2 } else { 1 };
                    self.state = CommandState::WaitingParams {
                        remaining: words_per_vertex * 2 - gouraud as u32,
                    };
                }
            }
            3 => {
                let size_variant = (cmd >> 27) & 3;
                let textured = (cmd >> 26) & 1 != 0;
                let params = 1 + (size_variant == 0) as u32 + textured as u32;

                self.cmd_fifo.push_back(cmd);
                self.state = CommandState::WaitingParams { remaining: params };
            }
            4 => {
                self.cmd_fifo.push_back(cmd);
                self.state = CommandState::WaitingParams { remaining: 3 };
            }
            5 => {
                self.cmd_fifo.push_back(cmd);
                self.state = CommandState::WaitingParams { remaining: 2 };
            }
            6 => {
                self.cmd_fifo.push_back(cmd);
                self.state = CommandState::WaitingParams { remaining: 2 };
            }
            _ => self.env_command(cmd),
        }
    }

    fn misc_command(&mut self, cmd: u32) {
        match cmd >> 24 {
            0x00 | 0x03 => {}
            0x01 => {
                self.renderer.sync();
                self.renderer.flush_textures();
            }
            0x02 => {
                // Quick fill needs top-left + size
                self.cmd_fifo.push_back(cmd);
                self.state = CommandState::WaitingParams { remaining: 2 };
            }
            other => log::error!("[GPU] Unimplemented MISC command 0x{:02X}", other),
        }
    }

    fn command_end(&mut self) {
        let Some(&cmd) = self.cmd_fifo.front() else {
            log::error!("[GPU] Command end with empty FIFO");
            return;
        };

        self.state = CommandState::Idle;

        match (cmd >> 29) & 0x7 {
            0 => self.exec_quick_fill(),
            1 => self.exec_polygon(),
            2 => self.exec_line(),
            3 => self.exec_rectangle(),
            4 => self.exec_vram_vram_blit(),
            5 => self.exec_cpu_vram_blit(),
            6 => self.exec_vram_cpu_blit(),
            _ => log::error!("[GPU] ENV command left in FIFO"),
        }
    }

    fn draw_options(&self, cmd: u32, gouraud: bool, textured: bool) -> DrawOptions {
        DrawOptions {
            gouraud,
            textured,
            semi_transparent: (cmd >> 25) & 1 != 0,
            mask: MaskSettings {
                set_mask: self.stat.set_mask,
                check_mask: self.stat.check_mask,
            },
            offset_x: self.draw_x_off,
            offset_y: self.draw_y_off,
            clip_left: self.draw_left,
            clip_top: self.draw_top,
            clip_right: self.draw_right,
            clip_bottom: self.draw_bottom,
        }
    }

    fn exec_quick_fill(&mut self) {
        let cmd = self.cmd_fifo.pop_front().unwrap_or(0);
        let top_left = self.cmd_fifo.pop_front().unwrap_or(0);
        let size = self.cmd_fifo.pop_front().unwrap_or(0);

        // Fill coordinates snap to 16-pixel steps horizontally
        let x = (top_left & 0x3F0) & (VRAM_WIDTH - 1);
        let y = ((top_left >> 16) & 0x1FF) & (VRAM_HEIGHT - 1);
        let width = (((size & 0x3FF) + 0xF) & !0xF).min(VRAM_WIDTH - x);
        let height = ((size >> 16) & 0x1FF).min(VRAM_HEIGHT - y);

        self.renderer.fill_rect(
            VramRect {
                x,
                y,
                width,
                height,
            },
            cmd & 0xFF_FFFF,
        );
    }

    fn exec_polygon(&mut self) {
        let cmd = self.cmd_fifo.pop_front().unwrap_or(0);
        let quad = (cmd >> 27) & 1 != 0;
        let textured = (cmd >> 26) & 1 != 0;
        let gouraud = (cmd >> 28) & 1 != 0;

        let count = if quad { 4 } else { 3 };
        let mut vertices = [Vertex::default(); 4];

        for (index, vertex) in vertices.iter_mut().take(count).enumerate() {
            let color = if gouraud && index > 0 {
                self.cmd_fifo.pop_front().unwrap_or(0)
            } else {
                cmd
            } & 0xFF_FFFF;

            let xy = self.cmd_fifo.pop_front().unwrap_or(0);
            let (u, v) = if textured {
                let uv = self.cmd_fifo.pop_front().unwrap_or(0);
                ((uv & 0xFF) as u8, ((uv >> 8) & 0xFF) as u8)
            } else {
                (0, 0)
            };

            *vertex = Vertex {
                x: sign11(xy),
                y: sign11(xy >> 16),
                color,
                u,
                v,
            };
        }

        let opts = self.draw_options(cmd, gouraud, textured);
        self.renderer
            .draw_triangle(&[vertices[0], vertices[1], vertices[2]], &opts);
        if quad {
            self.renderer
                .draw_triangle(&[vertices[1], vertices[2], vertices[3]], &opts);
        }
    }

    fn exec_line(&mut self) {
        let cmd = self.cmd_fifo.pop_front().unwrap_or(0);
        let gouraud = (cmd >> 28) & 1 != 0;

        let first_color = cmd & 0xFF_FFFF;
        let xy0 = self.cmd_fifo.pop_front().unwrap_or(0);
        let second_color = if gouraud {
            self.cmd_fifo.pop_front().unwrap_or(0) & 0xFF_FFFF
        } else {
            first_color
        };
        let xy1 = self.cmd_fifo.pop_front().unwrap_or(0);

        let opts = self.draw_options(cmd, gouraud, false);
        self.renderer.draw_line(
            Vertex {
                x: sign11(xy0),
                y: sign11(xy0 >> 16),
                color: first_color,
                u: 0,
                v: 0,
            },
            Vertex {
                x: sign11(xy1),
                y: sign11(xy1 >> 16),
                color: second_color,
                u: 0,
                v: 0,
            },
            &opts,
        );
    }

    fn finish_polyline(&mut self, gouraud: bool) {
        let cmd = self.cmd_fifo.pop_front().unwrap_or(0);
        self.state = CommandState::Idle;

        let opts = self.draw_options(cmd, gouraud, false);
        let words = std::mem::take(&mut self.polyline_words);

        let mut prev_color = cmd & 0xFF_FFFF;
        let mut prev_xy: Option<u32> = None;
        let mut iter = words.into_iter();

        loop {
            let color = if gouraud && prev_xy.is_some() {
                match iter.next() {
                    Some(word) => word & 0xFF_FFFF,
                    None => break,
                }
            } else {
                prev_color
            };
            let Some(xy) = iter.next() else { break };

            if let Some(last) = prev_xy {
                self.renderer.draw_line(
                    Vertex {
                        x: sign11(last),
                        y: sign11(last >> 16),
                        color: prev_color,
                        u: 0,
                        v: 0,
                    },
                    Vertex {
                        x: sign11(xy),
                        y: sign11(xy >> 16),
                        color,
                        u: 0,
                        v: 0,
                    },
                    &opts,
                );
            }
            prev_xy = Some(xy);
            prev_color = color;
        }
    }

    fn exec_rectangle(&mut self) {
        let cmd = self.cmd_fifo.pop_front().unwrap_or(0);
        let size_variant = (cmd >> 27) & 3;
        let textured = (cmd >> 26) & 1 != 0;

        let xy = self.cmd_fifo.pop_front().unwrap_or(0);
        if textured {
            // CLUT + UV word; the software back-end draws texture-less
            let _uv = self.cmd_fifo.pop_front();
        }
        let (width, height) = match size_variant {
            1 => (1, 1),
            2 => (8, 8),
            3 => (16, 16),
            _ => {
                let wh = self.cmd_fifo.pop_front().unwrap_or(0);
                (wh & 0x3FF, (wh >> 16) & 0x1FF)
            }
        };

        let x = sign11(xy);
        let y = sign11(xy >> 16);
        let opts = self.draw_options(cmd, false, textured);

        // A rectangle is an axis-aligned pair of triangles
        let corners = [
            Vertex {
                x,
                y,
                color: cmd & 0xFF_FFFF,
                u: 0,
                v: 0,
            },
            Vertex {
                x: x + width as i32,
                y,
                color: cmd & 0xFF_FFFF,
                u: 0,
                v: 0,
            },
            Vertex {
                x,
                y: y + height as i32,
                color: cmd & 0xFF_FFFF,
                u: 0,
                v: 0,
            },
            Vertex {
                x: x + width as i32,
                y: y + height as i32,
                color: cmd & 0xFF_FFFF,
                u: 0,
                v: 0,
            },
        ];
        self.renderer
            .draw_triangle(&[corners[0], corners[1], corners[2]], &opts);
        self.renderer
            .draw_triangle(&[corners[1], corners[2], corners[3]], &opts);
    }

    /// Wrap a blit origin/size the way the hardware does: origins wrap,
    /// zero sizes mean the full extent
    fn normalize_rect(source: u32, size: u32) -> VramRect {
        let x = (source & 0xFFFF) & (VRAM_WIDTH - 1);
        let y = ((source >> 16) & 0xFFFF) & (VRAM_HEIGHT - 1);

        let w = size & 0xFFFF;
        let h = (size >> 16) & 0xFFFF;
        let width = if w == 0 {
            VRAM_WIDTH
        } else {
            ((w - 1) & (VRAM_WIDTH - 1)) + 1
        };
        let height = if h == 0 {
            VRAM_HEIGHT
        } else {
            ((h - 1) & (VRAM_HEIGHT - 1)) + 1
        };

        VramRect {
            x,
            y,
            width,
            height,
        }
    }

    fn exec_vram_vram_blit(&mut self) {
        let _cmd = self.cmd_fifo.pop_front();
        let src = self.cmd_fifo.pop_front().unwrap_or(0);
        let dst = self.cmd_fifo.pop_front().unwrap_or(0);
        let size = self.cmd_fifo.pop_front().unwrap_or(0);

        let src_rect = Self::normalize_rect(src, size);
        let dst_rect = Self::normalize_rect(dst, size);

        self.renderer.vram_vram_blit(
            src_rect,
            dst_rect,
            MaskSettings {
                set_mask: self.stat.set_mask,
                check_mask: self.stat.check_mask,
            },
        );
    }

    fn exec_cpu_vram_blit(&mut self) {
        let _cmd = self.cmd_fifo.pop_front();
        let dest = self.cmd_fifo.pop_front().unwrap_or(0);
        let size = self.cmd_fifo.pop_front().unwrap_or(0);

        let rect = Self::normalize_rect(dest, size);
        let total = (rect.width * rect.height) as usize;

        self.cpu_blit = Some(CpuBlit {
            rect,
            pixels: Vec::with_capacity(total + 1),
            total,
        });
        self.state = CommandState::CpuVramBlit;
    }

    fn consume_blit_word(&mut self, word: u32) {
        let Some(blit) = self.cpu_blit.as_mut() else {
            return;
        };

        blit.pixels.push(word as u16);
        blit.pixels.push((word >> 16) as u16);

        if blit.pixels.len() >= blit.total {
            let Some(blit) = self.cpu_blit.take() else {
                return;
            };
            self.renderer.cpu_vram_blit(
                blit.rect,
                &blit.pixels[..blit.total],
                MaskSettings {
                    set_mask: self.stat.set_mask,
                    check_mask: self.stat.check_mask,
                },
            );
            self.state = CommandState::Idle;
        }
    }

    fn exec_vram_cpu_blit(&mut self) {
        let _cmd = self.cmd_fifo.pop_front();
        let source = self.cmd_fifo.pop_front().unwrap_or(0);
        let size = self.cmd_fifo.pop_front().unwrap_or(0);

        let rect = Self::normalize_rect(source, size);

        self.renderer.sync();
        self.vram_read = self.renderer.vram_cpu_blit(rect).into();
        self.read_state = ReadState::Vram;
        self.state = CommandState::VramCpuBlit;
    }

    // ------------------------------------------------------------------
    // ENV commands (GP0 0xE1..0xE6)
    // ------------------------------------------------------------------

    fn env_command(&mut self, cmd: u32) {
        match cmd >> 24 {
            0xE1 => self.env_texpage(cmd),
            0xE2 => self.env_tex_window(cmd),
            0xE3 => self.env_draw_area_top_left(cmd),
            0xE4 => self.env_draw_area_bottom_right(cmd),
            0xE5 => self.env_draw_offset(cmd),
            0xE6 => self.env_mask_setting(cmd),
            other => log::error!("[GPU] Unimplemented ENV command 0x{:02X}", other),
        }
    }

    fn env_texpage(&mut self, cmd: u32) {
        let cmd = cmd & 0x3FFF;
        if cmd == self.raw_conf.texpage {
            return;
        }
        self.renderer.sync();
        self.raw_conf.texpage = cmd;

        self.stat.texture_page_x_base = (cmd & 0xF) as u8;
        self.stat.texture_page_y_base = (cmd >> 4) & 1 != 0;
        self.stat.semi_transparency = ((cmd >> 5) & 3) as u8;
        self.stat.tex_page_colors = ((cmd >> 7) & 3) as u8;
        self.stat.dither = (cmd >> 9) & 1 != 0;
        self.stat.draw_to_display = (cmd >> 10) & 1 != 0;
        self.stat.texture_page_y_base2 = (cmd >> 11) & 1 != 0;
        self.tex_x_flip = (cmd >> 12) & 1 != 0;
        self.tex_y_flip = (cmd >> 13) & 1 != 0;

        self.renderer.request_uniform_update();
    }

    fn env_tex_window(&mut self, cmd: u32) {
        let cmd = cmd & 0xF_FFFF;
        if cmd == self.raw_conf.tex_window {
            return;
        }
        self.renderer.sync();
        self.raw_conf.tex_window = cmd;

        self.tex_window_mask_x = cmd & 0x1F;
        self.tex_window_mask_y = (cmd >> 5) & 0x1F;
        self.tex_window_off_x = (cmd >> 10) & 0x1F;
        self.tex_window_off_y = (cmd >> 15) & 0x1F;

        self.renderer.request_uniform_update();
    }

    fn env_draw_area_top_left(&mut self, cmd: u32) {
        let cmd = cmd & 0xF_FFFF;
        if cmd == self.raw_conf.draw_top_left {
            return;
        }
        self.renderer.sync();
        self.raw_conf.draw_top_left = cmd;

        self.draw_left = cmd & 1023;
        self.draw_top = (cmd >> 10) & 511;
        self.renderer.request_uniform_update();
    }

    fn env_draw_area_bottom_right(&mut self, cmd: u32) {
        let cmd = cmd & 0xF_FFFF;
        if cmd == self.raw_conf.draw_bottom_right {
            return;
        }
        self.renderer.sync();
        self.raw_conf.draw_bottom_right = cmd;

        self.draw_right = cmd & 1023;
        self.draw_bottom = (cmd >> 10) & 511;
        self.renderer.request_uniform_update();
    }

    fn env_draw_offset(&mut self, cmd: u32) {
        let cmd = cmd & 0x1F_FFFF;
        if cmd == self.raw_conf.draw_offset {
            return;
        }
        self.renderer.sync();
        self.raw_conf.draw_offset = cmd;

        self.draw_x_off = sign11(cmd);
        self.draw_y_off = sign11(cmd >> 11);
        self.renderer.request_uniform_update();
    }

    fn env_mask_setting(&mut self, cmd: u32) {
        self.renderer.sync();
        self.stat.set_mask = cmd & 1 != 0;
        self.stat.check_mask = (cmd >> 1) & 1 != 0;
        self.renderer.request_uniform_update();
    }

    // ------------------------------------------------------------------
    // GP1 and GPUREAD
    // ------------------------------------------------------------------

    pub fn write_gp1(
        &mut self,
        value: u32,
        dma: &mut DmaController,
        timers: &mut RootCounters,
        scheduler: &mut Scheduler,
    ) {
        match (value >> 24) & 0xFF {
            0x00 => self.gp1_reset(timers, scheduler),
            0x01 => self.cmd_fifo.clear(),
            0x02 => self.stat.irq1 = false,
            0x03 => self.stat.display_disabled = value & 1 != 0,
            0x04 => self.stat.dma_dir = DmaDirection::from_bits(value),
            0x05 => {
                self.disp_x_start = value & 1023;
                self.disp_y_start = (value >> 10) & 511;
            }
            0x06 => {
                self.hoz_disp_start = value & 0xFFF;
                self.hoz_disp_end = (value >> 12) & 0xFFF;
            }
            0x07 => {
                self.vert_disp_start = value & 0x3FF;
                self.vert_disp_end = (value >> 10) & 0x3FF;
            }
            0x08 => self.gp1_display_mode(value, timers, scheduler),
            0x10..=0x1F => self.gp1_read_internal(value),
            other => log::error!("[GPU] Unimplemented GP1 command 0x{:02X}", other),
        }

        self.update_dreq(dma);
    }

    fn gp1_reset(&mut self, timers: &mut RootCounters, scheduler: &mut Scheduler) {
        self.cmd_fifo.clear();
        self.stat.irq1 = false;
        self.stat.display_disabled = true;
        self.stat.dma_dir = DmaDirection::Off;
        self.disp_x_start = 0;
        self.disp_y_start = 0;

        // Boot display window: 256x240 NTSC centered
        self.hoz_disp_start = 0x200;
        self.hoz_disp_end = 0x200 + 256 * 10;
        self.vert_disp_start = 0x10;
        self.vert_disp_end = 0x10 + 240;

        self.gp1_display_mode(0, timers, scheduler);
    }

    fn gp1_display_mode(
        &mut self,
        value: u32,
        timers: &mut RootCounters,
        scheduler: &mut Scheduler,
    ) {
        self.stat.hoz_res_1 = (value & 3) as u8;
        self.stat.vertical_res = (value >> 2) & 1 != 0;
        self.stat.video_mode_pal = (value >> 3) & 1 != 0;
        self.stat.color_depth_24 = (value >> 4) & 1 != 0;
        self.stat.vertical_interlace = (value >> 5) & 1 != 0;
        self.stat.hoz_res_2 = (value >> 6) & 1 != 0;
        self.stat.flip_screen_hoz = (value >> 7) & 1 != 0;

        let dot_sel = if self.stat.hoz_res_2 {
            2
        } else {
            match self.stat.hoz_res_1 {
                0 => 0,
                1 => 1,
                2 => 3,
                _ => 4,
            }
        };
        timers.set_dotclock(dot_sel, scheduler);
    }

    fn gp1_read_internal(&mut self, value: u32) {
        match value & 0x7 {
            0x2 => self.read_latch = self.raw_conf.tex_window,
            0x3 => self.read_latch = self.raw_conf.draw_top_left,
            0x4 => self.read_latch = self.raw_conf.draw_bottom_right,
            0x5 => self.read_latch = self.raw_conf.draw_offset,
            0x6 | 0x7 => {
                // GPU version: v0
            }
            _ => return,
        }
        self.read_state = ReadState::Register;
    }

    /// GPUREAD
    pub fn read_data(&mut self) -> u32 {
        match self.read_state {
            ReadState::Register => self.read_latch,
            ReadState::Vram => {
                let lo = self.vram_read.pop_front().unwrap_or(0) as u32;
                let hi = self.vram_read.pop_front().unwrap_or(0) as u32;
                if self.vram_read.is_empty() {
                    self.read_state = ReadState::None;
                    self.state = CommandState::Idle;
                }
                lo | (hi << 16)
            }
            ReadState::None => 0,
        }
    }

    /// GPUREAD word leaving over DMA channel 2
    pub fn dma_read_gpuread(&mut self) -> u32 {
        self.read_data()
    }

    /// GPUSTAT
    pub fn read_stat(&mut self, dma: &mut DmaController) -> u32 {
        if !self.stat.vertical_interlace {
            self.stat.interlace_field = true;
        }
        self.update_dreq(dma);

        let s = &self.stat;
        (s.texture_page_x_base as u32 & 0xF)
            | (u32::from(s.texture_page_y_base) << 4)
            | ((s.semi_transparency as u32) << 5)
            | ((s.tex_page_colors as u32) << 7)
            | (u32::from(s.dither) << 9)
            | (u32::from(s.draw_to_display) << 10)
            | (u32::from(s.set_mask) << 11)
            | (u32::from(s.check_mask) << 12)
            | (u32::from(s.interlace_field) << 13)
            | (u32::from(s.flip_screen_hoz) << 14)
            | (u32::from(s.texture_page_y_base2) << 15)
            | (u32::from(s.hoz_res_2) << 16)
            | ((s.hoz_res_1 as u32) << 17)
            | (u32::from(s.vertical_res) << 19)
            | (u32::from(s.video_mode_pal) << 20)
            | (u32::from(s.color_depth_24) << 21)
            | (u32::from(s.vertical_interlace) << 22)
            | (u32::from(s.display_disabled) << 23)
            | (u32::from(s.irq1) << 24)
            | (u32::from(s.dreq) << 25)
            | (u32::from(s.recv_cmd_word) << 26)
            | (u32::from(s.send_vram_cpu) << 27)
            | (u32::from(s.recv_dma) << 28)
            | ((s.dma_dir as u32) << 29)
            | (u32::from(s.drawing_odd) << 31)
    }

    /// Recompute readiness bits and drive the DMA request line
    fn update_dreq(&mut self, dma: &mut DmaController) {
        self.stat.recv_dma = matches!(
            self.state,
            CommandState::Idle | CommandState::WaitingParams { .. }
        );
        self.stat.recv_cmd_word = self.state == CommandState::Idle;
        self.stat.send_vram_cpu = self.state == CommandState::VramCpuBlit;

        self.stat.dreq = match self.stat.dma_dir {
            DmaDirection::Off => false,
            DmaDirection::Fifo => self.cmd_fifo.len() < FIFO_DEPTH,
            DmaDirection::CpuToGp0 => self.stat.recv_dma,
            DmaDirection::GpureadToCpu => self.stat.send_vram_cpu,
        };

        dma.set_dreq(channel::GPU, self.stat.dreq);
    }

    // ------------------------------------------------------------------
    // Display timing
    // ------------------------------------------------------------------

    /// Horizontal blanking starts 1812 clocks into the scanline
    pub fn hblank(&mut self, cycles_late: u64, scheduler: &mut Scheduler, timers: &mut RootCounters) {
        timers.hblank(scheduler);
        scheduler.schedule(
            CLOCKS_SCANLINE.saturating_sub(cycles_late),
            EventTarget::GpuHBlank,
        );
    }

    /// End of scanline: advance the counter, detect the VBlank boundary
    pub fn line_end(
        &mut self,
        cycles_late: u64,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
        timers: &mut RootCounters,
    ) {
        timers.hblank_end(scheduler);

        if self.stat.vertical_interlace && !self.stat.vertical_res && !self.vblank {
            self.stat.drawing_odd = !self.stat.drawing_odd;
        }

        let prev = self.scanline;
        self.scanline = (self.scanline + 1) % SCANLINES_FRAME;

        let visible = |line: u32| (VISIBLE_LINE_START..=VISIBLE_LINE_END).contains(&line);

        if !visible(self.scanline) && visible(prev) {
            // Entering vertical blanking
            timers.vblank(scheduler);
            self.stat.drawing_odd = false;
            self.vblank = true;
            self.frame_flag = true;
            interrupts.request(Interrupt::VBLANK);
        } else if visible(self.scanline) && !visible(prev) && self.vblank {
            timers.vblank_end(scheduler);
            self.vblank = false;
        } else if self.stat.vertical_interlace && self.stat.vertical_res && !self.vblank {
            self.stat.drawing_odd = !self.stat.drawing_odd;
        }

        scheduler.schedule(
            CLOCKS_SCANLINE.saturating_sub(cycles_late),
            EventTarget::GpuLineEnd,
        );
    }
}

impl Default for Gpu {
    fn default() -> Self {
        Self::new()
    }
}
