use anyhow::Result;
use image::RgbImage;
use minifb::{Key, KeyRepeat, Window, WindowOptions};

/// On-screen window showing annotated frames. Closing the window or
/// pressing `q`/`Escape` asks the loop to stop.
pub struct Display {
    window: Window,
    buffer: Vec<u32>,
}

impl Display {
    pub fn open(title: &str, width: u32, height: u32) -> Result<Self> {
        let mut window = Window::new(
            title,
            width as usize,
            height as usize,
            WindowOptions {
                resize: true,
                ..WindowOptions::default()
            },
        )
        .map_err(|e| anyhow::anyhow!("opening window '{}': {}", title, e))?;
        window.set_target_fps(60);
        Ok(Self {
            window,
            buffer: Vec::new(),
        })
    }

    pub fn show(&mut self, frame: &RgbImage) -> Result<()> {
        pack_0rgb(frame, &mut self.buffer);
        let (w, h) = frame.dimensions();
        self.window
            .update_with_buffer(&self.buffer, w as usize, h as usize)
            .map_err(|e| anyhow::anyhow!("updating window: {}", e))
    }

    pub fn should_close(&self) -> bool {
        !self.window.is_open()
            || self.window.is_key_down(Key::Escape)
            || self.window.is_key_pressed(Key::Q, KeyRepeat::No)
    }
}

/// Pack RGB pixels into the `0x00RRGGBB` words the window expects.
pub fn pack_0rgb(frame: &RgbImage, out: &mut Vec<u32>) {
    out.clear();
    out.extend(
        frame
            .pixels()
            .map(|p| (p[0] as u32) << 16 | (p[1] as u32) << 8 | p[2] as u32),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_pixels_row_major() {
        let mut frame = RgbImage::new(2, 1);
        frame.put_pixel(0, 0, image::Rgb([0x12, 0x34, 0x56]));
        frame.put_pixel(1, 0, image::Rgb([0xff, 0x00, 0x01]));
        let mut out = vec![7, 7, 7];
        pack_0rgb(&frame, &mut out);
        assert_eq!(out, vec![0x0012_3456, 0x00ff_0001]);
    }
}
