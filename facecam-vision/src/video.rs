use anyhow::{Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

const RGB3: &[u8; 4] = b"RGB3";
const YUYV: &[u8; 4] = b"YUYV";
const GREY: &[u8; 4] = b"GREY";

/// V4L2 capture device producing RGB frames.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        Self::open_with_resolution(device, None)
    }

    /// Open `device`, optionally asking for a `(width, height)` mode. The
    /// driver may pick the nearest mode it supports.
    pub fn open_with_resolution(device: &str, resolution: Option<(u32, u32)>) -> Result<Self> {
        let dev = Device::with_path(device).with_context(|| format!("open camera {}", device))?;
        let mut fmt = dev.format().context("get format")?;
        let (width, height) = resolution.unwrap_or((fmt.width, fmt.height));

        // Prefer RGB, fallback to YUYV, else accept existing format
        fmt = dev
            .set_format(&Format::new(width, height, FourCC::new(RGB3)))
            .unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(RGB3) {
            fmt = dev
                .set_format(&Format::new(width, height, FourCC::new(YUYV)))
                .unwrap_or(fmt);
        }
        log::info!(
            "camera {}: {}x{} {}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );

        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::trace!(
            "captured frame: seq={} len={}",
            meta.sequence,
            data.len()
        );
        to_image(self.fourcc, self.width, self.height, data)
    }
}

/// Convert a captured buffer into a `width`x`height` RGB image. Short
/// buffers are an error; oversized ones are truncated with a warning.
pub fn to_image(fourcc: FourCC, width: u32, height: u32, data: &[u8]) -> Result<RgbImage> {
    let mut buf = convert_to_rgb(fourcc, width, height, data)?;

    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        anyhow::bail!(
            "buffer too small: got {}, expected {} (fourcc {})",
            buf.len(),
            expected,
            fourcc
        );
    } else if buf.len() > expected {
        log::warn!(
            "buffer larger than expected ({} > {}), truncating",
            buf.len(),
            expected
        );
        buf.truncate(expected);
    }
    RgbImage::from_raw(width, height, buf)
        .ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
}

fn convert_to_rgb(fourcc: FourCC, width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    if fourcc == FourCC::new(RGB3) {
        Ok(data.to_vec())
    } else if fourcc == FourCC::new(YUYV) {
        yuyv_to_rgb(width, height, data)
    } else if fourcc == FourCC::new(GREY) {
        grey_to_rgb(width, height, data)
    } else {
        log::warn!(
            "unexpected pixel format {}, passing through raw len={}",
            fourcc,
            data.len()
        );
        Ok(data.to_vec())
    }
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        anyhow::bail!("short YUYV buffer: {} < {}", data.len(), expected);
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer: {} < {}", data.len(), expected);
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_neutral_chroma_is_grey() {
        // two pixels, luma 100 and 200, no chroma
        let rgb = yuyv_to_rgb(2, 1, &[100, 128, 200, 128]).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn yuyv_short_buffer_errors() {
        assert!(yuyv_to_rgb(4, 1, &[0, 0, 0, 0]).is_err());
    }

    #[test]
    fn grey_expands_to_three_channels() {
        let rgb = grey_to_rgb(2, 1, &[7, 9, 42]).unwrap();
        assert_eq!(rgb, vec![7, 7, 7, 9, 9, 9]);
    }

    #[test]
    fn short_rgb3_buffer_errors() {
        let err = to_image(FourCC::new(RGB3), 2, 2, &[0u8; 11]).unwrap_err();
        assert!(err.to_string().contains("buffer too small"));
    }

    #[test]
    fn long_rgb3_buffer_is_truncated() {
        let mut data: Vec<u8> = (1..=6).collect();
        data.extend_from_slice(&[99; 5]);
        let img = to_image(FourCC::new(RGB3), 2, 1, &data).unwrap();
        assert_eq!(img.dimensions(), (2, 1));
        assert_eq!(img.into_raw(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn yuyv_frame_has_three_bytes_per_pixel() {
        let img = to_image(FourCC::new(YUYV), 2, 2, &[128u8; 8]).unwrap();
        assert_eq!(img.into_raw().len(), 12);
    }

    #[test]
    fn rgb3_passes_through() {
        let data = [1u8, 2, 3];
        let out = convert_to_rgb(FourCC::new(RGB3), 1, 1, &data).unwrap();
        assert_eq!(out, data.to_vec());
    }
}
