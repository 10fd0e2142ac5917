//! Raster images as Image XObjects.
//!
//! - **JPEG**: embedded as-is with `/DCTDecode`
//! - **PNG**: decoded with the `image` crate, pixels Flate-compressed, any
//!   alpha channel split out into a separate `/SMask` image
//!
//! The seal and handwritten-signature images supplied by callers go through
//! here before the stamp renderer places them.

use crate::decoders::flate_encode;
use crate::object::{Dict, Object};

/// Encoding of the image samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Original JPEG stream
    Jpeg,
    /// Zlib-compressed raw samples
    Flate,
}

/// Color space for image data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    /// Grayscale
    DeviceGray,
    /// RGB
    DeviceRGB,
    /// CMYK
    DeviceCMYK,
}

impl ColorSpace {
    /// PDF name of this color space.
    pub fn pdf_name(&self) -> &'static str {
        match self {
            ColorSpace::DeviceGray => "DeviceGray",
            ColorSpace::DeviceRGB => "DeviceRGB",
            ColorSpace::DeviceCMYK => "DeviceCMYK",
        }
    }
}

/// Image embedding error.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// Neither PNG nor JPEG
    #[error("Unsupported image format (expected PNG or JPEG)")]
    UnsupportedFormat,

    /// Failed to decode image
    #[error("Failed to decode image: {0}")]
    DecodeError(String),

    /// Invalid image data
    #[error("Invalid image data: {0}")]
    InvalidData(String),
}

/// An image ready to be written as an XObject.
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Color space of `data`
    pub color_space: ColorSpace,
    /// Sample encoding
    pub format: ImageFormat,
    /// Encoded samples
    pub data: Vec<u8>,
    /// Flate-compressed 8-bit alpha, when the source had transparency
    pub soft_mask: Option<Vec<u8>>,
}

impl ImageData {
    /// Detect the format from magic bytes and load.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ImageError> {
        if data.starts_with(&[0xFF, 0xD8]) {
            return Self::from_jpeg(data.to_vec());
        }
        if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            return Self::from_png(data);
        }
        Err(ImageError::UnsupportedFormat)
    }

    /// Wrap a JPEG without transcoding.
    pub fn from_jpeg(data: Vec<u8>) -> Result<Self, ImageError> {
        let (width, height, color_space) = parse_jpeg_header(&data)?;
        Ok(Self {
            width,
            height,
            color_space,
            format: ImageFormat::Jpeg,
            data,
            soft_mask: None,
        })
    }

    /// Decode a PNG and re-encode its samples.
    pub fn from_png(data: &[u8]) -> Result<Self, ImageError> {
        use image::GenericImageView;

        let img = image::load_from_memory_with_format(data, image::ImageFormat::Png)
            .map_err(|e| ImageError::DecodeError(e.to_string()))?;
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(ImageError::InvalidData("empty PNG".to_string()));
        }

        let (color_space, pixels, alpha) = match img.color() {
            image::ColorType::L8 | image::ColorType::L16 => {
                (ColorSpace::DeviceGray, img.to_luma8().into_raw(), None)
            },
            image::ColorType::La8 | image::ColorType::La16 => {
                let la = img.to_luma_alpha8();
                let (gray, alpha): (Vec<u8>, Vec<u8>) = la.pixels().map(|p| (p.0[0], p.0[1])).unzip();
                (ColorSpace::DeviceGray, gray, Some(alpha))
            },
            color if color.has_alpha() => {
                let rgba = img.to_rgba8();
                let mut rgb = Vec::with_capacity((width * height * 3) as usize);
                let mut alpha = Vec::with_capacity((width * height) as usize);
                for pixel in rgba.pixels() {
                    rgb.extend_from_slice(&pixel.0[..3]);
                    alpha.push(pixel.0[3]);
                }
                (ColorSpace::DeviceRGB, rgb, Some(alpha))
            },
            _ => (ColorSpace::DeviceRGB, img.to_rgb8().into_raw(), None),
        };

        // Fully opaque alpha adds nothing.
        let alpha = alpha.filter(|a| a.iter().any(|&v| v != 0xFF));

        Ok(Self {
            width,
            height,
            color_space,
            format: ImageFormat::Flate,
            data: compress(&pixels)?,
            soft_mask: alpha.map(|a| compress(&a)).transpose()?,
        })
    }

    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }

    /// The Image XObject stream. `smask` is the reference of the soft mask object, if any.
    pub fn to_xobject(&self, smask: Option<Object>) -> Object {
        let mut dict = image_dict(self.width, self.height, self.color_space);
        let filter = match self.format {
            ImageFormat::Jpeg => "DCTDecode",
            ImageFormat::Flate => "FlateDecode",
        };
        dict.insert("Filter".to_string(), Object::name(filter));
        if let Some(mask) = smask {
            dict.insert("SMask".to_string(), mask);
        }
        Object::Stream {
            dict,
            data: bytes::Bytes::from(self.data.clone()),
        }
    }

    /// The soft mask stream, when the image has transparency.
    pub fn soft_mask_xobject(&self) -> Option<Object> {
        self.soft_mask.as_ref().map(|mask| {
            let mut dict = image_dict(self.width, self.height, ColorSpace::DeviceGray);
            dict.insert("Filter".to_string(), Object::name("FlateDecode"));
            Object::Stream {
                dict,
                data: bytes::Bytes::from(mask.clone()),
            }
        })
    }
}

fn image_dict(width: u32, height: u32, color_space: ColorSpace) -> Dict {
    let mut dict = Dict::new();
    dict.insert("Type".to_string(), Object::name("XObject"));
    dict.insert("Subtype".to_string(), Object::name("Image"));
    dict.insert("Width".to_string(), Object::Integer(width as i64));
    dict.insert("Height".to_string(), Object::Integer(height as i64));
    dict.insert("ColorSpace".to_string(), Object::name(color_space.pdf_name()));
    dict.insert("BitsPerComponent".to_string(), Object::Integer(8));
    dict
}

fn compress(data: &[u8]) -> Result<Vec<u8>, ImageError> {
    flate_encode(data).map_err(|e| ImageError::InvalidData(e.to_string()))
}

/// Read width, height and component count from the first SOF marker.
fn parse_jpeg_header(data: &[u8]) -> Result<(u32, u32, ColorSpace), ImageError> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return Err(ImageError::InvalidData("Not a valid JPEG".to_string()));
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = data[pos + 1];
        pos += 2;

        match marker {
            0xFF | 0x00 | 0x01 | 0xD0..=0xD7 => continue,
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                let header = data
                    .get(pos..pos + 8)
                    .ok_or_else(|| ImageError::InvalidData("Truncated JPEG header".to_string()))?;
                let height = u16::from_be_bytes([header[3], header[4]]) as u32;
                let width = u16::from_be_bytes([header[5], header[6]]) as u32;
                let color_space = match header[7] {
                    1 => ColorSpace::DeviceGray,
                    4 => ColorSpace::DeviceCMYK,
                    _ => ColorSpace::DeviceRGB,
                };
                if width == 0 || height == 0 {
                    return Err(ImageError::InvalidData("JPEG has zero dimension".to_string()));
                }
                return Ok((width, height, color_space));
            },
            _ => {
                let length = match data.get(pos..pos + 2) {
                    Some(len) => u16::from_be_bytes([len[0], len[1]]) as usize,
                    None => break,
                };
                pos += length;
            },
        }
    }

    Err(ImageError::InvalidData("Could not find JPEG dimensions".to_string()))
}
