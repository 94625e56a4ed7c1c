// This code is inspired by https://github.com/fschutt/printpdf/blob/2bebdc65d06dafbe926ed4b43fedd10f966c59d3/src/xobject.rs

use crate::Error;
use lopdf::ObjectId;
use png::{BitDepth, ColorType, Transformations};
use std::io::Read;

#[derive(Debug, Clone)]
pub struct ImageXObject {
    /// Width of the image (original width, not scaled width)
    pub width: u32,
    /// Height of the image (original height, not scaled height)
    pub height: u32,
    /// Color space (Greyscale, RGB)
    pub color_space: ColorType,
    /// Bits per color component, always 8 after decoding.
    pub bits_per_component: BitDepth,
    /// Should the image be interpolated when scaled?
    pub interpolate: bool,
    /// The actual data from the image
    pub image_data: Vec<u8>,
    /// Image used as a soft mask. (transparency)
    pub s_mask: Option<ObjectId>,
}

impl ImageXObject {
    /// Returns 1 or 2 images. The first is the color images.
    /// The second is (if present) the mask/alpha channel of the image.
    pub fn try_from<R: Read>(
        mut image_decoder: png::Decoder<R>,
    ) -> Result<(Self, Option<Self>), Error> {
        // Palette and low bit depths are expanded, 16 bit is reduced to 8.
        image_decoder.set_transformations(Transformations::EXPAND | Transformations::STRIP_16);
        let mut image_reader = image_decoder.read_info()?;
        let mut buf = vec![0; image_reader.output_buffer_size()];
        // An APNG might contain multiple frames, only the first is used.
        let info = image_reader.next_frame(&mut buf)?;
        buf.truncate(info.buffer_size());
        if info.bit_depth != BitDepth::Eight {
            return Err(Error::Other(format!(
                "Unsupported PNG bit depth {:?}",
                info.bit_depth
            )));
        }

        let (color_space, image_color_data, alpha_data) = match info.color_type {
            ColorType::Rgba => (ColorType::Rgb, split_channels(&buf, 4, 3), Some(alpha_channel(&buf, 4))),
            ColorType::GrayscaleAlpha => (
                ColorType::Grayscale,
                split_channels(&buf, 2, 1),
                Some(alpha_channel(&buf, 2)),
            ),
            ColorType::Rgb | ColorType::Grayscale => (info.color_type, buf, None),
            ColorType::Indexed => {
                return Err(Error::Other("Indexed PNG was not expanded".to_owned()))
            }
        };

        Ok((
            Self {
                width: info.width,
                height: info.height,
                color_space,
                bits_per_component: BitDepth::Eight,
                image_data: image_color_data,
                interpolate: true,
                s_mask: None, // This should be filled in later
            },
            alpha_data.map(|alpha_data| Self {
                width: info.width,
                height: info.height,
                color_space: ColorType::Grayscale,
                bits_per_component: BitDepth::Eight,
                image_data: alpha_data,
                interpolate: true,
                s_mask: None,
            }),
        ))
    }
}

/// Keep the first `keep` channels of every `stride` byte pixel.
fn split_channels(data: &[u8], stride: usize, keep: usize) -> Vec<u8> {
    data.chunks_exact(stride)
        .flat_map(|pixel| pixel[..keep].iter().copied())
        .collect()
}

/// The last channel of every `stride` byte pixel.
fn alpha_channel(data: &[u8], stride: usize) -> Vec<u8> {
    data.chunks_exact(stride).map(|pixel| pixel[stride - 1]).collect()
}

// Inspired and derived from: https://github.com/fschutt/printpdf/blob/2bebdc65d06dafbe926ed4b43fedd10f966c59d3/src/xobject.rs#L245
impl From<ImageXObject> for lopdf::Stream {
    fn from(image: ImageXObject) -> Self {
        use lopdf::Object::*;

        let cs: &'static str = match image.color_space {
            ColorType::Rgb => "DeviceRGB",
            _ => "DeviceGray",
        };
        let mut dict = lopdf::Dictionary::from_iter(vec![
            ("Type", Name("XObject".as_bytes().to_vec())),
            ("Subtype", Name("Image".as_bytes().to_vec())),
            ("Width", Integer(image.width.into())),
            ("Height", Integer(image.height.into())),
            ("Interpolate", image.interpolate.into()),
            ("BitsPerComponent", Integer(image.bits_per_component as i64)),
            ("ColorSpace", Name(cs.as_bytes().to_vec())),
        ]);
        if let Some(s_mask) = image.s_mask {
            dict.set("SMask", Reference(s_mask));
        }

        let mut stream = lopdf::Stream::new(dict, image.image_data);
        // Keep the raw data when compression does not pay off.
        let _ = stream.compress();
        stream
    }
}

impl From<ImageXObject> for lopdf::Object {
    fn from(image: ImageXObject) -> Self {
        lopdf::Object::Stream(image.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(width: u32, height: u32, color: png::ColorType, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(color);
            encoder.set_depth(BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(data).unwrap();
        }
        out
    }

    #[test]
    fn rgba_is_split_into_color_and_mask() {
        let png = encode(2, 1, ColorType::Rgba, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let (color, mask) = ImageXObject::try_from(png::Decoder::new(&png[..])).unwrap();
        assert_eq!(color.color_space, ColorType::Rgb);
        assert_eq!(color.image_data, vec![1, 2, 3, 5, 6, 7]);
        let mask = mask.unwrap();
        assert_eq!(mask.color_space, ColorType::Grayscale);
        assert_eq!(mask.image_data, vec![4, 8]);
    }

    #[test]
    fn grayscale_alpha_mask_holds_alpha() {
        let png = encode(2, 1, ColorType::GrayscaleAlpha, &[10, 200, 20, 100]);
        let (color, mask) = ImageXObject::try_from(png::Decoder::new(&png[..])).unwrap();
        assert_eq!(color.image_data, vec![10, 20]);
        assert_eq!(mask.unwrap().image_data, vec![200, 100]);
    }

    #[test]
    fn opaque_rgb_has_no_mask() {
        let png = encode(1, 1, ColorType::Rgb, &[9, 9, 9]);
        let (color, mask) = ImageXObject::try_from(png::Decoder::new(&png[..])).unwrap();
        assert!(mask.is_none());
        let stream = lopdf::Stream::from(color);
        assert_eq!(stream.dict.get(b"ColorSpace").unwrap().as_name_str().unwrap(), "DeviceRGB");
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(ImageXObject::try_from(png::Decoder::new(&b"not a png"[..])).is_err());
    }
}
