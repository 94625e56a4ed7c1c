//! Form XObjects used as the normal (`N`) appearance of a signature widget.

use crate::{image_xobject::ImageXObject, rectangle::Rectangle, Error};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

/// Resource name of the stamp image inside the form.
const STAMP_RESOURCE: &str = "Stamp";

pub(crate) trait AppearanceForms {
    fn add_object<T: Into<Object>>(&mut self, object: T) -> ObjectId;

    /// Embed a PNG stamp and wrap it in a form that paints it over the
    /// whole of `rect`.
    fn add_stamp_form(&mut self, png: &[u8], rect: &Rectangle) -> Result<ObjectId, Error> {
        let (mut image, mask) = ImageXObject::try_from(png::Decoder::new(png))?;
        if let Some(mask) = mask {
            image.s_mask = Some(self.add_object(mask));
        }
        let image_id = self.add_object(image);

        let (width, height) = (rect.width(), rect.height());
        // Image space is the unit square, scale it up to the widget.
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        width.into(),
                        0.into(),
                        0.into(),
                        height.into(),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(STAMP_RESOURCE.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let form = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! { STAMP_RESOURCE => image_id },
            },
        };
        Ok(self.add_object(Stream::new(form, content.encode()?)))
    }

    /// Zero sized form for invisible signatures.
    fn add_blank_form(&mut self) -> ObjectId {
        let form = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), 0.into(), 0.into()],
        };
        self.add_object(Stream::new(form, vec![]))
    }
}

impl AppearanceForms for Document {
    fn add_object<T: Into<Object>>(&mut self, object: T) -> ObjectId {
        Document::add_object(self, object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appearance::Stamp;
    use image::{Rgba, RgbaImage};

    #[test]
    fn stamp_form_paints_image_with_soft_mask() {
        let stamp = Stamp {
            image: RgbaImage::from_pixel(8, 4, Rgba([0, 0, 0, 128])),
            width: 2.0,
            height: 1.0,
        };
        let png = stamp.to_png().unwrap();
        let mut doc = Document::with_version("1.7");
        let rect = Rectangle {
            x1: 10.0,
            y1: 10.0,
            x2: 210.0,
            y2: 90.0,
        };
        let form_id = doc.add_stamp_form(&png, &rect).unwrap();
        let form = doc.get_object(form_id).unwrap().as_stream().unwrap();
        assert_eq!(form.dict.get(b"Subtype").unwrap().as_name_str().unwrap(), "Form");
        let bbox = form.dict.get(b"BBox").unwrap().as_array().unwrap();
        assert_eq!(bbox[2].as_float().unwrap(), 200.0);
        // image, soft mask and the form itself
        assert_eq!(doc.objects.len(), 3);
    }

    #[test]
    fn blank_form_has_empty_box() {
        let mut doc = Document::with_version("1.7");
        let form_id = doc.add_blank_form();
        let form = doc.get_object(form_id).unwrap().as_stream().unwrap();
        assert!(form.content.is_empty());
        assert_eq!(form.dict.get(b"BBox").unwrap().as_array().unwrap().len(), 4);
    }
}
