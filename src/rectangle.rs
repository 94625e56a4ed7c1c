use crate::profile::Rect;
use lopdf::Object;

/// Rectangle in PDF user space given by two corners.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rectangle {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Rectangle {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).abs()
    }

    pub fn to_object(&self) -> Object {
        Object::Array(vec![
            Object::Real(self.x1.into()),
            Object::Real(self.y1.into()),
            Object::Real(self.x2.into()),
            Object::Real(self.y2.into()),
        ])
    }
}

impl From<&Rect> for Rectangle {
    fn from(rect: &Rect) -> Self {
        Rectangle {
            x1: rect.x as f32,
            y1: rect.y as f32,
            x2: (rect.x + rect.width) as f32,
            y2: (rect.y + rect.height) as f32,
        }
    }
}
