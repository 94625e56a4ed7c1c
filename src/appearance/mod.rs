//! Raster stamp for visible signatures: signer text plus an optional logo,
//! laid out inside the profile rectangle.

mod layout;
mod location;

pub use layout::{fit_text, required_height, wrap_line, FittedText, TextMeasure, LINE_HEIGHT};
pub use location::{
    shared_provider, IpInfoSource, LocationCache, LocationProvider, LocationSource, CACHE_TTL,
    RETRY_AFTER,
};

use crate::profile::{AppearanceOptions, LogoPosition, Rect, MAX_STAMP_DIMENSION};
use crate::{Certificate, Error, Settings};
use base64::Engine;
use chrono::{DateTime, Local};
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use rusttype::{point, Font, Scale};
use std::path::PathBuf;
use std::sync::Arc;

/// Pixels per PDF point.
pub const OVERSAMPLING: u32 = 4;
const MAX_FONT_SIZE: f32 = 72.0;
const MIN_FONT_SIZE: f32 = 1.0;
const TEXT_COLOR: [u8; 3] = [0x10, 0x1c, 0x3c];

const SYSTEM_FONTS: [&str; 6] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
];

/// DejaVu Sans, see `assets/DejaVuSans-LICENSE.txt`.
static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// First parsable TrueType font from `candidates`, then the usual system
/// locations, then the bundled DejaVu Sans.
pub fn load_font(candidates: &[PathBuf]) -> Result<Font<'static>, Error> {
    let found = candidates
        .iter()
        .cloned()
        .chain(SYSTEM_FONTS.iter().map(PathBuf::from))
        .find_map(|path| {
            let data = std::fs::read(&path).ok()?;
            let font = Font::try_from_vec(data);
            if font.is_none() {
                log::warn!("`{}` is not a usable TrueType font.", path.display());
            }
            font
        });
    match found {
        Some(font) => Ok(font),
        None => {
            log::debug!("No system font found, using the bundled one.");
            bundled_font()
        }
    }
}

pub fn bundled_font() -> Result<Font<'static>, Error> {
    Font::try_from_bytes(BUNDLED_FONT)
        .ok_or_else(|| Error::Other("bundled font is not a valid TrueType font".to_owned()))
}

/// A rendered stamp. `width` and `height` are the nominal size in points,
/// the raster is `OVERSAMPLING` times larger.
#[derive(Debug, Clone)]
pub struct Stamp {
    pub image: RgbaImage,
    pub width: f64,
    pub height: f64,
}

impl Stamp {
    pub fn is_blank(&self) -> bool {
        self.image.pixels().all(|pixel| pixel[3] == 0)
    }

    pub fn to_png(&self) -> Result<Vec<u8>, Error> {
        let mut data = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut data, self.image.width(), self.image.height());
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(self.image.as_raw())?;
        }
        Ok(data)
    }
}

/// Pixel rectangle inside the stamp raster.
#[derive(Debug, Clone, Copy)]
struct Area {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

pub struct AppearanceRenderer {
    font: Font<'static>,
    location: Option<Arc<dyn LocationProvider>>,
}

impl AppearanceRenderer {
    pub fn new(font: Font<'static>, location: Option<Arc<dyn LocationProvider>>) -> Self {
        AppearanceRenderer { font, location }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, Error> {
        let font = load_font(&settings.font_paths)?;
        let location = if settings.location_lookup {
            match shared_provider() {
                Ok(provider) => Some(provider),
                Err(err) => {
                    log::warn!("Location lookup disabled: {}", err);
                    None
                }
            }
        } else {
            None
        };
        Ok(Self::new(font, location))
    }

    /// Ordered stamp lines for the enabled options.
    pub fn text_lines(
        &self,
        options: &AppearanceOptions,
        certificate: &Certificate,
        signed_at: &DateTime<Local>,
    ) -> Vec<String> {
        let mut lines = vec![];
        if options.show_signer_name {
            let name = if certificate.name.trim().is_empty() {
                &certificate.subject
            } else {
                &certificate.name
            };
            lines.push(format!("Signed by: {}", name.trim()));
        }
        if options.show_signing_time {
            lines.push(format!("Date: {}", signed_at.format("%Y-%m-%d %H:%M:%S %Z")));
        }
        if options.show_location {
            match self.location.as_ref().and_then(|l| l.current_location()) {
                Some(place) => lines.push(format!("Location: {}", place)),
                None => log::debug!("No location available for the stamp."),
            }
        }
        if let Some(text) = &options.custom_text {
            lines.extend(
                text.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_owned),
            );
        }
        lines
    }

    pub fn render(
        &self,
        options: &AppearanceOptions,
        rect: &Rect,
        certificate: &Certificate,
        signed_at: &DateTime<Local>,
    ) -> Result<Stamp, Error> {
        if !(rect.width > 0.0 && rect.height > 0.0) {
            return Err(Error::InvalidPosition(
                "stamp width and height must be positive".to_owned(),
            ));
        }
        if !(rect.width <= MAX_STAMP_DIMENSION && rect.height <= MAX_STAMP_DIMENSION) {
            return Err(Error::InvalidPosition(format!(
                "stamp of {:.2} x {:.2} points exceeds the maximum side of {:.2}",
                rect.width, rect.height, MAX_STAMP_DIMENSION
            )));
        }
        let scale = OVERSAMPLING as f32;
        let pixel_width = ((rect.width as f32 * scale).round() as u32).max(1);
        let pixel_height = ((rect.height as f32 * scale).round() as u32).max(1);
        let mut canvas = RgbaImage::from_pixel(pixel_width, pixel_height, Rgba([0, 0, 0, 0]));

        let lines = self.text_lines(options, certificate, signed_at);
        let logo = options.logo.as_deref().and_then(|source| match load_logo(source) {
            Ok(logo) => Some(logo),
            Err(err) => {
                log::warn!("Ignoring signature logo: {}", err);
                None
            }
        });

        let margin_pt: f32 = if rect.width < 60.0 || rect.height < 30.0 { 1.0 } else { 2.0 };
        let margin = margin_pt.min(5.0) * scale;
        let inner = Area {
            x: margin,
            y: margin,
            width: (pixel_width as f32 - 2.0 * margin).max(1.0),
            height: (pixel_height as f32 - 2.0 * margin).max(1.0),
        };

        match logo {
            None if lines.is_empty() => {}
            Some(logo) if lines.is_empty() => {
                let side = inner.width.min(inner.height) * 2.0 / 3.0;
                let logo_area = Area {
                    x: inner.x + (inner.width - side) / 2.0,
                    y: inner.y + (inner.height - side) / 2.0,
                    width: side,
                    height: side,
                };
                draw_logo(&mut canvas, &logo, logo_area);
            }
            logo => {
                let text_area = match logo {
                    Some(logo) => {
                        let (logo_area, text_area) =
                            split_for_logo(inner, options.logo_position, margin, scale);
                        draw_logo(&mut canvas, &logo, logo_area);
                        text_area
                    }
                    None => inner,
                };
                let max_size = options
                    .font_size
                    .map_or(MAX_FONT_SIZE, |size| size.min(MAX_FONT_SIZE))
                    * scale;
                let fitted = fit_text(
                    &lines,
                    text_area.width,
                    text_area.height,
                    MIN_FONT_SIZE * scale,
                    max_size,
                    &self.font,
                );
                draw_text(&mut canvas, &self.font, &fitted, text_area);
            }
        }

        Ok(Stamp {
            image: canvas,
            width: rect.width,
            height: rect.height,
        })
    }
}

fn split_for_logo(inner: Area, position: LogoPosition, margin: f32, scale: f32) -> (Area, Area) {
    match position {
        LogoPosition::Left => {
            let logo_width = (inner.width * 0.2).max(10.0 * scale).min(inner.width);
            let logo = Area {
                width: logo_width,
                ..inner
            };
            let text = Area {
                x: inner.x + logo_width + margin,
                width: (inner.width - logo_width - margin).max(1.0),
                ..inner
            };
            (logo, text)
        }
        LogoPosition::Top => {
            let logo_height = inner.height * 0.2;
            let logo = Area {
                height: logo_height,
                ..inner
            };
            let text = Area {
                y: inner.y + logo_height + margin,
                height: (inner.height - logo_height - margin).max(1.0),
                ..inner
            };
            (logo, text)
        }
    }
}

fn load_logo(source: &str) -> Result<DynamicImage, Error> {
    if let Some(rest) = source.strip_prefix("data:") {
        let (_, payload) = rest
            .split_once("base64,")
            .ok_or_else(|| Error::Other("logo data URL is not base64 encoded".to_owned()))?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|err| Error::Other(format!("logo data URL: {}", err)))?;
        Ok(image::load_from_memory(&data)?)
    } else {
        Ok(image::open(source)?)
    }
}

/// Scale `logo` to fit `area` keeping its aspect ratio, centered.
fn draw_logo(canvas: &mut RgbaImage, logo: &DynamicImage, area: Area) {
    let width = area.width.floor().max(1.0) as u32;
    let height = area.height.floor().max(1.0) as u32;
    let resized = logo
        .resize(width, height, imageops::FilterType::Lanczos3)
        .to_rgba8();
    let x = area.x + (area.width - resized.width() as f32) / 2.0;
    let y = area.y + (area.height - resized.height() as f32) / 2.0;
    imageops::overlay(canvas, &resized, x.round() as i64, y.round() as i64);
}

fn draw_text(canvas: &mut RgbaImage, font: &Font<'_>, fitted: &FittedText, area: Area) {
    let scale = Scale::uniform(fitted.font_size);
    let ascent = font.v_metrics(scale).ascent;
    let (canvas_width, canvas_height) = (canvas.width() as i32, canvas.height() as i32);
    for (index, line) in fitted.lines.iter().enumerate() {
        let baseline = area.y + ascent + index as f32 * LINE_HEIGHT * fitted.font_size;
        for glyph in font.layout(line, scale, point(area.x, baseline)) {
            let Some(bounds) = glyph.pixel_bounding_box() else {
                continue;
            };
            glyph.draw(|gx, gy, coverage| {
                let px = bounds.min.x + gx as i32;
                let py = bounds.min.y + gy as i32;
                if px < 0 || py < 0 || px >= canvas_width || py >= canvas_height {
                    return;
                }
                let alpha = (coverage.clamp(0.0, 1.0) * 255.0).round() as u8;
                let pixel = canvas.get_pixel_mut(px as u32, py as u32);
                if alpha > pixel[3] {
                    *pixel = Rgba([TEXT_COLOR[0], TEXT_COLOR[1], TEXT_COLOR[2], alpha]);
                }
            });
        }
    }
}
