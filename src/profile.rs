//! Reusable signing configurations, one JSON record per profile.

use crate::config::{create_private_dir, write_private_file};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const INVISIBLE_PROFILE_ID: &str = "00000000-0000-0000-0000-000000000001";
pub const VISIBLE_PROFILE_ID: &str = "00000000-0000-0000-0000-000000000002";
/// Largest accepted stamp side, in points.
pub const MAX_STAMP_DIMENSION: f64 = 2000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    Invisible,
    Visible,
}

/// Which page receives the stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PagePolicy {
    Last,
    First,
    /// 1-based page number.
    Number(u32),
}

impl PagePolicy {
    /// Resolve to a 1-based page number for a document of `page_count` pages.
    pub fn resolve(&self, page_count: u32) -> Result<u32, Error> {
        if page_count == 0 {
            return Err(Error::InvalidPosition("document has no pages".to_owned()));
        }
        match *self {
            PagePolicy::Last => Ok(page_count),
            PagePolicy::First => Ok(1),
            PagePolicy::Number(page) if (1..=page_count).contains(&page) => Ok(page),
            PagePolicy::Number(page) => Err(Error::InvalidPosition(format!(
                "page {} does not exist, the document has {} page(s)",
                page, page_count
            ))),
        }
    }
}

/// Rectangle in PDF points, origin bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignaturePosition {
    pub page: PagePolicy,
    pub rect: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogoPosition {
    #[default]
    Left,
    Top,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppearanceOptions {
    pub show_signer_name: bool,
    pub show_signing_time: bool,
    pub show_location: bool,
    pub custom_text: Option<String>,
    /// `data:image/...;base64,` URL or a file path.
    pub logo: Option<String>,
    pub logo_position: LogoPosition,
    /// Upper bound for the fitted font size, in points.
    pub font_size: Option<f32>,
}

impl Default for AppearanceOptions {
    fn default() -> Self {
        AppearanceOptions {
            show_signer_name: true,
            show_signing_time: true,
            show_location: false,
            custom_text: None,
            logo: None,
            logo_position: LogoPosition::Left,
            font_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub visibility: Visibility,
    #[serde(default)]
    pub position: Option<SignaturePosition>,
    #[serde(default)]
    pub appearance: AppearanceOptions,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub contact_info: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl SignatureProfile {
    /// A new invisible profile with a random identifier.
    pub fn new(name: &str) -> Self {
        SignatureProfile {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_owned(),
            description: String::new(),
            visibility: Visibility::Invisible,
            position: None,
            appearance: AppearanceOptions::default(),
            reason: None,
            location: None,
            contact_info: None,
            is_default: false,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visibility == Visibility::Visible
    }

    pub fn builtin_invisible() -> Self {
        SignatureProfile {
            id: INVISIBLE_PROFILE_ID.to_owned(),
            name: "Invisible Signature".to_owned(),
            description: "Digital signature without visual appearance".to_owned(),
            visibility: Visibility::Invisible,
            position: None,
            appearance: AppearanceOptions::default(),
            reason: Some("Document digitally signed".to_owned()),
            location: Some("Digital Signature".to_owned()),
            contact_info: None,
            is_default: true,
        }
    }

    pub fn builtin_visible() -> Self {
        SignatureProfile {
            id: VISIBLE_PROFILE_ID.to_owned(),
            name: "Visible Signature".to_owned(),
            description: "Signature stamp on the last page".to_owned(),
            visibility: Visibility::Visible,
            position: Some(SignaturePosition {
                page: PagePolicy::Last,
                rect: Rect {
                    x: 360.0,
                    y: 50.0,
                    width: 200.0,
                    height: 80.0,
                },
            }),
            appearance: AppearanceOptions {
                show_signer_name: true,
                show_signing_time: true,
                show_location: false,
                custom_text: None,
                logo: None,
                logo_position: LogoPosition::Left,
                font_size: Some(10.0),
            },
            reason: Some("Document digitally signed".to_owned()),
            location: None,
            contact_info: None,
            is_default: false,
        }
    }

    pub fn is_builtin(id: &str) -> bool {
        id == INVISIBLE_PROFILE_ID || id == VISIBLE_PROFILE_ID
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidProfile("identifier is required".to_owned()));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidProfile(format!(
                "identifier `{}` may only contain letters, digits, `-` and `_`",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(Error::InvalidProfile("name is required".to_owned()));
        }
        if let Some(size) = self.appearance.font_size {
            if !(size.is_finite() && size > 0.0) {
                return Err(Error::InvalidProfile(format!("invalid font size {}", size)));
            }
        }
        if self.is_visible() {
            let position = self.position.as_ref().ok_or_else(|| {
                Error::InvalidProfile("a visible profile needs a position".to_owned())
            })?;
            let rect = position.rect;
            let finite = [rect.x, rect.y, rect.width, rect.height]
                .iter()
                .all(|v| v.is_finite());
            if !finite || rect.width <= 0.0 || rect.height <= 0.0 {
                return Err(Error::InvalidProfile(
                    "a visible profile needs a positive width and height".to_owned(),
                ));
            }
            if rect.width > MAX_STAMP_DIMENSION || rect.height > MAX_STAMP_DIMENSION {
                return Err(Error::InvalidProfile(format!(
                    "stamp of {:.2} x {:.2} points exceeds the maximum side of {:.2}",
                    rect.width, rect.height, MAX_STAMP_DIMENSION
                )));
            }
            if let PagePolicy::Number(0) = position.page {
                return Err(Error::InvalidProfile("page numbers start at 1".to_owned()));
            }
        }
        Ok(())
    }
}

/// Profiles stored as `<root>/<id>.json`.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    pub fn new(root: PathBuf) -> Self {
        ProfileStore { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    /// All readable profiles sorted by name. Seeds the built-in profiles
    /// when nothing is stored yet.
    pub fn list(&self) -> Result<Vec<SignatureProfile>, Error> {
        let mut profiles = self.read_all()?;
        if profiles.is_empty() {
            log::info!("Creating default signature profiles in `{}`.", self.root.display());
            for profile in [
                SignatureProfile::builtin_invisible(),
                SignatureProfile::builtin_visible(),
            ] {
                self.save(&profile)?;
                profiles.push(profile);
            }
        }
        profiles.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(profiles)
    }

    fn read_all(&self) -> Result<Vec<SignatureProfile>, Error> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };
        let mut profiles = vec![];
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_profile(&path) {
                Ok(profile) => profiles.push(profile),
                // One broken record must not hide the others.
                Err(err) => log::warn!("Skipping profile `{}`: {}", path.display(), err),
            }
        }
        Ok(profiles)
    }

    pub fn get(&self, id: &str) -> Result<SignatureProfile, Error> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(Error::ProfileNotFound(id.to_owned()));
        }
        let path = self.record_path(id);
        if !path.is_file() {
            if SignatureProfile::is_builtin(id) && self.read_all()?.is_empty() {
                // First use: seeding creates the record.
                self.list()?;
            } else {
                return Err(Error::ProfileNotFound(id.to_owned()));
            }
        }
        read_profile(&path)
    }

    pub fn get_default(&self) -> Result<SignatureProfile, Error> {
        let profiles = self.list()?;
        if let Some(profile) = profiles.iter().find(|p| p.is_default) {
            return Ok(profile.clone());
        }
        Ok(profiles
            .into_iter()
            .find(|p| p.id == INVISIBLE_PROFILE_ID)
            .unwrap_or_else(SignatureProfile::builtin_invisible))
    }

    /// Validate, then replace the whole record.
    pub fn save(&self, profile: &SignatureProfile) -> Result<(), Error> {
        profile.validate()?;
        create_private_dir(&self.root)?;
        let data = serde_json::to_vec_pretty(profile)?;
        write_private_file(&self.record_path(&profile.id), &data)?;
        log::debug!("Saved signature profile `{}`.", profile.id);
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), Error> {
        if SignatureProfile::is_builtin(id) {
            return Err(Error::BuiltInProfile(id.to_owned()));
        }
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(Error::ProfileNotFound(id.to_owned()));
        }
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::ProfileNotFound(id.to_owned()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn read_profile(path: &Path) -> Result<SignatureProfile, Error> {
    let profile: SignatureProfile = serde_json::from_slice(&fs::read(path)?)?;
    Ok(profile)
}
