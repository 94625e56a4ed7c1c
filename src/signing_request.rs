use crate::profile::{
    PagePolicy, Rect, SignaturePosition, SignatureProfile, Visibility, MAX_STAMP_DIMENSION,
};
use crate::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Used when an override leaves the width or height unset.
pub const DEFAULT_STAMP_WIDTH: f64 = 200.0;
pub const DEFAULT_STAMP_HEIGHT: f64 = 80.0;

/// Level of the signature written into the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    /// Locks the document; only form filling and further signatures stay allowed.
    Certification,
    /// Plain signature that adds no modification restrictions.
    Approval,
}

impl SignatureKind {
    pub fn for_visibility(visibility: Visibility) -> Self {
        match visibility {
            Visibility::Invisible => SignatureKind::Certification,
            Visibility::Visible => SignatureKind::Approval,
        }
    }
}

/// Caller chosen placement of a visible stamp. Replaces the profile position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionOverride {
    /// 1-based page number. `0` means the first page.
    pub page: u32,
    pub x: f64,
    pub y: f64,
    /// Values `<= 0` fall back to the default stamp size.
    pub width: f64,
    pub height: f64,
}

impl PositionOverride {
    /// Validate and normalize into a profile position.
    pub fn to_position(&self) -> Result<SignaturePosition, Error> {
        let width = if self.width > 0.0 {
            self.width
        } else {
            DEFAULT_STAMP_WIDTH
        };
        let height = if self.height > 0.0 {
            self.height
        } else {
            DEFAULT_STAMP_HEIGHT
        };
        if ![self.x, self.y, width, height].iter().all(|v| v.is_finite()) {
            return Err(Error::InvalidPosition(
                "coordinates must be finite numbers".to_owned(),
            ));
        }
        if self.x < 0.0 || self.y < 0.0 {
            return Err(Error::InvalidPosition(format!(
                "origin ({:.2}, {:.2}) lies outside the page",
                self.x, self.y
            )));
        }
        if width > MAX_STAMP_DIMENSION {
            return Err(Error::InvalidPosition(format!(
                "signature width too large: {:.2} points (maximum {:.2})",
                width, MAX_STAMP_DIMENSION
            )));
        }
        if height > MAX_STAMP_DIMENSION {
            return Err(Error::InvalidPosition(format!(
                "signature height too large: {:.2} points (maximum {:.2})",
                height, MAX_STAMP_DIMENSION
            )));
        }
        Ok(SignaturePosition {
            page: PagePolicy::Number(self.page.max(1)),
            rect: Rect {
                x: self.x,
                y: self.y,
                width,
                height,
            },
        })
    }

    /// Substitute into a visible profile. Invisible profiles ignore overrides.
    pub fn apply_to(&self, profile: &mut SignatureProfile) -> Result<(), Error> {
        if !profile.is_visible() {
            log::debug!(
                "Ignoring position override for invisible profile `{}`.",
                profile.name
            );
            return Ok(());
        }
        profile.position = Some(self.to_position()?);
        Ok(())
    }
}

/// Everything one signing call needs.
#[derive(Clone)]
pub struct SigningRequest {
    pub input: PathBuf,
    pub fingerprint: String,
    /// Password or PIN, may be empty.
    pub credential: Zeroizing<String>,
    /// `None` selects the default profile.
    pub profile_id: Option<String>,
    pub position: Option<PositionOverride>,
}

impl SigningRequest {
    pub fn new<P: Into<PathBuf>>(input: P, fingerprint: &str, credential: &str) -> Self {
        SigningRequest {
            input: input.into(),
            fingerprint: fingerprint.to_owned(),
            credential: Zeroizing::new(credential.to_owned()),
            profile_id: None,
            position: None,
        }
    }

    pub fn with_profile(mut self, profile_id: &str) -> Self {
        self.profile_id = Some(profile_id.to_owned());
        self
    }

    pub fn with_position(mut self, position: PositionOverride) -> Self {
        self.position = Some(position);
        self
    }

    pub fn output_path(&self) -> PathBuf {
        signed_output_path(&self.input)
    }
}

impl fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningRequest")
            .field("input", &self.input)
            .field("fingerprint", &self.fingerprint)
            .field("credential", &"<redacted>")
            .field("profile_id", &self.profile_id)
            .field("position", &self.position)
            .finish()
    }
}

/// `dir/name.pdf` becomes `dir/name_signed.pdf`, the extension keeps its case.
/// A file without extension gets `_signed.pdf`.
pub fn signed_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_owned());
    let file_name = match input.extension() {
        Some(ext) => format!("{}_signed.{}", stem, ext.to_string_lossy()),
        None => format!("{}_signed.pdf", stem),
    };
    input.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(width: f64, height: f64) -> PositionOverride {
        PositionOverride {
            page: 2,
            x: 10.0,
            y: 20.0,
            width,
            height,
        }
    }

    #[test]
    fn output_path_keeps_directory_and_extension_case() {
        assert_eq!(
            signed_output_path(Path::new("/tmp/docs/contract.PDF")),
            PathBuf::from("/tmp/docs/contract_signed.PDF")
        );
        assert_eq!(
            signed_output_path(Path::new("report.pdf")),
            PathBuf::from("report_signed.pdf")
        );
        assert_eq!(
            signed_output_path(Path::new("/tmp/scan")),
            PathBuf::from("/tmp/scan_signed.pdf")
        );
    }

    #[test]
    fn missing_size_falls_back_to_default_stamp() {
        let pos = position(0.0, -5.0).to_position().unwrap();
        assert_eq!(pos.rect.width, DEFAULT_STAMP_WIDTH);
        assert_eq!(pos.rect.height, DEFAULT_STAMP_HEIGHT);
        assert_eq!(pos.page, PagePolicy::Number(2));
    }

    #[test]
    fn oversized_rectangles_are_rejected() {
        assert!(matches!(
            position(2500.0, 80.0).to_position(),
            Err(Error::InvalidPosition(_))
        ));
        assert!(matches!(
            position(200.0, 2000.5).to_position(),
            Err(Error::InvalidPosition(_))
        ));
        assert!(position(2000.0, 2000.0).to_position().is_ok());
    }

    #[test]
    fn page_zero_means_first_page() {
        let mut pos = position(100.0, 50.0);
        pos.page = 0;
        assert_eq!(pos.to_position().unwrap().page, PagePolicy::Number(1));
    }

    #[test]
    fn invisible_profiles_ignore_overrides() {
        let mut invisible = SignatureProfile::builtin_invisible();
        position(50.0, 50.0).apply_to(&mut invisible).unwrap();
        assert!(invisible.position.is_none());

        let mut visible = SignatureProfile::builtin_visible();
        position(50.0, 40.0).apply_to(&mut visible).unwrap();
        assert_eq!(visible.position.unwrap().rect.height, 40.0);
    }

    #[test]
    fn signature_kind_follows_visibility() {
        assert_eq!(
            SignatureKind::for_visibility(Visibility::Invisible),
            SignatureKind::Certification
        );
        assert_eq!(
            SignatureKind::for_visibility(Visibility::Visible),
            SignatureKind::Approval
        );
    }

    #[test]
    fn debug_output_hides_the_credential() {
        let request = SigningRequest::new("a.pdf", "AB:CD", "hunter2");
        assert!(!format!("{:?}", request).contains("hunter2"));
    }
}
