use serde::{Deserialize, Serialize};

use crate::identity::{color_for, initials_for};

/// Namespace an avatar record lives in.
///
/// User and room avatars are cached, bounded and evicted independently,
/// so a burst of room joins can never push user avatars out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarNamespace {
    User,
    Room,
}

impl AvatarNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvatarNamespace::User => "user",
            AvatarNamespace::Room => "room",
        }
    }
}

/// Presentation metadata for one user or room avatar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvatarRecord {
    /// Name shown alongside the avatar.
    pub display_name: String,
    /// Optional image source; initials are rendered when absent.
    pub image_url: Option<String>,
    /// Background color token from the fixed palette.
    pub color: String,
    /// Up to two uppercased initials derived from the display name.
    pub initials: String,
}

impl AvatarRecord {
    /// Build the default record for an id, deriving color and initials
    /// from the display name hint when one is given, else from the id.
    pub fn generated(id: &str, display_name_hint: Option<&str>) -> Self {
        let seed = display_name_hint
            .filter(|hint| !hint.trim().is_empty())
            .unwrap_or(id);
        Self {
            display_name: seed.to_owned(),
            image_url: None,
            color: color_for(seed).to_owned(),
            initials: initials_for(seed),
        }
    }

    /// Merge the provided fields of `patch` into this record. Fields the
    /// patch leaves out are untouched; nothing is re-derived.
    pub fn apply(&mut self, patch: &AvatarPatch) {
        if let Some(display_name) = &patch.display_name {
            self.display_name = display_name.clone();
        }
        if let Some(image_url) = &patch.image_url {
            self.image_url = Some(image_url.clone());
        }
        if let Some(color) = &patch.color {
            self.color = color.clone();
        }
        if let Some(initials) = &patch.initials {
            self.initials = initials.clone();
        }
    }
}

/// Partial avatar update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvatarPatch {
    pub display_name: Option<String>,
    pub image_url: Option<String>,
    pub color: Option<String>,
    pub initials: Option<String>,
}

impl AvatarPatch {
    /// Patch that only renames.
    pub fn display_name(display_name: impl Into<String>) -> Self {
        Self {
            display_name: Some(display_name.into()),
            ..Self::default()
        }
    }

    /// Patch that only swaps the image.
    pub fn image_url(image_url: impl Into<String>) -> Self {
        Self {
            image_url: Some(image_url.into()),
            ..Self::default()
        }
    }
}
