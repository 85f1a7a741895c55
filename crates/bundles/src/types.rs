use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ── Bundle kinds ─────────────────────────────────────────────────────────────

/// What a bundle is: code that extends the site, or a skin for one site area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    Plugin,
    Theme,
}

impl BundleKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plugin => "plugin",
            Self::Theme => "theme",
        }
    }
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BundleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plugin" => Ok(Self::Plugin),
            "theme" => Ok(Self::Theme),
            other => Err(Error::validation(format!("unknown bundle kind '{other}'"))),
        }
    }
}

/// The site area a theme skins. Exclusivity of active themes is per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeTarget {
    Frontend,
    Admin,
}

impl ThemeTarget {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Frontend => "frontend",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for ThemeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThemeTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "frontend" => Ok(Self::Frontend),
            "admin" => Ok(Self::Admin),
            other => Err(Error::validation(format!("unknown theme target '{other}'"))),
        }
    }
}

/// The manifest `type` field: a plugin, or a theme for one of the targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleType {
    Plugin,
    Frontend,
    Admin,
}

impl BundleType {
    #[must_use]
    pub fn kind(self) -> BundleKind {
        match self {
            Self::Plugin => BundleKind::Plugin,
            Self::Frontend | Self::Admin => BundleKind::Theme,
        }
    }

    #[must_use]
    pub fn theme_target(self) -> Option<ThemeTarget> {
        match self {
            Self::Plugin => None,
            Self::Frontend => Some(ThemeTarget::Frontend),
            Self::Admin => Some(ThemeTarget::Admin),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plugin => "plugin",
            Self::Frontend => "frontend",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for BundleType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plugin" => Ok(Self::Plugin),
            "frontend" => Ok(Self::Frontend),
            "admin" => Ok(Self::Admin),
            other => Err(Error::manifest_invalid(
                "type",
                format!("must be one of plugin, frontend, admin (got '{other}')"),
            )),
        }
    }
}

// ── Registry records ─────────────────────────────────────────────────────────

/// One installed plugin or theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleRecord {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub author_url: String,
    pub homepage_url: String,
    #[serde(default)]
    pub screenshot: Option<String>,
    pub module_name: String,
    pub kind: BundleKind,
    #[serde(default)]
    pub theme_target: Option<ThemeTarget>,
    pub is_active: bool,
    pub auto_activate: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub customization_options: Option<serde_json::Value>,
    pub raw_manifest: serde_json::Value,
    pub created_at: u64,
    pub updated_at: u64,
}

impl BundleRecord {
    #[must_use]
    pub fn is_theme(&self) -> bool {
        self.kind == BundleKind::Theme
    }
}

/// Everything needed to insert a record; the registry assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBundle {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub author_url: String,
    pub homepage_url: String,
    pub screenshot: Option<String>,
    pub module_name: String,
    pub kind: BundleKind,
    pub theme_target: Option<ThemeTarget>,
    pub auto_activate: bool,
    pub dependencies: Vec<String>,
    pub customization_options: Option<serde_json::Value>,
    pub raw_manifest: serde_json::Value,
}

/// Filter for registry listings. Empty filter lists everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BundleFilter {
    pub kind: Option<BundleKind>,
    pub theme_target: Option<ThemeTarget>,
    pub active: Option<bool>,
}

impl BundleFilter {
    #[must_use]
    pub fn plugins() -> Self {
        Self {
            kind: Some(BundleKind::Plugin),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn themes() -> Self {
        Self {
            kind: Some(BundleKind::Theme),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn active(mut self) -> Self {
        self.active = Some(true);
        self
    }

    #[must_use]
    pub fn target(mut self, target: ThemeTarget) -> Self {
        self.kind = Some(BundleKind::Theme);
        self.theme_target = Some(target);
        self
    }
}

// ── Uploads ──────────────────────────────────────────────────────────────────

/// An uploaded file as handed over by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedArchive {
    /// File name as sent by the client.
    pub original_name: String,
    pub size: u64,
    /// Readable temporary location of the upload.
    pub path: PathBuf,
}

impl UploadedArchive {
    /// Describe a file already on disk as an upload.
    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            original_name,
            size: metadata.len(),
            path: path.to_path_buf(),
        })
    }

    /// Extension of the client file name, lowercased.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.original_name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}
