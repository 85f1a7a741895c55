//! `module.json` parsing and validation.

use std::path::Path;

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::{
    error::{Error, Result},
    types::{BundleKind, BundleType, NewBundle, ThemeTarget},
};

/// Fields every manifest must carry, in the order they are checked.
const REQUIRED_FIELDS: [&str; 4] = ["name", "slug", "version", "type"];

/// Optional manifest fields, as found on disk.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OptionalFields {
    description: Option<String>,
    author: Option<String>,
    author_url: Option<String>,
    homepage_url: Option<String>,
    plugin_url: Option<String>,
    theme_url: Option<String>,
    screenshot: Option<String>,
    dependencies: Vec<String>,
    customization_options: Option<Value>,
    auto_activate: bool,
}

impl OptionalFields {
    /// `homepage_url`, else `plugin_url`, else `theme_url`.
    fn homepage_url(&self) -> Option<String> {
        [&self.homepage_url, &self.plugin_url, &self.theme_url]
            .into_iter()
            .flatten()
            .find(|url| !url.trim().is_empty())
            .cloned()
    }
}

/// A validated bundle manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleManifest {
    pub name: String,
    pub slug: String,
    pub version: String,
    #[serde(rename = "type")]
    pub bundle_type: BundleType,
    pub description: String,
    pub author: String,
    pub author_url: String,
    pub homepage_url: String,
    pub screenshot: Option<String>,
    /// Slugs that must be active before this bundle activates.
    pub dependencies: Vec<String>,
    pub customization_options: Option<Value>,
    pub auto_activate: bool,
    /// Studly-cased `name`; the module directory and host key.
    pub module_name: String,
    /// The manifest exactly as parsed.
    #[serde(skip)]
    pub raw: Value,
}

impl BundleManifest {
    #[must_use]
    pub fn kind(&self) -> BundleKind {
        self.bundle_type.kind()
    }

    #[must_use]
    pub fn theme_target(&self) -> Option<ThemeTarget> {
        self.bundle_type.theme_target()
    }

    /// Fail when the manifest declares a different kind than the caller asked for.
    pub fn ensure_kind(&self, expected: BundleKind) -> Result<()> {
        if self.kind() == expected {
            return Ok(());
        }
        Err(Error::manifest_invalid(
            "type",
            format!(
                "declares a {} ('{}') but a {expected} was expected",
                self.kind(),
                self.bundle_type.as_str()
            ),
        ))
    }

    /// Registry row for this manifest. Themes never auto-activate.
    #[must_use]
    pub fn to_new_bundle(&self) -> NewBundle {
        let is_theme = self.kind() == BundleKind::Theme;
        NewBundle {
            slug: self.slug.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            author: self.author.clone(),
            author_url: self.author_url.clone(),
            homepage_url: self.homepage_url.clone(),
            screenshot: self.screenshot.clone(),
            module_name: self.module_name.clone(),
            kind: self.kind(),
            theme_target: self.theme_target(),
            auto_activate: self.auto_activate && !is_theme,
            dependencies: self.dependencies.clone(),
            customization_options: self.customization_options.clone(),
            raw_manifest: self.raw.clone(),
        }
    }
}

/// Read and validate `manifest_file` from the bundle root `dir`.
pub async fn load_manifest(dir: &Path, manifest_file: &str) -> Result<BundleManifest> {
    let path = dir.join(manifest_file);
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::ManifestMissing {
                file: manifest_file.to_string(),
                dir: dir.to_path_buf(),
            });
        },
        Err(e) => return Err(e.into()),
    };
    parse_manifest(&raw, &path)
}

/// Parse manifest text. `path` is only used in error messages.
pub fn parse_manifest(raw: &str, path: &Path) -> Result<BundleManifest> {
    let value: Value = serde_json::from_str(raw).map_err(|source| Error::ManifestParse {
        path: path.to_path_buf(),
        source,
    })?;
    from_value(value, path)
}

fn from_value(value: Value, path: &Path) -> Result<BundleManifest> {
    for field in REQUIRED_FIELDS {
        match value.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => {},
            Some(Value::String(_)) => {
                return Err(Error::manifest_invalid(field, "must not be empty"));
            },
            Some(_) => return Err(Error::manifest_invalid(field, "must be a string")),
            None => return Err(Error::manifest_invalid(field, "is required")),
        }
    }
    let required = |field: &str| {
        value
            .get(field)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    let name = required("name");
    let slug = required("slug");
    let version = required("version");
    let bundle_type: BundleType = required("type").parse()?;

    if !is_valid_slug(&slug) {
        return Err(Error::manifest_invalid(
            "slug",
            format!("'{slug}' must be lowercase letters, digits, '-' or '_'"),
        ));
    }
    let module_name = studly_case(&name);
    if !is_valid_module_name(&module_name) {
        return Err(Error::manifest_invalid(
            "name",
            format!("'{name}' does not produce a valid module name"),
        ));
    }

    let optional: OptionalFields =
        serde_json::from_value(value.clone()).map_err(|source| Error::ManifestParse {
            path: path.to_path_buf(),
            source,
        })?;

    if let Some(dep) = optional.dependencies.iter().find(|d| !is_valid_slug(d)) {
        return Err(Error::manifest_invalid(
            "dependencies",
            format!("'{dep}' is not a valid slug"),
        ));
    }
    if optional.dependencies.iter().any(|d| *d == slug) {
        return Err(Error::manifest_invalid(
            "dependencies",
            "a bundle cannot depend on itself",
        ));
    }
    if optional
        .customization_options
        .as_ref()
        .is_some_and(|opts| !opts.is_object())
    {
        return Err(Error::manifest_invalid(
            "customization_options",
            "must be an object",
        ));
    }

    let homepage_url = optional.homepage_url().unwrap_or_default();
    Ok(BundleManifest {
        name,
        slug,
        version,
        bundle_type,
        description: optional.description.unwrap_or_default(),
        author: optional.author.unwrap_or_default(),
        author_url: optional.author_url.unwrap_or_default(),
        homepage_url,
        screenshot: optional.screenshot.filter(|s| !s.is_empty()),
        dependencies: optional.dependencies,
        customization_options: optional.customization_options,
        auto_activate: optional.auto_activate,
        module_name,
        raw: value,
    })
}

/// `[a-z0-9][a-z0-9-_]*`
#[must_use]
pub fn is_valid_slug(slug: &str) -> bool {
    let mut chars = slug.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn is_valid_module_name(module_name: &str) -> bool {
    !module_name.is_empty() && module_name.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Studly-case a display name: `"media core"` → `MediaCore`.
///
/// Words are split on whitespace, `-` and `_`; each word gets an upper-case
/// first letter and keeps the rest unchanged.
#[must_use]
pub fn studly_case(name: &str) -> String {
    name.split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Derive a slug from a display name: `"Media Core!"` → `media-core`.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}
