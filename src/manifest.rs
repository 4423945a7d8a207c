use crate::error::PipelineError;
use crate::odata::NodePath;
use crate::product::{product_node_name, Platform, ProductIdentifier};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Bulk payload extensions (imagery, compressed raster, vector geometry) that
/// are never fetched as metadata.
const EXCLUDED_EXTENSIONS: [&str; 3] = [".tiff", ".jp2", ".gml"];

pub fn is_excluded(href: &str) -> bool {
    let href = href.to_ascii_lowercase();
    EXCLUDED_EXTENSIONS.iter().any(|ext| href.contains(ext))
}

/// One auxiliary metadata file referenced by a manifest, relative to the
/// product root.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ManifestReference {
    /// Directory prefix, empty for files at the product root.
    pub directory: String,
    pub filename: String,
}

impl ManifestReference {
    /// Splits a manifest `href` into directory prefix and filename. Returns
    /// `None` for excluded payloads and empty references.
    pub fn from_href(href: &str) -> Option<Self> {
        if is_excluded(href) {
            return None;
        }
        let relative = href.strip_prefix("./").unwrap_or(href);
        let relative = relative.trim_end_matches('/');
        let (directory, filename) = match relative.rsplit_once('/') {
            Some((directory, filename)) => (directory, filename),
            None => ("", relative),
        };
        if filename.is_empty() {
            return None;
        }
        Some(Self {
            directory: directory.to_string(),
            filename: filename.to_string(),
        })
    }

    pub fn relative_path(&self) -> String {
        if self.directory.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.directory, self.filename)
        }
    }

    /// `<root>/<title>/<directory>/<filename>`
    pub fn destination(&self, root: &Path, title: &str) -> PathBuf {
        let mut path = root.join(title);
        for segment in self.directory.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path.join(&self.filename)
    }

    /// Content path of this file below the product's root node.
    pub fn node_path(&self, id: &ProductIdentifier, root_node: &str) -> String {
        NodePath::product(id)
            .node(root_node)
            .nodes(&self.directory)
            .node(&self.filename)
            .value()
    }
}

/// Node holding the product's files directly below the product.
pub fn root_node(platform: Platform, title: &str, suffix: &str) -> String {
    match platform {
        Platform::S3 | Platform::S3p => product_node_name(title, suffix),
        _ => title.to_string(),
    }
}

/// Source path of the product manifest. Products without a manifest (S5) are
/// a single payload served from the product's own `$value`.
pub fn manifest_path(
    id: &ProductIdentifier,
    title: &str,
    platform: Platform,
    suffix: &str,
) -> String {
    let product = NodePath::product(id);
    match platform.manifest_filename() {
        Some(manifest) => product
            .node(&root_node(platform, title, suffix))
            .node(manifest)
            .value(),
        None => product.value(),
    }
}

/// Local file name of the manifest: the manifest node name, or the product
/// title itself for single-payload products.
pub fn manifest_filename(platform: Platform, title: &str) -> String {
    platform
        .manifest_filename()
        .map(str::to_string)
        .unwrap_or_else(|| title.to_string())
}

pub struct Manifest {
    content: String,
}

impl Manifest {
    pub fn new(content: String) -> Self {
        Self { content }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::new(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Every `fileLocation` reference in document order, with bulk payloads
    /// filtered out.
    pub fn parse(&self) -> Result<Vec<ManifestReference>, PipelineError> {
        let doc = roxmltree::Document::parse(&self.content)?;

        let references = doc
            .descendants()
            .filter(|n| n.has_tag_name("fileLocation"))
            .filter_map(|n| n.attribute("href"))
            .filter_map(|href| {
                let reference = ManifestReference::from_href(href);
                if reference.is_none() {
                    debug!(href, "skipping manifest reference");
                }
                reference
            })
            .collect();
        Ok(references)
    }
}

/// Parses manifest bytes. Single-payload products have no references.
pub fn parse_manifest(
    xml: &[u8],
    platform: Platform,
) -> Result<Vec<ManifestReference>, PipelineError> {
    if !platform.has_manifest() {
        return Ok(vec![]);
    }
    Manifest::from_bytes(xml).parse()
}
