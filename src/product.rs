use crate::error::PipelineError;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

const FIXED_ID_LEN: usize = 36;
const ID_SEGMENTS: usize = 4;
pub const DEFAULT_SUFFIX: &str = "SAFE";

/// Source archive product identifier (a UUID-like string).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductIdentifier(String);

impl ProductIdentifier {
    /// Accepts the identifier when it is exactly 36 characters long or when it
    /// splits into exactly four hyphen-separated segments.
    pub fn parse(id: &str) -> Result<Self, PipelineError> {
        if id.is_empty() {
            return Err(PipelineError::MalformedIdentifier(id.to_string()));
        }
        let fixed_len = id.chars().count() == FIXED_ID_LEN;
        let segmented = id.split('-').count() == ID_SEGMENTS;
        debug!(id, fixed_len, segmented, "checked product identifier shape");

        if fixed_len || segmented {
            Ok(Self(id.to_string()))
        } else {
            Err(PipelineError::MalformedIdentifier(id.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shorthand kept for callers that only need the yes/no answer.
pub fn check_source_id(id: &str) -> bool {
    ProductIdentifier::parse(id).is_ok()
}

/// Satellite platform family, decides manifest dialect and builder command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    S1,
    S2,
    S3,
    S3p,
    S5,
}

impl Platform {
    /// Derives the platform from the first two characters of a product name.
    pub fn from_product_name(name: &str) -> Result<Self, PipelineError> {
        let code = name
            .get(..2)
            .ok_or_else(|| PipelineError::UnknownPlatform(name.to_string()))?;
        code.parse()
            .map_err(|_| PipelineError::UnknownPlatform(name.to_string()))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::S1 => "S1",
            Self::S2 => "S2",
            Self::S3 => "S3",
            Self::S3p => "S3p",
            Self::S5 => "S5",
        }
    }

    /// Name of the manifest node inside the product, `None` when the product is
    /// a single payload without a manifest.
    pub fn manifest_filename(&self) -> Option<&'static str> {
        match self {
            Self::S1 | Self::S2 => Some("manifest.safe"),
            Self::S3 | Self::S3p => Some("xfdumanifest.xml"),
            Self::S5 => None,
        }
    }

    pub fn has_manifest(&self) -> bool {
        self.manifest_filename().is_some()
    }
}

impl FromStr for Platform {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S1" => Ok(Self::S1),
            "S2" => Ok(Self::S2),
            "S3" => Ok(Self::S3),
            "S3p" => Ok(Self::S3p),
            "S5" => Ok(Self::S5),
            _ => Err(PipelineError::UnknownPlatform(s.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// First dotted segment of the first candidate that has one, so a bare node
/// title can borrow the suffix of another listing entry or the product name.
/// Falls back to `SAFE`.
pub fn suffix_from_titles<S: AsRef<str>>(titles: &[S]) -> String {
    titles
        .iter()
        .filter_map(|title| title.as_ref().split('.').nth(1))
        .find(|suffix| !suffix.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_SUFFIX.to_string())
}

/// Product root node name. Titles that already carry a dotted suffix are used
/// as they are; bare titles get the suffix appended.
pub fn product_node_name(title: &str, suffix: &str) -> String {
    if title.contains('.') {
        title.to_string()
    } else {
        format!("{title}.{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_fixed_length_regardless_of_hyphens() {
        assert!(check_source_id("8f9e2c3a-1b2c-4d5e-9f00-aabbccddeeff"));
        assert!(check_source_id("8f9e2c3a1b2c4d5e9f00aabbccddeeff1234"));
        assert!(check_source_id("a-b-c-d-e-f-g-h-i-j-k-l-m-n-o-p-q-rs"));
    }

    #[test]
    fn test_accepts_four_segments_of_any_length() {
        assert!(check_source_id("abc-123-def-456"));
        assert!(check_source_id("a-b-c-d"));
    }

    #[test]
    fn test_rejects_malformed_identifiers() {
        assert!(!check_source_id(""));
        assert!(!check_source_id("abc-123"));
        assert!(!check_source_id("a-b-c-d-e"));
        assert!(matches!(
            ProductIdentifier::parse("short"),
            Err(PipelineError::MalformedIdentifier(_))
        ));
    }

    #[test]
    fn test_platform_from_product_name() {
        let name = "S2A_MSIL2A_20230101T100000_N0509_R122_T33UVP_20230101T120000";
        assert_eq!(Platform::from_product_name(name).unwrap(), Platform::S2);
        assert_eq!(
            Platform::from_product_name("S5P_OFFL_L2__NO2____2023").unwrap(),
            Platform::S5
        );
        assert!(Platform::from_product_name("LC08_L1TP").is_err());
        assert!(Platform::from_product_name("S").is_err());
    }

    #[test]
    fn test_manifest_filename_by_platform() {
        assert_eq!(Platform::S1.manifest_filename(), Some("manifest.safe"));
        assert_eq!(Platform::S2.manifest_filename(), Some("manifest.safe"));
        assert_eq!(Platform::S3.manifest_filename(), Some("xfdumanifest.xml"));
        assert_eq!(Platform::S3p.manifest_filename(), Some("xfdumanifest.xml"));
        assert_eq!(Platform::S5.manifest_filename(), None);
    }

    #[test]
    fn test_suffix_from_titles() {
        assert_eq!(suffix_from_titles::<&str>(&[]), "SAFE");
        assert_eq!(suffix_from_titles(&["S2A_MSIL2A_X"]), "SAFE");
        assert_eq!(suffix_from_titles(&["S2A_MSIL2A_X.SAFE"]), "SAFE");
        assert_eq!(suffix_from_titles(&["S3A_OL_1_EFR_X.SEN3".to_string()]), "SEN3");
    }

    #[test]
    fn test_bare_title_borrows_later_suffix() {
        let candidates = ["S3A_OL_1_EFR_X", "S3A_OL_1_EFR_X.SEN3"];
        let suffix = suffix_from_titles(&candidates);
        assert_eq!(suffix, "SEN3");
        assert_eq!(
            product_node_name(candidates[0], &suffix),
            "S3A_OL_1_EFR_X.SEN3"
        );
        assert_eq!(suffix_from_titles(&["S3A_X", "notes."]), "SAFE");
    }

    #[test]
    fn test_product_node_name() {
        assert_eq!(product_node_name("S3A_OL_1_X", "SEN3"), "S3A_OL_1_X.SEN3");
        assert_eq!(product_node_name("S3A_OL_1_X.SEN3", "SAFE"), "S3A_OL_1_X.SEN3");
    }
}
