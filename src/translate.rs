use crate::error::PipelineError;
use crate::odata::nodes_chain;
use crate::product::Platform;
use crate::stac_item::StacItemDocument;
use regex::Regex;
use tracing::{debug, info, warn};

pub const ITEM_ID_NAMESPACE: &str = "dhr1";

/// Prefix of the catalog's test collections.
pub const TEST_COLLECTION_PREFIX: &str = "mp-";

/// Source product name patterns and the catalog collection each maps to,
/// in evaluation order.
const COLLECTION_RULES: [(&str, &str); 19] = [
    (r"^S1[A-DP]_.._GRD[HM]_.*", "sentinel-1-grd"),
    (r"^S1[A-DP]_.._SLC__.*", "sentinel-1-slc"),
    (r"^S1[A-DP]_.._RAW__.*", "sentinel-1-raw"),
    (r"^S1[A-DP]_.._OCN__.*", "sentinel-1-ocn"),
    (r"^S2[A-DP]_MSIL1B_.*", "sentinel-2-l1b"),
    (r"^S2[A-DP]_MSIL1C_.*", "sentinel-2-l1c"),
    (r"^S2[A-DP]_MSIL2A_.*", "sentinel-2-l2a"),
    (r"^S3[A-DP]_OL_1_.*", "sentinel-3-olci-l1b"),
    (r"^S3[A-DP]_OL_2_.*", "sentinel-3-olci-l2"),
    (r"^S3[A-DP]_SL_1_.*", "sentinel-3-slstr-l1b"),
    (r"^S3[A-DP]_SL_2_.*", "sentinel-3-slstr-l2"),
    (r"^S3[A-DP]_SR_1_.*", "sentinel-3-stm-l1"),
    (r"^S3[A-DP]_SR_2_.*", "sentinel-3-stm-l2"),
    (r"^S3[A-DP]_SY_1_.*", "sentinel-3-syn-l1"),
    (r"^S3[A-DP]_SY_2_.*", "sentinel-3-syn-l2"),
    (r"^S5[A-DP]_OFFL_L1_.*", "sentinel-5p-l1"),
    (r"^S5[A-DP]_NRTI_L1_.*", "sentinel-5p-l1"),
    (r"^S5[A-DP]_OFFL_L2_.*", "sentinel-5p-l2"),
    (r"^S5[A-DP]_NRTI_L2_.*", "sentinel-5p-l2"),
];

/// Ordered (pattern, collection) rules; the first rule that rewrites a title
/// wins.
pub struct CollectionMapping {
    rules: Vec<(Regex, String)>,
    prefix: String,
}

impl CollectionMapping {
    pub fn new(prefix: &str) -> Self {
        let rules = COLLECTION_RULES
            .iter()
            .map(|(pattern, collection)| {
                let re = Regex::new(pattern).expect("Regex pattern should always compile");
                (re, collection.to_string())
            })
            .collect();
        Self {
            rules,
            prefix: prefix.to_string(),
        }
    }

    fn translate(&self, title: &str) -> Option<String> {
        self.rules.iter().find_map(|(re, collection)| {
            let replaced = re.replace(title, collection.as_str());
            (replaced != title).then(|| replaced.into_owned())
        })
    }

    pub fn resolve<S: AsRef<str>>(&self, titles: &[S]) -> Result<String, PipelineError> {
        for title in titles {
            let title = title.as_ref();
            if let Some(collection) = self.translate(title) {
                let resolved = format!("{}{}", self.prefix, collection);
                info!(title, collection = %resolved, "resolved collection");
                return Ok(resolved);
            }
        }
        let shown = titles
            .iter()
            .map(|t| t.as_ref())
            .collect::<Vec<_>>()
            .join(", ");
        Err(PipelineError::UnmappedProduct(shown))
    }
}

/// Test-catalog collection for the first recognizable title.
pub fn resolve_collection<S: AsRef<str>>(
    titles: &[S],
    platform: Platform,
) -> Result<String, PipelineError> {
    debug!(%platform, "resolving collection");
    CollectionMapping::new(TEST_COLLECTION_PREFIX).resolve(titles)
}

/// `https://<host>/odata/v1/Products('<id>')/Nodes('a')/Nodes('b')...`
pub fn asset_url(host: &str, product_id: &str, href: &str) -> String {
    let href = href.strip_suffix('/').unwrap_or(href);
    format!(
        "https://{host}/odata/v1/Products('{product_id}')/{}",
        nodes_chain(href.split('/'))
    )
}

pub fn item_id(product_id: &str) -> String {
    format!("{ITEM_ID_NAMESPACE}{product_id}")
}

/// Points every asset `href` at the product's nodes on `host` and replaces
/// the item id. Returns the number of rewritten assets.
pub fn rewrite_hrefs(item: &mut StacItemDocument, host: &str, product_id: &str) -> usize {
    item.set_id(&item_id(product_id));

    let Some(assets) = item.assets_mut() else {
        warn!("item has no assets");
        return 0;
    };

    let mut rewritten = 0;
    for (key, asset) in assets.iter_mut() {
        let Some(asset) = asset.as_object_mut() else {
            warn!(asset = %key, "asset is not an object, skipping");
            continue;
        };
        let Some(href) = asset.get("href").and_then(|h| h.as_str()) else {
            continue;
        };
        if href.is_empty() {
            warn!(asset = %key, "empty href, skipping");
            continue;
        }
        let url = asset_url(host, product_id, href);
        debug!(asset = %key, %url, "rewrote href");
        asset.insert("href".to_string(), url.into());
        rewritten += 1;
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_collection() {
        assert_eq!(
            resolve_collection(
                &["S2A_MSIL2A_20230101T100000_N0509_R122_T33UVP_20230101T120000"],
                Platform::S2
            )
            .unwrap(),
            "mp-sentinel-2-l2a"
        );
        assert_eq!(
            resolve_collection(&["S1A_IW_GRDH_1SDV_20230101T050000"], Platform::S1).unwrap(),
            "mp-sentinel-1-grd"
        );
        assert_eq!(
            resolve_collection(&["S5P_NRTI_L2__NO2____20230101T100000"], Platform::S5).unwrap(),
            "mp-sentinel-5p-l2"
        );
    }

    #[test]
    fn test_mapping_with_custom_prefix() {
        let mapping = CollectionMapping::new("");
        assert_eq!(
            mapping.resolve(&["S3B_OL_1_EFR____20230101T100000.SEN3"]).unwrap(),
            "sentinel-3-olci-l1b"
        );
        let mapping = CollectionMapping::new("ops-");
        assert_eq!(
            mapping.resolve(&["S1A_EW_GRDM_1SDH_20230101"]).unwrap(),
            "ops-sentinel-1-grd"
        );
    }

    #[test]
    fn test_unrecognized_title_is_an_error() {
        assert!(matches!(
            resolve_collection(&["XYZ_UNKNOWN"], Platform::S2),
            Err(PipelineError::UnmappedProduct(_))
        ));
        assert!(resolve_collection::<&str>(&[], Platform::S2).is_err());
    }

    #[test]
    fn test_later_titles_are_tried() {
        assert_eq!(
            resolve_collection(&["node.xml", "S2B_MSIL1C_20230101"], Platform::S2).unwrap(),
            "mp-sentinel-2-l1c"
        );
    }

    #[test]
    fn test_asset_url() {
        assert_eq!(
            asset_url("example.org", "abc-123", "GRANULE/L2A_T33/IMG_DATA/B01.jp2"),
            "https://example.org/odata/v1/Products('abc-123')/Nodes('GRANULE')/Nodes('L2A_T33')/Nodes('IMG_DATA')/Nodes('B01.jp2')"
        );
        assert_eq!(
            asset_url("example.org", "abc-123", "GRANULE/"),
            "https://example.org/odata/v1/Products('abc-123')/Nodes('GRANULE')"
        );
    }

    #[test]
    fn test_rewrite_hrefs() {
        let mut item = StacItemDocument::from_value(json!({
            "type": "Feature",
            "id": "S2A_X",
            "assets": {
                "B01": {"href": "GRANULE/L2A_T33/IMG_DATA/B01.jp2", "type": "image/jp2"},
                "thumbnail": {"title": "no href"},
                "broken": "not an object",
            }
        }))
        .unwrap();

        assert_eq!(rewrite_hrefs(&mut item, "example.org", "abc-123"), 1);
        let value = item.as_value();
        assert_eq!(value["id"], "dhr1abc-123");
        assert_eq!(
            value["assets"]["B01"]["href"],
            "https://example.org/odata/v1/Products('abc-123')/Nodes('GRANULE')/Nodes('L2A_T33')/Nodes('IMG_DATA')/Nodes('B01.jp2')"
        );
        assert_eq!(value["assets"]["B01"]["type"], "image/jp2");
        assert_eq!(value["assets"]["thumbnail"], json!({"title": "no href"}));
        assert_eq!(value["assets"]["broken"], "not an object");
    }
}
