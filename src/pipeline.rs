//! One product, end to end: source metadata, manifest, auxiliary files, item
//! builder, href rewrite, upload and verification.
use crate::builder::ItemBuilder;
use crate::catalog::{CatalogClient, Verification};
use crate::client::{Body, HostClient};
use crate::config::Config;
use crate::error::PipelineError;
use crate::fetcher::{CacheAwareFetcher, FetchReport, FileOutcome, FileTarget};
use crate::manifest::{manifest_filename, manifest_path, parse_manifest, root_node, ManifestReference};
use crate::odata::{self, NodePath};
use crate::product::{suffix_from_titles, Platform, ProductIdentifier};
use crate::stac_item::{find_newest_item, read_item_from_file, UPLOAD_FILE_NAME};
use crate::translate::{rewrite_hrefs, CollectionMapping};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// What the source archive says about a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceProduct {
    pub id: ProductIdentifier,
    /// `properties/Name` of the product.
    pub name: String,
    pub platform: Platform,
    /// Names of the product's top-level nodes; the first is the title.
    pub titles: Vec<String>,
    pub suffix: String,
}

impl SourceProduct {
    pub fn title(&self) -> &str {
        self.titles.first().map(String::as_str).unwrap_or_default()
    }

    pub fn root_node(&self) -> String {
        root_node(self.platform, self.title(), &self.suffix)
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub product: SourceProduct,
    pub collection: String,
    pub files: FetchReport,
    pub item: PathBuf,
    pub feature_id: String,
    pub verification: Verification,
}

pub struct Pipeline<'a> {
    config: &'a Config,
    source: HostClient,
    catalog: CatalogClient,
    builder: ItemBuilder,
    mapping: CollectionMapping,
}

fn client_error(err: anyhow::Error) -> PipelineError {
    PipelineError::Config(format!("unable to set up HTTP client: {err}"))
}

fn body_text<'b>(body: &'b Body, what: &str) -> Result<&'b str, PipelineError> {
    body.text()
        .ok_or_else(|| PipelineError::MissingMetadata(format!("{what} (not UTF-8)")))
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config) -> Result<Self, PipelineError> {
        let source = HostClient::new(&config.source, config.timeout()).map_err(client_error)?;
        let catalog = CatalogClient::new(&config.target, config.timeout()).map_err(client_error)?;
        Ok(Self {
            config,
            source,
            catalog,
            builder: ItemBuilder::new(&config.builder),
            mapping: CollectionMapping::new(&config.collection_prefix),
        })
    }

    fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    fn fetcher(&self) -> CacheAwareFetcher<'_, HostClient> {
        CacheAwareFetcher::new(&self.source, self.config.use_cache)
    }

    pub async fn run(&self, id: &ProductIdentifier) -> Result<RunReport, PipelineError> {
        info!(
            id = %id,
            source = %self.source.host(),
            source_user = %self.config.source.credentials.username,
            target = %self.catalog.host(),
            target_user = %self.config.target.credentials.username,
            use_cache = self.config.use_cache,
            "starting run"
        );
        fs::create_dir_all(self.output_dir())?;

        let product = self.resolve_product(id).await?;
        let collection = self
            .mapping
            .resolve(&[product.title(), product.name.as_str()])?;

        let files = if product.platform.has_manifest() {
            let references = self.fetch_manifest(&product).await?;
            self.fetch_references(&product, &references).await
        } else {
            self.stage_payload(&product).await?
        };

        self.builder
            .run(product.platform, product.title(), self.output_dir())
            .await?;
        let item = self.prepare_upload(&product)?;

        self.check_collection(&collection).await;
        let upload = fs::read(self.output_dir().join(UPLOAD_FILE_NAME))?;
        let receipt = self.catalog.upload(&collection, upload).await?;
        let log = receipt.write_log(self.output_dir())?;
        info!(path = %log.display(), "upload log written");

        let verification = self
            .catalog
            .verify(&collection, &receipt.feature.feature_id)
            .await;
        if verification.is_verified() {
            receipt.write_verified(self.output_dir(), &product.name)?;
        }

        Ok(RunReport {
            product,
            collection,
            files,
            item,
            feature_id: receipt.feature.feature_id,
            verification,
        })
    }

    /// Product name, platform and node titles. Both source documents are
    /// required and kept in the output directory.
    #[instrument(skip_all, fields(id = %id))]
    pub async fn resolve_product(&self, id: &ProductIdentifier) -> Result<SourceProduct, PipelineError> {
        let product = NodePath::product(id);

        let metadata = self
            .source
            .fetch(&product.path(), false)
            .await
            .ok_or_else(|| PipelineError::MissingMetadata("product metadata".to_string()))?;
        fs::write(self.output_dir().join(format!("{id}.xml")), metadata.as_bytes())?;
        let name = odata::product_name(body_text(&metadata, "product metadata")?)
            .map_err(|err| PipelineError::MissingMetadata(format!("product metadata ({err})")))?
            .ok_or_else(|| PipelineError::MissingMetadata("product name".to_string()))?;
        let platform = Platform::from_product_name(&name)?;

        let listing = self
            .source
            .fetch(&product.listing(), false)
            .await
            .ok_or_else(|| PipelineError::MissingMetadata("node listing".to_string()))?;
        fs::write(self.output_dir().join(format!("{id}.nodes.xml")), listing.as_bytes())?;
        let entries = odata::parse_entries(body_text(&listing, "node listing")?)
            .map_err(|err| PipelineError::MissingMetadata(format!("node listing ({err})")))?;
        let titles: Vec<String> = entries
            .iter()
            .filter_map(|entry| {
                debug!(entry = ?entry.id, title = ?entry.title, "listing entry");
                entry.display_name().map(str::to_string)
            })
            .collect();
        if titles.is_empty() {
            return Err(PipelineError::MissingMetadata("product title".to_string()));
        }
        let candidates = [titles.as_slice(), std::slice::from_ref(&name)].concat();
        let suffix = suffix_from_titles(&candidates);

        info!(%name, %platform, title = %titles[0], %suffix, "resolved product");
        Ok(SourceProduct {
            id: id.clone(),
            name,
            platform,
            titles,
            suffix,
        })
    }

    /// Downloads the manifest (cache-aware) and lists the metadata files it
    /// references.
    #[instrument(skip_all, fields(title = %product.title()))]
    pub async fn fetch_manifest(
        &self,
        product: &SourceProduct,
    ) -> Result<Vec<ManifestReference>, PipelineError> {
        let target = FileTarget::new(
            manifest_path(&product.id, product.title(), product.platform, &product.suffix),
            self.output_dir()
                .join(product.title())
                .join(manifest_filename(product.platform, product.title())),
        );
        if self.fetcher().fetch_file(&target).await == FileOutcome::Failed {
            return Err(PipelineError::MissingMetadata("manifest".to_string()));
        }
        let references = parse_manifest(&fs::read(&target.destination)?, product.platform)?;
        info!(count = references.len(), "manifest references");
        Ok(references)
    }

    #[instrument(skip_all, fields(title = %product.title()))]
    pub async fn fetch_references(
        &self,
        product: &SourceProduct,
        references: &[ManifestReference],
    ) -> FetchReport {
        self.fetcher()
            .fetch_all(
                self.output_dir(),
                &product.id,
                &product.root_node(),
                product.title(),
                references,
            )
            .await
    }

    /// Single-payload products: moves a payload left inside a `<title>/`
    /// directory to `<title>`, then fetches it when still missing.
    #[instrument(skip_all, fields(title = %product.title()))]
    pub async fn stage_payload(&self, product: &SourceProduct) -> Result<FetchReport, PipelineError> {
        let destination = self.output_dir().join(product.title());
        relocate_payload(self.output_dir(), product.title());

        let target = FileTarget::new(
            manifest_path(&product.id, product.title(), product.platform, &product.suffix),
            destination.clone(),
        );
        let outcome = self.fetcher().streaming(true).fetch_file(&target).await;
        let mut report = FetchReport::default();
        match outcome {
            FileOutcome::SkippedCached => report.skipped.push(destination),
            FileOutcome::Downloaded => report.downloaded.push(destination),
            FileOutcome::Failed => {
                return Err(PipelineError::MissingMetadata("product payload".to_string()));
            }
        }
        Ok(report)
    }

    /// Picks up the builder output, rewrites it for the catalog and writes
    /// the upload file. Returns the builder output path.
    #[instrument(skip_all, fields(title = %product.title()))]
    pub fn prepare_upload(&self, product: &SourceProduct) -> Result<PathBuf, PipelineError> {
        let path = find_newest_item(self.output_dir(), product.platform)
            .map_err(|err| {
                warn!(error = %err, "unable to list builder output");
                PipelineError::NoItemOutput(self.output_dir().to_path_buf())
            })?
            .ok_or_else(|| PipelineError::NoItemOutput(self.output_dir().to_path_buf()))?;
        info!(path = %path.display(), "builder output");

        let mut item = read_item_from_file(&path)?;
        let rewritten = rewrite_hrefs(&mut item, self.catalog.host(), product.id.as_str());
        info!(rewritten, "asset hrefs rewritten");

        let upload = self.output_dir().join(UPLOAD_FILE_NAME);
        item.write(&upload)?;
        info!(path = %upload.display(), "upload ready");
        Ok(path)
    }

    async fn check_collection(&self, collection: &str) {
        match self.catalog.collections().await {
            Ok(collections) if collections.iter().any(|c| c == collection) => {
                info!(collection, "collection found in catalog");
            }
            Ok(collections) => {
                warn!(collection, available = collections.len(), "collection not listed by catalog");
            }
            Err(err) => warn!(error = %err, "unable to list catalog collections"),
        }
    }
}

/// `<out>/<title>/<title>` becomes `<out>/<title>`. Each step is logged and
/// a failed step does not stop the next one.
pub fn relocate_payload(output_dir: &Path, title: &str) -> bool {
    let dir = output_dir.join(title);
    if !dir.is_dir() || !dir.join(title).is_file() {
        return false;
    }
    let temp = output_dir.join(format!("{title}_tmp"));
    if let Err(err) = fs::rename(&dir, &temp) {
        warn!(from = %dir.display(), to = %temp.display(), error = %err, "unable to move payload directory");
        return false;
    }
    let moved = match fs::rename(temp.join(title), &dir) {
        Ok(()) => true,
        Err(err) => {
            warn!(to = %dir.display(), error = %err, "unable to move payload");
            false
        }
    };
    if let Err(err) = fs::remove_dir(&temp) {
        warn!(path = %temp.display(), error = %err, "unable to remove temporary directory");
    }
    if moved {
        info!(path = %dir.display(), "payload relocated");
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relocate_payload() {
        let dir = tempfile::tempdir().unwrap();
        let title = "S5P_OFFL_L2__NO2____20230101T100000.nc";
        fs::create_dir_all(dir.path().join(title)).unwrap();
        fs::write(dir.path().join(title).join(title), b"netcdf").unwrap();

        assert!(relocate_payload(dir.path(), title));
        assert_eq!(fs::read(dir.path().join(title)).unwrap(), b"netcdf");
        assert!(!dir.path().join(format!("{title}_tmp")).exists());

        // Already in place: nothing to do.
        assert!(!relocate_payload(dir.path(), title));
        assert!(dir.path().join(title).is_file());
    }

    #[test]
    fn test_relocate_payload_keeps_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        let title = "S5P_X.nc";
        fs::create_dir_all(dir.path().join(title)).unwrap();
        fs::write(dir.path().join(title).join(title), b"netcdf").unwrap();
        fs::write(dir.path().join(title).join("notes.txt"), b"x").unwrap();

        assert!(relocate_payload(dir.path(), title));
        assert!(dir.path().join(title).is_file());
        // Not empty, so the temporary directory stays behind.
        assert!(dir.path().join("S5P_X.nc_tmp/notes.txt").exists());
    }

    #[test]
    fn test_relocate_without_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!relocate_payload(dir.path(), "S5P_missing.nc"));
    }
}
