//! OData path building and Atom feed readers for the source archive.
use crate::product::ProductIdentifier;
use anyhow::Result;
use roxmltree::Node;

const ODATA_ROOT: &str = "/odata/v1";

/// Emits the nested `Nodes('...')` chain for a list of node-name segments.
pub fn nodes_chain<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    segments
        .into_iter()
        .map(|segment| format!("Nodes('{}')", segment.as_ref()))
        .collect::<Vec<_>>()
        .join("/")
}

/// Builder for paths below `/odata/v1/Products('<id>')`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePath {
    product: String,
    nodes: Vec<String>,
}

impl NodePath {
    pub fn product(id: &ProductIdentifier) -> Self {
        Self {
            product: id.as_str().to_string(),
            nodes: vec![],
        }
    }

    pub fn node(mut self, name: &str) -> Self {
        self.nodes.push(name.to_string());
        self
    }

    /// Appends every `/`-separated segment of `relative` as its own node.
    /// Empty segments (leading, trailing or doubled slashes) are skipped.
    pub fn nodes(mut self, relative: &str) -> Self {
        self.nodes.extend(
            relative
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        self
    }

    /// `/odata/v1/Products('<id>')[/Nodes('..')...]`
    pub fn path(&self) -> String {
        let mut path = format!("{ODATA_ROOT}/Products('{}')", self.product);
        if !self.nodes.is_empty() {
            path.push('/');
            path.push_str(&nodes_chain(&self.nodes));
        }
        path
    }

    /// Node listing of the current level.
    pub fn listing(&self) -> String {
        format!("{}/Nodes", self.path())
    }

    /// Raw content of the current node.
    pub fn value(&self) -> String {
        format!("{}/$value", self.path())
    }
}

fn child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    node.descendants()
        .find(|n| n.has_tag_name(tag))?
        .text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// One `entry` of an Atom feed returned by the source archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub name: Option<String>,
}

impl FeedEntry {
    fn new(entry: Node) -> Self {
        let name = entry
            .descendants()
            .find(|n| n.has_tag_name("properties"))
            .and_then(|props| child_text(props, "Name"));
        Self {
            id: child_text(entry, "id"),
            title: child_text(entry, "title"),
            name,
        }
    }

    /// `properties/Name` when present, `title` otherwise.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.title.as_deref())
    }
}

/// Parses every `entry` element, including a bare `entry` root.
pub fn parse_entries(xml: &str) -> Result<Vec<FeedEntry>> {
    let doc = roxmltree::Document::parse(xml)?;
    let entries = doc
        .descendants()
        .filter(|n| n.has_tag_name("entry"))
        .map(FeedEntry::new)
        .collect();
    Ok(entries)
}

/// Product name from `properties/Name`; the last one wins when several are
/// present.
pub fn product_name(xml: &str) -> Result<Option<String>> {
    let doc = roxmltree::Document::parse(xml)?;
    let name = doc
        .descendants()
        .filter(|n| n.has_tag_name("properties"))
        .filter_map(|props| child_text(props, "Name"))
        .last();
    Ok(name)
}
