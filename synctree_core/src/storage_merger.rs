//! Content mergers and the dispatcher that picks one per file.

use crate::text_merge::TextStorageMerger;
use glob::Pattern;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use synctree_common::{ContentClassifier, ContentTypeId, ResourcePath, SyncConfig, SyncError};
use tracing::debug;

/// Outcome of a content merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    Merged(Vec<u8>),
    Conflict,
    Error(String),
}

/// Three-way merge of one content format
///
/// `local` is the content being merged into, `remote` the other side.
pub trait StorageMerger: Send + Sync {
    fn merge(&self, ancestor: Option<&[u8]>, local: &[u8], remote: &[u8]) -> MergeResult;

    /// Whether the merger produces useful results without an ancestor
    fn can_merge_without_ancestor(&self) -> bool {
        false
    }
}

/// Which lookup step selected a merger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergerSource {
    ContentType,
    Extension,
    BuiltinText,
}

impl fmt::Display for MergerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergerSource::ContentType => write!(f, "content type"),
            MergerSource::Extension => write!(f, "extension"),
            MergerSource::BuiltinText => write!(f, "built-in text"),
        }
    }
}

/// Registered mergers, keyed by content type id or file extension
#[derive(Default, Clone)]
pub struct MergerRegistry {
    by_content_type: HashMap<String, Arc<dyn StorageMerger>>,
    by_extension: HashMap<String, Arc<dyn StorageMerger>>,
}

impl MergerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_content_type(
        &mut self,
        content_type: impl Into<String>,
        merger: Arc<dyn StorageMerger>,
    ) -> &mut Self {
        self.by_content_type.insert(content_type.into(), merger);
        self
    }

    /// Register for an extension, given with or without the leading dot
    pub fn register_extension(
        &mut self,
        extension: &str,
        merger: Arc<dyn StorageMerger>,
    ) -> &mut Self {
        let key = extension.trim_start_matches('.').to_lowercase();
        self.by_extension.insert(key, merger);
        self
    }

    pub fn for_content_type(&self, content_type: &ContentTypeId) -> Option<Arc<dyn StorageMerger>> {
        self.by_content_type.get(content_type.as_str()).cloned()
    }

    pub fn for_extension(&self, extension: &str) -> Option<Arc<dyn StorageMerger>> {
        self.by_extension.get(&extension.to_lowercase()).cloned()
    }
}

/// Content classifier driven by configuration
///
/// Rules are tried in order against the file name. After that, configured
/// text extensions and (optionally) a UTF-8 sniff decide between text and
/// binary.
pub struct DefaultContentClassifier {
    rules: Vec<(Pattern, ContentTypeId)>,
    text_types: HashSet<String>,
    text_extensions: HashSet<String>,
    sniff_utf8: bool,
}

impl Default for DefaultContentClassifier {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            text_types: HashSet::new(),
            text_extensions: HashSet::new(),
            sniff_utf8: true,
        }
    }
}

impl DefaultContentClassifier {
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let mut rules = Vec::with_capacity(config.content_types.len());
        let mut text_types = HashSet::new();
        for rule in &config.content_types {
            let pattern = Pattern::new(&rule.pattern).map_err(|e| {
                SyncError::Config(format!("invalid content type pattern '{}': {}", rule.pattern, e))
            })?;
            if rule.text {
                text_types.insert(rule.content_type.clone());
            }
            rules.push((pattern, ContentTypeId::new(rule.content_type.clone())));
        }
        let text_extensions = config
            .text_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .collect();
        debug!("Built content classifier with {} rules", rules.len());
        Ok(Self {
            rules,
            text_types,
            text_extensions,
            sniff_utf8: config.treat_unknown_utf8_as_text,
        })
    }
}

fn looks_like_text(content: &[u8]) -> bool {
    !content.contains(&0) && std::str::from_utf8(content).is_ok()
}

impl ContentClassifier for DefaultContentClassifier {
    fn classify(&self, content: &[u8], file_name: &str) -> ContentTypeId {
        if let Some((_, content_type)) = self.rules.iter().find(|(p, _)| p.matches(file_name)) {
            return content_type.clone();
        }

        let extension = file_name
            .rsplit_once('.')
            .filter(|(stem, _)| !stem.is_empty())
            .map(|(_, ext)| ext.to_lowercase());
        if extension.map_or(false, |ext| self.text_extensions.contains(&ext)) {
            return ContentTypeId::text();
        }

        if self.sniff_utf8 && looks_like_text(content) {
            ContentTypeId::text()
        } else {
            ContentTypeId::binary()
        }
    }

    fn is_text(&self, content_type: &ContentTypeId) -> bool {
        content_type.as_str() == ContentTypeId::TEXT
            || self.text_types.contains(content_type.as_str())
    }
}

/// Picks a merger for a file and runs it
///
/// Lookup order: a merger registered for the detected content type, then one
/// registered for the file extension, then the built-in text merger when the
/// content is text. Anything else is a conflict. The dispatcher never touches
/// storage.
pub struct StorageMergerDispatcher {
    registry: MergerRegistry,
    classifier: Arc<dyn ContentClassifier>,
    text_merger: Arc<dyn StorageMerger>,
}

impl StorageMergerDispatcher {
    pub fn new(registry: MergerRegistry, classifier: Arc<dyn ContentClassifier>) -> Self {
        Self {
            registry,
            classifier,
            text_merger: Arc::new(TextStorageMerger::new()),
        }
    }

    /// Dispatcher with no registered mergers and the default classifier
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        Ok(Self::new(
            MergerRegistry::new(),
            Arc::new(DefaultContentClassifier::from_config(config)?),
        ))
    }

    pub fn with_text_merger(mut self, merger: Arc<dyn StorageMerger>) -> Self {
        self.text_merger = merger;
        self
    }

    pub fn registry(&self) -> &MergerRegistry {
        &self.registry
    }

    /// Select the merger for `path` whose local content is `local`
    pub fn find_merger(
        &self,
        path: &ResourcePath,
        local: &[u8],
    ) -> Option<(MergerSource, Arc<dyn StorageMerger>)> {
        let file_name = path.name().unwrap_or("");
        let content_type = self.classifier.classify(local, file_name);

        if let Some(merger) = self.registry.for_content_type(&content_type) {
            return Some((MergerSource::ContentType, merger));
        }
        if let Some(merger) = path
            .extension()
            .and_then(|ext| self.registry.for_extension(&ext))
        {
            return Some((MergerSource::Extension, merger));
        }
        if self.classifier.is_text(&content_type) {
            return Some((MergerSource::BuiltinText, Arc::clone(&self.text_merger)));
        }
        None
    }

    pub fn merge(
        &self,
        path: &ResourcePath,
        ancestor: Option<&[u8]>,
        local: &[u8],
        remote: &[u8],
    ) -> MergeResult {
        let Some((source, merger)) = self.find_merger(path, local) else {
            debug!("No merger for {}, reporting conflict", path);
            return MergeResult::Conflict;
        };
        if ancestor.is_none() && !merger.can_merge_without_ancestor() {
            debug!("{} merger for {} needs an ancestor", source, path);
            return MergeResult::Conflict;
        }
        debug!("Merging {} with {} merger", path, source);
        merger.merge(ancestor, local, remote)
    }
}
