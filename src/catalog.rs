use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use flate2::read::GzDecoder;
use serde_json::{Map, Value};
use tracing::debug;

use crate::byte_range::ByteRange;
use crate::domain::{CatalogVersion, ChunkKey, ZARR_METADATA_KEYS};
use crate::error::ResolverError;
use crate::template::{self, TemplateContext};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Inline payload as stored in the catalog, decoded on resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineData {
    Raw(Bytes),
    Base64(String),
}

impl InlineData {
    pub fn decode(&self, key: &ChunkKey) -> Result<Bytes, ResolverError> {
        match self {
            InlineData::Raw(bytes) => Ok(bytes.clone()),
            InlineData::Base64(encoded) => BASE64
                .decode(encoded.as_bytes())
                .map(Bytes::from)
                .map_err(|err| ResolverError::Decode {
                    key: key.to_string(),
                    message: err.to_string(),
                }),
        }
    }
}

/// Where the bytes of one chunk key come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Inline(InlineData),
    /// A byte range of a (possibly templated) URI. `length == None` reads to the end.
    Indirect {
        uri: String,
        offset: u64,
        length: Option<u64>,
    },
    WholeFile { uri: String },
}

impl Reference {
    pub fn uri_template(&self) -> Option<&str> {
        match self {
            Reference::Inline(_) => None,
            Reference::Indirect { uri, .. } | Reference::WholeFile { uri } => Some(uri),
        }
    }

    pub fn byte_range(&self) -> ByteRange {
        match self {
            Reference::Indirect { offset, length, .. } => ByteRange::new(*offset, *length),
            Reference::Inline(_) | Reference::WholeFile { .. } => ByteRange::FULL,
        }
    }
}

/// Caller choices that the catalog JSON alone cannot answer.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Name of the catalog to load from a multi-catalog JSON document.
    pub select: Option<String>,
    /// URI substituted for references whose path is `null`.
    pub default_target: Option<String>,
}

/// A parsed Kerchunk reference catalog. Read-only once loaded.
#[derive(Debug, Clone)]
pub struct Catalog {
    version: CatalogVersion,
    templates: TemplateContext,
    references: BTreeMap<ChunkKey, Reference>,
    base_dir: Option<String>,
}

impl Catalog {
    pub fn new(
        version: CatalogVersion,
        templates: TemplateContext,
        references: BTreeMap<ChunkKey, Reference>,
    ) -> Self {
        Self {
            version,
            templates,
            references,
            base_dir: None,
        }
    }

    /// Directory that relative local paths in this catalog are resolved against.
    pub fn with_base_dir(mut self, base_dir: impl Into<String>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    pub fn from_json_str(json: &str, options: &LoadOptions) -> Result<Self, ResolverError> {
        let value: Value =
            serde_json::from_str(json).map_err(|err| ResolverError::Parse(err.to_string()))?;
        Self::from_value(value, options)
    }

    /// Parse catalog bytes, gunzipping them first when they carry the gzip magic.
    pub fn from_slice(data: &[u8], options: &LoadOptions) -> Result<Self, ResolverError> {
        let value: Value = if data.starts_with(&GZIP_MAGIC) {
            let mut text = Vec::new();
            GzDecoder::new(data)
                .read_to_end(&mut text)
                .map_err(|err| ResolverError::Parse(format!("gzip: {err}")))?;
            serde_json::from_slice(&text)
        } else {
            serde_json::from_slice(data)
        }
        .map_err(|err| ResolverError::Parse(err.to_string()))?;
        Self::from_value(value, options)
    }

    pub fn from_path(path: &Path, options: &LoadOptions) -> Result<Self, ResolverError> {
        let data = fs::read(path).map_err(|err| ResolverError::io(&path.display().to_string(), &err))?;
        let catalog = Self::from_slice(&data, options)?;
        Ok(match path.parent().and_then(Path::to_str) {
            Some(parent) if !parent.is_empty() => catalog.with_base_dir(parent),
            _ => catalog,
        })
    }

    /// Load from an in-memory JSON mapping.
    pub fn from_value(value: Value, options: &LoadOptions) -> Result<Self, ResolverError> {
        let Value::Object(root) = value else {
            return Err(ResolverError::Parse(
                "catalog must be a JSON object".to_string(),
            ));
        };
        let root = select_catalog(root, options.select.as_deref())?;

        let version = match root.get("version") {
            None if root.contains_key("refs") => CatalogVersion::V1,
            None => CatalogVersion::V0,
            Some(value) if value.as_u64() == Some(1) => CatalogVersion::V1,
            Some(other) => {
                return Err(ResolverError::Parse(format!(
                    "unsupported catalog version {other}"
                )));
            }
        };

        let catalog = match version {
            CatalogVersion::V0 => parse_v0(root, options)?,
            CatalogVersion::V1 => parse_v1(root, options)?,
        };
        debug!(
            version = %catalog.version,
            references = catalog.references.len(),
            templates = catalog.templates.len(),
            "loaded catalog"
        );
        Ok(catalog)
    }

    pub fn version(&self) -> CatalogVersion {
        self.version
    }

    pub fn templates(&self) -> &TemplateContext {
        &self.templates
    }

    pub fn base_dir(&self) -> Option<&str> {
        self.base_dir.as_deref()
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn get(&self, key: &ChunkKey) -> Option<&Reference> {
        self.references.get(key)
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &ChunkKey> {
        self.references.keys()
    }

    pub fn references(&self) -> impl Iterator<Item = (&ChunkKey, &Reference)> {
        self.references.iter()
    }

    pub fn metadata_keys(&self) -> Vec<&ChunkKey> {
        self.keys().filter(|key| key.is_metadata()).collect()
    }

    /// Check every templated reference eagerly. Loading itself never does this, so a
    /// catalog may carry references whose templates are never used.
    pub fn validate(&self) -> Vec<(ChunkKey, ResolverError)> {
        let mut problems = Vec::new();
        for (key, reference) in &self.references {
            let Some(uri) = reference.uri_template() else {
                continue;
            };
            if let Err(err) = template::apply_templates(&self.templates, uri) {
                problems.push((key.clone(), err));
            }
        }
        problems
    }
}

fn select_catalog(
    mut root: Map<String, Value>,
    select: Option<&str>,
) -> Result<Map<String, Value>, ResolverError> {
    match select {
        Some(name) => {
            if !is_multi_catalog(&root) {
                return Err(ResolverError::Parse(format!(
                    "cannot select `{name}`: input is a single catalog"
                )));
            }
            match root.remove(name) {
                Some(Value::Object(inner)) => Ok(inner),
                _ => Err(ResolverError::AmbiguousCatalog {
                    candidates: sorted_keys(&root, Some(name)),
                }),
            }
        }
        None if is_multi_catalog(&root) => Err(ResolverError::AmbiguousCatalog {
            candidates: sorted_keys(&root, None),
        }),
        None => Ok(root),
    }
}

fn sorted_keys(root: &Map<String, Value>, exclude: Option<&str>) -> Vec<String> {
    let mut keys: Vec<String> = root
        .keys()
        .filter(|key| Some(key.as_str()) != exclude)
        .cloned()
        .collect();
    keys.sort();
    keys
}

fn looks_like_catalog(object: &Map<String, Value>) -> bool {
    object.contains_key("refs")
        || object.contains_key("version")
        || object.iter().any(|(key, value)| {
            let name = key.rsplit('/').next().unwrap_or(key);
            ZARR_METADATA_KEYS.contains(&name) || value.is_string() || value.is_array()
        })
}

/// A root with no catalog markers of its own whose every value is an object is read as
/// named catalogs, even when those objects are empty.
fn is_multi_catalog(root: &Map<String, Value>) -> bool {
    !root.is_empty() && !looks_like_catalog(root) && root.values().all(Value::is_object)
}

fn parse_v0(root: Map<String, Value>, options: &LoadOptions) -> Result<Catalog, ResolverError> {
    let references = parse_references(root, options)?;
    Ok(Catalog::new(
        CatalogVersion::V0,
        TemplateContext::new(),
        references,
    ))
}

fn parse_v1(
    mut root: Map<String, Value>,
    options: &LoadOptions,
) -> Result<Catalog, ResolverError> {
    let templates = match root.remove("templates") {
        Some(value) => template::context_from_json(&value)?,
        None => TemplateContext::new(),
    };
    let mut references = match root.remove("refs") {
        Some(Value::Object(refs)) => parse_references(refs, options)?,
        Some(_) => return Err(ResolverError::Parse("`refs` must be an object".to_string())),
        None => BTreeMap::new(),
    };
    if let Some(generators) = root.remove("gen") {
        let Value::Array(generators) = generators else {
            return Err(ResolverError::Parse("`gen` must be an array".to_string()));
        };
        for generator in &generators {
            for (key, reference) in expand_generator(generator, &templates)? {
                references.entry(key).or_insert(reference);
            }
        }
    }
    Ok(Catalog::new(CatalogVersion::V1, templates, references))
}

fn parse_references(
    refs: Map<String, Value>,
    options: &LoadOptions,
) -> Result<BTreeMap<ChunkKey, Reference>, ResolverError> {
    refs.into_iter()
        .map(|(key, value)| {
            let key: ChunkKey = key
                .parse()
                .map_err(|_| ResolverError::Parse(format!("invalid chunk key `{key}`")))?;
            let reference = parse_reference(&key, value, options)?;
            Ok((key, reference))
        })
        .collect()
}

fn parse_reference(
    key: &ChunkKey,
    value: Value,
    options: &LoadOptions,
) -> Result<Reference, ResolverError> {
    match value {
        Value::String(text) => Ok(Reference::Inline(match text.strip_prefix("base64:") {
            Some(encoded) => InlineData::Base64(encoded.to_string()),
            None => InlineData::Raw(Bytes::from(text)),
        })),
        Value::Object(_) => {
            let json = serde_json::to_vec(&value).map_err(|err| ResolverError::Parse(err.to_string()))?;
            Ok(Reference::Inline(InlineData::Raw(Bytes::from(json))))
        }
        Value::Array(items) => parse_reference_array(key, items, options),
        other => Err(ResolverError::Parse(format!(
            "reference for `{key}` must be a string, object or array, found {other}"
        ))),
    }
}

fn parse_reference_array(
    key: &ChunkKey,
    items: Vec<Value>,
    options: &LoadOptions,
) -> Result<Reference, ResolverError> {
    let uri = match items.first() {
        Some(Value::String(uri)) => uri.clone(),
        Some(Value::Null) => options.default_target.clone().ok_or_else(|| {
            ResolverError::Parse(format!(
                "reference for `{key}` has no path and no default target was given"
            ))
        })?,
        _ => {
            return Err(ResolverError::Parse(format!(
                "reference for `{key}` must start with a path"
            )));
        }
    };
    match items.len() {
        1 => Ok(Reference::WholeFile { uri }),
        3 => {
            let offset = items[1].as_u64().ok_or_else(|| {
                ResolverError::Parse(format!("offset for `{key}` must be a non-negative integer"))
            })?;
            let length = match &items[2] {
                Value::Null => None,
                value => Some(value.as_u64().ok_or_else(|| {
                    ResolverError::Parse(format!(
                        "length for `{key}` must be a non-negative integer"
                    ))
                })?),
            };
            indirect(key, uri, offset, length)
        }
        n => Err(ResolverError::Parse(format!(
            "reference for `{key}` has {n} elements; expected [path] or [path, offset, length]"
        ))),
    }
}

/// A byte-range reference whose end must fit in a `u64`.
fn indirect(
    key: &ChunkKey,
    uri: String,
    offset: u64,
    length: Option<u64>,
) -> Result<Reference, ResolverError> {
    if length.is_some_and(|length| offset.checked_add(length).is_none()) {
        return Err(ResolverError::Parse(format!(
            "byte range of `{key}` ends past the largest addressable offset"
        )));
    }
    Ok(Reference::Indirect {
        uri,
        offset,
        length,
    })
}

/// Expand one `gen` entry into concrete references over the product of its dimensions.
fn expand_generator(
    generator: &Value,
    templates: &TemplateContext,
) -> Result<Vec<(ChunkKey, Reference)>, ResolverError> {
    let field = |name: &str| generator.get(name);
    let key_template = field("key")
        .and_then(Value::as_str)
        .ok_or_else(|| ResolverError::Parse("`gen` entry needs a string `key`".to_string()))?;
    let url_template = field("url")
        .and_then(Value::as_str)
        .ok_or_else(|| ResolverError::Parse("`gen` entry needs a string `url`".to_string()))?;
    let dimensions = match field("dimensions") {
        Some(Value::Object(dimensions)) => dimensions
            .iter()
            .map(|(name, spec)| Ok((name.clone(), dimension_values(name, spec)?)))
            .collect::<Result<Vec<_>, ResolverError>>()?,
        None => Vec::new(),
        Some(_) => {
            return Err(ResolverError::Parse(
                "`gen` dimensions must be an object".to_string(),
            ));
        }
    };

    let mut combinations: Vec<TemplateContext> = vec![templates.clone()];
    for (name, values) in &dimensions {
        combinations = combinations
            .into_iter()
            .flat_map(|context| {
                values.iter().map(move |value| {
                    let mut next = context.clone();
                    next.insert(name.clone(), value.clone());
                    next
                })
            })
            .collect();
    }

    combinations
        .iter()
        .map(|context| {
            let key: ChunkKey = template::apply_templates(context, key_template)?
                .parse()
                .map_err(|err: ResolverError| ResolverError::Parse(err.to_string()))?;
            let uri = template::apply_templates(context, url_template)?;
            let offset = generated_number(context, field("offset"), "offset")?;
            let length = generated_number(context, field("length"), "length")?;
            let reference = match (offset, length) {
                (None, None) => Reference::WholeFile { uri },
                (offset, length) => indirect(&key, uri, offset.unwrap_or(0), length)?,
            };
            Ok((key, reference))
        })
        .collect()
}

fn dimension_values(name: &str, spec: &Value) -> Result<Vec<String>, ResolverError> {
    let invalid = || ResolverError::Parse(format!("invalid `gen` dimension `{name}`"));
    match spec {
        Value::Array(values) => values
            .iter()
            .map(|value| template::scalar_to_string(name, value))
            .collect(),
        Value::Number(stop) => {
            let stop = stop.as_i64().ok_or_else(invalid)?;
            Ok((0..stop).map(|value| value.to_string()).collect())
        }
        Value::Object(range) => {
            let get = |field: &str, default: i64| match range.get(field) {
                None => Ok(default),
                Some(value) => value.as_i64().ok_or_else(invalid),
            };
            let start = get("start", 0)?;
            let stop = range.get("stop").and_then(Value::as_i64).ok_or_else(invalid)?;
            let step = get("step", 1)?;
            if step <= 0 {
                return Err(invalid());
            }
            let step = usize::try_from(step).map_err(|_| invalid())?;
            Ok((start..stop)
                .step_by(step)
                .map(|value| value.to_string())
                .collect())
        }
        _ => Err(invalid()),
    }
}

fn generated_number(
    context: &TemplateContext,
    value: Option<&Value>,
    what: &str,
) -> Result<Option<u64>, ResolverError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number.as_u64().map(Some).ok_or_else(|| {
            ResolverError::Parse(format!("`gen` {what} must be a non-negative integer"))
        }),
        Some(Value::String(text)) => {
            let rendered = template::apply_templates(context, text)?;
            rendered.trim().parse::<u64>().map(Some).map_err(|_| {
                ResolverError::Parse(format!(
                    "`gen` {what} `{rendered}` is not a non-negative integer"
                ))
            })
        }
        Some(_) => Err(ResolverError::Parse(format!(
            "`gen` {what} must be an integer or template string"
        ))),
    }
}
