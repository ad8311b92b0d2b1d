//! # Typed Value Registry
//!
//! Static registry of tagged-variant value handlers. A plugin declares the
//! datatype tags it serves, an explicit integer priority, an optional
//! storage-offload policy, and a capability handler (`render`/`preview`).
//! The registry is immutable after construction: registrations are resolved
//! into a per-datatype dispatch table at build time, higher priority wins,
//! and ties keep the first winner found (last-registered-wins is *not*
//! used).
//!
//! Handlers return a tagged [`RenderDescriptor`] from a fixed small
//! vocabulary — never a datatype-specific literal — so the rendering
//! boundary stays closed no matter how many datatypes exist. The storage
//! policy decouples "how to display a value" from "where its bytes live":
//! oversized payloads are flagged for offload into a bucket and replaced by
//! pointer envelopes, which render as `*-file` descriptors.

use crate::types::{BucketId, Datatype, FilePointer, ValueEnvelope, serialized_len};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default inline-size threshold (serialized characters) above which a
/// payload is offloaded to its plugin's bucket.
pub const DEFAULT_INLINE_LIMIT: usize = 10_000;

// =============================================================================
// RENDER DESCRIPTORS
// =============================================================================

/// The closed render vocabulary.
///
/// Every handler maps a value into one of these tags; consumers never see
/// datatype-specific shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RenderDescriptor {
    Text { text: String },
    Link { href: String },
    Coordinate { latitude: f64, longitude: f64 },
    Geometry { geojson: Value },
    GeometryFile { url: String },
    Image { url: String },
    ImageThumbnail { url: String },
    Boolean { value: bool },
    Color { value: String },
    ColorList { values: Vec<String> },
    Json { value: Value },
    JsonFile { url: String },
    Unknown { text: String },
}

impl RenderDescriptor {
    /// The descriptor's vocabulary tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Link { .. } => "link",
            Self::Coordinate { .. } => "coordinate",
            Self::Geometry { .. } => "geometry",
            Self::GeometryFile { .. } => "geometry-file",
            Self::Image { .. } => "image",
            Self::ImageThumbnail { .. } => "image-thumbnail",
            Self::Boolean { .. } => "boolean",
            Self::Color { .. } => "color",
            Self::ColorList { .. } => "color-list",
            Self::Json { .. } => "json",
            Self::JsonFile { .. } => "json-file",
            Self::Unknown { .. } => "unknown",
        }
    }

    /// Whether this descriptor points at detached file bytes.
    #[must_use]
    pub fn is_file(&self) -> bool {
        matches!(self, Self::GeometryFile { .. } | Self::JsonFile { .. })
    }
}

// =============================================================================
// STORAGE POLICY
// =============================================================================

/// Where and when a datatype's payloads leave inline row storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePolicy {
    /// Bucket receiving offloaded payloads.
    pub bucket: BucketId,
    /// Inline threshold in serialized characters; strictly larger payloads
    /// are offloaded.
    pub max_inline_chars: usize,
    /// MIME type stamped on offloaded files.
    pub mime_type: String,
}

impl StoragePolicy {
    /// Policy with the default inline threshold.
    #[must_use]
    pub fn new(bucket: BucketId, mime_type: impl Into<String>) -> Self {
        Self {
            bucket,
            max_inline_chars: DEFAULT_INLINE_LIMIT,
            mime_type: mime_type.into(),
        }
    }

    /// Override the inline threshold.
    #[must_use]
    pub fn with_inline_limit(mut self, max_inline_chars: usize) -> Self {
        self.max_inline_chars = max_inline_chars;
        self
    }
}

// =============================================================================
// PLUGINS
// =============================================================================

/// The capability interface a plugin provides for its datatypes.
pub trait ValueHandler: Send + Sync {
    /// Full rendering of a payload.
    fn render(&self, data: &Value) -> RenderDescriptor;

    /// Compact rendering for list views; defaults to `render`.
    fn preview(&self, data: &Value) -> RenderDescriptor {
        self.render(data)
    }
}

/// One registration: datatypes served, priority, optional storage policy,
/// and the handler.
#[derive(Clone)]
pub struct ValuePlugin {
    pub name: String,
    pub datatypes: Vec<Datatype>,
    pub priority: i32,
    pub storage: Option<StoragePolicy>,
    handler: Arc<dyn ValueHandler>,
}

impl std::fmt::Debug for ValuePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValuePlugin")
            .field("name", &self.name)
            .field("datatypes", &self.datatypes)
            .field("priority", &self.priority)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl ValuePlugin {
    /// Declare a plugin.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        datatypes: Vec<Datatype>,
        priority: i32,
        handler: impl ValueHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            datatypes,
            priority,
            storage: None,
            handler: Arc::new(handler),
        }
    }

    /// Attach a storage-offload policy.
    #[must_use]
    pub fn with_storage(mut self, storage: StoragePolicy) -> Self {
        self.storage = Some(storage);
        self
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Builder collecting registrations before resolution.
#[derive(Debug, Default)]
pub struct ValueRegistryBuilder {
    plugins: Vec<ValuePlugin>,
}

impl ValueRegistryBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin.
    #[must_use]
    pub fn register(mut self, plugin: ValuePlugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Resolve registrations into an immutable registry.
    ///
    /// For each datatype tag the highest-priority registration wins;
    /// on a tie the first winner found is kept.
    #[must_use]
    pub fn build(self) -> ValueRegistry {
        let mut by_datatype: BTreeMap<Datatype, usize> = BTreeMap::new();
        for (index, plugin) in self.plugins.iter().enumerate() {
            for datatype in &plugin.datatypes {
                match by_datatype.get(datatype) {
                    Some(&current) if self.plugins[current].priority >= plugin.priority => {}
                    _ => {
                        by_datatype.insert(datatype.clone(), index);
                    }
                }
            }
        }
        ValueRegistry {
            plugins: self.plugins,
            by_datatype,
        }
    }
}

/// The resolved, immutable registry.
#[derive(Debug)]
pub struct ValueRegistry {
    plugins: Vec<ValuePlugin>,
    by_datatype: BTreeMap<Datatype, usize>,
}

impl Default for ValueRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ValueRegistry {
    /// Start building a registry from scratch.
    #[must_use]
    pub fn builder() -> ValueRegistryBuilder {
        ValueRegistryBuilder::new()
    }

    /// Builder preloaded with the built-in plugin set.
    #[must_use]
    pub fn builtin_builder() -> ValueRegistryBuilder {
        let mut builder = ValueRegistryBuilder::new();
        for plugin in builtin_plugins() {
            builder = builder.register(plugin);
        }
        builder
    }

    /// Registry with exactly the built-in plugin set.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::builtin_builder().build()
    }

    /// The winning plugin for a datatype, if any.
    #[must_use]
    pub fn resolve(&self, datatype: &Datatype) -> Option<&ValuePlugin> {
        self.by_datatype
            .get(datatype)
            .map(|&index| &self.plugins[index])
    }

    /// Render a value envelope, falling back to a generic stringifier for
    /// unregistered datatypes.
    #[must_use]
    pub fn render(&self, envelope: &ValueEnvelope) -> RenderDescriptor {
        match self.resolve(&envelope.datatype) {
            Some(plugin) => plugin.handler.render(&envelope.data),
            None => RenderDescriptor::Unknown {
                text: stringify(&envelope.data),
            },
        }
    }

    /// Preview a value envelope for list views.
    #[must_use]
    pub fn preview(&self, envelope: &ValueEnvelope) -> RenderDescriptor {
        match self.resolve(&envelope.datatype) {
            Some(plugin) => plugin.handler.preview(&envelope.data),
            None => RenderDescriptor::Unknown {
                text: stringify(&envelope.data),
            },
        }
    }

    /// The storage policy to offload under, if the payload exceeds its
    /// plugin's inline threshold. Pointer payloads are already offloaded
    /// and never flagged again.
    #[must_use]
    pub fn offload_policy(&self, datatype: &Datatype, data: &Value) -> Option<&StoragePolicy> {
        if pointer_of(data).is_some() {
            return None;
        }
        let policy = self.resolve(datatype)?.storage.as_ref()?;
        (serialized_len(data) > policy.max_inline_chars).then_some(policy)
    }

    /// Whether the payload should be stored as a detached large object.
    #[must_use]
    pub fn should_upload_to_bucket(&self, datatype: &Datatype, data: &Value) -> bool {
        self.offload_policy(datatype, data).is_some()
    }
}

fn stringify(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn pointer_of(data: &Value) -> Option<FilePointer> {
    serde_json::from_value(data.clone()).ok()
}

// =============================================================================
// BUILT-IN PLUGINS
// =============================================================================

/// The built-in plugin set, all at priority 0.
#[must_use]
pub fn builtin_plugins() -> Vec<ValuePlugin> {
    vec![
        ValuePlugin::new(
            "text",
            vec![Datatype::Text, Datatype::Date, Datatype::Number],
            0,
            TextHandler,
        ),
        ValuePlugin::new("boolean", vec![Datatype::Boolean], 0, BooleanHandler),
        ValuePlugin::new("url", vec![Datatype::Url], 0, UrlHandler),
        ValuePlugin::new("color", vec![Datatype::Color], 0, ColorHandler),
        ValuePlugin::new("coordinate", vec![Datatype::Coordinate], 0, CoordinateHandler),
        ValuePlugin::new("geojson", vec![Datatype::Polygon], 0, GeoJsonHandler).with_storage(
            StoragePolicy::new(BucketId::new("geojson"), "application/geo+json"),
        ),
        ValuePlugin::new("json", vec![Datatype::Json], 0, JsonHandler)
            .with_storage(StoragePolicy::new(BucketId::new("json"), "application/json")),
        ValuePlugin::new("image", vec![Datatype::Image], 0, ImageHandler)
            .with_storage(StoragePolicy::new(BucketId::new("images"), "image/*")),
        ValuePlugin::new("relation", vec![Datatype::Relation], 0, RelationHandler),
    ]
}

struct TextHandler;

impl ValueHandler for TextHandler {
    fn render(&self, data: &Value) -> RenderDescriptor {
        RenderDescriptor::Text {
            text: stringify(data),
        }
    }
}

struct BooleanHandler;

impl ValueHandler for BooleanHandler {
    fn render(&self, data: &Value) -> RenderDescriptor {
        match data.as_bool() {
            Some(value) => RenderDescriptor::Boolean { value },
            None => RenderDescriptor::Unknown {
                text: stringify(data),
            },
        }
    }
}

struct UrlHandler;

impl ValueHandler for UrlHandler {
    fn render(&self, data: &Value) -> RenderDescriptor {
        match data {
            Value::String(href) => RenderDescriptor::Link { href: href.clone() },
            other => RenderDescriptor::Unknown {
                text: stringify(other),
            },
        }
    }
}

struct ColorHandler;

impl ValueHandler for ColorHandler {
    fn render(&self, data: &Value) -> RenderDescriptor {
        match data {
            Value::String(value) => RenderDescriptor::Color {
                value: value.clone(),
            },
            Value::Array(items) => RenderDescriptor::ColorList {
                values: items.iter().map(stringify).collect(),
            },
            other => RenderDescriptor::Unknown {
                text: stringify(other),
            },
        }
    }
}

struct CoordinateHandler;

impl ValueHandler for CoordinateHandler {
    fn render(&self, data: &Value) -> RenderDescriptor {
        let latitude = data.get("latitude").and_then(Value::as_f64);
        let longitude = data.get("longitude").and_then(Value::as_f64);
        match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => RenderDescriptor::Coordinate {
                latitude,
                longitude,
            },
            _ => RenderDescriptor::Unknown {
                text: stringify(data),
            },
        }
    }
}

struct GeoJsonHandler;

impl ValueHandler for GeoJsonHandler {
    fn render(&self, data: &Value) -> RenderDescriptor {
        match pointer_of(data) {
            Some(pointer) => RenderDescriptor::GeometryFile { url: pointer.url },
            None => RenderDescriptor::Geometry {
                geojson: data.clone(),
            },
        }
    }
}

struct JsonHandler;

impl ValueHandler for JsonHandler {
    fn render(&self, data: &Value) -> RenderDescriptor {
        match pointer_of(data) {
            Some(pointer) => RenderDescriptor::JsonFile { url: pointer.url },
            None => RenderDescriptor::Json { value: data.clone() },
        }
    }
}

struct ImageHandler;

impl ValueHandler for ImageHandler {
    fn render(&self, data: &Value) -> RenderDescriptor {
        let url = match pointer_of(data) {
            Some(pointer) => pointer.url,
            None => stringify(data),
        };
        RenderDescriptor::Image { url }
    }

    fn preview(&self, data: &Value) -> RenderDescriptor {
        let url = match pointer_of(data) {
            Some(pointer) => pointer.url,
            None => stringify(data),
        };
        RenderDescriptor::ImageThumbnail { url }
    }
}

struct RelationHandler;

impl ValueHandler for RelationHandler {
    fn render(&self, data: &Value) -> RenderDescriptor {
        RenderDescriptor::Link {
            href: stringify(data),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_dispatch_covers_the_vocabulary() {
        let registry = ValueRegistry::with_builtins();

        let cases = vec![
            (ValueEnvelope::new(Datatype::Text, json!("hello")), "text"),
            (ValueEnvelope::new(Datatype::Number, json!(42)), "text"),
            (ValueEnvelope::new(Datatype::Boolean, json!(true)), "boolean"),
            (
                ValueEnvelope::new(Datatype::Url, json!("https://example.org")),
                "link",
            ),
            (ValueEnvelope::new(Datatype::Color, json!("#ff0000")), "color"),
            (
                ValueEnvelope::new(Datatype::Color, json!(["#ff0000", "#00ff00"])),
                "color-list",
            ),
            (
                ValueEnvelope::new(
                    Datatype::Coordinate,
                    json!({"latitude": 48.85, "longitude": 2.35}),
                ),
                "coordinate",
            ),
            (
                ValueEnvelope::new(Datatype::Polygon, json!({"type": "Polygon"})),
                "geometry",
            ),
            (ValueEnvelope::new(Datatype::Json, json!({"a": 1})), "json"),
            (
                ValueEnvelope::new(Datatype::Image, json!("https://img.example/x.png")),
                "image",
            ),
            (ValueEnvelope::new(Datatype::Relation, json!("q42")), "link"),
        ];
        for (envelope, kind) in cases {
            assert_eq!(registry.render(&envelope).kind(), kind, "{envelope:?}");
        }
    }

    #[test]
    fn unregistered_datatype_falls_back_to_stringifier() {
        let registry = ValueRegistry::with_builtins();
        let envelope = ValueEnvelope::new(Datatype::Other("musical-notation".into()), json!("𝄞"));
        assert_eq!(
            registry.render(&envelope),
            RenderDescriptor::Unknown { text: "𝄞".into() }
        );
    }

    #[test]
    fn higher_priority_shadows_lower() {
        let registry = ValueRegistry::builtin_builder()
            .register(ValuePlugin::new(
                "fancy-text",
                vec![Datatype::Text],
                5,
                UrlHandler,
            ))
            .build();
        let plugin = registry.resolve(&Datatype::Text).expect("resolved");
        assert_eq!(plugin.name, "fancy-text");
    }

    #[test]
    fn priority_ties_keep_the_first_winner() {
        let registry = ValueRegistry::builder()
            .register(ValuePlugin::new("first", vec![Datatype::Text], 3, TextHandler))
            .register(ValuePlugin::new("second", vec![Datatype::Text], 3, UrlHandler))
            .build();
        let plugin = registry.resolve(&Datatype::Text).expect("resolved");
        assert_eq!(plugin.name, "first");
    }

    #[test]
    fn offload_threshold_is_strict_and_defaults_to_ten_thousand() {
        let registry = ValueRegistry::with_builtins();

        let small = Value::String("g".repeat(9_000));
        assert!(!registry.should_upload_to_bucket(&Datatype::Polygon, &small));

        let large = Value::String("g".repeat(11_000));
        assert!(registry.should_upload_to_bucket(&Datatype::Polygon, &large));
        let policy = registry
            .offload_policy(&Datatype::Polygon, &large)
            .expect("policy");
        assert_eq!(policy.bucket, BucketId::new("geojson"));
        assert_eq!(policy.max_inline_chars, DEFAULT_INLINE_LIMIT);
    }

    #[test]
    fn pointer_payloads_are_never_offloaded_again() {
        let registry = ValueRegistry::with_builtins();
        let pointer = serde_json::to_value(FilePointer {
            file_id: "f".repeat(20_000),
            bucket_id: BucketId::new("geojson"),
            url: "memory://geojson/f/view".into(),
        })
        .expect("pointer value");
        assert!(!registry.should_upload_to_bucket(&Datatype::Polygon, &pointer));
    }

    #[test]
    fn pointer_envelopes_render_as_file_descriptors() {
        let registry = ValueRegistry::with_builtins();

        let geometry = ValueEnvelope::pointer(
            Datatype::Polygon,
            FilePointer {
                file_id: "f1".into(),
                bucket_id: BucketId::new("geojson"),
                url: "memory://geojson/f1/view".into(),
            },
        );
        assert_eq!(
            registry.render(&geometry),
            RenderDescriptor::GeometryFile {
                url: "memory://geojson/f1/view".into()
            }
        );

        let json_file = ValueEnvelope::pointer(
            Datatype::Json,
            FilePointer {
                file_id: "f2".into(),
                bucket_id: BucketId::new("json"),
                url: "memory://json/f2/view".into(),
            },
        );
        assert_eq!(registry.render(&json_file).kind(), "json-file");
    }

    #[test]
    fn image_preview_uses_thumbnails() {
        let registry = ValueRegistry::with_builtins();
        let envelope = ValueEnvelope::new(Datatype::Image, json!("https://img.example/x.png"));
        assert_eq!(registry.render(&envelope).kind(), "image");
        assert_eq!(registry.preview(&envelope).kind(), "image-thumbnail");
    }

    #[test]
    fn custom_inline_limit_is_honored() {
        let registry = ValueRegistry::builder()
            .register(
                ValuePlugin::new("json", vec![Datatype::Json], 0, JsonHandler).with_storage(
                    StoragePolicy::new(BucketId::new("json"), "application/json")
                        .with_inline_limit(10),
                ),
            )
            .build();
        assert!(!registry.should_upload_to_bucket(&Datatype::Json, &json!("tiny")));
        assert!(registry.should_upload_to_bucket(&Datatype::Json, &json!("0123456789abc")));
    }
}
