//! Template schema cache.
//!
//! Pattern construction consults declared field kinds to reject clauses that
//! could never match. The cache is an explicit object handed to whoever
//! builds patterns; there is no process-wide table.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::event::TemplateId;
use crate::value::{FieldPath, ValueKind};

/// Declared field kinds of one template.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSchema {
    template_id: TemplateId,
    fields: HashMap<String, ValueKind>,
}

impl TemplateSchema {
    #[must_use]
    pub fn new(template_id: TemplateId) -> Self {
        Self {
            template_id,
            fields: HashMap::new(),
        }
    }

    /// Declares the kind at a dotted path. Nested records are declared by
    /// their full path, e.g. `terms.amount`.
    #[must_use]
    pub fn field(mut self, path: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.insert(path.into(), kind);
        self
    }

    #[must_use]
    pub const fn template_id(&self) -> &TemplateId {
        &self.template_id
    }

    #[must_use]
    pub fn kind_of(&self, path: &FieldPath) -> Option<ValueKind> {
        self.fields.get(path.as_str()).copied()
    }

    /// True when `path` or one of its prefixes is declared.
    ///
    /// Paths below a declared record, list or optional are accepted without
    /// a kind since the schema does not describe their children.
    #[must_use]
    pub fn covers(&self, path: &FieldPath) -> bool {
        let raw = path.as_str();
        if self.fields.contains_key(raw) {
            return true;
        }
        self.fields.iter().any(|(declared, kind)| {
            matches!(
                kind,
                ValueKind::Record | ValueKind::List | ValueKind::Optional | ValueKind::Variant
            ) && raw
                .strip_prefix(declared.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
        })
    }
}

/// Thread-safe cache of template schemas.
#[derive(Debug, Default)]
pub struct SchemaCache {
    schemas: RwLock<HashMap<TemplateId, TemplateSchema>>,
}

impl SchemaCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema, replacing any previous one for the same template.
    pub fn register(&self, schema: TemplateSchema) {
        tracing::debug!(template = %schema.template_id, fields = schema.fields.len(), "schema registered");
        self.schemas.write().insert(schema.template_id.clone(), schema);
    }

    #[must_use]
    pub fn get(&self, template_id: &TemplateId) -> Option<TemplateSchema> {
        self.schemas.read().get(template_id).cloned()
    }

    #[must_use]
    pub fn field_kind(&self, template_id: &TemplateId, path: &FieldPath) -> Option<ValueKind> {
        self.schemas
            .read()
            .get(template_id)
            .and_then(|s| s.kind_of(path))
    }

    #[must_use]
    pub fn contains(&self, template_id: &TemplateId) -> bool {
        self.schemas.read().contains_key(template_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }

    pub fn clear(&self) {
        self.schemas.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iou() -> TemplateSchema {
        TemplateSchema::new(TemplateId::new("Main", "Iou"))
            .field("owner", ValueKind::Party)
            .field("amount", ValueKind::Decimal)
            .field("terms", ValueKind::Record)
    }

    #[test]
    fn test_field_kind_lookup() {
        let cache = SchemaCache::new();
        cache.register(iou());

        let t = TemplateId::new("Main", "Iou");
        let owner = FieldPath::parse("owner").unwrap();
        assert_eq!(cache.field_kind(&t, &owner), Some(ValueKind::Party));
        assert!(cache.contains(&t));
        assert_eq!(cache.len(), 1);

        let other = TemplateId::new("Main", "Other");
        assert_eq!(cache.field_kind(&other, &owner), None);
    }

    #[test]
    fn test_covers_nested_paths_under_records() {
        let schema = iou();
        assert!(schema.covers(&FieldPath::parse("terms.due").unwrap()));
        assert!(!schema.covers(&FieldPath::parse("owner.name").unwrap()));
        assert!(!schema.covers(&FieldPath::parse("termsx").unwrap()));
        assert!(!schema.covers(&FieldPath::parse("missing").unwrap()));
    }

    #[test]
    fn test_register_replaces() {
        let cache = SchemaCache::new();
        cache.register(iou());
        cache.register(TemplateSchema::new(TemplateId::new("Main", "Iou")));
        let t = TemplateId::new("Main", "Iou");
        assert_eq!(cache.field_kind(&t, &FieldPath::parse("owner").unwrap()), None);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_separate_caches_are_isolated() {
        let a = SchemaCache::new();
        let b = SchemaCache::new();
        a.register(iou());
        assert!(a.contains(&TemplateId::new("Main", "Iou")));
        assert!(!b.contains(&TemplateId::new("Main", "Iou")));
    }
}
