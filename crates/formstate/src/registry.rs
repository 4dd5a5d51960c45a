//! Field registry: descriptors plus the live value tree and default snapshot.
//!
//! The registry is the only owner of the value tree. Reads fall back in a
//! fixed order: live value, then the unmounted cache (the last live value
//! of a field removed by an unregistering unmount), then the default
//! snapshot.

use crate::access::{get_at_path, has_path, set_at_path, unset_at_path};
use crate::element::ElementRef;
use crate::{parse_path, FormDisabled, Path, RegisterOptions, ValidationRules};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry record for one field or field array.
#[derive(Clone)]
pub struct FieldDescriptor {
    /// Field path.
    pub name: Path,
    /// Built-in rules.
    pub rules: ValidationRules,
    /// Field-level disabled flag; `None` defers to the form.
    pub disabled: Option<bool>,
    /// Read-only affordance.
    pub read_only: bool,
    /// Descriptor of a whole field array (its rules apply to the array).
    pub is_array_root: bool,
    /// Whether an element is currently attached.
    pub mounted: bool,
    /// Primary element.
    pub element: Option<ElementRef>,
    /// Additional radio/checkbox options sharing this name.
    pub options: Vec<ElementRef>,
    /// Bumped whenever the rules are replaced.
    pub revision: u64,
    order: u64,
}

impl FieldDescriptor {
    fn new(name: Path, order: u64) -> Self {
        Self {
            name,
            rules: ValidationRules::default(),
            disabled: None,
            read_only: false,
            is_array_root: false,
            mounted: false,
            element: None,
            options: Vec::new(),
            revision: 0,
            order,
        }
    }

    /// Read-only through the descriptor or the attached element.
    pub fn is_read_only(&self) -> bool {
        self.read_only || self.element.as_ref().is_some_and(|e| e.read_only())
    }
}

impl std::fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name.to_string())
            .field("rules", &self.rules)
            .field("disabled", &self.disabled)
            .field("read_only", &self.read_only)
            .field("is_array_root", &self.is_array_root)
            .field("mounted", &self.mounted)
            .field("options", &self.options.len())
            .finish()
    }
}

/// Descriptor tree plus value trees of one form.
#[derive(Debug)]
pub struct FieldRegistry {
    fields: BTreeMap<Path, FieldDescriptor>,
    values: Value,
    defaults: Value,
    unmounted: Value,
    disabled_paths: Vec<Path>,
    form_disabled: bool,
    next_order: u64,
    next_revision: u64,
}

impl FieldRegistry {
    /// Create a registry whose live values start as a copy of `defaults`.
    pub fn new(defaults: Value, disabled: FormDisabled) -> Self {
        let (disabled_paths, form_disabled) = match disabled {
            FormDisabled::Form(flag) => (Vec::new(), flag),
            FormDisabled::Paths(paths) => (paths.iter().map(|p| parse_path(p)).collect(), false),
        };
        Self {
            fields: BTreeMap::new(),
            values: defaults.clone(),
            defaults,
            unmounted: Value::Object(Default::default()),
            disabled_paths,
            form_disabled,
            next_order: 0,
            next_revision: 0,
        }
    }

    /// Insert or update a field descriptor.
    ///
    /// Seeds the live value from the options or the default snapshot when no
    /// live value exists. Returns true for a new registration.
    pub fn register(&mut self, name: &Path, options: RegisterOptions) -> bool {
        let created = self.ensure(name);
        let revision = self.bump_revision();
        if let Some(field) = self.fields.get_mut(name) {
            field.rules = options.rules;
            field.revision = revision;
            if options.disabled.is_some() {
                field.disabled = options.disabled;
            }
            field.read_only = options.read_only;
        }
        if !has_path(&self.values, name) {
            let seed = options
                .value
                .or_else(|| get_at_path(&self.defaults, name).cloned());
            if let Some(seed) = seed {
                set_at_path(&mut self.values, name, seed);
            }
        }
        unset_at_path(&mut self.unmounted, name);
        created
    }

    /// Register (or update) a whole field array. Ensures an array value, and
    /// an empty default when none was given so the seeded `[]` is clean.
    pub fn register_array(&mut self, name: &Path, rules: ValidationRules) -> bool {
        let created = self.ensure(name);
        let revision = self.bump_revision();
        if let Some(field) = self.fields.get_mut(name) {
            field.rules = rules;
            field.revision = revision;
            field.is_array_root = true;
        }
        if !has_path(&self.defaults, name) {
            set_at_path(&mut self.defaults, name, Value::Array(Vec::new()));
        }
        if !matches!(get_at_path(&self.values, name), Some(Value::Array(_))) {
            let seed = match get_at_path(&self.defaults, name) {
                Some(Value::Array(rows)) => Value::Array(rows.clone()),
                _ => Value::Array(Vec::new()),
            };
            set_at_path(&mut self.values, name, seed);
        }
        created
    }

    fn bump_revision(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    fn ensure(&mut self, name: &Path) -> bool {
        if self.fields.contains_key(name) {
            return false;
        }
        let order = self.next_order;
        self.next_order += 1;
        self.fields
            .insert(name.clone(), FieldDescriptor::new(name.clone(), order));
        true
    }

    /// Attach an element to a registered field and mark it mounted.
    ///
    /// A radio/checkbox element joining an existing group is kept as another
    /// option; attaching the same element again is a no-op.
    pub fn attach_element(&mut self, name: &Path, element: ElementRef) -> bool {
        let Some(field) = self.fields.get_mut(name) else {
            return false;
        };
        field.mounted = true;
        match &field.element {
            Some(existing) if Arc::ptr_eq(existing, &element) => {}
            Some(_) if element.kind().is_grouped() => {
                if !field.options.iter().any(|o| Arc::ptr_eq(o, &element)) {
                    field.options.push(element);
                }
            }
            _ => field.element = Some(element),
        }
        true
    }

    /// Mark a field mounted without an element (headless hosts).
    pub fn mark_mounted(&mut self, name: &Path) -> bool {
        match self.fields.get_mut(name) {
            Some(field) => {
                field.mounted = true;
                true
            }
            None => false,
        }
    }

    /// Detach the element(s) of a field and mark it unmounted.
    pub fn detach(&mut self, name: &Path) -> bool {
        match self.fields.get_mut(name) {
            Some(field) => {
                field.mounted = false;
                field.element = None;
                field.options.clear();
                true
            }
            None => false,
        }
    }

    /// Remove the descriptor at `name` and every descriptor below it.
    /// Returns the removed paths.
    pub fn remove(&mut self, name: &Path) -> Vec<Path> {
        let removed: Vec<Path> = self
            .fields
            .keys()
            .filter(|k| name.is_prefix_of(k))
            .cloned()
            .collect();
        for key in &removed {
            self.fields.remove(key);
        }
        removed
    }

    /// Drop row descriptors of `array` whose index is `>= len`.
    pub fn prune_rows(&mut self, array: &Path, len: usize) {
        let depth = array.len();
        self.fields.retain(|k, _| {
            !(array.is_ancestor_of(k) && k[depth].as_index().is_some_and(|i| i >= len))
        });
    }

    /// Descriptor at `name`.
    #[inline]
    pub fn get(&self, name: &Path) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    /// True when a descriptor exists exactly at `name`.
    #[inline]
    pub fn contains(&self, name: &Path) -> bool {
        self.fields.contains_key(name)
    }

    /// True when `name` is a registered field array.
    pub fn is_array(&self, name: &Path) -> bool {
        self.fields.get(name).is_some_and(|f| f.is_array_root)
    }

    /// Nearest registered field array at or above `name`.
    pub fn array_ancestor(&self, name: &Path) -> Option<Path> {
        let mut current = Some(name.clone());
        while let Some(p) = current {
            if self.is_array(&p) {
                return Some(p);
            }
            current = p.parent();
        }
        None
    }

    /// True when a write to `name` is allowed: a descriptor exists at `name`,
    /// below it, or an ancestor is a registered field array.
    pub fn accepts(&self, name: &Path) -> bool {
        self.fields.contains_key(name)
            || self.array_ancestor(name).is_some()
            || self.fields.keys().any(|k| name.is_ancestor_of(k))
    }

    /// All registered names in registration order.
    pub fn names(&self) -> Vec<Path> {
        let mut fields: Vec<&FieldDescriptor> = self.fields.values().collect();
        fields.sort_by_key(|f| f.order);
        fields.into_iter().map(|f| f.name.clone()).collect()
    }

    /// Iterate over descriptors in path order.
    pub fn descriptors(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values()
    }

    /// Expand requested names into registered descriptor paths: a name with
    /// its own descriptor maps to itself, otherwise to every descriptor
    /// below it. Registration order is preserved.
    pub fn expand(&self, requested: &[Path]) -> Vec<Path> {
        self.names()
            .into_iter()
            .filter(|n| {
                requested
                    .iter()
                    .any(|r| r == n || (!self.fields.contains_key(r) && r.is_ancestor_of(n)))
            })
            .collect()
    }

    /// Resolved disabled state:
    /// field-level flag, else disabled-path list, else form-level flag.
    pub fn is_disabled(&self, name: &Path) -> bool {
        if let Some(flag) = self.fields.get(name).and_then(|f| f.disabled) {
            return flag;
        }
        if self.disabled_paths.iter().any(|p| p.is_prefix_of(name)) {
            return true;
        }
        self.form_disabled
    }

    /// Set the form-level flag. The disabled-path list is kept.
    pub fn set_form_disabled(&mut self, disabled: bool) {
        self.form_disabled = disabled;
    }

    /// Form-level disabled flag.
    pub fn form_disabled(&self) -> bool {
        self.form_disabled
    }

    /// Live value tree.
    #[inline]
    pub fn values(&self) -> &Value {
        &self.values
    }

    /// Default snapshot.
    #[inline]
    pub fn defaults(&self) -> &Value {
        &self.defaults
    }

    /// Replace the default snapshot.
    pub fn set_defaults(&mut self, defaults: Value) {
        self.defaults = defaults;
    }

    /// Set the default value of one path.
    pub fn set_default_at(&mut self, name: &Path, value: Value) {
        set_at_path(&mut self.defaults, name, value);
    }

    /// Replace the whole live value tree.
    pub fn replace_values(&mut self, values: Value) {
        self.values = values;
        self.unmounted = Value::Object(Default::default());
    }

    /// Write a live value. Returns false when the path is out of reach.
    pub fn set_value(&mut self, name: &Path, value: Value) -> bool {
        if name.is_empty() {
            self.values = value;
            return true;
        }
        set_at_path(&mut self.values, name, value)
    }

    /// Remove a live value.
    pub fn unset_value(&mut self, name: &Path) -> Option<Value> {
        unset_at_path(&mut self.values, name)
    }

    /// Read with the live -> unmounted cache -> default fallback.
    pub fn get_value(&self, name: &Path) -> Option<Value> {
        if name.is_empty() {
            return Some(self.values.clone());
        }
        get_at_path(&self.values, name)
            .or_else(|| get_at_path(&self.unmounted, name))
            .or_else(|| get_at_path(&self.defaults, name))
            .cloned()
    }

    /// Default value at `name`.
    #[inline]
    pub fn default_at(&self, name: &Path) -> Option<&Value> {
        get_at_path(&self.defaults, name)
    }

    /// Live value at `name` (no fallback).
    #[inline]
    pub fn live_at(&self, name: &Path) -> Option<&Value> {
        get_at_path(&self.values, name)
    }

    /// Move the live value at `name` into the unmounted cache.
    pub fn capture_unmounted(&mut self, name: &Path) {
        if let Some(last) = unset_at_path(&mut self.values, name) {
            set_at_path(&mut self.unmounted, name, last);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementKind, FieldElement};
    use serde_json::json;

    struct Radio;
    impl FieldElement for Radio {
        fn kind(&self) -> ElementKind {
            ElementKind::Radio
        }
    }

    struct Text;
    impl FieldElement for Text {}

    fn registry(defaults: Value) -> FieldRegistry {
        FieldRegistry::new(defaults, FormDisabled::default())
    }

    #[test]
    fn test_register_seeds_default_when_absent() {
        let mut reg = registry(json!({"name": "anon"}));
        reg.unset_value(&parse_path("name"));
        assert!(reg.register(&parse_path("name"), RegisterOptions::default()));
        assert_eq!(reg.values(), &json!({"name": "anon"}));
        // re-register does not duplicate
        assert!(!reg.register(&parse_path("name"), RegisterOptions::default()));
        assert_eq!(reg.names().len(), 1);
    }

    #[test]
    fn test_register_keeps_live_value() {
        let mut reg = registry(json!({"name": "anon"}));
        reg.set_value(&parse_path("name"), json!("bob"));
        reg.register(&parse_path("name"), RegisterOptions::default());
        assert_eq!(reg.get_value(&parse_path("name")), Some(json!("bob")));
    }

    #[test]
    fn test_radio_group_collects_options() {
        let mut reg = registry(json!({}));
        let name = parse_path("color");
        reg.register(&name, RegisterOptions::default());
        let red: ElementRef = Arc::new(Radio);
        let blue: ElementRef = Arc::new(Radio);
        reg.attach_element(&name, red.clone());
        reg.attach_element(&name, blue.clone());
        reg.attach_element(&name, red.clone());
        reg.attach_element(&name, blue);
        let field = reg.get(&name).unwrap();
        assert!(Arc::ptr_eq(field.element.as_ref().unwrap(), &red));
        assert_eq!(field.options.len(), 1);
        assert!(field.mounted);
    }

    #[test]
    fn test_plain_element_is_replaced() {
        let mut reg = registry(json!({}));
        let name = parse_path("title");
        reg.register(&name, RegisterOptions::default());
        reg.attach_element(&name, Arc::new(Text));
        let second: ElementRef = Arc::new(Text);
        reg.attach_element(&name, second.clone());
        let field = reg.get(&name).unwrap();
        assert!(Arc::ptr_eq(field.element.as_ref().unwrap(), &second));
        assert!(field.options.is_empty());
    }

    #[test]
    fn test_disabled_resolution_order() {
        let mut reg = FieldRegistry::new(json!({}), FormDisabled::Paths(vec!["address".into()]));
        let city = parse_path("address.city");
        let name = parse_path("name");
        reg.register(&city, RegisterOptions::default());
        reg.register(&name, RegisterOptions::default());
        assert!(reg.is_disabled(&city));
        assert!(!reg.is_disabled(&name));

        reg.register(&city, RegisterOptions::default().with_disabled(false));
        assert!(!reg.is_disabled(&city));

        reg.set_form_disabled(true);
        assert!(reg.is_disabled(&name));
        assert!(!reg.is_disabled(&city));

        // the list survives the form-level toggle
        let zip = parse_path("address.zip");
        reg.register(&zip, RegisterOptions::default());
        reg.set_form_disabled(false);
        assert!(reg.is_disabled(&zip));
        assert!(!reg.is_disabled(&name));
    }

    #[test]
    fn test_unmounted_cache_beats_default() {
        let mut reg = registry(json!({"a": "default"}));
        let a = parse_path("a");
        reg.register(&a, RegisterOptions::default());
        reg.set_value(&a, json!("typed"));
        reg.capture_unmounted(&a);
        assert!(reg.live_at(&a).is_none());
        assert_eq!(reg.get_value(&a), Some(json!("typed")));

        // re-registering seeds from the default again
        reg.register(&a, RegisterOptions::default());
        assert_eq!(reg.get_value(&a), Some(json!("default")));
    }

    #[test]
    fn test_accepts_array_descendants_and_parents() {
        let mut reg = registry(json!({}));
        reg.register_array(&parse_path("items"), ValidationRules::default());
        reg.register(&parse_path("address.city"), RegisterOptions::default());
        assert!(reg.accepts(&parse_path("items.3.name")));
        assert!(reg.accepts(&parse_path("address")));
        assert!(!reg.accepts(&parse_path("unknown")));
        assert_eq!(reg.live_at(&parse_path("items")), Some(&json!([])));
        assert_eq!(reg.default_at(&parse_path("items")), Some(&json!([])));
    }

    #[test]
    fn test_expand_and_prune_rows() {
        let mut reg = registry(json!({}));
        for n in ["items.0.name", "items.1.name", "items.2.name", "title"] {
            reg.register(&parse_path(n), RegisterOptions::default());
        }
        let expanded = reg.expand(&[parse_path("items")]);
        assert_eq!(expanded.len(), 3);
        reg.prune_rows(&parse_path("items"), 1);
        assert_eq!(reg.names(), vec![parse_path("items.0.name"), parse_path("title")]);
    }
}
