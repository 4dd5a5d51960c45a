//! Reactive form-state engine.
//!
//! `formstate` tracks the live state of a set of named fields: values,
//! validity, dirtiness, touch history and validation status. Every mutation
//! decides what changed, which observers must be told and which validation
//! must run.
//!
//! # Core Concepts
//!
//! - **Path**: a parsed field name (`"items[2].name"` / `"items.2.name"`)
//!   addressing a node of the value, error and meta trees
//! - **Form**: cloneable handle owning one form's registry, trees and channels
//! - **ValidationRules**: built-in per-field rules (`required`, `min`, `pattern`, ...)
//! - **Resolver**: external async validator used instead of the rules
//! - **FieldErrors**: error tree; an error on an array covers its rows
//! - **Subject**: multicast channel behind form-state, watch and array subscriptions
//! - **FieldArray**: structural row operations keeping every tree index-aligned
//!
//! # Quick Start
//!
//! ```
//! use formstate::{Form, FormOptions, Mode, RegisterOptions, ValidationRules};
//! use serde_json::json;
//!
//! # futures::executor::block_on(async {
//! let form = Form::new(
//!     FormOptions::new()
//!         .with_mode(Mode::OnBlur)
//!         .with_default_values(json!({"email": ""})),
//! );
//! form.register("email", RegisterOptions::new(ValidationRules::new().required("Email is required")));
//!
//! form.handle_change("email", json!("")).await;
//! form.handle_blur("email").await;
//! assert_eq!(form.errors().get("email").unwrap().kind, "required");
//!
//! form.handle_change("email", json!("ada@example.com")).await;
//! form.handle_blur("email").await;
//! assert!(form.errors().get("email").is_none());
//! # });
//! ```
//!
//! # Watching values
//!
//! ```
//! use formstate::{Form, FormOptions, RegisterOptions, SetValueOptions};
//! use serde_json::json;
//! use std::sync::{Arc, Mutex};
//!
//! let form = Form::new(FormOptions::new().with_default_values(json!({"title": ""})));
//! form.register("title", RegisterOptions::default());
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let _watch = form
//!     .watch("title")
//!     .compute(|v| json!(v.as_str().map_or(0, str::len) > 2))
//!     .subscribe(move |long| sink.lock().unwrap().push(long.clone()));
//!
//! for text in ["1", "12", "123"] {
//!     form.set_value("title", json!(text), SetValueOptions::default());
//! }
//! assert_eq!(*seen.lock().unwrap(), vec![json!(true)]);
//! ```

mod access;
mod element;
mod error;
mod field_array;
mod form;
mod meta;
mod options;
mod path;
mod registry;
mod resolver;
mod rules;
mod scheduler;
mod state;
mod subject;
mod validation;
mod watch;

// Paths and tree access
pub use access::{get_at_path, has_path, set_at_path, unset_at_path, MAX_INDEX_GAP};
pub use path::{is_key, parse_path, Path, Seg};

// Errors
pub use error::{resolver_error_path, FieldError, FieldErrors, FormError, FormResult};

// Form
pub use element::{ElementKind, ElementRef, FieldElement, Focusable, Scrollable, Selectable};
pub use form::Form;
pub use options::{
    CriteriaMode, FormDisabled, FormOptions, Mode, ReValidateMode, RegisterOptions,
    ResetFieldOptions, ResetOptions, SetValueOptions, UnregisterOptions,
};
pub use state::{FieldState, FormStateSnapshot, StateSelector, StateUpdate};

// Validation
pub use resolver::{Resolver, ResolverError, ResolverField, ResolverOptions, ResolverOutput};
pub use rules::{evaluate_rules, is_empty_value, Rule, Validate, ValidateFn, ValidateResult, ValidationRules};

// Subscriptions
pub use field_array::{new_row_id, ArrayEvent, ArrayOp, ArrayRow, FieldArray};
pub use subject::{Subject, Subscription};
pub use watch::{ComputeFn, ValuesEvent, WatchBuilder, WatchHandle, WatchTarget};

// Re-export serde_json::Value for convenience
pub use serde_json::Value;
