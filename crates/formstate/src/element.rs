//! Host element capabilities.
//!
//! The rendering layer hands the engine an opaque element per field. The
//! engine only ever calls through the optional capability checks below, so
//! a headless host can register fields with no element at all.

use std::sync::Arc;

/// What sort of control an element is. Radio and checkbox elements sharing
/// one name form an option group instead of replacing each other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ElementKind {
    /// One of several radio options.
    Radio,
    /// One of several checkbox options.
    Checkbox,
    /// Any other control.
    #[default]
    Other,
}

impl ElementKind {
    /// True for radio/checkbox controls.
    #[inline]
    pub fn is_grouped(self) -> bool {
        matches!(self, ElementKind::Radio | ElementKind::Checkbox)
    }
}

/// Element that can take input focus.
pub trait Focusable {
    /// Move focus to this element.
    fn focus(&self);
}

/// Element whose content can be selected.
pub trait Selectable {
    /// Select the element's content.
    fn select(&self);
}

/// Element that can be scrolled into view.
pub trait Scrollable {
    /// Scroll the element into view.
    fn scroll_into_view(&self);
}

/// Opaque host element attached to a field.
///
/// Every capability defaults to absent.
pub trait FieldElement: Send + Sync {
    /// Kind of control.
    fn kind(&self) -> ElementKind {
        ElementKind::Other
    }

    /// Whether the control is read-only.
    fn read_only(&self) -> bool {
        false
    }

    /// Focus capability, if any.
    fn as_focusable(&self) -> Option<&dyn Focusable> {
        None
    }

    /// Select capability, if any.
    fn as_selectable(&self) -> Option<&dyn Selectable> {
        None
    }

    /// Scroll capability, if any.
    fn as_scrollable(&self) -> Option<&dyn Scrollable> {
        None
    }
}

/// Shared element handle.
pub type ElementRef = Arc<dyn FieldElement>;

/// Focus an element through its capabilities, optionally selecting its
/// content. Returns false when the element cannot take focus.
pub(crate) fn focus_element(element: &dyn FieldElement, select: bool) -> bool {
    let Some(focusable) = element.as_focusable() else {
        return false;
    };
    if let Some(scrollable) = element.as_scrollable() {
        scrollable.scroll_into_view();
    }
    focusable.focus();
    if select {
        if let Some(selectable) = element.as_selectable() {
            selectable.select();
        }
    }
    true
}
