//! Root/target resolution.
//!
//! A root is what a brick operates on: the whole document, or a single element. The
//! engine never inspects elements itself. It asks a [`DocumentHost`] to run selectors
//! and an [`ElementHandles`] provider to turn opaque handles back into live elements.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use crate::core::AsAny;
use crate::core::error::PipelineError;
use crate::core::pipeline::RootMode;

/// A live element owned by the host document.
pub trait ElementNode: AsAny + Send + Sync + fmt::Debug {
    fn tag_name(&self) -> &str;

    fn text_content(&self) -> String;

    fn attribute(&self, _name: &str) -> Option<String> {
        None
    }
}

pub type ElementRef = Arc<dyn ElementNode>;

/// Downcasts an element to the host's concrete element type.
pub fn downcast_element<T: 'static>(element: &ElementRef) -> Option<&T> {
    let node: &dyn ElementNode = element.as_ref();
    node.as_any().downcast_ref::<T>()
}

#[derive(Debug, Clone, Default)]
pub enum Root {
    #[default]
    Document,
    Element(ElementRef),
}

impl Root {
    pub fn is_document(&self) -> bool {
        matches!(self, Root::Document)
    }

    pub fn as_element(&self) -> Option<&ElementRef> {
        match self {
            Root::Element(element) => Some(element),
            Root::Document => None,
        }
    }

    /// Identity comparison: two element roots are the same only if they point at the
    /// same live element.
    pub fn same_as(&self, other: &Root) -> bool {
        match (self, other) {
            (Root::Document, Root::Document) => true,
            (Root::Element(a), Root::Element(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Runs selectors against the host document.
pub trait DocumentHost: Send + Sync {
    /// Returns every element matching `selector` inside `scope`.
    fn query_selector_all(
        &self,
        scope: &Root,
        selector: &str,
    ) -> Result<Vec<ElementRef>, PipelineError>;
}

/// A host without a document. Every selector matches nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDocument;

impl DocumentHost for NullDocument {
    fn query_selector_all(
        &self,
        _scope: &Root,
        _selector: &str,
    ) -> Result<Vec<ElementRef>, PipelineError> {
        Ok(Vec::new())
    }
}

/// Mints and dereferences opaque element handles.
pub trait ElementHandles: Send + Sync {
    fn mint(&self, element: &ElementRef) -> String;

    /// `None` when the handle is unknown or its element is gone.
    fn dereference(&self, handle: &str) -> Option<ElementRef>;
}

/// In-memory handle table. Holds weak references, so a handle dies with its element.
#[derive(Default)]
pub struct MemoryElementHandles {
    handles: RwLock<HashMap<String, Weak<dyn ElementNode>>>,
}

impl MemoryElementHandles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles whose element may still be alive.
    pub fn len(&self) -> usize {
        self.handles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ElementHandles for MemoryElementHandles {
    fn mint(&self, element: &ElementRef) -> String {
        let handle = uuid::Uuid::new_v4().to_string();
        let mut handles = self
            .handles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handles.retain(|_, weak| weak.strong_count() > 0);
        handles.insert(handle.clone(), Arc::downgrade(element));
        handle
    }

    fn dereference(&self, handle: &str) -> Option<ElementRef> {
        let live = self
            .handles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(handle)
            .map(Weak::upgrade);
        match live {
            Some(None) => {
                self.handles
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(handle);
                None
            }
            Some(element) => element,
            None => None,
        }
    }
}

/// Computes the root a node operates on.
///
/// Selector-based lookups must match exactly one element; anything else is an
/// authoring bug and fails loudly.
pub fn resolve_root(
    mode: RootMode,
    selector_or_handle: Option<&str>,
    parent: &Root,
    document: &dyn DocumentHost,
    handles: &dyn ElementHandles,
) -> Result<Root, PipelineError> {
    match (mode, selector_or_handle) {
        (RootMode::Inherit, None) => Ok(parent.clone()),
        (RootMode::Inherit, Some(selector)) => select_one(document, parent, selector),
        (RootMode::Document, None) => Ok(Root::Document),
        (RootMode::Document, Some(selector)) => select_one(document, &Root::Document, selector),
        (RootMode::Element, None) => Err(PipelineError::invalid_pipeline(
            "rootMode 'element' requires an element handle",
        )),
        (RootMode::Element, Some(handle)) => handles
            .dereference(handle)
            .map(Root::Element)
            .ok_or_else(|| {
                PipelineError::business("Root element no longer exists on the page")
            }),
    }
}

fn select_one(
    document: &dyn DocumentHost,
    scope: &Root,
    selector: &str,
) -> Result<Root, PipelineError> {
    let mut matches = document.query_selector_all(scope, selector)?;
    match matches.len() {
        0 => Err(PipelineError::business(format!(
            "No roots found for selector '{}'",
            selector
        ))),
        1 => Ok(Root::Element(matches.remove(0))),
        n => Err(PipelineError::business(format!(
            "Multiple roots found for selector '{}' ({} matches)",
            selector, n
        ))),
    }
}
