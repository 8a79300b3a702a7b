//! The chapter tree.
//!
//! A [`Chapter`] is a cheap handle to a node of the tree. The children list
//! of a node is the only owner of its children; the parent link is weak, so
//! detaching or dropping a subtree never leaks through cycles.
//!
//! ```
//! use pmab::chapter::Chapter;
//!
//! let root = Chapter::new("Book");
//! let first = Chapter::new("One");
//! root.append(&first).unwrap();
//!
//! assert!(root.is_section());
//! assert!(first.parent().unwrap().ptr_eq(&root));
//! // a chapter can only have one parent
//! assert!(Chapter::new("Other").append(&first).is_err());
//! ```

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

use crate::text::Text;
use crate::variant::{Attributes, FromVariant, TypeMismatch, Variant};

pub const TITLE: &str = "title";

// Using RefCell because the tree is edited through shared handles.
// Using rc because a node is referenced by its parent and by its handles.
type NodeRef = Rc<RefCell<Node>>;
type ParentNodeRef = Weak<RefCell<Node>>;

/// Result returned by cleanup hooks. Failures are logged, never propagated.
pub type HookResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Hook = Box<dyn FnOnce() -> HookResult>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("A chapter can't be appended to itself")]
    SelfAppend,
    #[error("Chapter already has a parent")]
    AlreadyAttached,
    #[error("Chapter is an ancestor of the target")]
    Cycle,
    #[error("Index {index} out of bounds for {len} children")]
    IndexOutOfBounds { index: usize, len: usize },
}

#[derive(Default)]
struct Node {
    attributes: Attributes,
    content: Option<Text>,
    children: Vec<Chapter>,
    parent: Option<ParentNodeRef>,
    hooks: Vec<Hook>,
    cleaned: bool,
}

impl Drop for Node {
    fn drop(&mut self) {
        if !self.hooks.is_empty() {
            warn!(
                hooks = self.hooks.len(),
                "chapter dropped without cleanup, hooks never ran"
            );
        }
    }
}

/// Handle to a node of the chapter tree.
///
/// Cloning a `Chapter` clones the handle, both handles see the same node.
/// Use [`Chapter::deep_clone`] to copy a subtree.
#[derive(Clone, Default)]
pub struct Chapter {
    node: NodeRef,
}

impl Chapter {
    pub fn new(title: &str) -> Self {
        let chapter = Self::default();
        chapter.set_title(title);
        chapter
    }

    /// Returns true if both handles point to the same node.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    pub fn title(&self) -> String {
        self.node
            .borrow()
            .attributes
            .get_as(TITLE, String::new())
            .unwrap_or_default()
    }

    pub fn set_title(&self, title: &str) {
        if let Err(e) = self.set(TITLE, title) {
            warn!(error = %e, "title rejected");
        }
    }

    /// Sets the attribute `name`, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`TypeMismatch`] if `name` is registered with another kind.
    pub fn set<V: Into<Variant>>(
        &self,
        name: &str,
        value: V,
    ) -> Result<Option<Variant>, TypeMismatch> {
        self.node.borrow_mut().attributes.set(name, value)
    }

    pub fn get(&self, name: &str) -> Option<Variant> {
        self.node.borrow().attributes.get(name).cloned()
    }

    /// Returns the attribute `name` as `T`, or `default` when it's not set.
    ///
    /// # Errors
    ///
    /// Returns [`TypeMismatch`] if the value is of another kind.
    pub fn get_as<T: FromVariant>(&self, name: &str, default: T) -> Result<T, TypeMismatch> {
        self.node.borrow().attributes.get_as(name, default)
    }

    pub fn remove_attribute(&self, name: &str) -> Option<Variant> {
        self.node.borrow_mut().attributes.remove(name)
    }

    /// Borrows the attribute map.
    pub fn attributes(&self) -> Ref<'_, Attributes> {
        Ref::map(self.node.borrow(), |n| &n.attributes)
    }

    pub fn content(&self) -> Option<Text> {
        self.node.borrow().content.clone()
    }

    pub fn set_content(&self, content: Option<Text>) {
        self.node.borrow_mut().content = content;
    }

    pub fn parent(&self) -> Option<Self> {
        let node = self.node.borrow();
        let parent = node.parent.as_ref()?.upgrade()?;
        Some(Self { node: parent })
    }

    pub fn children(&self) -> Vec<Self> {
        self.node.borrow().children.clone()
    }

    pub fn size(&self) -> usize {
        self.node.borrow().children.len()
    }

    /// A section is a chapter with at least one child.
    pub fn is_section(&self) -> bool {
        self.size() > 0
    }

    pub fn child_at(&self, index: usize) -> Option<Self> {
        self.node.borrow().children.get(index).cloned()
    }

    pub fn index_of(&self, chapter: &Self) -> Option<usize> {
        self.node
            .borrow()
            .children
            .iter()
            .position(|c| c.ptr_eq(chapter))
    }

    // Checks that `chapter` may become a child of `self`.
    fn check_attach(&self, chapter: &Self) -> Result<(), TreeError> {
        if self.ptr_eq(chapter) {
            return Err(TreeError::SelfAppend);
        }
        if chapter.parent().is_some() {
            return Err(TreeError::AlreadyAttached);
        }
        let mut ancestor = self.parent();
        while let Some(a) = ancestor {
            if a.ptr_eq(chapter) {
                return Err(TreeError::Cycle);
            }
            ancestor = a.parent();
        }
        Ok(())
    }

    fn adopt(&self, chapter: &Self) {
        chapter.node.borrow_mut().parent = Some(Rc::downgrade(&self.node));
    }

    /// Appends `chapter` as the last child.
    ///
    /// # Errors
    ///
    /// Fails if `chapter` is `self`, already has a parent or is an ancestor
    /// of `self`.
    pub fn append(&self, chapter: &Self) -> Result<(), TreeError> {
        self.check_attach(chapter)?;
        self.adopt(chapter);
        self.node.borrow_mut().children.push(chapter.clone());
        Ok(())
    }

    /// Inserts `chapter` at `index`, shifting later children.
    ///
    /// # Errors
    ///
    /// Same as [`Self::append`], plus [`TreeError::IndexOutOfBounds`] if
    /// `index` is greater than the number of children.
    pub fn insert(&self, index: usize, chapter: &Self) -> Result<(), TreeError> {
        let len = self.size();
        if index > len {
            return Err(TreeError::IndexOutOfBounds { index, len });
        }
        self.check_attach(chapter)?;
        self.adopt(chapter);
        self.node.borrow_mut().children.insert(index, chapter.clone());
        Ok(())
    }

    /// Detaches and returns the child at `index`. The child is not cleaned.
    pub fn remove_at(&self, index: usize) -> Option<Self> {
        let mut node = self.node.borrow_mut();
        if index >= node.children.len() {
            return None;
        }
        let child = node.children.remove(index);
        drop(node);
        child.node.borrow_mut().parent = None;
        Some(child)
    }

    /// Detaches `chapter` if it is a child of `self`. The child is not
    /// cleaned.
    pub fn remove(&self, chapter: &Self) -> bool {
        match self.index_of(chapter) {
            Some(index) => self.remove_at(index).is_some(),
            None => false,
        }
    }

    /// Puts `chapter` at `index` and returns the detached previous child.
    ///
    /// # Errors
    ///
    /// Same as [`Self::insert`], with `index` required to be in bounds.
    pub fn replace(&self, index: usize, chapter: &Self) -> Result<Self, TreeError> {
        let len = self.size();
        if index >= len {
            return Err(TreeError::IndexOutOfBounds { index, len });
        }
        self.check_attach(chapter)?;
        self.adopt(chapter);
        let old = std::mem::replace(
            &mut self.node.borrow_mut().children[index],
            chapter.clone(),
        );
        old.node.borrow_mut().parent = None;
        Ok(old)
    }

    /// Swaps the children at `i` and `j`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::IndexOutOfBounds`] if either index is invalid.
    pub fn swap(&self, i: usize, j: usize) -> Result<(), TreeError> {
        let mut node = self.node.borrow_mut();
        let len = node.children.len();
        for index in [i, j] {
            if index >= len {
                return Err(TreeError::IndexOutOfBounds { index, len });
            }
        }
        node.children.swap(i, j);
        Ok(())
    }

    /// Detaches every child, cleaning them up first when `cleanup` is set.
    pub fn clear(&self, cleanup: bool) {
        let children = std::mem::take(&mut self.node.borrow_mut().children);
        for child in children {
            child.node.borrow_mut().parent = None;
            if cleanup {
                child.cleanup();
            }
        }
    }

    /// Registers `hook` to run once, on [`Self::cleanup`].
    pub fn add_cleanup_hook<F>(&self, hook: F)
    where
        F: FnOnce() -> HookResult + 'static,
    {
        self.node.borrow_mut().hooks.push(Box::new(hook));
    }

    /// Runs the cleanup hooks, then clears attributes, content and the
    /// whole subtree. Calling it again does nothing.
    pub fn cleanup(&self) {
        let hooks = std::mem::take(&mut self.node.borrow_mut().hooks);
        for hook in hooks {
            if let Err(e) = hook() {
                warn!(error = %e, "cleanup hook failed");
            }
        }

        {
            let mut node = self.node.borrow_mut();
            if node.cleaned && node.attributes.is_empty() && node.children.is_empty() {
                return;
            }
            node.attributes.clear();
            node.content = None;
            node.cleaned = true;
        }
        self.clear(true);
        trace!("chapter cleaned");
    }

    pub fn is_cleaned(&self) -> bool {
        self.node.borrow().cleaned
    }

    /// Copies the whole subtree into a new, detached tree.
    ///
    /// Attributes and content are copied, lazy resources keep pointing to
    /// the same backing store. Cleanup hooks are not copied.
    pub fn deep_clone(&self) -> Self {
        let copy = Self::default();
        {
            let node = self.node.borrow();
            let mut dst = copy.node.borrow_mut();
            dst.attributes = node.attributes.clone();
            dst.content = node.content.clone();
        }
        for child in self.children() {
            let child = child.deep_clone();
            copy.adopt(&child);
            copy.node.borrow_mut().children.push(child);
        }
        copy
    }

    /// Number of nesting levels below this chapter, 0 for a leaf.
    pub fn depth(&self) -> usize {
        self.node
            .borrow()
            .children
            .iter()
            .map(|c| c.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Visits this chapter and every descendant in pre-order, with the
    /// nesting level relative to `self`.
    pub fn walk<F: FnMut(&Self, usize)>(&self, visitor: &mut F) {
        self.walk_level(visitor, 0);
    }

    fn walk_level<F: FnMut(&Self, usize)>(&self, visitor: &mut F, level: usize) {
        visitor(self, level);
        for child in self.children() {
            child.walk_level(visitor, level + 1);
        }
    }
}

impl fmt::Debug for Chapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.node.borrow();
        f.debug_struct("Chapter")
            .field("attributes", &node.attributes)
            .field("content", &node.content.is_some())
            .field("children", &node.children)
            .finish_non_exhaustive()
    }
}
