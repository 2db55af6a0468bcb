//! Model hierarchy capability consumed by the hook registrar.
//!
//! The registrar never sees concrete model classes. Any node type that can
//! list its children and accept pre/post invocation callbacks implements
//! [`ModelNode`]. [`HookSet`] holds the callbacks for such a node, and
//! [`Module`] is a ready-made named tree built on it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;

/// Callback invoked around a node's forward computation.
pub type ForwardHook = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Identifier of an attached hook, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(pub u64);

static NEXT_HOOK_ID: AtomicU64 = AtomicU64::new(1);

impl HookId {
    /// Allocate a fresh hook id.
    pub fn next() -> Self {
        Self(NEXT_HOOK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hook-{}", self.0)
    }
}

/// A node of a model hierarchy.
///
/// Leaves are nodes whose `children` is empty.
pub trait ModelNode {
    /// Type or instance name used to build event names.
    fn identifier(&self) -> &str;

    /// Direct children, in order.
    fn children(&self) -> Vec<&dyn ModelNode>;

    /// Direct children, in order, mutably.
    fn children_mut(&mut self) -> Vec<&mut dyn ModelNode>;

    /// Attach a callback run before the node's forward computation.
    fn register_pre_hook(&mut self, hook: ForwardHook) -> HookId;

    /// Attach a callback run after the node's forward computation.
    fn register_post_hook(&mut self, hook: ForwardHook) -> HookId;

    /// Detach a previously attached callback. Returns whether it was found.
    fn remove_hook(&mut self, id: HookId) -> bool;

    /// Check if the node has no children.
    fn is_leaf(&self) -> bool {
        self.children().is_empty()
    }
}

/// Ordered pre/post callbacks of one node.
#[derive(Default, Clone)]
pub struct HookSet {
    pre: Vec<(HookId, ForwardHook)>,
    post: Vec<(HookId, ForwardHook)>,
}

impl HookSet {
    /// Create an empty hook set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pre-invocation callback.
    pub fn add_pre(&mut self, hook: ForwardHook) -> HookId {
        let id = HookId::next();
        self.pre.push((id, hook));
        id
    }

    /// Append a post-invocation callback.
    pub fn add_post(&mut self, hook: ForwardHook) -> HookId {
        let id = HookId::next();
        self.post.push((id, hook));
        id
    }

    /// Remove a callback from either list.
    pub fn remove(&mut self, id: HookId) -> bool {
        let before = self.pre.len() + self.post.len();
        self.pre.retain(|(hook_id, _)| *hook_id != id);
        self.post.retain(|(hook_id, _)| *hook_id != id);
        self.pre.len() + self.post.len() != before
    }

    /// Run pre callbacks in attachment order, stopping at the first error.
    pub fn run_pre(&self) -> Result<()> {
        self.pre.iter().try_for_each(|(_, hook)| hook())
    }

    /// Run post callbacks in attachment order, stopping at the first error.
    pub fn run_post(&self) -> Result<()> {
        self.post.iter().try_for_each(|(_, hook)| hook())
    }

    /// Number of pre callbacks.
    pub fn pre_len(&self) -> usize {
        self.pre.len()
    }

    /// Number of post callbacks.
    pub fn post_len(&self) -> usize {
        self.post.len()
    }

    /// Check if no callbacks are attached.
    pub fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.post.is_empty()
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSet")
            .field("pre", &self.pre.len())
            .field("post", &self.post.len())
            .finish()
    }
}

/// A named node in a module tree.
///
/// `forward` runs the node's pre hooks, the children's forwards in order, the
/// node's own body, then its post hooks. Post hooks run whenever the pre hooks
/// succeeded, including after a failing child or body; the first error is
/// returned.
#[derive(Debug, Clone)]
pub struct Module {
    name: String,
    children: Vec<Module>,
    hooks: HookSet,
}

impl Module {
    /// Create a leaf module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            hooks: HookSet::new(),
        }
    }

    /// Add a child (builder-style).
    #[must_use]
    pub fn with_child(mut self, child: Module) -> Self {
        self.children.push(child);
        self
    }

    /// Append a child.
    pub fn push_child(&mut self, child: Module) {
        self.children.push(child);
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Child modules.
    pub fn modules(&self) -> &[Module] {
        &self.children
    }

    /// Hooks attached to this module.
    pub fn hooks(&self) -> &HookSet {
        &self.hooks
    }

    /// Total number of modules in this subtree, including this one.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(Module::len).sum::<usize>()
    }

    /// Always false; a module tree has at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Run the forward pass over this subtree.
    ///
    /// `body` is called once per module with the module name, after the
    /// module's children have run. Once the pre hooks succeeded the post
    /// hooks always run, so every pushed event is popped even when a child or
    /// the body fails; the first error is returned.
    pub fn forward<F>(&self, body: &mut F) -> Result<()>
    where
        F: FnMut(&str) -> Result<()>,
    {
        self.hooks.run_pre()?;
        let result = self.forward_inner(body);
        let post = self.hooks.run_post();
        result.and(post)
    }

    fn forward_inner<F>(&self, body: &mut F) -> Result<()>
    where
        F: FnMut(&str) -> Result<()>,
    {
        for child in &self.children {
            child.forward(body)?;
        }
        body(&self.name)
    }
}

impl ModelNode for Module {
    fn identifier(&self) -> &str {
        &self.name
    }

    fn children(&self) -> Vec<&dyn ModelNode> {
        self.children.iter().map(|c| c as &dyn ModelNode).collect()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn ModelNode> {
        self.children
            .iter_mut()
            .map(|c| c as &mut dyn ModelNode)
            .collect()
    }

    fn register_pre_hook(&mut self, hook: ForwardHook) -> HookId {
        self.hooks.add_pre(hook)
    }

    fn register_post_hook(&mut self, hook: ForwardHook) -> HookId {
        self.hooks.add_post(hook)
    }

    fn remove_hook(&mut self, id: HookId) -> bool {
        self.hooks.remove(id)
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::error::ProfilerError;

    fn recording_hook(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> ForwardHook {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        Arc::new(move || {
            log.lock().push(tag.clone());
            Ok(())
        })
    }

    #[test]
    fn test_hook_ids_unique() {
        let a = HookId::next();
        let b = HookId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("hook-"));
    }

    #[test]
    fn test_hook_set_add_remove() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = HookSet::new();
        let pre = hooks.add_pre(recording_hook(&log, "pre"));
        let post = hooks.add_post(recording_hook(&log, "post"));
        assert_eq!(hooks.pre_len(), 1);
        assert_eq!(hooks.post_len(), 1);

        assert!(hooks.remove(pre));
        assert!(!hooks.remove(pre));
        assert!(hooks.remove(post));
        assert!(hooks.is_empty());
    }

    #[test]
    fn test_module_tree_shape() {
        let model = Module::new("Net")
            .with_child(Module::new("Linear"))
            .with_child(Module::new("Block").with_child(Module::new("Conv")));

        assert_eq!(model.len(), 4);
        assert!(!model.is_leaf());
        assert!(model.modules()[0].is_leaf());
        assert_eq!(model.children().len(), 2);
        assert_eq!(model.identifier(), "Net");
    }

    #[test]
    fn test_forward_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut model = Module::new("Net").with_child(Module::new("Linear"));
        model.register_pre_hook(recording_hook(&log, "Net.pre"));
        model.register_post_hook(recording_hook(&log, "Net.post"));
        model.children_mut()[0].register_pre_hook(recording_hook(&log, "Linear.pre"));
        model.children_mut()[0].register_post_hook(recording_hook(&log, "Linear.post"));

        let body_log = Arc::clone(&log);
        model
            .forward(&mut |name: &str| {
                body_log.lock().push(format!("{}.body", name));
                Ok(())
            })
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "Net.pre",
                "Linear.pre",
                "Linear.body",
                "Linear.post",
                "Net.body",
                "Net.post",
            ]
        );
    }

    #[test]
    fn test_forward_error_propagates() {
        let model = Module::new("Net").with_child(Module::new("Linear"));
        let result = model.forward(&mut |name: &str| {
            if name == "Linear" {
                Err(ProfilerError::backend("shape mismatch"))
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err(ProfilerError::backend("shape mismatch")));
    }

    #[test]
    fn test_post_hooks_run_after_failing_child() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut model = Module::new("Net").with_child(Module::new("Linear"));
        model.register_pre_hook(recording_hook(&log, "Net.pre"));
        model.register_post_hook(recording_hook(&log, "Net.post"));
        model.children_mut()[0].register_pre_hook(recording_hook(&log, "Linear.pre"));
        model.children_mut()[0].register_post_hook(recording_hook(&log, "Linear.post"));

        let result = model.forward(&mut |name: &str| {
            if name == "Linear" {
                Err(ProfilerError::backend("shape mismatch"))
            } else {
                Ok(())
            }
        });

        assert_eq!(result, Err(ProfilerError::backend("shape mismatch")));
        assert_eq!(
            *log.lock(),
            vec!["Net.pre", "Linear.pre", "Linear.post", "Net.post"]
        );
    }

    #[test]
    fn test_body_error_wins_over_post_error() {
        let mut model = Module::new("Net");
        model.register_post_hook(Arc::new(|| Err(ProfilerError::NotAvailable)));

        let result = model.forward(&mut |_name: &str| Err(ProfilerError::backend("nan loss")));
        assert_eq!(result, Err(ProfilerError::backend("nan loss")));
    }
}
