//! Per-node forward hooks that bracket each model node with a trace event.
//!
//! The registrar walks a [`ModelNode`] tree once, up front, and attaches a
//! pre/post callback pair to the selected nodes. The pre callback pushes
//! `"{identifier}_fwd"` and the post callback pops it, both only while the
//! session is enabled. Every binding it creates is returned in a
//! [`HookRegistration`] so the hooks can be inspected or removed later.
//!
//! ## Granularity
//!
//! | Policy       | Hooked nodes                                      |
//! |--------------|---------------------------------------------------|
//! | `AllNodes`   | every node, containers included (post-order)      |
//! | `LeavesOnly` | the root, plus every node without children        |
//!
//! `AllNodes` shows every container but attributes the same time range at
//! several nesting levels. `LeavesOnly` gives one aggregate top-level event
//! plus one event per leaf computation.
//!
//! Registration is not idempotent: registering the same tree twice attaches
//! two independent pairs and doubles the events.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ProfilerError, Result};
use crate::model::{ForwardHook, HookId, ModelNode};
use crate::session::ProfilingSession;

/// Suffix appended to a node identifier to form its event name.
pub const FORWARD_SUFFIX: &str = "_fwd";

/// Which nodes receive hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// The root and every leaf.
    #[default]
    LeavesOnly,
    /// Every node in the tree.
    AllNodes,
}

impl FromStr for Granularity {
    type Err = ProfilerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "leaves_only" | "leaves" => Ok(Self::LeavesOnly),
            "all_nodes" | "all" => Ok(Self::AllNodes),
            other => Err(ProfilerError::config(format!(
                "Invalid granularity '{}'. Valid options: leaves_only, all_nodes",
                other
            ))),
        }
    }
}

/// Hooks attached to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookBinding {
    /// Child indices leading from the root to the node. Empty for the root.
    pub path: Vec<usize>,
    /// Node identifier at registration time.
    pub identifier: String,
    /// Pre-invocation hook.
    pub pre: HookId,
    /// Post-invocation hook.
    pub post: HookId,
}

impl HookBinding {
    /// Event name pushed by the pre hook.
    pub fn event_name(&self) -> String {
        forward_event_name(&self.identifier)
    }

    /// Nesting depth of the node below the root.
    pub fn depth(&self) -> usize {
        self.path.len()
    }
}

/// Bindings created by one registration call, in attachment order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookRegistration {
    granularity: Granularity,
    bindings: Vec<HookBinding>,
}

impl HookRegistration {
    /// Policy used for this registration.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Created bindings.
    pub fn bindings(&self) -> &[HookBinding] {
        &self.bindings
    }

    /// Identifiers of the hooked nodes, in attachment order.
    pub fn identifiers(&self) -> Vec<&str> {
        self.bindings
            .iter()
            .map(|b| b.identifier.as_str())
            .collect()
    }

    /// Number of hooked nodes.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check if nothing was hooked.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Detach every hook this registration attached to the tree at `root`.
    ///
    /// Returns the number of hooks removed. Bindings whose node no longer
    /// exists at the recorded path are skipped.
    pub fn unregister(self, root: &mut dyn ModelNode) -> usize {
        let mut removed = 0;
        for binding in &self.bindings {
            match node_at(root, &binding.path) {
                Some(node) => {
                    removed += usize::from(node.remove_hook(binding.pre));
                    removed += usize::from(node.remove_hook(binding.post));
                }
                None => {
                    tracing::warn!(
                        identifier = %binding.identifier,
                        path = ?binding.path,
                        "Hooked node no longer present"
                    );
                }
            }
        }
        tracing::debug!(removed, "Unregistered profile hooks");
        removed
    }
}

fn node_at<'a>(root: &'a mut dyn ModelNode, path: &[usize]) -> Option<&'a mut dyn ModelNode> {
    match path.split_first() {
        None => Some(root),
        Some((&index, rest)) => {
            let child = root.children_mut().into_iter().nth(index)?;
            node_at(child, rest)
        }
    }
}

/// Build the event name for a node identifier.
pub fn forward_event_name(identifier: &str) -> String {
    format!("{}{}", identifier, FORWARD_SUFFIX)
}

/// Attaches profiling hooks to model trees.
#[derive(Debug, Clone)]
pub struct HookRegistrar {
    session: Arc<ProfilingSession>,
    granularity: Granularity,
}

impl HookRegistrar {
    /// Create a registrar emitting into `session`.
    pub fn new(session: Arc<ProfilingSession>, granularity: Granularity) -> Self {
        Self {
            session,
            granularity,
        }
    }

    /// Configured policy.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Hook the tree rooted at `root`.
    pub fn register(&self, root: &mut dyn ModelNode) -> HookRegistration {
        let mut bindings = Vec::new();
        let mut path = Vec::new();
        match self.granularity {
            Granularity::AllNodes => self.hook_all(root, &mut path, &mut bindings),
            Granularity::LeavesOnly => {
                // Root hooked directly, whether or not it has children.
                self.hook_node(root, &path, &mut bindings);
                for (index, child) in root.children_mut().into_iter().enumerate() {
                    path.push(index);
                    self.hook_leaves(child, &mut path, &mut bindings);
                    path.pop();
                }
            }
        }
        tracing::debug!(
            granularity = ?self.granularity,
            hooked = bindings.len(),
            root = root.identifier(),
            "Registered profile hooks"
        );
        HookRegistration {
            granularity: self.granularity,
            bindings,
        }
    }

    /// Hook every tree of a multi-model setup.
    pub fn register_all<'a, I>(&self, roots: I) -> Vec<HookRegistration>
    where
        I: IntoIterator<Item = &'a mut dyn ModelNode>,
    {
        roots.into_iter().map(|root| self.register(root)).collect()
    }

    fn hook_all(
        &self,
        node: &mut dyn ModelNode,
        path: &mut Vec<usize>,
        bindings: &mut Vec<HookBinding>,
    ) {
        for (index, child) in node.children_mut().into_iter().enumerate() {
            path.push(index);
            self.hook_all(child, path, bindings);
            path.pop();
        }
        self.hook_node(node, path, bindings);
    }

    fn hook_leaves(
        &self,
        node: &mut dyn ModelNode,
        path: &mut Vec<usize>,
        bindings: &mut Vec<HookBinding>,
    ) {
        if node.is_leaf() {
            self.hook_node(node, path, bindings);
            return;
        }
        for (index, child) in node.children_mut().into_iter().enumerate() {
            path.push(index);
            self.hook_leaves(child, path, bindings);
            path.pop();
        }
    }

    fn hook_node(&self, node: &mut dyn ModelNode, path: &[usize], bindings: &mut Vec<HookBinding>) {
        let identifier = node.identifier().to_string();
        let (pre_hook, post_hook) = self.hook_pair(&identifier);
        let pre = node.register_pre_hook(pre_hook);
        let post = node.register_post_hook(post_hook);
        tracing::debug!(identifier = %identifier, %pre, %post, "Attached profile hooks");
        bindings.push(HookBinding {
            path: path.to_vec(),
            identifier,
            pre,
            post,
        });
    }

    fn hook_pair(&self, identifier: &str) -> (ForwardHook, ForwardHook) {
        let event = forward_event_name(identifier);
        let pre_session = Arc::clone(&self.session);
        let post_session = Arc::clone(&self.session);
        let pre: ForwardHook = Arc::new(move || pre_session.push_event(&event));
        let post: ForwardHook = Arc::new(move || post_session.pop_event());
        (pre, post)
    }
}
