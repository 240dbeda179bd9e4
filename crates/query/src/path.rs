//! Query paths.
//!
//! A `QueryPath` evaluates to a node-set and, once bound, reports raw
//! additions and removals of the nodes it reaches. `ChildPath` is the
//! reference implementation: a chain of child-axis steps with a raw tree
//! listener on every node the chain passes through.

use crate::context::Context;
use alloc::format;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use arbor_core::{Error, ListenerId, NodeId, NodeListener, Result};
use core::cell::RefCell;
use core::fmt;
use core::str::FromStr;
use hashbrown::HashMap;

/// Receives raw path notifications.
///
/// `nodes` are the result nodes gained or lost; `depth` is the index of the
/// path step at which the tree changed.
pub trait PathListener {
    /// Result nodes were added.
    fn notify_add(&self, ctx: &Context, nodes: &[NodeId], depth: usize);

    /// Result nodes were removed.
    fn notify_remove(&self, ctx: &Context, nodes: &[NodeId], depth: usize);
}

/// Query-path evaluator contract.
pub trait QueryPath {
    /// Evaluates the path from the context node.
    fn evaluate(&self, ctx: &Context) -> Result<Vec<NodeId>>;

    /// Starts reporting changes of the path result in `ctx` to `listener`.
    fn bind(&self, ctx: &Context, listener: Rc<dyn PathListener>) -> Result<()>;

    /// Stops reporting to `listener` in `ctx`.
    fn unbind(&self, ctx: &Context, listener: &Rc<dyn PathListener>) -> Result<()>;

    /// Returns the path text.
    fn describe(&self) -> String;
}

/// One child-axis step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Children with this name
    Name(String),
    /// All children (`*`)
    Any,
    /// The node itself (`.`)
    SelfNode,
}

impl Step {
    fn select(&self, tree: &dyn arbor_core::Tree, node: NodeId) -> Vec<NodeId> {
        match self {
            Step::SelfNode => vec![node],
            Step::Any => tree.children(node),
            Step::Name(name) => tree
                .children(node)
                .into_iter()
                .filter(|c| tree.name(*c).as_deref() == Some(name.as_str()))
                .collect(),
        }
    }

    fn matches(&self, tree: &dyn arbor_core::Tree, child: NodeId) -> bool {
        match self {
            Step::SelfNode => false,
            Step::Any => true,
            Step::Name(name) => tree.name(child).as_deref() == Some(name.as_str()),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Name(name) => write!(f, "{}", name),
            Step::Any => write!(f, "*"),
            Step::SelfNode => write!(f, "."),
        }
    }
}

/// A path of child-axis steps, e.g. `order/item`.
pub struct ChildPath {
    steps: Rc<[Step]>,
    bindings: RefCell<Vec<Rc<Binding>>>,
}

impl ChildPath {
    /// Creates a path from its steps.
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            bindings: RefCell::new(Vec::new()),
        }
    }

    /// Returns the steps.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Returns the number of live bindings.
    pub fn binding_count(&self) -> usize {
        self.bindings.borrow().len()
    }
}

impl FromStr for ChildPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let steps = s
            .split('/')
            .map(|part| match part.trim() {
                "" => Err(Error::arity(format!("empty step in path '{}'", s))),
                "*" => Ok(Step::Any),
                "." => Ok(Step::SelfNode),
                name => Ok(Step::Name(name.into())),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(steps))
    }
}

impl fmt::Debug for ChildPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildPath")
            .field("path", &self.describe())
            .field("bindings", &self.binding_count())
            .finish()
    }
}

impl QueryPath for ChildPath {
    fn evaluate(&self, ctx: &Context) -> Result<Vec<NodeId>> {
        Ok(reach(ctx.tree(), &self.steps, ctx.node(), 0))
    }

    fn bind(&self, ctx: &Context, listener: Rc<dyn PathListener>) -> Result<()> {
        let binding = Rc::new(Binding {
            ctx: ctx.clone(),
            listener,
            steps: self.steps.clone(),
            installed: RefCell::new(HashMap::new()),
        });
        Binding::install(&binding, ctx.node(), 0);
        log::debug!(
            "bound path {} at {} ({} listeners)",
            self.describe(),
            ctx.node(),
            binding.installed.borrow().len()
        );
        self.bindings.borrow_mut().push(binding);
        Ok(())
    }

    fn unbind(&self, ctx: &Context, listener: &Rc<dyn PathListener>) -> Result<()> {
        let binding = {
            let mut bindings = self.bindings.borrow_mut();
            let index = bindings
                .iter()
                .position(|b| b.ctx == *ctx && same_listener(&b.listener, listener))
                .ok_or_else(|| Error::unbound(self.describe()))?;
            bindings.remove(index)
        };
        binding.uninstall_all();
        log::debug!("unbound path {} at {}", self.describe(), ctx.node());
        Ok(())
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.steps.iter().map(|s| format!("{}", s)).collect();
        parts.join("/")
    }
}

fn same_listener(a: &Rc<dyn PathListener>, b: &Rc<dyn PathListener>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

/// Nodes reached from `node` by the steps starting at `depth`.
fn reach(tree: &dyn arbor_core::Tree, steps: &[Step], node: NodeId, depth: usize) -> Vec<NodeId> {
    let mut current = vec![node];
    for step in &steps[depth..] {
        current = current.into_iter().flat_map(|n| step.select(tree, n)).collect();
    }
    current
}

/// Live state of one `bind` call.
struct Binding {
    ctx: Context,
    listener: Rc<dyn PathListener>,
    steps: Rc<[Step]>,
    installed: RefCell<HashMap<(NodeId, usize), ListenerId>>,
}

impl Binding {
    /// Installs step listeners on `node` (at `depth`) and below.
    fn install(this: &Rc<Self>, node: NodeId, depth: usize) {
        if depth == this.steps.len() {
            return;
        }
        let tree = this.ctx.tree();
        let installed = this.installed.borrow().contains_key(&(node, depth));
        if this.steps[depth] != Step::SelfNode && !installed {
            let listener = Rc::new(StepListener {
                binding: Rc::downgrade(this),
                depth,
            });
            let id = tree.add_listener(node, listener);
            this.installed.borrow_mut().insert((node, depth), id);
        }
        for next in this.steps[depth].select(tree, node) {
            Self::install(this, next, depth + 1);
        }
    }

    /// Removes step listeners on `node` (at `depth`) and below.
    fn uninstall(&self, node: NodeId, depth: usize) {
        if depth == self.steps.len() {
            return;
        }
        let tree = self.ctx.tree();
        if let Some(id) = self.installed.borrow_mut().remove(&(node, depth)) {
            tree.remove_listener(node, id);
        }
        for next in self.steps[depth].select(tree, node) {
            self.uninstall(next, depth + 1);
        }
    }

    fn uninstall_all(&self) {
        let tree = self.ctx.tree();
        for ((node, _), id) in self.installed.borrow_mut().drain() {
            tree.remove_listener(node, id);
        }
    }
}

/// Raw listener on a node at one depth of a bound path.
struct StepListener {
    binding: Weak<Binding>,
    depth: usize,
}

impl NodeListener for StepListener {
    fn notify_add_child(&self, _parent: NodeId, child: NodeId, _index: usize) {
        let Some(binding) = self.binding.upgrade() else {
            return;
        };
        let tree = binding.ctx.tree();
        if !binding.steps[self.depth].matches(tree, child) {
            return;
        }
        Binding::install(&binding, child, self.depth + 1);
        let added = reach(tree, &binding.steps, child, self.depth + 1);
        if !added.is_empty() {
            log::trace!("path step {} gained {} nodes", self.depth, added.len());
            binding.listener.notify_add(&binding.ctx, &added, self.depth);
        }
    }

    fn notify_remove_child(&self, _parent: NodeId, child: NodeId, _index: usize) {
        let Some(binding) = self.binding.upgrade() else {
            return;
        };
        let tree = binding.ctx.tree();
        if !binding.steps[self.depth].matches(tree, child) {
            return;
        }
        // the detached subtree is still readable
        let removed = reach(tree, &binding.steps, child, self.depth + 1);
        binding.uninstall(child, self.depth + 1);
        if !removed.is_empty() {
            log::trace!("path step {} lost {} nodes", self.depth, removed.len());
            binding.listener.notify_remove(&binding.ctx, &removed, self.depth);
        }
    }
}
