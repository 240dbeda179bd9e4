//! Listener fan-out.
//!
//! A `FanOutListener` keeps an ordered listener set per context and
//! dispatches over a snapshot of it, so a listener may add or remove peers
//! while being notified. A failing listener gets the error through its own
//! `handle_fault`; the remaining listeners are still notified.

use crate::listener::{ExpressionListener, Notification};
use alloc::rc::Rc;
use alloc::string::ToString;
use alloc::vec::Vec;
use arbor_core::{Error, NodeId, Result};
use arbor_query::{Context, ExprId};
use core::cell::{Cell, RefCell};
use core::fmt;

type Listeners = Vec<Rc<dyn ExpressionListener>>;

/// Multiplexes notifications to the listeners registered per context.
#[derive(Default)]
pub struct FanOutListener {
    entries: RefCell<Vec<(Context, Listeners)>>,
    /// Cached OR of `requires_value_notification`, reset on membership change
    requires_value: Cell<Option<bool>>,
}

impl FanOutListener {
    /// Creates an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `ctx`. Returns false if it was already registered.
    pub fn add(&self, ctx: &Context, listener: Rc<dyn ExpressionListener>) -> bool {
        let mut entries = self.entries.borrow_mut();
        let index = match entries.iter().position(|(c, _)| c.ptr_eq(ctx) || c == ctx) {
            Some(index) => index,
            None => {
                entries.push((ctx.clone(), Vec::new()));
                entries.len() - 1
            }
        };
        let listeners = &mut entries[index].1;
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        self.requires_value.set(None);
        true
    }

    /// Unregisters `listener` for `ctx`. Returns false if it was not registered.
    pub fn remove(&self, ctx: &Context, listener: &Rc<dyn ExpressionListener>) -> bool {
        let mut entries = self.entries.borrow_mut();
        let Some(index) = entries.iter().position(|(c, _)| c.ptr_eq(ctx) || c == ctx) else {
            return false;
        };
        let listeners = &mut entries[index].1;
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        let removed = listeners.len() < before;
        if listeners.is_empty() {
            entries.remove(index);
        }
        if removed {
            self.requires_value.set(None);
        }
        removed
    }

    /// Returns a snapshot of the listeners registered for `ctx`.
    pub fn listeners(&self, ctx: &Context) -> Vec<Rc<dyn ExpressionListener>> {
        self.entries
            .borrow()
            .iter()
            .find(|(c, _)| c.ptr_eq(ctx) || c == ctx)
            .map(|(_, l)| l.clone())
            .unwrap_or_default()
    }

    /// Returns the total number of registrations.
    pub fn len(&self) -> usize {
        self.entries.borrow().iter().map(|(_, l)| l.len()).sum()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Delivers `notification` to every listener registered for `ctx`.
    ///
    /// Leaf value notifications only reach listeners that asked for them.
    pub fn dispatch(&self, expr: ExprId, ctx: &Context, notification: &Notification) {
        for listener in self.listeners(ctx) {
            if notification.is_value() && !listener.requires_value_notification() {
                continue;
            }
            if let Err(e) = notification.deliver(&*listener, expr, ctx) {
                listener.handle_fault(expr, ctx, &e);
            }
        }
    }

    /// Hands `error` to every listener registered for `ctx`.
    pub fn fault(&self, expr: ExprId, ctx: &Context, error: &Error) {
        for listener in self.listeners(ctx) {
            listener.handle_fault(expr, ctx, error);
        }
    }
}

fn same_listener(a: &Rc<dyn ExpressionListener>, b: &Rc<dyn ExpressionListener>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

impl ExpressionListener for FanOutListener {
    fn notify_insert(
        &self,
        expr: ExprId,
        ctx: &Context,
        nodes: &[NodeId],
        start: usize,
        count: usize,
    ) -> Result<()> {
        self.dispatch(
            expr,
            ctx,
            &Notification::Insert {
                nodes: nodes.to_vec(),
                start,
                count,
            },
        );
        Ok(())
    }

    fn notify_remove(
        &self,
        expr: ExprId,
        ctx: &Context,
        nodes: &[NodeId],
        start: usize,
        count: usize,
    ) -> Result<()> {
        self.dispatch(
            expr,
            ctx,
            &Notification::Remove {
                nodes: nodes.to_vec(),
                start,
                count,
            },
        );
        Ok(())
    }

    fn notify_change_boolean(&self, expr: ExprId, ctx: &Context, new: bool) -> Result<()> {
        self.dispatch(expr, ctx, &Notification::Boolean(new));
        Ok(())
    }

    fn notify_change_number(&self, expr: ExprId, ctx: &Context, new: f64, old: f64) -> Result<()> {
        self.dispatch(expr, ctx, &Notification::Number { new, old });
        Ok(())
    }

    fn notify_change_string(
        &self,
        expr: ExprId,
        ctx: &Context,
        new: &str,
        old: &str,
    ) -> Result<()> {
        self.dispatch(
            expr,
            ctx,
            &Notification::String {
                new: new.to_string(),
                old: old.to_string(),
            },
        );
        Ok(())
    }

    fn notify_change(&self, expr: ExprId, ctx: &Context) -> Result<()> {
        self.dispatch(expr, ctx, &Notification::Opaque);
        Ok(())
    }

    fn notify_value(
        &self,
        expr: ExprId,
        contexts: &[Context],
        node: NodeId,
        new: Option<&str>,
        old: Option<&str>,
    ) -> Result<()> {
        let notification = Notification::Value {
            contexts: contexts.to_vec(),
            node,
            new: new.map(|s| s.to_string()),
            old: old.map(|s| s.to_string()),
        };
        for ctx in contexts {
            self.dispatch(expr, ctx, &notification);
        }
        Ok(())
    }

    fn requires_value_notification(&self) -> bool {
        if let Some(cached) = self.requires_value.get() {
            return cached;
        }
        let any = self
            .entries
            .borrow()
            .iter()
            .flat_map(|(_, l)| l.iter())
            .any(|l| l.requires_value_notification());
        self.requires_value.set(Some(any));
        any
    }

    fn handle_fault(&self, expr: ExprId, ctx: &Context, error: &Error) {
        self.fault(expr, ctx, error);
    }
}

impl fmt::Debug for FanOutListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutListener")
            .field("contexts", &self.entries.borrow().len())
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use arbor_core::Tree;
    use arbor_storage::MemoryTree;

    #[derive(Default)]
    struct Probe {
        fail: bool,
        wants_values: bool,
        changes: Cell<usize>,
        values: Cell<usize>,
        faults: RefCell<Vec<Error>>,
    }

    impl ExpressionListener for Probe {
        fn notify_change(&self, _expr: ExprId, _ctx: &Context) -> Result<()> {
            self.changes.set(self.changes.get() + 1);
            if self.fail {
                return Err(Error::fault("probe failure"));
            }
            Ok(())
        }

        fn notify_value(
            &self,
            _expr: ExprId,
            _contexts: &[Context],
            _node: NodeId,
            _new: Option<&str>,
            _old: Option<&str>,
        ) -> Result<()> {
            self.values.set(self.values.get() + 1);
            Ok(())
        }

        fn requires_value_notification(&self) -> bool {
            self.wants_values
        }

        fn handle_fault(&self, _expr: ExprId, _ctx: &Context, error: &Error) {
            self.faults.borrow_mut().push(error.clone());
        }
    }

    fn context() -> Context {
        let tree = MemoryTree::new("root");
        Context::root(tree.handle(), tree.root())
    }

    #[test]
    fn test_failing_listener_is_isolated() {
        let ctx = context();
        let fan = FanOutListener::new();
        let probes = [
            Rc::new(Probe::default()),
            Rc::new(Probe {
                fail: true,
                ..Probe::default()
            }),
            Rc::new(Probe::default()),
        ];
        for probe in &probes {
            assert!(fan.add(&ctx, probe.clone()));
        }

        fan.dispatch(ExprId(0), &ctx, &Notification::Opaque);

        assert!(probes.iter().all(|p| p.changes.get() == 1));
        assert!(probes[0].faults.borrow().is_empty());
        assert_eq!(*probes[1].faults.borrow(), vec![Error::fault("probe failure")]);
        assert!(probes[2].faults.borrow().is_empty());
    }

    #[test]
    fn test_add_is_idempotent() {
        let ctx = context();
        let fan = FanOutListener::new();
        let probe: Rc<dyn ExpressionListener> = Rc::new(Probe::default());

        assert!(fan.add(&ctx, probe.clone()));
        assert!(!fan.add(&ctx, probe.clone()));
        assert_eq!(fan.len(), 1);

        assert!(fan.remove(&ctx, &probe));
        assert!(!fan.remove(&ctx, &probe));
        assert!(fan.is_empty());
    }

    #[test]
    fn test_requires_value_notification_is_recomputed() {
        let ctx = context();
        let fan = FanOutListener::new();
        let plain: Rc<dyn ExpressionListener> = Rc::new(Probe::default());
        let wants = Rc::new(Probe {
            wants_values: true,
            ..Probe::default()
        });
        let wants_dyn: Rc<dyn ExpressionListener> = wants.clone();

        fan.add(&ctx, plain.clone());
        assert!(!fan.requires_value_notification());
        fan.add(&ctx, wants_dyn.clone());
        assert!(fan.requires_value_notification());

        fan.notify_value(ExprId(0), &[ctx.clone()], NodeId(1), Some("5"), Some("2"))
            .unwrap();
        assert_eq!(wants.values.get(), 1);

        fan.remove(&ctx, &wants_dyn);
        assert!(!fan.requires_value_notification());
    }

    struct Remover {
        fan: Rc<FanOutListener>,
        victim: Rc<dyn ExpressionListener>,
    }

    impl ExpressionListener for Remover {
        fn notify_change(&self, _expr: ExprId, ctx: &Context) -> Result<()> {
            self.fan.remove(ctx, &self.victim);
            Ok(())
        }
    }

    #[test]
    fn test_peer_removed_during_dispatch_still_notified() {
        let ctx = context();
        let fan = Rc::new(FanOutListener::new());
        let victim = Rc::new(Probe::default());
        let victim_dyn: Rc<dyn ExpressionListener> = victim.clone();
        fan.add(
            &ctx,
            Rc::new(Remover {
                fan: fan.clone(),
                victim: victim_dyn.clone(),
            }),
        );
        fan.add(&ctx, victim_dyn);

        fan.dispatch(ExprId(0), &ctx, &Notification::Opaque);
        assert_eq!(victim.changes.get(), 1);
        assert_eq!(fan.len(), 1);

        fan.dispatch(ExprId(0), &ctx, &Notification::Opaque);
        assert_eq!(victim.changes.get(), 1);
    }
}
