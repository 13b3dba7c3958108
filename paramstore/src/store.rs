//! The parameter state store: the single source of truth for the current
//! query-building parameters of a session.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use log::{debug, warn};

use crate::location::{parse_location, parse_structured};
use crate::tags::TAGS_PARAM;
use crate::{
    DependencyTable, Error, FieldDependency, LocationDescriptor, ParamDelta, ParameterSet,
    QueryTemplate,
};

type Handler = Rc<RefCell<dyn FnMut(&ParameterSet)>>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
}

impl Subscribers {
    fn contains(&self, id: u64) -> bool {
        self.handlers.iter().any(|(i, _)| *i == id)
    }
}

/// Handle to a registered change handler. Dropping the handle does not
/// unsubscribe; call [`Subscription::unsubscribe`] for that.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    subscribers: Weak<RefCell<Subscribers>>,
}

impl Subscription {
    /// Removes the handler from the store. Safe to call more than once, and
    /// after the store itself has been dropped.
    pub fn unsubscribe(&self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers
                .borrow_mut()
                .handlers
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// Owns the current [`ParameterSet`] and keeps it in sync with its
/// [`LocationDescriptor`].
///
/// The store is meant to be constructed once per session and handed to the
/// components that depend on it. All operations run to completion
/// synchronously, so it is deliberately neither `Send` nor `Sync`. Handlers
/// must not attempt to mutate the store they are subscribed to.
pub struct ParamStateStore {
    params: ParameterSet,
    location: LocationDescriptor,
    // Keys whose values must be valid JSON.
    structured_keys: BTreeSet<String>,
    subscribers: Rc<RefCell<Subscribers>>,
}

impl Default for ParamStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ParamStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamStateStore")
            .field("params", &self.params)
            .field("location", &self.location)
            .field("structured_keys", &self.structured_keys)
            .field("subscribers", &self.subscribers.borrow().handlers.len())
            .finish()
    }
}

impl ParamStateStore {
    /// Constructs an empty store in which only the `tags` parameter is
    /// structured.
    pub fn new() -> Self {
        Self::with_structured_keys([TAGS_PARAM])
    }

    /// Constructs an empty store with the given structured (JSON-valued)
    /// parameter keys.
    pub fn with_structured_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            params: ParameterSet::new(),
            location: LocationDescriptor::default(),
            structured_keys: keys.into_iter().map(|k| k.as_ref().to_string()).collect(),
            subscribers: Rc::new(RefCell::new(Subscribers::default())),
        }
    }

    /// Returns a snapshot of the current parameters.
    pub fn params(&self) -> ParameterSet {
        self.params.clone()
    }

    /// The location descriptor for the current parameters.
    pub fn location(&self) -> &LocationDescriptor {
        &self.location
    }

    pub fn structured_keys(&self) -> &BTreeSet<String> {
        &self.structured_keys
    }

    /// Merges the given delta into the current parameters, applies the clear
    /// set of the given policy, updates the location descriptor and notifies
    /// all subscribers.
    ///
    /// If a key is both set by the delta and cleared by the policy, it ends
    /// up absent. A structured value that is not valid JSON is ignored, and
    /// the key retains its previous value.
    pub fn change_params(&mut self, delta: ParamDelta, policy: &FieldDependency) {
        for (key, value) in delta.iter() {
            match value {
                Some(v) => {
                    if self.structured_keys.contains(key) && !v.is_empty() {
                        if let Err(e) = parse_structured(key, v) {
                            warn!("Ignoring change to parameter \"{}\": {}", key, e);
                            continue;
                        }
                    }
                    self.params.insert(key, v);
                }
                None => {
                    self.params.remove(key);
                }
            }
        }
        for key in policy.clear.iter() {
            if self.params.remove(key).is_some() {
                debug!("Cleared parameter \"{}\"", key);
            }
        }
        self.location = LocationDescriptor::from_params(&self.params);
        debug!("Parameters changed, location is now: {}", self.location);
        self.notify();
    }

    /// Sets (or, given `None`, removes) the value of a field declared in the
    /// given dependency table, applying the field's resolved policy.
    pub fn change_field<F: AsRef<str>>(
        &mut self,
        table: &DependencyTable,
        field: F,
        value: Option<&str>,
    ) {
        let field = field.as_ref();
        let delta = match value {
            Some(v) => ParamDelta::new().set(field, v),
            None => ParamDelta::new().unset(field),
        };
        let policy = table.policy(field);
        self.change_params(delta, &policy);
    }

    /// Registers a handler to be called with the new parameters after every
    /// change, in registration order.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(&ParameterSet) + 'static,
    {
        let mut subscribers = self.subscribers.borrow_mut();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        let handler: Handler = Rc::new(RefCell::new(handler));
        subscribers.handlers.push((id, handler));
        Subscription {
            id,
            subscribers: Rc::downgrade(&self.subscribers),
        }
    }

    /// Binds the given template against the current parameters.
    pub fn bind_query(&self, template: &QueryTemplate) -> String {
        template.bind(&self.params)
    }

    /// Replaces the current parameters wholesale with those parsed from the
    /// given location descriptor, then notifies all subscribers.
    ///
    /// Malformed entries are dropped and logged. They are returned so that
    /// callers can report them, but never cause this operation to fail.
    pub fn load_from_location(&mut self, descriptor: &str) -> Vec<Error> {
        let parsed = parse_location(descriptor, &self.structured_keys);
        self.params = parsed.params;
        self.location = LocationDescriptor::from_params(&self.params);
        debug!("Loaded parameters from location: {}", self.location);
        self.notify();
        parsed.rejected
    }

    fn notify(&self) {
        // Handlers are cloned out so that they are free to unsubscribe
        // themselves (or each other) while being notified.
        let handlers = self
            .subscribers
            .borrow()
            .handlers
            .iter()
            .map(|(id, h)| (*id, Rc::clone(h)))
            .collect::<Vec<(u64, Handler)>>();
        for (id, handler) in handlers {
            if !self.subscribers.borrow().contains(id) {
                continue;
            }
            let mut handler = handler.borrow_mut();
            (*handler)(&self.params);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn explore_store() -> ParamStateStore {
        let mut store = ParamStateStore::new();
        let _ = store.load_from_location("db=old&namespace=ns1&metric=m1");
        store
    }

    #[test]
    fn clear_policy_removes_downstream_params() {
        let mut store = explore_store();
        let policy = FieldDependency::noop().clearing(["namespace", "metric"]);
        store.change_params(ParamDelta::new().set("db", "new"), &policy);
        assert_eq!(store.params(), ParameterSet::new().with("db", "new"));
        assert_eq!(store.location().as_str(), "db=new");
    }

    #[test]
    fn clear_wins_over_delta() {
        let mut store = explore_store();
        let policy = FieldDependency::noop().clearing(["metric"]);
        store.change_params(
            ParamDelta::new().set("metric", "m2").set("show", "true"),
            &policy,
        );
        assert!(!store.params().contains_key("metric"));
        assert_eq!(store.params().get("show"), Some("true"));
    }

    #[test]
    fn delta_unset_removes_key() {
        let mut store = explore_store();
        store.change_params(ParamDelta::new().unset("namespace"), &FieldDependency::noop());
        assert_eq!(
            store.params(),
            ParameterSet::new().with("db", "old").with("metric", "m1")
        );
    }

    #[test]
    fn empty_values_are_kept_but_not_serialized() {
        let mut store = ParamStateStore::new();
        store.change_params(
            ParamDelta::new().set("db", "x").set("metric", ""),
            &FieldDependency::noop(),
        );
        assert_eq!(store.params().get("metric"), Some(""));
        assert_eq!(store.location().as_str(), "db=x");
    }

    #[test]
    fn invalid_structured_change_keeps_previous_value() {
        let mut store = ParamStateStore::new();
        let _ = store.load_from_location("tags=%7B%22host%22%3A%5B%22a%22%5D%7D");
        store.change_params(ParamDelta::new().set("tags", "{oops"), &FieldDependency::noop());
        assert_eq!(store.params().get("tags"), Some(r#"{"host":["a"]}"#));
    }

    #[test]
    fn subscribers_are_notified_in_order_exactly_once() {
        let mut store = ParamStateStore::new();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let a_calls = Rc::clone(&calls);
        let _a = store.subscribe(move |_| a_calls.borrow_mut().push("a"));
        let b_calls = Rc::clone(&calls);
        let _b = store.subscribe(move |p| {
            assert_eq!(p.get("db"), Some("x"));
            b_calls.borrow_mut().push("b")
        });
        store.change_params(ParamDelta::new().set("db", "x"), &FieldDependency::noop());
        assert_eq!(*calls.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let mut store = ParamStateStore::new();
        let count = Rc::new(RefCell::new(0));
        let c = Rc::clone(&count);
        let sub = store.subscribe(move |_| *c.borrow_mut() += 1);
        store.change_params(ParamDelta::new(), &FieldDependency::noop());
        sub.unsubscribe();
        sub.unsubscribe();
        store.change_params(ParamDelta::new(), &FieldDependency::noop());
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn handler_may_unsubscribe_a_later_handler() {
        let mut store = ParamStateStore::new();
        let later: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let later_ref = Rc::clone(&later);
        let _first = store.subscribe(move |_| {
            if let Some(sub) = later_ref.borrow().as_ref() {
                sub.unsubscribe();
            }
        });
        let called = Rc::new(RefCell::new(false));
        let c = Rc::clone(&called);
        *later.borrow_mut() = Some(store.subscribe(move |_| *c.borrow_mut() = true));
        store.change_params(ParamDelta::new(), &FieldDependency::noop());
        assert!(!*called.borrow());
    }

    #[test]
    fn corrupt_location_is_recovered() {
        let mut store = ParamStateStore::new();
        let rejected = store.load_from_location("tags=not-json");
        assert!(!store.params().contains_key("tags"));
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn load_replaces_params_wholesale() {
        let mut store = explore_store();
        let _ = store.load_from_location("?db=other");
        assert_eq!(store.params(), ParameterSet::new().with("db", "other"));
    }

    #[test]
    fn bind_query_reads_current_params() {
        let mut store = explore_store();
        let tpl = QueryTemplate::from("show fields from '${metric}'");
        assert_eq!(store.bind_query(&tpl), "show fields from 'm1'");
        store.change_params(ParamDelta::new().unset("metric"), &FieldDependency::noop());
        assert_eq!(store.bind_query(&tpl), "show fields from ''");
    }
}
