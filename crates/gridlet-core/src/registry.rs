//! Event type to subscription routing table.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::models::{Service, Subscription};

/// Read-only mapping from event type to the subscriptions interested in it.
///
/// Built once from configuration. Subscriptions for a type keep
/// configuration order, and a type listed twice on one endpoint yields two
/// entries. Lookups are exact and case-sensitive.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    routes: HashMap<String, Vec<Arc<Subscription>>>,
    /// Event types in first-seen order, for stable rendering.
    order: Vec<String>,
}

impl SubscriptionRegistry {
    /// Builds the routing table from configured services.
    pub fn build(services: &[Service]) -> Self {
        let mut registry = Self::default();

        for service in services {
            for endpoint in service.endpoints() {
                let subscription = Arc::new(Subscription::new(service, endpoint));
                for event_type in endpoint.event_types() {
                    registry.insert(event_type, Arc::clone(&subscription));
                }
            }
        }

        registry
    }

    fn insert(&mut self, event_type: &str, subscription: Arc<Subscription>) {
        match self.routes.get_mut(event_type) {
            Some(subscriptions) => subscriptions.push(subscription),
            None => {
                self.order.push(event_type.to_string());
                self.routes.insert(event_type.to_string(), vec![subscription]);
            },
        }
    }

    /// Returns the subscriptions for an event type, or `None` if nothing
    /// subscribes to it.
    pub fn subscriptions_for(&self, event_type: &str) -> Option<&[Arc<Subscription>]> {
        self.routes.get(event_type).map(Vec::as_slice)
    }

    /// Returns every routed event type in first-seen order.
    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Returns the number of distinct event types.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if no event type is routed anywhere.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl fmt::Display for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(no subscriptions)");
        }

        for (index, event_type) in self.order.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{event_type}")?;
            for subscription in self.routes.get(event_type).into_iter().flatten() {
                write!(f, "\n  -> {subscription}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Endpoint, Receiver};

    fn services() -> Vec<Service> {
        vec![
            Service::new(
                "http://a",
                vec![Endpoint::path("/h", ["Foo", "Bar"]).unwrap()],
            )
            .unwrap(),
            Service::new("http://b", vec![Endpoint::function("F", ["Foo"]).unwrap()]).unwrap(),
        ]
    }

    #[test]
    fn groups_by_event_type_in_configuration_order() {
        let registry = SubscriptionRegistry::build(&services());

        let foo = registry.subscriptions_for("Foo").unwrap();
        assert_eq!(foo.len(), 2);
        assert_eq!(foo[0].receiver(), &Receiver::Path("/h".into()));
        assert_eq!(foo[1].receiver(), &Receiver::Function("F".into()));

        assert_eq!(registry.subscriptions_for("Bar").unwrap().len(), 1);
        assert_eq!(registry.event_types().collect::<Vec<_>>(), vec!["Foo", "Bar"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unknown_and_differently_cased_types_have_no_subscribers() {
        let registry = SubscriptionRegistry::build(&services());

        assert!(registry.subscriptions_for("Baz").is_none());
        assert!(registry.subscriptions_for("foo").is_none());
    }

    #[test]
    fn repeated_event_type_yields_repeated_subscription() {
        let service =
            Service::new("http://a", vec![Endpoint::path("/h", ["Foo", "Foo"]).unwrap()]).unwrap();

        let registry = SubscriptionRegistry::build(&[service]);

        assert_eq!(registry.subscriptions_for("Foo").unwrap().len(), 2);
    }

    #[test]
    fn empty_configuration_builds_empty_registry() {
        let registry = SubscriptionRegistry::build(&[]);

        assert!(registry.is_empty());
        assert_eq!(registry.to_string(), "(no subscriptions)");
    }

    #[test]
    fn display_lists_every_route() {
        let rendered = SubscriptionRegistry::build(&services()).to_string();

        assert_eq!(
            rendered,
            "Foo\n  -> http://a/h\n  -> http://b/EventGridFunc:F\nBar\n  -> http://a/h"
        );
    }
}
