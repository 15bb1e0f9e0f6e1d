use uuid::Uuid;

pub fn audit_policy_created(resource_id: Uuid, policy_id: Uuid) {
    tracing::info!(
        target: "audit",
        event = "policy_created",
        resource_id = %resource_id,
        policy_id = %policy_id,
        "policy created"
    );
}

pub fn audit_policy_updated(resource_id: Uuid, policy_id: Uuid, version: i32) {
    tracing::info!(
        target: "audit",
        event = "policy_updated",
        resource_id = %resource_id,
        policy_id = %policy_id,
        version = version,
        "policy bindings replaced"
    );
}

pub fn audit_policy_deleted(resource_id: Uuid, policy_id: Uuid) {
    tracing::info!(
        target: "audit",
        event = "policy_deleted",
        resource_id = %resource_id,
        policy_id = %policy_id,
        "policy deleted"
    );
}

pub fn audit_binding_created(binding_id: Uuid, policy_id: Uuid, role_id: Uuid) {
    tracing::info!(
        target: "audit",
        event = "binding_created",
        binding_id = %binding_id,
        policy_id = %policy_id,
        role_id = %role_id,
        "binding created"
    );
}

pub fn audit_binding_deleted(binding_id: Uuid) {
    tracing::info!(
        target: "audit",
        event = "binding_deleted",
        binding_id = %binding_id,
        "binding deleted"
    );
}

pub fn audit_resource_deleted(resource_id: Uuid) {
    tracing::info!(
        target: "audit",
        event = "resource_deleted",
        resource_id = %resource_id,
        "resource deleted with its policy"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Debug)]
    struct CapturedEvent {
        target: String,
        fields: Vec<(String, String)>,
    }

    struct TestLayer {
        events: Arc<Mutex<Vec<CapturedEvent>>>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for TestLayer {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut fields = Vec::new();
            let mut visitor = FieldVisitor(&mut fields);
            event.record(&mut visitor);

            self.events.lock().unwrap().push(CapturedEvent {
                target: event.metadata().target().to_string(),
                fields,
            });
        }
    }

    struct FieldVisitor<'a>(&'a mut Vec<(String, String)>);

    impl tracing::field::Visit for FieldVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.0
                .push((field.name().to_string(), format!("{value:?}")));
        }

        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            self.0.push((field.name().to_string(), value.to_string()));
        }

        fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
            self.0.push((field.name().to_string(), value.to_string()));
        }
    }

    fn with_test_subscriber<F: FnOnce()>(f: F) -> Vec<CapturedEvent> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let layer = TestLayer {
            events: Arc::clone(&events),
        };
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
        Arc::try_unwrap(events).unwrap().into_inner().unwrap()
    }

    fn has_field(event: &CapturedEvent, key: &str, value: &str) -> bool {
        event.fields.iter().any(|(k, v)| k == key && v == value)
    }

    #[test]
    fn policy_updated_carries_version_and_ids() {
        let resource_id = Uuid::new_v4();
        let policy_id = Uuid::new_v4();
        let events = with_test_subscriber(|| {
            audit_policy_updated(resource_id, policy_id, 3);
        });

        assert_eq!(events.len(), 1);
        assert!(has_field(&events[0], "event", "policy_updated"));
        assert!(has_field(&events[0], "version", "3"));
        assert!(has_field(&events[0], "policy_id", &policy_id.to_string()));
    }

    #[test]
    fn audit_events_use_target_audit() {
        let id = Uuid::new_v4();
        let events = with_test_subscriber(|| {
            audit_policy_created(id, id);
            audit_policy_deleted(id, id);
            audit_binding_created(id, id, id);
            audit_binding_deleted(id);
            audit_resource_deleted(id);
        });

        assert_eq!(events.len(), 5);
        for event in &events {
            assert_eq!(event.target, "audit");
        }
    }
}
