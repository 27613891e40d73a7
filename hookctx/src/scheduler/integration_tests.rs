//! End-to-end tests: rules driven through the scheduler against nested nodes.

#[cfg(test)]
mod tests {
    use crate::codec::PropagationCodec;
    use crate::context::{ContextNode, ContextValue, KeyPolicy, PropagationPolicy};
    use crate::events::{CollectingEventSink, MockEventSink};
    use crate::resolver::{ActionCallDescriptor, GuardCondition};
    use crate::scheduler::{ActionCall, HookPhase, MethodFrame, Rule, Scheduler};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn policy() -> Arc<PropagationPolicy> {
        Arc::new(
            PropagationPolicy::new()
                .with_key("service", KeyPolicy::new().down().taggable())
                .with_key("sampled", KeyPolicy::new().down())
                .with_key("db.calls", KeyPolicy::new().down().up())
                .with_key("user", KeyPolicy::new().down().up().taggable()),
        )
    }

    fn scheduler() -> (Scheduler, Arc<CollectingEventSink>) {
        let sink = Arc::new(CollectingEventSink::new());
        let scheduler = Scheduler::new(policy()).with_event_sink(sink.clone());
        (scheduler, sink)
    }

    /// An HTTP server rule: resolves the user and decides sampling on entry,
    /// summarises nested database calls on exit.
    fn server_rule() -> Rule {
        Rule::new("http.server")
            .with_entry(ActionCall::from_fn(
                ActionCallDescriptor::new("sample")
                    .with_reads(["user"])
                    .with_writes(["sampled"]),
                |ctx| {
                    let user = ctx.get("user");
                    ctx.set("sampled", user.is_some());
                    Ok(())
                },
            ))
            .with_entry(ActionCall::from_fn(
                ActionCallDescriptor::new("user")
                    .with_reads(["user"])
                    .with_reads_before_written(["user"])
                    .with_writes(["user"]),
                |ctx| {
                    if ctx.get("user").is_none() {
                        if let Some(arg) = ctx.frame().arg(0) {
                            ctx.set("user", arg.clone());
                        }
                    }
                    Ok(())
                },
            ))
            .with_exit(ActionCall::from_fn(
                ActionCallDescriptor::new("report")
                    .with_reads(["db.calls"])
                    .with_guard(GuardCondition::OnlyIfTrue("sampled".into())),
                |ctx| {
                    let calls = ctx.get("db.calls").and_then(|v| v.as_i64()).unwrap_or(0);
                    ctx.set("report", format!("db_calls={calls}"));
                    Ok(())
                },
            ))
    }

    fn db_rule(counter: Arc<AtomicUsize>) -> Rule {
        Rule::new("db.query").with_exit(ActionCall::from_fn(
            ActionCallDescriptor::new("count")
                .with_reads(["db.calls"])
                .with_writes(["db.calls"])
                .with_guard(GuardCondition::OnlyIfTrue("sampled".into())),
            move |ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                let calls = ctx.get("db.calls").and_then(|v| v.as_i64()).unwrap_or(0);
                ctx.set("db.calls", calls + 1);
                Ok(())
            },
        ))
    }

    #[test]
    fn test_request_flow_with_nested_invocations() {
        let (scheduler, sink) = scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.register_rule(server_rule()).unwrap();
        scheduler.register_rule(db_rule(counter.clone())).unwrap();
        assert_eq!(
            scheduler.plan_names("http.server", HookPhase::Entry),
            Some(vec!["user".to_string(), "sample".to_string()])
        );

        let codec = PropagationCodec::default();
        let mut inbound = HashMap::new();
        inbound.insert("Correlation-Context".to_string(), "service=checkout".to_string());
        let root = ContextNode::root(policy());
        codec.read_from_headers(&inbound, &root);
        root.activate().unwrap();

        let frame = MethodFrame::new().with_arg("alice");
        let mut server = scheduler.open(None, "http.server").unwrap();
        server.activate().unwrap();
        server.run_entry(&frame).unwrap();
        assert_eq!(server.node().get_data("service"), Some("checkout".into()));
        assert_eq!(server.node().get_data("user"), Some("alice".into()));

        for _ in 0..3 {
            let mut query = scheduler.open(None, "db.query").unwrap();
            query.activate().unwrap();
            assert!(query.node().parent().unwrap().ptr_eq(server.node()));
            query.run_entry(&MethodFrame::new()).unwrap();
            query.run_exit(&MethodFrame::new()).unwrap();
            query.close().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(server.node().get_data("db.calls"), Some(ContextValue::Long(3)));

        let outbound = codec.write_to_headers(server.node());
        assert_eq!(
            outbound.get("Correlation-Context"),
            Some(&"service=checkout,user=alice".to_string())
        );

        server.run_exit(&frame.clone().with_return_value(200)).unwrap();
        assert_eq!(server.node().get_data("report"), Some("db_calls=3".into()));
        server.close().unwrap();

        // `user` is up-propagating; `sampled` and `report` are not.
        assert_eq!(root.get_data("user"), Some("alice".into()));
        assert_eq!(root.get_data("sampled"), None);
        assert_eq!(root.get_data("report"), None);
        assert_eq!(root.get_data("db.calls"), Some(ContextValue::Long(3)));
        root.close().unwrap();

        assert!(ContextNode::current().is_none());
        assert_eq!(sink.events_of_type("rule.compiled").len(), 2);
        assert!(sink.events_of_type("action.").is_empty());
    }

    #[test]
    fn test_unsampled_request_skips_guarded_actions() {
        let (scheduler, _sink) = scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.register_rule(server_rule()).unwrap();
        scheduler.register_rule(db_rule(counter.clone())).unwrap();

        let mut server = scheduler.open(None, "http.server").unwrap();
        server.activate().unwrap();
        server.run_entry(&MethodFrame::new()).unwrap();
        assert_eq!(server.node().get_data("sampled"), Some(false.into()));

        let mut query = scheduler.open(None, "db.query").unwrap();
        query.activate().unwrap();
        let report = query.run_exit(&MethodFrame::new()).unwrap();
        query.close().unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        server.close().unwrap();
    }

    #[test]
    fn test_failures_are_reported_to_mock_sink() {
        let mut mock = MockEventSink::new();
        mock.expect_emit()
            .withf(|event_type, _| event_type == "rule.compiled")
            .times(1)
            .return_const(());
        mock.expect_emit()
            .withf(|event_type, data| {
                event_type == "action.failed"
                    && data.as_ref().is_some_and(|d| d["action"] == "flaky")
            })
            .times(1)
            .return_const(());
        mock.expect_emit()
            .withf(|event_type, _| event_type == "action.disabled")
            .times(1)
            .return_const(());

        let scheduler = Scheduler::new(policy()).with_event_sink(Arc::new(mock));
        scheduler
            .register_rule(Rule::new("r").with_entry(ActionCall::from_fn(
                ActionCallDescriptor::new("flaky"),
                |_| anyhow::bail!("connection reset"),
            )))
            .unwrap();

        for _ in 0..3 {
            let mut hook = scheduler.open(None, "r").unwrap();
            hook.activate().unwrap();
            hook.run_entry(&MethodFrame::new()).unwrap();
            hook.close().unwrap();
        }

        assert_eq!(
            scheduler.disabled_actions("r"),
            vec![(HookPhase::Entry, "flaky".to_string())]
        );
    }

    #[test]
    fn test_reregistering_resets_disabled_actions() {
        let (scheduler, _sink) = scheduler();
        let rule = Rule::new("r").with_exit(ActionCall::from_fn(
            ActionCallDescriptor::new("bad"),
            |_| anyhow::bail!("nope"),
        ));
        scheduler.register_rule(rule).unwrap();

        let mut hook = scheduler.open(None, "r").unwrap();
        hook.activate().unwrap();
        hook.run_exit(&MethodFrame::new()).unwrap();
        hook.close().unwrap();
        assert_eq!(scheduler.disabled_actions("r").len(), 1);

        let replacement = Rule::new("r").with_exit(ActionCall::from_fn(
            ActionCallDescriptor::new("good"),
            |_| Ok(()),
        ));
        scheduler.register_rule(replacement).unwrap();
        assert!(scheduler.disabled_actions("r").is_empty());
    }

    #[test]
    fn test_open_with_explicit_parent() {
        let (scheduler, _sink) = scheduler();
        scheduler.register_rule(Rule::new("r")).unwrap();

        let parent = ContextNode::root(policy());
        parent.set_data("service", "billing");
        let hook = scheduler.open(Some(&parent), "r").unwrap();

        assert!(hook.node().parent().unwrap().ptr_eq(&parent));
        assert_eq!(hook.node().get_data("service"), Some("billing".into()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invocations_inside_handed_off_task_keep_their_data() {
        let (scheduler, _sink) = scheduler();
        let scheduler = Arc::new(scheduler);
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.register_rule(db_rule(counter.clone())).unwrap();

        let root = ContextNode::root(policy());
        root.set_data("sampled", true);
        root.activate().unwrap();

        let task_scheduler = Arc::clone(&scheduler);
        let task_root = root.clone();
        let task = root.hand_off(async move {
            let mut seen = Vec::new();
            for _ in 0..2 {
                let mut query = task_scheduler.open(None, "db.query").unwrap();
                assert!(query.node().parent().unwrap().ptr_eq(&task_root));
                query.activate().unwrap();
                tokio::task::yield_now().await;
                query.run_exit(&MethodFrame::new()).unwrap();
                seen.push(query.node().get_data("db.calls"));
                query.close().unwrap();
            }
            seen
        });
        let seen = tokio::spawn(task).await.unwrap();

        // The root belongs to the test thread, so nothing merges back into it.
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(seen, vec![Some(ContextValue::Long(1)); 2]);
        assert_eq!(root.get_data("db.calls"), None);
        root.close().unwrap();
    }
}
