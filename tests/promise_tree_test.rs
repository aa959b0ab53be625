#[cfg(test)]
mod tests {
    use futures::channel::oneshot;
    use promising::logging::init_test_logging;
    use promising::{
        current_promise, ConcurrentBridge, Error, MismatchPolicy, Promise, PromiseState, Scheduler,
    };
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn sleep(duration: Duration) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        thread::spawn(move || {
            thread::sleep(duration);
            let _ = tx.send(());
        });
        rx
    }

    #[test]
    fn test_children_attach_to_the_running_promise_in_order() {
        init_test_logging();
        let mut scheduler = Scheduler::new();
        let (first_linked, second_linked, in_order) = scheduler
            .block_on(async {
                let parent = Promise::builder()
                    .root()
                    .start_immediately(false)
                    .wait_for_children(false)
                    .computation(async {
                        let me = current_promise()?;
                        let first = Promise::new(async { Ok(1) })?;
                        let second = Promise::new(async { Ok(2) })?;
                        let pending = me.pending_children()?;
                        Ok((
                            first.parent() == Some(me.clone()),
                            second.parent() == Some(me.clone()),
                            pending == vec![first.node().clone(), second.node().clone()],
                        ))
                    })
                    .build()?;
                parent.await
            })
            .unwrap();
        assert!(first_linked);
        assert!(second_linked);
        assert!(in_order);
    }

    #[test]
    fn test_explicit_root_ignores_the_running_promise() {
        let mut scheduler = Scheduler::new();
        let detached = scheduler
            .block_on(async {
                let parent = Promise::builder()
                    .start_immediately(false)
                    .computation(async {
                        let orphan = Promise::builder().root().value(0).build()?;
                        Ok(orphan.parent().is_none() && orphan.config().is_root())
                    })
                    .build()?;
                parent.await
            })
            .unwrap();
        assert!(detached);
    }

    #[test]
    fn test_child_without_flags_shares_the_parent_config() {
        let mut scheduler = Scheduler::new();
        let shared = scheduler
            .block_on(async {
                let parent = Promise::builder()
                    .root()
                    .start_immediately(false)
                    .computation(async {
                        let me = current_promise()?;
                        let child = Promise::ready(())?;
                        let tuned = Promise::builder().wait_for_children(true).value(()).build()?;
                        Ok(Arc::ptr_eq(&child.config(), &me.config())
                            && !Arc::ptr_eq(&tuned.config(), &me.config())
                            && tuned.config().start_immediately() == me.config().start_immediately())
                    })
                    .build()?;
                parent.await
            })
            .unwrap();
        assert!(shared);
    }

    #[test]
    fn test_parent_is_done_no_earlier_than_waited_child() {
        init_test_logging();
        let mut scheduler = Scheduler::new();
        let child_done_at: Rc<Cell<Option<Instant>>> = Rc::default();
        let child_bridge: Rc<RefCell<Option<ConcurrentBridge<&'static str>>>> = Rc::default();
        let started = Instant::now();

        let root = {
            let child_done_at = child_done_at.clone();
            let child_bridge = child_bridge.clone();
            Promise::builder()
                .scheduler(scheduler.handle())
                .root()
                .start_immediately(true)
                .wait_for_children(true)
                .computation(async move {
                    let child = Promise::builder()
                        .wait_for_children(true)
                        .computation(async move {
                            sleep(Duration::from_millis(100)).await?;
                            child_done_at.set(Some(Instant::now()));
                            Ok("child")
                        })
                        .build()?;
                    *child_bridge.borrow_mut() = Some(child.as_concurrent_bridge());
                    Ok("root")
                })
                .build()
                .unwrap()
        };

        assert_eq!(scheduler.block_on(root).unwrap(), "root");
        let root_done_at = Instant::now();

        let child_outcome = child_bridge.borrow().as_ref().unwrap().try_result();
        assert_eq!(child_outcome.unwrap().unwrap(), "child");
        assert!(child_done_at.get().unwrap() <= root_done_at);
        assert!(root_done_at - started >= Duration::from_millis(100));
    }

    #[test]
    fn test_unflagged_child_does_not_hold_the_parent() {
        let mut scheduler = Scheduler::new();
        let (release, gate) = oneshot::channel::<()>();
        let child_slot: Rc<RefCell<Option<Promise<u8>>>> = Rc::default();

        let root = {
            let child_slot = child_slot.clone();
            Promise::builder()
                .scheduler(scheduler.handle())
                .root()
                .start_immediately(true)
                .wait_for_children(false)
                .computation(async move {
                    let child = Promise::new(async move {
                        gate.await?;
                        Ok(1)
                    })?;
                    *child_slot.borrow_mut() = Some(child);
                    Ok(())
                })
                .build()
                .unwrap()
        };

        scheduler.block_on(root.clone()).unwrap();
        let child = child_slot.borrow_mut().take().unwrap();
        assert!(root.is_done());
        assert!(!child.is_done());

        release.send(()).unwrap();
        assert_eq!(scheduler.block_on(child).unwrap(), 1);
    }

    #[test]
    fn test_failed_child_does_not_fail_the_parent() {
        let mut scheduler = Scheduler::new();
        let child_bridge: Rc<RefCell<Option<ConcurrentBridge<u8>>>> = Rc::default();
        let root = {
            let child_bridge = child_bridge.clone();
            Promise::builder()
                .scheduler(scheduler.handle())
                .root()
                .start_immediately(true)
                .computation(async move {
                    let child = Promise::<u8>::builder()
                        .wait_for_children(true)
                        .computation(async {
                            sleep(Duration::from_millis(10)).await?;
                            Err(anyhow::anyhow!("child broke"))
                        })
                        .build()?;
                    *child_bridge.borrow_mut() = Some(child.as_concurrent_bridge());
                    Ok("parent fine")
                })
                .build()
                .unwrap()
        };

        assert_eq!(scheduler.block_on(root.clone()).unwrap(), "parent fine");
        assert_eq!(root.state(), PromiseState::Succeeded);
        let child_err = child_bridge.borrow().as_ref().unwrap().result(None).unwrap_err();
        assert_eq!(child_err.to_string(), "child broke");
    }

    #[test]
    fn test_settled_children_are_pruned() {
        let mut scheduler = Scheduler::new();
        let parent = Promise::builder()
            .scheduler(scheduler.handle())
            .root()
            .start_immediately(false)
            .computation(async { Ok(()) })
            .build()
            .unwrap();
        let child = Promise::builder()
            .parent(parent.node())
            .start_immediately(false)
            .computation(async { Ok(5) })
            .build()
            .unwrap();
        assert_eq!(parent.pending_children().unwrap(), vec![child.node().clone()]);
        assert_eq!(scheduler.block_on(child).unwrap(), 5);
        assert!(parent.pending_children().unwrap().is_empty());
    }

    #[test]
    fn test_parent_on_other_scheduler_is_detached_by_default() {
        let first = Scheduler::new();
        let second = Scheduler::new();
        let b = Promise::builder()
            .scheduler(first.handle())
            .root()
            .start_immediately(false)
            .scheduler_mismatch(MismatchPolicy::Detach)
            .computation(async { Ok(1) })
            .build()
            .unwrap();
        let a = Promise::builder()
            .scheduler(second.handle())
            .parent(b.node())
            .start_immediately(false)
            .computation(async { Ok(2) })
            .build()
            .unwrap();

        assert!(a.parent().is_none());
        assert!(a.config().is_root());
        assert_eq!(a.scheduler_id(), Some(second.id()));
        assert!(b.pending_children().unwrap().is_empty());
    }

    #[test]
    fn test_parent_on_other_scheduler_can_be_rejected() {
        let first = Scheduler::new();
        let second = Scheduler::new();
        let b = Promise::builder()
            .scheduler(first.handle())
            .root()
            .start_immediately(false)
            .computation(async { Ok(1) })
            .build()
            .unwrap();
        let result = Promise::builder()
            .scheduler(second.handle())
            .parent(b.node())
            .scheduler_mismatch(MismatchPolicy::Reject)
            .value(2)
            .build();

        match result {
            Err(Error::WrongScheduler { parent, child }) => {
                assert_eq!(parent, first.id());
                assert_eq!(child, second.id());
            }
            other => panic!("expected WrongScheduler, got {:?}", other),
        }
        assert!(b.pending_children().unwrap().is_empty());
    }

    #[test]
    fn test_all_awaiters_are_released_together() {
        let mut scheduler = Scheduler::new();
        let promise = Promise::builder()
            .scheduler(scheduler.handle())
            .root()
            .start_immediately(true)
            .computation(async {
                sleep(Duration::from_millis(20)).await?;
                Ok(String::from("🍓"))
            })
            .build()
            .unwrap();
        let (first, second) =
            scheduler.block_on(futures::future::join(promise.clone(), promise.clone()));
        assert_eq!(first.unwrap(), "🍓");
        assert_eq!(second.unwrap(), "🍓");
    }

    #[test]
    fn test_lazy_parent_awaited_from_another_scheduler_keeps_its_children() {
        let home = Scheduler::new();
        let mut other = Scheduler::new();
        let home_id = home.id();
        let parent = Promise::builder()
            .scheduler(home.handle())
            .root()
            .start_immediately(false)
            .computation(async move {
                let me = current_promise()?;
                let child = Promise::builder()
                    .start_immediately(false)
                    .computation(async { Ok(7) })
                    .build()?;
                let linked = child.parent() == Some(me.clone())
                    && me.pending_children()? == vec![child.node().clone()];
                let same_scheduler = child.scheduler_id() == Some(home_id);
                Ok((linked, same_scheduler, child.await?))
            })
            .build()
            .unwrap();

        let (linked, same_scheduler, value) = other.block_on(parent).unwrap();
        assert!(linked);
        assert!(same_scheduler);
        assert_eq!(value, 7);
    }

    #[test]
    fn test_snapshots_stay_consistent_while_children_settle() {
        let mut scheduler = Scheduler::new();
        let root = Promise::builder()
            .scheduler(scheduler.handle())
            .root()
            .start_immediately(true)
            .computation(async {
                let me = current_promise()?;
                let children = (1..=4u64)
                    .map(|step| {
                        Promise::new(async move {
                            sleep(Duration::from_millis(15 * step)).await?;
                            Ok(step)
                        })
                    })
                    .collect::<promising::Result<Vec<_>>>()?;
                let mut pending = vec![me.pending_children()?.len()];
                for child in &children {
                    child.clone().await?;
                    let snapshot = me.pending_children()?;
                    assert!(snapshot.iter().all(|node| !node.is_done()));
                    assert!(!snapshot.contains(child.node()));
                    pending.push(snapshot.len());
                }
                Ok(pending)
            })
            .build()
            .unwrap();

        let pending = scheduler.block_on(root).unwrap();
        assert_eq!(pending.first(), Some(&4));
        assert_eq!(pending.last(), Some(&0));
        assert!(pending.windows(2).all(|pair| pair[0] >= pair[1]));
    }
}
