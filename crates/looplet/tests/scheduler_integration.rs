//! Integration tests for the event loop, timers, and combinators

use looplet::{
    gather, gather_results, run, sleep, spawn, wait, EventLoop, Failure, LoopError, TaskHandle,
    TaskState, WaitMode, yield_now,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Spawn a task that sleeps for `duration`, records `value` in `order`, and
/// returns it.
fn sleeper(
    event_loop: &EventLoop,
    duration: Duration,
    value: u64,
    order: &Rc<RefCell<Vec<u64>>>,
) -> TaskHandle<u64> {
    let order = Rc::clone(order);
    event_loop
        .spawn(async move {
            sleep(duration).await;
            order.borrow_mut().push(value);
            Ok(value)
        })
        .expect("spawn failed")
}

#[test]
fn test_result_not_ready_until_terminal() {
    let event_loop = EventLoop::new();
    let target = event_loop
        .spawn(async {
            sleep(Duration::from_millis(10)).await;
            Ok(5)
        })
        .unwrap();

    // Before the loop ever ran.
    assert_eq!(target.result(), Err(LoopError::NotReady));

    let observed = {
        let target = target.clone();
        event_loop
            .spawn(async move {
                // The target is suspended on its timer at this point.
                let early = target.result();
                let value = target.clone().await?;
                let late = target.result();
                Ok((early == Err(LoopError::NotReady), value, late == Ok(5)))
            })
            .unwrap()
    };

    assert_eq!(
        event_loop.run_until_complete(&observed),
        Ok((true, 5, true))
    );
}

#[test]
fn test_sleepers_complete_in_deadline_order() {
    let event_loop = EventLoop::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    // Spawned longest-first; completion must follow the deadlines.
    let slow = sleeper(&event_loop, Duration::from_millis(30), 30, &order);
    let mid = sleeper(&event_loop, Duration::from_millis(20), 20, &order);
    let fast = sleeper(&event_loop, Duration::from_millis(10), 10, &order);

    let main = event_loop
        .spawn(async move {
            let outcome = wait([slow, mid, fast], WaitMode::AllCompleted).await;
            Ok(outcome.completed.len())
        })
        .unwrap();

    assert_eq!(event_loop.run_until_complete(&main), Ok(3));
    assert_eq!(*order.borrow(), vec![10, 20, 30]);
}

#[test]
fn test_same_deadline_resumes_fifo() {
    let event_loop = EventLoop::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    let deadline = Duration::from_millis(10);

    let handles: Vec<_> = (1..=4)
        .map(|n| sleeper(&event_loop, deadline, n, &order))
        .collect();

    let main = event_loop
        .spawn(async move { Ok(gather(handles).await?) })
        .unwrap();

    assert_eq!(event_loop.run_until_complete(&main), Ok(vec![1, 2, 3, 4]));
    // Registration order decides ties at an identical deadline.
    assert_eq!(*order.borrow(), vec![1, 2, 3, 4]);
}

#[test]
fn test_sleep_never_resumes_early() {
    let event_loop = EventLoop::new();
    let main = event_loop
        .spawn(async {
            sleep(Duration::from_millis(250)).await;
            Ok(())
        })
        .unwrap();
    event_loop.run_until_complete(&main).unwrap();
    assert!(event_loop.now() >= Duration::from_millis(250));
}

#[test]
fn test_gather_order_independent_of_completion() {
    let event_loop = EventLoop::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    // Input order is the reverse of completion order.
    let handles: Vec<_> = (1..=5)
        .map(|n| sleeper(&event_loop, Duration::from_millis(60 - n * 10), n, &order))
        .collect();

    let main = event_loop
        .spawn(async move { Ok(gather(handles).await?) })
        .unwrap();

    assert_eq!(
        event_loop.run_until_complete(&main),
        Ok(vec![1, 2, 3, 4, 5])
    );
    assert_eq!(*order.borrow(), vec![5, 4, 3, 2, 1]);
}

#[test]
fn test_gather_results_reports_every_outcome() {
    let event_loop = EventLoop::new();
    let ok = event_loop
        .spawn(async {
            sleep(Duration::from_millis(20)).await;
            Ok(1)
        })
        .unwrap();
    let bad = event_loop
        .spawn(async {
            sleep(Duration::from_millis(5)).await;
            Err::<i32, _>(Failure::new("boom"))
        })
        .unwrap();
    let doomed = event_loop
        .spawn(async {
            sleep(Duration::from_secs(60)).await;
            Ok(3)
        })
        .unwrap();
    doomed.cancel();

    let main = event_loop
        .spawn(async move {
            let results = gather_results([ok, bad, doomed]).await;
            Ok(results
                .into_iter()
                .map(|r| r.map_err(|e| e.to_string()))
                .collect::<Vec<_>>())
        })
        .unwrap();

    let results = event_loop.run_until_complete(&main).unwrap();
    assert_eq!(
        results,
        vec![
            Ok(1),
            Err("task failed: boom".to_string()),
            Err("task was cancelled".to_string()),
        ]
    );
}

#[test]
fn test_cancel_before_start_never_runs_body() {
    let event_loop = EventLoop::new();
    let ran = Rc::new(Cell::new(false));
    let ran2 = Rc::clone(&ran);

    let victim = event_loop
        .spawn(async move {
            ran2.set(true);
            Ok(())
        })
        .unwrap();
    assert!(victim.cancel());

    let main = event_loop
        .spawn(async {
            yield_now().await;
            Ok(())
        })
        .unwrap();
    event_loop.run_until_complete(&main).unwrap();

    assert!(!ran.get());
    assert_eq!(victim.state(), TaskState::Cancelled);
}

#[test]
fn test_cancel_lands_at_suspension_point() {
    let event_loop = EventLoop::new();
    let victim = event_loop
        .spawn(async {
            sleep(Duration::from_secs(10)).await;
            Ok(1)
        })
        .unwrap();

    let main = {
        let victim = victim.clone();
        event_loop
            .spawn(async move {
                // Let the victim start sleeping before cancelling it.
                yield_now().await;
                assert_eq!(victim.state(), TaskState::Suspended);
                victim.cancel();
                match victim.clone().await {
                    Err(LoopError::Cancelled) => Ok(true),
                    _ => Ok(false),
                }
            })
            .unwrap()
    };

    assert_eq!(event_loop.run_until_complete(&main), Ok(true));
    // The victim was cancelled long before its deadline.
    assert!(event_loop.now() < Duration::from_secs(10));
}

#[test]
fn test_cancel_at_yield_point_in_busy_task() {
    let event_loop = EventLoop::new();
    let rounds = Rc::new(Cell::new(0u32));
    let rounds2 = Rc::clone(&rounds);

    let worker = event_loop
        .spawn(async move {
            for _ in 0..u32::MAX {
                rounds2.set(rounds2.get() + 1);
                yield_now().await;
            }
            Ok(())
        })
        .unwrap();

    let main = {
        let worker = worker.clone();
        event_loop
            .spawn(async move {
                yield_now().await;
                worker.cancel();
                match worker.clone().await {
                    Err(LoopError::Cancelled) => Ok(true),
                    _ => Ok(false),
                }
            })
            .unwrap()
    };

    assert_eq!(event_loop.run_until_complete(&main), Ok(true));
    assert!(rounds.get() >= 1);
}

#[test]
fn test_completion_beats_cancellation() {
    let event_loop = EventLoop::new();
    let slot: Rc<RefCell<Option<TaskHandle<i32>>>> = Rc::new(RefCell::new(None));
    let slot2 = Rc::clone(&slot);

    let handle = event_loop
        .spawn(async move {
            yield_now().await;
            // Self-cancel, then complete within the same resumption: the
            // request has no suspension point left to land on.
            if let Some(me) = slot2.borrow().clone() {
                me.cancel();
            }
            Ok(9)
        })
        .unwrap();
    *slot.borrow_mut() = Some(handle.clone());

    assert_eq!(event_loop.run_until_complete(&handle), Ok(9));
    assert_eq!(handle.state(), TaskState::Completed);
}

#[test]
fn test_wait_partitions_are_disjoint_and_exhaustive() {
    let event_loop = EventLoop::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let handles: Vec<_> = (1..=5)
        .map(|n| sleeper(&event_loop, Duration::from_millis(n * 10), n, &order))
        .collect();
    let all_ids: Vec<_> = handles.iter().map(|h| h.id()).collect();

    let main = event_loop
        .spawn(async move {
            let outcome = wait(handles, WaitMode::FirstCompleted).await;
            let mut seen: Vec<_> = outcome
                .completed
                .iter()
                .chain(outcome.pending.iter())
                .map(|h| h.id())
                .collect();
            seen.sort();
            let completed_ids: Vec<_> = outcome.completed.iter().map(|h| h.id()).collect();
            let disjoint = outcome
                .pending
                .iter()
                .all(|p| !completed_ids.contains(&p.id()));
            Ok((seen, disjoint, outcome.completed.len(), outcome.pending.len()))
        })
        .unwrap();

    let mut expected = all_ids;
    expected.sort();
    assert_eq!(
        event_loop.run_until_complete(&main),
        Ok((expected, true, 1, 4))
    );
}

#[test]
fn test_close_then_spawn_fails() {
    let event_loop = EventLoop::new();
    event_loop.close();
    assert!(matches!(
        event_loop.spawn(async { Ok(()) }),
        Err(LoopError::Closed)
    ));
}

#[test]
fn test_on_done_callback_fires_on_completion() {
    let event_loop = EventLoop::new();
    let fired = Arc::new(AtomicBool::new(false));
    let fired2 = Arc::clone(&fired);

    let handle = event_loop.spawn(async { Ok(3) }).unwrap();
    handle.on_done(move |task| {
        assert_eq!(task.state(), TaskState::Completed);
        fired2.store(true, Ordering::SeqCst);
    });

    event_loop.run_until_complete(&handle).unwrap();
    assert!(fired.load(Ordering::SeqCst));
}

#[test]
fn test_failure_propagates_through_nested_awaits() {
    let event_loop = EventLoop::new();
    let main = event_loop
        .spawn(async {
            let inner = spawn(async {
                sleep(Duration::from_millis(1)).await;
                Err::<i32, _>(Failure::new("inner failure"))
            })?;
            let value = inner.await?;
            Ok(value + 1)
        })
        .unwrap();

    // The inner failure unwraps back to its original payload.
    assert_eq!(
        event_loop.run_until_complete(&main),
        Err(LoopError::Failed(Failure::new("inner failure")))
    );
}

#[test]
fn test_two_phase_demo_flow() {
    // The canonical usage shape: gather a batch of sleepers, then a second
    // drive cycle that spawns tasks, sleeps, and waits on them.
    let event_loop = EventLoop::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let first = sleeper(&event_loop, Duration::from_secs(2), 4, &order);
    let second = sleeper(&event_loop, Duration::from_secs(1), 2, &order);
    let batch = event_loop
        .spawn(async move { Ok(gather([first, second]).await?) })
        .unwrap();

    assert_eq!(event_loop.run_until_complete(&batch), Ok(vec![4, 2]));
    assert_eq!(*order.borrow(), vec![2, 4]);

    let follow_up = event_loop
        .spawn(async {
            let t1 = spawn(async {
                sleep(Duration::from_secs(4)).await;
                Ok(8)
            })?;
            let t2 = spawn(async {
                sleep(Duration::from_secs(3)).await;
                Ok(6)
            })?;
            sleep(Duration::from_secs(2)).await;

            let outcome = wait([t1.clone(), t2.clone()], WaitMode::AllCompleted).await;
            assert!(outcome.pending.is_empty());
            Ok(t1.result()? + t2.result()?)
        })
        .unwrap();

    assert_eq!(event_loop.run_until_complete(&follow_up), Ok(14));

    event_loop.close();
    assert!(event_loop.is_closed());
    assert!(matches!(
        event_loop.spawn(async { Ok(()) }),
        Err(LoopError::Closed)
    ));
}

#[test]
fn test_run_helper_drives_and_closes() {
    let result = run(async {
        let doubled = spawn(async {
            sleep(Duration::from_millis(10)).await;
            Ok(21)
        })?;
        Ok(doubled.await? * 2)
    });
    assert_eq!(result, Ok(42));
}

#[test]
fn test_stalled_loop_reports_deadlock() {
    let event_loop = EventLoop::new();
    let blocked = event_loop
        .spawn(async {
            std::future::pending::<()>().await;
            Ok(())
        })
        .unwrap();
    assert_eq!(
        event_loop.run_until_complete(&blocked),
        Err(LoopError::Stalled)
    );
}

#[test]
fn test_stats_track_lifecycle() {
    let event_loop = EventLoop::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let quick = sleeper(&event_loop, Duration::from_millis(1), 1, &order);
    let _parked = sleeper(&event_loop, Duration::from_secs(3600), 2, &order);

    let main = event_loop
        .spawn(async move {
            quick.clone().await?;
            Ok(())
        })
        .unwrap();
    event_loop.run_until_complete(&main).unwrap();

    let stats = event_loop.stats();
    assert_eq!(stats.tasks_spawned, 3);
    assert_eq!(stats.tasks_completed, 2);
    assert_eq!(stats.active_tasks, 1);
}
