use std::time::Duration;

use pretty_assertions::assert_eq;
use quarry_scheduler::ProgressEvent;

use super::fixtures::{Event, Harness, Step};

const WAIT: Duration = Duration::from_secs(10);

#[test]
fn commands_run_fifo_one_at_a_time() {
    let h = Harness::new();
    h.scheduler.enqueue(Step::Ok("reindex-x"), Duration::ZERO);
    h.scheduler.enqueue(Step::Ok("fetch-y"), Duration::ZERO);

    assert!(h.scheduler.wait_idle(WAIT));
    assert_eq!(
        h.events(),
        vec![
            Event::Start("reindex-x"),
            Event::End("reindex-x"),
            Event::Start("fetch-y"),
            Event::End("fetch-y"),
        ]
    );
}

#[test]
fn enqueue_within_debounce_window_keeps_earlier_commands() {
    let h = Harness::new();
    let delay = Duration::from_millis(300);
    h.scheduler.enqueue(Step::Ok("a"), delay);
    h.scheduler.enqueue(Step::Ok("b"), delay);
    std::thread::sleep(Duration::from_millis(50));

    // Still debouncing: nothing has started yet.
    assert!(h.events().is_empty());
    assert_eq!(h.scheduler.pending(), 2);
    assert!(!h.scheduler.is_idle());

    h.scheduler.enqueue(Step::Ok("c"), delay);
    assert!(h.scheduler.wait_idle(WAIT));

    let starts: Vec<_> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Start(name) => Some(name),
            Event::End(_) => None,
        })
        .collect();
    assert_eq!(starts, vec!["a", "b", "c"]);
}

#[test]
fn commands_enqueued_while_running_join_the_current_drain() {
    let h = Harness::new();
    h.scheduler.enqueue(Step::Ok("first"), Duration::ZERO);
    h.wait_started("first");
    h.scheduler.enqueue(Step::Ok("second"), Duration::from_secs(3600));

    assert!(h.scheduler.wait_idle(WAIT));
    assert_eq!(h.events().len(), 4);
}

#[test]
fn failures_and_panics_do_not_stop_the_queue() {
    let h = Harness::new();
    h.scheduler.enqueue(Step::Fail("broken"), Duration::ZERO);
    h.scheduler.enqueue(Step::Panic("crashing"), Duration::ZERO);
    h.scheduler.enqueue(Step::Ok("healthy"), Duration::ZERO);

    assert!(h.scheduler.wait_idle(WAIT));
    let events = h.events();
    assert!(events.contains(&Event::End("healthy")), "{events:?}");
    assert!(!events.contains(&Event::End("broken")));

    let errors = h.console.errors.lock().clone();
    assert_eq!(errors.len(), 2, "{errors:?}");
    assert!(errors[0].contains("broken exploded"));
    assert!(errors[1].contains("crashing"));
}

#[test]
fn progress_brackets_every_command() {
    let h = Harness::new();
    let mut rx = h.scheduler.subscribe_progress();
    h.scheduler.enqueue(Step::Ok("one"), Duration::ZERO);
    h.scheduler.enqueue(Step::Fail("two"), Duration::ZERO);
    assert!(h.scheduler.wait_idle(WAIT));

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    let titles: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Begin { title, .. } => Some(title.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(titles, vec!["one", "two"]);

    let ends: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::End { message, .. } => message.clone(),
            _ => None,
        })
        .collect();
    assert_eq!(ends, vec!["done".to_string(), "failed".to_string()]);
}

#[test]
fn wait_idle_times_out_while_work_is_running() {
    let h = Harness::new();
    h.scheduler.enqueue(Step::Block("forever"), Duration::ZERO);
    h.wait_started("forever");

    assert!(!h.scheduler.wait_idle(Duration::from_millis(50)));
    assert_eq!(h.scheduler.running().as_deref(), Some("forever"));

    h.scheduler.cancel();
    assert!(h.scheduler.wait_idle(WAIT));
}
