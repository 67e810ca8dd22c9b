use super::*;
use tokio::task::LocalSet;

const WINDOW: Duration = Duration::from_millis(100);

// ===================================================================
// SuppressionSet
// ===================================================================

#[tokio::test(start_paused = true)]
async fn suppression_expires_after_window() {
    LocalSet::new()
        .run_until(async {
            let set = SuppressionSet::new();
            let path = Path::new("/ws/a.txt");

            set.suppress(path, WINDOW);
            assert!(set.contains(path));

            tokio::time::sleep(Duration::from_millis(99)).await;
            assert!(set.contains(path), "still inside the window");

            tokio::time::sleep(Duration::from_millis(2)).await;
            assert!(!set.contains(path), "window elapsed");
            assert_eq!(set.len(), 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn resuppressing_restarts_the_window() {
    LocalSet::new()
        .run_until(async {
            let set = SuppressionSet::new();
            let path = Path::new("/ws/a.txt");

            set.suppress(path, WINDOW);
            tokio::time::sleep(Duration::from_millis(60)).await;
            set.suppress(path, WINDOW);

            // The first timer would have fired at 100ms.
            tokio::time::sleep(Duration::from_millis(60)).await;
            assert!(set.contains(path), "old timer must not remove the new window");

            tokio::time::sleep(Duration::from_millis(41)).await;
            assert!(!set.contains(path));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn clear_ends_window_immediately() {
    LocalSet::new()
        .run_until(async {
            let set = SuppressionSet::new();
            let a = Path::new("/ws/a.txt");
            let b = Path::new("/ws/b.txt");

            set.suppress(a, WINDOW);
            set.suppress(b, WINDOW);
            set.clear(a);
            assert!(!set.contains(a));
            assert!(set.contains(b));

            set.clear_all();
            assert_eq!(set.len(), 0);

            // Cancelled timers never fire against a later entry.
            set.suppress(a, Duration::from_secs(10));
            tokio::time::sleep(Duration::from_millis(150)).await;
            assert!(set.contains(a));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn paths_are_suppressed_independently() {
    LocalSet::new()
        .run_until(async {
            let set = SuppressionSet::new();
            set.suppress(Path::new("/ws/a.txt"), WINDOW);
            assert!(!set.contains(Path::new("/ws/b.txt")));
        })
        .await;
}

// ===================================================================
// InFlight
// ===================================================================

#[test]
fn second_begin_for_same_key_is_refused() {
    let in_flight = InFlight::new();
    let guard = in_flight.try_begin(PromptKey::Focused);
    assert!(guard.is_some());
    assert!(in_flight.try_begin(PromptKey::Focused).is_none());
    assert_eq!(in_flight.len(), 1);
}

#[test]
fn distinct_keys_do_not_interfere() {
    let in_flight = InFlight::new();
    let _a = in_flight.try_begin(PromptKey::Path("/ws/a.txt".into())).unwrap();
    let _b = in_flight.try_begin(PromptKey::Path("/ws/b.txt".into())).unwrap();
    let _focused = in_flight.try_begin(PromptKey::Focused).unwrap();
    assert_eq!(in_flight.len(), 3);
}

#[test]
fn dropping_guard_releases_key() {
    let in_flight = InFlight::new();
    let key = PromptKey::Path("/ws/c.txt".into());
    {
        let _guard = in_flight.try_begin(key.clone()).unwrap();
    }
    assert_eq!(in_flight.len(), 0);
    assert!(in_flight.try_begin(key).is_some());
}

#[test]
fn guard_is_released_on_panic() {
    let in_flight = InFlight::new();
    let cloned = in_flight.clone();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
        let _guard = cloned.try_begin(PromptKey::Focused).unwrap();
        panic!("command blew up");
    }));
    assert!(result.is_err());
    assert_eq!(in_flight.len(), 0);
}
