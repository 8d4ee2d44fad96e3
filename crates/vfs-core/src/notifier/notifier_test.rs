//! Tests for the change notifier.

use super::*;
use std::fs;
use std::sync::Mutex;
use std::time::Instant;

fn recorder(notifier: &ChangeNotifier, events: &[EventMask]) -> Arc<Mutex<Vec<Notification>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    notifier.on_events(events, move |n| sink.lock().unwrap().push(n.clone()));
    seen
}

/// Pumps the dispatch loop until `done` holds or two seconds pass.
fn pump_until(notifier: &ChangeNotifier, done: impl Fn() -> bool) {
    let token = StopToken::new();
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done() && Instant::now() < deadline {
        notifier.run_once(&token, Duration::from_millis(50));
    }
}

// ============================================================================
// Watch setup
// ============================================================================

#[test]
fn test_watch_missing_path_fails() {
    let notifier = ChangeNotifier::new().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("missing");

    let err = notifier.watch_directory(&missing, EventMask::ALL).unwrap_err();
    assert!(matches!(err, NotifyError::DoesNotExist(_)));
    let err = notifier.watch_file(&missing, EventMask::ALL).unwrap_err();
    assert!(matches!(err, NotifyError::DoesNotExist(_)));
}

#[test]
fn test_watch_type_mismatch_fails() {
    let notifier = ChangeNotifier::new().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("f.txt");
    fs::write(&file, "x").unwrap();

    let err = notifier.watch_file(tmp.path(), EventMask::ALL).unwrap_err();
    assert!(matches!(err, NotifyError::NotExpectedType { expected: "file", .. }));
    let err = notifier.watch_directory(&file, EventMask::ALL).unwrap_err();
    assert!(matches!(err, NotifyError::NotExpectedType { expected: "directory", .. }));
    assert!(err.to_string().contains("is not a directory"));
}

#[test]
fn test_unwatch() {
    let notifier = ChangeNotifier::new().unwrap();
    let tmp = tempfile::tempdir().unwrap();

    notifier.watch_directory(tmp.path(), EventMask::ALL).unwrap();
    assert!(notifier.is_watching(tmp.path()));
    notifier.unwatch(tmp.path()).unwrap();
    assert!(!notifier.is_watching(tmp.path()));
    assert!(matches!(notifier.unwatch(tmp.path()), Err(NotifyError::NotWatched(_))));
}

#[test]
fn test_watch_path_recursively() {
    let notifier = ChangeNotifier::new().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("a/b")).unwrap();
    fs::create_dir(tmp.path().join("c")).unwrap();
    fs::write(tmp.path().join("a/file"), "").unwrap();

    let count = notifier.watch_path_recursively(tmp.path(), EventMask::CREATE).unwrap();
    assert_eq!(count, 4);
    assert!(notifier.is_watching(&tmp.path().join("a/b")));
    assert!(!notifier.is_watching(&tmp.path().join("a/file")));
}

// ============================================================================
// Dispatch
// ============================================================================

#[test]
fn test_real_create_event_is_delivered() {
    let notifier = ChangeNotifier::new().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    notifier.watch_directory(tmp.path(), EventMask::ALL).unwrap();
    let seen = recorder(&notifier, &[EventMask::CREATE]);

    let file = tmp.path().join("new.txt");
    fs::write(&file, "hello").unwrap();
    pump_until(&notifier, || !seen.lock().unwrap().is_empty());

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].event, EventMask::CREATE);
    assert_eq!(seen[0].path, file);
    assert_eq!(seen[0].watched, tmp.path());
}

#[test]
fn test_later_registration_replaces_earlier() {
    let notifier = ChangeNotifier::new().unwrap();
    let first = recorder(&notifier, &[EventMask::CREATE]);
    let second = recorder(&notifier, &[EventMask::CREATE]);

    notifier.inject(Notification::new(EventMask::CREATE, "/w/x", "/w"));
    assert!(notifier.run_once(&StopToken::new(), Duration::from_secs(1)));

    assert!(first.lock().unwrap().is_empty());
    assert_eq!(second.lock().unwrap().len(), 1);
}

#[test]
fn test_on_events_fans_out() {
    let notifier = ChangeNotifier::new().unwrap();
    let seen = recorder(&notifier, &[EventMask::CREATE, EventMask::MOVE]);

    for event in [EventMask::CREATE, EventMask::MOVED_FROM, EventMask::MOVED_TO] {
        notifier.inject(Notification::new(event, "/w/x", "/w"));
    }
    let token = StopToken::new();
    while notifier.run_once(&token, Duration::from_millis(100)) {}

    let events: Vec<EventMask> = seen.lock().unwrap().iter().map(|n| n.event).collect();
    assert_eq!(events, vec![EventMask::CREATE, EventMask::MOVED_FROM, EventMask::MOVED_TO]);
}

#[test]
fn test_unexpected_event_goes_to_fallback() {
    let notifier = ChangeNotifier::new().unwrap();
    let _created = recorder(&notifier, &[EventMask::CREATE]);
    let unexpected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&unexpected);
    notifier.on_unexpected_event(move |n| sink.lock().unwrap().push(n.event));

    notifier.inject(Notification::new(EventMask::QUEUE_OVERFLOW, "/w", "/w"));
    assert!(notifier.run_once(&StopToken::new(), Duration::from_secs(1)));
    assert_eq!(*unexpected.lock().unwrap(), vec![EventMask::QUEUE_OVERFLOW]);
}

#[test]
fn test_mask_filters_events() {
    let notifier = ChangeNotifier::new().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    notifier.watch_directory(tmp.path(), EventMask::CREATE).unwrap();
    let seen = recorder(&notifier, &[EventMask::CREATE, EventMask::DELETE]);

    let child = tmp.path().join("x");
    notifier.inject(Notification::new(EventMask::DELETE, &child, tmp.path()));
    notifier.inject(Notification::new(EventMask::CREATE, &child, tmp.path()));
    let token = StopToken::new();
    while notifier.run_once(&token, Duration::from_millis(100)) {}

    let events: Vec<EventMask> = seen.lock().unwrap().iter().map(|n| n.event).collect();
    assert_eq!(events, vec![EventMask::CREATE]);
}

#[test]
fn test_ignore_and_ignore_once() {
    let notifier = ChangeNotifier::new().unwrap();
    let seen = recorder(&notifier, &[EventMask::MODIFY]);
    let token = StopToken::new();

    notifier.ignore_once(Path::new("/w/once"));
    notifier.ignore(Path::new("/w/always"));
    for _ in 0..2 {
        notifier.inject(Notification::new(EventMask::MODIFY, "/w/once", "/w"));
        notifier.inject(Notification::new(EventMask::MODIFY, "/w/always", "/w"));
    }
    while notifier.run_once(&token, Duration::from_millis(100)) {}

    let paths: Vec<PathBuf> = seen.lock().unwrap().iter().map(|n| n.path.clone()).collect();
    assert_eq!(paths, vec![PathBuf::from("/w/once")]);

    notifier.unignore(Path::new("/w/always"));
    notifier.inject(Notification::new(EventMask::MODIFY, "/w/always", "/w"));
    while notifier.run_once(&token, Duration::from_millis(100)) {}
    assert_eq!(seen.lock().unwrap().len(), 2);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_stop_wakes_run_and_is_idempotent() {
    let notifier = Arc::new(ChangeNotifier::new().unwrap());
    let runner = Arc::clone(&notifier);
    let handle = std::thread::spawn(move || runner.run(&StopToken::new()));

    std::thread::sleep(Duration::from_millis(50));
    notifier.stop();
    notifier.stop();
    handle.join().unwrap();
    assert!(notifier.is_stopped());
    assert!(!notifier.run_once(&StopToken::new(), Duration::from_millis(10)));
}

#[test]
fn test_stop_token_ends_run() {
    let notifier = Arc::new(ChangeNotifier::new().unwrap());
    let token = StopToken::new();
    let runner = Arc::clone(&notifier);
    let runner_token = token.clone();
    let handle = std::thread::spawn(move || runner.run(&runner_token));

    token.stop();
    handle.join().unwrap();
    assert!(!notifier.is_stopped());
}

#[test]
fn test_event_bit_mapping() {
    use ::notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    let p = Path::new("/w/x");

    assert_eq!(event_bit(&EventKind::Create(CreateKind::File), p, false), Some(EventMask::CREATE));
    assert_eq!(
        event_bit(&EventKind::Modify(ModifyKind::Data(DataChange::Content)), p, false),
        Some(EventMask::MODIFY)
    );
    assert_eq!(
        event_bit(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)), p, false),
        Some(EventMask::ATTRIB)
    );
    assert_eq!(
        event_bit(&EventKind::Access(AccessKind::Close(AccessMode::Write)), p, false),
        Some(EventMask::CLOSE_WRITE)
    );
    assert_eq!(
        event_bit(&EventKind::Modify(ModifyKind::Name(RenameMode::From)), p, false),
        Some(EventMask::MOVED_FROM)
    );
    assert_eq!(event_bit(&EventKind::Remove(RemoveKind::File), p, false), Some(EventMask::DELETE));
    assert_eq!(
        event_bit(&EventKind::Remove(RemoveKind::Folder), p, true),
        Some(EventMask::DELETE_SELF)
    );
    assert_eq!(
        event_bit(&EventKind::Modify(ModifyKind::Name(RenameMode::Any)), p, true),
        Some(EventMask::MOVE_SELF)
    );
    assert_eq!(event_bit(&EventKind::Any, p, false), None);
}
