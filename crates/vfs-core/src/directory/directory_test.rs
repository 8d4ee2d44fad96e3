//! Tests for live directories.

use super::*;
use std::sync::mpsc;
use std::time::Instant;

const WAIT: Duration = Duration::from_secs(5);

fn test_context() -> VfsContext {
    let mut ctx = VfsContext::default();
    ctx.thumbnail_cache = None;
    ctx
}

fn open_loaded(ctx: &VfsContext, path: &Path) -> Arc<Directory> {
    let dir = Directory::create(ctx, path, false);
    assert!(dir.wait_until_loaded(WAIT));
    dir
}

/// Stops OS notifications so a test can drive the staging pipeline by hand.
fn detach_notifier(dir: &Directory) {
    if let Some(notifier) = dir.notifier() {
        notifier.stop();
    }
}

/// Worker threads drop their handles shortly after finishing, so eviction is eventual.
fn wait_evicted(ctx: &VfsContext, path: &Path) -> bool {
    let deadline = Instant::now() + WAIT;
    while ctx.find_directory(path).is_some() {
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    true
}

fn notification(dir: &Directory, event: EventMask, name: &str) -> Notification {
    Notification::new(event, dir.path().join(name), dir.path())
}

#[derive(Default)]
struct Recorder {
    created: Mutex<Vec<String>>,
    changed: Mutex<Vec<Option<String>>>,
    deleted: Mutex<Vec<Option<String>>>,
}

impl Recorder {
    fn attach(dir: &Directory) -> Arc<Recorder> {
        let rec = Arc::new(Recorder::default());
        let r = Arc::clone(&rec);
        dir.file_created()
            .connect(move |e: &Arc<FileEntry>| r.created.lock().unwrap().push(e.name().to_string()));
        let r = Arc::clone(&rec);
        dir.file_changed().connect(move |e: &Option<Arc<FileEntry>>| {
            r.changed.lock().unwrap().push(e.as_ref().map(|e| e.name().to_string()))
        });
        let r = Arc::clone(&rec);
        dir.file_deleted().connect(move |e: &Option<Arc<FileEntry>>| {
            r.deleted.lock().unwrap().push(e.as_ref().map(|e| e.name().to_string()))
        });
        rec
    }

    fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    fn changed(&self) -> Vec<Option<String>> {
        self.changed.lock().unwrap().clone()
    }

    fn deleted(&self) -> Vec<Option<String>> {
        self.deleted.lock().unwrap().clone()
    }
}

fn names(dir: &Directory) -> Vec<String> {
    dir.entries().iter().map(|e| e.name().to_string()).collect()
}

// ============================================================================
// Creation and caching
// ============================================================================

#[test]
fn test_create_returns_shared_instance() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = test_context();

    let first = Directory::create(&ctx, tmp.path(), false);
    let second = Directory::create(&ctx, tmp.path(), false);
    assert!(Arc::ptr_eq(&first, &second));

    // Trailing slash maps to the same key
    let with_slash = PathBuf::from(format!("{}/", tmp.path().display()));
    assert!(Arc::ptr_eq(&first, &Directory::create(&ctx, &with_slash, false)));

    drop(first);
    assert!(ctx.find_directory(tmp.path()).is_some());
    assert!(second.wait_until_loaded(WAIT));

    drop(second);
    assert!(wait_evicted(&ctx, tmp.path()));
}

#[test]
fn test_permanent_directory_survives_without_handles() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = test_context();

    let dir = Directory::create(&ctx, tmp.path(), true);
    assert!(dir.wait_until_loaded(WAIT));
    drop(dir);
    std::thread::sleep(Duration::from_millis(100));
    assert!(ctx.find_directory(tmp.path()).is_some());

    assert!(ctx.unpin_directory(tmp.path()));
    assert!(wait_evicted(&ctx, tmp.path()));
}

// ============================================================================
// Initial load
// ============================================================================

#[test]
fn test_initial_load_lists_entries_and_signals() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("a.txt"), "a").unwrap();
    fs::write(tmp.path().join(".dotfile"), "").unwrap();
    fs::create_dir(tmp.path().join("sub")).unwrap();

    let ctx = test_context();
    let dir = Directory::create(&ctx, tmp.path(), false);
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    dir.file_listed().connect(move |_| {
        let _ = tx.lock().unwrap().send(());
    });

    assert!(dir.wait_until_loaded(WAIT));
    assert!(!dir.is_loading());
    assert_eq!(names(&dir), vec![".dotfile", "a.txt", "sub"]);
    assert!(dir.find(".dotfile").unwrap().is_hidden());
    assert!(dir.find("sub").unwrap().is_directory());
    // Either the listed signal arrives, or it already fired before we connected
    let _ = rx.recv_timeout(Duration::from_millis(200));
}

#[test]
fn test_hidden_file_excludes_names_and_ignores_paths() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["keep", "secret", "also-secret"] {
        fs::write(tmp.path().join(name), "").unwrap();
    }
    fs::write(tmp.path().join(".hidden"), "secret\n/abs/also-secret\n").unwrap();

    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());
    assert_eq!(names(&dir), vec![".hidden", "also-secret", "keep"]);
    assert!(dir.hidden_names().contains("secret"));
}

#[test]
fn test_hidden_exclusion_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["one", "two", "three"] {
        fs::write(tmp.path().join(name), "").unwrap();
    }
    fs::write(tmp.path().join(".hidden"), "two\n").unwrap();
    let ctx = test_context();

    let first: HashSet<String> = {
        let dir = open_loaded(&ctx, tmp.path());
        names(&dir).into_iter().collect()
    };
    let second: HashSet<String> = {
        let dir = open_loaded(&ctx, tmp.path());
        names(&dir).into_iter().collect()
    };
    assert_eq!(first, second);
    assert!(!first.contains("two"));

    let dir = open_loaded(&ctx, tmp.path());
    detach_notifier(&dir);
    assert!(dir.refresh_sync());
    assert!(dir.refresh_sync());
    assert_eq!(names(&dir).into_iter().collect::<HashSet<_>>(), first);
}

// ============================================================================
// Change pipeline
// ============================================================================

#[test]
fn test_create_modify_close_write_emits_one_created() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());
    detach_notifier(&dir);
    let rec = Recorder::attach(&dir);

    fs::write(tmp.path().join("x"), "data").unwrap();
    dir.on_notification(&notification(&dir, EventMask::CREATE, "x"));
    dir.on_notification(&notification(&dir, EventMask::MODIFY, "x"));
    dir.on_notification(&notification(&dir, EventMask::CLOSE_WRITE, "x"));
    dir.flush_pending();

    assert_eq!(rec.created(), vec!["x"]);
    assert!(rec.changed().is_empty());
    assert_eq!(dir.find("x").unwrap().size(), 4);
}

#[test]
fn test_real_notifications_reach_signals() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());
    if dir.notifier().is_none() {
        return;
    }
    let rec = Recorder::attach(&dir);

    fs::write(tmp.path().join("live.txt"), "hello").unwrap();
    let deadline = Instant::now() + WAIT;
    while rec.created().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(rec.created(), vec!["live.txt"]);
    assert!(dir.find("live.txt").is_some());
}

#[test]
fn test_debounce_timer_drains_staged_events() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());
    detach_notifier(&dir);
    let rec = Recorder::attach(&dir);

    fs::write(tmp.path().join("later"), "").unwrap();
    dir.emit_file_created("later", false);
    assert!(rec.created().is_empty());

    let deadline = Instant::now() + WAIT;
    while rec.created().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(rec.created(), vec!["later"]);
}

#[test]
fn test_forced_event_shortens_armed_timer() {
    let tmp = tempfile::tempdir().unwrap();
    let mut ctx = test_context();
    ctx.settings = Arc::new(Settings {
        debounce_ms: 30_000,
        forced_debounce_ms: 20,
        ..Settings::default()
    });
    let dir = open_loaded(&ctx, tmp.path());
    detach_notifier(&dir);
    let rec = Recorder::attach(&dir);

    fs::write(tmp.path().join("slow"), "").unwrap();
    fs::write(tmp.path().join("urgent"), "").unwrap();
    let start = Instant::now();
    dir.emit_file_created("slow", false);
    dir.emit_file_created("urgent", true);

    let deadline = Instant::now() + WAIT;
    while rec.created().len() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    let mut created = rec.created();
    created.sort();
    assert_eq!(created, vec!["slow", "urgent"]);
    assert!(start.elapsed() < WAIT);
}

#[test]
fn test_change_and_delete() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("f"), "1").unwrap();
    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());
    detach_notifier(&dir);
    let rec = Recorder::attach(&dir);
    let handle = dir.find("f").unwrap();

    fs::write(tmp.path().join("f"), "12345").unwrap();
    dir.on_notification(&notification(&dir, EventMask::MODIFY, "f"));
    dir.flush_pending();
    assert_eq!(rec.changed(), vec![Some("f".to_string())]);
    assert_eq!(handle.size(), 5);

    fs::remove_file(tmp.path().join("f")).unwrap();
    dir.on_notification(&notification(&dir, EventMask::DELETE, "f"));
    dir.flush_pending();
    assert_eq!(rec.deleted(), vec![Some("f".to_string())]);
    assert!(dir.find("f").is_none());
    // Removed entries stay usable through existing handles
    assert_eq!(handle.name(), "f");
}

#[test]
fn test_created_for_existing_name_becomes_change() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("dup"), "").unwrap();
    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());
    detach_notifier(&dir);
    let rec = Recorder::attach(&dir);

    dir.emit_file_created("dup", false);
    dir.flush_pending();
    assert!(rec.created().is_empty());
    assert_eq!(rec.changed(), vec![Some("dup".to_string())]);
    assert_eq!(names(&dir), vec!["dup"]);
}

#[test]
fn test_created_then_vanished_is_dropped() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());
    detach_notifier(&dir);
    let rec = Recorder::attach(&dir);

    dir.emit_file_created("ghost", false);
    dir.flush_pending();
    assert!(rec.created().is_empty());
    assert!(dir.is_empty());
}

#[test]
fn test_hidden_name_is_not_created() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join(".hidden"), "quiet\n").unwrap();
    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());
    detach_notifier(&dir);
    let rec = Recorder::attach(&dir);

    fs::write(tmp.path().join("quiet"), "").unwrap();
    dir.emit_file_created("quiet", true);
    dir.flush_pending();
    assert!(rec.created().is_empty());
    assert!(dir.find("quiet").is_none());
}

#[test]
fn test_no_duplicate_basenames_under_event_replay() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());
    detach_notifier(&dir);

    let script: &[(&str, EventMask, bool)] = &[
        ("a", EventMask::CREATE, true),
        ("a", EventMask::CREATE, true),
        ("b", EventMask::MOVED_TO, true),
        ("a", EventMask::MODIFY, true),
        ("b", EventMask::DELETE, false),
        ("b", EventMask::CREATE, true),
        ("c", EventMask::CREATE, true),
        ("a", EventMask::MOVED_FROM, false),
        ("a", EventMask::CREATE, true),
    ];
    for (i, (name, event, exists)) in script.iter().enumerate() {
        let path = tmp.path().join(name);
        if *exists {
            fs::write(&path, i.to_string()).unwrap();
        } else {
            let _ = fs::remove_file(&path);
        }
        dir.on_notification(&notification(&dir, *event, name));
        if i % 2 == 1 {
            dir.flush_pending();
        }
        let listed = names(&dir);
        let unique: HashSet<&String> = listed.iter().collect();
        assert_eq!(unique.len(), listed.len());
    }
    dir.flush_pending();
    assert_eq!(names(&dir), vec!["a", "b", "c"]);
}

#[test]
fn test_avoid_changes_suppresses_unforced_changes() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("f"), "1").unwrap();
    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());
    detach_notifier(&dir);
    let rec = Recorder::attach(&dir);

    dir.set_avoid_changes(true);
    assert!(dir.avoid_changes());
    fs::write(tmp.path().join("f"), "22").unwrap();
    dir.emit_file_changed("f", false);
    dir.flush_pending();
    assert!(rec.changed().is_empty());

    dir.emit_file_changed("f", true);
    dir.flush_pending();
    assert_eq!(rec.changed(), vec![Some("f".to_string())]);

    // Creation is still honored
    fs::write(tmp.path().join("g"), "").unwrap();
    dir.emit_file_created("g", false);
    dir.flush_pending();
    assert_eq!(rec.created(), vec!["g"]);

    // A local temp dir is not a network mount
    assert!(!dir.update_avoid_changes());
}

#[test]
fn test_self_events_use_container_sentinel() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("f"), "").unwrap();
    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());
    detach_notifier(&dir);
    let rec = Recorder::attach(&dir);
    let own = Notification::new(EventMask::ATTRIB, dir.path(), dir.path());

    dir.on_notification(&own);
    assert_eq!(rec.changed(), vec![None]);

    let gone = Notification::new(EventMask::DELETE_SELF, dir.path(), dir.path());
    dir.on_notification(&gone);
    assert_eq!(rec.deleted(), vec![None]);
    assert!(dir.is_empty());
}

// ============================================================================
// Refresh and .hidden edits
// ============================================================================

#[test]
fn test_refresh_reconciles_with_disk() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("stay"), "").unwrap();
    fs::write(tmp.path().join("go"), "").unwrap();
    fs::write(tmp.path().join("hide-me"), "").unwrap();
    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());
    detach_notifier(&dir);
    let rec = Recorder::attach(&dir);

    fs::write(tmp.path().join("new"), "").unwrap();
    fs::remove_file(tmp.path().join("go")).unwrap();
    fs::write(tmp.path().join(".hidden"), "hide-me\n").unwrap();

    assert!(dir.refresh_sync());
    assert_eq!(rec.created(), vec![".hidden", "new"]);
    let mut deleted = rec.deleted();
    deleted.sort();
    assert_eq!(deleted, vec![Some("go".to_string()), Some("hide-me".to_string())]);
    assert_eq!(names(&dir), vec![".hidden", "new", "stay"]);
}

#[test]
fn test_refresh_refused_while_refreshing() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());

    dir.refreshing.store(true, Ordering::SeqCst);
    assert!(!dir.refresh_sync());
    assert!(!dir.refresh());
    dir.refreshing.store(false, Ordering::SeqCst);
    assert!(dir.refresh_sync());
}

#[test]
fn test_add_hidden() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("visible"), "").unwrap();
    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());
    detach_notifier(&dir);
    let entry = dir.find("visible").unwrap();

    assert!(dir.add_hidden(&entry));
    assert!(entry.is_hidden());
    assert!(dir.find("visible").is_some());
    assert_eq!(fs::read_to_string(tmp.path().join(".hidden")).unwrap(), "visible\n");

    assert!(dir.refresh_sync());
    assert!(dir.find("visible").is_none());
}

#[test]
fn test_thumbnail_loaded_signal() {
    let tmp = tempfile::tempdir().unwrap();
    let pic = tmp.path().join("pic.png");
    image::RgbaImage::from_pixel(32, 32, image::Rgba([0, 0, 255, 255]))
        .save(&pic)
        .unwrap();
    let ctx = test_context();
    let dir = open_loaded(&ctx, tmp.path());

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    dir.thumbnail_loaded().connect(move |e: &Arc<FileEntry>| {
        let _ = tx.lock().unwrap().send(e.name().to_string());
    });
    let entry = dir.find("pic.png").unwrap();
    dir.load_thumbnail(&entry, 16);

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "pic.png");
    assert!(entry.is_thumbnail_loaded(16));
}
