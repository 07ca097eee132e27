#![forbid(unsafe_code)]

use std::sync::Arc;

use nexus_store::ParentChildCache;

#[test]
fn add_then_remove_round_trip() {
    let c = ParentChildCache::new();
    c.add_child("org", "acme", "project", "proj1");
    assert!(c.exists("org", "acme", "project", "proj1"));
    c.remove_child("org", "acme", "project", "proj1");
    assert!(!c.exists("org", "acme", "project", "proj1"));
}

#[test]
fn duplicate_add_lists_once() {
    let c = ParentChildCache::new();
    c.add_child("org", "acme", "project", "proj1");
    assert_eq!(c.list_children("org", "acme", "project"), vec!["proj1".to_string()]);
    c.add_child("org", "acme", "project", "proj1");
    assert_eq!(c.list_children("org", "acme", "project"), vec!["proj1".to_string()]);
    assert!(c.exists("org", "acme", "project", "proj1"));
}

#[test]
fn remove_on_empty_cache_is_a_no_op() {
    let c = ParentChildCache::new();
    c.remove_child("org", "acme", "project", "nonexistent");
    assert!(!c.exists("org", "acme", "project", "nonexistent"));
    assert!(c.list_children("org", "acme", "project").is_empty());
    assert!(c.child_types("org", "acme").is_empty());
}

#[test]
fn tuples_are_isolated_per_level() {
    let c = ParentChildCache::new();
    c.add_child("typeA", "x", "typeC", "y");
    assert!(c.exists("typeA", "x", "typeC", "y"));
    assert!(!c.exists("typeB", "x", "typeC", "y"));
    assert!(!c.exists("typeA", "z", "typeC", "y"));
    assert!(!c.exists("typeA", "x", "typeD", "y"));
    assert!(!c.exists("typeA", "x", "typeC", "w"));
}

#[test]
fn lists_every_child_of_a_type() {
    let c = ParentChildCache::new();
    for n in ["p3", "p1", "p2"] {
        c.add_child("org", "acme", "project", n);
    }
    c.add_child("org", "acme", "folder", "f1");
    c.add_child("org", "other", "project", "p9");

    let mut projects = c.list_children("org", "acme", "project");
    projects.sort();
    assert_eq!(projects, ["p1", "p2", "p3"]);
    assert_eq!(c.count_children("org", "acme", "project"), 3);

    let mut types = c.child_types("org", "acme");
    types.sort();
    assert_eq!(types, ["folder", "project"]);
}

#[test]
fn concurrent_writers_converge() {
    let c = Arc::new(ParentChildCache::new());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let c = Arc::clone(&c);
            std::thread::spawn(move || {
                let parent = format!("org-{}", t % 2);
                for i in 0..200 {
                    let child = format!("p{i}");
                    c.add_child("org", &parent, "project", &child);
                    if i % 2 == 1 {
                        c.remove_child("org", &parent, "project", &child);
                    }
                    // readers interleave with writers on the same parent
                    let _ = c.list_children("org", &parent, "project");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for parent in ["org-0", "org-1"] {
        let mut names = c.list_children("org", parent, "project");
        names.sort();
        let mut expected: Vec<String> = (0..200).filter(|i| i % 2 == 0).map(|i| format!("p{i}")).collect();
        expected.sort();
        assert_eq!(names, expected, "parent {parent}");
    }
}
