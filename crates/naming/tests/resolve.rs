#![forbid(unsafe_code)]

use std::sync::Arc;

use nexus_core::{ResourceLabels, DEFAULT_LABEL_VALUE};
use nexus_naming::{resolve_identifier, resolve_parent, NameResolver};
use nexus_schema::tenancy::{FOLDER, MULTI_TENANCY, ORG, PROJECT};
use nexus_schema::HierarchySchema;

fn labels(pairs: &[(&str, &str)]) -> ResourceLabels {
    pairs.iter().copied().collect()
}

fn project_schema() -> HierarchySchema {
    HierarchySchema::from_entries([("project", vec!["org"])]).unwrap()
}

#[test]
fn same_inputs_same_identifier() {
    let s = project_schema();
    let a = resolve_identifier(&s, "project", &labels(&[("org", "acme")]), "proj1");
    let b = resolve_identifier(&s, "project", &labels(&[("org", "acme")]), "proj1");
    assert_eq!(a, b);

    let other = resolve_identifier(&s, "project", &labels(&[("org", "other")]), "proj1");
    assert_ne!(a, other, "different parent must change the identifier");
}

#[test]
fn distinct_declared_names_never_collide() {
    let s = HierarchySchema::tenancy();
    let l = labels(&[(ORG, "acme"), (FOLDER, "f1")]);
    let names = ["p", "p1", "p2", "P1", "p1 ", "", "default", "proj/x", "proj:x", "a-very-long-project-name"];
    let mut ids: Vec<_> = names.iter().map(|n| resolve_identifier(&s, PROJECT, &l, n)).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), names.len());
}

#[test]
fn each_ancestor_binding_affects_identifier() {
    let s = HierarchySchema::tenancy();
    let base = labels(&[(MULTI_TENANCY, "t"), (ORG, "acme"), (FOLDER, "f1")]);
    let id = resolve_identifier(&s, PROJECT, &base, "p");
    for ancestor in [MULTI_TENANCY, ORG, FOLDER] {
        let mut changed = base.clone();
        changed.insert(ancestor, "changed");
        assert_ne!(resolve_identifier(&s, PROJECT, &changed, "p"), id, "ancestor {ancestor}");
    }
}

#[test]
fn missing_label_equals_explicit_default() {
    let s = HierarchySchema::tenancy();
    let implicit = labels(&[(ORG, "acme")]);
    let explicit = labels(&[(MULTI_TENANCY, DEFAULT_LABEL_VALUE), (ORG, "acme"), (FOLDER, DEFAULT_LABEL_VALUE)]);
    assert_eq!(resolve_identifier(&s, PROJECT, &implicit, "p"), resolve_identifier(&s, PROJECT, &explicit, "p"));
}

#[test]
fn labels_outside_the_ancestor_list_are_ignored() {
    let s = project_schema();
    let plain = resolve_identifier(&s, "project", &labels(&[("org", "acme")]), "p");
    let noisy = resolve_identifier(&s, "project", &labels(&[("org", "acme"), ("unrelated", "x")]), "p");
    assert_eq!(plain, noisy);
}

#[test]
fn unknown_type_hashes_like_a_root_type() {
    let s = HierarchySchema::from_entries([("root", Vec::<String>::new())]).unwrap();
    let l = labels(&[("org", "acme")]);
    let unknown = resolve_identifier(&s, "mystery", &l, "x");
    let empty = HierarchySchema::default();
    assert_eq!(unknown, resolve_identifier(&empty, "mystery", &ResourceLabels::new(), "x"));
    assert_eq!(unknown.as_str().len(), 40);
}

#[test]
fn parent_ref_matches_parent_resolution() {
    let s = Arc::new(HierarchySchema::tenancy());
    let r = NameResolver::new(Arc::clone(&s));
    let l = labels(&[(MULTI_TENANCY, "t"), (ORG, "acme"), (FOLDER, "f1")]);

    let parent = r.resolve_parent(PROJECT, &l).unwrap();
    assert_eq!(parent.resource_type, FOLDER);
    assert_eq!(parent.declared_name, "f1");
    assert_eq!(parent.identifier, r.resolve(FOLDER, &l, "f1"));

    assert!(resolve_parent(&s, MULTI_TENANCY, &l).is_none());
    assert!(resolve_parent(&s, "mystery", &l).is_none());
}

#[test]
fn parent_without_label_resolves_to_default() {
    let s = HierarchySchema::tenancy();
    let parent = resolve_parent(&s, ORG, &ResourceLabels::new()).unwrap();
    assert_eq!(parent.resource_type, MULTI_TENANCY);
    assert_eq!(parent.declared_name, DEFAULT_LABEL_VALUE);
}

#[test]
fn resolver_is_shareable_across_threads() {
    let r = NameResolver::new(Arc::new(HierarchySchema::tenancy()));
    let l = labels(&[(ORG, "acme")]);
    let expected = r.resolve(PROJECT, &l, "p");
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let r = r.clone();
            let l = l.clone();
            std::thread::spawn(move || r.resolve(PROJECT, &l, "p"))
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), expected);
    }
}

#[test]
fn explain_key_is_the_hash_input() {
    let r = NameResolver::new(Arc::new(project_schema()));
    let l = labels(&[("org", "acme")]);
    assert_eq!(r.compose_key("project", &l, "proj1"), "org:acme/project:proj1");
    assert_eq!(nexus_naming::digest_key("org:acme/project:proj1"), r.resolve("project", &l, "proj1"));
}
