use ensemble::models::dependency::DependencySet;
use uuid::Uuid;

#[test]
fn add_rejects_duplicates() {
    let dep = Uuid::new_v4();
    let mut set = DependencySet::default();
    assert!(set.is_empty());
    assert!(set.add(dep));
    assert!(!set.add(dep));
    assert_eq!(set.declared(), &[dep]);
    assert!(!set.is_satisfied());
}

#[test]
fn satisfy_removes_exactly_once() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let mut set = DependencySet::from_declared([a, b]);

    assert!(set.satisfy(a));
    assert!(!set.satisfy(a), "second satisfy of the same id is not a transition");
    assert!(!set.is_satisfied());

    assert!(set.satisfy(b));
    assert!(set.is_satisfied());
    assert_eq!(set.declared(), &[a, b], "declared ids survive satisfaction");
}

#[test]
fn satisfy_unknown_id_is_noop() {
    let mut set = DependencySet::from_declared([Uuid::new_v4()]);
    assert!(!set.satisfy(Uuid::new_v4()));
    assert_eq!(set.unsatisfied().len(), 1);
}

#[test]
fn remove_drops_declared_and_unsatisfied() {
    let a = Uuid::new_v4();
    let mut set = DependencySet::from_declared([a]);
    assert!(set.remove(a));
    assert!(!set.remove(a));
    assert!(set.is_empty());
    assert!(set.is_satisfied());
}

#[test]
fn take_leaves_empty_set() {
    let a = Uuid::new_v4();
    let mut set = DependencySet::from_declared([a]);
    let moved = set.take();
    assert!(set.is_empty());
    assert_eq!(moved.declared(), &[a]);
}
