use quarry_core::{Error, IncludeError, descriptor_for, plan_includes};

#[path = "support/entities.rs"]
mod entities;
#[path = "support/fake_dialect.rs"]
mod fake_dialect;

use entities::{Author, Book};
use fake_dialect::FakeDialect;

fn paths(paths: &[&str]) -> Vec<String> {
    paths.iter().map(ToString::to_string).collect()
}

#[test]
fn two_hop_include_allocates_sequential_aliases() {
    let base = descriptor_for::<Book>().expect("descriptor builds");
    let plan =
        plan_includes(base, &paths(&["Author.Company"]), &FakeDialect, 5).expect("plan builds");

    assert_eq!(plan.roots.len(), 1);
    let author = &plan.roots[0];
    assert_eq!(author.alias, "t1");
    assert!(!author.is_collection);
    assert_eq!(author.children.len(), 1);
    assert_eq!(author.children[0].alias, "t2");

    assert_eq!(
        plan.join_clauses,
        "LEFT JOIN \"authors\" t1 ON t0.\"author_id\" = t1.\"id\" \
         LEFT JOIN \"companies\" t2 ON t1.\"company_id\" = t2.\"id\""
    );
    assert!(plan.select_list.starts_with("t0.*"));
    assert!(plan.select_list.contains("t1.\"id\" AS \"t1_id\""));
    assert!(plan.select_list.contains("t2.\"name\" AS \"t2_name\""));
    assert!(!plan.has_collection);
}

#[test]
fn shared_prefixes_reuse_one_node() {
    let base = descriptor_for::<Book>().expect("descriptor builds");
    let plan = plan_includes(
        base,
        &paths(&["Author", "Author.Company"]),
        &FakeDialect,
        5,
    )
    .expect("plan builds");

    assert_eq!(plan.roots.len(), 1);
    assert_eq!(plan.roots[0].children.len(), 1);
    assert_eq!(plan.roots[0].alias, "t1");
    assert_eq!(plan.roots[0].children[0].alias, "t2");
}

#[test]
fn many_to_many_allocates_a_junction_alias() {
    let base = descriptor_for::<Book>().expect("descriptor builds");
    let plan = plan_includes(base, &paths(&["Tags"]), &FakeDialect, 5).expect("plan builds");

    let tags = &plan.roots[0];
    assert_eq!(tags.alias, "t1");
    assert_eq!(tags.junction_alias.as_deref(), Some("t2"));
    assert!(tags.is_collection);
    assert!(plan.has_collection);

    assert_eq!(
        plan.join_clauses,
        "LEFT JOIN \"book_tags\" t2 ON t0.\"id\" = t2.\"book_id\" \
         LEFT JOIN \"tags\" t1 ON t2.\"tag_id\" = t1.\"id\""
    );
}

#[test]
fn inverse_collection_join_points_back_at_the_parent() {
    let base = descriptor_for::<Author>().expect("descriptor builds");
    let plan = plan_includes(base, &paths(&["Books"]), &FakeDialect, 5).expect("plan builds");

    assert_eq!(
        plan.join_clauses,
        "LEFT JOIN \"books\" t1 ON t1.\"author_id\" = t0.\"id\""
    );
    assert!(plan.has_collection);
}

#[test]
fn planning_is_deterministic_for_identical_input() {
    let base = descriptor_for::<Book>().expect("descriptor builds");
    let first = plan_includes(
        Clone::clone(&base),
        &paths(&["Author.Company", "Tags"]),
        &FakeDialect,
        5,
    )
    .expect("plan builds");
    let second = plan_includes(base, &paths(&["Author.Company", "Tags"]), &FakeDialect, 5)
        .expect("plan builds");

    assert_eq!(first.select_list, second.select_list);
    assert_eq!(first.join_clauses, second.join_clauses);
}

#[test]
fn node_set_is_insensitive_to_path_order() {
    let base = descriptor_for::<Book>().expect("descriptor builds");
    let forward = plan_includes(
        Clone::clone(&base),
        &paths(&["Author.Company", "Tags"]),
        &FakeDialect,
        5,
    )
    .expect("plan builds");
    let backward = plan_includes(base, &paths(&["Tags", "Author.Company"]), &FakeDialect, 5)
        .expect("plan builds");

    let mut forward_names: Vec<&str> = forward
        .roots
        .iter()
        .map(|node| node.navigation.as_str())
        .collect();
    let mut backward_names: Vec<&str> = backward
        .roots
        .iter()
        .map(|node| node.navigation.as_str())
        .collect();
    forward_names.sort_unstable();
    backward_names.sort_unstable();
    assert_eq!(forward_names, backward_names);
}

#[test]
fn unknown_navigation_is_rejected() {
    let base = descriptor_for::<Book>().expect("descriptor builds");
    let error = plan_includes(base, &paths(&["Publisher"]), &FakeDialect, 5)
        .expect_err("must fail");
    assert!(matches!(
        error,
        Error::Include(IncludeError::UnknownNavigation { segment, .. }) if segment == "Publisher"
    ));
}

#[test]
fn nesting_beyond_the_limit_is_rejected() {
    let base = descriptor_for::<Book>().expect("descriptor builds");
    let error = plan_includes(base, &paths(&["Author.Company"]), &FakeDialect, 1)
        .expect_err("must fail");
    assert!(matches!(
        error,
        Error::Include(IncludeError::DepthExceeded { limit: 1, .. })
    ));
}

#[test]
fn empty_segments_are_rejected() {
    let base = descriptor_for::<Book>().expect("descriptor builds");
    let error =
        plan_includes(base, &paths(&["Author..Company"]), &FakeDialect, 5).expect_err("must fail");
    assert!(matches!(
        error,
        Error::Include(IncludeError::MalformedPath { .. })
    ));
}
