//! End-to-end tests covering the parse -> render -> evaluate pipeline,
//! exercising the concrete scenarios a policy author would recognize.

use abac_dsl::{evaluate, parse_policy, render, AttributeBags, AttributeValue, GlobCache};

#[test]
fn scenario_a_unconditional_policy_permits_with_empty_bags() {
    let policy = parse_policy(
        r#"permit(principal is character, action in ["read"], resource is location);"#,
    )
    .unwrap();
    let cache = GlobCache::new();
    assert!(evaluate(&policy, &AttributeBags::default(), &cache));
}

#[test]
fn scenario_b_role_comparison_follows_subject_attribute() {
    let policy =
        parse_policy(r#"permit(principal, action, resource) when { principal.role == "admin" };"#)
            .unwrap();
    let cache = GlobCache::new();

    let mut admin_bags = AttributeBags::default();
    admin_bags
        .subject
        .insert("role".into(), AttributeValue::String("admin".into()));
    assert!(evaluate(&policy, &admin_bags, &cache));

    let mut guest_bags = AttributeBags::default();
    guest_bags
        .subject
        .insert("role".into(), AttributeValue::String("guest".into()));
    assert!(!evaluate(&policy, &guest_bags, &cache));
}

#[test]
fn scenario_c_like_pattern_respects_colon_segments() {
    let policy = parse_policy(
        r#"permit(principal, action, resource) when { resource.name like "location:*" };"#,
    )
    .unwrap();
    let cache = GlobCache::new();

    // Wrong attribute key entirely - fails safe, not an error.
    let mut stream_bags = AttributeBags::default();
    stream_bags.resource.insert(
        "stream.name".into(),
        AttributeValue::String("location:01XYZ".into()),
    );
    assert!(!evaluate(&policy, &stream_bags, &cache));

    // Right key, pattern matches within one colon-delimited segment.
    let mut named_bags = AttributeBags::default();
    named_bags
        .resource
        .insert("name".into(), AttributeValue::String("location:01XYZ".into()));
    assert!(evaluate(&policy, &named_bags, &cache));
}

#[test]
fn scenario_d_contains_all_requires_every_flag() {
    let policy = parse_policy(
        r#"permit(principal, action, resource) when { principal.flags.containsAll(["vip", "beta"]) };"#,
    )
    .unwrap();
    let cache = GlobCache::new();

    let mut full = AttributeBags::default();
    full.subject.insert(
        "flags".into(),
        AttributeValue::StringList(vec!["vip".into(), "beta".into(), "extra".into()]),
    );
    assert!(evaluate(&policy, &full, &cache));

    let mut partial = AttributeBags::default();
    partial.subject.insert(
        "flags".into(),
        AttributeValue::StringList(vec!["vip".into(), "extra".into()]),
    );
    assert!(!evaluate(&policy, &partial, &cache));
}

#[test]
fn scenario_g_two_providers_contribute_namespaced_keys_without_collision() {
    let policy = parse_policy(
        r#"permit(principal, action, resource) when { principal.character.role == "pilot" && principal.permissions.role == "crew" };"#,
    )
    .unwrap();
    let cache = GlobCache::new();

    let mut bags = AttributeBags::default();
    bags.subject
        .insert("character.role".into(), AttributeValue::String("pilot".into()));
    bags.subject
        .insert("permissions.role".into(), AttributeValue::String("crew".into()));
    assert!(evaluate(&policy, &bags, &cache));
}

#[test]
fn forbid_policy_with_numeric_comparison() {
    let policy =
        parse_policy(r#"forbid(principal, action, resource) when { principal.clearance < 3 };"#)
            .unwrap();
    let cache = GlobCache::new();

    let mut low = AttributeBags::default();
    low.subject.insert("clearance".into(), AttributeValue::Float(1.0));
    assert!(evaluate(&policy, &low, &cache));

    let mut high = AttributeBags::default();
    high.subject.insert("clearance".into(), AttributeValue::Float(5.0));
    assert!(!evaluate(&policy, &high, &cache));
}

#[test]
fn if_then_else_falls_back_to_else_on_falsy_condition() {
    let policy = parse_policy(
        r#"permit(principal, action, resource) when { if principal.vip == true then true else principal.role == "staff" };"#,
    )
    .unwrap();
    let cache = GlobCache::new();

    // principal.vip is absent: the condition branch fails safe to false,
    // so the else branch governs.
    let mut staff = AttributeBags::default();
    staff
        .subject
        .insert("role".into(), AttributeValue::String("staff".into()));
    assert!(evaluate(&policy, &staff, &cache));

    let mut guest = AttributeBags::default();
    guest
        .subject
        .insert("role".into(), AttributeValue::String("guest".into()));
    assert!(!evaluate(&policy, &guest, &cache));
}

#[test]
fn render_parse_round_trip_is_structurally_stable() {
    let sources = [
        r#"permit(principal is character, action in ["read", "write"], resource == "loc:01"); "#,
        r#"forbid(principal, action, resource) when { !(principal.banned == true) || principal.role == "admin" };"#,
        r#"permit(principal, action, resource) when { principal has profile.verified };"#,
        r#"permit(principal, action, resource) when { principal.containsAll(["vip"]) };"#,
        r#"permit(principal, action, resource) when { resource.tags.containsAny(["public", "shared"]) };"#,
    ];

    for source in sources {
        let policy = parse_policy(source).unwrap();
        let rendered = render(&policy);
        let reparsed = parse_policy(&rendered).unwrap();
        assert_eq!(policy, reparsed, "round trip mismatch for: {source}");
    }
}

#[test]
fn reserved_words_are_rejected_as_attribute_path_segments() {
    let result =
        parse_policy(r#"permit(principal, action, resource) when { principal.like == "x" };"#);
    assert!(result.is_err());
}
