//! Retention policy evaluation.
//!
//! Pure function of (catalog, policy, now). Rules are checked in order and the
//! first match wins:
//!
//! 1. younger than the age threshold → keep (`too-young`)
//! 2. id, short id or any tag matches an exclusion pattern → keep (`matched-exclusion`)
//! 3. otherwise → delete (`eligible`)
//!
//! Untagged images get no leniency; they are protected only by age or by a
//! pattern matching their id.

mod pattern;

use crate::model::{Decision, ImageRecord, Reason, RetentionPolicy};
use time::OffsetDateTime;

/// Evaluate every image against the policy. Output order matches input order.
pub fn evaluate(
    images: &[ImageRecord],
    policy: &RetentionPolicy,
    now: OffsetDateTime,
) -> Vec<Decision> {
    images.iter().map(|img| decide(img, policy, now)).collect()
}

/// Decision for a single image.
pub fn decide(image: &ImageRecord, policy: &RetentionPolicy, now: OffsetDateTime) -> Decision {
    if now - image.created_at < policy.age_threshold {
        return Decision::keep(Reason::TooYoung);
    }
    if is_excluded(image, &policy.excluded_patterns) {
        return Decision::keep(Reason::MatchedExclusion);
    }
    Decision::delete()
}

fn is_excluded(image: &ImageRecord, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return false;
    }
    let bare_id = image.id.strip_prefix("sha256:");
    image
        .tags
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(image.id.as_str()))
        .chain(bare_id)
        .any(|subject| pattern::matches_any(patterns, subject))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Action;
    use std::collections::BTreeMap;
    use time::Duration;

    fn now() -> OffsetDateTime {
        time::macros::datetime!(2026-10-01 12:00 UTC)
    }

    fn image(id: &str, tags: &[&str], age_days: i64) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: now() - Duration::days(age_days),
            size_bytes: 1_000_000,
            labels: BTreeMap::new(),
        }
    }

    fn policy(days: i64, patterns: &[&str]) -> RetentionPolicy {
        RetentionPolicy {
            age_threshold: Duration::days(days),
            excluded_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            dry_run: false,
        }
    }

    #[test]
    fn reference_scenario() {
        let images = vec![
            image("A", &["dev-1"], 45),
            image("B", &["prod-1"], 45),
            image("C", &[], 5),
        ];
        let decisions = evaluate(&images, &policy(30, &["prod-*"]), now());
        assert_eq!(decisions[0], Decision::delete());
        assert_eq!(decisions[1], Decision::keep(Reason::MatchedExclusion));
        assert_eq!(decisions[2], Decision::keep(Reason::TooYoung));
    }

    #[test]
    fn young_images_are_too_young_even_when_excluded() {
        let img = image("X", &["prod-1"], 1);
        let d = decide(&img, &policy(30, &["prod-*"]), now());
        assert_eq!(d, Decision::keep(Reason::TooYoung));
    }

    #[test]
    fn threshold_boundary_is_exclusive() {
        let exactly = image("X", &["dev"], 30);
        assert_eq!(
            decide(&exactly, &policy(30, &[]), now()).action,
            Action::Delete
        );

        let mut just_under = image("Y", &["dev"], 30);
        just_under.created_at += Duration::seconds(1);
        assert_eq!(
            decide(&just_under, &policy(30, &[]), now()),
            Decision::keep(Reason::TooYoung)
        );
    }

    #[test]
    fn zero_threshold_protects_only_future_images() {
        let fresh = image("X", &["dev"], 0);
        assert_eq!(decide(&fresh, &policy(0, &[]), now()).action, Action::Delete);

        let future = image("Y", &["dev"], -1);
        assert_eq!(
            decide(&future, &policy(0, &[]), now()),
            Decision::keep(Reason::TooYoung)
        );
    }

    #[test]
    fn untagged_images_are_matched_by_id() {
        let img = image("sha256:deadbeef0001", &[], 90);
        assert!(decide(&img, &policy(30, &[]), now()).is_delete());
        assert_eq!(
            decide(&img, &policy(30, &["sha256:dead*"]), now()),
            Decision::keep(Reason::MatchedExclusion)
        );
        assert_eq!(
            decide(&img, &policy(30, &["deadbeef*"]), now()),
            Decision::keep(Reason::MatchedExclusion)
        );
    }

    #[test]
    fn any_tag_matching_protects_the_image() {
        let img = image("Z", &["dev-1", "release-2"], 90);
        assert_eq!(
            decide(&img, &policy(30, &["release-*"]), now()),
            Decision::keep(Reason::MatchedExclusion)
        );
    }

    #[test]
    fn evaluation_is_deterministic_and_keeps_order() {
        let images = vec![
            image("C", &[], 100),
            image("A", &["x"], 100),
            image("A", &["x"], 100),
        ];
        let p = policy(7, &["x"]);
        let first = evaluate(&images, &p, now());
        let second = evaluate(&images, &p, now());
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert!(first[0].is_delete());
        assert_eq!(first[1], Decision::keep(Reason::MatchedExclusion));
        assert_eq!(first[2], Decision::keep(Reason::MatchedExclusion));
    }
}
