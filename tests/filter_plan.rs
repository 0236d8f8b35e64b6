// tests/filter_plan.rs

//! Filter chain behavior over realistic metadata: determinism of the
//! planned file set, and the allow/deny scenarios.

mod common;

use common::{build_context, peerme_metadata};
use wheelhouse::filters::FilterDecision;
use wheelhouse::model::{ProjectMetadata, Release};

/// Render the planned file set as a canonical string for comparison
fn plan_fingerprint(kept: &[Release]) -> String {
    let mut lines: Vec<String> = kept
        .iter()
        .flat_map(|r| {
            r.files
                .iter()
                .map(move |f| format!("{}\t{}\t{}", r.version, f.filename, f.digests.sha256))
        })
        .collect();
    lines.sort();
    lines.join("\n")
}

#[test]
fn test_filter_determinism() {
    // Identical configuration plus identical upstream JSON must plan a
    // byte-identical file set, run after run.
    let temp = tempfile::tempdir().unwrap();
    let extra = "[plugins]\nenabled = allowlist_project\n    prerelease_release\n\
                 [allowlist]\npackages = peerme\n";

    let mut fingerprints = Vec::new();
    for _ in 0..3 {
        let ctx = build_context(temp.path(), extra);
        let metadata = ProjectMetadata::from_value(&peerme_metadata()).unwrap();
        assert_eq!(
            ctx.filters.filter_project(&metadata),
            FilterDecision::Keep
        );
        let mut kept = ctx.filters.filter_releases(
            "peerme",
            Some(&metadata.info.version),
            metadata.to_releases(),
        );
        for release in &mut kept {
            release
                .files
                .retain(|f| ctx.filters.filter_file("peerme", f) == FilterDecision::Keep);
        }
        fingerprints.push(plan_fingerprint(&kept));
    }
    assert!(!fingerprints[0].is_empty());
    assert_eq!(fingerprints[0], fingerprints[1]);
    assert_eq!(fingerprints[1], fingerprints[2]);
}

#[test]
fn test_allowlist_drops_other_projects() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = build_context(
        temp.path(),
        "[plugins]\nenabled = allowlist_project\n[allowlist]\npackages = peerme\n",
    );

    let peerme = ProjectMetadata::from_value(&peerme_metadata()).unwrap();
    assert_eq!(ctx.filters.filter_project(&peerme), FilterDecision::Keep);

    let mut other = peerme_metadata();
    other["info"]["name"] = serde_json::json!("pyaib");
    let other = ProjectMetadata::from_value(&other).unwrap();
    assert_eq!(
        ctx.filters.filter_project(&other),
        FilterDecision::DropProject
    );
}

#[test]
fn test_blocklist_scenario() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = build_context(
        temp.path(),
        "[plugins]\nenabled = blocklist_project\n[blocklist]\npackages = pyaib\n",
    );

    let mut blocked = peerme_metadata();
    blocked["info"]["name"] = serde_json::json!("pyaib");
    let blocked = ProjectMetadata::from_value(&blocked).unwrap();
    assert_eq!(
        ctx.filters.filter_project(&blocked),
        FilterDecision::DropProject
    );

    let peerme = ProjectMetadata::from_value(&peerme_metadata()).unwrap();
    assert_eq!(ctx.filters.filter_project(&peerme), FilterDecision::Keep);
}

#[test]
fn test_size_cap_combined_with_allowlist() {
    // max_package_size=1G with an allowlisted numpy: a 5 GB tensorflow
    // is skipped, a 2 GB numpy is mirrored.
    let temp = tempfile::tempdir().unwrap();
    let ctx = build_context(
        temp.path(),
        "[plugins]\nenabled = size_project_metadata\n\
         [size_project_metadata]\nmax_package_size = 1G\n\
         [allowlist]\npackages = numpy\n",
    );

    let sized = |name: &str, size: u64| {
        let mut doc = peerme_metadata();
        doc["info"]["name"] = serde_json::json!(name);
        doc["releases"]["1.0.0"][0]["size"] = serde_json::json!(size);
        doc["releases"]["0.9.0"][0]["size"] = serde_json::json!(0);
        ProjectMetadata::from_value(&doc).unwrap()
    };

    assert_eq!(
        ctx.filters.filter_project(&sized("tensorflow", 5_000_000_000)),
        FilterDecision::DropProject
    );
    assert_eq!(
        ctx.filters.filter_project(&sized("numpy", 2_000_000_000)),
        FilterDecision::Keep
    );
    assert_eq!(
        ctx.filters.filter_project(&sized("small", 1_000_000)),
        FilterDecision::Keep
    );
}

#[test]
fn test_prerelease_and_latest_combination() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = build_context(
        temp.path(),
        "[plugins]\nenabled = prerelease_release\n    latest_release\n\
         [latest_release]\nkeep = 1\n",
    );

    let mut doc = peerme_metadata();
    doc["releases"]["2.0.0a1"] = doc["releases"]["0.9.0"].clone();
    let metadata = ProjectMetadata::from_value(&doc).unwrap();

    let kept = ctx.filters.filter_releases(
        "peerme",
        Some("1.0.0"),
        metadata.to_releases(),
    );
    // Pre-release dropped first, then latest-1 keeps only 1.0.0
    let versions: Vec<&str> = kept.iter().map(|r| r.version.as_str()).collect();
    assert_eq!(versions, vec!["1.0.0"]);
}

#[test]
fn test_platform_exclusion_keeps_sdist() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = build_context(
        temp.path(),
        "[plugins]\nenabled = exclude_platform\n[blocklist]\nplatforms = windows\n",
    );

    let metadata = ProjectMetadata::from_value(&peerme_metadata()).unwrap();
    for file in metadata.release_files() {
        // Neither fixture file is a Windows artifact
        assert_eq!(
            ctx.filters.filter_file("peerme", file),
            FilterDecision::Keep
        );
    }
}
