// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the trust collection client against an in-process
//! trust server: initialize, sign, publish, list, and verify, including the
//! key-reuse behavior across consecutive signs.

use aws_lc_rs::rand::SystemRandom;
use httptest::{matchers::*, responders::*, Expectation, Server};
use signy::editor::signed::SignedRole;
use signy::intoto::Metadata;
use signy::schema::{
    Hashes, RoleName, Root, Signed, Snapshot, SnapshotMeta, Target, Targets, Timestamp,
};
use signy::sign::{cleartext_pem, generate_ecdsa_key, parse_keypair, Sign, SignKeyPair};
use signy::verify;
use signy::{Reference, StagedTarget, TransportSettings, TrustCollection};
use std::collections::HashMap;
use std::fs;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const GUN: &str = "example.com/demo";
const ARTIFACT: &[u8] = b"hello\n";

fn set_passphrases() {
    std::env::set_var(signy::ROOT_PASSPHRASE_VAR, "root passphrase");
    std::env::set_var(signy::TARGETS_PASSPHRASE_VAR, "targets passphrase");
    std::env::set_var(signy::RELEASES_PASSPHRASE_VAR, "releases passphrase");
}

fn server_keypair() -> SignKeyPair {
    let rng = SystemRandom::new();
    let der = generate_ecdsa_key(&rng).unwrap();
    parse_keypair(cleartext_pem(&der).as_bytes(), None).unwrap()
}

fn tuf_path(file: &str) -> String {
    format!("/v2/{}/_trust/tuf/{}", GUN, file)
}

/// Builds the in-toto fixture (layout, key, two links) and the staged
/// targets for one artifact tag.
fn staged_targets(fixture_dir: &Path, tag: &str) -> (Vec<StagedTarget>, Metadata) {
    let layout = fixture_dir.join("root.layout");
    let key = fixture_dir.join("alice.pub");
    fs::write(&layout, br#"{"signatures": [], "signed": {"_type": "layout"}}"#).unwrap();
    fs::write(&key, b"-----BEGIN PUBLIC KEY-----\nMFkw\n-----END PUBLIC KEY-----\n").unwrap();
    fs::write(fixture_dir.join("build.link"), b"build link data").unwrap();
    fs::write(fixture_dir.join("package.link"), b"package link data").unwrap();

    let metadata = Metadata::from_paths(&layout, fixture_dir, &key).unwrap();
    let custom = metadata.to_custom().unwrap();

    let mut staged = vec![StagedTarget {
        role: RoleName::Releases,
        name: format!("{}:{}", GUN, tag),
        target: Target::from_bytes(ARTIFACT, Some(custom)),
    }];
    for (name, content) in &metadata.links {
        staged.push(StagedTarget {
            role: RoleName::Releases,
            name: format!("{}/in-toto-links/{}", GUN, name),
            target: Target::from_bytes(content.as_ref(), None),
        });
    }
    (staged, metadata)
}

/// Signs snapshot and timestamp the way the trust server would, from the
/// client-published metadata in the cache.
fn serve_server_roles(
    server: &Server,
    metadata_dir: &Path,
    snapshot_key: &SignKeyPair,
    timestamp_key: &SignKeyPair,
) {
    let rng = SystemRandom::new();
    let one = NonZeroU64::new(1).unwrap();
    let expires = chrono::Utc::now() + chrono::Duration::days(14);

    let mut meta = HashMap::new();
    for role in [RoleName::Targets, RoleName::Releases] {
        let bytes = fs::read(metadata_dir.join(role.filename())).unwrap();
        let digest = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, &bytes);
        meta.insert(
            role.filename(),
            SnapshotMeta {
                length: Some(bytes.len() as u64),
                hashes: Some(Hashes {
                    sha256: digest.as_ref().to_vec().into(),
                    sha512: None,
                    _extra: HashMap::new(),
                }),
                version: one,
                _extra: HashMap::new(),
            },
        );
        server.expect(
            Expectation::matching(request::method_path("GET", tuf_path(&role.filename())))
                .times(0..)
                .respond_with(status_code(200).body(bytes)),
        );
    }

    let snapshot = Snapshot {
        spec_version: "1.0.0".to_owned(),
        version: one,
        expires,
        meta,
        _extra: HashMap::new(),
    };
    let signed_snapshot = SignedRole::new(snapshot, snapshot_key, &rng).unwrap();

    let snapshot_digest =
        aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, signed_snapshot.buffer());
    let mut timestamp_meta = HashMap::new();
    timestamp_meta.insert(
        RoleName::Snapshot.filename(),
        SnapshotMeta {
            length: Some(signed_snapshot.buffer().len() as u64),
            hashes: Some(Hashes {
                sha256: snapshot_digest.as_ref().to_vec().into(),
                sha512: None,
                _extra: HashMap::new(),
            }),
            version: one,
            _extra: HashMap::new(),
        },
    );
    let timestamp = Timestamp {
        spec_version: "1.0.0".to_owned(),
        version: one,
        expires,
        meta: timestamp_meta,
        _extra: HashMap::new(),
    };
    let signed_timestamp = SignedRole::new(timestamp, timestamp_key, &rng).unwrap();

    for (role, buffer) in [
        (RoleName::Snapshot, signed_snapshot.buffer().to_vec()),
        (RoleName::Timestamp, signed_timestamp.buffer().to_vec()),
    ] {
        server.expect(
            Expectation::matching(request::method_path("GET", tuf_path(&role.filename())))
                .times(0..)
                .respond_with(status_code(200).body(buffer)),
        );
    }
}

#[test]
fn sign_publish_list_verify_and_reuse_keys() {
    set_passphrases();
    let trust_dir = TempDir::new().unwrap();
    let fixture_dir = TempDir::new().unwrap();
    let server = Server::run();

    let snapshot_key = server_keypair();
    let timestamp_key = server_keypair();

    // Transport ping, for every client we open.
    server.expect(
        Expectation::matching(request::method_path("GET", "/v2/"))
            .times(1..)
            .respond_with(status_code(200)),
    );
    // The collection does not exist yet.
    server.expect(
        Expectation::matching(request::method_path("GET", tuf_path("root.json")))
            .times(1)
            .respond_with(status_code(404)),
    );
    // Server-managed role keys, fetched during initialization.
    server.expect(
        Expectation::matching(request::method_path("GET", tuf_path("snapshot.key")))
            .times(1)
            .respond_with(json_encoded(
                serde_json::to_value(snapshot_key.public_key()).unwrap(),
            )),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", tuf_path("timestamp.key")))
            .times(1)
            .respond_with(json_encoded(
                serde_json::to_value(timestamp_key.public_key()).unwrap(),
            )),
    );
    // Publishes.
    server.expect(
        Expectation::matching(request::method_path("POST", tuf_path("")))
            .times(1..)
            .respond_with(status_code(200)),
    );

    let settings = TransportSettings::new(&server.url_str("/"));
    let collection = TrustCollection::open(&settings, trust_dir.path(), GUN).unwrap();

    let (staged, metadata) = staged_targets(fixture_dir.path(), "v1");
    collection.sign_and_publish(None, &staged).unwrap();

    // The published metadata verifies against its own root.
    let metadata_dir = trust_dir.path().join("tuf").join(GUN).join("metadata");
    let root: Signed<Root> =
        serde_json::from_slice(&fs::read(metadata_dir.join("root.json")).unwrap()).unwrap();
    root.signed.verify_role(&root).unwrap();

    let targets: Signed<Targets> =
        serde_json::from_slice(&fs::read(metadata_dir.join("targets.json")).unwrap()).unwrap();
    root.signed.verify_role(&targets).unwrap();
    let delegations = targets.signed.delegations.as_ref().unwrap();
    let releases: Signed<Targets> = serde_json::from_slice(
        &fs::read(metadata_dir.join("targets/releases.json")).unwrap(),
    )
    .unwrap();
    delegations
        .verify_role(&RoleName::Releases.to_string(), &releases)
        .unwrap();

    // The delegation restricts exactly the tag and link namespaces.
    let delegated = targets
        .signed
        .delegated_role(&RoleName::Releases.to_string())
        .unwrap();
    assert_eq!(
        delegated.paths,
        vec![format!("{}:", GUN), format!("{}/in-toto-links/", GUN)],
    );

    // Each staged target landed under targets/releases with bound hashes.
    assert_eq!(releases.signed.targets.len(), 3);
    let bundle = &releases.signed.targets[&format!("{}:v1", GUN)];
    assert_eq!(bundle.length, ARTIFACT.len() as u64);
    assert_eq!(
        bundle.sha256_hex(),
        "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03",
    );
    for (name, content) in &metadata.links {
        let link = &releases.signed.targets[&format!("{}/in-toto-links/{}", GUN, name)];
        assert_eq!(link.length, content.as_ref().len() as u64);
    }

    // The change list is empty after a successful sign.
    let changelist_dir = trust_dir.path().join("tuf").join(GUN).join("changelist");
    assert_eq!(fs::read_dir(&changelist_dir).unwrap().count(), 0);

    // Let the "server" sign snapshot and timestamp over what was published,
    // then drive the pull path.
    serve_server_roles(&server, &metadata_dir, &snapshot_key, &timestamp_key);

    let listing = collection.list_targets().unwrap();
    assert_eq!(listing.len(), 3);
    assert!(listing
        .iter()
        .all(|entry| entry.role == RoleName::Releases));

    // Sign then verify with the same inputs reports equal digests.
    let reference = Reference::parse(&format!("{}:v1", GUN)).unwrap();
    let (fetched, trusted_sha) = verify::fetch_target(&collection, &reference).unwrap();
    assert_eq!(fetched.role, RoleName::Releases);
    verify::check_artifact_digest(ARTIFACT, &trusted_sha).unwrap();

    // A tampered artifact is rejected with both digests reported.
    let err = verify::check_artifact_digest(b"goodbye\n", &trusted_sha).unwrap_err();
    assert!(err
        .to_string()
        .contains("is not equal to the computed digest"));

    // The published in-toto metadata passes the pre-engine integrity check.
    verify::verify_intoto_metadata(&collection).unwrap();

    // Second sign under the same GUN: keys are reused, not re-created.
    let collection_two = TrustCollection::open(&settings, trust_dir.path(), GUN).unwrap();
    let (staged_two, _) = staged_targets(fixture_dir.path(), "v2");
    collection_two.sign_and_publish(None, &staged_two).unwrap();

    let store = collection_two.key_store();
    assert_eq!(store.list_keys(RoleName::Targets).unwrap().len(), 1);
    assert_eq!(store.list_keys(RoleName::Releases).unwrap().len(), 1);
    assert_eq!(store.list_keys(RoleName::Root).unwrap().len(), 1);

    // The re-published targets role still lists exactly one key id.
    let root_after: Signed<Root> =
        serde_json::from_slice(&fs::read(metadata_dir.join("root.json")).unwrap()).unwrap();
    let targets_keys = &root_after.signed.roles[&RoleName::Targets].keyids;
    assert_eq!(targets_keys.len(), 1);

    // The second edit bumped the client-signed role versions.
    let releases_after: Signed<Targets> = serde_json::from_slice(
        &fs::read(metadata_dir.join("targets/releases.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(releases_after.signed.version.get(), 2);
    assert!(releases_after
        .signed
        .targets
        .contains_key(&format!("{}:v2", GUN)));
}

#[test]
fn staging_outside_delegation_paths_is_rejected() {
    set_passphrases();
    let trust_dir = TempDir::new().unwrap();
    let server = Server::run();

    server.expect(
        Expectation::matching(request::method_path("GET", "/v2/"))
            .times(1)
            .respond_with(status_code(200)),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", tuf_path("root.json")))
            .times(1)
            .respond_with(status_code(404)),
    );
    let snapshot_key = server_keypair();
    let timestamp_key = server_keypair();
    server.expect(
        Expectation::matching(request::method_path("GET", tuf_path("snapshot.key")))
            .times(1)
            .respond_with(json_encoded(
                serde_json::to_value(snapshot_key.public_key()).unwrap(),
            )),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", tuf_path("timestamp.key")))
            .times(1)
            .respond_with(json_encoded(
                serde_json::to_value(timestamp_key.public_key()).unwrap(),
            )),
    );

    let settings = TransportSettings::new(&server.url_str("/"));
    let collection = TrustCollection::open(&settings, trust_dir.path(), GUN).unwrap();

    let staged = vec![StagedTarget {
        role: RoleName::Releases,
        name: format!("{}/evil.layout", GUN),
        target: Target::from_bytes(b"evil", None),
    }];
    let err = collection.sign_and_publish(None, &staged).unwrap_err();
    assert!(err.to_string().contains("does not match"));

    // A failed sign leaves the change list empty.
    let changelist_dir = trust_dir.path().join("tuf").join(GUN).join("changelist");
    assert_eq!(fs::read_dir(&changelist_dir).unwrap().count(), 0);
}

#[test]
fn extra_workspace_files_are_staged_for_the_engine() {
    // Exercises the workspace half of the verifier driver without a
    // container runtime: unpack a blob, stage an extra target, keep the
    // workspace, and check the staged file set.
    let fixture_dir = TempDir::new().unwrap();
    let (staged, _) = staged_targets(fixture_dir.path(), "v1");
    let bundle = staged.into_iter().next().unwrap();

    let extra = fixture_dir.path().join("extra-target.txt");
    fs::write(&extra, b"inspect me").unwrap();

    let custom = bundle.target.custom.clone().unwrap();
    let metadata = Metadata::from_custom(&custom).unwrap();

    let workspace = verify::Workspace::create(true).unwrap();
    metadata.write_files(workspace.path()).unwrap();
    fs::write(workspace.path().join("bundle.json"), ARTIFACT).unwrap();
    fs::copy(&extra, workspace.path().join("extra-target.txt")).unwrap();

    let mut names: Vec<String> = fs::read_dir(workspace.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "build.link",
            "bundle.json",
            "extra-target.txt",
            "key.pub",
            "layout.template",
            "package.link",
        ],
    );

    let path: PathBuf = workspace.path().to_owned();
    drop(workspace);
    assert!(path.exists());
    fs::remove_dir_all(path).unwrap();
}
