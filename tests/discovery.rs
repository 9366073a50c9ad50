mod common;

use std::{collections::BTreeMap, fs, path::Path, time::Duration};

use common::{write_private_key, FakeAgent, FakeGit, FakePlatform, FakeRunner};
use gitpersona::{
    account::Platform,
    discovery::{AccountDiscoveryEngine, Candidate, DiscoveryPaths},
    platform::{PlatformClient, PlatformSession, PlatformUser},
    ssh::IdentityAgent,
    storage::ConfigStore,
    switch::SwitchCoordinator,
};

const GPG_LISTING: &str = "\
sec:u:255:22:ABCDEF1234567890:1700000000:::u:::scESC:::+:::ed25519:::0:
fpr:::::::::0123456789ABCDEF0123456789ABCDEF12345678:
uid:u::::1700000000::0A1B2C3D::Mona <mona@gmail.com>::::::::::0:
ssb:u:255:18:1111222233334444:1700000000::::::e:::+:::cv25519::
";

fn runner() -> FakeRunner {
    FakeRunner::default()
        .respond("git config --global --get user.name", 0, "Mona\n")
        .respond("git config --global --get user.email", 0, "mona@gmail.com\n")
        .respond("gpg --list-secret-keys --with-colons", 0, GPG_LISTING)
}

fn github_session() -> FakePlatform {
    let mut github = FakePlatform::github();
    github.session = Some(PlatformSession {
        host: "github.com".to_string(),
        username: "octocat".to_string(),
        scopes: vec!["repo".to_string(), "user".to_string()],
        active: true,
    });
    github.users = BTreeMap::from([(
        "octocat".to_string(),
        PlatformUser {
            username: "octocat".to_string(),
            name: Some("Mona".to_string()),
            email: Some("mona@gmail.com".to_string()),
        },
    )]);
    github
}

/// Home with one work config, one half-filled config and one named key
fn populate_home(home: &Path) {
    let ssh = home.join(".ssh");
    write_private_key(&ssh.join("id_ed25519_octocat"));
    fs::write(ssh.join("id_ed25519_octocat.pub"), "ssh-ed25519 AAAA mona").unwrap();
    write_private_key(&ssh.join("work_key"));
    fs::write(ssh.join("known_hosts"), "github.com ssh-ed25519 AAAA").unwrap();

    fs::write(
        home.join(".gitconfig-work"),
        "[user]\n\tname = Work Dev\n\temail = dev@acme-corp.com\n[core]\n\tsshCommand = ssh -i ~/.ssh/work_key -o IdentitiesOnly=yes\n",
    )
    .unwrap();
    fs::write(home.join(".gitconfig_scratch"), "[user]\n\temail = tmp@example.org\n").unwrap();
}

fn scan(home: &Path, runner: &FakeRunner, github: &FakePlatform) -> Vec<Candidate> {
    let platforms: Vec<&dyn PlatformClient> = vec![github];
    AccountDiscoveryEngine::new(DiscoveryPaths::new(home, home.join(".ssh")), runner, platforms).scan()
}

#[test]
fn scan_merges_sources_into_one_identity() {
    let home = tempfile::tempdir().unwrap();
    populate_home(home.path());
    let runner = runner();
    let github = github_session();

    let candidates = scan(home.path(), &runner, &github);
    let aliases: Vec<&str> = candidates.iter().map(|c| c.alias.as_str()).collect();
    assert_eq!(aliases, ["octocat", "work", "scratch"]);

    let octocat = &candidates[0];
    assert_eq!(octocat.confidence, 8);
    assert_eq!(octocat.display_name, "Mona");
    assert_eq!(octocat.username, "octocat");
    assert_eq!(octocat.platform(), Platform::Github);
    assert_eq!(octocat.gpg_key_id.as_deref(), Some("ABCDEF1234567890"));
    assert_eq!(octocat.source_tag(), "gh-cli+git-global+gpg+ssh-key");
    assert_eq!(
        octocat.ssh_key_path.as_deref(),
        Some(home.path().join(".ssh").join("id_ed25519_octocat").as_path())
    );

    let work = &candidates[1];
    assert_eq!(work.confidence, 6);
    assert_eq!(work.platform(), Platform::GithubEnterprise);
    assert_eq!(work.ssh_key_path.as_deref(), Some(home.path().join(".ssh/work_key").as_path()));
}

#[test]
fn scan_survives_missing_tools_and_directories() {
    let home = tempfile::tempdir().unwrap();
    let runner = FakeRunner::default();
    let github = FakePlatform::github();

    assert!(scan(home.path(), &runner, &github).is_empty());
}

#[test]
fn import_applies_policy_and_saves_once() {
    let home = tempfile::tempdir().unwrap();
    populate_home(home.path());
    let runner = runner();
    let github = github_session();
    let candidates = scan(home.path(), &runner, &github);

    let config_path = home.path().join(".gitpersona").join("config.json");
    let mut store = ConfigStore::open(&config_path).unwrap();
    let git = FakeGit::default();
    let agent = FakeAgent::default();
    let mut coordinator = SwitchCoordinator::new(
        &mut store,
        &git,
        IdentityAgent::new(&agent, vec![Duration::ZERO]),
        vec![],
    );

    let report = coordinator.import_candidates(&candidates, false, false).unwrap();
    assert_eq!(report.imported, ["octocat", "work"]);
    assert!(report.pending.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, "scratch");

    let reloaded = ConfigStore::open(&config_path).unwrap();
    let octocat = reloaded.get_account("octocat").unwrap();
    assert_eq!(octocat.email, "mona@gmail.com");
    assert_eq!(octocat.gpg_key_id.as_deref(), Some("ABCDEF1234567890"));
    assert!(!octocat.gpg_enabled);
    assert_eq!(reloaded.get_account("work").unwrap().platform, Platform::GithubEnterprise);

    let again = coordinator.import_candidates(&candidates, false, false).unwrap();
    assert!(again.imported.is_empty());
    assert!(again
        .skipped
        .iter()
        .any(|(alias, reasons)| alias == "octocat" && reasons[0].contains("already configured")));
}

#[test]
fn dry_run_reports_without_writing() {
    let home = tempfile::tempdir().unwrap();
    populate_home(home.path());
    let runner = runner();
    let github = github_session();
    let candidates = scan(home.path(), &runner, &github);

    let config_path = home.path().join("config.json");
    let mut store = ConfigStore::open(&config_path).unwrap();
    let git = FakeGit::default();
    let agent = FakeAgent::default();
    let mut coordinator = SwitchCoordinator::new(
        &mut store,
        &git,
        IdentityAgent::new(&agent, vec![Duration::ZERO]),
        vec![],
    );

    let report = coordinator.import_candidates(&candidates, true, true).unwrap();
    assert!(report.dry_run);
    assert!(report.imported.is_empty());
    assert_eq!(report.pending, ["octocat", "work"]);
    assert!(!config_path.exists());
    assert!(coordinator.store().list_pending_accounts().is_empty());
}

#[test]
fn username_only_candidate_becomes_pending_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    let mut store = ConfigStore::open(&config_path).unwrap();
    let git = FakeGit::default();
    let agent = FakeAgent::default();

    let mut candidate = Candidate::new("hubot", "ssh-key", 9);
    candidate.username = "hubot".to_string();
    candidate.ssh_key_path = Some(dir.path().join("id_ed25519_hubot"));

    let mut coordinator = SwitchCoordinator::new(
        &mut store,
        &git,
        IdentityAgent::new(&agent, vec![Duration::ZERO]),
        vec![],
    );
    let report = coordinator.import_candidates(&[candidate], false, false).unwrap();
    assert_eq!(report.pending, ["hubot"]);
    drop(coordinator);

    let mut reloaded = ConfigStore::open(&config_path).unwrap();
    let pending = reloaded.get_pending_account("hubot").unwrap();
    assert_eq!(pending.discovery_source, "ssh-key");
    assert_eq!(pending.missing_fields.len(), 2);

    let account = reloaded
        .complete_pending_account("hubot", "Hubot", "hubot@github.com")
        .unwrap();
    assert_eq!(account.username, "hubot");
    assert_eq!(account.ssh_key_path, Some(dir.path().join("id_ed25519_hubot")));
    assert!(reloaded.list_pending_accounts().is_empty());
}
