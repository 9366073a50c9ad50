mod common;

use std::{fs, path::PathBuf, time::Duration};

use common::{account_with_key, write_private_key, FakeAgent, FakeGit, FakePlatform};
use gitpersona::{
    error::AppError,
    git::{SSH_COMMAND, USER_EMAIL, USER_NAME},
    platform::PlatformClient,
    ssh::IdentityAgent,
    storage::ConfigStore,
    switch::{SwitchCoordinator, SwitchOptions, SwitchState, WarningCode},
};
use tempfile::TempDir;

fn backoff() -> Vec<Duration> {
    vec![Duration::ZERO; 3]
}

/// Saved store holding `work`, whose key exists on disk when `key_exists`
fn setup(key_exists: bool) -> (TempDir, ConfigStore, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let key = dir.path().join(".ssh").join("id_ed25519_work");
    if key_exists {
        write_private_key(&key);
    }
    let mut store = ConfigStore::open(dir.path().join("config.json")).unwrap();
    store
        .add_account(account_with_key("work", Some(key.clone())), false)
        .unwrap();
    store
        .add_account(account_with_key("personal", None), false)
        .unwrap();
    store.save().unwrap();
    (dir, store, key)
}

#[test]
fn missing_key_file_fails_without_force() {
    let (_dir, mut store, _key) = setup(false);
    let git = FakeGit::default();
    let agent = FakeAgent::default();

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let err = coordinator.switch("work", SwitchOptions::default()).unwrap_err();
    assert!(matches!(err, AppError::SshKeyNotFound { ref alias, .. } if alias == "work"));
    assert_eq!(coordinator.state(), SwitchState::Failed);
    assert_eq!(
        coordinator.trail(),
        [SwitchState::Idle, SwitchState::Validating, SwitchState::Failed]
    );

    assert_eq!(store.current_alias(), None);
    assert_eq!(store.reload_current().unwrap(), None);
    assert!(git.global.borrow().is_empty());
}

#[test]
fn missing_key_file_is_a_warning_with_force() {
    let (_dir, mut store, key) = setup(false);
    let git = FakeGit::default();
    let agent = FakeAgent::with_loaded(&["/other/key"]);

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let report = coordinator
        .switch(
            "work",
            SwitchOptions {
                force: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(report.state, SwitchState::Done);
    let warning = report
        .warnings
        .iter()
        .find(|w| w.code == WarningCode::SshKeyNotFound)
        .unwrap();
    assert!(warning.message.contains(&key.display().to_string()));

    assert_eq!(store.reload_current().unwrap().as_deref(), Some("work"));
    assert_eq!(git.global(USER_NAME).as_deref(), Some("A"));
    assert_eq!(git.global(SSH_COMMAND), None);
    assert!(agent.loaded.borrow().is_empty());
}

#[test]
fn successful_switch_leaves_exactly_the_target_key() {
    let (_dir, mut store, key) = setup(true);
    let git = FakeGit {
        work_tree: true,
        ..Default::default()
    };
    let agent = FakeAgent::with_loaded(&["/home/a/.ssh/id_rsa", "/home/a/.ssh/id_other"]);

    let identity = IdentityAgent::new(&agent, backoff());
    let mut coordinator = SwitchCoordinator::new(&mut store, &git, identity, vec![]);
    let report = coordinator.switch("work", SwitchOptions::default()).unwrap();

    assert_eq!(
        report.trail,
        [
            SwitchState::Idle,
            SwitchState::Validating,
            SwitchState::Applying,
            SwitchState::Verifying,
            SwitchState::Done
        ]
    );
    assert_eq!(report.probe_attempts, Some(1));
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.summary.unwrap().alias, "work");

    let loaded = IdentityAgent::new(&agent, backoff()).list_loaded().unwrap();
    assert_eq!(loaded, vec![key.display().to_string()]);

    let command = git.global(SSH_COMMAND).unwrap();
    assert!(command.contains("IdentitiesOnly=yes"));
    assert!(command.contains(&key.display().to_string()));
    assert_eq!(git.local.borrow().get(SSH_COMMAND), Some(&command));
    assert_eq!(git.global(USER_EMAIL).as_deref(), Some("a@co.com"));
    assert!(store.get_account("work").unwrap().last_used.is_some());
}

#[test]
fn switching_twice_is_idempotent() {
    let (_dir, mut store, key) = setup(true);
    let git = FakeGit::default();
    let agent = FakeAgent::default();

    for _ in 0..2 {
        let mut coordinator =
            SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
        let report = coordinator.switch("work", SwitchOptions::default()).unwrap();
        assert_eq!(report.state, SwitchState::Done);
        assert_eq!(store.reload_current().unwrap().as_deref(), Some("work"));
        assert_eq!(*agent.loaded.borrow(), vec![key.clone()]);
    }
}

#[test]
fn account_without_key_warns_and_clears_override() {
    let (_dir, mut store, _key) = setup(true);
    let git = FakeGit::default();
    git.set_global_raw(SSH_COMMAND, "ssh -i '/old' -o IdentitiesOnly=yes");
    let agent = FakeAgent::default();

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let report = coordinator.switch("personal", SwitchOptions::default()).unwrap();

    assert_eq!(report.state, SwitchState::Done);
    assert!(report.warnings.iter().any(|w| w.code == WarningCode::MissingSshKey));
    assert_eq!(git.global(SSH_COMMAND), None);
    assert_eq!(agent.probes.get(), 0);
}

#[test]
fn probe_failure_is_fatal_unless_forced() {
    let (_dir, mut store, _key) = setup(true);
    let git = FakeGit::default();
    let agent = FakeAgent::failing_probes(3);

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let err = coordinator.switch("work", SwitchOptions::default()).unwrap_err();
    assert!(matches!(err, AppError::SshValidationFailed { ref host, .. } if host == "github.com"));
    assert_eq!(agent.probes.get(), 3);
    assert_eq!(coordinator.state(), SwitchState::Failed);
    drop(coordinator);
    assert_eq!(store.reload_current().unwrap(), None);

    let agent = FakeAgent::failing_probes(3);
    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let report = coordinator
        .switch(
            "work",
            SwitchOptions {
                force: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(report.state, SwitchState::Done);
    assert!(report.warnings.iter().any(|w| w.code == WarningCode::SshValidationFailed));
}

#[test]
fn probe_recovers_within_backoff() {
    let (_dir, mut store, _key) = setup(true);
    let git = FakeGit::default();
    let agent = FakeAgent::failing_probes(2);

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let report = coordinator.switch("work", SwitchOptions::default()).unwrap();
    assert_eq!(report.probe_attempts, Some(3));
}

#[test]
fn validate_only_never_mutates() {
    let (_dir, mut store, _key) = setup(true);
    let git = FakeGit::default();
    let agent = FakeAgent::with_loaded(&["/other/key"]);

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let report = coordinator.validate_only("work").unwrap();
    assert_eq!(report.trail, [SwitchState::Idle, SwitchState::Validating]);
    assert_eq!(report.summary, None);
    assert_eq!(agent.probes.get(), 1);

    assert_eq!(store.reload_current().unwrap(), None);
    assert!(git.global.borrow().is_empty());
    assert_eq!(*agent.loaded.borrow(), vec![PathBuf::from("/other/key")]);
}

#[test]
fn skip_validation_does_not_probe() {
    let (_dir, mut store, _key) = setup(true);
    let git = FakeGit::default();
    let agent = FakeAgent::failing_probes(3);

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let report = coordinator
        .switch(
            "work",
            SwitchOptions {
                skip_validation: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(report.state, SwitchState::Done);
    assert!(!report.trail.contains(&SwitchState::Validating));
    assert_eq!(agent.probes.get(), 0);
}

#[test]
fn skip_validation_still_refuses_missing_key() {
    let (_dir, mut store, _key) = setup(false);
    let git = FakeGit::default();
    let agent = FakeAgent::default();

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let opts = SwitchOptions {
        skip_validation: true,
        ..Default::default()
    };
    let err = coordinator.switch("work", opts).unwrap_err();
    assert!(matches!(err, AppError::SshKeyNotFound { .. }));
    assert_eq!(
        coordinator.trail(),
        [SwitchState::Idle, SwitchState::Validating, SwitchState::Failed]
    );
    assert!(git.global.borrow().is_empty());
}

#[test]
fn skip_validation_with_force_warns_about_missing_key() {
    let (_dir, mut store, key) = setup(false);
    let git = FakeGit::default();
    git.set_global_raw(SSH_COMMAND, "ssh -i '/old/work_key' -o IdentitiesOnly=yes");
    let agent = FakeAgent::with_loaded(&["/old/work_key"]);

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let opts = SwitchOptions {
        force: true,
        skip_validation: true,
        ..Default::default()
    };
    let report = coordinator.switch("work", opts).unwrap();

    assert_eq!(report.state, SwitchState::Done);
    assert!(!report.trail.contains(&SwitchState::Validating));
    let warning = report
        .warnings
        .iter()
        .find(|w| w.code == WarningCode::SshKeyNotFound)
        .unwrap();
    assert!(warning.message.contains(&key.display().to_string()));
    assert_eq!(git.global(SSH_COMMAND), None);
    assert!(agent.loaded.borrow().is_empty());
}

#[test]
fn keyless_switch_clears_repository_override() {
    let (_dir, mut store, _key) = setup(true);
    let git = FakeGit {
        work_tree: true,
        ..Default::default()
    };
    git.local
        .borrow_mut()
        .insert(SSH_COMMAND.to_string(), "ssh -i '/old/work_key' -o IdentitiesOnly=yes".to_string());
    let agent = FakeAgent::default();

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let report = coordinator.switch("personal", SwitchOptions::default()).unwrap();

    assert_eq!(report.state, SwitchState::Done);
    assert_eq!(git.effective(SSH_COMMAND), None);
    assert!(git.local.borrow().is_empty());
}

#[test]
fn unknown_alias_is_not_found() {
    let (_dir, mut store, _key) = setup(true);
    let git = FakeGit::default();
    let agent = FakeAgent::default();

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let err = coordinator.switch("ghost", SwitchOptions::default()).unwrap_err();
    assert!(matches!(err, AppError::AccountNotFound(ref a) if a == "ghost"));
    assert_eq!(
        coordinator.trail(),
        [SwitchState::Idle, SwitchState::Validating, SwitchState::Failed]
    );
}

#[test]
fn agent_errors_are_warnings() {
    let (_dir, mut store, _key) = setup(true);
    let git = FakeGit::default();
    let agent = FakeAgent {
        unavailable: true,
        ..Default::default()
    };

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let report = coordinator.switch("work", SwitchOptions::default()).unwrap();
    assert_eq!(report.state, SwitchState::Done);
    assert!(report.warnings.iter().any(|w| w.code == WarningCode::AgentUnavailable));
    assert!(git.global(SSH_COMMAND).is_some());
}

#[test]
fn git_write_failure_is_fatal() {
    let (_dir, mut store, _key) = setup(true);
    let git = FakeGit {
        fail_writes: true,
        ..Default::default()
    };
    let agent = FakeAgent::default();

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let err = coordinator.switch("work", SwitchOptions::default()).unwrap_err();
    assert!(matches!(err, AppError::GitCommand(_)));
    assert_eq!(coordinator.state(), SwitchState::Failed);
    assert!(coordinator.trail().contains(&SwitchState::Applying));
}

#[test]
fn concurrent_writer_fails_verification() {
    let (dir, mut store, _key) = setup(true);
    let config_path = dir.path().join("config.json");
    let git = FakeGit {
        on_write: Some(Box::new(move || {
            fs::write(&config_path, r#"{"accounts": [], "currentAccount": "intruder"}"#).unwrap();
        })),
        ..Default::default()
    };
    let agent = FakeAgent::default();

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), vec![]);
    let err = coordinator.switch("work", SwitchOptions::default()).unwrap_err();
    match err {
        AppError::SwitchVerificationFailed { expected, actual } => {
            assert_eq!(expected, "work");
            assert_eq!(actual, "intruder");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(coordinator.state(), SwitchState::Failed);
    assert!(coordinator.trail().contains(&SwitchState::Verifying));
}

#[test]
fn platform_session_and_token_files_follow_the_switch() {
    let (dir, mut store, _key) = setup(true);
    let env_file = dir.path().join("env");
    fs::write(&env_file, "export GH_TOKEN=gho_stale\nEDITOR=vim\n").unwrap();
    let git = FakeGit::default();
    let agent = FakeAgent::default();
    let github = FakePlatform::github();
    let platforms: Vec<&dyn PlatformClient> = vec![&github];

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), platforms)
        .with_token_env_files(vec![env_file.clone(), dir.path().join("absent.env")]);
    let report = coordinator.switch("work", SwitchOptions::default()).unwrap();

    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(*github.switched_to.borrow(), vec!["work-user".to_string()]);
    assert_eq!(
        fs::read_to_string(&env_file).unwrap(),
        "export GH_TOKEN=gho_fresh\nEDITOR=vim\n"
    );
}

#[test]
fn missing_token_is_only_a_warning() {
    let (dir, mut store, _key) = setup(true);
    let env_file = dir.path().join("env");
    fs::write(&env_file, "GITHUB_TOKEN=old\n").unwrap();
    let git = FakeGit::default();
    let agent = FakeAgent::default();
    let github = FakePlatform {
        token: None,
        ..FakePlatform::github()
    };

    let platforms: Vec<&dyn PlatformClient> = vec![&github];

    let mut coordinator = SwitchCoordinator::new(&mut store, &git, IdentityAgent::new(&agent, backoff()), platforms)
        .with_token_env_files(vec![env_file.clone()]);
    let report = coordinator.switch("work", SwitchOptions::default()).unwrap();

    assert_eq!(report.state, SwitchState::Done);
    assert!(report.warnings.iter().any(|w| w.code == WarningCode::CredentialPropagation));
    assert_eq!(fs::read_to_string(&env_file).unwrap(), "GITHUB_TOKEN=old\n");
}
