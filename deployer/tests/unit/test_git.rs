//! Clones against a throwaway local repository

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use iac_deployer::deploy::fsm::{DeploymentPhase, DeploymentStatus};
use iac_deployer::deploy::git::{CloneRequest, GitCloner, SourceFetcher};
use iac_deployer::deploy::handle::DeploymentHandle;
use iac_deployer::deploy::logstream::LogDistributor;
use iac_deployer::deploy::worker;
use iac_deployer::errors::DeployerError;
use iac_deployer::filesys::dir::Dir;

use crate::support::{log_lines, request, Harness, ScriptedExecutor};

fn git(dir: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .args(["-c", "user.name=deployer", "-c", "user.email=deployer@example.com"])
        .args(args)
        .current_dir(dir)
        .status()
        .unwrap();
    assert!(status.success(), "git {:?} failed", args);
}

/// A repository with one commit on `main` holding `stacks/app/main.tf`
async fn local_repo() -> Dir {
    let repo = Dir::create_temp_dir("deployer-origin").await.unwrap();
    git(repo.path(), &["init", "-q"]);
    git(repo.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
    tokio::fs::create_dir_all(repo.path().join("stacks/app")).await.unwrap();
    tokio::fs::write(repo.path().join("stacks/app/main.tf"), "terraform {}\n")
        .await
        .unwrap();
    git(repo.path(), &["add", "."]);
    git(repo.path(), &["commit", "-q", "-m", "initial"]);
    repo
}

fn file_url(repo: &Dir) -> String {
    format!("file://{}", repo.path().display())
}

#[tokio::test]
async fn test_clone_checks_out_ref() {
    let repo = local_repo().await;
    let target = Dir::create_temp_dir("deployer-clone").await.unwrap();
    let checkout = target.path().join("repo");
    let url = file_url(&repo);
    let logs = LogDistributor::new(16);

    let request = CloneRequest {
        url: &url,
        git_ref: "main",
        auth: None,
        timeout: Duration::from_secs(30),
    };
    GitCloner::default().fetch(&request, &checkout, &logs).await.unwrap();

    assert!(checkout.join("stacks/app/main.tf").exists());
    repo.delete().await.unwrap();
    target.delete().await.unwrap();
}

#[tokio::test]
async fn test_clone_unknown_ref_reports_git_output() {
    let repo = local_repo().await;
    let target = Dir::create_temp_dir("deployer-clone").await.unwrap();
    let url = file_url(&repo);
    let logs = LogDistributor::new(16);

    let request = CloneRequest {
        url: &url,
        git_ref: "no-such-branch",
        auth: None,
        timeout: Duration::from_secs(30),
    };
    let result = GitCloner::default()
        .fetch(&request, &target.path().join("repo"), &logs)
        .await;

    match result {
        Err(DeployerError::CloneError(message)) => assert!(message.contains("no-such-branch"), "{message}"),
        other => panic!("expected a clone error, got {:?}", other),
    }
    assert!(logs
        .snapshot()
        .iter()
        .any(|line| line.contains("no-such-branch")));
    repo.delete().await.unwrap();
    target.delete().await.unwrap();
}

#[tokio::test]
async fn test_worker_fails_at_cloning_for_unknown_ref() {
    let repo = local_repo().await;
    let harness = Harness::build(
        ScriptedExecutor::default(),
        Arc::new(GitCloner::default()),
        worker::Options::default(),
        None,
    )
    .await;

    let mut req = request(true);
    req.git_url = file_url(&repo);
    req.git_ref = "no-such-branch".to_string();
    let handle = DeploymentHandle::new("dep-badref".to_string(), req, 64);

    harness.worker.run(handle.clone()).await;

    let record = handle.snapshot();
    assert_eq!(record.fsm.status(), DeploymentStatus::Failed);
    assert_eq!(record.fsm.phase(), DeploymentPhase::Cloning);
    assert!(record.fsm.error().unwrap().contains("no-such-branch"));
    assert!(harness.executor.calls().is_empty());
    assert!(log_lines(&handle).iter().any(|l| l.starts_with("==> failed")));
    repo.delete().await.unwrap();
    harness.cleanup().await;
}

#[tokio::test]
async fn test_worker_runs_module_from_real_clone() {
    let repo = local_repo().await;
    let harness = Harness::build(
        ScriptedExecutor::default(),
        Arc::new(GitCloner::default()),
        worker::Options::default(),
        None,
    )
    .await;

    let mut req = request(true);
    req.git_url = file_url(&repo);
    req.path = "stacks/app".into();
    let handle = DeploymentHandle::new("dep-realclone".to_string(), req, 64);

    harness.worker.run(handle.clone()).await;

    assert_eq!(handle.status(), DeploymentStatus::Success);
    let init = harness.executor.call("init").unwrap();
    assert!(init.cwd.join("main.tf").exists());
    repo.delete().await.unwrap();
    harness.cleanup().await;
}
