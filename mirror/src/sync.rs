//! Orchestration for a single `apk-mirror sync` run.
//!
//! Stages run strictly in order: reset, acquire, transform, extract, gate,
//! publish, record. Every stage error aborts the run except a rejected push,
//! which is reported as [`SyncOutcome::PushFailed`] with the local commit kept
//! and the version record left untouched.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::gate::is_newer;
use crate::core::types::{SyncOutcome, Version};
use crate::error::SyncError;
use crate::io::acquirer::{Acquirer, CommandAcquirer};
use crate::io::config::MirrorConfig;
use crate::io::credentials::CredentialProvider;
use crate::io::dirs::{clear_output_tree, reset_scratch, take_single_artifact};
use crate::io::git::{CommitRequest, GitRepository, Repository};
use crate::io::manifest::extract_version;
use crate::io::transformer::{JadxTransformer, Transformer};
use crate::io::version_store::{FileVersionStore, VersionStore};

/// Commit message used for every published version.
pub fn commit_message(version: &Version) -> String {
    format!("Updated to version {}", version.label)
}

/// Run the pipeline once with explicit stage implementations.
pub fn run_sync<A, T, R, S>(
    config: &MirrorConfig,
    acquirer: &A,
    transformer: &T,
    repository: &R,
    store: &S,
    credentials: &dyn CredentialProvider,
) -> Result<SyncOutcome>
where
    A: Acquirer + ?Sized,
    T: Transformer + ?Sized,
    R: Repository + ?Sized,
    S: VersionStore + ?Sized,
{
    let start = Instant::now();
    info!(package = %config.package_name, "sync started");

    let head = repository.reset().context("reset mirror repository")?;
    info!(head = ?head, "repository ready");

    reset_scratch(&config.scratch_dir)?;
    acquirer
        .fetch(&config.scratch_dir)
        .context("acquire artifact")?;
    let artifact = take_single_artifact(&config.scratch_dir)?;
    info!(artifact = %artifact.display(), "artifact acquired");

    clear_output_tree(&config.target_folder)?;
    transformer
        .transform(&artifact, &config.target_folder)
        .context("transform artifact")?;

    let version = extract_version(&config.target_folder, &config.transform.manifest_file)?;
    let last_published = store.load();

    if !is_newer(&version, last_published) {
        info!(
            version = %version,
            last_published = ?last_published,
            "version is not newer, nothing to publish"
        );
        repository
            .reset()
            .context("restore mirror repository after skipped publish")?;
        return Ok(finish(
            start,
            SyncOutcome::NotNewer {
                version,
                last_published,
            },
        ));
    }
    info!(version = %version, last_published = ?last_published, "newer version found");

    let changes = repository.status().context("read repository status")?;
    if changes.is_empty() {
        info!(version = %version, "no changes detected");
        store.save(version.code)?;
        return Ok(finish(start, SyncOutcome::NoChanges { version }));
    }
    info!(changed = changes.len(), "publishing");

    let creds = credentials
        .credentials()
        .context("resolve push credentials")?;
    let message = commit_message(&version);
    let request = CommitRequest {
        message: &message,
        author: &config.git.author,
        committer: &config.git.committer,
        credentials: creds.as_ref(),
    };

    match repository.commit_and_push(&request) {
        Ok(commit) => {
            store.save(version.code)?;
            Ok(finish(start, SyncOutcome::Published { version, commit }))
        }
        Err(err) => match err.downcast_ref::<SyncError>() {
            Some(SyncError::PushFailed { commit, reason }) => {
                warn!(
                    version = %version,
                    commit = %commit,
                    "push failed, version record left unchanged"
                );
                Ok(finish(
                    start,
                    SyncOutcome::PushFailed {
                        version,
                        commit: commit.clone(),
                        reason: reason.clone(),
                    },
                ))
            }
            _ => Err(err.context("publish mirror commit")),
        },
    }
}

/// Run the pipeline once with the stage implementations described by `config`.
pub fn sync_with_config(config: &MirrorConfig) -> Result<SyncOutcome> {
    let acquirer = CommandAcquirer::from_config(config);
    let transformer = JadxTransformer::from_config(config);
    let repository = GitRepository::from_config(&config.target_folder, &config.git);
    let store = FileVersionStore::new(&config.version_file);
    let credentials = config.git.credentials.provider();
    run_sync(
        config,
        &acquirer,
        &transformer,
        &repository,
        &store,
        credentials.as_ref(),
    )
}

fn finish(start: Instant, outcome: SyncOutcome) -> SyncOutcome {
    info!(
        outcome = %outcome.summary(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "sync finished"
    );
    outcome
}
