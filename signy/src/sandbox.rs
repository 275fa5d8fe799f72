// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs the in-toto verification engine inside a container, isolating
//! untrusted layout execution (inspection rules can reference commands)
//! from the host.
//!
//! This is the only place in the program with real concurrency: a
//! log-streaming task runs alongside the container-wait task and the two
//! are raced with a select. Everything else in the crate is straight-line
//! blocking code, so the async runtime lives entirely inside this module.

use crate::error::{self, Result};
use crate::transport::host_credentials;
use bollard::models::{ContainerCreateBody, ContainerWaitResponse};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptionsBuilder, LogsOptionsBuilder,
    RemoveContainerOptionsBuilder, StartContainerOptions, UploadToContainerOptionsBuilder,
    WaitContainerOptionsBuilder,
};
use bollard::auth::DockerCredentials;
use bollard::Docker;
use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::{Either, Full};
use log::{debug, info};
use snafu::ResultExt;
use std::fs;
use std::path::Path;

/// The default container image used to run the in-toto verification engine.
pub const VERIFICATION_IMAGE: &str = "cnabio/signy-in-toto-verifier:latest";

const WORKDIR: &str = "/in-toto";

/// Starts a container from `image`, copies every file under
/// `workspace_dir` into `/in-toto`, runs the in-toto verification engine,
/// and streams its output until exit. The container is removed on all exit
/// paths; a non-zero exit status is an error.
pub fn run(image: &str, workspace_dir: &Path) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context(error::RuntimeBuildSnafu)?;
    runtime.block_on(run_inner(image, workspace_dir))
}

async fn run_inner(image: &str, workspace_dir: &Path) -> Result<()> {
    let docker = Docker::connect_with_local_defaults().context(error::ContainerSnafu {
        operation: "connect to",
    })?;

    ensure_image(&docker, image).await?;

    let body = ContainerCreateBody {
        image: Some(image.to_owned()),
        working_dir: Some(WORKDIR.to_owned()),
        cmd: Some(vec![
            "in-toto-verify".to_owned(),
            "--layout".to_owned(),
            crate::intoto::LAYOUT_DEFAULT_NAME.to_owned(),
            "--layout-keys".to_owned(),
            crate::intoto::KEY_DEFAULT_NAME.to_owned(),
            "--link-dir".to_owned(),
            WORKDIR.to_owned(),
            "--verbose".to_owned(),
        ]),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(true),
        ..Default::default()
    };
    let container = docker
        .create_container(None::<CreateContainerOptions>, body)
        .await
        .context(error::ContainerSnafu {
            operation: "create",
        })?;

    let result = drive(&docker, &container.id, workspace_dir).await;

    // Guaranteed removal on all exit paths.
    if let Err(err) = docker
        .remove_container(
            &container.id,
            Some(RemoveContainerOptionsBuilder::default().force(true).build()),
        )
        .await
    {
        debug!("cannot remove verification container: {}", err);
    }

    result
}

async fn drive(docker: &Docker, id: &str, workspace_dir: &Path) -> Result<()> {
    let archive = workspace_archive(workspace_dir)?;
    docker
        .upload_to_container(
            id,
            Some(UploadToContainerOptionsBuilder::default().path("/").build()),
            Either::Left(Full::new(Bytes::from(archive))),
        )
        .await
        .context(error::ContainerSnafu {
            operation: "copy files into",
        })?;

    // Register the wait before starting so the exit status cannot be
    // missed; "next-exit" covers a container that has not started yet.
    let mut wait = docker.wait_container(
        id,
        Some(
            WaitContainerOptionsBuilder::default()
                .condition("next-exit")
                .build(),
        ),
    );

    docker
        .start_container(id, None::<StartContainerOptions>)
        .await
        .context(error::ContainerSnafu { operation: "start" })?;

    let mut logs = docker.logs(
        id,
        Some(
            LogsOptionsBuilder::default()
                .follow(true)
                .stdout(true)
                .stderr(true)
                .build(),
        ),
    );
    let log_task = tokio::spawn(async move {
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(output) => {
                    let line = output.to_string();
                    let line = line.trim_end();
                    if !line.is_empty() {
                        info!("{}", line);
                    }
                }
                Err(err) => {
                    debug!("log stream ended: {}", err);
                    break;
                }
            }
        }
    });

    let status = wait.next().await;
    log_task.abort();

    match status {
        Some(Ok(ContainerWaitResponse { status_code: 0, .. })) => Ok(()),
        Some(Ok(response)) => error::ContainerExitSnafu {
            code: response.status_code,
        }
        .fail(),
        Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
            error::ContainerExitSnafu { code }.fail()
        }
        Some(Err(err)) => Err(err).context(error::ContainerSnafu {
            operation: "wait for",
        }),
        None => error::ContainerExitSnafu { code: -1_i64 }.fail(),
    }
}

/// Ensures the image is present locally, pulling it with resolved registry
/// credentials when it is not.
async fn ensure_image(docker: &Docker, image: &str) -> Result<()> {
    match docker.inspect_image(image).await {
        Ok(_) => return Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => {
            info!("Unable to find image '{}' locally", image);
        }
        Err(err) => {
            return Err(err).context(error::ContainerSnafu {
                operation: "inspect image for",
            })
        }
    }

    let registry = image.split('/').next().filter(|first| {
        first.contains('.') || first.contains(':') || *first == "localhost"
    });
    let credentials = registry.and_then(host_credentials).map(|(username, password)| {
        DockerCredentials {
            username: Some(username),
            password: Some(password),
            ..Default::default()
        }
    });

    let options = CreateImageOptionsBuilder::default().from_image(image).build();
    let mut pull = docker.create_image(Some(options), None, credentials);
    while let Some(progress) = pull.next().await {
        let info = progress.context(error::ContainerSnafu {
            operation: "pull image for",
        })?;
        if let Some(status) = info.status {
            debug!("{}", status);
        }
    }
    Ok(())
}

/// Builds a tar stream of every file directly under the workspace,
/// remapped below `/in-toto`.
fn workspace_archive(workspace_dir: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let entries = fs::read_dir(workspace_dir).context(error::TarBuildSnafu {
        path: workspace_dir,
    })?;
    for entry in entries {
        let entry = entry.context(error::TarBuildSnafu {
            path: workspace_dir,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let contents = fs::read(&path).context(error::TarBuildSnafu { path: &path })?;
        let name = entry.file_name();
        let archived = Path::new("in-toto").join(&name);
        debug!(
            "copying file {} in container for verification...",
            archived.display(),
        );

        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, &archived, contents.as_slice())
            .context(error::TarBuildSnafu { path: &path })?;
    }
    builder.into_inner().context(error::TarBuildSnafu {
        path: workspace_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::workspace_archive;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn archive_remaps_files_below_in_toto() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("layout.template"), b"layout").unwrap();
        std::fs::write(dir.path().join("key.pub"), b"key").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let bytes = workspace_archive(dir.path()).unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            names.push(entry.path().unwrap().display().to_string());
            let mut contents = String::new();
            entry.read_to_string(&mut contents).unwrap();
            assert!(!contents.is_empty());
        }
        names.sort();
        assert_eq!(names, vec!["in-toto/key.pub", "in-toto/layout.template"]);
    }
}
