//! `CreateContentSnapshot` / `RestoreContentSnapshot`: content snapshots in
//! the repository supplied through the phase context

use async_trait::async_trait;
use stanza_core::prelude::*;
use stanza_core::{HOST_NAME_OPTION, USER_NAME_OPTION};
use stanza_repo::{ClientOptions, Repository};
use stanza_snapshot::{parse_object_id_with_path, read, snapshot_source, write_as, StaticDirectory, Uploader};
use std::fs;
use std::io::{BufWriter, Cursor};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::info;

/// Registry name of the snapshot function
pub const CREATE_CONTENT_SNAPSHOT_FUNC_NAME: &str = "CreateContentSnapshot";
/// Registry name of the restore function
pub const RESTORE_CONTENT_SNAPSHOT_FUNC_NAME: &str = "RestoreContentSnapshot";

/// Path the content is recorded under
pub const CONTENT_SNAPSHOT_PATH_ARG: &str = "path";
/// Inline content to store as a single file
pub const CONTENT_SNAPSHOT_DATA_ARG: &str = "data";
/// Local directory to snapshot
pub const CONTENT_SNAPSHOT_SOURCE_DIR_ARG: &str = "sourceDir";
/// Snapshot description
pub const CONTENT_SNAPSHOT_DESCRIPTION_ARG: &str = "description";
/// Id of the object to restore
pub const CONTENT_SNAPSHOT_BACKUP_ID_ARG: &str = "backupID";
/// File the restored content is written to
pub const CONTENT_SNAPSHOT_TARGET_PATH_ARG: &str = "targetPath";

/// Output: manifest id
pub const CONTENT_SNAPSHOT_ID_OUTPUT: &str = "snapshotID";
/// Output: id to pass to `RestoreContentSnapshot`
pub const CONTENT_SNAPSHOT_BACKUP_ID_OUTPUT: &str = "backupID";
/// Output: root object id
pub const CONTENT_SNAPSHOT_ROOT_ID_OUTPUT: &str = "rootID";
/// Output: bytes written by a restore
pub const CONTENT_SNAPSHOT_BYTES_RESTORED_OUTPUT: &str = "bytesRestored";

const REPOSITORY_SERVICE: &str = "snapshot repository";

/// Client identity, with run options overriding the repository's
fn client_for(repo: &dyn Repository, params: &TemplateParams) -> ClientOptions {
    let mut client = repo.client_options();
    if let Some(host) = params.option(HOST_NAME_OPTION) {
        client.hostname = host.to_string();
    }
    if let Some(user) = params.option(USER_NAME_OPTION) {
        client.username = user.to_string();
    }
    client
}

/// Snapshots inline `data` or a local `sourceDir`
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateContentSnapshot;

#[async_trait]
impl Function for CreateContentSnapshot {
    fn name(&self) -> &'static str {
        CREATE_CONTENT_SNAPSHOT_FUNC_NAME
    }

    fn required_args(&self) -> &'static [&'static str] {
        &[CONTENT_SNAPSHOT_PATH_ARG]
    }

    async fn exec(&self, ctx: &ExecContext, params: &TemplateParams, args: &ArgMap) -> Result<OutputMap> {
        let path: String = arg(args, CONTENT_SNAPSHOT_PATH_ARG)?;
        let has_data = arg_exists(args, CONTENT_SNAPSHOT_DATA_ARG);
        let has_dir = arg_exists(args, CONTENT_SNAPSHOT_SOURCE_DIR_ARG);
        if has_data == has_dir {
            return Err(Error::operation(
                "Invalid content snapshot arguments",
                format!("exactly one of {CONTENT_SNAPSHOT_DATA_ARG} or {CONTENT_SNAPSHOT_SOURCE_DIR_ARG} is required"),
            ));
        }

        let repo: Arc<dyn Repository> = ctx.service(REPOSITORY_SERVICE)?;
        let client = client_for(repo.as_ref(), params);

        let (snapshot_id, root_id, backup_id) = if has_data {
            let data: String = arg(args, CONTENT_SNAPSHOT_DATA_ARG)?;
            let (snapshot_id, root_id) = write_as(ctx, repo.as_ref(), &client, &path, Cursor::new(data.into_bytes()))
                .await
                .map_err(|e| Error::operation("Failed to create content snapshot", e))?;
            let name = Path::new(&path)
                .file_name()
                .map_or_else(|| path.clone(), |n| n.to_string_lossy().into_owned());
            (snapshot_id, root_id, format!("{root_id}/{name}"))
        } else {
            let source_dir: String = arg(args, CONTENT_SNAPSHOT_SOURCE_DIR_ARG)?;
            let description: String = opt_arg(args, CONTENT_SNAPSHOT_DESCRIPTION_ARG, String::new())?;
            let root = StaticDirectory::from_local_dir(Path::new(&source_dir))
                .map_err(|e| Error::operation(format!("Failed to read {source_dir}"), e))?;
            let source = client.source(path.clone());
            let (snapshot_id, root_id) =
                snapshot_source(ctx, repo.as_ref(), &Uploader::new(), &source, root, &description)
                    .await
                    .map_err(|e| Error::operation("Failed to create content snapshot", e))?;
            (snapshot_id, root_id, root_id.to_string())
        };

        info!(%path, snapshot = %snapshot_id, root = %root_id, "Created content snapshot");
        Ok(OutputMap::from([
            (CONTENT_SNAPSHOT_ID_OUTPUT.to_string(), Value::from(snapshot_id.to_string())),
            (CONTENT_SNAPSHOT_BACKUP_ID_OUTPUT.to_string(), Value::from(backup_id)),
            (CONTENT_SNAPSHOT_ROOT_ID_OUTPUT.to_string(), Value::from(root_id.to_string())),
        ]))
    }
}

/// Streams a stored file back to a local path
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreContentSnapshot;

#[async_trait]
impl Function for RestoreContentSnapshot {
    fn name(&self) -> &'static str {
        RESTORE_CONTENT_SNAPSHOT_FUNC_NAME
    }

    fn required_args(&self) -> &'static [&'static str] {
        &[CONTENT_SNAPSHOT_BACKUP_ID_ARG, CONTENT_SNAPSHOT_TARGET_PATH_ARG]
    }

    async fn exec(&self, ctx: &ExecContext, _params: &TemplateParams, args: &ArgMap) -> Result<OutputMap> {
        let backup_id: String = arg(args, CONTENT_SNAPSHOT_BACKUP_ID_ARG)?;
        let target_path: String = arg(args, CONTENT_SNAPSHOT_TARGET_PATH_ARG)?;
        let repo: Arc<dyn Repository> = ctx.service(REPOSITORY_SERVICE)?;

        let id = parse_object_id_with_path(repo.as_ref(), &backup_id)
            .await
            .map_err(|e| Error::operation("Failed to restore content snapshot", e))?;

        let target = Path::new(&target_path);
        let dir = match target.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)
                    .map_err(|e| Error::operation(format!("Failed to create {}", parent.display()), e))?;
                parent
            }
            None => Path::new("."),
        };

        // removed on drop unless persisted
        let partial = NamedTempFile::new_in(dir)
            .map_err(|e| Error::operation(format!("Failed to create {target_path}"), e))?;
        let mut sink = BufWriter::new(partial);
        let bytes = read(ctx, repo.as_ref(), &id.to_string(), &mut sink)
            .await
            .map_err(|e| Error::operation("Failed to restore content snapshot", e))?;
        let write_failed = |e| Error::operation(format!("Failed to write {target_path}"), e);
        sink.into_inner()
            .map_err(|e| write_failed(e.into_error()))?
            .persist(target)
            .map_err(|e| write_failed(e.error))?;

        info!(%backup_id, target = %target_path, bytes, "Restored content snapshot");
        Ok(OutputMap::from([(
            CONTENT_SNAPSHOT_BYTES_RESTORED_OUTPUT.to_string(),
            Value::from(bytes),
        )]))
    }
}
