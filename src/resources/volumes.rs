//! NFS volumes are mounted at a hidden path and then re-exposed at the path the App asked for
//! through a fuse mapper, which translates file ownership to the uid and gid the App runs as.
//! The mapper runs as background jobs of the container's shell, so the container entrypoint
//! gets wrapped in `/bin/sh -c`.
use super::Error;
use crate::apis::{clean_path, AppVolumeStatus};

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};

/// Where the real NFS shares get mounted
pub const KF_MOUNTS_PATH: &str = "/.kfmounts";

/// The user buildpack v2 apps run as, used when the binding doesn't specify ids
pub const VCAP_USER_ID: i64 = 2000;

/// Everything the pod spec needs to mount the App's volumes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeComposition {
    pub volumes: Vec<Value>,
    pub mounts: Vec<Value>,
    /// Commands that start the fuse mappers, each backgrounded with `&`
    pub fuse_commands: Vec<String>,
    /// Commands that unmount every mapper, ending with a `wait` for all of them
    pub unmount_commands: Vec<String>,
}

impl VolumeComposition {
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

fn parse_id(
    value: Result<i64, crate::apis::InvalidIdError>,
    raw_is_empty: bool,
    field: &'static str,
    mount_path: &str,
) -> Result<i64, Error> {
    if raw_is_empty {
        return Ok(VCAP_USER_ID);
    }
    value.map_err(|source| Error::InvalidId {
        field,
        mount_path: mount_path.to_owned(),
        source,
    })
}

/// Builds the volumes, mounts and shell commands for the volume statuses. Volumes are sorted
/// by mount path first so the commands always come out in the same order.
pub fn build_volumes(statuses: &[AppVolumeStatus]) -> Result<VolumeComposition, Error> {
    let mut composition = VolumeComposition::default();
    if statuses.is_empty() {
        return Ok(composition);
    }

    let mut sorted = statuses.iter().collect::<Vec<_>>();
    sorted.sort_by(|a, b| a.mount_path.cmp(&b.mount_path));

    for status in sorted {
        let claim = status.volume_claim_name.as_str();
        let nfs_mount_path = clean_path(&format!("{}/{}", KF_MOUNTS_PATH, status.mount_path));

        composition.volumes.push(json!({
            "name": claim,
            "persistentVolumeClaim": {"claimName": claim},
        }));
        let mut mount = json!({"name": claim, "mountPath": nfs_mount_path});
        if status.read_only {
            mount["readOnly"] = Value::Bool(true);
        }
        composition.mounts.push(mount);

        let uid = parse_id(
            status.ids.uid_i64(),
            status.ids.uid.is_empty(),
            "UID",
            &status.mount_path,
        )?;
        let gid = parse_id(
            status.ids.gid_i64(),
            status.ids.gid.is_empty(),
            "GID",
            &status.mount_path,
        )?;

        composition.fuse_commands.push(format!(
            "mapfs -uid {} -gid {} {} {} &",
            uid, gid, status.mount_path, nfs_mount_path
        ));
        composition
            .unmount_commands
            .push(format!("fusermount -u -z {} &", status.mount_path));
    }
    composition.unmount_commands.push("wait".to_owned());

    Ok(composition)
}

lazy_static! {
    static ref UNSAFE_SHELL_CHARS: Regex = Regex::new("[^A-Za-z0-9_@%+=:,./-]").unwrap();
}

/// Quotes the word for `/bin/sh` if it contains anything the shell would interpret
pub fn shell_escape(word: &str) -> String {
    if word.is_empty() {
        return "''".to_owned();
    }
    if !UNSAFE_SHELL_CHARS.is_match(word) {
        return word.to_owned();
    }
    format!("'{}'", word.replace('\'', "'\"'\"'"))
}

/// The `sh -c` script that starts the fuse mappers and then execs the original entrypoint
pub fn fuse_start_script(fuse_commands: &[String], original_command: &[String]) -> String {
    let escaped = original_command
        .iter()
        .map(|w| shell_escape(w))
        .collect::<Vec<_>>()
        .join(" ");
    let mut parts = fuse_commands.to_vec();
    parts.push(format!("exec {}", escaped));
    parts.join(" ")
}
