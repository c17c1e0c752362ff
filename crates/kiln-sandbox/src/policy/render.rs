//! Protobuf text rendering of a policy for the isolation primitive.

use std::fmt::Write as _;
use std::path::Path;

use super::{MountRule, Policy, RootFilesystem};

pub(super) fn render(policy: &Policy) -> String {
    let mut out = String::new();
    let namespaces = policy.namespaces();

    field(&mut out, "name", &quote(policy.name()));
    field(&mut out, "mode", "ONCE");
    field(&mut out, "clone_newpid", flag(namespaces.process));
    field(&mut out, "clone_newns", flag(namespaces.mount));
    field(&mut out, "clone_newnet", flag(namespaces.network));
    field(&mut out, "clone_newuser", flag(namespaces.user));
    field(&mut out, "clone_newipc", flag(namespaces.ipc));
    field(&mut out, "clone_newuts", flag(namespaces.uts));
    field(&mut out, "clone_newcgroup", flag(namespaces.cgroup));
    field(&mut out, "keep_caps", flag(policy.caps_retained()));
    // The launcher never imposes a wall-clock limit.
    field(&mut out, "time_limit", "0");
    field(&mut out, "mount_proc", "false");

    let limits = policy.limits();
    rlimit(&mut out, "rlimit_as", limits.max_memory_mib, "INF");
    rlimit(&mut out, "rlimit_nproc", limits.max_processes, "SOFT");
    rlimit(&mut out, "rlimit_nofile", limits.max_open_files, "SOFT");

    root_mount(&mut out, policy.root());
    for mount in policy.mounts() {
        static_mount(&mut out, mount);
    }
    out
}

fn field(out: &mut String, key: &str, value: &str) {
    let _ = writeln!(out, "{key}: {value}");
}

const fn flag(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn rlimit(out: &mut String, key: &str, value: Option<u64>, unset: &str) {
    if let Some(limit) = value {
        field(out, key, &limit.to_string());
    }
    field(out, &format!("{key}_type"), value.map_or(unset, |_| "VALUE"));
}

fn root_mount(out: &mut String, root: &RootFilesystem) {
    out.push_str("mount {\n");
    match root {
        RootFilesystem::Tmpfs { size_mib } => {
            mount_field(out, "dst", &quote("/"));
            mount_field(out, "fstype", &quote("tmpfs"));
            if let Some(size) = size_mib {
                mount_field(out, "options", &quote(&format!("size={size}m")));
            }
            mount_field(out, "rw", "true");
        }
        RootFilesystem::Directory { path } => {
            mount_field(out, "src", &quote_path(path));
            mount_field(out, "dst", &quote("/"));
            mount_field(out, "is_bind", "true");
            mount_field(out, "rw", "false");
        }
    }
    out.push_str("}\n");
}

fn static_mount(out: &mut String, mount: &MountRule) {
    out.push_str("mount {\n");
    if let Some(source) = mount.source() {
        mount_field(out, "src", &quote_path(source));
    }
    mount_field(out, "dst", &quote_path(mount.destination()));
    if mount.kind().needs_source() {
        mount_field(out, "is_bind", "true");
    } else {
        mount_field(out, "fstype", &quote(mount.kind().fstype()));
    }
    mount_field(out, "rw", flag(mount.writable()));
    out.push_str("}\n");
}

fn mount_field(out: &mut String, key: &str, value: &str) {
    let _ = writeln!(out, "  {key}: {value}");
}

fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}
