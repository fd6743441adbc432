#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use mcp_flowd::Settings;

/// Writes an executable shell script into `dir` and returns its path.
pub fn write_executable(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// A gateway stand-in: answers `--version` immediately, otherwise prints one
/// line and idles until signalled.
pub fn write_fake_gateway(dir: &Path) -> PathBuf {
    write_executable(
        dir,
        "mcp-proxy",
        "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo \"1.0.0\"; exit 0; fi\necho \"gateway listening\"\nexec sleep 300\n",
    )
}

/// A gateway stand-in that ignores SIGTERM, forcing the SIGKILL escalation.
pub fn write_stubborn_gateway(dir: &Path) -> PathBuf {
    write_executable(
        dir,
        "mcp-proxy",
        "#!/bin/sh\ntrap '' TERM\necho \"gateway listening\"\nwhile true; do sleep 1; done\n",
    )
}

/// Settings pointing every binary at `gateway_bin` and the store at
/// `root/data/flows.json`, with gateway ports nothing actually binds.
pub fn test_settings(root: &Path, gateway_bin: &Path) -> Settings {
    let bin = gateway_bin.display().to_string();
    Settings {
        host: "0.0.0.0".into(),
        stream_port: 18101,
        sse_port: 18102,
        openapi_port: 18103,
        inspector_public_host: "localhost".into(),
        proxy_bin: bin.clone(),
        openapi_bin: bin.clone(),
        helper_bin: bin.clone(),
        inspector_bin: bin,
        inspector_host: "0.0.0.0".into(),
        inspector_client_port: 16275,
        inspector_server_port: 16285,
        data_path: root.join("data").join("flows.json"),
    }
}
