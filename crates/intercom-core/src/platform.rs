use std::path::PathBuf;

const APP_DIR: &str = "intercom";

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/intercom/ (XDG standard)
    // instead of macOS Application Support for consistency
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn temp_dir() -> PathBuf {
    std::env::temp_dir()
}

/// IPC socket path for the mpv instance serving `label` ("local" or "radio").
/// Each audio source gets its own mpv process so their transports never
/// share state.
#[cfg(unix)]
pub fn mpv_socket_name(label: &str) -> String {
    format!("{}/intercom-mpv-{}.sock", temp_dir().display(), label)
}

#[cfg(windows)]
pub fn mpv_socket_name(label: &str) -> String {
    format!("intercom-mpv-{}", label)
}

#[cfg(unix)]
pub fn mpv_socket_arg(label: &str) -> String {
    format!("--input-ipc-server={}", mpv_socket_name(label))
}

#[cfg(windows)]
pub fn mpv_socket_arg(label: &str) -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", mpv_socket_name(label))
}

#[cfg(unix)]
fn mpv_binary_names() -> &'static [&'static str] {
    &["mpv"]
}

#[cfg(windows)]
fn mpv_binary_names() -> &'static [&'static str] {
    &["mpv.exe", "mpv"]
}

fn find_beside_exe(names: &[&str]) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    for name in names {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    #[cfg(unix)]
    let sep = ":";
    #[cfg(windows)]
    let sep = ";";
    for dir in path.split(sep) {
        for name in names {
            let p = PathBuf::from(dir).join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Find the mpv binary: explicit override, beside the current exe, then PATH.
pub fn find_mpv_binary(override_path: Option<&PathBuf>) -> Option<PathBuf> {
    if let Some(p) = override_path {
        if p.exists() {
            return Some(p.clone());
        }
    }
    find_beside_exe(mpv_binary_names()).or_else(|| find_on_path(mpv_binary_names()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_names_are_per_source() {
        assert_ne!(mpv_socket_name("local"), mpv_socket_name("radio"));
        assert!(mpv_socket_arg("radio").contains("intercom-mpv-radio"));
    }

    #[test]
    fn test_override_must_exist() {
        let missing = PathBuf::from("/definitely/not/here/mpv");
        assert_ne!(find_mpv_binary(Some(&missing)), Some(missing));
    }
}
