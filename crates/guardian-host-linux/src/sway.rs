//! Window inspection through sway IPC (`swaymsg`)

use guardian_host_api::{HostError, HostResult, WindowInfo};
use guardian_util::TargetId;
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct WindowProperties {
    #[serde(default)]
    class: Option<String>,
}

/// The subset of a sway tree node we care about
#[derive(Debug, Default, Deserialize)]
struct SwayNode {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    window_properties: Option<WindowProperties>,
    #[serde(default)]
    focused: bool,
    #[serde(default)]
    visible: Option<bool>,
    #[serde(default)]
    nodes: Vec<SwayNode>,
    #[serde(default)]
    floating_nodes: Vec<SwayNode>,
}

impl SwayNode {
    /// Wayland app id, or the X11 class for Xwayland windows
    fn target(&self) -> Option<TargetId> {
        self.app_id
            .as_deref()
            .or_else(|| self.window_properties.as_ref()?.class.as_deref())
            .filter(|id| !id.is_empty())
            .map(TargetId::new)
    }

    fn collect(&self, out: &mut Vec<WindowInfo>) {
        if let Some(target) = self.target()
            && self.visible.unwrap_or(false)
        {
            out.push(WindowInfo {
                target,
                title: self.name.clone(),
                focused: self.focused,
            });
        }
        for child in self.nodes.iter().chain(&self.floating_nodes) {
            child.collect(out);
        }
    }
}

/// Visible application windows in a `get_tree` reply
pub fn parse_tree(json: &str) -> HostResult<Vec<WindowInfo>> {
    let root: SwayNode = serde_json::from_str(json)
        .map_err(|e| HostError::QueryFailed(format!("Invalid sway tree: {}", e)))?;

    let mut windows = Vec::new();
    root.collect(&mut windows);
    Ok(windows)
}

/// Run `swaymsg` with `args`, bounded by `timeout`
async fn swaymsg(args: &[&str], timeout: Duration) -> HostResult<String> {
    let output = tokio::time::timeout(timeout, Command::new("swaymsg").args(args).output())
        .await
        .map_err(|_| HostError::QueryFailed("swaymsg timed out".into()))??;

    if !output.status.success() {
        return Err(HostError::QueryFailed(format!(
            "swaymsg {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Current visible windows
pub async fn visible_windows(timeout: Duration) -> HostResult<Vec<WindowInfo>> {
    let tree = swaymsg(&["-t", "get_tree", "-r"], timeout).await?;
    parse_tree(&tree)
}

/// Ask sway to close every window of `target`
pub async fn kill_windows(target: &TargetId, timeout: Duration) -> HostResult<()> {
    let id = target.as_str();
    if id.contains(['"', ']', '\\']) {
        return Err(HostError::StopFailed(format!("Unsafe app id: {}", id)));
    }

    let criteria = format!("[app_id=\"{id}\"] kill; [class=\"{id}\"] kill");
    match swaymsg(&[&criteria], timeout).await {
        Ok(_) => Ok(()),
        Err(e) => {
            // sway reports an error when no window matched one of the criteria
            debug!(target_id = %target, error = %e, "swaymsg kill reported failure");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = r#"{
        "name": "root",
        "nodes": [{
            "name": "HDMI-A-1",
            "nodes": [{
                "name": "1",
                "nodes": [
                    {"name": "Homework - Reader", "app_id": "org.gnome.Evince", "focused": true, "visible": true, "nodes": []},
                    {"name": "Steam", "app_id": null, "window_properties": {"class": "steam"}, "focused": false, "visible": true, "nodes": []},
                    {"name": "hidden", "app_id": "mpv", "visible": false, "nodes": []}
                ],
                "floating_nodes": [
                    {"name": "PiP", "app_id": "firefox", "focused": false, "visible": true, "nodes": []}
                ]
            }]
        }]
    }"#;

    #[test]
    fn parses_visible_windows() {
        let windows = parse_tree(TREE).unwrap();
        let targets: Vec<_> = windows.iter().map(|w| w.target.as_str()).collect();

        assert_eq!(targets, vec!["org.gnome.Evince", "steam", "firefox"]);
        assert!(windows[0].focused);
        assert_eq!(windows[0].title.as_deref(), Some("Homework - Reader"));
        assert!(!windows[2].focused);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_tree("not json").is_err());
    }

    #[tokio::test]
    async fn kill_rejects_injection() {
        let target = TargetId::new("x\"] exec rm");
        assert!(kill_windows(&target, Duration::from_millis(10)).await.is_err());
    }
}
