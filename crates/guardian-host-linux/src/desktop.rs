//! Installed applications from XDG desktop entries

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use guardian_host_api::{HostResult, InstalledTarget};
use guardian_util::TargetId;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Icon sizes searched in the hicolor theme, most preferred first
const ICON_SIZES: &[&str] = &["64x64", "48x48", "128x128", "96x96", "256x256", "32x32"];

/// `Categories=` values that mark a system utility
const SYSTEM_CATEGORIES: &[&str] = &["System", "Settings", "Monitor", "PackageManager"];

/// The `[Desktop Entry]` group of one `.desktop` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopEntry {
    /// File stem, used as the target id
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub no_display: bool,
    pub categories: Vec<String>,
    pub path: PathBuf,
}

impl DesktopEntry {
    pub fn parse(id: &str, path: &Path, content: &str) -> Option<Self> {
        let mut in_main = false;
        let mut fields: BTreeMap<&str, &str> = BTreeMap::new();

        for line in content.lines().map(str::trim) {
            if line.starts_with('[') {
                in_main = line == "[Desktop Entry]";
                continue;
            }
            if !in_main || line.starts_with('#') {
                continue;
            }
            // Localized keys (Name[fr]=...) are skipped
            if let Some((key, value)) = line.split_once('=')
                && !key.contains('[')
            {
                fields.entry(key.trim()).or_insert(value.trim());
            }
        }

        if fields.get("Type").is_some_and(|t| *t != "Application") {
            return None;
        }
        let name = fields.get("Name")?.to_string();

        Some(Self {
            id: id.to_string(),
            name,
            icon: fields.get("Icon").map(|s| s.to_string()),
            no_display: fields
                .get("NoDisplay")
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
                || fields
                    .get("Hidden")
                    .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            categories: fields
                .get("Categories")
                .map(|c| {
                    c.split(';')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            path: path.to_path_buf(),
        })
    }

    pub fn is_system(&self) -> bool {
        self.categories
            .iter()
            .any(|c| SYSTEM_CATEGORIES.contains(&c.as_str()))
    }
}

/// Where desktop entries and icons are looked up
#[derive(Debug, Clone)]
pub struct DesktopDirs {
    /// Per-user data dir (`~/.local/share`), searched first; overrides go here
    pub user: PathBuf,
    /// System data dirs (`/usr/share`, ...)
    pub system: Vec<PathBuf>,
}

impl DesktopDirs {
    /// Directories from the XDG environment
    pub fn from_env() -> Self {
        let user = dirs::data_dir().unwrap_or_else(|| PathBuf::from("~/.local/share"));
        let system = std::env::var("XDG_DATA_DIRS")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|v| v.split(':').map(PathBuf::from).collect())
            .unwrap_or_else(|| {
                vec![
                    PathBuf::from("/usr/local/share"),
                    PathBuf::from("/usr/share"),
                ]
            });
        Self { user, system }
    }

    fn data_dirs(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.user).chain(&self.system)
    }

    /// All application entries; user entries shadow system ones
    pub fn entries(&self) -> Vec<DesktopEntry> {
        let mut by_id: BTreeMap<String, DesktopEntry> = BTreeMap::new();

        for dir in self.data_dirs() {
            let Ok(read) = fs::read_dir(dir.join("applications")) else {
                continue;
            };
            for file in read.flatten() {
                let path = file.path();
                if path.extension().is_none_or(|e| e != "desktop") {
                    continue;
                }
                let Some(id) = path.file_stem().map(|s| s.to_string_lossy().into_owned())
                else {
                    continue;
                };
                if by_id.contains_key(&id) {
                    continue;
                }
                match fs::read_to_string(&path) {
                    Ok(content) => {
                        if let Some(entry) = DesktopEntry::parse(&id, &path, &content) {
                            by_id.insert(id, entry);
                        }
                    }
                    Err(e) => debug!(path = %path.display(), error = %e, "Unreadable desktop entry"),
                }
            }
        }

        by_id.into_values().collect()
    }

    /// Launchable applications, with icons encoded when requested
    pub fn installed(&self, include_icons: bool) -> Vec<InstalledTarget> {
        self.entries()
            .into_iter()
            .filter(|e| !e.no_display)
            .map(|e| InstalledTarget {
                target: TargetId::new(&e.id),
                label: e.name.clone(),
                system: e.is_system(),
                icon_base64: if include_icons {
                    e.icon.as_deref().and_then(|i| self.icon_base64(i))
                } else {
                    None
                },
            })
            .collect()
    }

    fn icon_path(&self, icon: &str) -> Option<PathBuf> {
        let direct = Path::new(icon);
        if direct.is_absolute() {
            return direct.is_file().then(|| direct.to_path_buf());
        }

        let file = format!("{}.png", icon);
        for dir in self.data_dirs() {
            for size in ICON_SIZES {
                let candidate = dir.join("icons/hicolor").join(size).join("apps").join(&file);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
            let pixmap = dir.join("pixmaps").join(&file);
            if pixmap.is_file() {
                return Some(pixmap);
            }
        }
        None
    }

    fn icon_base64(&self, icon: &str) -> Option<String> {
        let path = self.icon_path(icon)?;
        fs::read(&path).ok().map(|bytes| STANDARD.encode(bytes))
    }

    /// Hide or show the `id` application in launchers through a user-level
    /// override of its desktop entry.
    pub fn set_hidden(&self, id: &str, hidden: bool) -> HostResult<()> {
        let override_dir = self.user.join("applications");
        let override_path = override_dir.join(format!("{}.desktop", id));

        if !hidden {
            if override_path.is_file() {
                let content = fs::read_to_string(&override_path)?;
                if content.contains(OVERRIDE_MARKER) {
                    fs::remove_file(&override_path)?;
                }
            }
            return Ok(());
        }

        let source = self
            .system
            .iter()
            .map(|d| d.join("applications").join(format!("{}.desktop", id)))
            .find(|p| p.is_file());
        let base = match source {
            Some(path) => fs::read_to_string(path)?,
            None => format!("[Desktop Entry]\nType=Application\nName={}\n", id),
        };

        let mut content = String::from(OVERRIDE_MARKER);
        content.push('\n');
        for line in base.lines() {
            if !line.trim_start().starts_with("NoDisplay=") {
                content.push_str(line);
                content.push('\n');
                if line.trim() == "[Desktop Entry]" {
                    content.push_str("NoDisplay=true\n");
                }
            }
        }

        fs::create_dir_all(&override_dir)?;
        fs::write(&override_path, content)?;
        Ok(())
    }

    /// Whether the user override hiding `id` is in place
    pub fn is_hidden(&self, id: &str) -> bool {
        let path = self.user.join("applications").join(format!("{}.desktop", id));
        fs::read_to_string(path).is_ok_and(|c| c.contains(OVERRIDE_MARKER))
    }
}

/// First line of override files we write, so we only ever remove our own
const OVERRIDE_MARKER: &str = "# Hidden by guardian-agentd";
