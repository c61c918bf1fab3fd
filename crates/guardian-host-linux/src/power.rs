//! Battery level from sysfs

use std::fs;
use std::path::Path;

/// Default sysfs power-supply class directory
pub const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

/// Capacity of the first battery under `power_supply`, in percent
pub fn read_battery_level(power_supply: &Path) -> Option<u8> {
    let mut entries: Vec<_> = fs::read_dir(power_supply).ok()?.flatten().collect();
    entries.sort_by_key(|e| e.file_name());

    entries
        .iter()
        .filter(|e| e.file_name().to_string_lossy().starts_with("BAT"))
        .find_map(|e| read_capacity(&e.path()))
}

fn read_capacity(path: &Path) -> Option<u8> {
    let capacity: u8 = fs::read_to_string(path.join("capacity"))
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Some(capacity.min(100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_battery_wins() {
        let dir = tempdir().unwrap();
        for (name, capacity) in [("AC", None), ("BAT1", Some("40")), ("BAT0", Some("87\n"))] {
            let supply = dir.path().join(name);
            fs::create_dir(&supply).unwrap();
            if let Some(capacity) = capacity {
                fs::write(supply.join("capacity"), capacity).unwrap();
            }
        }

        assert_eq!(read_battery_level(dir.path()), Some(87));
    }

    #[test]
    fn no_battery() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("AC")).unwrap();

        assert_eq!(read_battery_level(dir.path()), None);
        assert_eq!(read_battery_level(&dir.path().join("missing")), None);
    }
}
