//! Category resolution and the always-allowed target set

use guardian_api::{Category, PolicySnapshot};
use guardian_util::TargetId;
use std::collections::{BTreeMap, BTreeSet};

/// Well-known targets and their categories
const BUILTIN_CATEGORIES: &[(&str, Category)] = &[
    ("com.facebook.katana", Category::Social),
    ("com.facebook.orca", Category::Social),
    ("com.instagram.android", Category::Social),
    ("com.whatsapp", Category::Social),
    ("com.snapchat.android", Category::Social),
    ("com.twitter.android", Category::Social),
    ("com.zhiliaoapp.musically", Category::Social),
    ("com.discord", Category::Social),
    ("com.linkedin.android", Category::Social),
    ("com.reddit.frontpage", Category::Social),
    ("com.telegram.messenger", Category::Social),
    ("discord", Category::Social),
    ("org.telegram.desktop", Category::Social),
    ("com.mojang.minecraftpe", Category::Games),
    ("com.supercell.clashofclans", Category::Games),
    ("com.supercell.brawlstars", Category::Games),
    ("com.roblox.client", Category::Games),
    ("com.ea.gp.fifamobile", Category::Games),
    ("com.pubg.krmobile", Category::Games),
    ("com.garena.game.freefire", Category::Games),
    ("com.epicgames.fortnite", Category::Games),
    ("com.activision.callofduty.shooter", Category::Games),
    ("com.kiloo.subwaysurf", Category::Games),
    ("steam", Category::Games),
    ("minecraft-launcher", Category::Games),
    ("com.duolingo", Category::Education),
    ("com.khanacademy.android", Category::Education),
    ("com.google.android.apps.classroom", Category::Education),
    ("com.photomath.app", Category::Education),
    ("org.wikipedia", Category::Education),
    ("com.quizlet.quizletandroid", Category::Education),
    ("com.google.android.apps.docs", Category::Education),
    ("com.microsoft.office.word", Category::Education),
    ("com.adobe.reader", Category::Education),
    ("org.gnome.Maps", Category::Education),
    ("com.google.android.youtube", Category::Entertainment),
    ("com.netflix.mediaclient", Category::Entertainment),
    ("com.spotify.music", Category::Entertainment),
    ("com.disney.disneyplus", Category::Entertainment),
    ("tv.twitch.android.app", Category::Entertainment),
    ("com.amazon.avod.thirdpartyclient", Category::Entertainment),
    ("spotify", Category::Entertainment),
    ("mpv", Category::Entertainment),
    ("com.microsoft.office.excel", Category::Productivity),
    ("com.microsoft.office.powerpoint", Category::Productivity),
    ("com.google.android.apps.docs.editors.sheets", Category::Productivity),
    ("com.google.android.apps.docs.editors.docs", Category::Productivity),
    ("com.evernote", Category::Productivity),
    ("com.todoist", Category::Productivity),
    ("com.google.android.keep", Category::Productivity),
    ("com.trello", Category::Productivity),
    ("com.notion.id", Category::Productivity),
    ("libreoffice-writer", Category::Productivity),
];

/// System-critical targets that are never blocked
const BUILTIN_WHITELIST: &[&str] = &[
    "com.android.phone",
    "com.android.contacts",
    "com.android.mms",
    "com.google.android.dialer",
    "com.google.android.contacts",
    "com.android.calculator2",
    "com.google.android.calculator",
    "com.android.settings",
    "com.android.systemui",
    "com.android.launcher",
    "com.google.android.apps.maps",
    "org.gnome.Calculator",
    "org.gnome.Settings",
];

/// Category of a well-known target, if it has one
pub fn builtin_category(target: &TargetId) -> Option<Category> {
    BUILTIN_CATEGORIES
        .iter()
        .find(|(id, _)| *id == target.as_str())
        .map(|(_, category)| *category)
}

/// Every well-known target in `category`
pub fn builtin_targets_in(category: Category) -> Vec<TargetId> {
    BUILTIN_CATEGORIES
        .iter()
        .filter(|(_, c)| *c == category)
        .map(|(id, _)| TargetId::new(*id))
        .collect()
}

/// Maps targets to categories and decides whitelist membership.
///
/// Category precedence: custom override from the controller, then the
/// rule's own category when it is not `OTHER`, then the built-in map, then
/// configured assignments, then `OTHER`.
#[derive(Debug, Clone, Default)]
pub struct CategoryResolver {
    configured: BTreeMap<TargetId, Category>,
    extra_whitelist: BTreeSet<TargetId>,
}

impl CategoryResolver {
    pub fn new(
        configured: BTreeMap<TargetId, Category>,
        extra_whitelist: BTreeSet<TargetId>,
    ) -> Self {
        Self {
            configured,
            extra_whitelist,
        }
    }

    pub fn resolve(&self, snapshot: &PolicySnapshot, target: &TargetId) -> Category {
        if let Some(category) = snapshot.custom_categories.get(target) {
            return *category;
        }

        if let Some(rule) = snapshot.rule_for(target)
            && rule.category != Category::Other
        {
            return rule.category;
        }

        builtin_category(target)
            .or_else(|| self.configured.get(target).copied())
            .unwrap_or(Category::Other)
    }

    /// Built-in system set, configured extras, or a rule marked whitelisted
    pub fn is_whitelisted(&self, snapshot: &PolicySnapshot, target: &TargetId) -> bool {
        BUILTIN_WHITELIST.contains(&target.as_str())
            || self.extra_whitelist.contains(target)
            || snapshot.rule_for(target).is_some_and(|r| r.whitelisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_api::Rule;

    fn t(id: &str) -> TargetId {
        TargetId::new(id)
    }

    #[test]
    fn builtin_lookup() {
        assert_eq!(builtin_category(&t("com.whatsapp")), Some(Category::Social));
        assert_eq!(builtin_category(&t("unknown.app")), None);
        assert!(builtin_targets_in(Category::Games).contains(&t("com.roblox.client")));
    }

    #[test]
    fn resolution_order() {
        let resolver = CategoryResolver::new(
            [(t("com.whatsapp"), Category::Education), (t("my.app"), Category::Games)].into(),
            BTreeSet::new(),
        );
        let mut snapshot = PolicySnapshot::default();

        // Built-in map wins over configured assignment
        assert_eq!(resolver.resolve(&snapshot, &t("com.whatsapp")), Category::Social);
        // Configured assignment used when nothing else matches
        assert_eq!(resolver.resolve(&snapshot, &t("my.app")), Category::Games);
        assert_eq!(resolver.resolve(&snapshot, &t("other.app")), Category::Other);

        // Rule category beats the built-in map
        snapshot
            .rules
            .push(Rule::new("com.whatsapp").with_category(Category::Productivity));
        assert_eq!(
            resolver.resolve(&snapshot, &t("com.whatsapp")),
            Category::Productivity
        );

        // Custom override beats everything
        snapshot
            .custom_categories
            .insert(t("com.whatsapp"), Category::Entertainment);
        assert_eq!(
            resolver.resolve(&snapshot, &t("com.whatsapp")),
            Category::Entertainment
        );
    }

    #[test]
    fn whitelist_sources() {
        let resolver = CategoryResolver::new(BTreeMap::new(), [t("homework.app")].into());
        let mut snapshot = PolicySnapshot::default();
        snapshot.rules.push(Rule::new("reader.app").whitelisted());

        assert!(resolver.is_whitelisted(&snapshot, &t("com.android.phone")));
        assert!(resolver.is_whitelisted(&snapshot, &t("homework.app")));
        assert!(resolver.is_whitelisted(&snapshot, &t("reader.app")));
        assert!(!resolver.is_whitelisted(&snapshot, &t("com.roblox.client")));
    }
}
