use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::component::ComponentHandle;

/// Priority given to registrations that do not ask for one.
pub const DEFAULT_PRIORITY: i32 = 0;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash,
    EnumString, AsRefStr, Display, Serialize, Deserialize, JsonSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Before,
    After,
    Replace,
}

/// Canonical insertion points of the playback pipeline.
///
/// The namespace is open: extensions may register on any string, but only
/// these names are rendered by the host.
pub mod points {
    pub const HEADER: &str = "header";
    pub const NAVIGATION: &str = "navigation";
    pub const FOOTER: &str = "footer";
    pub const ASSISTANT_MESSAGE: &str = "assistantMessage";
    pub const USER_INPUT: &str = "userInput";

    pub const HEADER_BEFORE: &str = "header:before";
    pub const HEADER_AFTER: &str = "header:after";
    pub const HEADER_REPLACE: &str = "header:replace";
    pub const NAVIGATION_BEFORE: &str = "navigation:before";
    pub const NAVIGATION_AFTER: &str = "navigation:after";
    pub const NAVIGATION_REPLACE: &str = "navigation:replace";
    pub const FOOTER_BEFORE: &str = "footer:before";
    pub const FOOTER_AFTER: &str = "footer:after";
    pub const FOOTER_REPLACE: &str = "footer:replace";
    pub const ASSISTANT_MESSAGE_BEFORE: &str = "assistantMessage:before";
    pub const ASSISTANT_MESSAGE_AFTER: &str = "assistantMessage:after";
    pub const ASSISTANT_MESSAGE_REPLACE: &str = "assistantMessage:replace";
    pub const USER_INPUT_BEFORE: &str = "userInput:before";
    pub const USER_INPUT_AFTER: &str = "userInput:after";
    pub const USER_INPUT_REPLACE: &str = "userInput:replace";

    // panels are after-only
    pub const LEFT_PANEL_TOP: &str = "leftPanel:top";
    pub const LEFT_PANEL_BOTTOM: &str = "leftPanel:bottom";
    pub const RIGHT_PANEL_TOP: &str = "rightPanel:top";
    pub const RIGHT_PANEL_BOTTOM: &str = "rightPanel:bottom";

    /// Slots that have default content and accept before/after/replace.
    pub const SLOTS: [&str; 5] = [HEADER, NAVIGATION, FOOTER, ASSISTANT_MESSAGE, USER_INPUT];

    pub const PANELS: [&str; 4] = [
        LEFT_PANEL_TOP,
        LEFT_PANEL_BOTTOM,
        RIGHT_PANEL_TOP,
        RIGHT_PANEL_BOTTOM,
    ];
}

/// Joins a slot and placement into a point name, e.g. `header:before`.
pub fn point_name(slot: &str, placement: Placement) -> String {
    format!("{slot}:{placement}")
}

/// Splits `slot:suffix` into its parts. Names without a colon have no suffix.
pub fn split_point(point: &str) -> (&str, Option<&str>) {
    match point.split_once(':') {
        Some((slot, suffix)) => (slot, Some(suffix)),
        None => (point, None),
    }
}

/// One extension attached to one insertion point.
#[derive(Clone)]
pub struct HookRegistration {
    pub point_name: String,
    pub owner_key: String,
    pub placement: Placement,
    pub priority: i32,
    /// Registration order, assigned by the hook registry. Breaks priority ties.
    pub seq: u64,
    pub implementation: ComponentHandle,
}

impl HookRegistration {
    pub fn new(
        point_name: impl Into<String>,
        owner_key: impl Into<String>,
        placement: Placement,
        implementation: ComponentHandle,
    ) -> Self {
        Self {
            point_name: point_name.into(),
            owner_key: owner_key.into(),
            placement,
            priority: DEFAULT_PRIORITY,
            seq: 0,
            implementation,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// True when `other` occupies the same `(point, owner, placement)` slot.
    pub fn same_slot(&self, other: &HookRegistration) -> bool {
        self.point_name == other.point_name
            && self.owner_key == other.owner_key
            && self.placement == other.placement
    }
}

impl fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistration")
            .field("point_name", &self.point_name)
            .field("owner_key", &self.owner_key)
            .field("placement", &self.placement)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .field("implementation", &self.implementation.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    #[test]
    fn test_point_names() {
        assert_eq!(point_name(points::USER_INPUT, Placement::Replace), points::USER_INPUT_REPLACE);
        assert_eq!(split_point("leftPanel:top"), ("leftPanel", Some("top")));
        assert_eq!(split_point("custom"), ("custom", None));
    }

    #[test]
    fn test_registration_defaults_to_priority_zero() {
        let comp = Component::from_fn("banner", |_ctx| Ok("banner".into())).into_handle();
        let reg = HookRegistration::new(points::HEADER_BEFORE, "banner", Placement::Before, comp);
        assert_eq!(reg.priority, DEFAULT_PRIORITY);
        assert_eq!(reg.clone().with_priority(-5).priority, -5);
        assert!(reg.same_slot(&reg.clone().with_priority(9)));
    }
}
