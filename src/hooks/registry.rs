use std::{
    collections::HashMap,
    sync::{
        RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use flowdeck_plugin::{ComponentHandle, DEFAULT_PRIORITY, HookRegistration, Placement};
use tracing::debug;

/// Point name -> registrations, each bucket sorted by ascending
/// `(priority, seq)`.
///
/// Upsert, sequence assignment and re-sort happen under the same write lock.
#[derive(Default)]
pub struct HookRegistry {
    buckets: RwLock<HashMap<String, Vec<HookRegistration>>>,
    next_seq: AtomicU64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<HookRegistration>>> {
        self.buckets.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<HookRegistration>>> {
        self.buckets.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts `registration`, replacing any entry with the same
    /// `(point, owner, placement)`. The replacement counts as the newest
    /// entry among equal priorities.
    pub fn register(&self, mut registration: HookRegistration) {
        let mut buckets = self.write();
        registration.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let bucket = buckets.entry(registration.point_name.clone()).or_default();
        bucket.retain(|existing| !existing.same_slot(&registration));
        debug!(
            point = %registration.point_name,
            owner = %registration.owner_key,
            placement = %registration.placement,
            priority = registration.priority,
            "hook registered"
        );
        bucket.push(registration);
        bucket.sort_by_key(|r| (r.priority, r.seq));
    }

    /// Positional form of [`Self::register`]; a missing priority means 0.
    pub fn register_hook(
        &self,
        point_name: &str,
        implementation: ComponentHandle,
        priority: Option<i32>,
        placement: Placement,
        owner_key: &str,
    ) {
        self.register(
            HookRegistration::new(point_name, owner_key, placement, implementation)
                .with_priority(priority.unwrap_or(DEFAULT_PRIORITY)),
        );
    }

    /// Removes every placement `owner_key` holds at `point_name`.
    pub fn unregister(&self, point_name: &str, owner_key: &str) -> usize {
        let mut buckets = self.write();
        let Some(bucket) = buckets.get_mut(point_name) else {
            return 0;
        };
        let before = bucket.len();
        bucket.retain(|r| r.owner_key != owner_key);
        let removed = before - bucket.len();
        if bucket.is_empty() {
            buckets.remove(point_name);
        }
        removed
    }

    /// Removes everything `owner_key` registered, at any point.
    pub fn unregister_owner(&self, owner_key: &str) -> usize {
        let mut buckets = self.write();
        let mut removed = 0;
        buckets.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|r| r.owner_key != owner_key);
            removed += before - bucket.len();
            !bucket.is_empty()
        });
        removed
    }

    /// Snapshot of the registrations at `point_name`, empty when none.
    pub fn get(&self, point_name: &str) -> Vec<HookRegistration> {
        self.read().get(point_name).cloned().unwrap_or_default()
    }

    pub fn has(&self, point_name: &str) -> bool {
        self.read().contains_key(point_name)
    }

    pub fn points(&self) -> Vec<String> {
        let mut points: Vec<String> = self.read().keys().cloned().collect();
        points.sort();
        points
    }

    pub fn reset(&self) {
        self.write().clear();
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("points", &self.points())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdeck_plugin::{Component, points};

    fn comp(name: &str) -> ComponentHandle {
        let text = name.to_string();
        Component::from_fn(name, move |_ctx| Ok(text.clone())).into_handle()
    }

    fn owners(registry: &HookRegistry, point: &str) -> Vec<String> {
        registry.get(point).into_iter().map(|r| r.owner_key).collect()
    }

    #[test]
    fn test_same_slot_is_upserted() {
        let registry = HookRegistry::new();
        registry.register_hook(points::HEADER_BEFORE, comp("v1"), Some(5), Placement::Before, "banner");
        registry.register_hook(points::HEADER_BEFORE, comp("v2"), Some(1), Placement::Before, "banner");

        let regs = registry.get(points::HEADER_BEFORE);
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].implementation.name(), "v2");
        assert_eq!(regs[0].priority, 1);
    }

    #[test]
    fn test_priority_order_is_stable() {
        let registry = HookRegistry::new();
        registry.register_hook(points::FOOTER_AFTER, comp("a"), Some(10), Placement::After, "a");
        registry.register_hook(points::FOOTER_AFTER, comp("b"), None, Placement::After, "b");
        registry.register_hook(points::FOOTER_AFTER, comp("c"), Some(-3), Placement::After, "c");
        registry.register_hook(points::FOOTER_AFTER, comp("d"), Some(0), Placement::After, "d");

        assert_eq!(owners(&registry, points::FOOTER_AFTER), vec!["c", "b", "d", "a"]);
    }

    #[test]
    fn test_reregistration_moves_behind_equal_priorities() {
        let registry = HookRegistry::new();
        registry.register_hook("slot", comp("a"), None, Placement::After, "a");
        registry.register_hook("slot", comp("b"), None, Placement::After, "b");
        registry.register_hook("slot", comp("a2"), None, Placement::After, "a");

        assert_eq!(owners(&registry, "slot"), vec!["b", "a"]);
    }

    #[test]
    fn test_unregister_removes_all_placements_and_prunes() {
        let registry = HookRegistry::new();
        registry.register_hook("userInput", comp("x"), None, Placement::Before, "quiz");
        registry.register_hook("userInput", comp("y"), None, Placement::Replace, "quiz");
        registry.register_hook("footer", comp("z"), None, Placement::After, "quiz");

        assert_eq!(registry.unregister("userInput", "quiz"), 2);
        assert!(!registry.has("userInput"));
        assert!(registry.get("userInput").is_empty());
        assert_eq!(registry.unregister("userInput", "quiz"), 0);
        assert_eq!(registry.points(), vec!["footer"]);
    }

    #[test]
    fn test_unregister_owner_everywhere() {
        let registry = HookRegistry::new();
        registry.register_hook(points::HEADER_AFTER, comp("x"), None, Placement::After, "quiz");
        registry.register_hook(points::FOOTER_AFTER, comp("y"), None, Placement::After, "quiz");
        registry.register_hook(points::FOOTER_AFTER, comp("z"), None, Placement::After, "other");

        assert_eq!(registry.unregister_owner("quiz"), 2);
        assert_eq!(registry.points(), vec![points::FOOTER_AFTER]);
        assert_eq!(owners(&registry, points::FOOTER_AFTER), vec!["other"]);
    }
}
